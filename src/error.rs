//! Error types for the housetuya crate.
//!
//! The codec and the polling engine follow the spec's "return a length or
//! zero, never unwind" discipline (spec §4.C, §7): `decode`/`encode_*`
//! return `Option`, and transient I/O inside the engine is logged and
//! swallowed rather than propagated. `TuyaError` exists for the outer
//! seams — config loading and the control surface — where idiomatic Rust
//! library code returns a `Result`, same division of labor as the
//! teacher's own `error.rs`.

use thiserror::Error;

/// Errors the control surface (spec §4.H) and config loader can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TuyaError {
    /// Transient I/O failure (socket connect/bind). Never raised by the
    /// per-tick engine sweep itself; only by setup paths that must fail
    /// loudly (spec §6: "UDP sockets cannot open both ports — log only").
    #[error("IO error: {0}")]
    Io(String),

    /// A configuration document was missing a required field, named a
    /// duplicate device id, or referenced an unknown model control point.
    /// Per spec §7 the offending item is skipped, not fatal to the load.
    #[error("configuration error: {0}")]
    Config(String),

    /// `set` was called without a `point` parameter.
    #[error("missing point name")]
    MissingPoint,

    /// `set`/`status` named a point that matches no device.
    #[error("invalid point name")]
    InvalidPoint,

    /// `set` was called without a `state` parameter.
    #[error("missing state value")]
    MissingState,

    /// `set` was called with a state other than on/off/1/0.
    #[error("invalid state value")]
    InvalidState,

    /// `set` was called with a negative pulse duration.
    #[error("invalid pulse value")]
    InvalidPulse,

    /// The posted configuration body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, TuyaError>;

impl From<std::io::Error> for TuyaError {
    fn from(err: std::io::Error) -> Self {
        TuyaError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TuyaError {
    fn from(err: serde_json::Error) -> Self {
        TuyaError::Json(err.to_string())
    }
}

impl TuyaError {
    /// HTTP status an `echttp`-style handler would report for this error
    /// (spec §6: missing/invalid point -> 404, everything else -> 400).
    pub fn http_status(&self) -> u16 {
        match self {
            TuyaError::MissingPoint | TuyaError::InvalidPoint => 404,
            _ => 400,
        }
    }
}
