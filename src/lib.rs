//! # housetuya
//!
//! A local-network discovery and control engine for Tuya smart plugs,
//! bulbs and switches: passive LAN discovery, per-device TCP polling and
//! command issuance with retry/timeout/pulse semantics, and a small
//! configuration/state surface for a house-automation service to drive.
//!
//! The engine owns all device and model state on a single `tokio` task
//! (see [`engine::Engine`]); every other task — discovery, the periodic
//! sweep, and callers of the control surface — talks to it over a
//! command channel exposed as [`engine::EngineHandle`]. No device state
//! is ever shared behind a lock.
//!
//! This crate does not implement an HTTP server: [`engine::EngineHandle`]
//! is the seam a web framework would call into to serve `/tuya/status`,
//! `/tuya/set`, and `/tuya/config`.

pub mod config;
pub mod control;
pub mod crc;
pub mod crypto;
pub mod device;
pub mod discovery;
pub mod engine;
pub mod error;
#[macro_use]
mod macros;
pub mod model;
pub mod protocol;

pub use config::{ConfigDocument, ConfigStore, FileConfigStore};
pub use control::StatusDocument;
pub use device::{Device, DeviceSecret, DeviceTable};
pub use engine::{Engine, EngineHandle};
pub use error::TuyaError;
pub use model::{ModelEntry, ModelRegistry};

/// Current Unix time in whole seconds, the timestamp unit used throughout
/// the device table (spec §3).
pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}
