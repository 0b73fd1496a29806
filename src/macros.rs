//! Small code-generation macro used to keep the protocol command table
//! declarative.

/// Declare a C-like command code enum with explicit `u32` discriminants and
/// a `from_u32` lookup, used for the Tuya frame `cmd` field.
macro_rules! define_command_type {
    ($($name:ident = $val:expr),* $(,)?) => {
        /// Tuya frame command codes (the `cmd` field of the envelope).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum CommandType {
            $($name = $val),*
        }

        impl CommandType {
            /// Look up a command type from its wire value. Unknown codes are
            /// tolerated by callers (see spec §4.C) so this returns `None`
            /// rather than panicking.
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($val => Some(CommandType::$name),)*
                    _ => None,
                }
            }
        }
    };
}
