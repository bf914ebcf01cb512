//! Bambulink Settings Crate
//!
//! Handles application configuration: loading, validation, and deciding
//! whether a virtual port can be offered.

pub mod config;
pub mod error;

pub use config::{
    BridgeSettings, Config, LogFormat, PrinterSettings, SerialSettings, DEFAULT_PORT_NAME,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
