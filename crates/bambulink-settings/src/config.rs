//! Configuration for Bambulink
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Printer connection (serial number, host, access code, model)
//! - Print start options
//! - Virtual serial port
//! - TCP bridge and logging

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bambulink_communication::{MqttLinkConfig, PrintOptions, SessionConfig};
use bambulink_core::DeviceModel;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};

/// Name of the virtual port offered to hosts
pub const DEFAULT_PORT_NAME: &str = "BAMBU";

/// Printer connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterSettings {
    /// Printer family
    pub device_type: DeviceModel,
    /// Printer serial number, used in MQTT topics
    pub serial: String,
    /// Printer IP address or host name
    pub host: String,
    /// LAN access code shown on the printer screen
    pub access_code: String,
    /// MQTT user name
    pub username: String,
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            device_type: DeviceModel::X1C,
            serial: String::new(),
            host: String::new(),
            access_code: String::new(),
            username: "bblp".to_string(),
        }
    }
}

/// Virtual serial port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name offered to hosts
    pub port_name: String,
    /// Baud rate reported when the host does not ask for one
    pub baud_rate: u32,
    /// Default read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Include the chamber temperature in M105 replies on models with a
    /// chamber sensor
    pub report_chamber: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT_NAME.to_string(),
            baud_rate: 115200,
            read_timeout_ms: 2000,
            report_chamber: false,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// TCP bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Address the bridge listens on
    pub listen: String,
    /// Directory standing in for the printer SD card
    pub storage_dir: Option<PathBuf>,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8250".to_string(),
            storage_dir: None,
            log_format: LogFormat::Text,
        }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Printer connection
    pub printer: PrinterSettings,
    /// Print start options
    pub print: PrintOptions,
    /// Virtual serial port
    pub serial: SerialSettings,
    /// TCP bridge
    pub bridge: BridgeSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location, e.g. `~/.config/bambulink/bambulink.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("bambulink");
        path.push("bambulink.toml");
        path
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match format_of(path)? {
            FileFormat::Json => serde_json::from_str(&content)?,
            FileFormat::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load config from file, or use defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            FileFormat::Json => serde_json::to_string_pretty(self)?,
            FileFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::ConfigDirectory(e.to_string()))?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate value ranges
    ///
    /// Missing printer credentials are not an error here; see
    /// [`Config::is_complete`].
    pub fn validate(&self) -> ConfigResult<()> {
        if self.printer.username.trim().is_empty() {
            return Err(ConfigError::MissingKey("printer.username".to_string()));
        }

        if self.serial.port_name.trim().is_empty() {
            return Err(ConfigError::MissingKey("serial.port_name".to_string()));
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "serial.baud_rate".to_string(),
                value: self.serial.baud_rate.to_string(),
            });
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "serial.read_timeout_ms".to_string(),
                value: self.serial.read_timeout_ms.to_string(),
            });
        }

        if self.bridge.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::ValueOutOfRange {
                key: "bridge.listen".to_string(),
                value: self.bridge.listen.clone(),
            });
        }

        Ok(())
    }

    /// Whether serial number, host, and access code are all set
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Names of required printer fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.printer.serial.trim().is_empty() {
            missing.push("printer.serial");
        }
        if self.printer.host.trim().is_empty() {
            missing.push("printer.host");
        }
        if self.printer.access_code.trim().is_empty() {
            missing.push("printer.access_code");
        }
        missing
    }

    /// Virtual ports to offer; empty until the printer connection is configured
    pub fn additional_port_names(&self) -> Vec<String> {
        if self.is_complete() {
            vec![self.serial.port_name.clone()]
        } else {
            Vec::new()
        }
    }

    /// MQTT link settings for the configured printer
    pub fn mqtt_config(&self) -> MqttLinkConfig {
        let mut config = MqttLinkConfig::new(
            self.printer.host.trim(),
            self.printer.serial.trim(),
            self.printer.access_code.trim(),
        );
        config.username = self.printer.username.clone();
        config
    }

    /// Session settings, with host-requested overrides
    pub fn session_config(
        &self,
        baud_rate: Option<u32>,
        read_timeout: Option<Duration>,
    ) -> SessionConfig {
        SessionConfig {
            read_timeout: read_timeout
                .unwrap_or_else(|| Duration::from_millis(self.serial.read_timeout_ms)),
            baud_rate: baud_rate.unwrap_or(self.serial.baud_rate),
            model: self.printer.device_type,
            report_chamber: self.serial.report_chamber
                && self.printer.device_type.has_chamber_sensor(),
            print_options: self.print,
        }
    }

    /// Directory standing in for the printer SD card
    pub fn storage_dir(&self) -> PathBuf {
        match &self.bridge.storage_dir {
            Some(dir) => dir.clone(),
            None => {
                let mut path = dirs::data_dir()
                    .or_else(dirs::home_dir)
                    .unwrap_or_else(|| PathBuf::from("."));
                path.push("bambulink");
                path.push("sdcard");
                path
            }
        }
    }
}

enum FileFormat {
    Json,
    Toml,
}

fn format_of(path: &Path) -> ConfigResult<FileFormat> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(FileFormat::Json),
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(FileFormat::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}
