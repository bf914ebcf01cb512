//! # Bambulink
//!
//! A virtual Marlin serial port for Bambu Lab printers.
//!
//! Print hosts that only speak serial G-code open the `BAMBU` port and get
//! Marlin-style replies, while the bridge talks to the printer over its LAN
//! MQTT interface.
//!
//! ## Architecture
//!
//! Bambulink is organized as a workspace with multiple crates:
//!
//! 1. **bambulink-core** - Errors, device state model, state mirror
//! 2. **bambulink-communication** - Virtual serial transport, Marlin emulation,
//!    MQTT device link, upload bridge, TCP bridge
//! 3. **bambulink-settings** - Configuration files and port offering
//! 4. **bambulink** - Main binary that integrates all crates
//!
//! ## Uploads
//!
//! The `bambulink` binary only serves the serial port. Sending files to the
//! printer is a library API: hosts embedding Bambulink call
//! [`VirtualPrinterFactory::upload_bridge`], and uploaded files show up in
//! the `M20` listing of every port the same factory opens.

use std::sync::Arc;
use std::time::Duration;

pub use bambulink_communication::{
    DeviceLink, LocalDirStorage, MqttDeviceLink, ReadOutcome, RemoteStorage, SessionConfig,
    SessionState, UploadBridge, UploadCallbacks, VirtualSerial,
};
pub use bambulink_core::{DeviceState, DeviceStateMirror, Error, Result, SubscriptionId};
pub use bambulink_settings::{Config, LogFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable forcing JSON log output when set to `1` or `true`
pub const LOG_JSON_ENV: &str = "BAMBULINK_LOG_JSON";

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support, `info` by default
/// - Human readable or JSON lines on stdout
/// - Serial traffic on the `bambulink::serial` target
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (text_layer, json_layer) = if json_requested(format) {
        let layer = fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_names(true);
        (None, Some(layer))
    } else {
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true);
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

fn json_requested(format: LogFormat) -> bool {
    format == LogFormat::Json
        || std::env::var(LOG_JSON_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

/// Opens virtual serial sessions for one configured printer
///
/// Owns the state mirror shared by every session it opens and keeps it fed
/// from the device link for as long as the factory lives.
pub struct VirtualPrinterFactory {
    config: Config,
    link: Arc<dyn DeviceLink>,
    mirror: Arc<DeviceStateMirror>,
    storage: Arc<dyn RemoteStorage>,
    link_subscription: SubscriptionId,
}

impl VirtualPrinterFactory {
    /// Wire a printer link and storage to a fresh state mirror
    pub fn new(config: Config, link: Arc<dyn DeviceLink>, storage: Arc<dyn RemoteStorage>) -> Self {
        let mirror = Arc::new(DeviceStateMirror::new());
        let feed = Arc::clone(&mirror);
        let link_subscription = link.subscribe(Box::new(move |event| feed.update(&event)));

        Self {
            config,
            link,
            mirror,
            storage,
            link_subscription,
        }
    }

    /// Ports this factory can open; empty while the printer is not configured
    pub fn port_names(&self) -> Vec<String> {
        self.config.additional_port_names()
    }

    /// Open a session on `port`
    ///
    /// Returns `None` for ports this bridge does not offer, for incomplete
    /// configuration, or when the session cannot start.
    pub fn open(
        &self,
        port: &str,
        baud_rate: Option<u32>,
        read_timeout: Option<Duration>,
    ) -> Option<VirtualSerial> {
        if port != self.config.serial.port_name {
            tracing::debug!("Port {} is not handled by Bambulink", port);
            return None;
        }
        if !self.config.is_complete() {
            tracing::warn!(
                "Not offering {}: missing {}",
                port,
                self.config.missing_fields().join(", ")
            );
            return None;
        }

        let session = self.config.session_config(baud_rate, read_timeout);
        match VirtualSerial::open(
            session,
            Arc::clone(&self.link),
            Arc::clone(&self.mirror),
            Arc::clone(&self.storage),
        ) {
            Ok(serial) => Some(serial),
            Err(e) => {
                tracing::error!("Failed to open {}: {}", port, e);
                None
            }
        }
    }

    /// Upload bridge over the same storage the sessions list
    ///
    /// Not used by the `bambulink` binary; see the crate docs.
    pub fn upload_bridge(&self) -> UploadBridge {
        UploadBridge::new(Arc::clone(&self.storage))
    }

    /// Mirror shared by every session
    pub fn mirror(&self) -> &Arc<DeviceStateMirror> {
        &self.mirror
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for VirtualPrinterFactory {
    fn drop(&mut self) {
        self.link.unsubscribe(self.link_subscription);
    }
}
