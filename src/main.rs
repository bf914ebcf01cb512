use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bambulink::{init_logging, Config, LocalDirStorage, MqttDeviceLink, VirtualPrinterFactory};
use bambulink_communication::serve;
use bambulink_core::TransportError;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_logging(config.bridge.log_format)?;
    tracing::info!("Bambulink {} using {}", bambulink::VERSION, config_path.display());

    if !config.is_complete() {
        anyhow::bail!(
            "Printer connection is not configured in {} (missing {})",
            config_path.display(),
            config.missing_fields().join(", ")
        );
    }

    let link = Arc::new(
        MqttDeviceLink::connect(config.mqtt_config()).context("Failed to start printer link")?,
    );
    let storage_dir = config.storage_dir();
    let storage = Arc::new(
        LocalDirStorage::new(&storage_dir)
            .with_context(|| format!("Failed to open storage at {}", storage_dir.display()))?,
    );
    tracing::info!("Printer storage at {}", storage_dir.display());

    let factory = Arc::new(VirtualPrinterFactory::new(
        config.clone(),
        link.clone(),
        storage,
    ));

    let listener = TcpListener::bind(&config.bridge.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", config.bridge.listen))?;

    let port = config.serial.port_name.clone();
    let server = serve(listener, move || {
        factory
            .open(&port, None, None)
            .ok_or_else(|| TransportError::PortNotFound { port: port.clone() })
    });

    tokio::select! {
        result = server => result.context("Serial bridge stopped")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    link.shutdown();
    Ok(())
}
