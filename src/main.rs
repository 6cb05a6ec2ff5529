use color_eyre::{eyre::eyre, Result};
use device_discovery::config::AppConfig;
use device_discovery::mqtt::message_manager::TelemetryMessage;
use device_discovery::mqtt::mqtt_handler;
use device_discovery::registry::DeviceRecord;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const CONFIG_ENV: &str = "DEVICE_DISCOVERY_CONFIG";

#[derive(Serialize)]
struct RegistrySnapshot {
    devices: Vec<DeviceRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::resolve(config_path()).await?;
    info!(
        "Using broker {}:{} (keep-alive {}s)",
        config.broker.host, config.broker.port, config.broker.keep_alive_secs
    );
    if !config.discovery.resubscribe_devices_on_reconnect {
        info!("Device subscriptions will not be restored after a reconnect");
    }

    let (telemetry_tx, mut telemetry_rx) =
        mpsc::channel::<TelemetryMessage>(config.discovery.telemetry_buffer);

    let handle = mqtt_handler::start(&config, telemetry_tx)
        .map_err(|e| eyre!("Failed to start discovery: {}", e))?;

    let _telemetry_handle = tokio::spawn(async move {
        while let Some(msg) = telemetry_rx.recv().await {
            info!("Telemetry: {}", msg);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let snapshot = RegistrySnapshot {
        devices: handle.registry.records().await,
    };
    match toml::to_string_pretty(&snapshot) {
        Ok(dump) => info!("{} devices discovered:\n{}", snapshot.devices.len(), dump),
        Err(e) => warn!("Unable to render registry: {}", e),
    }

    handle.event_loop.abort();
    handle.supervisor.abort();
    Ok(())
}

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
