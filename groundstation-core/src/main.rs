use std::time::Duration;

use tracing::{error, info, warn};

use groundstation_core::config::Config;

const DEFAULT_CONFIG_PATH: &str = "groundstation.toml";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "groundstation_core=info,tokio_serial=warn".into()),
        )
        .init();

    info!("ground station core v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("GROUNDSTATION_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let raw = match std::fs::read_to_string(&config_path) {
        Ok(raw) => raw,
        Err(e) => {
            error!("failed to read config file {config_path}: {e}");
            std::process::exit(1);
        }
    };
    let config = match Config::from_toml(&raw) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let (station, tasks) = match groundstation_core::spawn(config).await {
        Ok(pair) => pair,
        Err(e) => {
            error!("failed to start ground station core: {e}");
            std::process::exit(1);
        }
    };

    // HTTP/WebSocket wiring is out of scope for this crate (spec.md §1); this
    // binary is a demo host that logs telemetry to stdout and exposes the
    // operator surface to nothing but its own shutdown handling. An
    // out-of-process layer would call `station`'s methods directly instead.
    let telemetry_task = tokio::spawn(log_telemetry(station.subscribe_telemetry()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, shutting down"),
        Err(e) => warn!("failed to listen for ctrl-c: {e}"),
    }

    telemetry_task.abort();
    tasks.shutdown(SHUTDOWN_GRACE).await;
    info!("ground station core stopped");
}

async fn log_telemetry(subscription: groundstation_core::telemetry::Subscription) {
    loop {
        let snapshot = subscription.recv().await;
        info!(
            sequence = snapshot.sequence,
            axes = ?snapshot.axes,
            imu_heading_deg = ?snapshot.imu_heading_deg,
            health = ?snapshot.health,
            "telemetry snapshot"
        );
    }
}
