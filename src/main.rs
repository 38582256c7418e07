//! field-uplink - upload daemon for field sensing devices
//!
//! This is the composition root that wires together all the components.

use field_uplink::adapters::outbound::{LocalFileStore, StaticDeviceInfo, SystemClock};
use field_uplink::config::load_config;
use field_uplink::infrastructure::shutdown_signal;
use field_uplink::Uploader;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from file and environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let node_id = cfg.node_id()?;
    tracing::info!(
        "starting field-uplink node={} server={}:{} landing={} staging={}",
        node_id,
        cfg.server_host,
        cfg.server_port,
        cfg.landing_dir.display(),
        cfg.staging_dir.display()
    );

    // ===== COMPOSITION ROOT =====
    let uploader = Uploader::new(
        cfg,
        Arc::new(SystemClock::new()),
        Arc::new(StaticDeviceInfo::new(node_id)),
        Arc::new(LocalFileStore::new()),
    )?;
    uploader.start();

    // Runs until Ctrl+C, SIGTERM or a fatal stop
    shutdown_signal(uploader.shutdown_controller().clone()).await;
    uploader.stop().await;

    if uploader.is_fatal() {
        anyhow::bail!("uplink stopped: server directory is empty");
    }
    Ok(())
}
