//! Bridge daemon
//!
//! Probes the audio interface, then serves the AudioInterface RPC surface
//! until Ctrl+C. Usage: `bridged [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xlr_bridge::{
    audio::{CapabilityCatalog, CpalDriver, DeviceInfo, HardwareDriver, SimulatedDriver},
    config::{AppConfig, DriverKind},
    network::UdpTransport,
    rpc::RpcServer,
    service::AudioInterfaceService,
    streams::{StreamEvent, StreamRegistry},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting XLR bridge");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading config")?;

    let driver: Arc<dyn HardwareDriver> = match config.device.driver {
        DriverKind::Cpal => Arc::new(
            CpalDriver::new(
                config.device.host.clone(),
                config.device.name.clone(),
                config.device.frame_samples,
            )
            .context("opening audio device")?,
        ),
        DriverKind::Simulated => Arc::new(SimulatedDriver::new(
            config.device.simulated_info(),
            config.device.frame_samples,
        )),
    };

    let info = match &config.device.channels {
        Some(channels) => DeviceInfo {
            channels: channels.clone(),
        },
        None => driver.probe().context("probing audio device")?,
    };
    log_device(driver.name(), &info);

    let transport = Arc::new(UdpTransport::new(
        config.pump.io_timeout(),
        config.pump.max_datagram_size,
    ));
    let registry = Arc::new(StreamRegistry::new(
        CapabilityCatalog::new(info),
        driver,
        transport,
        config.pump.clone(),
    ));
    tokio::spawn(log_events(registry.clone()));

    let service = AudioInterfaceService::new(registry.clone());
    let server = RpcServer::new(config.rpc.clone(), service);
    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await
        .context("running RPC server")?;

    registry.shutdown().await;
    tracing::info!("Bridge stopped");
    Ok(())
}

fn log_device(name: &str, info: &DeviceInfo) {
    tracing::info!("Audio device: {} ({} channels)", name, info.channels.len());
    for (i, channel) in info.channels.iter().enumerate() {
        tracing::info!(
            "  ch{}: {:?} Hz{}",
            i,
            channel.sample_rates,
            channel
                .description
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
    }
}

async fn log_events(registry: Arc<StreamRegistry>) {
    let mut events = registry.subscribe();
    drop(registry);
    loop {
        match events.recv().await {
            Ok(StreamEvent::Created(record)) => {
                tracing::debug!("Stream {} up since {}", record.stream, record.created_at)
            }
            Ok(StreamEvent::Deleted(record)) => tracing::debug!(
                "Stream {} closed after {} bytes captured, {} played",
                record.stream,
                record.total_bytes_captured,
                record.total_bytes_played
            ),
            Ok(StreamEvent::Failed { record, error }) => tracing::warn!(
                "Stream {} dropped after {} bytes captured, {} played: {}",
                record.stream,
                record.total_bytes_captured,
                record.total_bytes_played,
                error
            ),
            Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} stream events", n),
            Err(RecvError::Closed) => break,
        }
    }
}
