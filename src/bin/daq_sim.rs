//! Simulated DAQ firmware
//!
//! Serves synthetic IQ frames and acknowledges control commands on the
//! firmware's default ports.
//!
//! Usage: `daq-sim [channels] [samples_per_channel] [bit_depth]`

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daq_iq_client::{
    constants::{DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT},
    sim::{FirmwareSimulator, SimulatorConfig},
};

fn arg<T: std::str::FromStr>(index: usize, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::args().nth(index) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid argument {}: {}", index, raw)),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimulatorConfig {
        data_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_DATA_PORT)),
        control_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROL_PORT)),
        channels: arg(1, 5)?,
        samples_per_channel: arg(2, 1024)?,
        sample_bit_depth: arg(3, 32)?,
        ..Default::default()
    };
    tracing::info!(
        "Simulating {} channels x {} samples at {} bit",
        config.channels,
        config.samples_per_channel,
        config.sample_bit_depth
    );

    let mut sim = FirmwareSimulator::start(config)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                tracing::info!(
                    "Simulator stats: {} frames sent, {} commands, center {} Hz",
                    sim.frames_sent(),
                    sim.received_commands().len(),
                    sim.center_frequency()
                );
            }
        }
    }

    tracing::info!("Shutting down simulator");
    tokio::task::spawn_blocking(move || sim.shutdown()).await?;
    Ok(())
}
