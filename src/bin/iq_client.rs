//! IQ acquisition client
//!
//! Connects to a DAQ firmware, pulls frames until interrupted and prints
//! status events as JSON lines.
//!
//! Usage: `iq-client [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daq_iq_client::{
    config::AppConfig,
    events::{delivery_queue, EventReceiver, EventSender},
    receiver::SampleFrame,
    AcquisitionClient,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting IQ client for {} ({:?} interface)",
        config.receiver.address,
        config.receiver.interface
    );

    let (event_tx, event_rx) = delivery_queue();
    let running = Arc::new(AtomicBool::new(true));

    let printer = tokio::task::spawn_blocking(move || print_events(event_rx));
    let acquisition_running = running.clone();
    let acquisition =
        tokio::task::spawn_blocking(move || acquire(config, event_tx, acquisition_running));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            running.store(false, Ordering::SeqCst);
        }
    });

    let result = acquisition.await;
    printer.await?;
    result??;
    Ok(())
}

fn acquire(config: AppConfig, events: EventSender, running: Arc<AtomicBool>) -> Result<()> {
    let mut client = AcquisitionClient::new(config, events)?;
    let mut last_stats_time = Instant::now();

    while running.load(Ordering::SeqCst) {
        match client.get_next_frame() {
            Ok(Some(frame)) => log_frame(frame),
            Ok(None) => tracing::debug!("Frame without payload"),
            Err(e) if e.is_terminated() => {
                tracing::info!("DAQ terminated the stream");
                break;
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!("DAQ stalled, reconnecting: {}", e);
            }
            Err(e) => {
                tracing::warn!("Acquisition failed: {}", e);
                std::thread::sleep(RETRY_DELAY);
            }
        }

        // Periodic stats
        if last_stats_time.elapsed() >= STATS_INTERVAL {
            last_stats_time = Instant::now();
            let stats = client.stats();
            tracing::info!(
                "Receiver stats: {} frames, {} empty, {} bytes, M = {}",
                stats.frames_received,
                stats.empty_frames,
                stats.bytes_received,
                stats.channel_count
            );
        }
    }

    client.close();
    Ok(())
}

fn log_frame(frame: &SampleFrame) {
    let Some(header) = frame.header() else {
        return;
    };
    let power: Vec<String> = frame
        .rows()
        .map(|row| {
            let mean = row.iter().map(|s| s.norm_sqr()).sum::<f32>() / row.len().max(1) as f32;
            format!("{:.1}", 10.0 * mean.max(f32::MIN_POSITIVE).log10())
        })
        .collect();
    tracing::debug!(
        "Frame #{} {}x{} @ {} Hz, power [{}] dB",
        header.sequence(),
        frame.channels(),
        frame.samples_per_channel(),
        header.rf_center_freq,
        power.join(", ")
    );
}

fn print_events(events: EventReceiver) {
    for event in events.iter() {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!("Failed to encode event {}: {}", event.tag(), e),
        }
    }
}
