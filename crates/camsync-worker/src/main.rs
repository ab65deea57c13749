//! Frame synchronizer worker binary.
//!
//! stdin: NDJSON frames and commands. stdout: NDJSON events. Logs go to
//! stderr so they never interleave with the event stream.

use std::time::{Duration, Instant};

use anyhow::Context;
use camsync_core::{FrameSynchronizer, SyncHandle, SyncRuntime};
use camsync_worker::{attach_event_sink, read_commands, write_events, LogFormat, WorkerConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("invalid worker config")?;
    init_tracing(config.log_format);

    info!("Starting camsync-worker");
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus metrics enabled");
    }

    let mut engine = FrameSynchronizer::from_env().context("invalid synchronizer config")?;
    info!("Sync config: {:?}", engine.config());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    attach_event_sink(&mut engine, events_tx.clone());
    let writer = tokio::spawn(write_events(events_rx, tokio::io::stdout()));

    let runtime = SyncRuntime::start(engine);
    let handle = runtime.handle();
    let stats_task = config
        .stats_log_interval
        .map(|every| tokio::spawn(log_statistics(handle.clone(), every)));

    tokio::select! {
        result = read_commands(
            BufReader::new(tokio::io::stdin()),
            &handle,
            &events_tx,
            config.max_line_bytes,
        ) => match result {
            Ok(summary) => info!(
                lines = summary.lines,
                accepted = summary.accepted,
                rejected = summary.rejected,
                "Input closed"
            ),
            Err(e) => error!("Input failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Some(task) = stats_task {
        task.abort();
    }

    let mut engine = runtime.stop().await.context("sync runtime failed")?;

    // Emit whatever is still buffered
    let mut flushed = 0u32;
    while engine.tick(Instant::now()).is_some() {
        flushed += 1;
    }
    if flushed > 0 {
        info!(composites = flushed, "Flushed buffered frames");
    }

    // Closing every sender lets the writer finish
    drop(engine);
    drop(events_tx);
    match writer.await {
        Ok(Ok(written)) => info!(events = written, "Output closed"),
        Ok(Err(e)) => error!("Output failed: {}", e),
        Err(e) => error!("Writer task failed: {}", e),
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON for production, always on stderr.
fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camsync=info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(env_filter)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(true)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .with(env_filter)
                .init();
        }
    }
}

async fn log_statistics(handle: SyncHandle, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // First tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let stats = handle.statistics();
        info!(
            sources = stats.sources.len(),
            composites = stats.composites_emitted,
            frames_received = stats.frames_received,
            frames_dropped = stats.frames_dropped,
            avg_sync_accuracy = format!("{:.1}%", stats.average_sync_accuracy * 100.0),
            active_ratio = format!("{:.2}", stats.active_source_ratio),
            health = %stats.health,
            "Synchronizer statistics"
        );
    }
}
