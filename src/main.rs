//! scopestream - headless runner
//!
//! Captures from the simulated digitizer for the configured duration, routes
//! every tick into in-memory sinks and logs a session summary. An optional
//! first argument names the TOML config file.

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::RecvTimeoutError;
use scopestream::{
    backend::{AcquisitionBackend, BackendMessage, SimulatedDriver},
    config::{ensure_app_data_dir, AppConfig},
    sinks::{DensityGrid, SeriesKey, SinkRouter, TimeSeriesBuffer},
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Router = SinkRouter<TimeSeriesBuffer, DensityGrid>;

fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref());
    tracing::info!(
        "Starting scopestream: {} simulated units, {} samples per buffer",
        config.simulation.units.len(),
        config.acquisition.sample_quota
    );

    let driver = SimulatedDriver::from_config(&config.simulation);
    let (backend, frontend) = AcquisitionBackend::new(config.clone(), Box::new(driver));
    let ledger = backend.ledger();
    let backend_handle = std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || backend.run())
        .context("Failed to spawn acquisition thread")?;

    let mut router = SinkRouter::new(
        TimeSeriesBuffer::new(config.display.time_series_capacity),
        DensityGrid::new(config.display.clamped_density_bins()),
        config.display.density_source,
    );

    frontend.start_capture();
    let deadline = Instant::now() + Duration::from_secs(config.simulation.run_seconds);
    while Instant::now() < deadline {
        match frontend.receiver.recv_timeout(Duration::from_millis(50)) {
            Ok(msg) => handle_message(&mut router, msg),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("Acquisition thread exited early"),
        }
    }

    let outcome = frontend
        .stop_and_wait(Duration::from_secs(5))
        .context("Stopping capture")?;
    for msg in outcome.drained {
        handle_message(&mut router, msg);
    }
    if let Some(summary) = outcome.summary {
        tracing::info!(
            "Session started {} ran {:.2?}: {} ticks, {} polls, {} overflows, {} driver failures",
            summary.started_at.format("%H:%M:%S"),
            summary.duration,
            summary.stats.ticks_emitted,
            summary.stats.polls,
            summary.stats.overflows,
            summary.stats.driver_failures
        );
    }

    frontend.shutdown();
    for msg in frontend.receiver.iter() {
        let done = matches!(msg, BackendMessage::Shutdown);
        handle_message(&mut router, msg);
        if done {
            break;
        }
    }
    backend_handle
        .join()
        .map_err(|_| anyhow!("Acquisition thread panicked"))?;

    let (series, density) = router.into_parts();
    for key in series.keys() {
        if let Some((index, value)) = series.latest(key) {
            tracing::info!("{}: {} points, last {:.4} V at tick {}", key, series.len(key), value, index);
        }
    }
    tracing::info!(
        "Density grid {}x{}, buffers allocated {} released {}",
        density.bins(),
        density.bins(),
        ledger.allocations(),
        ledger.releases()
    );
    Ok(())
}

fn handle_message(router: &mut Router, msg: BackendMessage) {
    match msg {
        BackendMessage::Ticks(ticks) => router.route_all(&ticks),
        BackendMessage::ChannelModel(model) => router.configure_axes(&model),
        BackendMessage::ExpressionAdded { id, formula, .. } => {
            tracing::info!("Math channel {} = {}", SeriesKey::Expression(id), formula);
        }
        BackendMessage::ExpressionRejected { formula, reason } => {
            tracing::warn!("Formula '{}' rejected: {}", formula, reason);
        }
        BackendMessage::DeviceOpenFailed { serial, reason } => {
            tracing::warn!("Unit {} unavailable: {}", serial, reason);
        }
        BackendMessage::Stats(stats) => {
            tracing::debug!(
                "{} ticks, {:.1}% of polls with data",
                stats.ticks_emitted,
                stats.data_poll_ratio()
            );
        }
        BackendMessage::Error(e) => tracing::error!("{}", e),
        _ => {}
    }
}

/// Console plus daily-rolling file logging; the guard flushes the file on drop
fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scopestream=debug"));

    let (file_layer, guard) = match ensure_app_data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "scopestream.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}
