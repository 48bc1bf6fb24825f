//! # scopestream: streaming digitizer acquisition
//!
//! Acquires multi-channel waveforms from one or more streaming digitizers,
//! scales raw ADC codes to volts, derives math channels from user formulas
//! and routes every sample tick to a time-series view and a 2D density view.
//!
//! ## Architecture
//!
//! - **Backend**: the acquisition loop runs on its own thread and owns the
//!   driver, the channel model and the per-session sample buffers
//! - **Scripting**: Rhai-compiled math channels evaluated once per tick
//! - **Sinks**: time-series and density consumers plus tab-separated export
//! - **Communication**: crossbeam channels plus a three-flag handshake
//!
//! ## Configuration
//!
//! Settings are read from `config.toml` in the platform configuration
//! directory under `dev.scopestream`, or from an explicit path:
//!
//! - **Linux**: `~/.config/dev.scopestream/`
//! - **macOS**: `~/Library/Application Support/dev.scopestream/`
//! - **Windows**: `%APPDATA%\dev.scopestream\`
//!
//! ## Example
//!
//! ```ignore
//! use scopestream::{
//!     backend::{AcquisitionBackend, BackendMessage, SimulatedDriver},
//!     config::AppConfig,
//!     sinks::{DensityGrid, SinkRouter, TimeSeriesBuffer},
//! };
//!
//! let config = AppConfig::load_or_default(None);
//! let driver = SimulatedDriver::from_config(&config.simulation);
//! let (backend, frontend) = AcquisitionBackend::new(config.clone(), Box::new(driver));
//! std::thread::spawn(move || backend.run());
//!
//! let mut router = SinkRouter::new(
//!     TimeSeriesBuffer::new(config.display.time_series_capacity),
//!     DensityGrid::new(config.display.clamped_density_bins()),
//!     config.display.density_source,
//! );
//! frontend.start_capture();
//! for msg in frontend.drain() {
//!     match msg {
//!         BackendMessage::ChannelModel(model) => router.configure_axes(&model),
//!         BackendMessage::Ticks(ticks) => router.route_all(&ticks),
//!         _ => {}
//!     }
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod scripting;
pub mod sinks;
pub mod types;

// Re-export commonly used types
pub use backend::{AcquisitionBackend, BackendCommand, BackendMessage, FrontendReceiver};
pub use config::AppConfig;
pub use error::{Result, ScopeError};
pub use scripting::ExpressionEngine;
pub use sinks::{DensityGrid, DensitySource, SinkRouter, TimeSeriesBuffer};
pub use types::{AcquisitionState, Role, SampleTick, VoltageRange};
