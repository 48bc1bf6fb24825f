//! Backend module for streaming acquisition
//!
//! This module owns everything that touches the digitizer driver. The
//! acquisition loop runs on a separate thread and communicates with the
//! control thread through crossbeam channels plus one shared
//! [`StreamHandshake`].
//!
//! # Architecture
//!
//! - [`BackendCommand`] - Messages sent from the control thread to the backend
//! - [`BackendMessage`] - Messages sent from the backend (ticks, state, errors)
//! - [`FrontendReceiver`] - Control-side handle for commands and messages
//! - [`AcquisitionBackend`] - Entry point that owns the worker until `run`
//!
//! # Components
//!
//! - [`StreamingDriver`] - Driver seam; [`SimulatedDriver`] implements it in-process
//! - [`ChannelModel`] - Channel configuration of every opened unit
//! - [`StreamBufferManager`] - Per-session buffer lifetimes
//! - [`SampleDrainer`] - Driver callback that copies newly reported samples
//! - [`AcquisitionWorker`] - The Idle → Streaming → Draining → Stopped loop
//!
//! # Example
//!
//! ```ignore
//! use scopestream::backend::{AcquisitionBackend, BackendMessage, SimulatedDriver};
//! use scopestream::config::AppConfig;
//!
//! let config = AppConfig::default();
//! let driver = SimulatedDriver::from_config(&config.simulation);
//! let (backend, frontend) = AcquisitionBackend::new(config, Box::new(driver));
//! let handle = std::thread::spawn(move || backend.run());
//!
//! frontend.start_capture();
//! for msg in frontend.drain() {
//!     if let BackendMessage::Ticks(ticks) = msg {
//!         // route ticks to the sinks
//!     }
//! }
//! let outcome = frontend.stop_and_wait(std::time::Duration::from_secs(1))?;
//! frontend.shutdown();
//! handle.join().ok();
//! ```

pub mod buffers;
pub mod channel_model;
pub mod drainer;
pub mod driver_trait;
pub mod handshake;
pub mod scaler;
pub mod sim_driver;
pub mod worker;

pub use buffers::{
    BufferAllocator, BufferLedger, ChannelBuffers, DeviceBuffers, HeapAllocator, SessionBuffers,
    StreamBufferManager,
};
pub use channel_model::{ChannelAddress, ChannelEdit, ChannelModel, ChannelSettings, DeviceChannels};
pub use drainer::SampleDrainer;
pub use driver_trait::{
    open_units, parse_serial_list, OpenedUnits, SharedSampleBuffer, StreamingDriver,
    StreamingReady, StreamingRequest,
};
pub use handshake::{SampleWindow, StreamHandshake};
pub use scaler::{full_scale_voltage, to_voltage, FULL_SCALE_VOLTS};
pub use sim_driver::{SignalPattern, SimCounters, SimulatedDriver, SIM_MAX_CODE};
pub use worker::AcquisitionWorker;

use crate::config::AppConfig;
use crate::error::{Result, ScopeError};
use crate::scripting::ParameterBinding;
use crate::types::{
    AcquisitionState, AcquisitionStats, DeviceInfo, ExpressionId, Role, SampleTick,
    SessionSummary,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Message sent from the control thread to the backend
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Allocate buffers and arm every unit
    StartCapture,
    /// Ask the loop to leave `Streaming` after the current poll
    StopCapture,
    /// Change one channel; deferred while a session is active
    EditChannel {
        address: ChannelAddress,
        edit: ChannelEdit,
    },
    /// Compile and activate a math formula
    AddExpression(String),
    RemoveExpression(ExpressionId),
    /// Move a parameter's slider
    SetParameter {
        id: ExpressionId,
        name: char,
        slider: i32,
    },
    /// Request a [`BackendMessage::ChannelModel`] snapshot
    RequestChannelModel,
    /// Request current statistics
    RequestStats,
    /// Enable or disable the tick export file
    SetExport(bool),
    /// Stop any session, close the units and exit the loop
    Shutdown,
}

/// Message sent from the backend to the control thread
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Units opened at startup
    DevicesOpened(Vec<DeviceInfo>),
    /// A configured unit could not be opened
    DeviceOpenFailed { serial: String, reason: String },
    /// Acquisition state transition
    StateChanged(AcquisitionState),
    /// Ticks produced by one poll, in index order
    Ticks(Vec<SampleTick>),
    /// The units of a session have stopped; sent once per session after its last ticks
    UnitStopped(SessionSummary),
    /// Snapshot of the channel model
    ChannelModel(ChannelModel),
    ChannelEditApplied {
        address: ChannelAddress,
        settings: ChannelSettings,
    },
    /// Queued until the active session stops
    ChannelEditDeferred {
        address: ChannelAddress,
        edit: ChannelEdit,
    },
    ChannelEditRejected {
        address: ChannelAddress,
        reason: String,
    },
    ExpressionAdded {
        id: ExpressionId,
        formula: String,
        parameters: Vec<ParameterBinding>,
        channels: Vec<Role>,
    },
    ExpressionRejected { formula: String, reason: String },
    ExpressionRemoved(ExpressionId),
    ParameterChanged {
        id: ExpressionId,
        name: char,
        value: f64,
    },
    /// Statistics update
    Stats(AcquisitionStats),
    Error(String),
    /// Backend is shutting down
    Shutdown,
}

/// Result of [`FrontendReceiver::stop_and_wait`]
#[derive(Debug)]
pub struct StopOutcome {
    /// Summary of the stopped session, `None` if nothing was streaming
    pub summary: Option<SessionSummary>,
    /// Messages received while waiting, in arrival order, excluding the
    /// unit-stopped notification itself
    pub drained: Vec<BackendMessage>,
}

/// Control-side handle for the backend
pub struct FrontendReceiver {
    /// Receiver for backend messages
    pub receiver: Receiver<BackendMessage>,
    /// Sender for commands to the backend
    pub command_sender: Sender<BackendCommand>,
    handshake: Arc<StreamHandshake>,
}

impl FrontendReceiver {
    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<BackendMessage> {
        self.receiver.try_recv().ok()
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<BackendMessage> {
        self.receiver.try_iter().collect()
    }

    /// Send a command to the backend
    pub fn send_command(&self, cmd: BackendCommand) -> bool {
        self.command_sender.send(cmd).is_ok()
    }

    pub fn start_capture(&self) {
        let _ = self.command_sender.send(BackendCommand::StartCapture);
    }

    pub fn stop_capture(&self) {
        let _ = self.command_sender.send(BackendCommand::StopCapture);
    }

    pub fn edit_channel(&self, address: ChannelAddress, edit: ChannelEdit) {
        let _ = self
            .command_sender
            .send(BackendCommand::EditChannel { address, edit });
    }

    pub fn add_expression(&self, formula: impl Into<String>) {
        let _ = self
            .command_sender
            .send(BackendCommand::AddExpression(formula.into()));
    }

    pub fn remove_expression(&self, id: ExpressionId) {
        let _ = self
            .command_sender
            .send(BackendCommand::RemoveExpression(id));
    }

    pub fn set_parameter(&self, id: ExpressionId, name: char, slider: i32) {
        let _ = self
            .command_sender
            .send(BackendCommand::SetParameter { id, name, slider });
    }

    pub fn request_channel_model(&self) {
        let _ = self.command_sender.send(BackendCommand::RequestChannelModel);
    }

    pub fn request_stats(&self) {
        let _ = self.command_sender.send(BackendCommand::RequestStats);
    }

    pub fn set_export(&self, enabled: bool) {
        let _ = self.command_sender.send(BackendCommand::SetExport(enabled));
    }

    /// Clear the running flag directly
    ///
    /// The loop notices after its current poll. A stop command is queued as
    /// well so a start still waiting in the command queue is also undone.
    /// Returns whether a session was running.
    pub fn request_stop(&self) -> bool {
        let was_running = self.handshake.request_stop();
        let _ = self.command_sender.send(BackendCommand::StopCapture);
        was_running
    }

    /// Stop the session and block until the units have stopped
    ///
    /// Messages that arrive meanwhile (including the last tick batches) are
    /// returned in order. Returns immediately with no summary if nothing was
    /// streaming.
    pub fn stop_and_wait(&self, timeout: Duration) -> Result<StopOutcome> {
        let deadline = Instant::now() + timeout;
        let mut drained = Vec::new();
        if !self.request_stop() {
            drained.extend(self.drain());
            return Ok(StopOutcome {
                summary: None,
                drained,
            });
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(BackendMessage::UnitStopped(summary)) => {
                    return Ok(StopOutcome {
                        summary: Some(summary),
                        drained,
                    })
                }
                Ok(msg) => drained.push(msg),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ScopeError::Timeout(format!(
                        "unit did not stop within {:?}",
                        timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScopeError::Channel("backend disconnected".to_string()))
                }
            }
        }
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        let _ = self.command_sender.send(BackendCommand::Shutdown);
    }
}

/// The acquisition backend that runs in a separate thread
pub struct AcquisitionBackend {
    worker: AcquisitionWorker,
    ledger: BufferLedger,
}

impl AcquisitionBackend {
    /// Create a backend with heap-allocated session buffers
    pub fn new(config: AppConfig, driver: Box<dyn StreamingDriver>) -> (Self, FrontendReceiver) {
        Self::with_allocator(config, driver, Box::new(HeapAllocator))
    }

    /// Create a backend whose session buffers come from `allocator`
    pub fn with_allocator(
        config: AppConfig,
        driver: Box<dyn StreamingDriver>,
        allocator: Box<dyn BufferAllocator>,
    ) -> (Self, FrontendReceiver) {
        let (cmd_tx, cmd_rx) = bounded(256);
        // Tick batches use a blocking send, so this bounds how far the
        // backend can run ahead of the consumer
        let (msg_tx, msg_rx) = bounded(config.acquisition.message_buffer_size.max(1));
        let handshake = Arc::new(StreamHandshake::new());
        let ledger = BufferLedger::new();
        let buffers = StreamBufferManager::new(
            config.acquisition.sample_quota as usize,
            allocator,
            ledger.clone(),
        );

        let worker = AcquisitionWorker::new(
            config,
            cmd_rx,
            msg_tx,
            Arc::clone(&handshake),
            driver,
            buffers,
        );
        let frontend = FrontendReceiver {
            receiver: msg_rx,
            command_sender: cmd_tx,
            handshake,
        };

        (Self { worker, ledger }, frontend)
    }

    /// Allocation/release counters shared with the buffer manager
    pub fn ledger(&self) -> BufferLedger {
        self.ledger.clone()
    }

    /// Run the backend loop until shutdown
    pub fn run(mut self) {
        self.worker.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> (AcquisitionBackend, FrontendReceiver) {
        let driver = SimulatedDriver::new().with_unit("A", 2);
        AcquisitionBackend::new(AppConfig::default(), Box::new(driver))
    }

    #[test]
    fn test_backend_creation() {
        let (backend, frontend) = test_backend();
        assert_eq!(backend.ledger().allocations(), 0);
        assert!(frontend.send_command(BackendCommand::Shutdown));
    }

    #[test]
    fn test_frontend_helpers_queue_commands() {
        let (_backend, frontend) = test_backend();
        frontend.start_capture();
        frontend.edit_channel(ChannelAddress::new(0, 1), ChannelEdit::Enable(false));
        frontend.add_expression("a*x0");
        frontend.set_parameter(ExpressionId(0), 'a', 3);
        frontend.shutdown();

        assert_eq!(frontend.command_sender.len(), 5);
    }

    #[test]
    fn test_stop_without_session_returns_immediately() {
        let (_backend, frontend) = test_backend();
        let outcome = frontend.stop_and_wait(Duration::from_millis(10)).unwrap();
        assert!(outcome.summary.is_none());
    }
}
