//! Acquisition worker thread
//!
//! This module contains the loop that owns the driver, the channel model, the
//! session buffers and the expression engine. It runs on its own thread and
//! talks to the control thread only through crossbeam channels and the
//! [`StreamHandshake`].
//!
//! # State machine
//!
//! ```text
//! Idle ──start──▶ Streaming ──running=false──▶ Draining ──▶ Stopped ──start──▶ Streaming …
//! ```
//!
//! While `Streaming`, every iteration drains pending commands without
//! blocking, polls each armed unit once and turns the reported sample windows
//! into one batch of [`SampleTick`]s. In every other state the worker blocks
//! on the command channel.
//!
//! # Reconfiguration
//!
//! The channel model is locked for the lifetime of a session. Channel edits
//! received while streaming are queued and applied, and pushed to the
//! driver, once the session's buffers have been released.

use crate::backend::buffers::{SessionBuffers, StreamBufferManager};
use crate::backend::channel_model::{ChannelAddress, ChannelEdit, ChannelModel, ChannelSettings};
use crate::backend::drainer::SampleDrainer;
use crate::backend::driver_trait::{open_units, OpenedUnits, StreamingDriver, StreamingReady, StreamingRequest};
use crate::backend::handshake::{SampleWindow, StreamHandshake};
use crate::backend::scaler::to_voltage;
use crate::backend::{BackendCommand, BackendMessage};
use crate::config::AppConfig;
use crate::error::{Result, ScopeError};
use crate::scripting::ExpressionEngine;
use crate::sinks::TickExporter;
use crate::types::{
    AcquisitionState, AcquisitionStats, ExpressionId, Role, SampleTick, SessionSummary,
};
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long an idle worker waits for a command before re-checking its state
const COMMAND_WAIT: Duration = Duration::from_millis(100);

/// The worker that runs the acquisition loop
pub struct AcquisitionWorker {
    config: AppConfig,
    command_rx: Receiver<BackendCommand>,
    message_tx: Sender<BackendMessage>,
    handshake: Arc<StreamHandshake>,
    driver: Box<dyn StreamingDriver>,
    model: ChannelModel,
    buffers: StreamBufferManager,
    engine: ExpressionEngine,
    state: AcquisitionState,
    /// Buffers of the active session
    session: Option<SessionBuffers>,
    /// Edits received while the model was locked
    pending_edits: Vec<(ChannelAddress, ChannelEdit)>,
    export_enabled: bool,
    exporter: Option<TickExporter>,
    /// Values held across polls; a slot keeps its last value until refreshed
    current: SampleTick,
    next_index: u64,
    /// Windows reported by the current poll, reused between polls
    windows: Vec<(usize, SampleWindow)>,
    stats: AcquisitionStats,
    session_start: Instant,
    session_started_at: DateTime<Local>,
    last_stats_time: Instant,
    shutting_down: bool,
}

impl AcquisitionWorker {
    pub fn new(
        config: AppConfig,
        command_rx: Receiver<BackendCommand>,
        message_tx: Sender<BackendMessage>,
        handshake: Arc<StreamHandshake>,
        driver: Box<dyn StreamingDriver>,
        buffers: StreamBufferManager,
    ) -> Self {
        let engine = ExpressionEngine::from_config(&config.expressions);
        let export_enabled = config.export.enabled;
        Self {
            config,
            command_rx,
            message_tx,
            handshake,
            driver,
            model: ChannelModel::default(),
            buffers,
            engine,
            state: AcquisitionState::Idle,
            session: None,
            pending_edits: Vec::new(),
            export_enabled,
            exporter: None,
            current: SampleTick::new(),
            next_index: 0,
            windows: Vec::new(),
            stats: AcquisitionStats::default(),
            session_start: Instant::now(),
            session_started_at: Local::now(),
            last_stats_time: Instant::now(),
            shutting_down: false,
        }
    }

    /// Open the configured units, then run until shutdown
    pub fn run(&mut self) {
        tracing::info!("Acquisition worker started");
        self.open_devices();
        self.compile_configured_formulas();

        while !self.shutting_down {
            if self.state == AcquisitionState::Streaming {
                self.process_commands();
                if self.state != AcquisitionState::Streaming {
                    continue;
                }
                if self.handshake.is_running() {
                    self.poll();
                    self.maybe_send_stats();
                } else {
                    self.finish_session();
                }
            } else {
                self.wait_for_command();
            }
        }

        self.close_devices();
        let _ = self.message_tx.send(BackendMessage::Shutdown);
        tracing::info!("Acquisition worker stopped");
    }

    // ==================== Startup ====================

    fn open_devices(&mut self) {
        let opened = match open_units(self.driver.as_mut(), &self.config.devices.serials) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!("Unit enumeration failed: {}", e);
                self.send(BackendMessage::Error(format!("Unit enumeration failed: {}", e)));
                OpenedUnits::default()
            }
        };

        for (serial, reason) in opened.failed {
            self.send(BackendMessage::DeviceOpenFailed { serial, reason });
        }

        let devices = self.config.devices.clone();
        let template = ChannelSettings::new(
            devices.default_range,
            devices.default_coupling,
            devices.default_enabled,
        );
        self.model = ChannelModel::new(opened.devices.clone(), &template);

        let addresses: Vec<ChannelAddress> = self.model.iter().map(|(a, _)| a).collect();
        for address in addresses {
            let role = devices.initial_role(address.device, address.channel);
            if role != Role::Off {
                if let Err(e) = self.model.apply(address, ChannelEdit::Role(role)) {
                    tracing::warn!("Initial role for {} not applied: {}", address, e);
                }
            }
            if let Err(e) = self.push_channel(address, true) {
                tracing::warn!("Configuring {} failed: {}", address, e);
            }
        }

        tracing::info!(
            "{} units open with {} channels",
            self.model.devices().len(),
            self.model.iter().count()
        );
        self.send(BackendMessage::DevicesOpened(opened.devices));
    }

    fn compile_configured_formulas(&mut self) {
        for formula in self.config.expressions.formulas.clone() {
            self.add_expression(formula);
        }
    }

    fn close_devices(&mut self) {
        for unit in self.model.devices() {
            if let Err(e) = self.driver.close_unit(unit.device.handle) {
                tracing::warn!("Closing unit {} failed: {}", unit.device.serial, e);
            }
        }
    }

    // ==================== Commands ====================

    /// Block for the next command while no session is active
    fn wait_for_command(&mut self) {
        match self.command_rx.recv_timeout(COMMAND_WAIT) {
            Ok(cmd) => self.handle_command(cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.shutdown(),
        }
    }

    /// Drain pending commands without blocking
    fn process_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.shutdown();
                    break;
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::StartCapture => self.start_session(),
            BackendCommand::StopCapture => {
                if self.state == AcquisitionState::Streaming {
                    self.handshake.request_stop();
                }
            }
            BackendCommand::EditChannel { address, edit } => self.edit_channel(address, edit),
            BackendCommand::AddExpression(formula) => self.add_expression(formula),
            BackendCommand::RemoveExpression(id) => self.remove_expression(id),
            BackendCommand::SetParameter { id, name, slider } => {
                self.set_parameter(id, name, slider)
            }
            BackendCommand::RequestChannelModel => {
                self.send(BackendMessage::ChannelModel(self.model.clone()));
            }
            BackendCommand::RequestStats => self.send_stats(),
            BackendCommand::SetExport(enabled) => self.set_export(enabled),
            BackendCommand::Shutdown => self.shutdown(),
        }
    }

    fn shutdown(&mut self) {
        if self.session.is_some() {
            self.handshake.request_stop();
            self.finish_session();
        }
        self.shutting_down = true;
    }

    fn edit_channel(&mut self, address: ChannelAddress, edit: ChannelEdit) {
        if self.model.is_locked() {
            tracing::debug!("Deferring {:?} on {} until the session stops", edit, address);
            self.pending_edits.push((address, edit));
            self.send(BackendMessage::ChannelEditDeferred { address, edit });
            return;
        }

        match self.apply_edit(address, edit) {
            Ok(settings) => self.send(BackendMessage::ChannelEditApplied { address, settings }),
            Err(e) => {
                tracing::warn!("Edit {:?} on {} rejected: {}", edit, address, e);
                self.send(BackendMessage::ChannelEditRejected {
                    address,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn apply_edit(&mut self, address: ChannelAddress, edit: ChannelEdit) -> Result<ChannelSettings> {
        self.model.apply(address, edit)?;
        self.push_channel(address, edit.affects_offset_bounds())
    }

    /// Send a channel's settings to the driver
    ///
    /// With `requery_bounds` the analog-offset bounds are fetched first and
    /// the offset clamped into them. Driver failures are logged and counted;
    /// the model keeps the new settings.
    fn push_channel(&mut self, address: ChannelAddress, requery_bounds: bool) -> Result<ChannelSettings> {
        let handle = self
            .model
            .device(address.device)
            .map(|d| d.device.handle)
            .ok_or(ScopeError::ChannelNotFound {
                device: address.device,
                channel: address.channel,
            })?;
        let settings = self
            .model
            .channel(address)
            .cloned()
            .ok_or(ScopeError::ChannelNotFound {
                device: address.device,
                channel: address.channel,
            })?;

        if requery_bounds {
            match self
                .driver
                .analogue_offset_bounds(handle, settings.range, settings.coupling)
            {
                Ok((min, max)) => self.model.set_offset_bounds(address, min, max)?,
                Err(e) => {
                    self.stats.driver_failures += 1;
                    tracing::warn!("Offset bounds for {} unavailable: {}", address, e);
                }
            }
        }

        let settings = self.model.channel(address).cloned().unwrap_or(settings);
        if let Err(e) = self.driver.set_channel(
            handle,
            address.channel,
            settings.enabled,
            settings.coupling,
            settings.range,
            settings.offset,
        ) {
            self.stats.driver_failures += 1;
            tracing::warn!("set_channel for {} failed: {}", address, e);
        }
        Ok(settings)
    }

    fn apply_pending_edits(&mut self) {
        for (address, edit) in std::mem::take(&mut self.pending_edits) {
            match self.apply_edit(address, edit) {
                Ok(settings) => {
                    tracing::debug!("Applied deferred {:?} on {}", edit, address);
                    self.send(BackendMessage::ChannelEditApplied { address, settings });
                }
                Err(e) => {
                    tracing::warn!("Deferred {:?} on {} rejected: {}", edit, address, e);
                    self.send(BackendMessage::ChannelEditRejected {
                        address,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn add_expression(&mut self, formula: String) {
        match self.engine.add(&formula) {
            Ok(id) => {
                let Some(expression) = self.engine.get(id) else {
                    return;
                };
                let msg = BackendMessage::ExpressionAdded {
                    id,
                    formula: expression.formula().to_string(),
                    parameters: expression.parameters().to_vec(),
                    channels: expression.channels().to_vec(),
                };
                tracing::info!("Expression {} = {}", id, expression.formula());
                self.send(msg);
            }
            Err(e) => {
                tracing::warn!("{}", e);
                let reason = match e {
                    ScopeError::Expression { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.send(BackendMessage::ExpressionRejected { formula, reason });
            }
        }
    }

    fn remove_expression(&mut self, id: ExpressionId) {
        match self.engine.remove(id) {
            Ok(_) => {
                tracing::info!("Expression {} removed", id);
                self.send(BackendMessage::ExpressionRemoved(id));
            }
            Err(e) => self.send(BackendMessage::Error(e.to_string())),
        }
    }

    fn set_parameter(&mut self, id: ExpressionId, name: char, slider: i32) {
        match self.engine.set_parameter(id, name, slider) {
            Ok(value) => self.send(BackendMessage::ParameterChanged { id, name, value }),
            Err(e) => self.send(BackendMessage::Error(e.to_string())),
        }
    }

    fn set_export(&mut self, enabled: bool) {
        self.export_enabled = enabled;
        if self.state != AcquisitionState::Streaming {
            return;
        }
        if enabled && self.exporter.is_none() {
            self.exporter = self.open_exporter();
        } else if !enabled {
            self.close_exporter();
        }
    }

    // ==================== Session ====================

    fn start_session(&mut self) {
        if self.state == AcquisitionState::Streaming {
            tracing::warn!("Start ignored: a session is already streaming");
            return;
        }

        self.stats = AcquisitionStats::default();
        self.model.lock();
        let mut session = self
            .buffers
            .begin_session(self.driver.as_mut(), &mut self.model);

        let request = StreamingRequest {
            sample_interval_us: self.config.acquisition.sample_interval_us,
            buffer_quota: u32::try_from(self.buffers.capacity()).unwrap_or(u32::MAX),
        };
        for device in session.devices.iter_mut() {
            match self.driver.run_streaming(device.handle, request) {
                Ok(()) => device.streaming = true,
                Err(e) => {
                    self.stats.driver_failures += 1;
                    tracing::warn!("Unit {} did not start streaming: {}", device.device, e);
                }
            }
        }

        for role in self.model.role_conflicts() {
            tracing::warn!("Several enabled channels hold role {}; the last one wins", role);
        }

        self.stats.buffered_channels = session.channel_count();
        self.stats.streaming_devices = session.devices.iter().filter(|d| d.streaming).count();
        tracing::info!(
            "Session armed: {} units streaming, {} channels buffered, {} samples per buffer",
            self.stats.streaming_devices,
            self.stats.buffered_channels,
            self.buffers.capacity()
        );

        self.session = Some(session);
        self.exporter = if self.export_enabled {
            self.open_exporter()
        } else {
            None
        };
        self.current = SampleTick::new();
        self.next_index = 0;
        self.session_start = Instant::now();
        self.session_started_at = Local::now();
        self.last_stats_time = Instant::now();

        self.handshake.arm();
        self.set_state(AcquisitionState::Streaming);
        self.send(BackendMessage::ChannelModel(self.model.clone()));
    }

    /// Poll every armed unit once and emit the resulting ticks
    fn poll(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.handshake.request_stop();
            return;
        };

        self.stats.polls += 1;
        self.windows.clear();
        let handshake: &StreamHandshake = &self.handshake;
        for (index, device) in session.devices.iter_mut().enumerate() {
            if !device.streaming {
                continue;
            }
            let handle = device.handle;
            handshake.clear_ready();
            let mut drainer = SampleDrainer::new(device, handshake);
            let result = self
                .driver
                .get_streaming_latest_values(handle, &mut |ready: StreamingReady| {
                    drainer.on_ready(ready)
                });
            if drainer.overflowed() {
                self.stats.overflows += 1;
            }
            if let Err(e) = result {
                self.stats.driver_failures += 1;
                tracing::debug!("Poll of unit {} failed: {}", index, e);
                continue;
            }
            if let Some(window) = handshake.take_window() {
                self.windows.push((index, window));
            }
        }

        if self.windows.is_empty() {
            self.idle(self.stats.streaming_devices == 0);
            return;
        }

        let batch = self.assemble_ticks();
        self.stats.ticks_emitted += batch.len() as u64;
        tracing::trace!("Emitting {} ticks", batch.len());
        if self.message_tx.send(BackendMessage::Ticks(batch)).is_err() {
            self.shutdown();
        }
    }

    /// Turn this poll's windows into ticks, in index order
    ///
    /// Units are interleaved by position within their windows; a role fed
    /// by several channels takes the value of the last one.
    fn assemble_ticks(&mut self) -> Vec<SampleTick> {
        let longest = self
            .windows
            .iter()
            .map(|(_, w)| w.sample_count as usize)
            .max()
            .unwrap_or(0);
        let mut batch = Vec::with_capacity(longest);
        let Some(session) = self.session.as_ref() else {
            return batch;
        };

        for k in 0..longest {
            for (device_index, window) in &self.windows {
                if k >= window.sample_count as usize {
                    continue;
                }
                let Some(device) = session.devices.get(*device_index) else {
                    continue;
                };
                let position = window.start_index as usize + k;
                for channel in &device.channels {
                    if let Some(&raw) = channel.app.get(position) {
                        self.current
                            .set_role(channel.role, to_voltage(channel.range, device.max_code, raw));
                    }
                }
            }

            self.engine.evaluate_into(&mut self.current);
            self.current.index = self.next_index;
            self.next_index += 1;

            let mut export_failed = false;
            if let Some(exporter) = self.exporter.as_mut() {
                match exporter.write_tick(&self.current) {
                    Ok(()) => self.stats.rows_exported += 1,
                    Err(e) => {
                        tracing::warn!("Export disabled for this session: {}", e);
                        export_failed = true;
                    }
                }
            }
            if export_failed {
                self.exporter = None;
            }

            batch.push(self.current.clone());
        }
        batch
    }

    fn idle(&mut self, nothing_streaming: bool) {
        self.stats.idle_polls += 1;
        if nothing_streaming {
            std::thread::sleep(Duration::from_millis(1));
        } else if self.config.acquisition.idle_backoff_us > 0 {
            std::thread::sleep(Duration::from_micros(self.config.acquisition.idle_backoff_us));
        } else {
            std::thread::yield_now();
        }
    }

    /// Stop the units, report the session and release its buffers
    fn finish_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.handshake.request_stop();
        self.set_state(AcquisitionState::Draining);

        for device in session.devices.iter_mut().filter(|d| d.streaming) {
            if let Err(e) = self.driver.stop(device.handle) {
                self.stats.driver_failures += 1;
                tracing::warn!("Stopping unit {} failed: {}", device.device, e);
            }
            device.streaming = false;
        }
        self.close_exporter();

        let summary = SessionSummary {
            started_at: self.session_started_at,
            duration: self.session_start.elapsed(),
            stats: self.stats.clone(),
        };
        tracing::info!(
            "Unit stopped after {:.2?}: {} ticks from {} polls ({:.1}% with data)",
            summary.duration,
            summary.stats.ticks_emitted,
            summary.stats.polls,
            summary.stats.data_poll_ratio()
        );
        self.send(BackendMessage::UnitStopped(summary));

        self.buffers
            .end_session(self.driver.as_mut(), &mut self.model, session);
        self.model.unlock();
        self.apply_pending_edits();
        self.set_state(AcquisitionState::Stopped);
    }

    fn open_exporter(&mut self) -> Option<TickExporter> {
        match TickExporter::create(&self.config.export.path, self.model.export_columns()) {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                tracing::warn!("Export unavailable: {}", e);
                self.send(BackendMessage::Error(e.to_string()));
                None
            }
        }
    }

    fn close_exporter(&mut self) {
        if let Some(exporter) = self.exporter.take() {
            if let Err(e) = exporter.finish() {
                tracing::warn!("Closing export failed: {}", e);
            }
        }
    }

    // ==================== Messages ====================

    fn set_state(&mut self, state: AcquisitionState) {
        tracing::debug!("Acquisition {} -> {}", self.state, state);
        self.state = state;
        self.send(BackendMessage::StateChanged(state));
    }

    fn maybe_send_stats(&mut self) {
        let interval = Duration::from_millis(self.config.acquisition.stats_interval_ms);
        if self.last_stats_time.elapsed() >= interval {
            self.send_stats();
            self.last_stats_time = Instant::now();
        }
    }

    /// Statistics are best effort and dropped when the queue is full
    fn send_stats(&mut self) {
        let _ = self
            .message_tx
            .try_send(BackendMessage::Stats(self.stats.clone()));
    }

    fn send(&self, msg: BackendMessage) {
        let _ = self.message_tx.send(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffers::{BufferLedger, HeapAllocator};
    use crate::backend::sim_driver::{SignalPattern, SimulatedDriver};
    use crate::types::VoltageRange;
    use crossbeam_channel::bounded;

    fn create_test_worker(
        driver: SimulatedDriver,
        mut config: AppConfig,
    ) -> (AcquisitionWorker, Receiver<BackendMessage>, Sender<BackendCommand>) {
        let (cmd_tx, cmd_rx) = bounded(16);
        let (msg_tx, msg_rx) = bounded(1024);
        config.acquisition.sample_quota = 1000;
        let buffers = StreamBufferManager::new(1000, Box::new(HeapAllocator), BufferLedger::new());
        let worker = AcquisitionWorker::new(
            config,
            cmd_rx,
            msg_tx,
            Arc::new(StreamHandshake::new()),
            Box::new(driver),
            buffers,
        );
        (worker, msg_rx, cmd_tx)
    }

    fn role_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.devices.channel_roles = vec![vec![Role::X, Role::Y, Role::Z0]];
        config
    }

    #[test]
    fn test_open_devices_applies_initial_roles() {
        let driver = SimulatedDriver::new().with_unit("A", 4);
        let (mut worker, msg_rx, _) = create_test_worker(driver, role_config());
        worker.open_devices();

        let roles: Vec<Role> = worker.model.iter().map(|(_, s)| s.role).collect();
        assert_eq!(roles, vec![Role::X, Role::Y, Role::Z0, Role::Off]);
        // 5 V default range reports ±2.5 V of offset
        assert_eq!(worker.model.channel(ChannelAddress::new(0, 0)).unwrap().max_offset, 2.5);
        assert!(msg_rx
            .try_iter()
            .any(|m| matches!(m, BackendMessage::DevicesOpened(ref d) if d.len() == 1)));
    }

    #[test]
    fn test_poll_emits_scaled_ticks_in_order() {
        let driver = SimulatedDriver::new()
            .with_unit("A", 2)
            .with_pattern("A", 0, SignalPattern::Constant(16_384))
            .with_pattern("A", 1, SignalPattern::Counter)
            .with_scripted_counts("A", [3, 2])
            .with_block_size(0);
        let (mut worker, msg_rx, _) = create_test_worker(driver, role_config());
        worker.open_devices();
        worker.start_session();
        worker.poll();
        worker.poll();
        worker.poll();

        let ticks: Vec<SampleTick> = msg_rx
            .try_iter()
            .filter_map(|m| match m {
                BackendMessage::Ticks(t) => Some(t),
                _ => None,
            })
            .flatten()
            .collect();
        let indices: Vec<u64> = ticks.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        let x = ticks[0].role(Role::X).unwrap();
        assert!((x - 16_384.0 / 32_767.0 * 5.0).abs() < 1e-9);
        assert_eq!(ticks[4].role(Role::Y), Some(4.0 / 32_767.0 * 5.0));
        assert_eq!(ticks[0].role(Role::Z0), None);
        assert_eq!(worker.stats.idle_polls, 1);
    }

    #[test]
    fn test_edit_while_streaming_is_deferred() {
        let driver = SimulatedDriver::new().with_unit("A", 2).with_block_size(10);
        let (mut worker, msg_rx, _) = create_test_worker(driver, role_config());
        worker.open_devices();
        worker.start_session();

        let address = ChannelAddress::new(0, 1);
        worker.edit_channel(address, ChannelEdit::Range(VoltageRange::V20));
        assert_eq!(worker.model.channel(address).unwrap().range, VoltageRange::V5);
        assert!(msg_rx
            .try_iter()
            .any(|m| matches!(m, BackendMessage::ChannelEditDeferred { .. })));

        worker.handshake.request_stop();
        worker.finish_session();
        let settings = worker.model.channel(address).unwrap();
        assert_eq!(settings.range, VoltageRange::V20);
        assert_eq!(settings.max_offset, 20.0);
        assert_eq!(worker.state, AcquisitionState::Stopped);
        assert!(worker.pending_edits.is_empty());
    }

    #[test]
    fn test_unknown_channel_edit_is_rejected() {
        let driver = SimulatedDriver::new().with_unit("A", 2);
        let (mut worker, msg_rx, _) = create_test_worker(driver, AppConfig::default());
        worker.open_devices();
        worker.edit_channel(ChannelAddress::new(0, 9), ChannelEdit::Enable(false));

        assert!(msg_rx
            .try_iter()
            .any(|m| matches!(m, BackendMessage::ChannelEditRejected { .. })));
    }

    #[test]
    fn test_rejected_formula_reports_reason() {
        let driver = SimulatedDriver::new().with_unit("A", 1);
        let mut config = AppConfig::default();
        config.expressions.formulas = vec!["a*x0".to_string(), "q+1".to_string()];
        let (mut worker, msg_rx, _) = create_test_worker(driver, config);
        worker.compile_configured_formulas();

        let messages: Vec<BackendMessage> = msg_rx.try_iter().collect();
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::ExpressionAdded { id, .. } if *id == ExpressionId(0))));
        assert!(messages.iter().any(
            |m| matches!(m, BackendMessage::ExpressionRejected { formula, .. } if formula == "q+1")
        ));
        assert_eq!(worker.engine.len(), 1);
    }

    #[test]
    fn test_shutdown_command_stops_session() {
        let driver = SimulatedDriver::new().with_unit("A", 1).with_block_size(5);
        let (mut worker, _, cmd_tx) = create_test_worker(driver, AppConfig::default());
        worker.open_devices();
        worker.start_session();

        cmd_tx.send(BackendCommand::Shutdown).unwrap();
        worker.process_commands();

        assert!(worker.shutting_down);
        assert!(worker.session.is_none());
        assert!(!worker.model.is_locked());
        assert_eq!(worker.buffers.ledger().outstanding(), 0);
    }
}
