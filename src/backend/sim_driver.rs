//! Simulated streaming digitizer
//!
//! This module provides a [`StreamingDriver`] implementation that generates
//! deterministic waveforms instead of talking to hardware. It is used by the
//! headless runner and by the test suite.
//!
//! # Behaviour
//!
//! - Every unit owns a ring write position that wraps at the buffer quota. A
//!   poll delivers one contiguous block, never crossing the end of the ring.
//! - Block sizes come from a per-unit script first, then from the default
//!   block size. A block of zero is an idle poll: the callback still fires
//!   with a count of zero.
//! - Samples are written into the registered driver-facing buffers before the
//!   callback is invoked, the way a real driver fills them behind the
//!   application's back.
//!
//! # Example
//!
//! ```ignore
//! let driver = SimulatedDriver::new()
//!     .with_unit("SIM-A", 4)
//!     .with_pattern("SIM-A", 0, SignalPattern::Counter)
//!     .with_scripted_counts("SIM-A", [100, 150])
//!     .with_block_size(0);
//! let counters = driver.counters();
//! ```

use super::driver_trait::{SharedSampleBuffer, StreamingDriver, StreamingReady, StreamingRequest};
use crate::config::SimulationConfig;
use crate::error::{Result, ScopeError};
use crate::types::{Coupling, DeviceHandle, VoltageRange};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATUS_NOT_FOUND: u32 = 0x03;
const STATUS_INVALID_HANDLE: u32 = 0x0C;
const STATUS_INVALID_CHANNEL: u32 = 0x0E;
const STATUS_NOT_STREAMING: u32 = 0x47;

/// Full-scale raw code of every simulated unit
pub const SIM_MAX_CODE: i16 = 32767;

/// Waveform generated on a simulated channel, in raw codes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// Constant raw code
    Constant(i16),
    /// Sine wave; `period` in samples
    Sine { period: u32, amplitude: i16 },
    /// Square wave; `period` in samples
    Square { period: u32, amplitude: i16 },
    /// Sawtooth from `-amplitude` to `amplitude`
    Ramp { period: u32, amplitude: i16 },
    /// Triangle wave between `-amplitude` and `amplitude`
    Triangle { period: u32, amplitude: i16 },
    /// Absolute stream position modulo 32768
    Counter,
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Sine {
            period: 1000,
            amplitude: SIM_MAX_CODE / 2,
        }
    }
}

impl SignalPattern {
    /// Raw code at absolute stream position `position`
    pub fn sample(&self, position: u64) -> i16 {
        match *self {
            SignalPattern::Constant(code) => code,
            SignalPattern::Sine { period, amplitude } => {
                let phase = phase(position, period);
                (f64::from(amplitude) * (2.0 * std::f64::consts::PI * phase).sin()).round() as i16
            }
            SignalPattern::Square { period, amplitude } => {
                if phase(position, period) < 0.5 {
                    amplitude
                } else {
                    amplitude.saturating_neg()
                }
            }
            SignalPattern::Ramp { period, amplitude } => {
                let amp = f64::from(amplitude);
                (-amp + 2.0 * amp * phase(position, period)).round() as i16
            }
            SignalPattern::Triangle { period, amplitude } => {
                let amp = f64::from(amplitude);
                let p = phase(position, period);
                let v = if p < 0.5 {
                    -amp + 4.0 * amp * p
                } else {
                    3.0 * amp - 4.0 * amp * p
                };
                v.round() as i16
            }
            SignalPattern::Counter => (position % 32768) as i16,
        }
    }
}

fn phase(position: u64, period: u32) -> f64 {
    let period = u64::from(period.max(1));
    (position % period) as f64 / period as f64
}

/// Call counters shared with whoever built the driver
#[derive(Debug, Default)]
pub struct SimCounters {
    streams_armed: AtomicU64,
    stops: AtomicU64,
    polls: AtomicU64,
    buffers_registered: AtomicU64,
    buffers_unregistered: AtomicU64,
    channel_updates: AtomicU64,
}

impl SimCounters {
    pub fn streams_armed(&self) -> u64 {
        self.streams_armed.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn buffers_registered(&self) -> u64 {
        self.buffers_registered.load(Ordering::SeqCst)
    }

    pub fn buffers_unregistered(&self) -> u64 {
        self.buffers_unregistered.load(Ordering::SeqCst)
    }

    pub fn channel_updates(&self) -> u64 {
        self.channel_updates.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct SimUnit {
    serial: String,
    handle: Option<DeviceHandle>,
    patterns: Vec<SignalPattern>,
    buffers: Vec<Option<SharedSampleBuffer>>,
    script: VecDeque<u32>,
    streaming: bool,
    quota: u32,
    write_pos: u32,
    position: u64,
}

impl SimUnit {
    fn new(serial: &str, channels: usize) -> Self {
        Self {
            serial: serial.to_string(),
            handle: None,
            patterns: vec![SignalPattern::default(); channels],
            buffers: vec![None; channels],
            script: VecDeque::new(),
            streaming: false,
            quota: 0,
            write_pos: 0,
            position: 0,
        }
    }

    fn channel_count(&self) -> usize {
        self.patterns.len()
    }

    /// Generate the next block into the registered buffers
    fn produce(&mut self, default_block: u32) -> StreamingReady {
        let requested = self.script.pop_front().unwrap_or(default_block);
        let room = self.quota.saturating_sub(self.write_pos);
        let count = requested.min(room);
        let start = self.write_pos;

        for (pattern, buffer) in self.patterns.iter().zip(self.buffers.iter()) {
            let Some(buffer) = buffer else { continue };
            let mut data = buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for i in 0..count {
                if let Some(slot) = data.get_mut((start + i) as usize) {
                    *slot = pattern.sample(self.position + u64::from(i));
                }
            }
        }

        self.position += u64::from(count);
        self.write_pos = if self.quota == 0 {
            0
        } else {
            (start + count) % self.quota
        };

        StreamingReady {
            handle: self.handle.unwrap_or_default(),
            sample_count: count as i32,
            start_index: start,
            overflow: 0,
            trigger_at: 0,
            triggered: false,
            auto_stop: false,
        }
    }
}

/// Deterministic in-process digitizer
#[derive(Debug)]
pub struct SimulatedDriver {
    units: Vec<SimUnit>,
    next_handle: DeviceHandle,
    default_block: u32,
    poll_delay: Duration,
    fail_open: HashSet<String>,
    counters: Arc<SimCounters>,
}

impl SimulatedDriver {
    /// Driver with no units, 250-sample blocks and no poll delay
    pub fn new() -> Self {
        Self {
            units: Vec::new(),
            next_handle: 1,
            default_block: 250,
            poll_delay: Duration::ZERO,
            fail_open: HashSet::new(),
            counters: Arc::new(SimCounters::default()),
        }
    }

    /// Build a driver from the simulation settings
    ///
    /// Channels cycle through sine, triangle, square and ramp patterns with
    /// different periods so every role shows a distinct waveform.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut driver = Self::new()
            .with_block_size(config.block_size)
            .with_poll_delay(Duration::from_micros(config.poll_delay_us));
        for serial in &config.units {
            driver = driver.with_unit(serial, config.channels_per_unit);
            for channel in 0..config.channels_per_unit {
                let period = 400 + 150 * channel as u32;
                let amplitude = SIM_MAX_CODE / 2;
                let pattern = match channel % 4 {
                    0 => SignalPattern::Sine { period, amplitude },
                    1 => SignalPattern::Triangle { period, amplitude },
                    2 => SignalPattern::Square { period, amplitude },
                    _ => SignalPattern::Ramp { period, amplitude },
                };
                driver = driver.with_pattern(serial, channel, pattern);
            }
        }
        driver
    }

    /// Attach a unit with `channels` analog inputs
    pub fn with_unit(mut self, serial: &str, channels: usize) -> Self {
        self.units.push(SimUnit::new(serial, channels));
        self
    }

    /// Set the waveform of one channel
    pub fn with_pattern(mut self, serial: &str, channel: usize, pattern: SignalPattern) -> Self {
        if let Some(slot) = self
            .unit_by_serial(serial)
            .and_then(|u| u.patterns.get_mut(channel))
        {
            *slot = pattern;
        }
        self
    }

    /// Block sizes returned by the next polls of a unit, before the default applies
    pub fn with_scripted_counts(
        mut self,
        serial: &str,
        counts: impl IntoIterator<Item = u32>,
    ) -> Self {
        if let Some(unit) = self.unit_by_serial(serial) {
            unit.script.extend(counts);
        }
        self
    }

    /// Samples delivered per poll once the script is exhausted
    pub fn with_block_size(mut self, samples: u32) -> Self {
        self.default_block = samples;
        self
    }

    /// Time spent inside every poll call
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Make opening this unit fail
    pub fn fail_open(mut self, serial: &str) -> Self {
        self.fail_open.insert(serial.to_string());
        self
    }

    /// Shared call counters
    pub fn counters(&self) -> Arc<SimCounters> {
        Arc::clone(&self.counters)
    }

    fn unit_by_serial(&mut self, serial: &str) -> Option<&mut SimUnit> {
        self.units.iter_mut().find(|u| u.serial == serial)
    }

    fn unit(&mut self, handle: DeviceHandle, call: &'static str) -> Result<&mut SimUnit> {
        self.units
            .iter_mut()
            .find(|u| u.handle == Some(handle))
            .ok_or(ScopeError::driver(call, STATUS_INVALID_HANDLE))
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingDriver for SimulatedDriver {
    fn enumerate_units(&mut self) -> Result<Vec<String>> {
        Ok(self.units.iter().map(|u| u.serial.clone()).collect())
    }

    fn open_unit(&mut self, serial: &str) -> Result<DeviceHandle> {
        if self.fail_open.contains(serial) {
            return Err(ScopeError::driver("open_unit", STATUS_NOT_FOUND));
        }
        let handle = self.next_handle;
        let unit = self
            .unit_by_serial(serial)
            .ok_or(ScopeError::driver("open_unit", STATUS_NOT_FOUND))?;
        unit.handle = Some(handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn close_unit(&mut self, handle: DeviceHandle) -> Result<()> {
        let unit = self.unit(handle, "close_unit")?;
        unit.handle = None;
        unit.streaming = false;
        unit.buffers.iter_mut().for_each(|b| *b = None);
        Ok(())
    }

    fn channel_count(&mut self, handle: DeviceHandle) -> Result<usize> {
        Ok(self.unit(handle, "channel_count")?.channel_count())
    }

    fn maximum_value(&mut self, handle: DeviceHandle) -> Result<i16> {
        self.unit(handle, "maximum_value")?;
        Ok(SIM_MAX_CODE)
    }

    fn minimum_value(&mut self, handle: DeviceHandle) -> Result<i16> {
        self.unit(handle, "minimum_value")?;
        Ok(-SIM_MAX_CODE)
    }

    fn set_channel(
        &mut self,
        handle: DeviceHandle,
        channel: usize,
        _enabled: bool,
        _coupling: Coupling,
        _range: VoltageRange,
        _offset: f32,
    ) -> Result<()> {
        let unit = self.unit(handle, "set_channel")?;
        if channel >= unit.channel_count() {
            return Err(ScopeError::driver("set_channel", STATUS_INVALID_CHANNEL));
        }
        self.counters.channel_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn analogue_offset_bounds(
        &mut self,
        handle: DeviceHandle,
        range: VoltageRange,
        _coupling: Coupling,
    ) -> Result<(f32, f32)> {
        self.unit(handle, "analogue_offset_bounds")?;
        let max = if range <= VoltageRange::Mv500 {
            0.25
        } else if range <= VoltageRange::V5 {
            2.5
        } else {
            20.0
        };
        Ok((-max, max))
    }

    fn set_data_buffer(
        &mut self,
        handle: DeviceHandle,
        channel: usize,
        buffer: Option<SharedSampleBuffer>,
    ) -> Result<()> {
        let counters = Arc::clone(&self.counters);
        let unit = self.unit(handle, "set_data_buffer")?;
        let slot = unit
            .buffers
            .get_mut(channel)
            .ok_or(ScopeError::driver("set_data_buffer", STATUS_INVALID_CHANNEL))?;
        match buffer {
            Some(_) => counters.buffers_registered.fetch_add(1, Ordering::SeqCst),
            None => counters.buffers_unregistered.fetch_add(1, Ordering::SeqCst),
        };
        *slot = buffer;
        Ok(())
    }

    fn run_streaming(&mut self, handle: DeviceHandle, request: StreamingRequest) -> Result<()> {
        let unit = self.unit(handle, "run_streaming")?;
        unit.streaming = true;
        unit.quota = request.buffer_quota;
        unit.write_pos = 0;
        self.counters.streams_armed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_streaming_latest_values(
        &mut self,
        handle: DeviceHandle,
        on_ready: &mut dyn FnMut(StreamingReady),
    ) -> Result<()> {
        let delay = self.poll_delay;
        let default_block = self.default_block;
        let unit = self.unit(handle, "get_streaming_latest_values")?;
        if !unit.streaming {
            return Err(ScopeError::driver(
                "get_streaming_latest_values",
                STATUS_NOT_STREAMING,
            ));
        }
        let ready = unit.produce(default_block);
        self.counters.polls.fetch_add(1, Ordering::SeqCst);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        on_ready(ready);
        Ok(())
    }

    fn stop(&mut self, handle: DeviceHandle) -> Result<()> {
        let unit = self.unit(handle, "stop")?;
        unit.streaming = false;
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
