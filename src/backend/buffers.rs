//! Session buffer management
//!
//! Every capture session owns, per enabled channel, one driver-facing buffer
//! (shared with the driver) and one application-facing buffer of the same
//! capacity. [`StreamBufferManager::begin_session`] allocates and registers
//! them; [`StreamBufferManager::end_session`] unregisters them and drops them.
//!
//! Releases are recorded when a [`ChannelBuffers`] is dropped, so the
//! [`BufferLedger`] counters stay paired even if a session is torn down on an
//! error path.

use super::channel_model::{ChannelAddress, ChannelModel};
use super::driver_trait::{SharedSampleBuffer, StreamingDriver};
use crate::error::{Result, ScopeError};
use crate::types::{DeviceHandle, Role, VoltageRange};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Source of raw sample storage
pub trait BufferAllocator: Send {
    /// Allocate a zeroed buffer of `capacity` samples for a channel
    fn allocate(&mut self, address: ChannelAddress, capacity: usize) -> Result<Vec<i16>>;
}

/// Allocator backed by the global heap; reports failure instead of aborting
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&mut self, address: ChannelAddress, capacity: usize) -> Result<Vec<i16>> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| ScopeError::Allocation {
                device: address.device,
                channel: address.channel,
                capacity,
            })?;
        buffer.resize(capacity, 0);
        Ok(buffer)
    }
}

#[derive(Debug, Default)]
struct LedgerCounters {
    allocations: AtomicU64,
    releases: AtomicU64,
}

/// Counts channel buffer pairs allocated and released over the process lifetime
#[derive(Debug, Clone, Default)]
pub struct BufferLedger {
    counters: Arc<LedgerCounters>,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocations(&self) -> u64 {
        self.counters.allocations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.counters.releases.load(Ordering::SeqCst)
    }

    /// Buffer pairs currently alive
    pub fn outstanding(&self) -> u64 {
        self.allocations().saturating_sub(self.releases())
    }

    fn record_allocation(&self) {
        self.counters.allocations.fetch_add(1, Ordering::SeqCst);
    }

    fn record_release(&self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Buffers of one channel for one session
#[derive(Debug)]
pub struct ChannelBuffers {
    pub channel: usize,
    /// Range at session start, used to scale the app buffer
    pub range: VoltageRange,
    /// Role at session start
    pub role: Role,
    /// Written by the driver
    pub driver: SharedSampleBuffer,
    /// Copied from `driver` by the drainer, read by tick assembly
    pub app: Vec<i16>,
    ledger: BufferLedger,
}

impl Drop for ChannelBuffers {
    fn drop(&mut self) {
        self.ledger.record_release();
    }
}

/// Buffers of one unit for one session
#[derive(Debug)]
pub struct DeviceBuffers {
    /// Index of the unit in the channel model
    pub device: usize,
    pub handle: DeviceHandle,
    pub max_code: i16,
    pub capacity: usize,
    /// Whether the unit was armed successfully
    pub streaming: bool,
    pub channels: Vec<ChannelBuffers>,
}

/// All buffers of one capture session
///
/// Only units with at least one buffered channel appear here.
#[derive(Debug, Default)]
pub struct SessionBuffers {
    pub devices: Vec<DeviceBuffers>,
}

impl SessionBuffers {
    pub fn channel_count(&self) -> usize {
        self.devices.iter().map(|d| d.channels.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Allocates, registers and releases session buffers
pub struct StreamBufferManager {
    capacity: usize,
    allocator: Box<dyn BufferAllocator>,
    ledger: BufferLedger,
}

impl StreamBufferManager {
    pub fn new(capacity: usize, allocator: Box<dyn BufferAllocator>, ledger: BufferLedger) -> Self {
        Self {
            capacity,
            allocator,
            ledger,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    /// Allocate and register buffers for every enabled channel
    ///
    /// A channel whose allocation fails is skipped and keeps its
    /// buffer-enabled flag cleared. A failed registration is logged; the
    /// channel keeps its buffers.
    pub fn begin_session(
        &mut self,
        driver: &mut dyn StreamingDriver,
        model: &mut ChannelModel,
    ) -> SessionBuffers {
        let mut session = SessionBuffers::default();
        let mut granted = Vec::new();

        for (index, unit) in model.devices().iter().enumerate() {
            let mut device = DeviceBuffers {
                device: index,
                handle: unit.device.handle,
                max_code: unit.device.max_code,
                capacity: self.capacity,
                streaming: false,
                channels: Vec::new(),
            };

            for (channel, settings) in unit.channels.iter().enumerate() {
                if !settings.enabled {
                    continue;
                }
                let address = ChannelAddress::new(index, channel);
                let pair = self
                    .allocator
                    .allocate(address, self.capacity)
                    .and_then(|d| Ok((d, self.allocator.allocate(address, self.capacity)?)));
                let (driver_side, app_side) = match pair {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", address, e);
                        continue;
                    }
                };

                self.ledger.record_allocation();
                let buffers = ChannelBuffers {
                    channel,
                    range: settings.range,
                    role: settings.role,
                    driver: Arc::new(Mutex::new(driver_side)),
                    app: app_side,
                    ledger: self.ledger.clone(),
                };

                if let Err(e) =
                    driver.set_data_buffer(unit.device.handle, channel, Some(Arc::clone(&buffers.driver)))
                {
                    tracing::warn!("Registering buffer for {} failed: {}", address, e);
                }
                granted.push(address);
                device.channels.push(buffers);
            }

            if !device.channels.is_empty() {
                session.devices.push(device);
            }
        }

        for address in granted {
            model.set_buffer_enabled(address, true);
        }

        tracing::debug!(
            "Allocated {} channel buffer pairs of {} samples across {} units",
            session.channel_count(),
            self.capacity,
            session.devices.len()
        );
        session
    }

    /// Unregister and release every buffer of a session
    ///
    /// Returns the number of channel buffer pairs released.
    pub fn end_session(
        &mut self,
        driver: &mut dyn StreamingDriver,
        model: &mut ChannelModel,
        session: SessionBuffers,
    ) -> usize {
        let mut released = 0;
        for device in session.devices {
            for buffers in device.channels {
                if let Err(e) = driver.set_data_buffer(device.handle, buffers.channel, None) {
                    tracing::warn!(
                        "Unregistering buffer for unit {} channel {} failed: {}",
                        device.device,
                        buffers.channel,
                        e
                    );
                }
                model.set_buffer_enabled(ChannelAddress::new(device.device, buffers.channel), false);
                drop(buffers);
                released += 1;
            }
        }
        tracing::debug!("Released {} channel buffer pairs", released);
        released
    }
}
