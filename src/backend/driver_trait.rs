//! StreamingDriver trait for the digitizer driver interface
//!
//! This module defines the seam between the acquisition pipeline and a
//! streaming digitizer driver. The simulated driver in
//! [`super::sim_driver`] implements it for tests and headless runs; a vendor
//! binding would implement it for real hardware.
//!
//! Every method mirrors one driver entry point. Failures are reported as
//! [`ScopeError::Driver`] carrying the call name and status code; callers in
//! the pipeline log them and continue.

use crate::error::{Result, ScopeError};
use crate::types::{Coupling, DeviceHandle, DeviceInfo, VoltageRange};
use std::sync::{Arc, Mutex};

/// Driver-facing sample buffer shared between the pipeline and the driver
///
/// The driver writes new samples into it between callbacks; the drainer
/// copies the reported range out while the driver is inside
/// [`StreamingDriver::get_streaming_latest_values`].
pub type SharedSampleBuffer = Arc<Mutex<Vec<i16>>>;

/// Arguments the driver passes to the streaming-ready callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingReady {
    pub handle: DeviceHandle,
    /// Number of new samples; zero for an idle poll
    pub sample_count: i32,
    /// Index in the buffers of the first new sample
    pub start_index: u32,
    /// Bit mask of channels whose input overflowed
    pub overflow: i16,
    pub trigger_at: u32,
    pub triggered: bool,
    pub auto_stop: bool,
}

/// Streaming parameters used when arming a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingRequest {
    /// Sample interval in microseconds
    pub sample_interval_us: u32,
    /// Samples per buffer, also the ring size of the driver's write position
    pub buffer_quota: u32,
}

/// Unified interface for streaming digitizer drivers
///
/// Implementations must be `Send` so the driver can move onto the
/// acquisition thread.
pub trait StreamingDriver: Send {
    /// Serial numbers of every attached unit
    fn enumerate_units(&mut self) -> Result<Vec<String>>;

    /// Open the unit with the given serial and return its handle
    fn open_unit(&mut self, serial: &str) -> Result<DeviceHandle>;

    fn close_unit(&mut self, handle: DeviceHandle) -> Result<()>;

    /// Number of analog inputs on the unit
    fn channel_count(&mut self, handle: DeviceHandle) -> Result<usize>;

    /// Raw code corresponding to +full-scale
    fn maximum_value(&mut self, handle: DeviceHandle) -> Result<i16>;

    /// Raw code corresponding to -full-scale
    fn minimum_value(&mut self, handle: DeviceHandle) -> Result<i16>;

    /// Push a channel's enable, coupling, range and offset to the hardware
    fn set_channel(
        &mut self,
        handle: DeviceHandle,
        channel: usize,
        enabled: bool,
        coupling: Coupling,
        range: VoltageRange,
        offset: f32,
    ) -> Result<()>;

    /// Allowed analog offset `(min, max)` in volts for a range and coupling
    fn analogue_offset_bounds(
        &mut self,
        handle: DeviceHandle,
        range: VoltageRange,
        coupling: Coupling,
    ) -> Result<(f32, f32)>;

    /// Register a driver-facing buffer for a channel, or unregister with `None`
    fn set_data_buffer(
        &mut self,
        handle: DeviceHandle,
        channel: usize,
        buffer: Option<SharedSampleBuffer>,
    ) -> Result<()>;

    /// Arm streaming on a unit
    fn run_streaming(&mut self, handle: DeviceHandle, request: StreamingRequest) -> Result<()>;

    /// Poll for new samples
    ///
    /// The driver invokes `on_ready` synchronously, at most once, before
    /// returning.
    fn get_streaming_latest_values(
        &mut self,
        handle: DeviceHandle,
        on_ready: &mut dyn FnMut(StreamingReady),
    ) -> Result<()>;

    /// Stop streaming on a unit
    fn stop(&mut self, handle: DeviceHandle) -> Result<()>;
}

/// Result of opening a list of units
#[derive(Debug, Default)]
pub struct OpenedUnits {
    pub devices: Vec<DeviceInfo>,
    /// Serials that could not be opened, with the reason
    pub failed: Vec<(String, String)>,
}

/// Open every unit in `serials` (all attached units when empty)
///
/// A unit that fails to open, or whose limits cannot be queried, is logged
/// and left out; the remaining units are returned.
pub fn open_units(driver: &mut dyn StreamingDriver, serials: &[String]) -> Result<OpenedUnits> {
    let serials = if serials.is_empty() {
        driver.enumerate_units()?
    } else {
        serials.to_vec()
    };

    let mut opened = OpenedUnits::default();
    for serial in serials {
        match open_one(driver, &serial) {
            Ok(info) => {
                tracing::info!(
                    "Opened unit {} (handle {}, {} channels, max code {})",
                    info.serial,
                    info.handle,
                    info.channel_count,
                    info.max_code
                );
                opened.devices.push(info);
            }
            Err(e) => {
                tracing::warn!("Skipping unit {}: {}", serial, e);
                opened.failed.push((serial, e.to_string()));
            }
        }
    }
    Ok(opened)
}

fn open_one(driver: &mut dyn StreamingDriver, serial: &str) -> Result<DeviceInfo> {
    let handle = driver.open_unit(serial).map_err(|e| ScopeError::DeviceOpen {
        serial: serial.to_string(),
        reason: e.to_string(),
    })?;

    let limits = (|| -> Result<(usize, i16, i16)> {
        Ok((
            driver.channel_count(handle)?,
            driver.maximum_value(handle)?,
            driver.minimum_value(handle)?,
        ))
    })();

    match limits {
        Ok((channel_count, max_code, min_code)) if max_code > 0 => Ok(DeviceInfo {
            serial: serial.to_string(),
            handle,
            channel_count,
            max_code,
            min_code,
            min_range: VoltageRange::Mv10,
            max_range: VoltageRange::V50,
        }),
        Ok((_, max_code, _)) => {
            let _ = driver.close_unit(handle);
            Err(ScopeError::DeviceOpen {
                serial: serial.to_string(),
                reason: format!("invalid maximum code {}", max_code),
            })
        }
        Err(e) => {
            let _ = driver.close_unit(handle);
            Err(ScopeError::DeviceOpen {
                serial: serial.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Split a comma-separated serial list, ignoring blanks
pub fn parse_serial_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial_list() {
        assert_eq!(
            parse_serial_list("AB123/0001, CD456/0002 ,,"),
            vec!["AB123/0001".to_string(), "CD456/0002".to_string()]
        );
        assert!(parse_serial_list("  ").is_empty());
        assert_eq!(parse_serial_list("A B"), vec!["AB".to_string()]);
    }
}
