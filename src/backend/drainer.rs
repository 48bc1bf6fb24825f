//! Driver callback for streaming polls
//!
//! [`SampleDrainer::on_ready`] runs inside
//! [`StreamingDriver::get_streaming_latest_values`](super::StreamingDriver::get_streaming_latest_values),
//! on the acquisition thread. It copies the reported window from every
//! driver-facing buffer of one unit into the matching app-facing buffer and
//! publishes the window through the [`StreamHandshake`]. It neither logs nor
//! allocates.

use super::buffers::DeviceBuffers;
use super::driver_trait::StreamingReady;
use super::handshake::{SampleWindow, StreamHandshake};
use std::sync::PoisonError;

/// Callback state for one poll of one unit
pub struct SampleDrainer<'a> {
    buffers: &'a mut DeviceBuffers,
    handshake: &'a StreamHandshake,
    overflowed: bool,
}

impl<'a> SampleDrainer<'a> {
    pub fn new(buffers: &'a mut DeviceBuffers, handshake: &'a StreamHandshake) -> Self {
        Self {
            buffers,
            handshake,
            overflowed: false,
        }
    }

    /// Whether any callback of this poll reported an input overflow
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn on_ready(&mut self, ready: StreamingReady) {
        let start = ready.start_index as usize;
        let requested = usize::try_from(ready.sample_count).unwrap_or(0);
        // the window never extends past the session buffers
        let count = requested.min(self.buffers.capacity.saturating_sub(start));

        if count > 0 {
            let end = start + count;
            for channel in self.buffers.channels.iter_mut() {
                let source = channel.driver.lock().unwrap_or_else(PoisonError::into_inner);
                if let (Some(src), Some(dst)) =
                    (source.get(start..end), channel.app.get_mut(start..end))
                {
                    dst.copy_from_slice(src);
                }
            }
        }

        self.handshake.record_window(SampleWindow {
            start_index: ready.start_index,
            sample_count: count as u32,
        });
        if count > 0 {
            self.handshake.mark_ready();
        }
        self.overflowed |= ready.overflow != 0;
    }
}
