//! Session-scoped handshake between the acquisition loop and the driver callback
//!
//! Exactly three scalars cross between the poll loop, the drainer and the
//! control side: the running flag, the ready flag and the reported sample
//! window. Each is a single atomic; the window packs start index and count
//! into one `u64` so a reader never observes a torn pair.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Index range reported by one driver callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleWindow {
    pub start_index: u32,
    pub sample_count: u32,
}

impl SampleWindow {
    fn pack(self) -> u64 {
        (u64::from(self.start_index) << 32) | u64::from(self.sample_count)
    }

    fn unpack(bits: u64) -> Self {
        Self {
            start_index: (bits >> 32) as u32,
            sample_count: bits as u32,
        }
    }

    /// One past the last index in the window
    pub fn end_index(&self) -> usize {
        self.start_index as usize + self.sample_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// Poll-based handshake flags for one capture session
#[derive(Debug, Default)]
pub struct StreamHandshake {
    running: AtomicBool,
    ready: AtomicBool,
    window: AtomicU64,
}

impl StreamHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a session as running and forget any previous window
    pub fn arm(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.window.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    /// Clear the running flag; returns whether it was set
    pub fn request_stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Called by the loop before every driver poll
    pub fn clear_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }

    /// Called by the drainer on every callback, empty or not
    pub fn record_window(&self, window: SampleWindow) {
        self.window.store(window.pack(), Ordering::Release);
    }

    /// Called by the drainer once samples have been copied
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Last recorded window, whether or not data was marked ready
    pub fn window(&self) -> SampleWindow {
        SampleWindow::unpack(self.window.load(Ordering::Acquire))
    }

    /// The window of the last poll if the drainer marked data ready
    pub fn take_window(&self) -> Option<SampleWindow> {
        if self.ready.swap(false, Ordering::AcqRel) {
            Some(self.window())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_packing() {
        let window = SampleWindow {
            start_index: 9_900,
            sample_count: 100,
        };
        assert_eq!(SampleWindow::unpack(window.pack()), window);
        assert_eq!(window.end_index(), 10_000);

        let wide = SampleWindow {
            start_index: u32::MAX,
            sample_count: u32::MAX,
        };
        assert_eq!(SampleWindow::unpack(wide.pack()), wide);
    }

    #[test]
    fn test_take_window_requires_ready() {
        let hs = StreamHandshake::new();
        hs.record_window(SampleWindow {
            start_index: 5,
            sample_count: 0,
        });
        assert_eq!(hs.take_window(), None);
        assert_eq!(hs.window().start_index, 5);

        hs.record_window(SampleWindow {
            start_index: 5,
            sample_count: 10,
        });
        hs.mark_ready();
        assert_eq!(
            hs.take_window(),
            Some(SampleWindow {
                start_index: 5,
                sample_count: 10
            })
        );
        // consumed
        assert_eq!(hs.take_window(), None);
    }

    #[test]
    fn test_running_flag() {
        let hs = StreamHandshake::new();
        assert!(!hs.is_running());
        assert!(!hs.request_stop());

        hs.arm();
        assert!(hs.is_running());
        assert!(hs.request_stop());
        assert!(!hs.is_running());
        assert!(!hs.request_stop());
    }

    #[test]
    fn test_arm_resets_window() {
        let hs = StreamHandshake::new();
        hs.record_window(SampleWindow {
            start_index: 3,
            sample_count: 4,
        });
        hs.mark_ready();
        hs.arm();
        assert!(!hs.is_ready());
        assert_eq!(hs.window(), SampleWindow::default());
    }
}
