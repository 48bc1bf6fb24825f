//! Mock construction helpers

use scopestream::backend::{
    AcquisitionBackend, BufferAllocator, BufferLedger, ChannelAddress, FrontendReceiver,
    HeapAllocator, SimulatedDriver, SIM_MAX_CODE,
};
use scopestream::config::AppConfig;
use scopestream::error::{Result, ScopeError};
use std::thread::JoinHandle;

/// A running backend and its control handle
pub struct TestBackend {
    pub frontend: FrontendReceiver,
    pub ledger: BufferLedger,
    handle: Option<JoinHandle<()>>,
}

impl TestBackend {
    /// Shut the backend down and wait for its thread
    pub fn shutdown(mut self) {
        self.frontend.shutdown();
        // keep draining so blocking sends from the worker cannot stall it
        while self.frontend.receiver.recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            handle.join().expect("acquisition thread panicked");
        }
    }
}

/// Spawn a backend over `driver`
pub fn spawn_backend(config: AppConfig, driver: SimulatedDriver) -> TestBackend {
    spawn_backend_with_allocator(config, driver, Box::new(HeapAllocator))
}

pub fn spawn_backend_with_allocator(
    config: AppConfig,
    driver: SimulatedDriver,
    allocator: Box<dyn BufferAllocator>,
) -> TestBackend {
    let (backend, frontend) = AcquisitionBackend::with_allocator(config, Box::new(driver), allocator);
    let ledger = backend.ledger();
    let handle = std::thread::spawn(move || backend.run());
    TestBackend {
        frontend,
        ledger,
        handle: Some(handle),
    }
}

/// Allocator that fails for the listed channels
pub struct FailingAllocator {
    pub fail: Vec<ChannelAddress>,
}

impl BufferAllocator for FailingAllocator {
    fn allocate(&mut self, address: ChannelAddress, capacity: usize) -> Result<Vec<i16>> {
        if self.fail.contains(&address) {
            return Err(ScopeError::Allocation {
                device: address.device,
                channel: address.channel,
                capacity,
            });
        }
        HeapAllocator.allocate(address, capacity)
    }
}

/// Raw code that scales to `volts` on a range of `full_scale` volts
pub fn code_for(volts: f64, full_scale: f64) -> i16 {
    (volts / full_scale * f64::from(SIM_MAX_CODE)).round() as i16
}
