//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use scopestream::backend::{BackendMessage, FrontendReceiver};
use scopestream::types::{AcquisitionState, SampleTick};
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Receive messages until `done` returns true for one of them
///
/// Returns every message received, the matching one last. Panics on timeout.
pub fn wait_for(
    frontend: &FrontendReceiver,
    mut done: impl FnMut(&BackendMessage) -> bool,
) -> Vec<BackendMessage> {
    let deadline = Instant::now() + test_timeout();
    let mut received = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match frontend.receiver.recv_timeout(remaining) {
            Ok(msg) => {
                let matched = done(&msg);
                received.push(msg);
                if matched {
                    return received;
                }
            }
            Err(e) => panic!(
                "Timed out waiting for backend message ({}), got {} messages",
                e,
                received.len()
            ),
        }
    }
}

/// Wait until the backend reports `state`
pub fn wait_for_state(frontend: &FrontendReceiver, state: AcquisitionState) -> Vec<BackendMessage> {
    wait_for(frontend, |m| matches!(m, BackendMessage::StateChanged(s) if *s == state))
}

/// Keep receiving until at least `count` ticks arrived
pub fn wait_for_ticks(frontend: &FrontendReceiver, count: usize) -> Vec<BackendMessage> {
    let mut seen = 0;
    wait_for(frontend, |m| {
        if let BackendMessage::Ticks(ticks) = m {
            seen += ticks.len();
        }
        seen >= count
    })
}

/// All ticks contained in `messages`, in arrival order
pub fn ticks_in(messages: &[BackendMessage]) -> Vec<SampleTick> {
    messages
        .iter()
        .filter_map(|m| match m {
            BackendMessage::Ticks(ticks) => Some(ticks.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}
