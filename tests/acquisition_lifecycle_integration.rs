//! Integration tests for the acquisition lifecycle
//!
//! These tests run the backend thread against the simulated driver:
//! - Tick ordering within a session
//! - Cooperative stop and the unit-stopped notification
//! - Buffer allocation/release pairing across sessions
//! - Degraded operation when a unit or a buffer is unavailable
//! - Channel edits while streaming

mod common;

use common::builders::ConfigBuilder;
use common::mock_helpers::{spawn_backend, spawn_backend_with_allocator, FailingAllocator};
use common::{test_timeout, ticks_in, wait_for, wait_for_state, wait_for_ticks};
use scopestream::backend::{
    BackendMessage, ChannelAddress, ChannelEdit, SignalPattern, SimulatedDriver,
};
use scopestream::types::{AcquisitionState, Role};
use serial_test::serial;
use std::collections::BTreeSet;
use std::time::Duration;

#[test]
#[serial]
fn test_ticks_follow_reported_windows_in_order() {
    let driver = SimulatedDriver::new()
        .with_unit("A", 2)
        .with_pattern("A", 0, SignalPattern::Counter)
        .with_scripted_counts("A", [100, 150])
        .with_block_size(0);
    let config = ConfigBuilder::new().roles(0, &[Role::X, Role::Y]).build();
    let backend = spawn_backend(config, driver);

    backend.frontend.start_capture();
    let messages = wait_for_ticks(&backend.frontend, 250);
    let ticks = ticks_in(&messages);

    let indices: Vec<u64> = ticks.iter().map(|t| t.index).collect();
    assert_eq!(indices, (0..250).collect::<Vec<u64>>());
    // the counter pattern makes every tick's X code equal its index
    for tick in &ticks {
        let expected = tick.index as f64 / 32_767.0 * 5.0;
        common::assert_float_eq(tick.role(Role::X).unwrap(), expected, 1e-12);
    }

    let outcome = backend.frontend.stop_and_wait(test_timeout()).unwrap();
    assert!(ticks_in(&outcome.drained).is_empty());
    assert_eq!(outcome.summary.unwrap().stats.ticks_emitted, 250);
    backend.shutdown();
}

#[test]
#[serial]
fn test_unit_stopped_is_sent_once_and_last() {
    let driver = SimulatedDriver::new()
        .with_unit("A", 1)
        .with_block_size(20)
        .with_poll_delay(Duration::from_millis(1));
    let config = ConfigBuilder::new().roles(0, &[Role::X]).build();
    let backend = spawn_backend(config, driver);

    backend.frontend.start_capture();
    let before = wait_for_ticks(&backend.frontend, 100);
    let outcome = backend.frontend.stop_and_wait(test_timeout()).unwrap();
    let summary = outcome.summary.expect("session was streaming");
    let after = wait_for_state(&backend.frontend, AcquisitionState::Stopped);

    assert!(!outcome
        .drained
        .iter()
        .any(|m| matches!(m, BackendMessage::UnitStopped(_))));
    assert!(!after
        .iter()
        .any(|m| matches!(m, BackendMessage::Ticks(_) | BackendMessage::UnitStopped(_))));

    let received = ticks_in(&before).len() + ticks_in(&outcome.drained).len();
    assert_eq!(summary.stats.ticks_emitted as usize, received);

    // nothing else arrives once stopped
    std::thread::sleep(Duration::from_millis(50));
    assert!(backend.frontend.drain().is_empty());
    backend.shutdown();
}

#[test]
#[serial]
fn test_buffers_are_released_after_every_session() {
    let driver = SimulatedDriver::new().with_unit("A", 3).with_block_size(50);
    let counters = driver.counters();
    let config = ConfigBuilder::new().roles(0, &[Role::X, Role::Y, Role::Z0]).build();
    let backend = spawn_backend(config, driver);

    for cycle in 1..=3u64 {
        backend.frontend.start_capture();
        wait_for_ticks(&backend.frontend, 10);
        backend.frontend.stop_and_wait(test_timeout()).unwrap();
        wait_for_state(&backend.frontend, AcquisitionState::Stopped);

        assert_eq!(backend.ledger.allocations(), 3 * cycle);
        assert_eq!(backend.ledger.releases(), 3 * cycle);
        assert_eq!(backend.ledger.outstanding(), 0);
    }
    assert_eq!(counters.streams_armed(), 3);
    assert_eq!(counters.stops(), 3);
    assert_eq!(counters.buffers_registered(), counters.buffers_unregistered());
    backend.shutdown();
}

#[test]
#[serial]
fn test_session_indices_restart_after_stop() {
    let driver = SimulatedDriver::new().with_unit("A", 1).with_block_size(40);
    let config = ConfigBuilder::new().roles(0, &[Role::Z3]).build();
    let backend = spawn_backend(config, driver);

    for _ in 0..2 {
        backend.frontend.start_capture();
        let ticks = ticks_in(&wait_for_ticks(&backend.frontend, 1));
        assert_eq!(ticks[0].index, 0);
        backend.frontend.stop_and_wait(test_timeout()).unwrap();
        wait_for_state(&backend.frontend, AcquisitionState::Stopped);
    }
    backend.shutdown();
}

#[test]
#[serial]
fn test_failed_unit_is_skipped() {
    let driver = SimulatedDriver::new()
        .with_unit("A", 2)
        .with_unit("B", 2)
        .fail_open("A")
        .with_block_size(25);
    let counters = driver.counters();
    // roles apply to opened units, so B is the first one
    let config = ConfigBuilder::new()
        .serials(&["A", "B"])
        .roles(0, &[Role::Z0, Role::Z1])
        .build();
    let backend = spawn_backend(config, driver);

    let startup = wait_for(&backend.frontend, |m| matches!(m, BackendMessage::DevicesOpened(_)));
    assert!(startup.iter().any(
        |m| matches!(m, BackendMessage::DeviceOpenFailed { serial, .. } if serial == "A")
    ));
    match startup.last() {
        Some(BackendMessage::DevicesOpened(devices)) => {
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].serial, "B");
        }
        other => panic!("unexpected message {:?}", other),
    }

    backend.frontend.start_capture();
    let ticks = ticks_in(&wait_for_ticks(&backend.frontend, 50));
    for tick in &ticks {
        let populated: BTreeSet<Role> = tick.populated_roles().map(|(r, _)| r).collect();
        assert_eq!(populated, BTreeSet::from([Role::Z0, Role::Z1]));
    }

    backend.frontend.stop_and_wait(test_timeout()).unwrap();
    assert_eq!(counters.streams_armed(), 1);
    backend.shutdown();
}

#[test]
#[serial]
fn test_allocation_failure_drops_only_that_channel() {
    let driver = SimulatedDriver::new().with_unit("A", 2).with_block_size(25);
    let config = ConfigBuilder::new().roles(0, &[Role::X, Role::Y]).build();
    let allocator = FailingAllocator {
        fail: vec![ChannelAddress::new(0, 1)],
    };
    let backend = spawn_backend_with_allocator(config, driver, Box::new(allocator));

    backend.frontend.start_capture();
    let ticks = ticks_in(&wait_for_ticks(&backend.frontend, 25));
    assert!(ticks.iter().all(|t| t.role(Role::X).is_some()));
    assert!(ticks.iter().all(|t| t.role(Role::Y).is_none()));

    let summary = backend
        .frontend
        .stop_and_wait(test_timeout())
        .unwrap()
        .summary
        .unwrap();
    assert_eq!(summary.stats.buffered_channels, 1);
    wait_for_state(&backend.frontend, AcquisitionState::Stopped);
    assert_eq!(backend.ledger.outstanding(), 0);
    backend.shutdown();
}

#[test]
#[serial]
fn test_channel_edit_waits_for_session_end() {
    let driver = SimulatedDriver::new().with_unit("A", 2).with_block_size(25);
    let config = ConfigBuilder::new().roles(0, &[Role::X, Role::Y]).build();
    let backend = spawn_backend(config, driver);

    backend.frontend.start_capture();
    wait_for_state(&backend.frontend, AcquisitionState::Streaming);

    let y = ChannelAddress::new(0, 1);
    backend.frontend.edit_channel(y, ChannelEdit::Enable(false));
    wait_for(&backend.frontend, |m| {
        matches!(m, BackendMessage::ChannelEditDeferred { address, .. } if *address == y)
    });

    // the channel keeps streaming for the rest of the session
    let ticks = ticks_in(&wait_for_ticks(&backend.frontend, 50));
    assert!(ticks.iter().all(|t| t.role(Role::Y).is_some()));

    let outcome = backend.frontend.stop_and_wait(test_timeout()).unwrap();
    assert!(!outcome
        .drained
        .iter()
        .any(|m| matches!(m, BackendMessage::ChannelEditApplied { .. })));
    let applied = wait_for(&backend.frontend, |m| {
        matches!(m, BackendMessage::ChannelEditApplied { .. })
    });
    match applied.last() {
        Some(BackendMessage::ChannelEditApplied { address, settings }) => {
            assert_eq!(*address, y);
            assert!(!settings.enabled);
        }
        other => panic!("unexpected message {:?}", other),
    }
    wait_for_state(&backend.frontend, AcquisitionState::Stopped);

    backend.frontend.start_capture();
    let ticks = ticks_in(&wait_for_ticks(&backend.frontend, 50));
    assert!(ticks.iter().all(|t| t.role(Role::Y).is_none()));
    assert!(ticks.iter().all(|t| t.role(Role::X).is_some()));

    backend.frontend.stop_and_wait(test_timeout()).unwrap();
    backend.shutdown();
}

#[test]
#[serial]
fn test_export_writes_one_row_per_tick() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ticks.tsv");
    let driver = SimulatedDriver::new()
        .with_unit("A", 2)
        .with_pattern("A", 0, SignalPattern::Constant(0))
        .with_scripted_counts("A", [30])
        .with_block_size(0);
    let config = ConfigBuilder::new()
        .roles(0, &[Role::X, Role::Z2])
        .export_to(&path)
        .build();
    let backend = spawn_backend(config, driver);

    backend.frontend.start_capture();
    wait_for_ticks(&backend.frontend, 30);
    backend.frontend.stop_and_wait(test_timeout()).unwrap();
    wait_for_state(&backend.frontend, AcquisitionState::Stopped);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "X\tZ2");
    assert_eq!(lines.len(), 31);
    assert!(lines[1].starts_with("0\t"));
    backend.shutdown();
}
