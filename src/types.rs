//! Core data types for scopestream
//!
//! This module contains the fundamental data structures shared by the
//! acquisition backend, the expression engine and the sinks.
//!
//! # Main Types
//!
//! - [`Role`] - Logical purpose of a channel's values within a tick
//! - [`VoltageRange`] - Ordered input range selector of a channel
//! - [`Coupling`] - AC/DC input coupling
//! - [`DeviceInfo`] - Immutable description of an opened digitizer
//! - [`SampleTick`] - One time-aligned vector of calibrated voltages
//! - [`AcquisitionStats`] / [`SessionSummary`] - Counters for a capture session
//!
//! # Tick Layout
//!
//! Every tick carries one slot per non-`Off` role, in the fixed order
//! `X, Y, Z0..Z9`, followed by one value per active math expression. A slot
//! that no enabled channel feeds stays `None`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of role slots carried by every tick (X, Y, Z0..Z9)
pub const ROLE_SLOT_COUNT: usize = 12;

/// Handle assigned by the driver to an opened unit
pub type DeviceHandle = i16;

/// Logical role ("mode") of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Role {
    /// Channel values are not routed anywhere
    #[default]
    Off,
    /// Horizontal axis of the density view
    X,
    /// Vertical axis of the density view
    Y,
    Z0,
    Z1,
    Z2,
    Z3,
    Z4,
    Z5,
    Z6,
    Z7,
    Z8,
    Z9,
}

impl Role {
    /// All roles that own a tick slot, in slot order
    pub const SLOTTED: [Role; ROLE_SLOT_COUNT] = [
        Role::X,
        Role::Y,
        Role::Z0,
        Role::Z1,
        Role::Z2,
        Role::Z3,
        Role::Z4,
        Role::Z5,
        Role::Z6,
        Role::Z7,
        Role::Z8,
        Role::Z9,
    ];

    /// Index of this role's slot in [`SampleTick::roles`], `None` for `Off`
    pub fn slot(self) -> Option<usize> {
        match self {
            Role::Off => None,
            Role::X => Some(0),
            Role::Y => Some(1),
            Role::Z0 => Some(2),
            Role::Z1 => Some(3),
            Role::Z2 => Some(4),
            Role::Z3 => Some(5),
            Role::Z4 => Some(6),
            Role::Z5 => Some(7),
            Role::Z6 => Some(8),
            Role::Z7 => Some(9),
            Role::Z8 => Some(10),
            Role::Z9 => Some(11),
        }
    }

    /// Role owning the given slot
    pub fn from_slot(slot: usize) -> Option<Role> {
        Self::SLOTTED.get(slot).copied()
    }

    /// True for the auxiliary roles Z0..Z9
    pub fn is_auxiliary(self) -> bool {
        self.slot().is_some_and(|s| s >= 2)
    }

    /// Short label used in headers and series names
    pub fn label(self) -> &'static str {
        match self {
            Role::Off => "Off",
            Role::X => "X",
            Role::Y => "Y",
            Role::Z0 => "Z0",
            Role::Z1 => "Z1",
            Role::Z2 => "Z2",
            Role::Z3 => "Z3",
            Role::Z4 => "Z4",
            Role::Z5 => "Z5",
            Role::Z6 => "Z6",
            Role::Z7 => "Z7",
            Role::Z8 => "Z8",
            Role::Z9 => "Z9",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Input range of a channel; ordinal matches the full-scale lookup table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum VoltageRange {
    Mv10,
    Mv20,
    Mv50,
    Mv100,
    Mv200,
    Mv500,
    V1,
    V2,
    #[default]
    V5,
    V10,
    V20,
    V50,
}

impl VoltageRange {
    /// All ranges in ordinal order
    pub const ALL: [VoltageRange; 12] = [
        VoltageRange::Mv10,
        VoltageRange::Mv20,
        VoltageRange::Mv50,
        VoltageRange::Mv100,
        VoltageRange::Mv200,
        VoltageRange::Mv500,
        VoltageRange::V1,
        VoltageRange::V2,
        VoltageRange::V5,
        VoltageRange::V10,
        VoltageRange::V20,
        VoltageRange::V50,
    ];

    /// Ordinal of this range
    pub fn index(self) -> usize {
        self as usize
    }

    /// Range for an ordinal, `None` when out of bounds
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Full-scale voltage in volts
    pub fn full_scale(self) -> f64 {
        crate::backend::scaler::full_scale_voltage(self)
    }

    pub fn label(self) -> &'static str {
        match self {
            VoltageRange::Mv10 => "10mV",
            VoltageRange::Mv20 => "20mV",
            VoltageRange::Mv50 => "50mV",
            VoltageRange::Mv100 => "0.1V",
            VoltageRange::Mv200 => "0.2V",
            VoltageRange::Mv500 => "0.5V",
            VoltageRange::V1 => "1V",
            VoltageRange::V2 => "2V",
            VoltageRange::V5 => "5V",
            VoltageRange::V10 => "10V",
            VoltageRange::V20 => "20V",
            VoltageRange::V50 => "50V",
        }
    }
}

impl std::fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Input coupling of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Coupling {
    #[default]
    Ac,
    Dc,
}

/// Immutable description of an opened unit
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Serial number as reported by enumeration
    pub serial: String,
    /// Driver handle
    pub handle: DeviceHandle,
    /// Number of analog input channels
    pub channel_count: usize,
    /// Raw code corresponding to +full-scale
    pub max_code: i16,
    /// Raw code corresponding to -full-scale
    pub min_code: i16,
    /// Smallest supported range
    pub min_range: VoltageRange,
    /// Largest supported range
    pub max_range: VoltageRange,
}

/// Identifier of a compiled math expression; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpressionId(pub u32);

impl std::fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Value of one math expression for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedValue {
    pub id: ExpressionId,
    pub value: f64,
}

/// One time-aligned vector of calibrated voltages
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTick {
    /// Session-local tick counter, starts at 0 for every session
    pub index: u64,
    /// Calibrated voltage per role slot, `None` when no channel feeds it
    pub roles: [Option<f64>; ROLE_SLOT_COUNT],
    /// Math channel values in expression creation order
    pub derived: Vec<DerivedValue>,
}

impl SampleTick {
    /// Empty tick at index 0
    pub fn new() -> Self {
        Self {
            index: 0,
            roles: [None; ROLE_SLOT_COUNT],
            derived: Vec::new(),
        }
    }

    /// Value of a role slot
    pub fn role(&self, role: Role) -> Option<f64> {
        role.slot().and_then(|s| self.roles[s])
    }

    /// Set a role slot; ignored for `Off`
    pub fn set_role(&mut self, role: Role, value: f64) {
        if let Some(s) = role.slot() {
            self.roles[s] = Some(value);
        }
    }

    /// Value of a math expression in this tick
    pub fn derived_value(&self, id: ExpressionId) -> Option<f64> {
        self.derived.iter().find(|d| d.id == id).map(|d| d.value)
    }

    /// Roles with a value in this tick
    pub fn populated_roles(&self) -> impl Iterator<Item = (Role, f64)> + '_ {
        Role::SLOTTED
            .iter()
            .zip(self.roles.iter())
            .filter_map(|(role, v)| v.map(|v| (*role, v)))
    }
}

impl Default for SampleTick {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Streaming,
    Draining,
    Stopped,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "Idle"),
            AcquisitionState::Streaming => write!(f, "Streaming"),
            AcquisitionState::Draining => write!(f, "Draining"),
            AcquisitionState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Counters for the current capture session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionStats {
    /// Poll iterations (one driver call per streaming device each)
    pub polls: u64,
    /// Poll iterations that produced no samples
    pub idle_polls: u64,
    /// Ticks emitted to the frontend
    pub ticks_emitted: u64,
    /// Poll callbacks that reported an overflow
    pub overflows: u64,
    /// Driver calls that returned a failure status
    pub driver_failures: u64,
    /// Channels that received buffers this session
    pub buffered_channels: usize,
    /// Devices streaming this session
    pub streaming_devices: usize,
    /// Ticks written to the export file
    pub rows_exported: u64,
}

impl AcquisitionStats {
    /// Fraction of polls that produced data, in percent
    pub fn data_poll_ratio(&self) -> f64 {
        if self.polls == 0 {
            0.0
        } else {
            (self.polls - self.idle_polls) as f64 / self.polls as f64 * 100.0
        }
    }
}

/// Reported once per session when the unit has stopped
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Wall-clock time the session was armed
    pub started_at: chrono::DateTime<chrono::Local>,
    /// Time between arming and stopping
    pub duration: Duration,
    /// Final counters
    pub stats: AcquisitionStats,
}
