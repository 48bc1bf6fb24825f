//! Channel model: the single source of truth for channel configuration
//!
//! The model holds one [`DeviceChannels`] entry per opened unit. It is owned
//! by the acquisition worker and locked for the duration of every capture
//! session; edits attempted while locked fail with
//! [`ScopeError::ChannelModelLocked`].
//!
//! Axis roles are not exclusive: when several enabled channels carry the same
//! role, the one visited last (device order, then channel order) feeds the
//! tick slot. [`ChannelModel::role_conflicts`] reports such overlaps.

use crate::error::{Result, ScopeError};
use crate::types::{Coupling, DeviceInfo, Role, VoltageRange};

/// Configuration of one analog input
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub range: VoltageRange,
    pub enabled: bool,
    /// Whether session buffers currently exist for this channel
    buffer_enabled: bool,
    pub role: Role,
    /// Analog offset in volts, kept inside `[min_offset, max_offset]`
    pub offset: f32,
    pub max_offset: f32,
    pub min_offset: f32,
    pub coupling: Coupling,
}

impl ChannelSettings {
    pub fn new(range: VoltageRange, coupling: Coupling, enabled: bool) -> Self {
        Self {
            range,
            enabled,
            buffer_enabled: false,
            role: Role::Off,
            offset: 0.0,
            max_offset: 0.0,
            min_offset: 0.0,
            coupling,
        }
    }

    pub fn buffer_enabled(&self) -> bool {
        self.buffer_enabled
    }

    fn clamp_offset(&mut self) {
        if self.min_offset <= self.max_offset {
            self.offset = self.offset.clamp(self.min_offset, self.max_offset);
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::new(VoltageRange::default(), Coupling::default(), true)
    }
}

/// Address of a channel within the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    /// Index into [`ChannelModel::devices`]
    pub device: usize,
    pub channel: usize,
}

impl ChannelAddress {
    pub fn new(device: usize, channel: usize) -> Self {
        Self { device, channel }
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = char::from(b'A' + (self.channel as u8 % 26));
        write!(f, "unit {} channel {}", self.device, letter)
    }
}

/// A single change to a channel's configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelEdit {
    Enable(bool),
    Range(VoltageRange),
    Offset(f32),
    Coupling(Coupling),
    Role(Role),
}

impl ChannelEdit {
    /// Whether the edit changes the analog-offset bounds
    pub fn affects_offset_bounds(&self) -> bool {
        matches!(self, ChannelEdit::Range(_) | ChannelEdit::Coupling(_))
    }
}

/// One opened unit and its channels
#[derive(Debug, Clone)]
pub struct DeviceChannels {
    pub device: DeviceInfo,
    pub channels: Vec<ChannelSettings>,
}

/// Channel configuration for every opened unit
#[derive(Debug, Clone, Default)]
pub struct ChannelModel {
    devices: Vec<DeviceChannels>,
    locked: bool,
}

impl ChannelModel {
    /// Build a model with every channel at `template`
    pub fn new(devices: Vec<DeviceInfo>, template: &ChannelSettings) -> Self {
        let devices = devices
            .into_iter()
            .map(|device| DeviceChannels {
                channels: vec![template.clone(); device.channel_count],
                device,
            })
            .collect();
        Self {
            devices,
            locked: false,
        }
    }

    pub fn devices(&self) -> &[DeviceChannels] {
        &self.devices
    }

    pub fn device(&self, index: usize) -> Option<&DeviceChannels> {
        self.devices.get(index)
    }

    pub fn channel(&self, addr: ChannelAddress) -> Option<&ChannelSettings> {
        self.devices
            .get(addr.device)
            .and_then(|d| d.channels.get(addr.channel))
    }

    /// Iterate over every channel with its address
    pub fn iter(&self) -> impl Iterator<Item = (ChannelAddress, &ChannelSettings)> {
        self.devices.iter().enumerate().flat_map(|(d, dev)| {
            dev.channels
                .iter()
                .enumerate()
                .map(move |(c, s)| (ChannelAddress::new(d, c), s))
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }

    /// Apply an edit; fails while a capture session holds the model
    pub fn apply(&mut self, addr: ChannelAddress, edit: ChannelEdit) -> Result<()> {
        if self.locked {
            return Err(ScopeError::ChannelModelLocked);
        }
        let settings = self.channel_mut(addr)?;
        match edit {
            ChannelEdit::Enable(enabled) => settings.enabled = enabled,
            ChannelEdit::Range(range) => settings.range = range,
            ChannelEdit::Offset(offset) => {
                settings.offset = offset;
                settings.clamp_offset();
            }
            ChannelEdit::Coupling(coupling) => settings.coupling = coupling,
            ChannelEdit::Role(role) => settings.role = role,
        }
        Ok(())
    }

    /// Record the offset bounds reported by the driver and clamp the offset
    pub fn set_offset_bounds(&mut self, addr: ChannelAddress, min: f32, max: f32) -> Result<()> {
        if self.locked {
            return Err(ScopeError::ChannelModelLocked);
        }
        let settings = self.channel_mut(addr)?;
        settings.min_offset = min;
        settings.max_offset = max;
        settings.clamp_offset();
        Ok(())
    }

    /// Buffer bookkeeping is owned by the buffer manager and bypasses the lock
    pub(crate) fn set_buffer_enabled(&mut self, addr: ChannelAddress, enabled: bool) {
        if let Ok(settings) = self.channel_mut(addr) {
            settings.buffer_enabled = enabled;
        }
    }

    fn channel_mut(&mut self, addr: ChannelAddress) -> Result<&mut ChannelSettings> {
        self.devices
            .get_mut(addr.device)
            .and_then(|d| d.channels.get_mut(addr.channel))
            .ok_or(ScopeError::ChannelNotFound {
                device: addr.device,
                channel: addr.channel,
            })
    }

    /// The enabled channel feeding `role`'s slot (the last one wins)
    pub fn role_owner(&self, role: Role) -> Option<ChannelAddress> {
        if role == Role::Off {
            return None;
        }
        self.iter()
            .filter(|(_, s)| s.enabled && s.role == role)
            .map(|(addr, _)| addr)
            .last()
    }

    /// Roles fed by more than one enabled channel
    pub fn role_conflicts(&self) -> Vec<Role> {
        Role::SLOTTED
            .iter()
            .copied()
            .filter(|role| {
                self.iter()
                    .filter(|(_, s)| s.enabled && s.role == *role)
                    .count()
                    > 1
            })
            .collect()
    }

    /// Full-scale voltage of the channel feeding `role`
    pub fn role_full_scale(&self, role: Role) -> Option<f64> {
        self.role_owner(role)
            .and_then(|addr| self.channel(addr))
            .map(|s| s.range.full_scale())
    }

    /// Largest full-scale voltage among enabled auxiliary channels
    pub fn auxiliary_full_scale(&self) -> f64 {
        self.iter()
            .filter(|(_, s)| s.enabled && s.role.is_auxiliary())
            .map(|(_, s)| s.range.full_scale())
            .fold(0.0, f64::max)
    }

    /// Active role of every enabled, routed channel, in channel order
    ///
    /// A role fed by several channels appears once, at its first channel.
    pub fn export_columns(&self) -> Vec<Role> {
        let mut columns = Vec::new();
        for (_, s) in self.iter() {
            if s.enabled && s.role != Role::Off && !columns.contains(&s.role) {
                columns.push(s.role);
            }
        }
        columns
    }

    /// Number of channels currently holding session buffers
    pub fn buffered_channel_count(&self) -> usize {
        self.iter().filter(|(_, s)| s.buffer_enabled).count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_device(serial: &str, handle: i16, channels: usize) -> DeviceInfo {
        DeviceInfo {
            serial: serial.to_string(),
            handle,
            channel_count: channels,
            max_code: 32767,
            min_code: -32767,
            min_range: VoltageRange::Mv10,
            max_range: VoltageRange::V50,
        }
    }

    fn two_unit_model() -> ChannelModel {
        ChannelModel::new(
            vec![test_device("A", 1, 4), test_device("B", 2, 4)],
            &ChannelSettings::default(),
        )
    }

    #[test]
    fn test_defaults() {
        let model = two_unit_model();
        assert_eq!(model.iter().count(), 8);
        let ch = model.channel(ChannelAddress::new(1, 3)).unwrap();
        assert!(ch.enabled);
        assert!(!ch.buffer_enabled());
        assert_eq!(ch.role, Role::Off);
        assert_eq!(ch.range, VoltageRange::V5);
        assert_eq!(ch.coupling, Coupling::Ac);
    }

    #[test]
    fn test_locked_model_rejects_edits() {
        let mut model = two_unit_model();
        model.lock();
        let addr = ChannelAddress::new(0, 0);
        let err = model.apply(addr, ChannelEdit::Enable(false)).unwrap_err();
        assert!(matches!(err, ScopeError::ChannelModelLocked));
        assert!(model.channel(addr).unwrap().enabled);

        model.unlock();
        model.apply(addr, ChannelEdit::Enable(false)).unwrap();
        assert!(!model.channel(addr).unwrap().enabled);
    }

    #[test]
    fn test_unknown_channel() {
        let mut model = two_unit_model();
        let err = model
            .apply(ChannelAddress::new(0, 9), ChannelEdit::Role(Role::X))
            .unwrap_err();
        assert!(matches!(
            err,
            ScopeError::ChannelNotFound {
                device: 0,
                channel: 9
            }
        ));
    }

    #[test]
    fn test_offset_is_clamped_to_bounds() {
        let mut model = two_unit_model();
        let addr = ChannelAddress::new(0, 1);
        model.set_offset_bounds(addr, -0.25, 0.25).unwrap();
        model.apply(addr, ChannelEdit::Offset(2.0)).unwrap();
        assert_eq!(model.channel(addr).unwrap().offset, 0.25);

        model.apply(addr, ChannelEdit::Offset(-0.1)).unwrap();
        model.set_offset_bounds(addr, 0.0, 0.05).unwrap();
        assert_eq!(model.channel(addr).unwrap().offset, 0.0);
    }

    #[test]
    fn test_later_axis_assignment_wins() {
        let mut model = two_unit_model();
        model
            .apply(ChannelAddress::new(0, 0), ChannelEdit::Role(Role::X))
            .unwrap();
        model
            .apply(ChannelAddress::new(1, 2), ChannelEdit::Role(Role::X))
            .unwrap();

        assert_eq!(model.role_owner(Role::X), Some(ChannelAddress::new(1, 2)));
        assert_eq!(model.role_conflicts(), vec![Role::X]);

        model
            .apply(ChannelAddress::new(1, 2), ChannelEdit::Enable(false))
            .unwrap();
        assert_eq!(model.role_owner(Role::X), Some(ChannelAddress::new(0, 0)));
        assert!(model.role_conflicts().is_empty());
    }

    #[test]
    fn test_axis_and_auxiliary_scale() {
        let mut model = two_unit_model();
        let x = ChannelAddress::new(0, 0);
        model.apply(x, ChannelEdit::Role(Role::X)).unwrap();
        model.apply(x, ChannelEdit::Range(VoltageRange::V2)).unwrap();
        model
            .apply(ChannelAddress::new(0, 2), ChannelEdit::Role(Role::Z0))
            .unwrap();
        let z1 = ChannelAddress::new(1, 0);
        model.apply(z1, ChannelEdit::Role(Role::Z1)).unwrap();
        model.apply(z1, ChannelEdit::Range(VoltageRange::V20)).unwrap();

        assert_eq!(model.role_full_scale(Role::X), Some(2.0));
        assert_eq!(model.role_full_scale(Role::Y), None);
        assert_eq!(model.auxiliary_full_scale(), 20.0);
    }

    #[test]
    fn test_export_columns_follow_channel_order() {
        let mut model = two_unit_model();
        model
            .apply(ChannelAddress::new(1, 0), ChannelEdit::Role(Role::Z3))
            .unwrap();
        model
            .apply(ChannelAddress::new(0, 1), ChannelEdit::Role(Role::Y))
            .unwrap();
        model
            .apply(ChannelAddress::new(0, 3), ChannelEdit::Role(Role::X))
            .unwrap();
        model
            .apply(ChannelAddress::new(0, 3), ChannelEdit::Enable(false))
            .unwrap();

        assert_eq!(model.export_columns(), vec![Role::Y, Role::Z3]);
    }

    #[test]
    fn test_shared_role_is_exported_once() {
        let mut model = two_unit_model();
        for (device, channel, role) in [(0, 0, Role::X), (0, 2, Role::Z1), (1, 1, Role::X)] {
            model
                .apply(ChannelAddress::new(device, channel), ChannelEdit::Role(role))
                .unwrap();
        }

        assert_eq!(model.export_columns(), vec![Role::X, Role::Z1]);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(ChannelAddress::new(1, 2).to_string(), "unit 1 channel C");
    }
}
