//! ADC code to voltage conversion

use crate::types::VoltageRange;

/// Full-scale voltage in volts, indexed by [`VoltageRange`] ordinal
pub const FULL_SCALE_VOLTS: [f64; 12] = [
    0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0,
];

/// Voltage corresponding to the device's maximum code for `range`
pub fn full_scale_voltage(range: VoltageRange) -> f64 {
    FULL_SCALE_VOLTS[range.index()]
}

/// Convert a raw ADC code to volts
///
/// `max_code` is the device's positive full-scale code (e.g. 32767).
pub fn to_voltage(range: VoltageRange, max_code: i16, raw_code: i16) -> f64 {
    raw_code as f64 / max_code as f64 * full_scale_voltage(range)
}
