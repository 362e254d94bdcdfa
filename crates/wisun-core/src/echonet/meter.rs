//! Low-voltage smart meter properties
//!
//! Interprets the EDT bytes of the properties the link reads most often.
//! Layouts follow the low-voltage smart electric energy meter class (0x0288).

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

/// Operation status (0x30 = on)
pub const EPC_OPERATION_STATUS: u8 = 0x80;
/// Coefficient applied to cumulative energy
pub const EPC_COEFFICIENT: u8 = 0xD3;
/// Number of effective digits of cumulative energy
pub const EPC_EFFECTIVE_DIGITS: u8 = 0xD7;
/// Cumulative energy, normal direction
pub const EPC_CUMULATIVE_ENERGY: u8 = 0xE0;
/// Unit of cumulative energy
pub const EPC_ENERGY_UNIT: u8 = 0xE1;
/// Instantaneous power in W
pub const EPC_INSTANTANEOUS_POWER: u8 = 0xE7;
/// Instantaneous current, R and T phase
pub const EPC_INSTANTANEOUS_CURRENT: u8 = 0xE8;

/// R/T phase currents in amperes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseCurrent {
    /// R phase
    pub r_phase: f64,
    /// T phase; 0 on single-phase two-wire meters
    pub t_phase: f64,
}

/// A decoded smart meter reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Meter reports itself on
    OperationStatus(bool),
    /// Multiplier of cumulative counts
    Coefficient(u32),
    /// Digits before the cumulative count wraps
    EffectiveDigits(u8),
    /// Raw cumulative count; scale with the coefficient and unit
    CumulativeEnergy(u32),
    /// kWh per count
    EnergyUnit(f64),
    /// Signed watts
    InstantaneousPower(i32),
    /// Amperes per phase
    InstantaneousCurrent(PhaseCurrent),
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::OperationStatus(on) => {
                write!(f, "operation status: {}", if *on { "on" } else { "off" })
            }
            Reading::Coefficient(c) => write!(f, "coefficient: {}", c),
            Reading::EffectiveDigits(d) => write!(f, "effective digits: {}", d),
            Reading::CumulativeEnergy(raw) => write!(f, "cumulative energy: {} counts", raw),
            Reading::EnergyUnit(unit) => write!(f, "energy unit: {} kWh", unit),
            Reading::InstantaneousPower(w) => write!(f, "instantaneous power: {} W", w),
            Reading::InstantaneousCurrent(c) => write!(
                f,
                "instantaneous current: R {:.1} A / T {:.1} A",
                c.r_phase, c.t_phase
            ),
        }
    }
}

/// Interpret a property value by its code
pub fn interpret(code: u8, value: &[u8]) -> Option<Reading> {
    match code {
        EPC_OPERATION_STATUS => single(value).map(|v| Reading::OperationStatus(v == 0x30)),
        EPC_COEFFICIENT => u32_be(value).map(Reading::Coefficient),
        EPC_EFFECTIVE_DIGITS => single(value).map(Reading::EffectiveDigits),
        EPC_CUMULATIVE_ENERGY => u32_be(value).map(Reading::CumulativeEnergy),
        EPC_ENERGY_UNIT => single(value).and_then(energy_unit).map(Reading::EnergyUnit),
        EPC_INSTANTANEOUS_POWER => instantaneous_power(value).map(Reading::InstantaneousPower),
        EPC_INSTANTANEOUS_CURRENT => {
            instantaneous_current(value).map(Reading::InstantaneousCurrent)
        }
        _ => None,
    }
}

/// Signed 32-bit watts
pub fn instantaneous_power(value: &[u8]) -> Option<i32> {
    (value.len() == 4).then(|| BigEndian::read_i32(value))
}

/// Two signed 16-bit values in 0.1 A, R phase first
pub fn instantaneous_current(value: &[u8]) -> Option<PhaseCurrent> {
    if value.len() != 4 {
        return None;
    }
    Some(PhaseCurrent {
        r_phase: BigEndian::read_i16(&value[0..2]) as f64 / 10.0,
        t_phase: BigEndian::read_i16(&value[2..4]) as f64 / 10.0,
    })
}

/// Map the E1 unit code to kWh per count
pub fn energy_unit(code: u8) -> Option<f64> {
    let unit = match code {
        0x00 => 1.0,
        0x01 => 0.1,
        0x02 => 0.01,
        0x03 => 0.001,
        0x04 => 0.0001,
        0x0A => 10.0,
        0x0B => 100.0,
        0x0C => 1000.0,
        0x0D => 10000.0,
        _ => return None,
    };
    Some(unit)
}

/// Cumulative energy in kWh; a missing coefficient counts as 1
pub fn cumulative_energy_kwh(raw: u32, coefficient: Option<u32>, unit: f64) -> f64 {
    raw as f64 * coefficient.unwrap_or(1) as f64 * unit
}

fn single(value: &[u8]) -> Option<u8> {
    match value {
        [v] => Some(*v),
        _ => None,
    }
}

fn u32_be(value: &[u8]) -> Option<u32> {
    (value.len() == 4).then(|| BigEndian::read_u32(value))
}
