//! Conversion between raw register values and application units.
//!
//! The library only applies a factor per physical unit; choosing the factors
//! (encoder resolution, rated torque, ...) is left to the application.

use serde::{Deserialize, Serialize};
use servolink_transport::PhysicalUnit;

/// Factor turning a raw register value into application units.
///
/// Reads multiply by the factor, writes divide by it.
pub trait ScaleFactor: Send + Sync {
    fn factor(&self, unit: PhysicalUnit) -> f64;
}

/// Raw register values, unscaled.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NativeUnits;

impl ScaleFactor for NativeUnits {
    fn factor(&self, _unit: PhysicalUnit) -> f64 {
        1.0
    }
}

/// Fixed factor per unit kind, typically loaded from a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitScale {
    pub torque: f64,
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub voltage_relative: f64,
    pub radians: f64,
}

impl Default for UnitScale {
    fn default() -> Self {
        Self {
            torque: 1.0,
            position: 1.0,
            velocity: 1.0,
            acceleration: 1.0,
            voltage_relative: 1.0,
            radians: 1.0,
        }
    }
}

impl UnitScale {
    /// Positions in revolutions for an encoder with `counts` per revolution.
    /// Velocities and accelerations follow in revolutions per second (squared).
    pub fn revolutions(counts: u32) -> Self {
        let per_count = if counts == 0 { 1.0 } else { 1.0 / f64::from(counts) };
        Self {
            position: per_count,
            velocity: per_count,
            acceleration: per_count,
            ..Self::default()
        }
    }
}

impl ScaleFactor for UnitScale {
    fn factor(&self, unit: PhysicalUnit) -> f64 {
        match unit {
            PhysicalUnit::None => 1.0,
            PhysicalUnit::Torque => self.torque,
            PhysicalUnit::Position => self.position,
            PhysicalUnit::Velocity => self.velocity,
            PhysicalUnit::Acceleration => self.acceleration,
            PhysicalUnit::VoltageRelative => self.voltage_relative,
            PhysicalUnit::Radians => self.radians,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_is_identity() {
        assert!((NativeUnits.factor(PhysicalUnit::Position) - 1.0).abs() < f64::EPSILON);
        assert!((NativeUnits.factor(PhysicalUnit::Torque) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_revolutions() {
        let scale = UnitScale::revolutions(4096);
        assert!((scale.factor(PhysicalUnit::Position) - 1.0 / 4096.0).abs() < f64::EPSILON);
        assert!((scale.factor(PhysicalUnit::Torque) - 1.0).abs() < f64::EPSILON);
        assert!((UnitScale::revolutions(0).factor(PhysicalUnit::Position) - 1.0).abs() < f64::EPSILON);
    }
}
