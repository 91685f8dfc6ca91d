//! Drive configuration and register map.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use servolink_errors::{Result, ServoError};
use servolink_frame::RegisterAddress;

/// Registers the state machine and motion helpers access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveRegisters {
    pub controlword: RegisterAddress,
    pub statusword: RegisterAddress,
    pub target_position: RegisterAddress,
    pub actual_position: RegisterAddress,
    pub operation_mode: RegisterAddress,
    pub operation_mode_display: RegisterAddress,
    pub target_velocity: RegisterAddress,
    pub actual_velocity: RegisterAddress,
    pub target_torque: RegisterAddress,
    pub actual_torque: RegisterAddress,
}

impl DriveRegisters {
    /// CiA-402 object dictionary indices.
    pub const fn cia402() -> Self {
        Self {
            controlword: RegisterAddress::new(0x6040, 0),
            statusword: RegisterAddress::new(0x6041, 0),
            target_position: RegisterAddress::new(0x607A, 0),
            actual_position: RegisterAddress::new(0x6064, 0),
            operation_mode: RegisterAddress::new(0x6060, 0),
            operation_mode_display: RegisterAddress::new(0x6061, 0),
            target_velocity: RegisterAddress::new(0x60FF, 0),
            actual_velocity: RegisterAddress::new(0x606C, 0),
            target_torque: RegisterAddress::new(0x6071, 0),
            actual_torque: RegisterAddress::new(0x6077, 0),
        }
    }

    /// Motion subnode map of drives reached over the synchronous protocol.
    pub const fn mcb() -> Self {
        Self {
            controlword: RegisterAddress::new(0x010, 0),
            statusword: RegisterAddress::new(0x011, 0),
            operation_mode: RegisterAddress::new(0x014, 0),
            operation_mode_display: RegisterAddress::new(0x015, 0),
            target_position: RegisterAddress::new(0x020, 0),
            target_velocity: RegisterAddress::new(0x021, 0),
            target_torque: RegisterAddress::new(0x022, 0),
            actual_position: RegisterAddress::new(0x030, 0),
            actual_velocity: RegisterAddress::new(0x031, 0),
            actual_torque: RegisterAddress::new(0x033, 0),
        }
    }
}

impl Default for DriveRegisters {
    fn default() -> Self {
        Self::cia402()
    }
}

/// State machine timing and register map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Budget of each statusword wait inside `disable` and `fault_reset`, in milliseconds.
    pub pds_timeout_ms: u64,
    /// Fault-reset attempts before giving up.
    pub fault_reset_retries: u32,
    /// Default set-point acknowledge timeout, in milliseconds.
    pub setpoint_timeout_ms: u64,
    /// Emergency codes kept before the oldest is dropped.
    pub emergency_capacity: usize,
    pub registers: DriveRegisters,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            pds_timeout_ms: 1000,
            fault_reset_retries: 20,
            setpoint_timeout_ms: 1000,
            emergency_capacity: 32,
            registers: DriveRegisters::default(),
        }
    }
}

impl DriveConfig {
    #[must_use]
    pub fn builder() -> DriveConfigBuilder {
        DriveConfigBuilder::default()
    }

    /// Defaults with the [`DriveRegisters::mcb`] register map.
    pub fn mcb() -> Self {
        Self {
            registers: DriveRegisters::mcb(),
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` if a timeout, the retry count or the
    /// emergency capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.pds_timeout_ms == 0 {
            return Err(ServoError::invalid_argument("pds_timeout_ms must be non-zero"));
        }
        if self.fault_reset_retries == 0 {
            return Err(ServoError::invalid_argument("fault_reset_retries must be non-zero"));
        }
        if self.setpoint_timeout_ms == 0 {
            return Err(ServoError::invalid_argument("setpoint_timeout_ms must be non-zero"));
        }
        if self.emergency_capacity == 0 {
            return Err(ServoError::invalid_argument("emergency_capacity must be non-zero"));
        }
        Ok(())
    }

    pub fn pds_timeout(&self) -> Duration {
        Duration::from_millis(self.pds_timeout_ms)
    }

    pub fn setpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.setpoint_timeout_ms)
    }
}

#[derive(Debug, Default)]
pub struct DriveConfigBuilder {
    config: DriveConfig,
}

impl DriveConfigBuilder {
    #[must_use]
    pub fn pds_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pds_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn fault_reset_retries(mut self, retries: u32) -> Self {
        self.config.fault_reset_retries = retries;
        self
    }

    #[must_use]
    pub fn setpoint_timeout_ms(mut self, ms: u64) -> Self {
        self.config.setpoint_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn emergency_capacity(mut self, capacity: usize) -> Self {
        self.config.emergency_capacity = capacity;
        self
    }

    #[must_use]
    pub fn registers(mut self, registers: DriveRegisters) -> Self {
        self.config.registers = registers;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<DriveConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servolink_errors::ErrorKind;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_defaults() {
        let config = DriveConfig::default();
        assert_eq!(config.pds_timeout(), Duration::from_secs(1));
        assert_eq!(config.fault_reset_retries, 20);
        assert_eq!(config.registers.controlword, RegisterAddress::new(0x6040, 0));
        assert_eq!(config.registers.statusword, RegisterAddress::new(0x6041, 0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mcb_preset() {
        let config = DriveConfig::mcb();
        assert_eq!(config.registers.controlword.raw(), 0x010);
        assert_eq!(config.registers.statusword.raw(), 0x011);
    }

    #[test]
    fn test_builder_rejects_zero_retries() {
        let err = DriveConfig::builder().fault_reset_retries(0).build().err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn test_registers_serialize_as_numbers() -> TestResult {
        let json = serde_json::to_string(&DriveRegisters::cia402())?;
        insta::assert_snapshot!(json, @r#"{"controlword":24640,"statusword":24641,"target_position":24698,"actual_position":24676,"operation_mode":24672,"operation_mode_display":24673,"target_velocity":24831,"actual_velocity":24684,"target_torque":24689,"actual_torque":24695}"#);
        Ok(())
    }
}
