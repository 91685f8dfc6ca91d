//! Power drive system states, controlword commands and statusword fields.
//!
//! Decoding is a pure function of the statusword. The masks below follow the
//! CiA-402 state table: bits 0..=3 and 6 identify every state, bit 5
//! (quick stop) additionally separates the enabled states from quick stop.

use core::fmt;

use serde::{Deserialize, Serialize};
use servolink_errors::HomingFailure;

/// Statusword bits.
pub mod sw {
    pub const READY_TO_SWITCH_ON: u16 = 1 << 0;
    pub const SWITCHED_ON: u16 = 1 << 1;
    pub const OPERATION_ENABLED: u16 = 1 << 2;
    pub const FAULT: u16 = 1 << 3;
    pub const VOLTAGE_ENABLED: u16 = 1 << 4;
    pub const QUICK_STOP: u16 = 1 << 5;
    pub const SWITCH_ON_DISABLED: u16 = 1 << 6;
    pub const WARNING: u16 = 1 << 7;
    pub const REMOTE: u16 = 1 << 9;
    pub const TARGET_REACHED: u16 = 1 << 10;
    pub const INTERNAL_LIMIT: u16 = 1 << 11;
    /// Set-point acknowledge in profile position mode.
    pub const SETPOINT_ACK: u16 = 1 << 12;
    pub const HOMING_ATTAINED: u16 = 1 << 12;
    pub const HOMING_ERROR: u16 = 1 << 13;
}

/// Controlword bits.
pub mod cw {
    pub const SWITCH_ON: u16 = 1 << 0;
    pub const ENABLE_VOLTAGE: u16 = 1 << 1;
    pub const QUICK_STOP: u16 = 1 << 2;
    pub const ENABLE_OPERATION: u16 = 1 << 3;
    /// Start homing, homing mode only.
    pub const HOMING_START: u16 = 1 << 4;
    /// New set-point, profile position mode only.
    pub const NEW_SETPOINT: u16 = 1 << 4;
    pub const IMMEDIATE: u16 = 1 << 5;
    pub const RELATIVE: u16 = 1 << 6;
    pub const FAULT_RESET: u16 = 1 << 7;
    pub const HALT: u16 = 1 << 8;
}

const MASK_SHORT: u16 =
    sw::READY_TO_SWITCH_ON | sw::SWITCHED_ON | sw::OPERATION_ENABLED | sw::FAULT | sw::SWITCH_ON_DISABLED;
const MASK_LONG: u16 = MASK_SHORT | sw::QUICK_STOP;

/// Statusword bits above this position carry [`DriveFlags`].
pub const FLAGS_SHIFT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
    /// The statusword matches no state in the table.
    Unknown,
}

impl DriveState {
    /// Decode the state bits of `statusword`.
    pub fn decode(statusword: u16) -> Self {
        match statusword & MASK_SHORT {
            0x00 => return Self::NotReadyToSwitchOn,
            0x40 => return Self::SwitchOnDisabled,
            0x0F => return Self::FaultReactionActive,
            0x08 => return Self::Fault,
            _ => {}
        }
        match statusword & MASK_LONG {
            0x21 => Self::ReadyToSwitchOn,
            0x23 => Self::SwitchedOn,
            0x27 => Self::OperationEnabled,
            0x07 => Self::QuickStopActive,
            _ => Self::Unknown,
        }
    }

    pub fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReactionActive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotReadyToSwitchOn => "NotReadyToSwitchOn",
            Self::SwitchOnDisabled => "SwitchOnDisabled",
            Self::ReadyToSwitchOn => "ReadyToSwitchOn",
            Self::SwitchedOn => "SwitchedOn",
            Self::OperationEnabled => "OperationEnabled",
            Self::QuickStopActive => "QuickStopActive",
            Self::FaultReactionActive => "FaultReactionActive",
            Self::Fault => "Fault",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shorthand for [`DriveState::decode`].
pub fn decode_state(statusword: u16) -> DriveState {
    DriveState::decode(statusword)
}

/// Named controlword patterns driving PDS transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdsCommand {
    ShutDown,
    SwitchOn,
    SwitchOnAndEnableOperation,
    DisableVoltage,
    QuickStop,
    DisableOperation,
    EnableOperation,
    FaultReset,
}

impl PdsCommand {
    pub fn controlword(self) -> u16 {
        match self {
            Self::ShutDown => cw::ENABLE_VOLTAGE | cw::QUICK_STOP,
            Self::SwitchOn | Self::DisableOperation => {
                cw::SWITCH_ON | cw::ENABLE_VOLTAGE | cw::QUICK_STOP
            }
            Self::SwitchOnAndEnableOperation | Self::EnableOperation => {
                cw::SWITCH_ON | cw::ENABLE_VOLTAGE | cw::QUICK_STOP | cw::ENABLE_OPERATION
            }
            Self::DisableVoltage => 0x0000,
            Self::QuickStop => cw::ENABLE_VOLTAGE,
            Self::FaultReset => cw::FAULT_RESET,
        }
    }

    /// Command moving one step from `state` towards `OperationEnabled`.
    /// `None` when already there, when a fault reset is needed instead, or
    /// when the state is not decodable.
    pub fn towards_enabled(state: DriveState) -> Option<Self> {
        match state {
            DriveState::OperationEnabled
            | DriveState::Fault
            | DriveState::FaultReactionActive
            | DriveState::Unknown => None,
            DriveState::NotReadyToSwitchOn => Some(Self::DisableVoltage),
            DriveState::SwitchOnDisabled => Some(Self::ShutDown),
            DriveState::ReadyToSwitchOn => Some(Self::SwitchOnAndEnableOperation),
            DriveState::SwitchedOn | DriveState::QuickStopActive => Some(Self::EnableOperation),
        }
    }

    /// Command moving one step from `state` towards `SwitchedOn`.
    pub fn towards_switched_on(state: DriveState) -> Option<Self> {
        match state {
            DriveState::SwitchedOn
            | DriveState::Fault
            | DriveState::FaultReactionActive
            | DriveState::Unknown => None,
            DriveState::SwitchOnDisabled => Some(Self::ShutDown),
            DriveState::ReadyToSwitchOn => Some(Self::SwitchOn),
            DriveState::OperationEnabled => Some(Self::DisableOperation),
            DriveState::NotReadyToSwitchOn | DriveState::QuickStopActive => {
                Some(Self::DisableVoltage)
            }
        }
    }
}

/// Mode-dependent status bits, `statusword >> 10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriveFlags(u16);

impl DriveFlags {
    pub const TARGET_REACHED: u16 = 0x01;
    pub const INTERNAL_LIMIT: u16 = 0x02;
    /// Homing attained in homing mode, set-point ack in profile position.
    pub const HOMING_ATTAINED: u16 = 0x04;
    pub const SETPOINT_ACK: u16 = 0x04;
    /// Homing error in homing mode, following error in position modes.
    pub const HOMING_ERROR: u16 = 0x08;
    pub const FOLLOWING_ERROR: u16 = 0x08;

    pub fn from_statusword(statusword: u16) -> Self {
        Self(statusword >> FLAGS_SHIFT)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn target_reached(self) -> bool {
        self.has(Self::TARGET_REACHED)
    }

    pub fn internal_limit(self) -> bool {
        self.has(Self::INTERNAL_LIMIT)
    }

    pub fn homing_attained(self) -> bool {
        self.has(Self::HOMING_ATTAINED)
    }

    pub fn homing_error(self) -> bool {
        self.has(Self::HOMING_ERROR)
    }

    pub fn setpoint_ack(self) -> bool {
        self.has(Self::SETPOINT_ACK)
    }

    pub fn following_error(self) -> bool {
        self.has(Self::FOLLOWING_ERROR)
    }
}

/// Homing sub-field of the statusword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HomingStatus {
    InProgress,
    Completed,
    Failed(HomingFailure),
}

impl HomingStatus {
    pub const MASK: u16 = sw::TARGET_REACHED | sw::HOMING_ATTAINED | sw::HOMING_ERROR;

    pub fn decode(statusword: u16) -> Self {
        match statusword & Self::MASK {
            0x0000 => Self::InProgress,
            0x1400 => Self::Completed,
            0x0400 => Self::Failed(HomingFailure::Interrupted),
            0x1000 => Self::Failed(HomingFailure::AttainedNotReached),
            0x2000 => Self::Failed(HomingFailure::ErrorVelocityNonZero),
            // 0x2400, plus the combinations the table leaves undefined
            _ => Self::Failed(HomingFailure::ErrorVelocityZero),
        }
    }
}

/// Operation modes with their CiA-402 codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationMode {
    OpenLoopVector,
    OpenLoopScalar,
    #[default]
    ProfilePosition,
    Velocity,
    ProfileVelocity,
    ProfileTorque,
    Homing,
    InterpolatedPosition,
    CyclicPosition,
    CyclicVelocity,
    CyclicTorque,
}

impl OperationMode {
    pub fn code(self) -> i8 {
        match self {
            Self::OpenLoopVector => -1,
            Self::OpenLoopScalar => -2,
            Self::ProfilePosition => 1,
            Self::Velocity => 2,
            Self::ProfileVelocity => 3,
            Self::ProfileTorque => 4,
            Self::Homing => 6,
            Self::InterpolatedPosition => 7,
            Self::CyclicPosition => 8,
            Self::CyclicVelocity => 9,
            Self::CyclicTorque => 10,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(Self::OpenLoopVector),
            -2 => Some(Self::OpenLoopScalar),
            1 => Some(Self::ProfilePosition),
            2 => Some(Self::Velocity),
            3 => Some(Self::ProfileVelocity),
            4 => Some(Self::ProfileTorque),
            6 => Some(Self::Homing),
            7 => Some(Self::InterpolatedPosition),
            8 => Some(Self::CyclicPosition),
            9 => Some(Self::CyclicVelocity),
            10 => Some(Self::CyclicTorque),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_table() {
        let cases = [
            (0x0000, DriveState::NotReadyToSwitchOn),
            (0x0040, DriveState::SwitchOnDisabled),
            (0x0250, DriveState::SwitchOnDisabled),
            (0x0021, DriveState::ReadyToSwitchOn),
            (0x0031, DriveState::ReadyToSwitchOn),
            (0x0023, DriveState::SwitchedOn),
            (0x0027, DriveState::OperationEnabled),
            (0x0637, DriveState::OperationEnabled),
            (0x0007, DriveState::QuickStopActive),
            (0x000F, DriveState::FaultReactionActive),
            (0x002F, DriveState::FaultReactionActive),
            (0x0008, DriveState::Fault),
            (0x0028, DriveState::Fault),
            (0x0001, DriveState::Unknown),
            (0x0041, DriveState::Unknown),
        ];
        for (statusword, state) in cases {
            assert_eq!(decode_state(statusword), state, "statusword {statusword:#06x}");
        }
    }

    #[test]
    fn test_command_values() {
        assert_eq!(PdsCommand::ShutDown.controlword(), 0x06);
        assert_eq!(PdsCommand::SwitchOn.controlword(), 0x07);
        assert_eq!(PdsCommand::SwitchOnAndEnableOperation.controlword(), 0x0F);
        assert_eq!(PdsCommand::DisableVoltage.controlword(), 0x00);
        assert_eq!(PdsCommand::QuickStop.controlword(), 0x02);
        assert_eq!(PdsCommand::DisableOperation.controlword(), 0x07);
        assert_eq!(PdsCommand::EnableOperation.controlword(), 0x0F);
        assert_eq!(PdsCommand::FaultReset.controlword(), 0x80);
    }

    #[test]
    fn test_enable_path() {
        assert_eq!(
            PdsCommand::towards_enabled(DriveState::SwitchOnDisabled),
            Some(PdsCommand::ShutDown)
        );
        assert_eq!(
            PdsCommand::towards_enabled(DriveState::ReadyToSwitchOn),
            Some(PdsCommand::SwitchOnAndEnableOperation)
        );
        assert_eq!(PdsCommand::towards_enabled(DriveState::Unknown), None);
        assert_eq!(PdsCommand::towards_enabled(DriveState::Fault), None);
        assert_eq!(
            PdsCommand::towards_switched_on(DriveState::OperationEnabled),
            Some(PdsCommand::DisableOperation)
        );
        assert_eq!(PdsCommand::towards_switched_on(DriveState::Unknown), None);
    }

    #[test]
    fn test_flags() {
        let flags = DriveFlags::from_statusword(0x1637);
        assert!(flags.target_reached());
        assert!(!flags.internal_limit());
        assert!(flags.setpoint_ack());
        assert!(!flags.following_error());
        assert_eq!(flags.bits(), 0x05);
    }

    #[test]
    fn test_homing_status() {
        assert_eq!(HomingStatus::decode(0x0237), HomingStatus::InProgress);
        assert_eq!(HomingStatus::decode(0x1637), HomingStatus::Completed);
        assert_eq!(
            HomingStatus::decode(0x0637),
            HomingStatus::Failed(HomingFailure::Interrupted)
        );
        assert_eq!(
            HomingStatus::decode(0x1237),
            HomingStatus::Failed(HomingFailure::AttainedNotReached)
        );
        assert_eq!(
            HomingStatus::decode(0x2237),
            HomingStatus::Failed(HomingFailure::ErrorVelocityNonZero)
        );
        assert_eq!(
            HomingStatus::decode(0x2637),
            HomingStatus::Failed(HomingFailure::ErrorVelocityZero)
        );
    }

    #[test]
    fn test_mode_codes() {
        for code in -2i8..=10 {
            if let Some(mode) = OperationMode::from_code(code) {
                assert_eq!(mode.code(), code);
            }
        }
        assert_eq!(OperationMode::from_code(5), None);
        assert_eq!(OperationMode::from_code(0), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_decode_is_deterministic(statusword in any::<u16>()) {
            let state = decode_state(statusword);
            prop_assert_eq!(state, decode_state(statusword));
            // Only state bits matter.
            prop_assert_eq!(state, decode_state(statusword & MASK_LONG));
        }

        #[test]
        fn prop_flags_are_high_bits(statusword in any::<u16>()) {
            prop_assert_eq!(DriveFlags::from_statusword(statusword).bits(), statusword >> 10);
        }
    }
}
