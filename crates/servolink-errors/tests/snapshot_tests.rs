//! Snapshot tests for error messages.

use insta::assert_snapshot;
use servolink_errors::{HomingFailure, IoFault, ServoError};

#[test]
fn test_snapshot_wrong_register() {
    let err = ServoError::WrongRegister {
        expected: 0x0011,
        actual: 0x06E1,
    };
    assert_snapshot!(err.to_string(), @"Wrong register: expected 0x000011, got 0x0006e1");
}

#[test]
fn test_snapshot_crc() {
    let err = ServoError::Io(IoFault::Crc {
        expected: 0xBEEF,
        actual: 0x0001,
    });
    assert_snapshot!(err.to_string(), @"I/O error: CRC mismatch: computed 0xbeef, received 0x0001");
}

#[test]
fn test_snapshot_homing() {
    let err = ServoError::Homing(HomingFailure::AttainedNotReached);
    assert_snapshot!(err.to_string(), @"Homing failed: homing is attained, but target is not reached");
}

#[test]
fn test_snapshot_confirm_mismatch() {
    let err = ServoError::Io(IoFault::ContentMismatch);
    assert_snapshot!(err.to_string(), @"I/O error: write failed (content mismatch)");
}
