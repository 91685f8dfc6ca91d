//! Frame codec error types.

use servolink_errors::{IoFault, ServoError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Payload of {actual} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unexpected function code: {0:#04x}")]
    UnexpectedFunction(u8),

    #[error("Unexpected protocol type: {0:#04x}")]
    UnexpectedType(u8),

    #[error("Frame synchronization failed")]
    SyncMismatch,

    #[error("CRC mismatch: computed {expected:#06x}, received {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Frame buffer full")]
    BufferFull,

    #[error("Invalid command code: {0}")]
    InvalidCommand(u8),

    #[error("Field out of range: {field} = {value:#x} (max {max:#x})")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

pub type FrameResult<T> = Result<T, FrameError>;

impl From<FrameError> for ServoError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::PayloadTooLarge { .. } | FrameError::FieldOutOfRange { .. } => {
                ServoError::InvalidArgument(e.to_string())
            }
            FrameError::CrcMismatch { expected, actual } => {
                ServoError::Io(IoFault::Crc { expected, actual })
            }
            other => ServoError::Io(IoFault::Framing(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servolink_errors::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = FrameError::InvalidLength {
            expected: 14,
            actual: 9,
        };
        assert_eq!(err.to_string(), "Invalid frame length: expected 14, got 9");
    }

    #[test]
    fn test_into_servo_error() {
        let crc: ServoError = FrameError::CrcMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(crc.kind(), ErrorKind::WrongCrc);

        let too_large: ServoError = FrameError::PayloadTooLarge { max: 8, actual: 9 }.into();
        assert_eq!(too_large.kind(), ErrorKind::InvalidArgument);

        let sync: ServoError = FrameError::SyncMismatch.into();
        assert_eq!(sync.kind(), ErrorKind::Io);
    }
}
