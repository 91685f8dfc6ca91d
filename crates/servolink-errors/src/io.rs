//! Detail carried by [`ServoError::Io`](crate::ServoError::Io).

use crate::ErrorSeverity;

/// Reason an exchange with the drive failed at the byte or frame level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IoFault {
    /// Bytes on the wire do not form a valid frame
    #[error("framing error: {0}")]
    Framing(String),

    /// The frame CRC does not match its content
    #[error("CRC mismatch: computed {expected:#06x}, received {actual:#06x}")]
    Crc {
        /// CRC computed over the received words
        expected: u16,
        /// CRC carried by the frame
        actual: u16,
    },

    /// The drive answered with an error command instead of an acknowledge
    #[error("communications error (NACK -> {code:#010x})")]
    Nack {
        /// Drive-specific error code from the reply payload
        code: u32,
    },

    /// A confirmed write read back different content
    #[error("write failed (content mismatch)")]
    ContentMismatch,

    /// The OS channel (serial port, socket) failed
    #[error("transport failure: {0}")]
    Transport(String),
}

impl IoFault {
    /// Get the severity of this fault.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            IoFault::Framing(_) | IoFault::Crc { .. } => ErrorSeverity::Warning,
            IoFault::Nack { .. } | IoFault::ContentMismatch => ErrorSeverity::Error,
            IoFault::Transport(_) => ErrorSeverity::Critical,
        }
    }

    /// Line noise that a second attempt may not see.
    pub fn is_transient(&self) -> bool {
        matches!(self, IoFault::Framing(_) | IoFault::Crc { .. })
    }
}
