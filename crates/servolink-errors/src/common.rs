//! Top-level error type and its classification.
//!
//! [`ServoError`] carries one variant per failure class a caller can act on.
//! The numeric [`ErrorKind::code`] values are stable and negative, so the
//! errors can cross an integer-coded boundary (FFI, logs, telemetry) and be
//! recovered with [`ErrorKind::from_code`].

use core::fmt;

use crate::{HomingFailure, IoFault};

/// Errors returned by every servolink operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServoError {
    /// An argument was out of range or inconsistent with the register
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A wait ran out of budget before its condition held
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A buffer or queue could not grow
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// The resource is already taken (request slot, subscription)
    #[error("Already in progress: {0}")]
    AlreadyInProgress(String),

    /// The transport is not connected or the link dropped
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// The register access mode forbids the operation
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The drive or transport is in a state where the operation is illegal
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Framing, CRC, NACK, confirm mismatch or OS-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] IoFault),

    /// The backend does not implement the operation
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A reply arrived for a register other than the one requested
    #[error("Wrong register: expected {expected:#08x}, got {actual:#08x}")]
    WrongRegister {
        /// Address the request was issued for
        expected: u32,
        /// Address carried by the reply
        actual: u32,
    },

    /// The homing procedure ended without success
    #[error("Homing failed: {0}")]
    Homing(#[from] HomingFailure),
}

impl ServoError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServoError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ServoError::Timeout(_) => ErrorKind::Timeout,
            ServoError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            ServoError::AlreadyInProgress(_) => ErrorKind::AlreadyInProgress,
            ServoError::Disconnected(_) => ErrorKind::Disconnected,
            ServoError::AccessDenied(_) => ErrorKind::AccessDenied,
            ServoError::InvalidState(_) => ErrorKind::InvalidState,
            ServoError::Io(IoFault::Crc { .. }) => ErrorKind::WrongCrc,
            ServoError::Io(IoFault::Nack { .. }) => ErrorKind::Nack,
            ServoError::Io(_) => ErrorKind::Io,
            ServoError::NotSupported(_) => ErrorKind::NotSupported,
            ServoError::WrongRegister { .. } => ErrorKind::WrongRegister,
            ServoError::Homing(_) => ErrorKind::Failed,
        }
    }

    /// Get the stable numeric code of this error.
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    /// Get the error severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ServoError::Timeout(_) | ServoError::AlreadyInProgress(_) => ErrorSeverity::Warning,
            ServoError::Io(fault) => fault.severity(),
            ServoError::Disconnected(_) => ErrorSeverity::Critical,
            ServoError::NotSupported(_) => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if this error leaves the transport usable.
    pub fn is_recoverable(&self) -> bool {
        self.severity() < ErrorSeverity::Critical
    }

    /// Check if repeating the same call might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServoError::Timeout(_) | ServoError::AlreadyInProgress(_) => true,
            ServoError::Io(fault) => fault.is_transient(),
            _ => false,
        }
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ServoError::InvalidArgument(msg.into())
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        ServoError::Timeout(msg.into())
    }

    /// Create an already-in-progress error.
    #[must_use]
    pub fn already_in_progress(msg: impl Into<String>) -> Self {
        ServoError::AlreadyInProgress(msg.into())
    }

    /// Create a disconnected error.
    #[must_use]
    pub fn disconnected(msg: impl Into<String>) -> Self {
        ServoError::Disconnected(msg.into())
    }

    /// Create an access denied error.
    #[must_use]
    pub fn access_denied(msg: impl Into<String>) -> Self {
        ServoError::AccessDenied(msg.into())
    }

    /// Create an invalid state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ServoError::InvalidState(msg.into())
    }

    /// Create a not supported error.
    #[must_use]
    pub fn not_supported(msg: impl Into<String>) -> Self {
        ServoError::NotSupported(msg.into())
    }

    /// Create a framing error.
    #[must_use]
    pub fn framing(msg: impl Into<String>) -> Self {
        ServoError::Io(IoFault::Framing(msg.into()))
    }
}

impl From<std::io::Error> for ServoError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match e.kind() {
            Io::TimedOut | Io::WouldBlock => ServoError::Timeout(e.to_string()),
            Io::NotConnected
            | Io::BrokenPipe
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::UnexpectedEof => ServoError::Disconnected(e.to_string()),
            Io::OutOfMemory => ServoError::OutOfMemory(e.to_string()),
            Io::PermissionDenied => ServoError::AccessDenied(e.to_string()),
            _ => ServoError::Io(IoFault::Transport(e.to_string())),
        }
    }
}

/// Error kind, independent of the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic failure (homing outcome)
    Failed,
    /// Invalid argument
    InvalidArgument,
    /// Timeout
    Timeout,
    /// Out of memory
    OutOfMemory,
    /// Already in progress
    AlreadyInProgress,
    /// Disconnected
    Disconnected,
    /// Access denied
    AccessDenied,
    /// Invalid state
    InvalidState,
    /// Generic I/O failure
    Io,
    /// Not supported
    NotSupported,
    /// Wrong register in reply
    WrongRegister,
    /// CRC check failed
    WrongCrc,
    /// Drive refused the request
    Nack,
}

impl ErrorKind {
    const ALL: [ErrorKind; 13] = [
        ErrorKind::Failed,
        ErrorKind::InvalidArgument,
        ErrorKind::Timeout,
        ErrorKind::OutOfMemory,
        ErrorKind::AlreadyInProgress,
        ErrorKind::Disconnected,
        ErrorKind::AccessDenied,
        ErrorKind::InvalidState,
        ErrorKind::Io,
        ErrorKind::NotSupported,
        ErrorKind::WrongRegister,
        ErrorKind::WrongCrc,
        ErrorKind::Nack,
    ];

    /// Stable negative code for this kind.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Failed => -1,
            ErrorKind::InvalidArgument => -2,
            ErrorKind::Timeout => -3,
            ErrorKind::OutOfMemory => -4,
            ErrorKind::AlreadyInProgress => -5,
            ErrorKind::Disconnected => -6,
            ErrorKind::AccessDenied => -7,
            ErrorKind::InvalidState => -8,
            ErrorKind::Io => -9,
            ErrorKind::NotSupported => -10,
            ErrorKind::WrongRegister => -11,
            ErrorKind::WrongCrc => -12,
            ErrorKind::Nack => -13,
        }
    }

    /// Inverse of [`ErrorKind::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Iterate over all kinds.
    pub fn all() -> impl Iterator<Item = ErrorKind> {
        Self::ALL.into_iter()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Failed => "Failed",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::OutOfMemory => "OutOfMemory",
            ErrorKind::AlreadyInProgress => "AlreadyInProgress",
            ErrorKind::Disconnected => "Disconnected",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::Io => "IO",
            ErrorKind::NotSupported => "NotSupported",
            ErrorKind::WrongRegister => "WrongRegister",
            ErrorKind::WrongCrc => "WrongCrc",
            ErrorKind::Nack => "Nack",
        };
        f.write_str(name)
    }
}

/// Error severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ErrorSeverity {
    /// Informational, no action required
    Info = 0,
    /// Warning, the call may succeed if repeated
    Warning = 1,
    /// Error, operation failed
    Error = 2,
    /// Critical, the transport must be reconnected
    Critical = 3,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
    }

    #[test]
    fn test_kind_of_io_faults() {
        let crc: ServoError = IoFault::Crc {
            expected: 0x1234,
            actual: 0x4321,
        }
        .into();
        assert_eq!(crc.kind(), ErrorKind::WrongCrc);
        assert_eq!(crc.code(), -12);

        let nack: ServoError = IoFault::Nack { code: 0x0601_0000 }.into();
        assert_eq!(nack.kind(), ErrorKind::Nack);

        let mismatch: ServoError = IoFault::ContentMismatch.into();
        assert_eq!(mismatch.kind(), ErrorKind::Io);
        assert_eq!(mismatch.code(), -9);
    }

    #[test]
    fn test_io_error_mapping() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "no reply");
        assert_eq!(ServoError::from(timed_out).kind(), ErrorKind::Timeout);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        assert_eq!(ServoError::from(reset).kind(), ErrorKind::Disconnected);

        let other = std::io::Error::other("bad fd");
        assert_eq!(ServoError::from(other).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_disconnected_is_not_recoverable() {
        assert!(!ServoError::disconnected("link down").is_recoverable());
        assert!(ServoError::timeout("statusword").is_recoverable());
    }

    #[test]
    fn test_retryable() {
        assert!(ServoError::timeout("x").is_retryable());
        assert!(ServoError::framing("noise").is_retryable());
        assert!(!ServoError::Io(IoFault::ContentMismatch).is_retryable());
        assert!(!ServoError::invalid_state("fault").is_retryable());
    }

    #[test]
    fn test_from_code_unknown() {
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(-99), None);
        assert_eq!(ErrorKind::from_code(-8), Some(ErrorKind::InvalidState));
    }
}
