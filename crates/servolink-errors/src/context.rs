//! Attaching operation context to errors.

use core::fmt;

use crate::ServoError;

/// Context information for errors.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// The operation that was being performed
    pub operation: String,
    /// Additional context key-value pairs
    pub context: Vec<(String, String)>,
}

impl ErrorContext {
    /// Create a new error context for an operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            context: Vec::new(),
        }
    }

    /// Add a context key-value pair.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        for (key, value) in &self.context {
            write!(f, ", {key}: {value}")?;
        }
        Ok(())
    }
}

impl ServoError {
    /// Prefix the message of this error with `ctx`, keeping its kind.
    ///
    /// Variants with structured payloads are returned unchanged.
    #[must_use]
    pub fn in_context(self, ctx: &ErrorContext) -> Self {
        let prefix = |msg: String| format!("{ctx}: {msg}");
        match self {
            ServoError::InvalidArgument(m) => ServoError::InvalidArgument(prefix(m)),
            ServoError::Timeout(m) => ServoError::Timeout(prefix(m)),
            ServoError::OutOfMemory(m) => ServoError::OutOfMemory(prefix(m)),
            ServoError::AlreadyInProgress(m) => ServoError::AlreadyInProgress(prefix(m)),
            ServoError::Disconnected(m) => ServoError::Disconnected(prefix(m)),
            ServoError::AccessDenied(m) => ServoError::AccessDenied(prefix(m)),
            ServoError::InvalidState(m) => ServoError::InvalidState(prefix(m)),
            ServoError::NotSupported(m) => ServoError::NotSupported(prefix(m)),
            other => other,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Errors
    ///
    /// Returns the original error, converted and annotated.
    fn context(self, ctx: ErrorContext) -> Result<T, ServoError>;

    /// Add context with an operation name.
    ///
    /// # Errors
    ///
    /// Returns the original error, converted and annotated.
    fn with_context(self, operation: impl Into<String>) -> Result<T, ServoError>;
}

impl<T, E: Into<ServoError>> ResultExt<T> for Result<T, E> {
    fn context(self, ctx: ErrorContext) -> Result<T, ServoError> {
        self.map_err(|e| e.into().in_context(&ctx))
    }

    fn with_context(self, operation: impl Into<String>) -> Result<T, ServoError> {
        self.context(ErrorContext::new(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, IoFault};

    #[test]
    fn test_context_keeps_kind() {
        let result: Result<(), ServoError> = Err(ServoError::timeout("no reply"));
        let err = match result.with_context("read statusword") {
            Err(e) => e,
            Ok(()) => return,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(
            err.to_string(),
            "Operation timed out: read statusword: no reply"
        );
    }

    #[test]
    fn test_structured_variant_unchanged() {
        let err = ServoError::Io(IoFault::ContentMismatch)
            .in_context(&ErrorContext::new("write").with("address", "0x6040"));
        assert_eq!(err, ServoError::Io(IoFault::ContentMismatch));
    }

    #[test]
    fn test_context_display() {
        let ctx = ErrorContext::new("write")
            .with("node", "1")
            .with("address", "0x006040");
        assert_eq!(ctx.to_string(), "write, node: 1, address: 0x006040");
    }
}
