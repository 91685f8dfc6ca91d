//! Prelude module for convenient error handling imports.
//!
//! ```
//! use servolink_errors::ensure_arg;
//! use servolink_errors::prelude::*;
//!
//! fn timeout_ms(ms: u64) -> Result<u64> {
//!     ensure_arg!(ms > 0, "timeout must be greater than 0");
//!     Ok(ms)
//! }
//!
//! assert!(timeout_ms(0).is_err());
//! ```

pub use crate::{
    Result,
    common::{ErrorKind, ErrorSeverity, ServoError},
    context::{ErrorContext, ResultExt},
    homing::HomingFailure,
    io::IoFault,
};

/// Return `ServoError::InvalidArgument` unless the condition holds.
#[macro_export]
macro_rules! ensure_arg {
    ($condition:expr, $($msg:tt)+) => {
        if !$condition {
            return Err($crate::ServoError::invalid_argument(format!($($msg)+)).into());
        }
    };
}

/// Build an [`ErrorContext`](crate::ErrorContext) from an operation and key-value pairs.
#[macro_export]
macro_rules! error_context {
    ($operation:expr $(, $key:expr => $value:expr)* $(,)?) => {
        {
            let ctx = $crate::ErrorContext::new($operation);
            $(
                let ctx = ctx.with($key, $value);
            )*
            ctx
        }
    };
}
