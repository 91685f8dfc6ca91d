//! Error taxonomy for the servolink crates
//!
//! Every public operation in the frame, transport and drive layers returns a
//! [`ServoError`]. The variants are the same for every physical transport, so
//! retry decisions do not depend on the backend in use.
//!
//! # Architecture
//!
//! - [`common`]: the top-level [`ServoError`] enum, its [`ErrorKind`] and
//!   [`ErrorSeverity`] classification
//! - [`io`]: detail carried by I/O failures (framing, CRC, NACK, confirm mismatch)
//! - [`homing`]: the distinct outcomes of a failed homing procedure
//! - [`context`]: attaching the failing operation to an error
//!
//! # Example
//!
//! ```
//! use servolink_errors::prelude::*;
//!
//! fn check_node(node: u16) -> Result<u16> {
//!     if node == 0 || node > 127 {
//!         return Err(ServoError::invalid_argument(format!("node {node} out of range")));
//!     }
//!     Ok(node)
//! }
//!
//! assert!(check_node(3).is_ok());
//! assert_eq!(check_node(200).unwrap_err().kind(), ErrorKind::InvalidArgument);
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod common;
pub mod context;
pub mod homing;
pub mod io;
pub mod prelude;

pub use common::{ErrorKind, ErrorSeverity, ServoError};
pub use context::{ErrorContext, ResultExt};
pub use homing::HomingFailure;
pub use io::IoFault;

/// A specialized `Result` type for servolink operations.
pub type Result<T> = std::result::Result<T, ServoError>;
