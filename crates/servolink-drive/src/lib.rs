//! CiA-402 power drive system (PDS) control over servolink transports.
//!
//! A [`Drive`] binds one node of a [`servolink_transport::Transport`]. It
//! keeps the node's statusword cached from the transport's push or poll
//! updates and walks the PDS state machine by writing controlword commands
//! and waiting for the statusword to follow.
//!
//! ```text
//!   NotReadyToSwitchOn -> SwitchOnDisabled -> ReadyToSwitchOn
//!        -> SwitchedOn -> OperationEnabled
//!   any state -> FaultReactionActive -> Fault -> (fault reset) -> SwitchOnDisabled
//! ```
//!
//! Every blocking operation takes a budget. Multi-step operations spend one
//! [`Deadline`] across all their waits.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(static_mut_refs)]

pub mod config;
pub mod deadline;
pub mod drive;
pub mod emcy;
pub mod pds;
pub mod statusword;
pub mod units;

pub use config::{DriveConfig, DriveConfigBuilder, DriveRegisters};
pub use deadline::Deadline;
pub use drive::{Drive, StateCallback, StateToken};
pub use emcy::EmergencyQueue;
pub use pds::{DriveFlags, DriveState, HomingStatus, OperationMode, PdsCommand, decode_state};
pub use statusword::{Snapshot, StatuswordCache};
pub use units::{NativeUnits, ScaleFactor, UnitScale};
