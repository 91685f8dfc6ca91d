//! Wire codecs for servo drive register access.
//!
//! This crate is I/O-free. It turns register requests into bytes and bytes
//! back into frames, and nothing else, so it can be tested and fuzzed without
//! a drive attached.
//!
//! Two frame families are supported:
//! - [`serial`]: the async-serial byte protocol. Variable length (17 to 27
//!   bytes), fixed function/type markers, 4 sync bytes as trailer. Drives push
//!   statusword and emergency frames unsolicited.
//! - [`sync`]: the synchronous register-access protocol used over serial,
//!   TCP and real-time Ethernet mailboxes. Seven 16-bit words protected by
//!   a CRC-16/CCITT, optionally followed by a size-prefixed bulk block.
//!
//! Both parsers consume one byte at a time and report a [`ParseOutcome`].

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(static_mut_refs)]

pub mod address;
pub mod crc;
pub mod error;
pub mod serial;
pub mod sync;

pub use address::RegisterAddress;
pub use crc::crc16_ccitt;
pub use error::{FrameError, FrameResult};
pub use serial::{SerialFrame, SerialParser};
pub use sync::{Command, SyncFrame, SyncParser};

/// Maximum payload carried by a single frame of either family.
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Result of pushing one byte into a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome<F> {
    /// The frame is not complete yet
    NeedMore,
    /// A full, validated frame was assembled; the parser is ready for the next one
    Complete(F),
    /// Validation failed; the parser restarted with the offending byte
    FramingError(FrameError),
}

impl<F> ParseOutcome<F> {
    /// Take the completed frame, if any.
    pub fn complete(self) -> Option<F> {
        match self {
            ParseOutcome::Complete(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Parse state of the async-serial parser.
///
/// Moves forward one byte at a time; any validation failure goes back to
/// [`ParseState::AwaitingFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    /// Waiting for the function code after the node byte
    #[default]
    AwaitingFunction,
    /// Waiting for the protocol sub-type byte
    AwaitingType,
    /// Collecting header bytes up to the declared payload length
    AwaitingLength,
    /// Collecting payload and trailer (sync bytes or CRC)
    AwaitingTrailer,
    /// A full frame is buffered
    Complete,
}
