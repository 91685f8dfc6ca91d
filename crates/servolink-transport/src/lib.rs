//! Register transports for servo drives.
//!
//! A [`Transport`] moves register reads and writes between the host and the
//! drives on one physical link, and fans statusword and emergency updates
//! out to subscribers.
//!
//! # Architecture
//!
//! - [`serial::AsyncSerialTransport`]: async-serial frames. A listener thread
//!   parses the byte stream; replies complete the caller's pending request in
//!   the [`mailbox`], unsolicited statusword and emergency frames go to the
//!   [`subscribers`].
//! - [`sync::SyncTransport`]: synchronous request/response frames. Round
//!   trips happen on the caller's thread; a poller thread reads statuswords.
//! - [`ethernet::EthernetTransport`]: the synchronous protocol over TCP, with
//!   a supervisor that reconnects after repeated poll failures.
//!
//! Byte transport is abstracted behind [`Channel`], so links can be backed by
//! TCP sockets, application-supplied serial handles, or the in-memory
//! [`mock`] pipe used in tests.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(static_mut_refs)]

pub mod bulk;
pub mod channel;
pub mod config;
pub mod enumerate;
pub mod ethernet;
pub mod mailbox;
pub mod mock;
pub mod register;
pub mod serial;
pub mod state;
pub mod subscribers;
pub mod sync;
pub mod transport;
mod worker;

pub use bulk::{BulkBuffer, MonitoringLayout};
pub use channel::{Channel, Connector, StreamChannel, TcpChannel, TcpConnector};
pub use config::{EthernetConfig, ReconnectPolicy, SerialConfig, SyncConfig};
pub use enumerate::{PortEnumerator, PortInfo};
pub use ethernet::EthernetTransport;
pub use register::{
    Access, DataType, Dictionary, PhysicalUnit, RegisterDescriptor, RegisterRange,
    StaticDictionary, Value,
};
pub use serial::AsyncSerialTransport;
pub use state::LinkState;
pub use subscribers::{EmergencyCallback, SlotToken, StatuswordCallback};
pub use sync::SyncTransport;
pub use transport::{Transport, TransportExt};
