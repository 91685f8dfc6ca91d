//! Transport configuration.
//!
//! Every timeout is stored in milliseconds so the structs serialize to plain
//! numbers. These values only apply when the application does not override
//! them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use servolink_errors::{Result, ServoError};
use servolink_frame::sync::{DEFAULT_NODE, MAX_NODE, MAX_SUBNODE, SUBNODE_MOCO};

/// Async-serial backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Wait for a read reply, in milliseconds.
    pub response_timeout_ms: u64,
    /// Settle time before the switch-to-binary sequence, in milliseconds.
    pub init_wait_ms: u64,
    /// How long a node scan collects replies, in milliseconds.
    pub scan_timeout_ms: u64,
    /// Bytes requested from the channel per listener iteration.
    pub read_chunk: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 100,
            init_wait_ms: 500,
            scan_timeout_ms: 1000,
            read_chunk: 64,
        }
    }
}

impl SerialConfig {
    #[must_use]
    pub fn builder() -> SerialConfigBuilder {
        SerialConfigBuilder::default()
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` if a timeout or the read chunk is zero.
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(ServoError::invalid_argument("response_timeout_ms must be non-zero"));
        }
        if self.scan_timeout_ms == 0 {
            return Err(ServoError::invalid_argument("scan_timeout_ms must be non-zero"));
        }
        if self.read_chunk == 0 {
            return Err(ServoError::invalid_argument("read_chunk must be non-zero"));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn init_wait(&self) -> Duration {
        Duration::from_millis(self.init_wait_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

#[derive(Debug, Default)]
pub struct SerialConfigBuilder {
    config: SerialConfig,
}

impl SerialConfigBuilder {
    #[must_use]
    pub fn response_timeout_ms(mut self, ms: u64) -> Self {
        self.config.response_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn init_wait_ms(mut self, ms: u64) -> Self {
        self.config.init_wait_ms = ms;
        self
    }

    #[must_use]
    pub fn scan_timeout_ms(mut self, ms: u64) -> Self {
        self.config.scan_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.config.read_chunk = bytes;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<SerialConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Synchronous backend configuration, shared by the serial and Ethernet
/// flavours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Wait for a reply frame, in milliseconds.
    pub response_timeout_ms: u64,
    /// Statusword polling period, in milliseconds.
    pub poll_period_ms: u64,
    /// Subnodes whose statusword is polled.
    pub subnodes: Vec<u8>,
    /// Node id placed in every request header.
    pub node: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 400,
            poll_period_ms: 500,
            subnodes: vec![SUBNODE_MOCO],
            node: DEFAULT_NODE,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero timeout or period, or for a node
    /// or subnode that does not fit its header field.
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(ServoError::invalid_argument("response_timeout_ms must be non-zero"));
        }
        if self.poll_period_ms == 0 {
            return Err(ServoError::invalid_argument("poll_period_ms must be non-zero"));
        }
        if self.node > MAX_NODE {
            return Err(ServoError::invalid_argument(format!(
                "node {:#x} exceeds {MAX_NODE:#x}",
                self.node
            )));
        }
        if let Some(bad) = self.subnodes.iter().find(|&&s| s > MAX_SUBNODE) {
            return Err(ServoError::invalid_argument(format!(
                "subnode {bad} exceeds {MAX_SUBNODE}"
            )));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }
}

#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    #[must_use]
    pub fn response_timeout_ms(mut self, ms: u64) -> Self {
        self.config.response_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn poll_period_ms(mut self, ms: u64) -> Self {
        self.config.poll_period_ms = ms;
        self
    }

    #[must_use]
    pub fn subnodes(mut self, subnodes: Vec<u8>) -> Self {
        self.config.subnodes = subnodes;
        self
    }

    #[must_use]
    pub fn node(mut self, node: u16) -> Self {
        self.config.node = node;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Reconnect behaviour of the Ethernet backend.
///
/// After `max_consecutive_failures` failed requests the link is declared down
/// and reconnect attempts start, waiting `backoff_ms`, then twice that, and
/// so on up to `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_consecutive_failures: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// `None` keeps trying until the transport is disconnected.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 7,
            backoff_ms: 1000,
            max_backoff_ms: 8000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the failure threshold is zero or the
    /// backoff cap is below the initial backoff.
    pub fn validate(&self) -> Result<()> {
        if self.max_consecutive_failures == 0 {
            return Err(ServoError::invalid_argument(
                "max_consecutive_failures must be non-zero",
            ));
        }
        if self.max_backoff_ms < self.backoff_ms {
            return Err(ServoError::invalid_argument(
                "max_backoff_ms must not be below backoff_ms",
            ));
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Whether attempt `attempt` (zero-based) is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Ethernet backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EthernetConfig {
    /// `host:port` of the drive.
    pub address: String,
    /// TCP connect timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub sync: SyncConfig,
}

/// TCP port drives listen on for register access.
pub const DEFAULT_PORT: u16 = 1061;

impl Default for EthernetConfig {
    fn default() -> Self {
        Self {
            address: format!("192.168.2.22:{DEFAULT_PORT}"),
            connect_timeout_ms: 2000,
            reconnect: ReconnectPolicy::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl EthernetConfig {
    #[must_use]
    pub fn builder() -> EthernetConfigBuilder {
        EthernetConfigBuilder::default()
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty address, a zero connect timeout
    /// or an invalid nested policy or sync configuration.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(ServoError::invalid_argument("address must not be empty"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ServoError::invalid_argument("connect_timeout_ms must be non-zero"));
        }
        self.reconnect.validate()?;
        self.sync.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Default)]
pub struct EthernetConfigBuilder {
    config: EthernetConfig,
}

impl EthernetConfigBuilder {
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    #[must_use]
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    #[must_use]
    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<EthernetConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
