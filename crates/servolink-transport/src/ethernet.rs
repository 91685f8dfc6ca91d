//! Synchronous protocol over TCP, with automatic reconnect.
//!
//! Unlike the other backends this one heals itself: after
//! `max_consecutive_failures` failed requests, counting the statusword polls
//! and caller requests alike, the socket is dropped, the link goes
//! `Disconnected` and a supervisor thread reconnects with exponential
//! backoff. Callers issuing requests during the outage get `Disconnected`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use servolink_errors::{ErrorKind, Result, ServoError};
use servolink_frame::RegisterAddress;
use servolink_frame::sync::SUBNODE_MOCO;
use tracing::{debug, error, info, warn};

use crate::bulk::BulkBuffer;
use crate::channel::{Connector, TcpConnector};
use crate::config::{EthernetConfig, ReconnectPolicy};
use crate::state::LinkState;
use crate::subscribers::{EmergencyCallback, SlotToken, StatuswordCallback};
use crate::sync::{SyncCore, is_link_failure};
use crate::transport::{Transport, confirm_write};
use crate::worker::{StopSignal, Worker};

/// Consecutive failed requests on the current link.
#[derive(Debug)]
struct FailureCounter {
    count: AtomicU32,
    limit: u32,
}

impl FailureCounter {
    fn new(limit: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            limit,
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Count one failure and return the new total.
    fn record(&self) -> u32 {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_add(1)))
            .unwrap_or_else(|n| n);
        previous.saturating_add(1)
    }

    fn tripped(&self) -> bool {
        self.count.load(Ordering::Acquire) >= self.limit
    }
}

pub struct EthernetTransport {
    core: Arc<SyncCore>,
    failures: Arc<FailureCounter>,
    reconnect: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    supervisor: Mutex<Option<Worker>>,
}

impl EthernetTransport {
    /// Transport opening TCP connections to `config.address`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `config` does not validate.
    pub fn new(config: EthernetConfig) -> Result<Self> {
        let connector = TcpConnector::new(config.address.clone(), config.connect_timeout());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Transport opening its channels through `connector`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `config` does not validate.
    pub fn with_connector(config: EthernetConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(SyncCore::new(config.sync)),
            failures: Arc::new(FailureCounter::new(config.reconnect.max_consecutive_failures)),
            reconnect: config.reconnect,
            connector,
            supervisor: Mutex::new(None),
        })
    }

    pub fn last_bulk(&self) -> BulkBuffer {
        self.core.last_bulk()
    }

    /// Open a channel and check that a drive answers on it.
    fn open_link(core: &SyncCore, connector: &dyn Connector) -> Result<()> {
        core.attach(connector.connect()?);
        let verified = core
            .read_product_code()
            .and_then(|product| {
                debug!(product = %format!("{product:#010x}"), "product code read");
                core.read_statusword(SUBNODE_MOCO)
            });
        if let Err(err) = verified {
            core.detach();
            return Err(err);
        }
        Ok(())
    }

    /// Retry [`Self::open_link`] until it succeeds, the policy gives up, or
    /// a stop is requested. Returns `true` once the link is back.
    fn reconnect(
        core: &SyncCore,
        failures: &FailureCounter,
        connector: &dyn Connector,
        policy: &ReconnectPolicy,
        stop: &StopSignal,
    ) -> bool {
        let mut attempt = 0;
        while policy.allows(attempt) {
            if stop.sleep(policy.delay(attempt)) {
                return false;
            }
            info!(attempt = attempt + 1, "reconnecting");
            match Self::open_link(core, connector) {
                Ok(()) => {
                    failures.reset();
                    core.state.set(LinkState::Connected);
                    info!("link restored");
                    return true;
                }
                Err(err) => warn!(attempt = attempt + 1, error = %err, "reconnect failed"),
            }
            attempt += 1;
        }
        error!(attempts = attempt, "giving up on reconnect - link faulty");
        core.state.set(LinkState::Faulty);
        false
    }

    /// Drop the socket and mark the link down.
    fn take_down(core: &SyncCore) {
        core.state.set(LinkState::Disconnected);
        core.detach();
    }

    fn supervise(
        core: &SyncCore,
        failures: &FailureCounter,
        connector: &dyn Connector,
        policy: &ReconnectPolicy,
        stop: &StopSignal,
    ) {
        let period = core.config.poll_period();
        while !stop.sleep(period) {
            if !failures.tripped() {
                match core.poll_statuswords() {
                    Ok(()) => {
                        failures.reset();
                        continue;
                    }
                    Err(err) => {
                        let count = failures.record();
                        warn!(failures = count, error = %err, "statusword poll failed");
                        if count < policy.max_consecutive_failures {
                            continue;
                        }
                    }
                }
            }
            warn!("link down - closing socket");
            Self::take_down(core);
            if !Self::reconnect(core, failures, connector, policy, stop) {
                return;
            }
        }
    }

    /// Feed a caller request's outcome into the failure count. A reply of
    /// any kind proves the link works; timeouts and I/O failures count.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.failures.reset(),
            Err(err) if err.kind() == ErrorKind::Timeout || is_link_failure(err) => {
                let count = self.failures.record();
                warn!(failures = count, error = %err, "request failed");
                if count == self.reconnect.max_consecutive_failures {
                    warn!("link down after failed requests - closing socket");
                    Self::take_down(&self.core);
                }
            }
            Err(_) => self.failures.reset(),
        }
        result
    }
}

impl Transport for EthernetTransport {
    fn connect(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return Err(ServoError::already_in_progress("already connected"));
        }
        Self::open_link(&self.core, self.connector.as_ref())?;
        self.failures.reset();
        self.core.state.set(LinkState::Connected);

        let core = Arc::clone(&self.core);
        let failures = Arc::clone(&self.failures);
        let connector = Arc::clone(&self.connector);
        let policy = self.reconnect;
        let spawned = Worker::spawn("servolink-eth-supervisor", move |stop| {
            Self::supervise(&core, &failures, connector.as_ref(), &policy, &stop);
        });
        match spawned {
            Ok(worker) => *supervisor = Some(worker),
            Err(err) => {
                self.core.detach();
                self.core.state.set(LinkState::Disconnected);
                return Err(err);
            }
        }
        info!("Ethernet transport connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let worker = self.supervisor.lock().take();
        if let Some(mut worker) = worker {
            // Closing first wakes a supervisor blocked in a poll.
            self.core.detach();
            worker.stop();
            // A reconnect racing the stop may have attached a fresh channel.
            self.core.detach();
            self.core.state.set(LinkState::Disconnected);
            info!("Ethernet transport disconnected");
        }
        Ok(())
    }

    fn state(&self) -> LinkState {
        self.core.state.get()
    }

    fn read(&self, node: u8, address: RegisterAddress, buf: &mut [u8]) -> Result<usize> {
        self.core.ensure_connected()?;
        self.track(self.core.read(node, address, buf))
    }

    fn write(&self, node: u8, address: RegisterAddress, data: &[u8], confirm: bool) -> Result<()> {
        self.core.ensure_connected()?;
        self.track(self.core.write(node, address, data))?;
        if confirm {
            confirm_write(self, node, address, data)?;
        }
        Ok(())
    }

    fn subscribe_statusword(&self, node: u8, callback: StatuswordCallback) -> Result<SlotToken> {
        self.core.statusword.subscribe(node, callback)
    }

    fn unsubscribe_statusword(&self, token: SlotToken) -> Result<()> {
        self.core.statusword.unsubscribe(token)
    }

    fn subscribe_emergency(&self, node: u8, callback: EmergencyCallback) -> Result<SlotToken> {
        self.core.emergency.subscribe(node, callback)
    }

    fn unsubscribe_emergency(&self, token: SlotToken) -> Result<()> {
        self.core.emergency.unsubscribe(token)
    }

    fn scan_nodes(&self) -> Result<Vec<u8>> {
        self.core.ensure_connected()?;
        self.track(self.core.read_product_code())?;
        Ok(self.core.config.subnodes.clone())
    }

    fn read_bulk(&self, node: u8, address: RegisterAddress) -> Result<Vec<u8>> {
        self.core.ensure_connected()?;
        self.track(self.core.read_bulk(node, address))
    }

    fn write_bulk(&self, node: u8, address: RegisterAddress, data: &[u8]) -> Result<()> {
        self.core.ensure_connected()?;
        self.track(self.core.write_bulk(node, address, data))
    }
}

impl Drop for EthernetTransport {
    fn drop(&mut self) {
        if self.supervisor.get_mut().is_some() {
            warn!("Ethernet transport dropped while still connected - forcing disconnect");
            if let Err(err) = self.disconnect() {
                warn!(error = %err, "disconnect on drop failed");
            }
        }
    }
}
