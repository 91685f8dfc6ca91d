//! Synchronous request/response backend.
//!
//! Every register access is one request frame and one reply frame, done on
//! the caller's thread under a lock held for the full round trip. Drives never
//! push on these links, so a poller thread reads the statusword of each
//! configured subnode and feeds the subscriber lists instead.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use servolink_errors::{ErrorKind, IoFault, Result, ServoError};
use servolink_frame::sync::{MAX_ADDRESS, SUBNODE_COCO};
use servolink_frame::{Command, ParseOutcome, RegisterAddress, SyncFrame, SyncParser};
use tracing::{debug, error, info, trace, warn};

use crate::bulk::BulkBuffer;
use crate::channel::Channel;
use crate::config::SyncConfig;
use crate::state::{LinkState, LinkStateCell};
use crate::subscribers::{EmergencyCallback, SlotToken, StatuswordCallback, SubscriberList};
use crate::transport::{Transport, confirm_write};
use crate::worker::{StopSignal, Worker};

/// Statusword on the motion subnode.
pub const STATUSWORD: u16 = 0x0011;
/// Controlword on the motion subnode.
pub const CONTROLWORD: u16 = 0x0010;
/// Product code on the communication subnode.
pub const PRODUCT_CODE: u16 = 0x06E1;
/// Vendor id on the communication subnode.
pub const VENDOR_ID: u16 = 0x06E0;

/// Leftover bytes drained before a request are capped at this many reads.
const MAX_DRAIN_READS: usize = 16;

/// Map a register address onto the 12-bit synchronous address field.
pub fn sync_address(address: RegisterAddress) -> Result<u16> {
    let index = address.index();
    if address.subindex() != 0 || index > MAX_ADDRESS {
        return Err(ServoError::invalid_argument(format!(
            "register {address} does not fit a synchronous frame"
        )));
    }
    Ok(index)
}

/// Whether `err` means the link itself is gone.
pub(crate) fn is_link_failure(err: &ServoError) -> bool {
    matches!(err, ServoError::Disconnected(_) | ServoError::Io(IoFault::Transport(_)))
}

/// Round-trip machinery shared by the serial and Ethernet flavours.
pub(crate) struct SyncCore {
    pub(crate) config: SyncConfig,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    io: Mutex<()>,
    pub(crate) state: LinkStateCell,
    pub(crate) statusword: SubscriberList<u16>,
    pub(crate) emergency: SubscriberList<u32>,
    bulk: Mutex<BulkBuffer>,
}

impl SyncCore {
    pub(crate) fn new(config: SyncConfig) -> Self {
        Self {
            config,
            channel: RwLock::new(None),
            io: Mutex::new(()),
            state: LinkStateCell::default(),
            statusword: SubscriberList::new("statusword"),
            emergency: SubscriberList::new("emergency"),
            bulk: Mutex::new(BulkBuffer::default()),
        }
    }

    pub(crate) fn attach(&self, channel: Arc<dyn Channel>) {
        *self.channel.write() = Some(channel);
    }

    /// Drop the channel, closing it so a caller blocked in `recv` wakes up.
    pub(crate) fn detach(&self) {
        if let Some(channel) = self.channel.write().take() {
            channel.close();
        }
    }

    fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.channel
            .read()
            .clone()
            .ok_or_else(|| ServoError::disconnected("no channel attached"))
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        match self.state.get() {
            LinkState::Connected => Ok(()),
            state => Err(ServoError::disconnected(format!("link is {state}"))),
        }
    }

    fn drain(channel: &dyn Channel, buf: &mut [u8]) -> Result<()> {
        for _ in 0..MAX_DRAIN_READS {
            let n = channel.recv(buf, std::time::Duration::ZERO)?;
            if n == 0 {
                break;
            }
            trace!(bytes = n, "stale bytes drained");
        }
        Ok(())
    }

    /// Send `request` and return its validated reply.
    pub(crate) fn transfer(&self, request: &SyncFrame) -> Result<SyncFrame> {
        let _io = self.io.lock();
        let channel = self.channel()?;
        let mut buf = [0u8; 64];
        Self::drain(channel.as_ref(), &mut buf)?;
        channel.send(&request.encode())?;

        let timeout = self.config.response_timeout();
        let deadline = Instant::now() + timeout;
        let mut parser = SyncParser::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServoError::timeout(format!(
                    "no reply to {:#05x} within {} ms",
                    request.address(),
                    timeout.as_millis()
                )));
            }
            let n = channel.recv(&mut buf, remaining)?;
            for &byte in buf.iter().take(n) {
                match parser.push(byte) {
                    ParseOutcome::Complete(reply) => return Self::check_reply(request, reply),
                    ParseOutcome::FramingError(err) => debug!(error = %err, "reply resync"),
                    ParseOutcome::NeedMore => {}
                }
            }
        }
    }

    fn check_reply(request: &SyncFrame, reply: SyncFrame) -> Result<SyncFrame> {
        if reply.command() != Command::Ack {
            let code = reply.nack_code().unwrap_or_default();
            warn!(
                address = %format!("{:#05x}", request.address()),
                code = %format!("{code:#010x}"),
                "drive refused request"
            );
            return Err(ServoError::Io(IoFault::Nack { code }));
        }
        if reply.address() != request.address() {
            return Err(ServoError::WrongRegister {
                expected: u32::from(request.address()),
                actual: u32::from(reply.address()),
            });
        }
        Ok(reply)
    }

    fn request(&self, subnode: u8, address: u16, command: Command, payload: &[u8]) -> Result<SyncFrame> {
        Ok(SyncFrame::new(self.config.node, subnode, address, command, payload)?)
    }

    pub(crate) fn read(&self, subnode: u8, address: RegisterAddress, buf: &mut [u8]) -> Result<usize> {
        let address = sync_address(address)?;
        let reply = self.transfer(&self.request(subnode, address, Command::Read, &[])?)?;
        if reply.is_pending() {
            let bulk = reply.bulk().to_vec();
            self.bulk.lock().store(address, bulk);
        }
        let data = reply.data();
        let n = data.len().min(buf.len());
        buf.iter_mut().zip(data.iter()).for_each(|(dst, src)| *dst = *src);
        Ok(n)
    }

    pub(crate) fn write(&self, subnode: u8, address: RegisterAddress, data: &[u8]) -> Result<()> {
        let address = sync_address(address)?;
        self.transfer(&self.request(subnode, address, Command::Write, data)?)?;
        Ok(())
    }

    pub(crate) fn read_bulk(&self, subnode: u8, address: RegisterAddress) -> Result<Vec<u8>> {
        let address = sync_address(address)?;
        let reply = self.transfer(&self.request(subnode, address, Command::Read, &[])?)?;
        if !reply.is_pending() {
            return Err(ServoError::framing(format!(
                "reply from {address:#05x} carries no bulk block"
            )));
        }
        let bulk = reply.into_bulk();
        self.bulk.lock().store(address, bulk.clone());
        Ok(bulk)
    }

    pub(crate) fn write_bulk(&self, subnode: u8, address: RegisterAddress, data: &[u8]) -> Result<()> {
        let address = sync_address(address)?;
        let frame = self
            .request(subnode, address, Command::Write, &[])?
            .with_bulk(data.to_vec())?;
        self.transfer(&frame)?;
        Ok(())
    }

    pub(crate) fn last_bulk(&self) -> BulkBuffer {
        self.bulk.lock().clone()
    }

    pub(crate) fn read_statusword(&self, subnode: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(subnode, RegisterAddress::new(STATUSWORD, 0), &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub(crate) fn read_product_code(&self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(SUBNODE_COCO, RegisterAddress::new(PRODUCT_CODE, 0), &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read every configured statusword once and dispatch it.
    ///
    /// A failed subnode does not hold back the others; the first error is
    /// returned once the cycle is over. A lost link ends the cycle early.
    pub(crate) fn poll_statuswords(&self) -> Result<()> {
        let mut first_error = None;
        for &subnode in &self.config.subnodes {
            match self.read_statusword(subnode) {
                Ok(value) => {
                    self.statusword.dispatch(subnode, value);
                }
                Err(err) if is_link_failure(&err) => return Err(err),
                Err(err) => {
                    debug!(subnode, error = %err, "statusword read failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Transport for drives speaking the synchronous protocol over a serial or
/// other byte-stream channel.
pub struct SyncTransport {
    core: Arc<SyncCore>,
    poller: Mutex<Option<Worker>>,
}

impl SyncTransport {
    /// # Errors
    ///
    /// `InvalidArgument` if `config` does not validate.
    pub fn new(channel: Arc<dyn Channel>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let core = SyncCore::new(config);
        core.attach(channel);
        Ok(Self {
            core: Arc::new(core),
            poller: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.core.config
    }

    /// The most recent bulk block received.
    pub fn last_bulk(&self) -> BulkBuffer {
        self.core.last_bulk()
    }

    /// Turn link failures into the `Faulty` state.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result
            && is_link_failure(err)
            && self.core.state.set(LinkState::Faulty) == LinkState::Connected
        {
            error!(error = %err, "synchronous link failed");
        }
        result
    }

    fn poll_loop(core: &SyncCore, stop: &StopSignal) {
        let period = core.config.poll_period();
        while !stop.sleep(period) {
            match core.poll_statuswords() {
                Ok(()) => {}
                Err(err) if is_link_failure(&err) => {
                    error!(error = %err, "statusword poll failed - link faulty");
                    core.state.set(LinkState::Faulty);
                    return;
                }
                Err(err) if err.kind() == ErrorKind::Timeout => {
                    debug!(error = %err, "statusword poll timed out");
                }
                Err(err) => warn!(error = %err, "statusword poll failed"),
            }
        }
    }
}

impl Transport for SyncTransport {
    fn connect(&self) -> Result<()> {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return Err(ServoError::already_in_progress("already connected"));
        }
        self.core.state.set(LinkState::Connected);
        let core = Arc::clone(&self.core);
        match Worker::spawn("servolink-sync-poller", move |stop| {
            Self::poll_loop(&core, &stop);
        }) {
            Ok(worker) => *poller = Some(worker),
            Err(err) => {
                self.core.state.set(LinkState::Disconnected);
                return Err(err);
            }
        }
        info!(node = self.core.config.node, "synchronous transport connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let worker = self.poller.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
            self.core.state.set(LinkState::Disconnected);
            info!("synchronous transport disconnected");
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
        let product = self.track(self.core.read_product_code())?;
        debug!(product = %format!("{product:#010x}"), "drive answered scan");
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

impl Drop for SyncTransport {
    fn drop(&mut self) {
        if self.poller.get_mut().is_some() {
            warn!("synchronous transport dropped while still connected - forcing disconnect");
            if let Err(err) = self.disconnect() {
                warn!(error = %err, "disconnect on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_address_limits() {
        assert_eq!(sync_address(RegisterAddress::new(0x011, 0)).ok(), Some(0x011));
        assert!(sync_address(RegisterAddress::new(0x1000, 0)).is_err());
        assert!(sync_address(RegisterAddress::new(0x011, 1)).is_err());
    }

    #[test]
    fn test_link_failure_classification() {
        assert!(is_link_failure(&ServoError::disconnected("gone")));
        assert!(is_link_failure(&ServoError::Io(IoFault::Transport("reset".into()))));
        assert!(!is_link_failure(&ServoError::timeout("slow")));
        assert!(!is_link_failure(&ServoError::Io(IoFault::Nack { code: 1 })));
    }
}
