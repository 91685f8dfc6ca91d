//! Async-serial backend.
//!
//! A listener thread assembles frames from the byte stream. Replies to the
//! caller's pending read complete its mailbox ticket; statusword and
//! emergency frames pushed by the drives go to the subscriber lists.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use servolink_errors::{Result, ServoError};
use servolink_frame::{ParseOutcome, RegisterAddress, SerialFrame, SerialParser};
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::config::SerialConfig;
use crate::mailbox::{ANY_NODE, Mailbox};
use crate::state::{LinkState, LinkStateCell};
use crate::subscribers::{EmergencyCallback, SlotToken, StatuswordCallback, SubscriberList};
use crate::transport::{Transport, confirm_write};
use crate::worker::{StopSignal, Worker};

/// Statusword, pushed by drives on change.
pub const STATUSWORD: RegisterAddress = RegisterAddress::new(0x6041, 0);
/// Emergency code, pushed by drives on fault.
pub const EMERGENCY: RegisterAddress = RegisterAddress::new(0x1003, 0x01);
/// UART configuration id, answered by every drive during a scan.
pub const UART_CONFIG_ID: RegisterAddress = RegisterAddress::new(0x2000, 0x01);
/// UART binary-mode switch.
pub const UART_CONFIG_BINARY: RegisterAddress = RegisterAddress::new(0x2000, 0x08);

/// ASCII command switching every drive on the bus to binary mode.
pub const SWITCH_TO_BINARY: &[u8] = b"\r0 W 0x82000 1\r";

/// How long the listener blocks in one channel read before checking for stop.
const LISTENER_TICK: std::time::Duration = std::time::Duration::from_millis(20);

struct Shared {
    channel: Arc<dyn Channel>,
    config: SerialConfig,
    state: LinkStateCell,
    mailbox: Mailbox,
    statusword: SubscriberList<u16>,
    emergency: SubscriberList<u32>,
}

impl Shared {
    fn handle_frame(&self, frame: &SerialFrame) {
        let node = frame.node();
        let address = frame.address();
        let payload = frame.payload();
        if self.mailbox.offer(node, address, payload) {
            return;
        }
        if address == STATUSWORD {
            if let Some(bytes) = payload.get(..2).and_then(|s| <[u8; 2]>::try_from(s).ok()) {
                self.statusword.dispatch(node, u16::from_le_bytes(bytes));
            }
        } else if address == EMERGENCY {
            if let Some(bytes) = payload.get(..4).and_then(|s| <[u8; 4]>::try_from(s).ok()) {
                let code = u32::from_le_bytes(bytes);
                debug!(node, code = %format!("{code:#010x}"), "emergency received");
                self.emergency.dispatch(node, code);
            }
        } else {
            debug!(node, %address, "unsolicited frame ignored");
        }
    }

    fn listen(&self, stop: &StopSignal) {
        let mut parser = SerialParser::new();
        let mut buf = vec![0u8; self.config.read_chunk];
        while !stop.is_stopped() {
            let n = match self.channel.recv(&mut buf, LISTENER_TICK) {
                Ok(n) => n,
                Err(err) => {
                    error!(error = %err, "async-serial listener I/O failure");
                    self.state.set(LinkState::Faulty);
                    self.mailbox
                        .close(ServoError::disconnected(format!("listener failed: {err}")));
                    return;
                }
            };
            for &byte in buf.iter().take(n) {
                match parser.push(byte) {
                    ParseOutcome::Complete(frame) => self.handle_frame(&frame),
                    ParseOutcome::FramingError(err) => debug!(error = %err, "noise discarded"),
                    ParseOutcome::NeedMore => {}
                }
            }
        }
    }
}

/// Transport for drives speaking the async-serial protocol.
pub struct AsyncSerialTransport {
    shared: Arc<Shared>,
    io: Mutex<()>,
    listener: Mutex<Option<Worker>>,
}

impl AsyncSerialTransport {
    /// # Errors
    ///
    /// `InvalidArgument` if `config` does not validate.
    pub fn new(channel: Arc<dyn Channel>, config: SerialConfig) -> Result<Self> {
        config.validate()?;
        let mailbox = Mailbox::new();
        mailbox.close(ServoError::disconnected("not connected"));
        Ok(Self {
            shared: Arc::new(Shared {
                channel,
                config,
                state: LinkStateCell::default(),
                mailbox,
                statusword: SubscriberList::new("statusword"),
                emergency: SubscriberList::new("emergency"),
            }),
            io: Mutex::new(()),
            listener: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.shared.config
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.shared.state.get() {
            LinkState::Connected => Ok(()),
            state => Err(ServoError::disconnected(format!("link is {state}"))),
        }
    }

    fn send_frame(&self, frame: &SerialFrame) -> Result<()> {
        self.shared.channel.send(frame.as_bytes())
    }
}

impl Transport for AsyncSerialTransport {
    fn connect(&self) -> Result<()> {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return Err(ServoError::already_in_progress("already connected"));
        }

        thread::sleep(self.shared.config.init_wait());
        self.shared.channel.send(SWITCH_TO_BINARY)?;
        // Drives that were mid-boot miss the first switch.
        for _ in 0..2 {
            let frame = SerialFrame::write_request(ANY_NODE, UART_CONFIG_BINARY, &[1])?;
            self.send_frame(&frame)?;
        }

        self.shared.mailbox.reopen();
        let shared = Arc::clone(&self.shared);
        *listener = Some(Worker::spawn("servolink-serial-listener", move |stop| {
            shared.listen(&stop);
        })?);
        self.shared.state.set(LinkState::Connected);
        info!("async-serial transport connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let worker = self.listener.lock().take();
        if let Some(mut worker) = worker {
            self.shared
                .mailbox
                .close(ServoError::disconnected("transport disconnected"));
            worker.stop();
            self.shared.state.set(LinkState::Disconnected);
            info!("async-serial transport disconnected");
        }
        Ok(())
    }

    fn state(&self) -> LinkState {
        self.shared.state.get()
    }

    fn read(&self, node: u8, address: RegisterAddress, buf: &mut [u8]) -> Result<usize> {
        let _io = self.io.lock();
        self.ensure_connected()?;
        let ticket = self.shared.mailbox.arm(node, address)?;
        self.send_frame(&SerialFrame::read_request(node, address))?;
        let payload = ticket.wait(self.shared.config.response_timeout())?;
        let n = payload.len().min(buf.len());
        buf.iter_mut().zip(&payload).for_each(|(dst, src)| *dst = *src);
        Ok(n)
    }

    fn write(&self, node: u8, address: RegisterAddress, data: &[u8], confirm: bool) -> Result<()> {
        let frame = SerialFrame::write_request(node, address, data)?;
        {
            let _io = self.io.lock();
            self.ensure_connected()?;
            self.send_frame(&frame)?;
        }
        if confirm {
            confirm_write(self, node, address, data)?;
        }
        Ok(())
    }

    fn subscribe_statusword(&self, node: u8, callback: StatuswordCallback) -> Result<SlotToken> {
        self.shared.statusword.subscribe(node, callback)
    }

    fn unsubscribe_statusword(&self, token: SlotToken) -> Result<()> {
        self.shared.statusword.unsubscribe(token)
    }

    fn subscribe_emergency(&self, node: u8, callback: EmergencyCallback) -> Result<SlotToken> {
        self.shared.emergency.subscribe(node, callback)
    }

    fn unsubscribe_emergency(&self, token: SlotToken) -> Result<()> {
        self.shared.emergency.unsubscribe(token)
    }

    fn scan_nodes(&self) -> Result<Vec<u8>> {
        let _io = self.io.lock();
        self.ensure_connected()?;
        let probe = SerialFrame::read_request(ANY_NODE, UART_CONFIG_ID);
        let mut nodes = Vec::new();
        // Drives answer the first probe after a cold boot with garbage.
        for pass in 0..2 {
            let collector = self.shared.mailbox.collect(UART_CONFIG_ID)?;
            self.send_frame(&probe)?;
            let replies = collector.gather(self.shared.config.scan_timeout());
            if pass == 0 {
                debug!(discarded = replies.len(), "first scan pass discarded");
                continue;
            }
            nodes = replies.into_iter().map(|(node, _)| node).collect();
        }
        nodes.sort_unstable();
        nodes.dedup();
        if nodes.is_empty() {
            warn!("scan found no drives");
        }
        Ok(nodes)
    }
}

impl Drop for AsyncSerialTransport {
    fn drop(&mut self) {
        if self.listener.get_mut().is_some() {
            warn!("async-serial transport dropped while still connected - forcing disconnect");
            if let Err(err) = self.disconnect() {
                warn!(error = %err, "disconnect on drop failed");
            }
        }
    }
}
