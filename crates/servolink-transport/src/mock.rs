//! In-memory channel and simulated drive for tests without hardware.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use servolink_errors::{Result, ServoError};
use servolink_frame::{Command, ParseOutcome, RegisterAddress, SerialFrame, SerialParser, SyncFrame, SyncParser};
use tracing::{debug, trace};

use crate::channel::{Channel, Connector};
use crate::enumerate::{PortEnumerator, PortInfo};
use crate::worker::{StopSignal, Worker};

#[derive(Debug, Default)]
struct Pipe {
    queue: Mutex<VecDeque<u8>>,
    cond: Condvar,
    closed: AtomicBool,
}

impl Pipe {
    fn push(&self, bytes: &[u8]) {
        self.queue.lock().extend(bytes.iter().copied());
        self.cond.notify_all();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Take the lock so a waiter cannot miss the notification.
        let _queue = self.queue.lock();
        self.cond.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One end of an in-memory duplex byte pipe.
#[derive(Debug)]
pub struct MockChannel {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockChannel {
    /// Two connected ends: bytes sent on one are received on the other.
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Pipe::default());
        let b = Arc::new(Pipe::default());
        (
            Self {
                rx: Arc::clone(&a),
                tx: Arc::clone(&b),
                sent: Mutex::new(Vec::new()),
            },
            Self {
                rx: b,
                tx: a,
                sent: Mutex::new(Vec::new()),
            },
        )
    }

    /// Make `bytes` arrive on this end as if the peer had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.rx.push(bytes);
    }

    /// Every buffer passed to `send`, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed() || self.tx.is_closed()
    }
}

impl Channel for MockChannel {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(ServoError::disconnected("mock channel closed"));
        }
        self.sent.lock().push(bytes.to_vec());
        self.tx.push(bytes);
        Ok(())
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.rx.queue.lock();
        loop {
            if !queue.is_empty() {
                let n = buf.len().min(queue.len());
                for (dst, src) in buf.iter_mut().zip(queue.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }
            if self.is_closed() {
                return Err(ServoError::disconnected("mock channel closed"));
            }
            if self.rx.cond.wait_until(&mut queue, deadline).timed_out() && queue.is_empty() {
                return if self.is_closed() {
                    Err(ServoError::disconnected("mock channel closed"))
                } else {
                    Ok(0)
                };
            }
        }
    }

    fn close(&self) {
        self.rx.close();
        self.tx.close();
    }
}

/// Frame family a [`VirtualDrive`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    AsyncSerial,
    Sync,
}

/// Register contents of a [`VirtualDrive`], keyed by node and address.
#[derive(Debug, Default)]
pub struct RegisterFile {
    values: HashMap<(u8, RegisterAddress), Vec<u8>>,
}

impl RegisterFile {
    pub fn get(&self, node: u8, address: RegisterAddress) -> Option<&[u8]> {
        self.values.get(&(node, address)).map(Vec::as_slice)
    }

    pub fn set(&mut self, node: u8, address: RegisterAddress, value: &[u8]) {
        self.values.insert((node, address), value.to_vec());
    }

    pub fn get_u16(&self, node: u8, address: RegisterAddress) -> Option<u16> {
        let bytes = self.get(node, address)?.get(..2)?;
        Some(u16::from_le_bytes([*bytes.first()?, *bytes.get(1)?]))
    }

    pub fn set_u16(&mut self, node: u8, address: RegisterAddress, value: u16) {
        self.set(node, address, &value.to_le_bytes());
    }

    /// Nodes holding `address`, ascending.
    fn nodes_with(&self, address: RegisterAddress) -> Vec<u8> {
        let mut nodes: Vec<u8> = self
            .values
            .keys()
            .filter(|(_, a)| *a == address)
            .map(|(n, _)| *n)
            .collect();
        nodes.sort_unstable();
        nodes
    }
}

/// Reaction to a host write, run after the value is stored.
pub type WriteHook = Arc<dyn Fn(&mut RegisterFile, u8, RegisterAddress, &[u8]) + Send + Sync>;

/// One recorded host write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub node: u8,
    pub address: RegisterAddress,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct DriveState {
    registers: RegisterFile,
    bulk: HashMap<(u8, RegisterAddress), Vec<u8>>,
    locked: HashSet<(u8, RegisterAddress)>,
    writes: Vec<WriteRecord>,
    silent: bool,
    hook: Option<WriteHook>,
}

/// Drive code returned for reads of registers that do not exist.
pub const NO_SUCH_OBJECT: u32 = 0x0602_0000;

/// Simulated drive serving one or more [`MockChannel`]s.
///
/// Async-serial drives also push a statusword frame whenever a write (or its
/// hook) changes the statusword register given by `statusword`.
pub struct VirtualDrive {
    protocol: Protocol,
    statusword: RegisterAddress,
    state: Arc<Mutex<DriveState>>,
    peers: Arc<Mutex<Vec<Arc<MockChannel>>>>,
    servers: Mutex<Vec<Worker>>,
}

impl VirtualDrive {
    pub fn new(protocol: Protocol) -> Self {
        let statusword = match protocol {
            Protocol::AsyncSerial => RegisterAddress::new(0x6041, 0),
            Protocol::Sync => RegisterAddress::new(crate::sync::STATUSWORD, 0),
        };
        Self {
            protocol,
            statusword,
            state: Arc::new(Mutex::new(DriveState::default())),
            peers: Arc::new(Mutex::new(Vec::new())),
            servers: Mutex::new(Vec::new()),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn set_register(&self, node: u8, address: RegisterAddress, value: &[u8]) {
        self.state.lock().registers.set(node, address, value);
    }

    pub fn register(&self, node: u8, address: RegisterAddress) -> Option<Vec<u8>> {
        self.state.lock().registers.get(node, address).map(<[u8]>::to_vec)
    }

    /// Block returned with the next read of `address`, synchronous protocol only.
    pub fn set_bulk(&self, node: u8, address: RegisterAddress, block: &[u8]) {
        self.state.lock().bulk.insert((node, address), block.to_vec());
    }

    pub fn bulk(&self, node: u8, address: RegisterAddress) -> Option<Vec<u8>> {
        self.state.lock().bulk.get(&(node, address)).cloned()
    }

    /// Accept writes to `address` without storing them.
    pub fn lock_register(&self, node: u8, address: RegisterAddress) {
        self.state.lock().locked.insert((node, address));
    }

    /// Stop answering requests.
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    pub fn on_write(&self, hook: WriteHook) {
        self.state.lock().hook = Some(hook);
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Send an unsolicited async-serial frame to every served channel.
    pub fn push(&self, node: u8, address: RegisterAddress, payload: &[u8]) -> Result<()> {
        let frame = SerialFrame::response(node, address, payload)?;
        for peer in self.peers.lock().iter() {
            if !peer.is_closed() {
                peer.send(frame.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Start answering requests arriving on `channel`.
    pub fn serve(&self, channel: MockChannel) -> Result<()> {
        let channel = Arc::new(channel);
        self.peers.lock().push(Arc::clone(&channel));
        let state = Arc::clone(&self.state);
        let protocol = self.protocol;
        let statusword = self.statusword;
        let worker = Worker::spawn("virtual-drive", move |stop| {
            serve_loop(protocol, statusword, &state, &channel, &stop);
        })?;
        self.servers.lock().push(worker);
        Ok(())
    }

    /// A host-side channel already connected to this drive.
    pub fn connect_channel(&self) -> Result<Arc<MockChannel>> {
        let (host, drive) = MockChannel::pair();
        self.serve(drive)?;
        Ok(Arc::new(host))
    }
}

impl Drop for VirtualDrive {
    fn drop(&mut self) {
        for peer in self.peers.lock().iter() {
            peer.close();
        }
        for mut worker in self.servers.lock().drain(..) {
            worker.stop();
        }
    }
}

fn serve_loop(
    protocol: Protocol,
    statusword: RegisterAddress,
    state: &Mutex<DriveState>,
    channel: &MockChannel,
    stop: &StopSignal,
) {
    let mut serial = SerialParser::new();
    let mut sync = SyncParser::new();
    let mut buf = [0u8; 256];
    while !stop.is_stopped() {
        let n = match channel.recv(&mut buf, Duration::from_millis(10)) {
            Ok(n) => n,
            Err(_) => return,
        };
        for &byte in buf.iter().take(n) {
            let replies = match protocol {
                Protocol::AsyncSerial => match serial.push(byte) {
                    ParseOutcome::Complete(frame) => answer_serial(state, statusword, &frame),
                    _ => Vec::new(),
                },
                Protocol::Sync => match sync.push(byte) {
                    ParseOutcome::Complete(frame) => answer_sync(state, &frame),
                    _ => Vec::new(),
                },
            };
            for reply in replies {
                if channel.send(&reply).is_err() {
                    return;
                }
            }
        }
    }
}

/// Store a host write and run the hook. Returns the statusword before and
/// after, for push-on-change.
fn apply_write(
    state: &mut DriveState,
    node: u8,
    address: RegisterAddress,
    data: &[u8],
    statusword: RegisterAddress,
) -> (Option<u16>, Option<u16>) {
    let before = state.registers.get_u16(node, statusword);
    state.writes.push(WriteRecord {
        node,
        address,
        data: data.to_vec(),
    });
    if !state.locked.contains(&(node, address)) {
        state.registers.set(node, address, data);
    }
    if let Some(hook) = state.hook.clone() {
        hook(&mut state.registers, node, address, data);
    }
    (before, state.registers.get_u16(node, statusword))
}

fn answer_serial(state: &Mutex<DriveState>, statusword: RegisterAddress, frame: &SerialFrame) -> Vec<Vec<u8>> {
    let mut state = state.lock();
    let node = frame.node();
    let address = frame.address();
    if frame.is_response() {
        let (before, after) = apply_write(&mut state, node, address, frame.payload(), statusword);
        return match after {
            Some(value) if before != after => SerialFrame::response(node, statusword, &value.to_le_bytes())
                .map(|f| vec![f.as_bytes().to_vec()])
                .unwrap_or_default(),
            _ => Vec::new(),
        };
    }
    if state.silent {
        return Vec::new();
    }
    let nodes = if node == crate::mailbox::ANY_NODE {
        state.registers.nodes_with(address)
    } else {
        vec![node]
    };
    nodes
        .into_iter()
        .filter_map(|n| {
            let value = state.registers.get(n, address)?;
            SerialFrame::response(n, address, value)
                .ok()
                .map(|f| f.as_bytes().to_vec())
        })
        .collect()
}

fn answer_sync(state: &Mutex<DriveState>, frame: &SyncFrame) -> Vec<Vec<u8>> {
    let mut state = state.lock();
    if state.silent {
        return Vec::new();
    }
    let subnode = frame.subnode();
    let address = RegisterAddress::new(frame.address(), 0);
    let reply = |command: Command, payload: &[u8]| {
        SyncFrame::new(frame.node(), subnode, frame.address(), command, payload)
    };
    let result = match frame.command() {
        Command::Read => {
            if let Some(block) = state.bulk.get(&(subnode, address)).cloned() {
                reply(Command::Ack, &[]).and_then(|f| f.with_bulk(block))
            } else if let Some(value) = state.registers.get(subnode, address) {
                let n = value.len().min(8);
                reply(Command::Ack, value.get(..n).unwrap_or_default())
            } else {
                reply(Command::ReadError, &NO_SUCH_OBJECT.to_be_bytes())
            }
        }
        Command::Write => {
            if frame.is_pending() {
                state.writes.push(WriteRecord {
                    node: subnode,
                    address,
                    data: frame.bulk().to_vec(),
                });
                state.bulk.insert((subnode, address), frame.bulk().to_vec());
            } else {
                let statusword = RegisterAddress::new(crate::sync::STATUSWORD, 0);
                apply_write(&mut state, subnode, address, frame.data(), statusword);
            }
            reply(Command::Ack, &[])
        }
        other => {
            debug!(command = ?other, "virtual drive ignores command");
            return Vec::new();
        }
    };
    match result {
        Ok(f) => vec![f.encode()],
        Err(err) => {
            trace!(error = %err, "virtual drive could not build reply");
            Vec::new()
        }
    }
}

/// Connector handing out channels to a [`VirtualDrive`]. Can be told to
/// refuse connections, to simulate an unreachable drive.
pub struct MockConnector {
    drive: Arc<VirtualDrive>,
    refuse: AtomicBool,
    connections: AtomicUsize,
    last: Mutex<Option<Arc<MockChannel>>>,
}

impl MockConnector {
    pub fn new(drive: Arc<VirtualDrive>) -> Self {
        Self {
            drive,
            refuse: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    /// Connections handed out so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Close the most recent channel, as if the cable were pulled.
    pub fn cut(&self) {
        if let Some(channel) = self.last.lock().as_ref() {
            channel.close();
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Arc<dyn Channel>> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(ServoError::disconnected("connection refused"));
        }
        let channel = self.drive.connect_channel()?;
        *self.last.lock() = Some(Arc::clone(&channel));
        self.connections.fetch_add(1, Ordering::AcqRel);
        Ok(channel)
    }
}

/// Enumerator returning a fixed port list.
#[derive(Debug, Clone, Default)]
pub struct MockPortEnumerator {
    ports: Vec<PortInfo>,
}

impl MockPortEnumerator {
    pub fn new(ports: Vec<PortInfo>) -> Self {
        Self { ports }
    }
}

impl PortEnumerator for MockPortEnumerator {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self.ports.clone())
    }
}
