//! Single-slot mailbox correlating a caller's request with the listener's
//! reply.
//!
//! The caller arms the slot with the node and register it expects, sends its
//! request, then blocks on the returned [`Ticket`]. The listener offers every
//! decoded frame; a matching one completes the ticket. At most one ticket or
//! collector exists at a time.

use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use servolink_errors::{Result, ServoError};
use servolink_frame::RegisterAddress;
use tracing::trace;

/// Node id that matches replies from any node.
pub const ANY_NODE: u8 = 0;

#[derive(Debug)]
enum Slot {
    Idle,
    Waiting {
        node: u8,
        address: RegisterAddress,
    },
    Done(Result<Vec<u8>>),
    Collecting {
        address: RegisterAddress,
        tx: Sender<(u8, Vec<u8>)>,
    },
}

#[derive(Debug)]
struct Inner {
    slot: Slot,
    closed: bool,
}

#[derive(Debug)]
pub struct Mailbox {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

fn node_matches(expected: u8, node: u8) -> bool {
    expected == ANY_NODE || expected == node
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Idle,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn claim(&self, slot: Slot) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(ServoError::disconnected("transport is not connected"));
        }
        if !matches!(inner.slot, Slot::Idle) {
            return Err(ServoError::already_in_progress("a request is already pending"));
        }
        inner.slot = slot;
        Ok(())
    }

    /// Expect a reply from `node` (or [`ANY_NODE`]) for `address`.
    pub fn arm(&self, node: u8, address: RegisterAddress) -> Result<Ticket<'_>> {
        self.claim(Slot::Waiting { node, address })?;
        Ok(Ticket {
            mailbox: self,
            finished: false,
        })
    }

    /// Collect every reply for `address` until the collector is dropped.
    pub fn collect(&self, address: RegisterAddress) -> Result<Collector<'_>> {
        let (tx, rx) = unbounded();
        self.claim(Slot::Collecting { address, tx })?;
        Ok(Collector { mailbox: self, rx })
    }

    /// Hand a decoded reply to the mailbox. Returns `true` if it was consumed.
    pub fn offer(&self, node: u8, address: RegisterAddress, payload: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        let awaited = matches!(
            inner.slot,
            Slot::Waiting { node: expected, address: want }
                if want == address && node_matches(expected, node)
        );
        if awaited {
            inner.slot = Slot::Done(Ok(payload.to_vec()));
            self.cond.notify_all();
            return true;
        }
        match &inner.slot {
            Slot::Collecting { address: want, tx } if *want == address => {
                if tx.send((node, payload.to_vec())).is_err() {
                    trace!(node, "scan collector already gone");
                }
                true
            }
            _ => false,
        }
    }

    /// Fail a pending request with `err` and refuse new ones until
    /// [`Mailbox::reopen`].
    pub fn close(&self, err: ServoError) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        if matches!(inner.slot, Slot::Waiting { .. }) {
            inner.slot = Slot::Done(Err(err));
        }
        self.cond.notify_all();
    }

    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.closed = false;
        inner.slot = Slot::Idle;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.inner.lock().slot, Slot::Idle)
    }

    fn release(&self) {
        self.inner.lock().slot = Slot::Idle;
    }
}

/// An armed request. Dropping it without waiting frees the slot.
#[derive(Debug)]
pub struct Ticket<'a> {
    mailbox: &'a Mailbox,
    finished: bool,
}

impl Ticket<'_> {
    /// Block until the reply arrives or `timeout` elapses.
    pub fn wait(mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mailbox = self.mailbox;
        let mut inner = mailbox.inner.lock();
        // The slot is released under this lock; Drop must not touch it again.
        self.finished = true;
        loop {
            if matches!(inner.slot, Slot::Done(_)) {
                let slot = std::mem::replace(&mut inner.slot, Slot::Idle);
                if let Slot::Done(result) = slot {
                    return result;
                }
            }
            if mailbox.cond.wait_until(&mut inner, deadline).timed_out()
                && !matches!(inner.slot, Slot::Done(_))
            {
                inner.slot = Slot::Idle;
                return Err(ServoError::timeout(format!(
                    "no reply within {} ms",
                    timeout.as_millis()
                )));
            }
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.mailbox.release();
        }
    }
}

/// Receives every reply for one register, for scans.
#[derive(Debug)]
pub struct Collector<'a> {
    mailbox: &'a Mailbox,
    rx: Receiver<(u8, Vec<u8>)>,
}

impl Collector<'_> {
    /// Gather replies until `timeout` elapses.
    pub fn gather(&self, timeout: Duration) -> Vec<(u8, Vec<u8>)> {
        let deadline = Instant::now() + timeout;
        let mut replies = Vec::new();
        while let Ok(reply) = self.rx.recv_deadline(deadline) {
            replies.push(reply);
        }
        replies
    }
}

impl Drop for Collector<'_> {
    fn drop(&mut self) {
        self.mailbox.release();
    }
}
