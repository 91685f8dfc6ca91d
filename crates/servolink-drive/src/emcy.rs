//! Bounded queue of emergency codes pushed by the drive.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use servolink_errors::{Result, ServoError};
use tracing::warn;

use crate::deadline::Deadline;

#[derive(Debug)]
struct Ring {
    codes: VecDeque<u32>,
    dropped: u64,
}

#[derive(Debug)]
pub struct EmergencyQueue {
    capacity: usize,
    ring: Mutex<Ring>,
    available: Condvar,
}

impl EmergencyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(Ring {
                codes: VecDeque::with_capacity(capacity.max(1)),
                dropped: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Append `code`, dropping the oldest entry when full.
    pub fn push(&self, code: u32) {
        let mut ring = self.ring.lock();
        if ring.codes.len() >= self.capacity
            && let Some(lost) = ring.codes.pop_front()
        {
            ring.dropped = ring.dropped.saturating_add(1);
            warn!(lost, "emergency queue full - oldest code dropped");
        }
        ring.codes.push_back(code);
        self.available.notify_one();
    }

    /// Pop the oldest code, waiting up to `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// `Timeout` if the queue stays empty.
    pub fn pop(&self, timeout: Duration) -> Result<u32> {
        let deadline = Deadline::after(timeout);
        let mut ring = self.ring.lock();
        loop {
            if let Some(code) = ring.codes.pop_front() {
                return Ok(code);
            }
            if self.available.wait_until(&mut ring, deadline.instant()).timed_out()
                && ring.codes.is_empty()
            {
                return Err(ServoError::timeout("no emergency received"));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Codes lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.ring.lock().dropped
    }
}
