//! Cached statusword with change notification.
//!
//! Written by the transport's dispatch thread, read and waited on by callers.
//! Every change of value bumps a generation counter, so a waiter that saw
//! generation `n` wakes for any later change even if the value came back.

use parking_lot::{Condvar, Mutex};
use servolink_errors::{Result, ServoError};

use crate::deadline::Deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub value: u16,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct StatuswordCache {
    current: Mutex<Snapshot>,
    changed: Condvar,
}

impl StatuswordCache {
    pub fn new(value: u16) -> Self {
        Self {
            current: Mutex::new(Snapshot {
                value,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> u16 {
        self.current.lock().value
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.current.lock()
    }

    /// Store `value`. Returns the previous value if it differed.
    pub fn update(&self, value: u16) -> Option<u16> {
        let mut current = self.current.lock();
        if current.value == value {
            return None;
        }
        let previous = current.value;
        current.value = value;
        current.generation = current.generation.wrapping_add(1);
        self.changed.notify_all();
        Some(previous)
    }

    /// Store `value` only if nothing changed since generation `seen`.
    /// Returns whether it was stored; waiters are not woken.
    pub fn seed(&self, seen: u64, value: u16) -> bool {
        let mut current = self.current.lock();
        if current.generation != seen {
            return false;
        }
        current.value = value;
        true
    }

    /// Block until the generation moves past `seen`.
    ///
    /// # Errors
    ///
    /// `Timeout` if `deadline` passes first.
    pub fn wait_change(&self, seen: u64, deadline: &Deadline) -> Result<Snapshot> {
        let mut current = self.current.lock();
        while current.generation == seen {
            deadline.remaining()?;
            if self.changed.wait_until(&mut current, deadline.instant()).timed_out()
                && current.generation == seen
            {
                return Err(ServoError::timeout("statusword did not change"));
            }
        }
        Ok(*current)
    }

    /// Block until `statusword & mask == value`.
    ///
    /// # Errors
    ///
    /// `Timeout` if `deadline` passes first.
    pub fn wait_value(&self, mask: u16, value: u16, deadline: &Deadline) -> Result<u16> {
        let mut current = self.current.lock();
        while current.value & mask != value {
            if self.changed.wait_until(&mut current, deadline.instant()).timed_out()
                && current.value & mask != value
            {
                return Err(ServoError::timeout(format!(
                    "statusword never matched {value:#06x} under mask {mask:#06x}"
                )));
            }
        }
        Ok(current.value)
    }
}
