//! Per-node subscriber lists for unsolicited register updates.
//!
//! Slots live in a dense vector with a free-list; a [`SlotToken`] is the
//! index handed back to the subscriber. Callbacks run on the dispatching
//! thread (listener or poller) after the list lock is released, so a callback
//! may subscribe or unsubscribe without deadlocking. They must still be fast.

use std::sync::Arc;

use parking_lot::Mutex;
use servolink_errors::{Result, ServoError};

/// Callback invoked with `(node, value)`.
pub type Callback<T> = Arc<dyn Fn(u8, T) + Send + Sync>;

/// Statusword change callback.
pub type StatuswordCallback = Callback<u16>;
/// Emergency code callback.
pub type EmergencyCallback = Callback<u32>;

/// Capability returned by `subscribe`, required to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotToken(usize);

impl SlotToken {
    pub fn index(self) -> usize {
        self.0
    }
}

struct Slot<T> {
    node: u8,
    callback: Callback<T>,
}

struct Slots<T> {
    entries: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
}

pub struct SubscriberList<T> {
    kind: &'static str,
    slots: Mutex<Slots<T>>,
}

impl<T: Copy> std::fmt::Debug for SubscriberList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberList")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Copy> SubscriberList<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Register `callback` for `node`. A node holds at most one slot per list.
    pub fn subscribe(&self, node: u8, callback: Callback<T>) -> Result<SlotToken> {
        let mut slots = self.slots.lock();
        if slots.entries.iter().flatten().any(|s| s.node == node) {
            return Err(ServoError::already_in_progress(format!(
                "node {node} already has a {} subscriber",
                self.kind
            )));
        }
        let slot = Slot { node, callback };
        let index = match slots.free.pop() {
            Some(index) => {
                if let Some(entry) = slots.entries.get_mut(index) {
                    *entry = Some(slot);
                }
                index
            }
            None => {
                slots.entries.push(Some(slot));
                slots.entries.len() - 1
            }
        };
        Ok(SlotToken(index))
    }

    pub fn unsubscribe(&self, token: SlotToken) -> Result<()> {
        let mut slots = self.slots.lock();
        let occupied = slots.entries.get(token.0).is_some_and(Option::is_some);
        if !occupied {
            return Err(ServoError::invalid_argument(format!(
                "no {} subscriber in slot {}",
                self.kind, token.0
            )));
        }
        if let Some(entry) = slots.entries.get_mut(token.0) {
            *entry = None;
        }
        slots.free.push(token.0);
        Ok(())
    }

    /// Invoke the subscriber registered for `node`, if any.
    pub fn dispatch(&self, node: u8, value: T) -> bool {
        let callback = {
            let slots = self.slots.lock();
            slots
                .entries
                .iter()
                .flatten()
                .find(|s| s.node == node)
                .map(|s| Arc::clone(&s.callback))
        };
        match callback {
            Some(cb) => {
                cb(node, value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.entries.clear();
        slots.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servolink_errors::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn counter() -> (Arc<AtomicU32>, Callback<u16>) {
        let seen = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&seen);
        let cb: Callback<u16> = Arc::new(move |_, value| {
            sink.store(u32::from(value), Ordering::SeqCst);
        });
        (seen, cb)
    }

    #[test]
    fn test_dispatch_reaches_matching_node() -> TestResult {
        let list = SubscriberList::<u16>::new("statusword");
        let (one, cb_one) = counter();
        let (two, cb_two) = counter();
        list.subscribe(1, cb_one)?;
        list.subscribe(2, cb_two)?;

        assert!(list.dispatch(2, 0x0237));
        assert!(!list.dispatch(3, 0x0040));
        assert_eq!(one.load(Ordering::SeqCst), 0);
        assert_eq!(two.load(Ordering::SeqCst), 0x0237);
        Ok(())
    }

    #[test]
    fn test_duplicate_node_rejected() -> TestResult {
        let list = SubscriberList::<u16>::new("statusword");
        let (_, cb) = counter();
        list.subscribe(1, Arc::clone(&cb))?;
        let again = list.subscribe(1, cb);
        assert_eq!(again.map_err(|e| e.kind()), Err(ErrorKind::AlreadyInProgress));
        Ok(())
    }

    #[test]
    fn test_freed_slot_is_reused() -> TestResult {
        let list = SubscriberList::<u16>::new("statusword");
        let (_, cb) = counter();
        let first = list.subscribe(1, Arc::clone(&cb))?;
        let second = list.subscribe(2, Arc::clone(&cb))?;
        list.unsubscribe(first)?;
        assert_eq!(list.len(), 1);

        let third = list.subscribe(3, cb)?;
        assert_eq!(third, first);
        assert_ne!(third, second);
        Ok(())
    }

    #[test]
    fn test_double_unsubscribe() -> TestResult {
        let list = SubscriberList::<u32>::new("emergency");
        let token = list.subscribe(1, Arc::new(|_, _| {}))?;
        list.unsubscribe(token)?;
        let again = list.unsubscribe(token);
        assert_eq!(again.map_err(|e| e.kind()), Err(ErrorKind::InvalidArgument));
        Ok(())
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() -> TestResult {
        let list = Arc::new(SubscriberList::<u16>::new("statusword"));
        let token_cell = Arc::new(parking_lot::Mutex::new(None));
        let inner_list = Arc::clone(&list);
        let inner_token = Arc::clone(&token_cell);
        let token = list.subscribe(
            4,
            Arc::new(move |_, _| {
                if let Some(token) = inner_token.lock().take() {
                    let _ = inner_list.unsubscribe(token);
                }
            }),
        )?;
        *token_cell.lock() = Some(token);

        assert!(list.dispatch(4, 1));
        assert!(list.is_empty());
        Ok(())
    }
}
