//! Link state shared between a transport and its worker threads.

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkState {
    Connected,
    #[default]
    Disconnected,
    /// An I/O failure stopped the worker. Only an explicit disconnect and
    /// reconnect leaves this state.
    Faulty,
}

impl LinkState {
    fn to_u8(self) -> u8 {
        match self {
            LinkState::Connected => 0,
            LinkState::Disconnected => 1,
            LinkState::Faulty => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LinkState::Connected,
            2 => LinkState::Faulty,
            _ => LinkState::Disconnected,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Connected => write!(f, "connected"),
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Faulty => write!(f, "faulty"),
        }
    }
}

/// Lock-free cell holding a [`LinkState`].
#[derive(Debug)]
pub struct LinkStateCell(AtomicU8);

impl Default for LinkStateCell {
    fn default() -> Self {
        Self::new(LinkState::Disconnected)
    }
}

impl LinkStateCell {
    pub fn new(state: LinkState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store `state` and return the previous one.
    pub fn set(&self, state: LinkState) -> LinkState {
        LinkState::from_u8(self.0.swap(state.to_u8(), Ordering::AcqRel))
    }

    pub fn is_connected(&self) -> bool {
        self.get() == LinkState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_returns_previous() {
        let cell = LinkStateCell::default();
        assert_eq!(cell.set(LinkState::Connected), LinkState::Disconnected);
        assert_eq!(cell.set(LinkState::Faulty), LinkState::Connected);
        assert_eq!(cell.get(), LinkState::Faulty);
        assert!(!cell.is_connected());
    }

    #[test]
    fn test_display() {
        assert_eq!(LinkState::Faulty.to_string(), "faulty");
    }
}
