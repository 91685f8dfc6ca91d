//! Register address packing.
//!
//! A register is identified by a 16-bit index and an 8-bit sub-index packed
//! as `index | subindex << 16`.

use core::fmt;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegisterAddress(u32);

impl RegisterAddress {
    pub const fn new(index: u16, subindex: u8) -> Self {
        Self((index as u32) | ((subindex as u32) << 16))
    }

    /// Bits above the sub-index are dropped.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & 0x00FF_FFFF)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub const fn subindex(self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }
}

impl From<u32> for RegisterAddress {
    fn from(raw: u32) -> Self {
        Self::from_raw(raw)
    }
}

impl From<RegisterAddress> for u32 {
    fn from(addr: RegisterAddress) -> Self {
        addr.raw()
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(500))]

        #[test]
        fn prop_pack_roundtrip(index in any::<u16>(), subindex in any::<u8>()) {
            let addr = RegisterAddress::new(index, subindex);
            prop_assert_eq!(addr.index(), index);
            prop_assert_eq!(addr.subindex(), subindex);
            prop_assert_eq!(RegisterAddress::from_raw(addr.raw()), addr);
        }
    }
}
