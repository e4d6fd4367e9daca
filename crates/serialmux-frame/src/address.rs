//! Channel addresses.
//!
//! Addresses `1..=CHANNEL_COUNT` name the logical channels on the wire.
//! Address `0` is never valid.

use std::fmt;

/// Number of logical channels multiplexed onto the physical link.
pub const CHANNEL_COUNT: usize = 6;

/// A validated channel address (`1..=CHANNEL_COUNT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u8);

impl Address {
    /// Validate a raw wire address.
    pub fn new(raw: u8) -> Option<Self> {
        if raw == 0 || raw as usize > CHANNEL_COUNT {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Address for a 0-based channel index.
    pub fn from_index(index: usize) -> Option<Self> {
        if index < CHANNEL_COUNT {
            Some(Self(index as u8 + 1))
        } else {
            None
        }
    }

    /// The raw byte written on the wire.
    pub fn get(self) -> u8 {
        self.0
    }

    /// 0-based channel index.
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Every valid address in ascending order.
    pub fn all() -> impl Iterator<Item = Address> {
        (1..=CHANNEL_COUNT as u8).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

impl TryFrom<u8> for Address {
    type Error = crate::FrameError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Address::new(raw).ok_or(crate::FrameError::InvalidAddress { addr: raw })
    }
}
