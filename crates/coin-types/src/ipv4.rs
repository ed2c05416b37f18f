//! IPv4 address ranges (address plus netmask).

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Converts a prefix length into a dotted netmask.
///
/// Lengths above 32 are clamped to 32.
pub fn netmask_from_prefix_len(prefix_len: u8) -> Ipv4Addr {
    let len = u32::from(prefix_len.min(32));
    let bits = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    Ipv4Addr::from(bits)
}

/// An interface address together with its netmask.
///
/// Serialized as the `(address, netmask)` pair of 32-bit values so that
/// readers of the shared store can do the mask arithmetic directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "(u32, u32)", try_from = "(u32, u32)")]
pub struct Ipv4Range {
    addr: Ipv4Addr,
    netmask: Ipv4Addr,
}

impl Ipv4Range {
    /// Creates a range, rejecting non-contiguous netmasks.
    pub fn new(addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self, ParseError> {
        let mask = u32::from(netmask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(ParseError::InvalidNetmask(netmask.to_string()));
        }
        Ok(Self { addr, netmask })
    }

    /// Creates a range from a prefix length.
    pub fn with_prefix_len(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > 32 {
            return Err(ParseError::InvalidNetmask(format!("/{}", prefix_len)));
        }
        Ok(Self {
            addr,
            netmask: netmask_from_prefix_len(prefix_len),
        })
    }

    pub const fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub const fn netmask(&self) -> Ipv4Addr {
        self.netmask
    }

    /// Number of leading one bits in the netmask.
    pub fn prefix_len(&self) -> u8 {
        u32::from(self.netmask).leading_ones() as u8
    }

    /// Returns the network address (address with host bits cleared).
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & u32::from(self.netmask))
    }

    /// Returns true if `ip` falls in the same network as this range.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        (u32::from(self.addr) & mask) == (u32::from(ip) & mask)
    }
}

impl fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len())
    }
}

impl FromStr for Ipv4Range {
    type Err = ParseError;

    /// Parses `a.b.c.d/len`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidIpAddress(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))?;
        let len: u8 = len
            .parse()
            .map_err(|_| ParseError::InvalidNetmask(s.to_string()))?;
        Self::with_prefix_len(addr, len)
    }
}

impl From<Ipv4Range> for (u32, u32) {
    fn from(range: Ipv4Range) -> Self {
        (u32::from(range.addr), u32::from(range.netmask))
    }
}

impl TryFrom<(u32, u32)> for Ipv4Range {
    type Error = ParseError;

    fn try_from((addr, netmask): (u32, u32)) -> Result<Self, Self::Error> {
        Ipv4Range::new(Ipv4Addr::from(addr), Ipv4Addr::from(netmask))
    }
}
