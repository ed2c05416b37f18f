//! Common value types shared by the COIN controller crates.
//!
//! - [`MacAddress`]: 48-bit Ethernet hardware addresses as carried in
//!   OpenFlow port descriptors and flow matches
//! - [`Ipv4Range`]: an IPv4 address together with its netmask, used for the
//!   per-port address ranges the NAT driver records

mod ipv4;
mod mac;

pub use ipv4::{Ipv4Range, netmask_from_prefix_len};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IPv4 address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid netmask: {0}")]
    InvalidNetmask(String),
}
