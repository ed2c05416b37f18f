//! Multi-homing through NAT mirrors.
//!
//! Every primary uplink gets a mirror: a local interface pair whose client
//! side carries the primary's MAC and runs the DHCP client, while the
//! primary itself loses its address. ARP and DHCP are bridged between
//! primary and mirror by permanent flow entries. Once the mirror has a
//! lease, probes learn its gateway and the gateway's MAC, and every default
//! route is pinned to the single `local` client interface.

mod driver;
mod probe;

pub use driver::{NatDriver, LOCAL_NAME};
pub use probe::ProbeOutcome;

use coin_types::{Ipv4Range, MacAddress};
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::CoindConfig;
use crate::error::Result;

/// Settings of the NAT driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatSettings {
    pub datapath: String,
    /// Address and prefix of the local client interface
    pub inner_addr: Ipv4Range,
    pub inner_gateway: Ipv4Addr,
    /// MAC pinned for the inner gateway; the switch side of the local
    /// interface when unset
    pub gateway_mac: Option<MacAddress>,
    pub max_retry: u32,
    pub retry_delay: Duration,
}

impl NatSettings {
    pub fn from_config(config: &CoindConfig) -> Result<Self> {
        Ok(Self {
            datapath: config.fabric.datapath.clone(),
            inner_addr: Ipv4Range::with_prefix_len(config.nat.inner_addr, config.nat.inner_prefix_len)?,
            inner_gateway: config.nat.inner_gateway,
            gateway_mac: config.nat.gateway_mac,
            max_retry: config.nat.max_retry,
            retry_delay: config.retry_delay(),
        })
    }
}
