//! OS network interface manipulation.
//!
//! [`InterfaceManager`] is the boundary to the host network stack: links,
//! addresses, routes, neighbours and the DHCP client. The production
//! implementation, [`ShellInterfaceManager`], drives `ip` and `dhclient`.

use async_trait::async_trait;
use coin_common::shell::{self, shellquote, DHCLIENT_CMD, IP_CMD};
use coin_types::{Ipv4Range, MacAddress};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info};

use crate::error::{CoinError, Result};

/// Path to ping, used to get a neighbour resolved.
pub const PING_CMD: &str = "/bin/ping";

/// `2: eth0@if3: <BROADCAST,...>` → `eth0`
static LINK_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\d+:\s+([^:@\s]+)").expect("Invalid regex pattern"));

static LINK_ETHER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"link/ether\s+([0-9a-fA-F:]{17})").expect("Invalid regex pattern")
});

static INET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"inet\s+(\d+\.\d+\.\d+\.\d+)/(\d+)").expect("Invalid regex pattern")
});

static LLADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"lladdr\s+([0-9a-fA-F:]{17})").expect("Invalid regex pattern")
});

/// One IPv4 route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
    pub interface: String,
}

impl Route {
    /// Default route out of `interface`, optionally via `gateway`.
    pub fn default_route(interface: impl Into<String>, gateway: Option<Ipv4Addr>) -> Self {
        Self {
            destination: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
            gateway,
            interface: interface.into(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.destination.is_unspecified() && self.prefix_len == 0
    }

    /// The same destination moved onto `interface`, without a gateway.
    pub fn moved_to(&self, interface: &str) -> Self {
        Self {
            destination: self.destination,
            prefix_len: self.prefix_len,
            gateway: None,
            interface: interface.to_string(),
        }
    }

    fn ip_args(&self) -> String {
        let mut args = if self.is_default() {
            "default".to_string()
        } else {
            format!("{}/{}", self.destination, self.prefix_len)
        };
        if let Some(gateway) = self.gateway {
            args.push_str(&format!(" via {}", gateway));
        }
        args.push_str(&format!(" dev {}", shellquote(&self.interface)));
        args
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "default")?;
        } else {
            write!(f, "{}/{}", self.destination, self.prefix_len)?;
        }
        if let Some(gateway) = self.gateway {
            write!(f, " via {}", gateway)?;
        }
        write!(f, " dev {}", self.interface)
    }
}

/// An IPv4 address as reported to control clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv4Entry {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl From<Ipv4Range> for Ipv4Entry {
    fn from(range: Ipv4Range) -> Self {
        Self {
            addr: range.addr(),
            netmask: range.netmask(),
        }
    }
}

/// Hardware and IPv4 addresses of one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceAddresses {
    pub ethernet: Option<MacAddress>,
    pub ipv4: Vec<Ipv4Entry>,
}

#[async_trait]
pub trait InterfaceManager: Send + Sync {
    /// Names of all links.
    async fn interfaces(&self) -> Result<Vec<String>>;

    async fn addresses(&self, interface: &str) -> Result<InterfaceAddresses>;

    async fn set_hw_addr(&self, interface: &str, mac: MacAddress) -> Result<()>;

    /// Replaces the IPv4 addresses of `interface`; `None` removes them all.
    async fn set_ipv4_addr(&self, interface: &str, range: Option<Ipv4Range>) -> Result<()>;

    async fn link_up(&self, interface: &str) -> Result<()>;

    /// Creates a veth pair with kernel-chosen names and returns one end.
    async fn create_veth(&self) -> Result<String>;

    /// Creates the veth pair `name` / `peer`.
    async fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()>;

    async fn delete_link(&self, interface: &str) -> Result<()>;

    async fn routes(&self) -> Result<Vec<Route>>;

    async fn add_route(&self, route: &Route) -> Result<()>;

    async fn del_route(&self, route: &Route) -> Result<()>;

    /// Hardware address of `ip` if it is resolved on `interface`.
    async fn neighbour_mac(&self, ip: Ipv4Addr, interface: &str) -> Result<Option<MacAddress>>;

    /// Pins `ip` to `mac` on `interface`.
    async fn set_neighbour(&self, ip: Ipv4Addr, mac: MacAddress, interface: &str) -> Result<()>;

    /// Starts the DHCP client on `interface` without waiting for a lease.
    async fn run_dhcp_client(&self, interface: &str) -> Result<()>;

    async fn hw_addr(&self, interface: &str) -> Result<MacAddress> {
        self.addresses(interface)
            .await?
            .ethernet
            .ok_or_else(|| CoinError::interface(interface, "no hardware address"))
    }

    /// First IPv4 address of `interface`.
    async fn ipv4_range(&self, interface: &str) -> Result<Option<Ipv4Range>> {
        let addresses = self.addresses(interface).await?;
        Ok(addresses
            .ipv4
            .first()
            .and_then(|entry| Ipv4Range::new(entry.addr, entry.netmask).ok()))
    }

    /// Gateway of the first route through `interface` that has one.
    async fn gateway_of(&self, interface: &str) -> Result<Option<Ipv4Addr>> {
        Ok(self
            .routes()
            .await?
            .into_iter()
            .filter(|r| r.interface == interface)
            .find_map(|r| r.gateway))
    }

    /// Addresses of every interface with a hardware address.
    async fn snapshot(&self) -> Result<BTreeMap<String, InterfaceAddresses>> {
        let mut out = BTreeMap::new();
        for name in self.interfaces().await? {
            let addresses = self.addresses(&name).await?;
            if addresses.ethernet.is_some() {
                out.insert(name, addresses);
            }
        }
        Ok(out)
    }
}

/// [`InterfaceManager`] driving `ip` and `dhclient`.
#[derive(Debug, Clone, Default)]
pub struct ShellInterfaceManager;

impl ShellInterfaceManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InterfaceManager for ShellInterfaceManager {
    async fn interfaces(&self) -> Result<Vec<String>> {
        let out = shell::exec_or_throw(&format!("{} -o link show", IP_CMD)).await?;
        Ok(parse_link_names(&out))
    }

    async fn addresses(&self, interface: &str) -> Result<InterfaceAddresses> {
        let link = shell::exec_or_throw(&format!(
            "{} -o link show dev {}",
            IP_CMD,
            shellquote(interface)
        ))
        .await?;
        let addr = shell::exec_or_throw(&format!(
            "{} -o -4 addr show dev {}",
            IP_CMD,
            shellquote(interface)
        ))
        .await?;
        Ok(InterfaceAddresses {
            ethernet: parse_link_hw_addr(&link),
            ipv4: parse_ipv4_ranges(&addr).into_iter().map(Ipv4Entry::from).collect(),
        })
    }

    async fn set_hw_addr(&self, interface: &str, mac: MacAddress) -> Result<()> {
        let cmd = format!(
            "{} link set dev {} address {}",
            IP_CMD,
            shellquote(interface),
            shellquote(&mac.to_string())
        );
        shell::exec_or_throw(&cmd).await?;
        info!("Set MAC address {} on interface {}", mac, interface);
        Ok(())
    }

    async fn set_ipv4_addr(&self, interface: &str, range: Option<Ipv4Range>) -> Result<()> {
        let cmd = format!("{} -4 addr flush dev {}", IP_CMD, shellquote(interface));
        shell::exec_or_throw(&cmd).await?;
        if let Some(range) = range {
            let cmd = format!(
                "{} addr add {} dev {}",
                IP_CMD,
                shellquote(&range.to_string()),
                shellquote(interface)
            );
            shell::exec_or_throw(&cmd).await?;
        }
        debug!(interface, ?range, "Set IPv4 address");
        Ok(())
    }

    async fn link_up(&self, interface: &str) -> Result<()> {
        let cmd = format!("{} link set dev {} up", IP_CMD, shellquote(interface));
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }

    async fn create_veth(&self) -> Result<String> {
        let before: BTreeSet<String> = self.interfaces().await?.into_iter().collect();
        shell::exec_or_throw(&format!("{} link add type veth", IP_CMD)).await?;
        let after = self.interfaces().await?;

        // The kernel names the pair vethN / vethN+1; take the first new one.
        let mut created: Vec<String> = after.into_iter().filter(|i| !before.contains(i)).collect();
        created.sort();
        created
            .into_iter()
            .next()
            .ok_or_else(|| CoinError::interface("veth", "no new interface after link add"))
    }

    async fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        let cmd = format!(
            "{} link add {} type veth peer name {}",
            IP_CMD,
            shellquote(name),
            shellquote(peer)
        );
        shell::exec_or_throw(&cmd).await?;
        info!("Created veth pair {} / {}", name, peer);
        Ok(())
    }

    async fn delete_link(&self, interface: &str) -> Result<()> {
        let cmd = format!("{} link del dev {}", IP_CMD, shellquote(interface));
        shell::exec_or_throw(&cmd).await?;
        info!("Deleted interface {}", interface);
        Ok(())
    }

    async fn routes(&self) -> Result<Vec<Route>> {
        let out = shell::exec_or_throw(&format!("{} -4 route show", IP_CMD)).await?;
        Ok(parse_routes(&out))
    }

    async fn add_route(&self, route: &Route) -> Result<()> {
        shell::exec_or_throw(&format!("{} route add {}", IP_CMD, route.ip_args())).await?;
        info!("Added route {}", route);
        Ok(())
    }

    async fn del_route(&self, route: &Route) -> Result<()> {
        shell::exec_or_throw(&format!("{} route del {}", IP_CMD, route.ip_args())).await?;
        info!("Deleted route {}", route);
        Ok(())
    }

    async fn neighbour_mac(&self, ip: Ipv4Addr, interface: &str) -> Result<Option<MacAddress>> {
        let cmd = format!("{} neigh show {} dev {}", IP_CMD, ip, shellquote(interface));
        let out = shell::exec_or_throw(&cmd).await?;
        if let Some(mac) = parse_neigh_mac(&out) {
            return Ok(Some(mac));
        }

        // Not cached yet: get the kernel to resolve it for the next attempt.
        let ping = format!("{} -c 1 -W 1 -I {} {}", PING_CMD, shellquote(interface), ip);
        shell::exec(&ping).await?;
        Ok(None)
    }

    async fn set_neighbour(&self, ip: Ipv4Addr, mac: MacAddress, interface: &str) -> Result<()> {
        let cmd = format!(
            "{} neigh replace {} lladdr {} dev {} nud permanent",
            IP_CMD,
            ip,
            shellquote(&mac.to_string()),
            shellquote(interface)
        );
        shell::exec_or_throw(&cmd).await?;
        info!("Pinned neighbour {} to {} on {}", ip, mac, interface);
        Ok(())
    }

    async fn run_dhcp_client(&self, interface: &str) -> Result<()> {
        let cmd = format!("{} -nw {}", DHCLIENT_CMD, shellquote(interface));
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }
}

/// Parses `ip -o link show`.
pub fn parse_link_names(output: &str) -> Vec<String> {
    LINK_NAME_RE
        .captures_iter(output)
        .map(|c| c[1].to_string())
        .collect()
}

/// Parses the hardware address out of `ip -o link show dev X`.
pub fn parse_link_hw_addr(output: &str) -> Option<MacAddress> {
    LINK_ETHER_RE
        .captures(output)
        .and_then(|c| c[1].parse().ok())
}

/// Parses `ip -o -4 addr show`.
pub fn parse_ipv4_ranges(output: &str) -> Vec<Ipv4Range> {
    INET_RE
        .captures_iter(output)
        .filter_map(|c| {
            let addr: Ipv4Addr = c[1].parse().ok()?;
            let len: u8 = c[2].parse().ok()?;
            Ipv4Range::with_prefix_len(addr, len).ok()
        })
        .collect()
}

/// Parses the lladdr out of `ip neigh show`, ignoring failed entries.
pub fn parse_neigh_mac(output: &str) -> Option<MacAddress> {
    output
        .lines()
        .filter(|line| !line.contains("FAILED") && !line.contains("INCOMPLETE"))
        .find_map(|line| LLADDR_RE.captures(line))
        .and_then(|c| c[1].parse().ok())
}

/// Parses `ip -4 route show`. Routes without a device are skipped.
pub fn parse_routes(output: &str) -> Vec<Route> {
    output.lines().filter_map(parse_route_line).collect()
}

fn parse_route_line(line: &str) -> Option<Route> {
    let mut tokens = line.split_whitespace();
    let target = tokens.next()?;
    let (destination, prefix_len) = if target == "default" {
        (Ipv4Addr::UNSPECIFIED, 0)
    } else if let Some((addr, len)) = target.split_once('/') {
        (addr.parse().ok()?, len.parse().ok()?)
    } else {
        (target.parse().ok()?, 32)
    };

    let mut gateway = None;
    let mut interface = None;
    while let Some(token) = tokens.next() {
        match token {
            "via" => gateway = tokens.next().and_then(|g| g.parse().ok()),
            "dev" => interface = tokens.next().map(str::to_string),
            _ => {}
        }
    }

    Some(Route {
        destination,
        prefix_len,
        gateway,
        interface: interface?,
    })
}
