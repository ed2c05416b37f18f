//! Local interface pairs.
//!
//! A local interface is a veth pair: the switch side is attached to the
//! datapath, the client side carries the host's addresses and routes.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::error::Result;
use crate::intf::InterfaceManager;

/// Longest interface name the kernel accepts.
pub const IFNAME_MAX_LEN: usize = 15;

const SWITCH_PREFIX: &str = "s-";
const CLIENT_PREFIX: &str = "c-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInterface {
    pub name: String,
    pub switch_intf: String,
    pub client_intf: String,
}

impl LocalInterface {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            switch_intf: ifname(SWITCH_PREFIX, name),
            client_intf: ifname(CLIENT_PREFIX, name),
        }
    }
}

fn ifname(prefix: &str, name: &str) -> String {
    let mut out = format!("{}{}", prefix, name);
    if out.len() > IFNAME_MAX_LEN {
        let mut end = IFNAME_MAX_LEN;
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
    }
    out
}

#[derive(Debug, Default)]
pub struct LocalInterfaceManager {
    interfaces: BTreeMap<String, LocalInterface>,
}

impl LocalInterfaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the pair for `name` and brings both ends up.
    ///
    /// Adding a name twice returns the existing pair.
    pub async fn add(&mut self, name: &str, intf: &dyn InterfaceManager) -> Result<LocalInterface> {
        if let Some(existing) = self.interfaces.get(name) {
            return Ok(existing.clone());
        }

        let loif = LocalInterface::new(name);
        intf.create_veth_pair(&loif.switch_intf, &loif.client_intf)
            .await?;
        intf.link_up(&loif.switch_intf).await?;
        intf.link_up(&loif.client_intf).await?;
        info!(
            name,
            switch_intf = %loif.switch_intf,
            client_intf = %loif.client_intf,
            "Created local interface"
        );

        self.interfaces.insert(name.to_string(), loif.clone());
        Ok(loif)
    }

    pub fn get(&self, name: &str) -> Option<&LocalInterface> {
        self.interfaces.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalInterface> {
        self.interfaces.values()
    }
}
