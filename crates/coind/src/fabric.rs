//! Forwarding fabric (datapath) management.
//!
//! [`Fabric`] is the raw datapath control boundary, implemented for Open
//! vSwitch by [`OvsFabric`]. [`FabricManager`] remembers which datapaths
//! and attachments the controller made so they can be undone.

use async_trait::async_trait;
use coin_common::shell::{self, shellquote, OVS_DPCTL_CMD};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// `port 1: eth1` or `port 2: s-eth1 (internal)` in `ovs-dpctl show`.
static DPCTL_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*port (\d+): (\S+)").expect("Invalid regex pattern"));

#[async_trait]
pub trait Fabric: Send + Sync {
    async fn add_datapath(&self, name: &str) -> Result<()>;

    async fn del_datapath(&self, name: &str) -> Result<()>;

    async fn add_port(&self, datapath: &str, interface: &str) -> Result<()>;

    async fn del_port(&self, datapath: &str, interface: &str) -> Result<()>;

    /// Datapath port number of `interface`, if attached.
    async fn port_number(&self, datapath: &str, interface: &str) -> Result<Option<u16>>;
}

/// [`Fabric`] driving `ovs-dpctl`.
#[derive(Debug, Clone, Default)]
pub struct OvsFabric;

impl OvsFabric {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Fabric for OvsFabric {
    async fn add_datapath(&self, name: &str) -> Result<()> {
        shell::exec_or_throw(&format!("{} add-dp {}", OVS_DPCTL_CMD, shellquote(name))).await?;
        Ok(())
    }

    async fn del_datapath(&self, name: &str) -> Result<()> {
        shell::exec_or_throw(&format!("{} del-dp {}", OVS_DPCTL_CMD, shellquote(name))).await?;
        Ok(())
    }

    async fn add_port(&self, datapath: &str, interface: &str) -> Result<()> {
        let cmd = format!(
            "{} add-if {} {}",
            OVS_DPCTL_CMD,
            shellquote(datapath),
            shellquote(interface)
        );
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }

    async fn del_port(&self, datapath: &str, interface: &str) -> Result<()> {
        let cmd = format!(
            "{} del-if {} {}",
            OVS_DPCTL_CMD,
            shellquote(datapath),
            shellquote(interface)
        );
        shell::exec_or_throw(&cmd).await?;
        Ok(())
    }

    async fn port_number(&self, datapath: &str, interface: &str) -> Result<Option<u16>> {
        let out =
            shell::exec_or_throw(&format!("{} show {}", OVS_DPCTL_CMD, shellquote(datapath)))
                .await?;
        Ok(parse_dpctl_ports(&out).get(interface).copied())
    }
}

/// Parses the port list of `ovs-dpctl show` into name → number.
pub fn parse_dpctl_ports(output: &str) -> BTreeMap<String, u16> {
    DPCTL_PORT_RE
        .captures_iter(output)
        .filter_map(|c| Some((c[2].to_string(), c[1].parse().ok()?)))
        .collect()
}

#[derive(Debug, Default)]
struct Datapath {
    /// Created by us, hence deleted by us
    owned: bool,
    interfaces: Vec<String>,
}

/// Tracks the datapaths and attachments made through a [`Fabric`].
pub struct FabricManager {
    fabric: Arc<dyn Fabric>,
    datapaths: BTreeMap<String, Datapath>,
}

impl std::fmt::Debug for FabricManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricManager")
            .field("datapaths", &self.datapaths)
            .finish()
    }
}

impl FabricManager {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self {
            fabric,
            datapaths: BTreeMap::new(),
        }
    }

    /// Creates datapath `name`. Creating a known datapath is a no-op.
    pub async fn add_dp(&mut self, name: &str) -> Result<()> {
        if self.datapaths.get(name).is_some_and(|dp| dp.owned) {
            debug!("Datapath {} already exists", name);
            return Ok(());
        }
        debug!("Add datapath {}", name);
        self.fabric.add_datapath(name).await?;
        self.datapaths.entry(name.to_string()).or_default().owned = true;
        info!("Created datapath {}", name);
        Ok(())
    }

    /// Detaches everything attached to `name` and deletes it.
    ///
    /// Returns false when the datapath is unknown.
    pub async fn del_dp(&mut self, name: &str) -> Result<bool> {
        let Some(dp) = self.datapaths.remove(name) else {
            error!("No datapath of name {}", name);
            return Ok(false);
        };
        for interface in &dp.interfaces {
            if let Err(e) = self.fabric.del_port(name, interface).await {
                warn!("Failed to detach {} from {}: {}", interface, name, e);
            }
        }
        if dp.owned {
            self.fabric.del_datapath(name).await?;
            info!("Deleted datapath {}", name);
        }
        Ok(true)
    }

    pub async fn add_if(&mut self, datapath: &str, interface: &str) -> Result<()> {
        self.fabric.add_port(datapath, interface).await?;
        let dp = self.datapaths.entry(datapath.to_string()).or_default();
        if !dp.interfaces.iter().any(|i| i == interface) {
            dp.interfaces.push(interface.to_string());
        }
        info!("Attached {} to datapath {}", interface, datapath);
        Ok(())
    }

    pub async fn del_if(&mut self, datapath: &str, interface: &str) -> Result<()> {
        self.fabric.del_port(datapath, interface).await?;
        if let Some(dp) = self.datapaths.get_mut(datapath) {
            dp.interfaces.retain(|i| i != interface);
        }
        info!("Detached {} from datapath {}", interface, datapath);
        Ok(())
    }

    pub async fn port_number(&self, datapath: &str, interface: &str) -> Result<Option<u16>> {
        self.fabric.port_number(datapath, interface).await
    }

    /// Datapaths created through this manager.
    pub fn owned_datapaths(&self) -> Vec<String> {
        self.datapaths
            .iter()
            .filter(|(_, dp)| dp.owned)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn interfaces(&self, datapath: &str) -> &[String] {
        self.datapaths
            .get(datapath)
            .map(|dp| dp.interfaces.as_slice())
            .unwrap_or(&[])
    }

    /// Undoes every attachment and deletes every datapath created here.
    pub async fn cleanup(&mut self) {
        debug!("Cleaning up datapaths");
        let names: Vec<String> = self.datapaths.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.del_dp(&name).await {
                warn!("Failed to clean up datapath {}: {}", name, e);
            }
        }
    }
}
