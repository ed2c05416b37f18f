//! Bond interface lifecycle and the flow rules behind it.
//!
//! For a bond with address `ip` on datapath port `B`:
//!
//! - fan-out: `in_port=B, nw_dst=ip` → output to every slave port, `Base`
//! - downlink of the active slave `S`: `in_port=S` → output `B`, `Base`
//! - uplink of the active slave: `in_port=B, nw_dst=ip` → output `S`,
//!   `Lowest`

use coin_openflow::consts::OFPFF_SEND_FLOW_REM;
use coin_openflow::{Action, FlowModCommand, IpPrefix, OfpMatch};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info, instrument};

use super::types::{BondError, BondInterface};
use crate::context::DriverContext;
use crate::error::CoinError;
use crate::event::SessionId;
use crate::flows::{FlowAction, FlowEntry, FlowEntryBuilder, FlowKind, Priority};

type BondResult<T> = std::result::Result<T, BondError>;

fn rule(in_port: u16, priority: Priority) -> FlowEntryBuilder {
    let ofp_match = OfpMatch {
        in_port: Some(in_port),
        ..OfpMatch::all()
    };
    FlowEntry::builder(FlowKind::Exact(ofp_match), FlowAction::Drop)
        .priority(priority)
        .flags(OFPFF_SEND_FLOW_REM)
}

fn fanout(bond_port: u16, ip: Ipv4Addr) -> FlowEntryBuilder {
    rule(bond_port, Priority::Base).nw_dst(IpPrefix::host(ip))
}

fn downlink(slave_port: u16) -> FlowEntryBuilder {
    rule(slave_port, Priority::Base)
}

fn uplink(bond_port: u16, ip: Ipv4Addr) -> FlowEntryBuilder {
    rule(bond_port, Priority::Lowest).nw_dst(IpPrefix::host(ip))
}

/// Port numbers on the primary switch, resolved by interface name.
struct PortMap {
    session: SessionId,
    ports: BTreeMap<String, u16>,
}

impl PortMap {
    fn resolve(ctx: &DriverContext<'_>) -> BondResult<Self> {
        let session = ctx.registry.primary().ok_or(CoinError::SwitchNotConnected)?;
        let ports = session
            .switch()
            .ports()
            .map(|p| (p.name.clone(), p.port_no))
            .collect();
        Ok(Self {
            session: session.id(),
            ports,
        })
    }

    fn get(&self, interface: &str) -> BondResult<u16> {
        self.ports.get(interface).copied().ok_or_else(|| {
            CoinError::UnknownPort {
                interface: interface.to_string(),
            }
            .into()
        })
    }

    fn send(
        &self,
        ctx: &DriverContext<'_>,
        entry: &FlowEntry,
        command: FlowModCommand,
    ) -> BondResult<()> {
        ctx.registry
            .send_frame(self.session, entry.render(command, 0)?)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct BondingDriver {
    datapath: String,
    bonds: BTreeMap<String, BondInterface>,
}

impl BondingDriver {
    pub fn new(datapath: impl Into<String>) -> Self {
        Self {
            datapath: datapath.into(),
            bonds: BTreeMap::new(),
        }
    }

    pub fn bond(&self, name: &str) -> Option<&BondInterface> {
        self.bonds.get(name)
    }

    pub fn bonds(&self) -> impl Iterator<Item = &BondInterface> {
        self.bonds.values()
    }

    fn get(&self, name: &str) -> BondResult<&BondInterface> {
        self.bonds
            .get(name)
            .ok_or_else(|| BondError::UnknownBond(name.to_string()))
    }

    /// Creates a bond interface for `ip` and attaches it to the datapath.
    #[instrument(skip(self, ctx))]
    pub async fn create(&mut self, ip: &str, ctx: &mut DriverContext<'_>) -> BondResult<String> {
        let ip: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| BondError::InvalidAddress(ip.to_string()))?;

        let name = ctx.intf.create_veth().await?;
        ctx.fabric.add_if(&self.datapath, &name).await?;
        ctx.intf.link_up(&name).await?;

        info!(bond = %name, %ip, "Created bond interface");
        self.bonds
            .insert(name.clone(), BondInterface::new(&name, ip, &self.datapath));
        Ok(name)
    }

    /// Deletes a bond interface that has no slaves left.
    #[instrument(skip(self, ctx))]
    pub async fn delete(&mut self, bond: &str, ctx: &mut DriverContext<'_>) -> BondResult<()> {
        let record = self.get(bond)?;
        if !record.slaves().is_empty() {
            return Err(BondError::HasSlaves(record.slaves().to_vec()));
        }

        ctx.fabric.del_if(&record.datapath, bond).await?;
        ctx.intf.delete_link(bond).await?;
        self.bonds.remove(bond);
        info!(bond, "Deleted bond interface");
        Ok(())
    }

    /// Adds `interface` to the slaves and reinstalls the fan-out rule.
    #[instrument(skip(self, ctx))]
    pub fn enslave(
        &mut self,
        bond: &str,
        interface: &str,
        ctx: &DriverContext<'_>,
    ) -> BondResult<()> {
        let record = self.get(bond)?;
        if record.is_slave(interface) {
            return Err(BondError::AlreadyEnslaved);
        }

        let ports = PortMap::resolve(ctx)?;
        let bond_port = ports.get(bond)?;
        let mut entry = fanout(bond_port, record.ip);
        for slave in record.slaves().iter().map(String::as_str).chain([interface]) {
            entry = entry.output(Action::output(ports.get(slave)?));
        }
        ports.send(ctx, &entry.build(), FlowModCommand::Add)?;

        if let Some(record) = self.bonds.get_mut(bond) {
            record.add_slave(interface);
            debug!(bond, slaves = ?record.slaves(), "Enslaved interface");
        }
        Ok(())
    }

    /// Removes `interface` from the slaves, clearing it as active slave
    /// first.
    #[instrument(skip(self, ctx))]
    pub fn liberate(
        &mut self,
        bond: &str,
        interface: &str,
        ctx: &DriverContext<'_>,
    ) -> BondResult<()> {
        let record = self.get(bond)?;
        if !record.is_slave(interface) {
            return Err(BondError::NotEnslaved);
        }

        let ports = PortMap::resolve(ctx)?;
        let bond_port = ports.get(bond)?;
        let removed_port = ports.get(interface)?;
        let remaining: Vec<u16> = record
            .slaves()
            .iter()
            .filter(|s| s.as_str() != interface)
            .map(|s| ports.get(s))
            .collect::<BondResult<_>>()?;
        let ip = record.ip;

        if record.active_slave() == Some(interface) {
            self.set_active_slave(bond, None, ctx)?;
        }

        if remaining.is_empty() {
            let entry = fanout(bond_port, ip).out_port(removed_port).build();
            ports.send(ctx, &entry, FlowModCommand::DeleteStrict)?;
        } else {
            let entry = remaining
                .iter()
                .fold(fanout(bond_port, ip), |e, p| e.output(Action::output(*p)))
                .build();
            ports.send(ctx, &entry, FlowModCommand::Add)?;
        }

        if let Some(record) = self.bonds.get_mut(bond) {
            record.remove_slave(interface);
            debug!(bond, slaves = ?record.slaves(), "Liberated interface");
        }
        Ok(())
    }

    /// Moves the directional rules to `interface`, or removes them for
    /// `None`.
    ///
    /// The rules of the current active slave are always deleted first, so
    /// setting the same slave again leaves exactly one pair installed.
    #[instrument(skip(self, ctx))]
    pub fn set_active_slave(
        &mut self,
        bond: &str,
        interface: Option<&str>,
        ctx: &DriverContext<'_>,
    ) -> BondResult<()> {
        let record = self.get(bond)?;
        if let Some(interface) = interface {
            if !record.is_slave(interface) {
                return Err(BondError::NotSlave {
                    interface: interface.to_string(),
                    bond: bond.to_string(),
                });
            }
        }

        let ports = PortMap::resolve(ctx)?;
        let bond_port = ports.get(bond)?;
        let old_port = record.active_slave().map(|s| ports.get(s)).transpose()?;
        let new_port = interface.map(|s| ports.get(s)).transpose()?;
        let ip = record.ip;

        if let Some(old_port) = old_port {
            let down = downlink(old_port).out_port(bond_port).build();
            ports.send(ctx, &down, FlowModCommand::DeleteStrict)?;
            let up = uplink(bond_port, ip).out_port(old_port).build();
            ports.send(ctx, &up, FlowModCommand::DeleteStrict)?;
        }

        if let Some(new_port) = new_port {
            let down = downlink(new_port).output(Action::output(bond_port)).build();
            ports.send(ctx, &down, FlowModCommand::Add)?;
            let up = uplink(bond_port, ip).output(Action::output(new_port)).build();
            ports.send(ctx, &up, FlowModCommand::Add)?;
        }

        if let Some(record) = self.bonds.get_mut(bond) {
            record.set_active(interface);
            info!(bond, active = ?record.active_slave(), "Active slave set");
        }
        Ok(())
    }

    pub fn active_slave(&self, bond: &str) -> BondResult<Option<&str>> {
        Ok(self.get(bond)?.active_slave())
    }
}
