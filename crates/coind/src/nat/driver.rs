use coin_common::store::{self, ip_range_key, SW_FEATURE_KEY};
use coin_openflow::consts::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use coin_openflow::packet::ArpPacket;
use coin_openflow::{Action, PacketIn};
use coin_types::Ipv4Range;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::NatSettings;
use crate::context::DriverContext;
use crate::error::{CoinError, Result};
use crate::event::{EventKind, Notification};
use crate::flows::{FlowAction, FlowEntry, FlowKind, IpProto};
use crate::intf::Route;
use crate::loif::LocalInterface;
use crate::scheduler::{ProbeHandle, ProbeKind, ProbeTask};
use crate::switch_state::SwitchSnapshot;

/// Name of the local interface pair that carries every default route.
pub const LOCAL_NAME: &str = "local";

#[derive(Debug)]
pub struct NatDriver {
    pub(super) settings: NatSettings,
    pub(super) local: Option<LocalInterface>,
    /// Mirrors keyed by primary interface
    pub(super) mirrors: BTreeMap<String, LocalInterface>,
    /// Outstanding probes keyed by subject
    pub(super) pending: HashMap<String, ProbeHandle>,
}

impl NatDriver {
    pub const SUBSCRIPTIONS: &'static [EventKind] = &[
        EventKind::FeaturesReceived,
        EventKind::PortStatusChanged,
        EventKind::SwitchLeft,
        EventKind::PacketIn,
    ];

    pub fn new(settings: NatSettings) -> Self {
        Self {
            settings,
            local: None,
            mirrors: BTreeMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &NatSettings {
        &self.settings
    }

    pub fn local(&self) -> Option<&LocalInterface> {
        self.local.as_ref()
    }

    pub fn mirror(&self, primary: &str) -> Option<&LocalInterface> {
        self.mirrors.get(primary)
    }

    pub fn primaries(&self) -> impl Iterator<Item = &str> {
        self.mirrors.keys().map(String::as_str)
    }

    /// Number of probes waiting for their timer.
    pub fn pending_probes(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }

    /// Brings up the local interface, the mirrors of `interfaces` and the
    /// inner gateway, then pins the default route.
    #[instrument(skip(self, ctx))]
    pub async fn setup(&mut self, interfaces: &[String], ctx: &mut DriverContext<'_>) -> Result<()> {
        let local = ctx.loifs.add(LOCAL_NAME, ctx.intf).await?;
        ctx.fabric
            .add_if(&self.settings.datapath, &local.switch_intf)
            .await?;
        self.local = Some(local.clone());

        self.add_interfaces(interfaces, ctx).await?;

        ctx.intf
            .set_ipv4_addr(&local.client_intf, Some(self.settings.inner_addr))
            .await?;
        for primary in interfaces {
            ctx.intf.link_up(primary).await?;
        }

        let inner = Route::default_route(&local.client_intf, Some(self.settings.inner_gateway));
        if let Err(e) = ctx.intf.add_route(&inner).await {
            warn!(route = %inner, error = %e, "Failed to add inner default route");
        }

        let gateway_mac = match self.settings.gateway_mac {
            Some(mac) => mac,
            None => ctx.intf.hw_addr(&local.switch_intf).await?,
        };
        ctx.intf
            .set_neighbour(self.settings.inner_gateway, gateway_mac, &local.client_intf)
            .await?;
        info!(
            gateway = %self.settings.inner_gateway,
            mac = %gateway_mac,
            "Pinned inner gateway"
        );

        self.check_default_route(ctx).await
    }

    /// Moves each primary behind a mirror and bridges ARP and DHCP between
    /// the two.
    #[instrument(skip(self, ctx))]
    pub async fn add_interfaces(
        &mut self,
        interfaces: &[String],
        ctx: &mut DriverContext<'_>,
    ) -> Result<()> {
        let datapath = self.settings.datapath.clone();
        for primary in interfaces {
            ctx.fabric.add_if(&datapath, primary).await?;
            ctx.intf.set_ipv4_addr(primary, None).await?;

            let mirror = ctx.loifs.add(primary, ctx.intf).await?;
            ctx.fabric.add_if(&datapath, &mirror.switch_intf).await?;

            let mac = ctx.intf.hw_addr(primary).await?;
            ctx.intf.set_hw_addr(&mirror.client_intf, mac).await?;

            let primary_port = port_number(ctx, &datapath, primary).await?;
            let mirror_port = port_number(ctx, &datapath, &mirror.switch_intf).await?;

            let entries = [
                FlowEntry::builder(FlowKind::Arp, FlowAction::Drop)
                    .in_port(primary_port)
                    .dl_dst(mac)
                    .output(Action::output_full(mirror_port))
                    .build(),
                FlowEntry::builder(FlowKind::Arp, FlowAction::Drop)
                    .in_port(mirror_port)
                    .output(Action::output_full(primary_port))
                    .build(),
                FlowEntry::builder(FlowKind::IpProto(IpProto::Udp), FlowAction::Drop)
                    .in_port(primary_port)
                    .tp_dst(DHCP_CLIENT_PORT)
                    .output(Action::output_full(mirror_port))
                    .build(),
                FlowEntry::builder(FlowKind::IpProto(IpProto::Udp), FlowAction::Drop)
                    .in_port(mirror_port)
                    .tp_dst(DHCP_SERVER_PORT)
                    .output(Action::output_full(primary_port))
                    .build(),
            ];
            for entry in entries {
                ctx.policy.add_permanent(entry, ctx.registry)?;
            }

            info!(
                primary = %primary,
                mirror = %mirror.client_intf,
                primary_port,
                mirror_port,
                "Mirrored interface"
            );
            self.mirrors.insert(primary.clone(), mirror);
        }
        Ok(())
    }

    /// Starts DHCP on the mirror of `primary` and probes for its gateway.
    #[instrument(skip(self, ctx))]
    pub async fn dhclient_mirror(
        &mut self,
        primary: &str,
        ctx: &mut DriverContext<'_>,
    ) -> Result<&'static str> {
        let mirror = self
            .mirrors
            .get(primary)
            .ok_or_else(|| CoinError::UnknownMirror {
                interface: primary.to_string(),
            })?
            .client_intf
            .clone();

        ctx.intf.run_dhcp_client(&mirror).await?;
        self.schedule(
            ProbeTask::new(ProbeKind::Route {
                interface: primary.to_string(),
                mirror,
            }),
            Duration::ZERO,
            ctx,
        );
        Ok("executed")
    }

    /// Keeps exactly the default routes on the local client interface and
    /// moves every route of a primary or mirror onto it.
    #[instrument(skip(self, ctx))]
    pub async fn check_default_route(&self, ctx: &mut DriverContext<'_>) -> Result<()> {
        let Some(local) = &self.local else {
            debug!("No local interface, default route left alone");
            return Ok(());
        };
        let local_if = local.client_intf.as_str();

        let mut has_default = false;
        for route in ctx.intf.routes().await? {
            if route.is_default() {
                if route.interface == local_if {
                    has_default = true;
                } else {
                    ctx.intf.del_route(&route).await?;
                    info!(route = %route, "Deleted default route");
                }
            } else if self.is_mirrored(&route.interface) {
                let moved = route.moved_to(local_if);
                ctx.intf.del_route(&route).await?;
                ctx.intf.add_route(&moved).await?;
                info!(from = %route, to = %moved, "Moved route");
            }
        }

        if !has_default {
            let route = Route::default_route(local_if, None);
            ctx.intf.add_route(&route).await?;
            info!(route = %route, "Added default route");
        }
        Ok(())
    }

    fn is_mirrored(&self, interface: &str) -> bool {
        self.mirrors
            .iter()
            .any(|(primary, mirror)| primary == interface || mirror.client_intf == interface)
    }

    /// Mirrors the primary switch into the shared store.
    pub async fn update_switch_feature(&self, ctx: &DriverContext<'_>) -> Result<()> {
        let snapshot = ctx.registry.primary().and_then(|s| s.switch().snapshot());
        match snapshot {
            Some(snapshot) => {
                store::save(ctx.store, SW_FEATURE_KEY, &snapshot).await?;
                debug!(datapath_id = snapshot.datapath_id, "Stored switch features");
            }
            None => {
                warn!("No switch features");
                ctx.store.delete(SW_FEATURE_KEY).await?;
            }
        }
        Ok(())
    }

    /// Finds the datapath port whose network holds the target of an ARP
    /// packet-in.
    pub async fn classify_packet_in(
        &self,
        packet: &PacketIn,
        ctx: &DriverContext<'_>,
    ) -> Result<Option<u16>> {
        let Some(arp) = ArpPacket::from_frame(&packet.data) else {
            return Ok(None);
        };
        let snapshot: Option<SwitchSnapshot> = store::load(ctx.store, SW_FEATURE_KEY).await?;

        let mut ranges = Vec::new();
        for port in snapshot.iter().flat_map(|s| s.ports.iter()) {
            let range: Option<Ipv4Range> = store::load(ctx.store, &ip_range_key(port.port_no)).await?;
            if let Some(range) = range {
                ranges.push((port.port_no, range));
            }
        }

        let destination = destination_port(&ranges, arp.target_ip);
        match destination {
            Some(port_no) => debug!(
                target = %arp.target_ip,
                in_port = packet.in_port,
                port_no,
                "ARP destination found"
            ),
            None => warn!("ARP for IP address {} has no destination", arp.target_ip),
        }
        Ok(destination)
    }

    /// Reacts to a subscribed notification.
    pub async fn on_notification(
        &mut self,
        notification: &Notification,
        ctx: &mut DriverContext<'_>,
    ) -> Result<()> {
        if notification.is_state_change() {
            self.update_switch_feature(ctx).await?;
        }
        if let Notification::PacketIn { packet, .. } = notification {
            self.classify_packet_in(packet, ctx).await?;
        }
        Ok(())
    }

    /// Cancels every outstanding probe.
    pub fn shutdown(&mut self) {
        for (subject, handle) in self.pending.drain() {
            if !handle.is_finished() {
                debug!(subject = %subject, "Cancelled probe");
            }
            handle.cancel();
        }
    }

    /// Schedules `task`, replacing any probe already pending for its subject.
    pub(super) fn schedule(&mut self, task: ProbeTask, delay: Duration, ctx: &DriverContext<'_>) {
        let subject = task.kind.subject();
        let handle = ctx.scheduler.schedule(task, delay);
        if let Some(previous) = self.pending.insert(subject, handle) {
            previous.cancel();
        }
    }
}

async fn port_number(ctx: &DriverContext<'_>, datapath: &str, interface: &str) -> Result<u16> {
    ctx.fabric
        .port_number(datapath, interface)
        .await?
        .ok_or_else(|| CoinError::UnknownPort {
            interface: interface.to_string(),
        })
}

/// First port whose range holds `ip`.
fn destination_port(ranges: &[(u16, Ipv4Range)], ip: Ipv4Addr) -> Option<u16> {
    ranges
        .iter()
        .find(|(_, range)| range.contains(ip))
        .map(|(port_no, _)| *port_no)
}
