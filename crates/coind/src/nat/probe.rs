//! Route and ARP probes with bounded retry.

use coin_common::store::{self, gateway_key, gateway_mac_key, ip_range_key};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::NatDriver;
use crate::context::DriverContext;
use crate::error::Result;
use crate::scheduler::{ProbeKind, ProbeTask};

/// What became of a delivered probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Resolved,
    /// Failed and scheduled again; carries the failures so far
    Retrying(u32),
    /// Failed for the last time
    Exhausted,
}

impl NatDriver {
    /// Runs a delivered probe, rescheduling it on failure until the retry
    /// budget is spent.
    #[instrument(skip(self, ctx), fields(probe = %task.kind, attempts = task.attempts))]
    pub async fn handle_probe(
        &mut self,
        task: ProbeTask,
        ctx: &mut DriverContext<'_>,
    ) -> ProbeOutcome {
        let subject = task.kind.subject();
        self.pending.remove(&subject);

        let resolved = match &task.kind {
            ProbeKind::Route { interface, mirror } => self.probe_route(interface, mirror, ctx).await,
            ProbeKind::Arp { ip, interface } => self.probe_arp(*ip, interface, ctx).await,
        };
        match resolved {
            Ok(true) => return ProbeOutcome::Resolved,
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Probe failed"),
        }

        let next = task.retried();
        if next.attempts < self.settings.max_retry {
            let attempts = next.attempts;
            let delay = self.settings.retry_delay;
            self.schedule(next, delay, ctx);
            ProbeOutcome::Retrying(attempts)
        } else {
            warn!(
                subject = %subject,
                attempts = next.attempts,
                "Probe gave up"
            );
            ProbeOutcome::Exhausted
        }
    }

    async fn probe_route(
        &mut self,
        interface: &str,
        mirror: &str,
        ctx: &mut DriverContext<'_>,
    ) -> Result<bool> {
        let Some(gateway) = ctx.intf.gateway_of(mirror).await? else {
            return Ok(false);
        };
        store::save(ctx.store, &gateway_key(interface), &gateway.to_string()).await?;
        info!(interface, gateway = %gateway, "Learned gateway");

        self.schedule(
            ProbeTask::new(ProbeKind::Arp {
                ip: gateway,
                interface: mirror.to_string(),
            }),
            Duration::ZERO,
            ctx,
        );

        let range = ctx.intf.ipv4_range(mirror).await?;
        let port = ctx
            .fabric
            .port_number(&self.settings.datapath, interface)
            .await?;
        match (range, port) {
            (Some(range), Some(port_no)) => {
                store::save(ctx.store, &ip_range_key(port_no), &range).await?;
                info!(interface, range = %range, port_no, "Learned address range");
            }
            _ => warn!(interface, "No address range for mirrored interface"),
        }
        Ok(true)
    }

    async fn probe_arp(
        &mut self,
        ip: Ipv4Addr,
        interface: &str,
        ctx: &mut DriverContext<'_>,
    ) -> Result<bool> {
        let Some(mac) = ctx.intf.neighbour_mac(ip, interface).await? else {
            return Ok(false);
        };
        store::save(ctx.store, &gateway_mac_key(ip), &mac).await?;
        info!(gateway = %ip, mac = %mac, "Learned gateway MAC");

        self.check_default_route(ctx).await?;
        Ok(true)
    }
}
