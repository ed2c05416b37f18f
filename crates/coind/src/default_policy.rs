//! Baseline flow table installed on every switch.
//!
//! Each FEATURES_REPLY gets, in order: drop everything at the lowest
//! priority, send TCP, UDP and ICMP to the controller one step above, and
//! then every permanent entry a mode driver registered.
//!
//! A PACKET_IN that no driver claims a flow for gets a short-lived exact
//! drop entry, so the switch stops asking about the same traffic.

use coin_openflow::{FlowModCommand, OfpMatch, PacketIn};
use tracing::{debug, warn};

use crate::connection::ConnectionRegistry;
use crate::error::Result;
use crate::event::{EventKind, SessionId};
use crate::flows::{FlowAction, FlowEntry, FlowKind, IpProto, Priority};

#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    baseline: Vec<FlowEntry>,
    permanent: Vec<FlowEntry>,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultPolicy {
    pub const SUBSCRIPTIONS: &'static [EventKind] =
        &[EventKind::FeaturesReceived, EventKind::PacketIn];

    /// Idle timeout of a packet-in drop entry, in seconds.
    pub const DROP_IDLE_TIMEOUT: u16 = 5;

    pub fn new() -> Self {
        let mut baseline = vec![FlowEntry::builder(FlowKind::All, FlowAction::Drop)
            .priority(Priority::Lowest)
            .build()];
        for proto in [IpProto::Tcp, IpProto::Udp, IpProto::Icmp] {
            baseline.push(
                FlowEntry::builder(FlowKind::IpProto(proto), FlowAction::SendToController)
                    .priority(Priority::Lower)
                    .build(),
            );
        }
        Self {
            baseline,
            permanent: Vec::new(),
        }
    }

    /// All entries in installation order.
    pub fn entries(&self) -> impl Iterator<Item = &FlowEntry> {
        self.baseline.iter().chain(self.permanent.iter())
    }

    /// Installs every entry on `session`, returning how many were sent.
    pub fn install(&self, registry: &ConnectionRegistry, session: SessionId) -> Result<usize> {
        let mut sent = 0;
        for entry in self.entries() {
            registry.send_frame(session, entry.render(FlowModCommand::Add, 0)?)?;
            sent += 1;
        }
        debug!(session, entries = sent, "Installed default entries");
        Ok(sent)
    }

    /// Registers an entry for every future switch and pushes it to the
    /// switches already connected.
    pub fn add_permanent(&mut self, entry: FlowEntry, registry: &ConnectionRegistry) -> Result<()> {
        let frame = entry.render(FlowModCommand::Add, 0)?;
        for session in registry.switches() {
            if let Err(e) = registry.send_frame(session.id(), frame.clone()) {
                warn!(session = session.id(), error = %e, "Failed to push permanent entry");
            }
        }
        self.permanent.push(entry);
        Ok(())
    }

    /// The entry dropping the flow `packet` belongs to, releasing the
    /// buffered packet with it. `None` if the frame is not Ethernet.
    pub fn drop_entry(packet: &PacketIn) -> Option<FlowEntry> {
        let ofp_match = OfpMatch::from_packet(packet.in_port, &packet.data)?;
        Some(
            FlowEntry::builder(FlowKind::Exact(ofp_match), FlowAction::Drop)
                .priority(Priority::Base)
                .idle_timeout(Self::DROP_IDLE_TIMEOUT)
                .buffer_id(packet.buffer_id)
                .build(),
        )
    }

    /// Sends the drop entry for `packet` to the switch it came from.
    pub fn drop_flow(
        &self,
        registry: &ConnectionRegistry,
        session: SessionId,
        packet: &PacketIn,
    ) -> Result<bool> {
        let Some(entry) = Self::drop_entry(packet) else {
            debug!(session, len = packet.data.len(), "Packet-in too short to match");
            return Ok(false);
        };
        registry.send_frame(session, entry.render(FlowModCommand::Add, 0)?)?;
        debug!(session, in_port = packet.in_port, buffer_id = packet.buffer_id, "Dropping flow");
        Ok(true)
    }

    pub fn permanent_count(&self) -> usize {
        self.permanent.len()
    }
}
