//! Flow entries: semantic forwarding intents rendered into flow-mods.
//!
//! A [`FlowEntry`] is built from a [`FlowKind`] (what traffic) and a
//! [`FlowAction`] (what to do with it), optionally refined, and then
//! rendered into wire bytes with [`FlowEntry::render`]. Every render takes a
//! fresh transaction id.

use bytes::Bytes;
use coin_openflow::consts::{
    ofpp, ETH_TYPE_ARP, ETH_TYPE_IP, IP_PROTO_ICMP, IP_PROTO_IGMP, IP_PROTO_TCP, IP_PROTO_UDP,
    OFP_DEFAULT_MISS_SEND_LEN, OFP_FLOW_PERMANENT, OFP_NO_BUFFER,
};
use coin_openflow::{next_xid, Action, CodecResult, FlowMod, FlowModCommand, IpPrefix, Message, OfpMatch};
use coin_types::MacAddress;

/// Flow priority scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Priority {
    Lowest = 0,
    Lower = 0x2000,
    Low = 0x4000,
    /// `OFP_DEFAULT_PRIORITY`
    Base = 0x8000,
    High = 0xC000,
    Highest = 0xFFFF,
}

impl Priority {
    pub const fn value(self) -> u16 {
        self as u16
    }
}

/// IP protocols with a predefined flow class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProto {
    Tcp,
    Udp,
    Icmp,
    Igmp,
}

impl IpProto {
    pub const fn number(self) -> u8 {
        match self {
            IpProto::Tcp => IP_PROTO_TCP,
            IpProto::Udp => IP_PROTO_UDP,
            IpProto::Icmp => IP_PROTO_ICMP,
            IpProto::Igmp => IP_PROTO_IGMP,
        }
    }
}

/// Traffic selected by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Every packet
    All,
    Arp,
    IpProto(IpProto),
    /// A caller-supplied match
    Exact(OfpMatch),
}

impl FlowKind {
    fn default_priority(&self) -> Priority {
        match self {
            FlowKind::All | FlowKind::Exact(_) => Priority::Lowest,
            FlowKind::Arp | FlowKind::IpProto(_) => Priority::Low,
        }
    }

    fn base_match(&self) -> OfpMatch {
        match *self {
            FlowKind::All => OfpMatch::all(),
            FlowKind::Arp => OfpMatch {
                dl_type: Some(ETH_TYPE_ARP),
                ..OfpMatch::all()
            },
            FlowKind::IpProto(proto) => OfpMatch {
                dl_type: Some(ETH_TYPE_IP),
                nw_proto: Some(proto.number()),
                ..OfpMatch::all()
            },
            FlowKind::Exact(ofp_match) => ofp_match,
        }
    }
}

/// Base treatment of matched traffic; extra outputs are appended to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    /// No actions
    Drop,
    /// Output to the controller
    SendToController,
    /// Output to all ports but the ingress one
    Flood,
}

impl FlowAction {
    fn actions(&self) -> Vec<Action> {
        match self {
            FlowAction::Drop => Vec::new(),
            FlowAction::SendToController => vec![Action::Output {
                port: ofpp::CONTROLLER,
                max_len: OFP_DEFAULT_MISS_SEND_LEN,
            }],
            FlowAction::Flood => vec![Action::Output {
                port: ofpp::FLOOD,
                max_len: OFP_DEFAULT_MISS_SEND_LEN,
            }],
        }
    }
}

/// A fully specified flow entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    ofp_match: OfpMatch,
    actions: Vec<Action>,
    priority: u16,
    idle_timeout: u16,
    hard_timeout: u16,
    buffer_id: u32,
    out_port: u16,
    flags: u16,
}

impl FlowEntry {
    pub fn builder(kind: FlowKind, action: FlowAction) -> FlowEntryBuilder {
        FlowEntryBuilder::new(kind, action)
    }

    pub fn ofp_match(&self) -> &OfpMatch {
        &self.ofp_match
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn idle_timeout(&self) -> u16 {
        self.idle_timeout
    }

    pub fn hard_timeout(&self) -> u16 {
        self.hard_timeout
    }

    pub fn out_port(&self) -> u16 {
        self.out_port
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn is_permanent(&self) -> bool {
        self.idle_timeout == OFP_FLOW_PERMANENT && self.hard_timeout == OFP_FLOW_PERMANENT
    }

    /// Returns a copy constrained to flows outputting to `port`, as used by
    /// delete-strict.
    pub fn with_out_port(&self, port: u16) -> Self {
        Self {
            out_port: port,
            ..self.clone()
        }
    }

    pub fn to_flow_mod(&self, command: FlowModCommand, cookie: u64) -> FlowMod {
        FlowMod {
            ofp_match: self.ofp_match,
            cookie,
            command,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            priority: self.priority,
            buffer_id: self.buffer_id,
            out_port: self.out_port,
            flags: self.flags,
            actions: self.actions.clone(),
        }
    }

    /// Renders the entry as a flow-mod frame under a fresh transaction id.
    pub fn render(&self, command: FlowModCommand, cookie: u64) -> CodecResult<Bytes> {
        Message::FlowMod(self.to_flow_mod(command, cookie)).encode(next_xid())
    }
}

/// Builder for [`FlowEntry`].
#[derive(Debug, Clone)]
pub struct FlowEntryBuilder {
    kind: FlowKind,
    action: FlowAction,
    priority: Option<u16>,
    idle_timeout: u16,
    hard_timeout: u16,
    in_port: Option<u16>,
    dl_dst: Option<MacAddress>,
    tp_dst: Option<u16>,
    nw_dst: Option<IpPrefix>,
    outputs: Vec<Action>,
    buffer_id: u32,
    out_port: u16,
    flags: u16,
}

impl FlowEntryBuilder {
    fn new(kind: FlowKind, action: FlowAction) -> Self {
        Self {
            kind,
            action,
            priority: None,
            idle_timeout: OFP_FLOW_PERMANENT,
            hard_timeout: OFP_FLOW_PERMANENT,
            in_port: None,
            dl_dst: None,
            tp_dst: None,
            nw_dst: None,
            outputs: Vec::new(),
            buffer_id: OFP_NO_BUFFER,
            out_port: ofpp::NONE,
            flags: 0,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority.value());
        self
    }

    pub fn idle_timeout(mut self, secs: u16) -> Self {
        self.idle_timeout = secs;
        self
    }

    pub fn hard_timeout(mut self, secs: u16) -> Self {
        self.hard_timeout = secs;
        self
    }

    pub fn in_port(mut self, port: u16) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn dl_dst(mut self, mac: MacAddress) -> Self {
        self.dl_dst = Some(mac);
        self
    }

    pub fn tp_dst(mut self, port: u16) -> Self {
        self.tp_dst = Some(port);
        self
    }

    pub fn nw_dst(mut self, prefix: IpPrefix) -> Self {
        self.nw_dst = Some(prefix);
        self
    }

    /// Appends an output action after the base action.
    pub fn output(mut self, action: Action) -> Self {
        self.outputs.push(action);
        self
    }

    pub fn out_port(mut self, port: u16) -> Self {
        self.out_port = port;
        self
    }

    /// Applies the entry to a packet the switch buffered.
    pub fn buffer_id(mut self, buffer_id: u32) -> Self {
        self.buffer_id = buffer_id;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn build(self) -> FlowEntry {
        let mut ofp_match = self.kind.base_match();
        if let Some(port) = self.in_port {
            ofp_match.in_port = Some(port);
        }
        if let Some(mac) = self.dl_dst {
            ofp_match.dl_dst = Some(mac);
        }
        if let Some(port) = self.tp_dst {
            ofp_match.tp_dst = Some(port);
        }
        if let Some(prefix) = self.nw_dst {
            ofp_match.nw_dst = Some(prefix);
            // Network fields are ignored by the switch without a datalink type.
            ofp_match.dl_type.get_or_insert(ETH_TYPE_IP);
        }

        let mut actions = self.action.actions();
        actions.extend(self.outputs);

        FlowEntry {
            ofp_match,
            actions,
            priority: self
                .priority
                .unwrap_or_else(|| self.kind.default_priority().value()),
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            buffer_id: self.buffer_id,
            out_port: self.out_port,
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_openflow::consts::{DHCP_CLIENT_PORT, OFP_FLOW_MOD_LEN};
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Lowest < Priority::Lower);
        assert!(Priority::Lower < Priority::Low);
        assert!(Priority::Low < Priority::Base);
        assert!(Priority::Base < Priority::High);
        assert!(Priority::High < Priority::Highest);
        assert_eq!(Priority::Base.value(), 0x8000);
    }

    #[test]
    fn test_default_priorities() {
        let all = FlowEntry::builder(FlowKind::All, FlowAction::Drop).build();
        assert_eq!(all.priority(), 0);
        assert!(all.actions().is_empty());
        assert!(all.is_permanent());

        let arp = FlowEntry::builder(FlowKind::Arp, FlowAction::Flood).build();
        assert_eq!(arp.priority(), Priority::Low.value());
        assert_eq!(arp.ofp_match().dl_type, Some(ETH_TYPE_ARP));

        let exact = FlowEntry::builder(FlowKind::Exact(OfpMatch::all()), FlowAction::Drop).build();
        assert_eq!(exact.priority(), Priority::Lowest.value());
    }

    #[test]
    fn test_udp_entry_with_refinements() {
        let mac: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        let entry = FlowEntry::builder(FlowKind::IpProto(IpProto::Udp), FlowAction::Drop)
            .in_port(3)
            .dl_dst(mac)
            .tp_dst(DHCP_CLIENT_PORT)
            .output(Action::output_full(4))
            .build();

        let expected = OfpMatch {
            in_port: Some(3),
            dl_dst: Some(mac),
            dl_type: Some(ETH_TYPE_IP),
            nw_proto: Some(IP_PROTO_UDP),
            tp_dst: Some(68),
            ..OfpMatch::all()
        };
        assert_eq!(entry.ofp_match(), &expected);
        assert_eq!(entry.actions(), &[Action::output_full(4)]);
    }

    #[test]
    fn test_send_to_controller_actions() {
        let entry =
            FlowEntry::builder(FlowKind::IpProto(IpProto::Tcp), FlowAction::SendToController)
                .output(Action::output(1))
                .build();
        assert_eq!(
            entry.actions(),
            &[
                Action::Output {
                    port: ofpp::CONTROLLER,
                    max_len: 128
                },
                Action::output(1)
            ]
        );
    }

    #[test]
    fn test_nw_dst_implies_ip() {
        let entry = FlowEntry::builder(FlowKind::All, FlowAction::Drop)
            .nw_dst(IpPrefix::host(Ipv4Addr::new(10, 0, 0, 5)))
            .build();
        assert_eq!(entry.ofp_match().dl_type, Some(ETH_TYPE_IP));
    }

    #[test]
    fn test_render_layout() {
        let entry = FlowEntry::builder(FlowKind::All, FlowAction::Drop)
            .priority(Priority::High)
            .build();
        let bytes = entry.render(FlowModCommand::Add, 0).unwrap();

        assert_eq!(bytes.len(), OFP_FLOW_MOD_LEN);
        assert_eq!(&bytes[62..64], &[0xC0, 0x00]);

        let (_, message) = Message::decode(&bytes).unwrap();
        match message {
            Message::FlowMod(fm) => {
                assert_eq!(fm.command, FlowModCommand::Add);
                assert_eq!(fm.buffer_id, OFP_NO_BUFFER);
                assert_eq!(fm.out_port, ofpp::NONE);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_render_assigns_fresh_xid() {
        let entry = FlowEntry::builder(FlowKind::All, FlowAction::Drop).build();
        let first = entry.render(FlowModCommand::Add, 0).unwrap();
        let second = entry.render(FlowModCommand::Add, 0).unwrap();
        assert_ne!(&first[4..8], &second[4..8]);
    }

    #[test]
    fn test_with_out_port() {
        let entry = FlowEntry::builder(FlowKind::All, FlowAction::Drop).build();
        let constrained = entry.with_out_port(7);
        assert_eq!(constrained.out_port(), 7);
        assert_eq!(constrained.ofp_match(), entry.ofp_match());
    }
}
