//! Events flowing into the dispatch task and their routing.
//!
//! Every OpenFlow connection, control-socket connection and timer is its
//! own task. They only post [`CoinEvent`]s; the single dispatch task owning
//! the controller state handles them one at a time.
//!
//! Switch-side happenings the registry reports are [`Notification`]s. Each
//! component declares the [`EventKind`]s it subscribes to and the
//! [`Dispatcher`] hands a notification only to the subscribed components.

use bytes::Bytes;
use coin_openflow::{PacketIn, PortReason};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::scheduler::ProbeTask;

/// Identifier of one OpenFlow connection.
pub type SessionId = u64;

/// Reply channel of a control request; `None` means "no reply".
pub type ControlReply = oneshot::Sender<Option<Value>>;

/// Input of the dispatch task.
#[derive(Debug)]
pub enum CoinEvent {
    /// A switch connected; frames for it go to `outbound`
    SessionOpened {
        session: SessionId,
        outbound: mpsc::UnboundedSender<Bytes>,
    },
    /// One complete frame from a switch
    SessionFrame { session: SessionId, frame: Bytes },
    /// The transport of a switch went away
    SessionClosed { session: SessionId },
    /// A JSON request from the control socket
    Control { request: Value, reply: ControlReply },
    /// A probe whose delay elapsed
    Probe(ProbeTask),
    /// Periodic liveness check
    EchoTick,
    Shutdown,
}

/// Sender half of the dispatch channel.
pub type EventSender = mpsc::UnboundedSender<CoinEvent>;

/// Receiver half of the dispatch channel.
pub type EventReceiver = mpsc::UnboundedReceiver<CoinEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Kinds of switch notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    FeaturesReceived,
    PortStatusChanged,
    SwitchLeft,
    PacketIn,
}

/// Something the registry observed on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// FEATURES_REPLY processed; the port set was replaced
    FeaturesReceived { session: SessionId, datapath_id: u64 },
    /// PORT_STATUS applied
    PortStatusChanged {
        session: SessionId,
        reason: PortReason,
        port_no: u16,
    },
    /// Session closed after its features were known
    SwitchLeft { session: SessionId, datapath_id: u64 },
    PacketIn { session: SessionId, packet: PacketIn },
}

impl Notification {
    pub fn kind(&self) -> EventKind {
        match self {
            Notification::FeaturesReceived { .. } => EventKind::FeaturesReceived,
            Notification::PortStatusChanged { .. } => EventKind::PortStatusChanged,
            Notification::SwitchLeft { .. } => EventKind::SwitchLeft,
            Notification::PacketIn { .. } => EventKind::PacketIn,
        }
    }

    pub fn session(&self) -> SessionId {
        match self {
            Notification::FeaturesReceived { session, .. }
            | Notification::PortStatusChanged { session, .. }
            | Notification::SwitchLeft { session, .. }
            | Notification::PacketIn { session, .. } => *session,
        }
    }

    /// True for notifications that change what is known about a switch.
    pub fn is_state_change(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::FeaturesReceived | EventKind::PortStatusChanged | EventKind::SwitchLeft
        )
    }
}

/// Components that consume notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentId {
    /// Mirrors switch snapshots into the shared store
    FeatureCache,
    DefaultPolicy,
    Bonding,
    Nat,
}

/// Routes notification kinds to subscribed components.
///
/// Components are returned in registration order.
#[derive(Debug, Default)]
pub struct Dispatcher {
    routes: BTreeMap<EventKind, Vec<ComponentId>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `component` to `kinds`. Subscribing twice is a no-op.
    pub fn register(&mut self, component: ComponentId, kinds: &[EventKind]) {
        debug!(?component, ?kinds, "Registering component");
        for kind in kinds {
            let targets = self.routes.entry(*kind).or_default();
            if !targets.contains(&component) {
                targets.push(component);
            }
        }
    }

    pub fn targets(&self, kind: EventKind) -> &[ComponentId] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_subscribed(&self, component: ComponentId, kind: EventKind) -> bool {
        self.targets(kind).contains(&component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dispatcher_routes_in_registration_order() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            ComponentId::FeatureCache,
            &[EventKind::FeaturesReceived, EventKind::SwitchLeft],
        );
        dispatcher.register(ComponentId::DefaultPolicy, &[EventKind::FeaturesReceived]);
        dispatcher.register(ComponentId::DefaultPolicy, &[EventKind::FeaturesReceived]);

        assert_eq!(
            dispatcher.targets(EventKind::FeaturesReceived),
            &[ComponentId::FeatureCache, ComponentId::DefaultPolicy]
        );
        assert_eq!(
            dispatcher.targets(EventKind::SwitchLeft),
            &[ComponentId::FeatureCache]
        );
        assert!(dispatcher.targets(EventKind::PacketIn).is_empty());
        assert!(!dispatcher.is_subscribed(ComponentId::Nat, EventKind::PacketIn));
    }

    #[test]
    fn test_notification_kind() {
        let left = Notification::SwitchLeft {
            session: 3,
            datapath_id: 1,
        };
        assert_eq!(left.kind(), EventKind::SwitchLeft);
        assert_eq!(left.session(), 3);
        assert!(left.is_state_change());
    }
}
