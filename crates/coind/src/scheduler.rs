//! Delayed delivery of NAT probes.
//!
//! A probe is a [`ProbeTask`] handed to a [`ProbeScheduler`] together with a
//! delay. When the delay elapses the task comes back to the dispatch task as
//! [`CoinEvent::Probe`]. Every scheduled task yields a [`ProbeHandle`] that
//! cancels it.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::event::{CoinEvent, EventSender};

/// What a probe looks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Gateway learned by DHCP on the mirror of `interface`
    Route { interface: String, mirror: String },
    /// Hardware address of `ip`, reached through `interface`
    Arp { ip: Ipv4Addr, interface: String },
}

impl ProbeKind {
    /// Key identifying the subject of the probe; at most one probe per
    /// subject is outstanding.
    pub fn subject(&self) -> String {
        match self {
            ProbeKind::Route { interface, .. } => format!("route:{}", interface),
            ProbeKind::Arp { ip, .. } => format!("arp:{}", ip),
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Route { interface, mirror } => {
                write!(f, "route probe of {} via {}", interface, mirror)
            }
            ProbeKind::Arp { ip, interface } => write!(f, "ARP probe of {} via {}", ip, interface),
        }
    }
}

/// A probe and the number of failed attempts so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTask {
    pub kind: ProbeKind,
    pub attempts: u32,
}

impl ProbeTask {
    pub fn new(kind: ProbeKind) -> Self {
        Self { kind, attempts: 0 }
    }

    /// The same probe after one more failure.
    pub fn retried(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            attempts: self.attempts + 1,
        }
    }
}

/// Cancels a scheduled probe when asked to.
#[derive(Debug, Default)]
pub struct ProbeHandle {
    abort: Option<AbortHandle>,
}

impl ProbeHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A handle with nothing to cancel.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    /// True once the probe was delivered or cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().map_or(true, AbortHandle::is_finished)
    }
}

pub trait ProbeScheduler: Send + Sync {
    /// Delivers `task` back to the dispatch task after `delay`.
    fn schedule(&self, task: ProbeTask, delay: Duration) -> ProbeHandle;
}

/// Scheduler backed by tokio timers posting into the dispatch channel.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    events: EventSender,
}

impl TokioScheduler {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl ProbeScheduler for TokioScheduler {
    fn schedule(&self, task: ProbeTask, delay: Duration) -> ProbeHandle {
        trace!(probe = %task.kind, attempts = task.attempts, ?delay, "Scheduling probe");
        let events = self.events.clone();
        let join = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // The receiver is gone only during shutdown.
            let _ = events.send(CoinEvent::Probe(task));
        });
        ProbeHandle::new(join.abort_handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use pretty_assertions::assert_eq;

    fn route() -> ProbeKind {
        ProbeKind::Route {
            interface: "eth1".to_string(),
            mirror: "c-eth1".to_string(),
        }
    }

    #[test]
    fn test_retried_counts_attempts() {
        let task = ProbeTask::new(route()).retried().retried();
        assert_eq!(task.attempts, 2);
        assert_eq!(task.kind, route());
    }

    #[test]
    fn test_subject() {
        assert_eq!(route().subject(), "route:eth1");
        let arp = ProbeKind::Arp {
            ip: Ipv4Addr::new(10, 0, 0, 1),
            interface: "c-eth1".to_string(),
        };
        assert_eq!(arp.subject(), "arp:10.0.0.1");
    }

    #[tokio::test]
    async fn test_tokio_scheduler_delivers() {
        let (tx, mut rx) = event::channel();
        let scheduler = TokioScheduler::new(tx);

        scheduler.schedule(ProbeTask::new(route()), Duration::ZERO);
        match rx.recv().await {
            Some(CoinEvent::Probe(task)) => assert_eq!(task.kind, route()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_probe_never_fires() {
        let (tx, mut rx) = event::channel();
        let scheduler = TokioScheduler::new(tx);

        let handle = scheduler.schedule(ProbeTask::new(route()), Duration::from_millis(50));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        drop(scheduler);
        assert!(rx.recv().await.is_none());
        assert!(handle.is_finished());
    }

    #[test]
    fn test_detached_handle() {
        let handle = ProbeHandle::detached();
        handle.cancel();
        assert!(handle.is_finished());
    }
}
