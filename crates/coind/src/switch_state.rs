//! Per-switch port tracking and the feature cache in the shared store.

use coin_common::store::{self, StateStore, DP_FEATURES_SOCK_LIST_KEY};
use coin_common::CoinCommonResult;
use coin_openflow::{PhyPort, PortReason, PortStatus, SwitchFeatures};
use coin_types::MacAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::SessionId;

/// A port of a connected switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub port_no: u16,
    pub name: String,
    pub hw_addr: MacAddress,
    pub admin_down: bool,
    pub link_down: bool,
}

impl From<&PhyPort> for Port {
    fn from(port: &PhyPort) -> Self {
        Self {
            port_no: port.port_no,
            name: port.name.clone(),
            hw_addr: port.hw_addr,
            admin_down: port.is_admin_down(),
            link_down: port.is_link_down(),
        }
    }
}

/// Serializable view of a switch, as published to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSnapshot {
    pub datapath_id: u64,
    pub ports: Vec<Port>,
}

/// What the controller knows about one switch.
///
/// Ports are only reachable through accessors; callers never hold on to the
/// map itself.
#[derive(Debug, Clone, Default)]
pub struct SwitchState {
    datapath_id: Option<u64>,
    ports: BTreeMap<u16, Port>,
}

impl SwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the datapath id and the full port set.
    pub fn apply_features(&mut self, features: &SwitchFeatures) {
        self.datapath_id = Some(features.datapath_id);
        self.ports = features
            .ports
            .iter()
            .map(|p| (p.port_no, Port::from(p)))
            .collect();
    }

    /// Applies one port-status event.
    ///
    /// Modify and delete drop the existing port; add and modify insert the
    /// new description. Returns false, leaving the state untouched, when the
    /// switch has not sent its features yet: the FEATURES_REPLY replaces the
    /// whole port set anyway.
    pub fn apply_port_status(&mut self, status: &PortStatus) -> bool {
        if self.datapath_id.is_none() {
            return false;
        }

        let port_no = status.desc.port_no;
        if matches!(status.reason, PortReason::Delete | PortReason::Modify) {
            self.ports.remove(&port_no);
        }
        if matches!(status.reason, PortReason::Add | PortReason::Modify) {
            self.ports.insert(port_no, Port::from(&status.desc));
        }
        true
    }

    pub fn datapath_id(&self) -> Option<u64> {
        self.datapath_id
    }

    pub fn has_features(&self) -> bool {
        self.datapath_id.is_some()
    }

    pub fn port(&self, port_no: u16) -> Option<&Port> {
        self.ports.get(&port_no)
    }

    pub fn port_by_name(&self, name: &str) -> Option<&Port> {
        self.ports.values().find(|p| p.name == name)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn snapshot(&self) -> Option<SwitchSnapshot> {
        self.datapath_id.map(|datapath_id| SwitchSnapshot {
            datapath_id,
            ports: self.ports.values().cloned().collect(),
        })
    }
}

/// Store key of the snapshot cached for `session`.
pub fn session_key(session: SessionId) -> String {
    store::dp_features_key(&session.to_string())
}

/// Writes the snapshot of `session` and lists it in the session list.
pub async fn publish_features(
    store: &dyn StateStore,
    session: SessionId,
    snapshot: &SwitchSnapshot,
) -> CoinCommonResult<()> {
    let key = session_key(session);
    store::save(store, &key, snapshot).await?;

    let mut sessions: Vec<String> = store::load(store, DP_FEATURES_SOCK_LIST_KEY)
        .await?
        .unwrap_or_default();
    if !sessions.contains(&key) {
        sessions.push(key);
        store::save(store, DP_FEATURES_SOCK_LIST_KEY, &sessions).await?;
    }
    Ok(())
}

/// Removes the snapshot of `session` and its entry in the session list.
pub async fn forget_features(store: &dyn StateStore, session: SessionId) -> CoinCommonResult<()> {
    let key = session_key(session);
    store.delete(&key).await?;

    let sessions: Option<Vec<String>> = store::load(store, DP_FEATURES_SOCK_LIST_KEY).await?;
    if let Some(mut sessions) = sessions {
        let before = sessions.len();
        sessions.retain(|s| s != &key);
        if sessions.len() != before {
            store::save(store, DP_FEATURES_SOCK_LIST_KEY, &sessions).await?;
        }
    }
    Ok(())
}
