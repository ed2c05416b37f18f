//! Bond interface records and errors.

use serde::Serialize;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::error::CoinError;

/// A virtual interface whose traffic is spread over slave uplinks.
///
/// `active` is always one of `slaves`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BondInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub datapath: String,
    slaves: Vec<String>,
    active: Option<String>,
}

impl BondInterface {
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, datapath: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip,
            datapath: datapath.into(),
            slaves: Vec::new(),
            active: None,
        }
    }

    /// Slaves in enslavement order.
    pub fn slaves(&self) -> &[String] {
        &self.slaves
    }

    pub fn is_slave(&self, interface: &str) -> bool {
        self.slaves.iter().any(|s| s == interface)
    }

    pub fn active_slave(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub(crate) fn add_slave(&mut self, interface: &str) {
        if !self.is_slave(interface) {
            self.slaves.push(interface.to_string());
        }
    }

    pub(crate) fn remove_slave(&mut self, interface: &str) {
        self.slaves.retain(|s| s != interface);
        if self.active.as_deref() == Some(interface) {
            self.active = None;
        }
    }

    pub(crate) fn set_active(&mut self, interface: Option<&str>) {
        self.active = interface
            .filter(|i| self.is_slave(i))
            .map(str::to_string);
    }
}

/// Bonding failures. The `Display` text is the `status` of the reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BondError {
    #[error("Unknown bond-interface {0}")]
    UnknownBond(String),

    #[error("Unknown IP address {0}")]
    InvalidAddress(String),

    #[error("Unknown interface {0}")]
    UnknownInterface(String),

    #[error("Unknown command {0}")]
    UnknownCommand(String),

    #[error("Missing field {0}")]
    MissingField(&'static str),

    #[error("already enslaved, no action done")]
    AlreadyEnslaved,

    #[error("not enslaved, no action done")]
    NotEnslaved,

    #[error("{interface} is not slave of {bond}, make active slave")]
    NotSlave { interface: String, bond: String },

    #[error("already active slave, no action done")]
    AlreadyActive,

    #[error("Bond interface has slaves {}", .0.join(", "))]
    HasSlaves(Vec<String>),

    /// Switch, fabric or OS failure
    #[error("{0}")]
    Failed(String),
}

impl BondError {
    /// Refusals that leave everything untouched; the reply keeps the verb
    /// of the command instead of `"error"`.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            BondError::AlreadyEnslaved
                | BondError::NotEnslaved
                | BondError::NotSlave { .. }
                | BondError::AlreadyActive
                | BondError::HasSlaves(_)
        )
    }
}

impl From<CoinError> for BondError {
    fn from(e: CoinError) -> Self {
        BondError::Failed(e.to_string())
    }
}

impl From<coin_openflow::CodecError> for BondError {
    fn from(e: coin_openflow::CodecError) -> Self {
        BondError::Failed(e.to_string())
    }
}
