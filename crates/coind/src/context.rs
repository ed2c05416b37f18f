//! Collaborators shared by the mode drivers.

use coin_common::StateStore;
use std::sync::Arc;

use crate::connection::ConnectionRegistry;
use crate::default_policy::DefaultPolicy;
use crate::fabric::FabricManager;
use crate::intf::InterfaceManager;
use crate::loif::LocalInterfaceManager;
use crate::scheduler::ProbeScheduler;

/// State and collaborators owned by the dispatch task, minus the drivers.
pub struct Services {
    pub registry: ConnectionRegistry,
    pub policy: DefaultPolicy,
    pub fabric: FabricManager,
    pub loifs: LocalInterfaceManager,
    pub intf: Arc<dyn InterfaceManager>,
    pub store: Arc<dyn StateStore>,
    pub scheduler: Arc<dyn ProbeScheduler>,
}

impl Services {
    pub fn new(
        fabric: FabricManager,
        intf: Arc<dyn InterfaceManager>,
        store: Arc<dyn StateStore>,
        scheduler: Arc<dyn ProbeScheduler>,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            policy: DefaultPolicy::new(),
            fabric,
            loifs: LocalInterfaceManager::new(),
            intf,
            store,
            scheduler,
        }
    }

    /// Borrows everything a driver call needs.
    pub fn context(&mut self) -> DriverContext<'_> {
        DriverContext {
            registry: &self.registry,
            policy: &mut self.policy,
            fabric: &mut self.fabric,
            loifs: &mut self.loifs,
            intf: self.intf.as_ref(),
            store: self.store.as_ref(),
            scheduler: self.scheduler.as_ref(),
        }
    }
}

/// What a mode driver may touch while handling one event.
pub struct DriverContext<'a> {
    pub registry: &'a ConnectionRegistry,
    pub policy: &'a mut DefaultPolicy,
    pub fabric: &'a mut FabricManager,
    pub loifs: &'a mut LocalInterfaceManager,
    pub intf: &'a dyn InterfaceManager,
    pub store: &'a dyn StateStore,
    pub scheduler: &'a dyn ProbeScheduler,
}
