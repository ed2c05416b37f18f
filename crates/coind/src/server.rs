//! The dispatch task: owns all controller state and handles one
//! [`CoinEvent`] at a time.

use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{debug, error, field, info, instrument, warn};

use crate::bonding::{self, BondingDriver};
use crate::config::{CoindConfig, OperatingMode};
use crate::context::Services;
use crate::default_policy::DefaultPolicy;
use crate::error::Result;
use crate::event::{CoinEvent, ComponentId, Dispatcher, EventKind, EventReceiver, Notification};
use crate::nat::{NatDriver, NatSettings};
use crate::state::{CoinConfig, MODE_KEY};
use crate::switch_state;

const FEATURE_CACHE_SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::FeaturesReceived,
    EventKind::PortStatusChanged,
    EventKind::SwitchLeft,
];

pub struct CoinServer {
    config: CoinConfig,
    settings: CoindConfig,
    services: Services,
    dispatcher: Dispatcher,
    bonding: BondingDriver,
    nat: NatDriver,
}

impl CoinServer {
    pub fn new(settings: CoindConfig, services: Services) -> Result<Self> {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(ComponentId::FeatureCache, FEATURE_CACHE_SUBSCRIPTIONS);
        dispatcher.register(ComponentId::DefaultPolicy, DefaultPolicy::SUBSCRIPTIONS);
        match settings.mode.name {
            OperatingMode::Bonding => {
                dispatcher.register(ComponentId::Bonding, BondingDriver::SUBSCRIPTIONS)
            }
            OperatingMode::Nat => dispatcher.register(ComponentId::Nat, NatDriver::SUBSCRIPTIONS),
        }

        Ok(Self {
            config: CoinConfig::new(),
            bonding: BondingDriver::new(&settings.fabric.datapath),
            nat: NatDriver::new(NatSettings::from_config(&settings)?),
            settings,
            services,
            dispatcher,
        })
    }

    pub fn config(&self) -> &CoinConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn bonding(&self) -> &BondingDriver {
        &self.bonding
    }

    pub fn nat(&self) -> &NatDriver {
        &self.nat
    }

    pub fn mode(&self) -> OperatingMode {
        self.settings.mode.name
    }

    /// Creates the datapath and brings up the configured mode.
    pub async fn start(&mut self) -> Result<()> {
        let datapath = self.settings.fabric.datapath.clone();
        if self.settings.fabric.create_datapath {
            self.services.fabric.add_dp(&datapath).await?;
        }

        let mode = self.settings.mode.name;
        if mode == OperatingMode::Nat {
            let interfaces = self.settings.nat.interfaces.clone();
            let mut ctx = self.services.context();
            self.nat.setup(&interfaces, &mut ctx).await?;
        }
        self.config.set(MODE_KEY, mode.description());
        info!(mode = %mode, datapath = %datapath, "Controller started");
        Ok(())
    }

    /// Handles events until the channel closes or `Shutdown` arrives.
    pub async fn run(&mut self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Handles one event; returns false once the server should stop.
    pub async fn handle_event(&mut self, event: CoinEvent) -> bool {
        match event {
            CoinEvent::SessionOpened { session, outbound } => {
                if let Err(e) = self
                    .services
                    .registry
                    .open(session, outbound, Instant::now())
                {
                    warn!(session, error = %e, "Failed to greet switch");
                }
            }
            CoinEvent::SessionFrame { session, frame } => {
                let notifications = self
                    .services
                    .registry
                    .on_frame(session, &frame, Instant::now());
                for notification in notifications {
                    self.notify(notification).await;
                }
            }
            CoinEvent::SessionClosed { session } => {
                if let Some(notification) = self.services.registry.close(session) {
                    self.notify(notification).await;
                }
            }
            CoinEvent::Control { request, reply } => {
                let response = self.handle_control(&request).await;
                if reply.send(response).is_err() {
                    debug!("Control client left before the reply");
                }
            }
            CoinEvent::Probe(task) => {
                let mut ctx = self.services.context();
                let outcome = self.nat.handle_probe(task, &mut ctx).await;
                debug!(?outcome, "Probe handled");
            }
            CoinEvent::EchoTick => self.echo_tick().await,
            CoinEvent::Shutdown => return false,
        }
        true
    }

    async fn echo_tick(&mut self) {
        let timeout = self.settings.echo_timeout();
        for session in self.services.registry.stale_sessions(Instant::now(), timeout) {
            warn!(session, "Switch silent for too long, closing");
            if let Some(notification) = self.services.registry.close(session) {
                self.notify(notification).await;
            }
        }
        self.services.registry.send_echo_requests();
    }

    /// Hands `notification` to every subscribed component.
    #[instrument(skip(self, notification), fields(kind = ?notification.kind(), session = notification.session()))]
    async fn notify(&mut self, notification: Notification) {
        let targets = self.dispatcher.targets(notification.kind()).to_vec();
        for target in targets {
            if let Err(e) = self.deliver(target, &notification).await {
                warn!(component = ?target, error = %e, "Notification handling failed");
            }
        }
    }

    async fn deliver(&mut self, target: ComponentId, notification: &Notification) -> Result<()> {
        let store = self.services.store.as_ref();
        match (target, notification) {
            (ComponentId::FeatureCache, Notification::SwitchLeft { session, .. }) => {
                switch_state::forget_features(store, *session).await?;
            }
            (ComponentId::FeatureCache, _) => {
                let session = notification.session();
                let snapshot = self
                    .services
                    .registry
                    .switch(session)
                    .and_then(|s| s.snapshot());
                if let Some(snapshot) = snapshot {
                    switch_state::publish_features(store, session, &snapshot).await?;
                }
            }
            (ComponentId::DefaultPolicy, Notification::FeaturesReceived { session, .. }) => {
                self.services
                    .policy
                    .install(&self.services.registry, *session)?;
            }
            (ComponentId::DefaultPolicy, Notification::PacketIn { session, packet }) => {
                self.services
                    .policy
                    .drop_flow(&self.services.registry, *session, packet)?;
            }
            (ComponentId::Nat, _) => {
                let mut ctx = self.services.context();
                self.nat.on_notification(notification, &mut ctx).await?;
            }
            (component, _) => {
                debug!(?component, "Nothing to do for notification");
            }
        }
        Ok(())
    }

    /// Handles one control request; `None` means no reply is sent.
    #[instrument(skip(self, request), fields(subtype = field::Empty, command = field::Empty))]
    pub async fn handle_control(&mut self, request: &Value) -> Option<Value> {
        if request.get("type").and_then(Value::as_str) != Some("coin") {
            debug!(%request, "Ignoring non-COIN message");
            return None;
        }
        let subtype = request.get("subtype").and_then(Value::as_str).unwrap_or("");
        let command = request.get("command").and_then(Value::as_str).unwrap_or("");
        tracing::Span::current()
            .record("subtype", subtype)
            .record("command", command);

        match subtype {
            "global" => self.handle_global(command).await,
            "loif" => self.handle_loif(command, request).await,
            "ovs" => Some(self.handle_ovs(command, request).await),
            bonding::SUBTYPE => {
                let mut ctx = self.services.context();
                Some(self.bonding.handle_command(request, &mut ctx).await)
            }
            other => {
                debug!(subtype = other, "Unknown subtype");
                None
            }
        }
    }

    async fn handle_global(&mut self, command: &str) -> Option<Value> {
        let mut reply = reply_header("global");
        match command {
            "get_mode" => {
                reply.insert("mode".to_string(), json!(self.config.mode()));
            }
            "get_eth_interfaces" | "get_interfaces" => {
                let interfaces = match self.services.intf.snapshot().await {
                    Ok(snapshot) => json!(snapshot),
                    Err(e) => {
                        error!(error = %e, "Failed to list interfaces");
                        json!(e.to_string())
                    }
                };
                reply.insert("interfaces".to_string(), interfaces);
            }
            other => {
                debug!(command = other, "Unknown global command");
                return None;
            }
        }
        Some(Value::Object(reply))
    }

    async fn handle_loif(&mut self, command: &str, request: &Value) -> Option<Value> {
        if !matches!(command, "create_lo_intf" | "dhclient") {
            debug!(command, "Unknown loif command");
            return None;
        }
        let mut reply = reply_header("loif");
        let Some(name) = request.get("name").and_then(Value::as_str) else {
            reply.insert("status".to_string(), json!("Missing field name"));
            return Some(Value::Object(reply));
        };

        match command {
            "create_lo_intf" => match self.add_loif(name).await {
                Ok((switch_intf, client_intf)) => {
                    reply.insert("switch_intf".to_string(), json!(switch_intf));
                    reply.insert("client_intf".to_string(), json!(client_intf));
                }
                Err(e) => {
                    reply.insert("status".to_string(), json!(e.to_string()));
                }
            },
            "dhclient" => {
                let mut ctx = self.services.context();
                let result = match self.nat.dhclient_mirror(name, &mut ctx).await {
                    Ok(result) => result.to_string(),
                    Err(e) => e.to_string(),
                };
                reply.insert("dhclient result".to_string(), json!(result));
            }
            _ => return None,
        }
        Some(Value::Object(reply))
    }

    async fn add_loif(&mut self, name: &str) -> Result<(String, String)> {
        let loif = self
            .services
            .loifs
            .add(name, self.services.intf.as_ref())
            .await?;
        self.services
            .fabric
            .add_if(&self.settings.fabric.datapath, &loif.switch_intf)
            .await?;
        Ok((loif.switch_intf, loif.client_intf))
    }

    async fn handle_ovs(&mut self, command: &str, request: &Value) -> Value {
        let mut reply = reply_header("ovs");
        let name = request.get("name").and_then(Value::as_str);
        let result = match (command, name) {
            ("add_dp", Some(name)) => self.services.fabric.add_dp(name).await.map(|_| ()),
            ("del_dp", Some(name)) => self.services.fabric.del_dp(name).await.map(|_| ()),
            ("add_dp" | "del_dp", None) => {
                reply.insert("status".to_string(), json!("Missing field name"));
                return Value::Object(reply);
            }
            _ => {
                reply.insert("error".to_string(), json!("Unknown command"));
                return Value::Object(reply);
            }
        };
        match result {
            Ok(()) => {
                reply.insert("executed".to_string(), json!(true));
            }
            Err(e) => {
                warn!(command, error = %e, "Datapath command failed");
                reply.insert("executed".to_string(), json!(false));
                reply.insert("status".to_string(), json!(e.to_string()));
            }
        }
        Value::Object(reply)
    }

    /// Cancels outstanding probes and removes the datapaths this process
    /// created.
    pub async fn shutdown(&mut self) {
        info!("Shutting down");
        self.nat.shutdown();
        self.services.fabric.cleanup().await;
    }
}

fn reply_header(subtype: &str) -> Map<String, Value> {
    let mut reply = Map::new();
    reply.insert("type".to_string(), json!("coin"));
    reply.insert("subtype".to_string(), json!(subtype));
    reply
}
