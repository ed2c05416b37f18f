//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use coin_coind::config::{CoindConfig, OperatingMode};
use coin_coind::error::{CoinError, Result};
use coin_coind::fabric::{Fabric, FabricManager};
use coin_coind::intf::{InterfaceAddresses, InterfaceManager, Route};
use coin_coind::scheduler::{ProbeHandle, ProbeScheduler, ProbeTask};
use coin_coind::{CoinEvent, CoinServer, Services};
use coin_common::{MemoryStore, StateStore};
use coin_openflow::{Action, FlowMod, FlowModCommand, Message, OfpMatch, PhyPort, SwitchFeatures};
use coin_types::{Ipv4Range, MacAddress};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
}

#[derive(Debug, Default)]
struct Host {
    links: BTreeMap<String, InterfaceAddresses>,
    routes: Vec<Route>,
    neighbours: BTreeMap<Ipv4Addr, MacAddress>,
    next_veth: u32,
    next_mac: u8,
    ops: Vec<String>,
}

impl Host {
    fn add_link(&mut self, name: &str) {
        self.next_mac += 1;
        let ethernet = Some(MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x01, self.next_mac]));
        self.links.insert(
            name.to_string(),
            InterfaceAddresses {
                ethernet,
                ipv4: Vec::new(),
            },
        );
    }

    fn link_mut(&mut self, name: &str) -> Result<&mut InterfaceAddresses> {
        self.links
            .get_mut(name)
            .ok_or_else(|| CoinError::interface(name, "no such device"))
    }
}

/// An in-memory host: links, addresses, routes and neighbours.
#[derive(Debug, Default)]
pub struct FakeInterfaceManager {
    host: Mutex<Host>,
}

impl FakeInterfaceManager {
    pub fn with_links(names: &[(&str, MacAddress)]) -> Self {
        let fake = Self::default();
        {
            let mut host = fake.host.lock();
            for (name, mac) in names {
                host.links.insert(
                    name.to_string(),
                    InterfaceAddresses {
                        ethernet: Some(*mac),
                        ipv4: Vec::new(),
                    },
                );
            }
        }
        fake
    }

    /// What DHCP would leave behind on `interface`.
    pub fn lease(&self, interface: &str, range: Ipv4Range, gateway: Ipv4Addr) {
        let mut host = self.host.lock();
        if let Ok(link) = host.link_mut(interface) {
            link.ipv4 = vec![range.into()];
        }
        host.routes.push(Route {
            destination: range.network(),
            prefix_len: range.prefix_len(),
            gateway: None,
            interface: interface.to_string(),
        });
        host.routes
            .push(Route::default_route(interface, Some(gateway)));
    }

    pub fn learn_neighbour(&self, ip: Ipv4Addr, mac: MacAddress) {
        self.host.lock().neighbours.insert(ip, mac);
    }

    pub fn routes_now(&self) -> Vec<Route> {
        self.host.lock().routes.clone()
    }

    pub fn ipv4_of(&self, interface: &str) -> Vec<Ipv4Range> {
        self.host
            .lock()
            .links
            .get(interface)
            .map(|l| {
                l.ipv4
                    .iter()
                    .filter_map(|e| Ipv4Range::new(e.addr, e.netmask).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn mac_of(&self, interface: &str) -> Option<MacAddress> {
        self.host.lock().links.get(interface).and_then(|l| l.ethernet)
    }

    pub fn has_link(&self, interface: &str) -> bool {
        self.host.lock().links.contains_key(interface)
    }

    pub fn neighbour(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        self.host.lock().neighbours.get(&ip).copied()
    }

    pub fn ops(&self) -> Vec<String> {
        self.host.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.host.lock().ops.clear();
    }
}

#[async_trait]
impl InterfaceManager for FakeInterfaceManager {
    async fn interfaces(&self) -> Result<Vec<String>> {
        Ok(self.host.lock().links.keys().cloned().collect())
    }

    async fn addresses(&self, interface: &str) -> Result<InterfaceAddresses> {
        self.host
            .lock()
            .links
            .get(interface)
            .cloned()
            .ok_or_else(|| CoinError::interface(interface, "no such device"))
    }

    async fn set_hw_addr(&self, interface: &str, mac: MacAddress) -> Result<()> {
        let mut host = self.host.lock();
        host.link_mut(interface)?.ethernet = Some(mac);
        host.ops.push(format!("hwaddr {} {}", interface, mac));
        Ok(())
    }

    async fn set_ipv4_addr(&self, interface: &str, range: Option<Ipv4Range>) -> Result<()> {
        let mut host = self.host.lock();
        host.link_mut(interface)?.ipv4 = range.map(Into::into).into_iter().collect();
        let shown = range.map_or_else(|| "flush".to_string(), |r| r.to_string());
        host.ops.push(format!("addr {} {}", interface, shown));
        Ok(())
    }

    async fn link_up(&self, interface: &str) -> Result<()> {
        let mut host = self.host.lock();
        host.link_mut(interface)?;
        host.ops.push(format!("up {}", interface));
        Ok(())
    }

    async fn create_veth(&self) -> Result<String> {
        let mut host = self.host.lock();
        let name = format!("veth{}", host.next_veth);
        host.next_veth += 2;
        host.add_link(&name);
        host.ops.push(format!("veth {}", name));
        Ok(name)
    }

    async fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        let mut host = self.host.lock();
        host.add_link(name);
        host.add_link(peer);
        host.ops.push(format!("veth {} {}", name, peer));
        Ok(())
    }

    async fn delete_link(&self, interface: &str) -> Result<()> {
        let mut host = self.host.lock();
        host.links.remove(interface);
        host.ops.push(format!("del {}", interface));
        Ok(())
    }

    async fn routes(&self) -> Result<Vec<Route>> {
        Ok(self.host.lock().routes.clone())
    }

    async fn add_route(&self, route: &Route) -> Result<()> {
        let mut host = self.host.lock();
        if !host.routes.contains(route) {
            host.routes.push(route.clone());
        }
        host.ops.push(format!("route add {}", route));
        Ok(())
    }

    async fn del_route(&self, route: &Route) -> Result<()> {
        let mut host = self.host.lock();
        host.routes.retain(|r| r != route);
        host.ops.push(format!("route del {}", route));
        Ok(())
    }

    async fn neighbour_mac(&self, ip: Ipv4Addr, _interface: &str) -> Result<Option<MacAddress>> {
        Ok(self.host.lock().neighbours.get(&ip).copied())
    }

    async fn set_neighbour(&self, ip: Ipv4Addr, mac: MacAddress, interface: &str) -> Result<()> {
        let mut host = self.host.lock();
        host.neighbours.insert(ip, mac);
        host.ops.push(format!("neigh {} {} {}", ip, mac, interface));
        Ok(())
    }

    async fn run_dhcp_client(&self, interface: &str) -> Result<()> {
        self.host.lock().ops.push(format!("dhclient {}", interface));
        Ok(())
    }
}

/// Datapaths whose port numbers follow attachment order, starting at 1.
#[derive(Debug, Default)]
pub struct FakeFabric {
    datapaths: Mutex<BTreeMap<String, Vec<String>>>,
}

impl FakeFabric {
    pub fn datapaths(&self) -> Vec<String> {
        self.datapaths.lock().keys().cloned().collect()
    }

    pub fn ports(&self, datapath: &str) -> Vec<String> {
        self.datapaths
            .lock()
            .get(datapath)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fabric for FakeFabric {
    async fn add_datapath(&self, name: &str) -> Result<()> {
        self.datapaths.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn del_datapath(&self, name: &str) -> Result<()> {
        self.datapaths.lock().remove(name);
        Ok(())
    }

    async fn add_port(&self, datapath: &str, interface: &str) -> Result<()> {
        let mut datapaths = self.datapaths.lock();
        let ports = datapaths.entry(datapath.to_string()).or_default();
        if !ports.iter().any(|p| p == interface) {
            ports.push(interface.to_string());
        }
        Ok(())
    }

    async fn del_port(&self, datapath: &str, interface: &str) -> Result<()> {
        if let Some(ports) = self.datapaths.lock().get_mut(datapath) {
            ports.retain(|p| p != interface);
        }
        Ok(())
    }

    async fn port_number(&self, datapath: &str, interface: &str) -> Result<Option<u16>> {
        Ok(self.datapaths.lock().get(datapath).and_then(|ports| {
            ports
                .iter()
                .position(|p| p == interface)
                .map(|i| i as u16 + 1)
        }))
    }
}

/// Records probes instead of arming timers.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<(ProbeTask, Duration)>>,
}

impl RecordingScheduler {
    pub fn take(&self) -> Vec<(ProbeTask, Duration)> {
        std::mem::take(&mut *self.scheduled.lock())
    }
}

impl ProbeScheduler for RecordingScheduler {
    fn schedule(&self, task: ProbeTask, delay: Duration) -> ProbeHandle {
        self.scheduled.lock().push((task, delay));
        ProbeHandle::detached()
    }
}

/// Flow table of a fake switch, fed with the FLOW_MODs the controller sent.
#[derive(Debug, Default)]
pub struct FlowTable {
    entries: Vec<FlowMod>,
    pub flow_mods: usize,
}

impl FlowTable {
    /// Applies every FLOW_MOD in `frames`; other messages are ignored.
    pub fn apply_all(&mut self, frames: &[Bytes]) {
        for frame in frames {
            if let Ok((_, Message::FlowMod(flow_mod))) = Message::decode(frame) {
                self.apply(flow_mod);
            }
        }
    }

    pub fn apply(&mut self, flow_mod: FlowMod) {
        self.flow_mods += 1;
        match flow_mod.command {
            FlowModCommand::Add => {
                self.entries.retain(|e| {
                    !(e.ofp_match == flow_mod.ofp_match && e.priority == flow_mod.priority)
                });
                self.entries.push(flow_mod);
            }
            FlowModCommand::DeleteStrict => {
                self.entries.retain(|e| {
                    let same = e.ofp_match == flow_mod.ofp_match && e.priority == flow_mod.priority;
                    !(same && outputs_to(e, flow_mod.out_port))
                });
            }
            other => panic!("unexpected flow_mod command {:?}", other),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[FlowMod] {
        &self.entries
    }

    /// Entries matching `in_port`.
    pub fn from_port(&self, in_port: u16) -> Vec<&FlowMod> {
        self.entries
            .iter()
            .filter(|e| e.ofp_match.in_port == Some(in_port))
            .collect()
    }

    pub fn find(&self, ofp_match: &OfpMatch, priority: u16) -> Option<&FlowMod> {
        self.entries
            .iter()
            .find(|e| &e.ofp_match == ofp_match && e.priority == priority)
    }
}

fn outputs_to(entry: &FlowMod, out_port: u16) -> bool {
    out_port == coin_openflow::consts::ofpp::NONE
        || entry
            .actions
            .iter()
            .any(|a| matches!(a, Action::Output { port, .. } if *port == out_port))
}

/// A switch attached to the server through an in-memory session.
pub struct TestSwitch {
    pub session: u64,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    pub table: FlowTable,
}

impl TestSwitch {
    /// Opens a session and completes the handshake with `ports`.
    pub async fn connect(server: &mut CoinServer, session: u64, ports: &[(u16, &str)]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        server
            .handle_event(CoinEvent::SessionOpened {
                session,
                outbound: tx,
            })
            .await;
        let mut switch = Self {
            session,
            outbound: rx,
            table: FlowTable::default(),
        };
        switch.send(server, &Message::Hello, 1).await;

        let features = SwitchFeatures {
            datapath_id: 0x00_00_00_00_00_01,
            n_buffers: 256,
            n_tables: 1,
            capabilities: 0,
            actions: 1,
            ports: ports
                .iter()
                .map(|(no, name)| PhyPort::new(*no, *name, mac(*no as u8)))
                .collect(),
        };
        switch
            .send(server, &Message::FeaturesReply(features), 2)
            .await;
        switch.sync();
        switch
    }

    pub async fn send(&mut self, server: &mut CoinServer, message: &Message, xid: u32) {
        let frame = message.encode(xid).unwrap();
        server
            .handle_event(CoinEvent::SessionFrame {
                session: self.session,
                frame,
            })
            .await;
    }

    /// Drains the frames sent so far.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Applies pending FLOW_MODs to the table, returning how many arrived.
    pub fn sync(&mut self) -> usize {
        let frames = self.drain();
        let before = self.table.flow_mods;
        self.table.apply_all(&frames);
        self.table.flow_mods - before
    }
}

/// A server wired to fakes.
pub struct Harness {
    pub server: CoinServer,
    pub intf: Arc<FakeInterfaceManager>,
    pub fabric: Arc<FakeFabric>,
    pub store: Arc<MemoryStore>,
    pub scheduler: Arc<RecordingScheduler>,
}

impl Harness {
    pub fn new(config: CoindConfig, intf: FakeInterfaceManager) -> Self {
        let intf = Arc::new(intf);
        let fabric = Arc::new(FakeFabric::default());
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let services = Services::new(
            FabricManager::new(fabric.clone()),
            intf.clone(),
            store.clone(),
            scheduler.clone(),
        );
        let server = CoinServer::new(config, services).unwrap();
        Self {
            server,
            intf,
            fabric,
            store,
            scheduler,
        }
    }

    pub fn bonding(intf: FakeInterfaceManager) -> Self {
        let mut config = CoindConfig::default();
        config.mode.name = OperatingMode::Bonding;
        Self::new(config, intf)
    }

    pub fn nat(interfaces: &[&str], intf: FakeInterfaceManager) -> Self {
        let mut config = CoindConfig::default();
        config.mode.name = OperatingMode::Nat;
        config.nat.interfaces = interfaces.iter().map(|s| s.to_string()).collect();
        Self::new(config, intf)
    }

    /// Sends one control request through the event path.
    pub async fn control(&mut self, request: serde_json::Value) -> Option<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.server
            .handle_event(CoinEvent::Control { request, reply })
            .await;
        rx.await.unwrap()
    }

    /// Delivers every recorded probe, returning how many were delivered.
    pub async fn run_probes(&mut self) -> usize {
        let probes = self.scheduler.take();
        let count = probes.len();
        for (task, _) in probes {
            self.server.handle_event(CoinEvent::Probe(task)).await;
        }
        count
    }

    pub async fn stored(&self, key: &str) -> Option<serde_json::Value> {
        self.store.get(key).await.unwrap()
    }
}
