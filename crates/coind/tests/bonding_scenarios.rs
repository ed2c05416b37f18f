//! Bonding requests driven through the server against a fake switch.

mod common;

use coin_coind::bonding::BondingDriver;
use coin_coind::context::Services;
use coin_coind::fabric::FabricManager;
use coin_coind::flows::Priority;
use coin_common::MemoryStore;
use coin_openflow::{
    Action, FlowModCommand, IpPrefix, Message, OfpMatch, PhyPort, SwitchFeatures,
};
use common::{
    mac, FakeFabric, FakeInterfaceManager, FlowTable, Harness, RecordingScheduler, TestSwitch,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

const BOND_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

fn bond_match(bond_port: u16) -> OfpMatch {
    OfpMatch {
        in_port: Some(bond_port),
        dl_type: Some(0x0800),
        nw_dst: Some(IpPrefix::host(BOND_IP)),
        ..OfpMatch::all()
    }
}

fn slave_match(slave_port: u16) -> OfpMatch {
    OfpMatch {
        in_port: Some(slave_port),
        ..OfpMatch::all()
    }
}

fn bond_request(command: &str, fields: serde_json::Value) -> serde_json::Value {
    let mut request = json!({"type": "coin", "subtype": "ipupbond", "command": command});
    if let (Some(request), Some(fields)) = (request.as_object_mut(), fields.as_object()) {
        request.extend(fields.clone());
    }
    request
}

/// A started bonding server, a switch with `veth0`=1, `eth0`=2, `eth1`=3
/// and a bond `veth0` for 10.0.0.5.
async fn bonded() -> (Harness, TestSwitch) {
    let intf = FakeInterfaceManager::with_links(&[("eth0", mac(0x10)), ("eth1", mac(0x11))]);
    let mut harness = Harness::bonding(intf);
    harness.server.start().await.unwrap();

    let switch = TestSwitch::connect(
        &mut harness.server,
        1,
        &[(1, "veth0"), (2, "eth0"), (3, "eth1")],
    )
    .await;

    let reply = harness
        .control(bond_request("create", json!({"ip-address": "10.0.0.5"})))
        .await
        .unwrap();
    assert_eq!(
        reply,
        json!({"type": "coin", "subtype": "ipupbond", "command": "created", "interface": "veth0"})
    );
    (harness, switch)
}

#[tokio::test]
async fn test_create_attaches_bond_interface() {
    let (harness, switch) = bonded().await;

    assert_eq!(harness.fabric.ports("dp0"), vec!["veth0".to_string()]);
    assert!(harness.intf.ops().contains(&"up veth0".to_string()));
    let bond = harness.server.bonding().bond("veth0").unwrap();
    assert_eq!(bond.ip, BOND_IP);
    assert!(bond.slaves().is_empty());
    // Baseline policy only
    assert_eq!(switch.table.len(), 4);
}

#[tokio::test]
async fn test_create_rejects_bad_address() {
    let (mut harness, _switch) = bonded().await;
    let reply = harness
        .control(bond_request("create", json!({"ip-address": "10.0.0"})))
        .await
        .unwrap();
    assert_eq!(reply["command"], "error");
    assert_eq!(reply["status"], "Unknown IP address 10.0.0");
}

#[tokio::test]
async fn test_unknown_bond_is_an_error() {
    let (mut harness, mut switch) = bonded().await;
    let reply = harness
        .control(bond_request(
            "enslave",
            json!({"bond-interface": "bond9", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(
        reply,
        json!({
            "type": "coin",
            "subtype": "ipupbond",
            "command": "error",
            "status": "Unknown bond-interface bond9",
        })
    );
    assert_eq!(switch.sync(), 0);
}

#[tokio::test]
async fn test_unknown_interface_and_command() {
    let (mut harness, _switch) = bonded().await;
    let reply = harness
        .control(bond_request(
            "enslave",
            json!({"bond-interface": "veth0", "interface": "wlan7"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["status"], "Unknown interface wlan7");

    let reply = harness
        .control(bond_request(
            "promote",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["command"], "error");
    assert_eq!(reply["status"], "Unknown command promote");
}

#[tokio::test]
async fn test_enslave_twice_sends_one_flow_mod() {
    let (mut harness, mut switch) = bonded().await;
    let enslave = bond_request(
        "enslave",
        json!({"bond-interface": "veth0", "interface": "eth0"}),
    );

    let reply = harness.control(enslave.clone()).await.unwrap();
    assert_eq!(reply["command"], "enslaved");
    assert_eq!(reply["status"], 0);
    assert_eq!(switch.sync(), 1);

    let fanout = switch
        .table
        .find(&bond_match(1), Priority::Base.value())
        .unwrap();
    assert_eq!(fanout.actions, vec![Action::output(2)]);

    let reply = harness.control(enslave).await.unwrap();
    assert_eq!(reply["command"], "enslaved");
    assert_eq!(reply["status"], "already enslaved, no action done");
    assert_eq!(switch.sync(), 0);
}

#[tokio::test]
async fn test_fanout_covers_every_slave() {
    let (mut harness, mut switch) = bonded().await;
    for interface in ["eth0", "eth1"] {
        harness
            .control(bond_request(
                "enslave",
                json!({"bond-interface": "veth0", "interface": interface}),
            ))
            .await
            .unwrap();
    }
    switch.sync();

    let fanout = switch
        .table
        .find(&bond_match(1), Priority::Base.value())
        .unwrap();
    assert_eq!(fanout.actions, vec![Action::output(2), Action::output(3)]);
    assert_eq!(switch.table.len(), 5);

    let reply = harness
        .control(bond_request(
            "liberate",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["command"], "liberated");
    switch.sync();
    let fanout = switch
        .table
        .find(&bond_match(1), Priority::Base.value())
        .unwrap();
    assert_eq!(fanout.actions, vec![Action::output(3)]);
}

#[tokio::test]
async fn test_active_slave_lifecycle() {
    let (mut harness, mut switch) = bonded().await;
    for interface in ["eth0", "eth1"] {
        harness
            .control(bond_request(
                "enslave",
                json!({"bond-interface": "veth0", "interface": interface}),
            ))
            .await
            .unwrap();
    }
    switch.sync();

    let reply = harness
        .control(bond_request(
            "get-active-slave",
            json!({"bond-interface": "veth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["command"], "got-active-slave");
    assert_eq!(reply["status"], json!(null));

    let reply = harness
        .control(bond_request(
            "set-active-slave",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["status"], 0);
    switch.sync();

    let down = switch
        .table
        .find(&slave_match(2), Priority::Base.value())
        .unwrap();
    assert_eq!(down.actions, vec![Action::output(1)]);
    let up = switch
        .table
        .find(&bond_match(1), Priority::Lowest.value())
        .unwrap();
    assert_eq!(up.actions, vec![Action::output(2)]);

    // Same slave again changes nothing
    let reply = harness
        .control(bond_request(
            "set-active-slave",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["status"], "already active slave, no action done");
    assert_eq!(switch.sync(), 0);

    // Moving to eth1 leaves exactly one directional pair
    harness
        .control(bond_request(
            "set-active-slave",
            json!({"bond-interface": "veth0", "interface": "eth1"}),
        ))
        .await
        .unwrap();
    switch.sync();
    assert!(switch.table.find(&slave_match(2), Priority::Base.value()).is_none());
    assert_eq!(switch.table.from_port(3).len(), 1);
    let up = switch
        .table
        .find(&bond_match(1), Priority::Lowest.value())
        .unwrap();
    assert_eq!(up.actions, vec![Action::output(3)]);

    let reply = harness
        .control(bond_request(
            "get-active-slave",
            json!({"bond-interface": "veth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["status"], "eth1");
}

#[tokio::test]
async fn test_set_active_slave_requires_membership() {
    let (mut harness, _switch) = bonded().await;
    let reply = harness
        .control(bond_request(
            "set-active-slave",
            json!({"bond-interface": "veth0", "interface": "eth1"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["command"], "set-active-slave");
    assert_eq!(reply["status"], "eth1 is not slave of veth0, make active slave");
}

#[tokio::test]
async fn test_liberate_active_slave_clears_everything() {
    let (mut harness, mut switch) = bonded().await;
    harness
        .control(bond_request(
            "enslave",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    harness
        .control(bond_request(
            "set-active-slave",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    switch.sync();
    assert_eq!(switch.table.len(), 7);

    let reply = harness
        .control(bond_request(
            "liberate",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["status"], 0);
    switch.sync();

    let bond = harness.server.bonding().bond("veth0").unwrap();
    assert_eq!(bond.active_slave(), None);
    assert!(bond.slaves().is_empty());
    assert_eq!(switch.table.len(), 4);

    let reply = harness
        .control(bond_request(
            "liberate",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["status"], "not enslaved, no action done");
}

#[tokio::test]
async fn test_delete_refuses_bond_with_slaves() {
    let (mut harness, _switch) = bonded().await;
    harness
        .control(bond_request(
            "enslave",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();

    let delete = bond_request("delete", json!({"bond-interface": "veth0"}));
    let reply = harness.control(delete.clone()).await.unwrap();
    assert_eq!(reply["command"], "deleted");
    assert_eq!(reply["status"], "Bond interface has slaves eth0");
    assert!(harness.server.bonding().bond("veth0").is_some());

    harness
        .control(bond_request(
            "liberate",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    let reply = harness.control(delete).await.unwrap();
    assert_eq!(reply["status"], 0);
    assert!(harness.server.bonding().bond("veth0").is_none());
    assert!(!harness.intf.has_link("veth0"));
    assert!(harness.fabric.ports("dp0").is_empty());
}

#[tokio::test]
async fn test_enslave_without_switch_changes_nothing() {
    let intf = FakeInterfaceManager::with_links(&[("eth0", mac(0x10))]);
    let mut harness = Harness::bonding(intf);
    harness.server.start().await.unwrap();
    harness
        .control(bond_request("create", json!({"ip-address": "10.0.0.5"})))
        .await
        .unwrap();

    let reply = harness
        .control(bond_request(
            "enslave",
            json!({"bond-interface": "veth0", "interface": "eth0"}),
        ))
        .await
        .unwrap();
    assert_eq!(reply["command"], "error");
    assert_eq!(reply["status"], "No switch connected");
    assert!(harness.server.bonding().bond("veth0").unwrap().slaves().is_empty());
}

#[tokio::test]
async fn test_driver_resetting_same_active_slave_keeps_one_pair() {
    let intf = FakeInterfaceManager::with_links(&[("eth0", mac(0x10)), ("eth1", mac(0x11))]);
    let mut services = Services::new(
        FabricManager::new(Arc::new(FakeFabric::default())),
        Arc::new(intf),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingScheduler::default()),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    services.registry.open(1, tx, Instant::now()).unwrap();
    let features = Message::FeaturesReply(SwitchFeatures {
        datapath_id: 1,
        n_buffers: 0,
        n_tables: 1,
        capabilities: 0,
        actions: 1,
        ports: [(1, "veth0"), (2, "eth0"), (3, "eth1")]
            .into_iter()
            .map(|(no, name)| PhyPort::new(no, name, mac(no as u8)))
            .collect(),
    })
    .encode(2)
    .unwrap();
    services.registry.on_frame(1, &features, Instant::now());

    let mut driver = BondingDriver::new("dp0");
    let mut ctx = services.context();
    let bond = driver.create("10.0.0.5", &mut ctx).await.unwrap();
    assert_eq!(bond, "veth0");
    driver.enslave(&bond, "eth0", &ctx).unwrap();
    driver.set_active_slave(&bond, Some("eth0"), &ctx).unwrap();

    let mut table = FlowTable::default();
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    table.apply_all(&frames);
    let before = table.flow_mods;

    // Again, bypassing the request-level check
    driver.set_active_slave(&bond, Some("eth0"), &ctx).unwrap();
    let mut commands = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Ok((_, Message::FlowMod(fm))) = Message::decode(&frame) {
            commands.push(fm.command);
            table.apply(fm);
        }
    }
    assert_eq!(
        commands,
        vec![
            FlowModCommand::DeleteStrict,
            FlowModCommand::DeleteStrict,
            FlowModCommand::Add,
            FlowModCommand::Add,
        ]
    );
    assert_eq!(table.flow_mods, before + 4);

    let down = table.find(&slave_match(2), Priority::Base.value()).unwrap();
    assert_eq!(down.actions, vec![Action::output(1)]);
    assert_eq!(table.from_port(2).len(), 1);
    let ups: Vec<_> = table
        .entries()
        .iter()
        .filter(|e| e.ofp_match == bond_match(1) && e.priority == Priority::Lowest.value())
        .collect();
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].actions, vec![Action::output(2)]);
    assert_eq!(driver.active_slave(&bond).unwrap(), Some("eth0"));
}
