//! COIN controller daemon.
//!
//! An OpenFlow 1.0 controller that turns a host's uplinks into either an IP
//! uplink bond or a NAT multi-homed setup, driven through a JSON control
//! socket.
//!
//! # Architecture
//!
//! ```text
//!  switches (TCP 6633)      control clients (unix socket)      probe timers
//!        │                           │                              │
//!        ▼                           ▼                              ▼
//!  ofserver ──────────────┐     control ─────────┐        scheduler ─┐
//!                         ▼                      ▼                   ▼
//!                     ┌──────────────── CoinEvent channel ──────────────┐
//!                     │                 server (one task)               │
//!                     │  ConnectionRegistry → Dispatcher → components   │
//!                     │  DefaultPolicy · BondingDriver · NatDriver      │
//!                     └─────────────────────────────────────────────────┘
//!                          │             │              │
//!                          ▼             ▼              ▼
//!                       Fabric   InterfaceManager   StateStore
//! ```
//!
//! Only the server task touches controller state. Everything with a side
//! effect on the host sits behind a trait so tests can substitute fakes.

pub mod bonding;
pub mod config;
pub mod connection;
pub mod context;
pub mod control;
pub mod default_policy;
pub mod error;
pub mod event;
pub mod fabric;
pub mod flows;
pub mod intf;
pub mod loif;
pub mod nat;
pub mod ofserver;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod switch_state;

pub use config::{CoindConfig, OperatingMode};
pub use context::{DriverContext, Services};
pub use error::{CoinError, Result};
pub use event::{CoinEvent, EventReceiver, EventSender};
pub use server::CoinServer;
