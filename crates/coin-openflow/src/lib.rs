//! OpenFlow 1.0 wire codec.
//!
//! Encodes and decodes the subset of OpenFlow 1.0 the COIN controller speaks
//! with an Open vSwitch datapath:
//!
//! - [`Message`]: the decoded message set (hello, echo, features, port
//!   status, packet in/out, flow-mod, barrier, error)
//! - [`OfpMatch`]: the 40-byte match structure with wildcard derivation
//! - [`PhyPort`]: the 48-byte physical port descriptor
//! - [`OfpFrameCodec`]: a `tokio_util` codec that splits a byte stream into
//!   frames on the header length field
//! - [`packet`]: just enough Ethernet/ARP parsing to classify packet-ins
//!
//! # Example
//!
//! ```
//! use coin_openflow::{Message, next_xid};
//!
//! let bytes = Message::Hello.encode(next_xid()).unwrap();
//! let (_, decoded) = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded, Message::Hello);
//! ```

pub mod action;
pub mod codec;
pub mod consts;
pub mod error;
pub mod header;
pub mod message;
pub mod ofmatch;
pub mod packet;
pub mod port;
mod xid;

pub use action::Action;
pub use codec::OfpFrameCodec;
pub use error::{CodecError, CodecResult};
pub use header::{Header, MsgType};
pub use message::{
    ErrorMsg, FlowMod, FlowModCommand, FlowRemoved, Message, PacketIn, PacketOut, PortReason,
    PortStatus, SwitchConfig, SwitchFeatures,
};
pub use ofmatch::{IpPrefix, OfpMatch};
pub use port::PhyPort;
pub use xid::next_xid;
