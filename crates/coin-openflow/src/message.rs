//! OpenFlow 1.0 messages.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Cursor, Read};

use crate::action::Action;
use crate::consts::{OFP_HEADER_LEN, OFP_MATCH_LEN, OFP_NO_BUFFER, OFP_PHY_PORT_LEN};
use crate::error::{CodecError, CodecResult};
use crate::header::{Header, MsgType};
use crate::ofmatch::OfpMatch;
use crate::port::PhyPort;

/// Error reported by the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub err_type: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

/// Switch features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub capabilities: u32,
    pub actions: u32,
    pub ports: Vec<PhyPort>,
}

/// Switch configuration set by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    pub flags: u16,
    pub miss_send_len: u16,
}

/// A packet received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub in_port: u16,
    pub reason: u8,
    pub data: Vec<u8>,
}

/// A packet sent from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: u16,
    pub actions: Vec<Action>,
    pub data: Vec<u8>,
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

impl TryFrom<u16> for FlowModCommand {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => FlowModCommand::Add,
            1 => FlowModCommand::Modify,
            2 => FlowModCommand::ModifyStrict,
            3 => FlowModCommand::Delete,
            4 => FlowModCommand::DeleteStrict,
            other => {
                return Err(CodecError::InvalidValue {
                    field: "flow_mod command",
                    value: u32::from(other),
                })
            }
        })
    }
}

/// A modification to the flow table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub ofp_match: OfpMatch,
    pub cookie: u64,
    pub command: FlowModCommand,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u16,
    pub flags: u16,
    pub actions: Vec<Action>,
}

/// A flow removed from the switch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    pub ofp_match: OfpMatch,
    pub cookie: u64,
    pub priority: u16,
    pub reason: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
}

/// What changed about a port.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortReason {
    Add = 0,
    Delete = 1,
    Modify = 2,
}

impl TryFrom<u8> for PortReason {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PortReason::Add),
            1 => Ok(PortReason::Delete),
            2 => Ok(PortReason::Modify),
            other => Err(CodecError::InvalidValue {
                field: "port_status reason",
                value: u32::from(other),
            }),
        }
    }
}

/// Asynchronous port change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PhyPort,
}

/// Decoded OpenFlow message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello,
    Error(ErrorMsg),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(SwitchFeatures),
    SetConfig(SwitchConfig),
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    PortStatus(PortStatus),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    BarrierRequest,
    BarrierReply,
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Hello => MsgType::Hello,
            Message::Error(_) => MsgType::Error,
            Message::EchoRequest(_) => MsgType::EchoRequest,
            Message::EchoReply(_) => MsgType::EchoReply,
            Message::FeaturesRequest => MsgType::FeaturesRequest,
            Message::FeaturesReply(_) => MsgType::FeaturesReply,
            Message::SetConfig(_) => MsgType::SetConfig,
            Message::PacketIn(_) => MsgType::PacketIn,
            Message::FlowRemoved(_) => MsgType::FlowRemoved,
            Message::PortStatus(_) => MsgType::PortStatus,
            Message::PacketOut(_) => MsgType::PacketOut,
            Message::FlowMod(_) => MsgType::FlowMod,
            Message::BarrierRequest => MsgType::BarrierRequest,
            Message::BarrierReply => MsgType::BarrierReply,
        }
    }

    /// Encodes the message as one frame carrying `xid`.
    pub fn encode(&self, xid: u32) -> CodecResult<Bytes> {
        let mut body = BytesMut::new();
        self.write_body(&mut body);

        let total = OFP_HEADER_LEN + body.len();
        let length = u16::try_from(total).map_err(|_| CodecError::BadLength {
            what: "message",
            length: total,
        })?;

        let mut out = BytesMut::with_capacity(total);
        Header::new(self.msg_type(), length, xid).write(&mut out);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }

    fn write_body(&self, buf: &mut BytesMut) {
        match self {
            Message::Hello
            | Message::FeaturesRequest
            | Message::BarrierRequest
            | Message::BarrierReply => {}
            Message::Error(err) => {
                buf.put_u16(err.err_type);
                buf.put_u16(err.code);
                buf.put_slice(&err.data);
            }
            Message::EchoRequest(data) | Message::EchoReply(data) => buf.put_slice(data),
            Message::FeaturesReply(features) => {
                buf.put_u64(features.datapath_id);
                buf.put_u32(features.n_buffers);
                buf.put_u8(features.n_tables);
                buf.put_bytes(0, 3);
                buf.put_u32(features.capabilities);
                buf.put_u32(features.actions);
                for port in &features.ports {
                    port.write(buf);
                }
            }
            Message::SetConfig(config) => {
                buf.put_u16(config.flags);
                buf.put_u16(config.miss_send_len);
            }
            Message::PacketIn(pkt) => {
                buf.put_u32(pkt.buffer_id);
                buf.put_u16(pkt.total_len);
                buf.put_u16(pkt.in_port);
                buf.put_u8(pkt.reason);
                buf.put_u8(0);
                buf.put_slice(&pkt.data);
            }
            Message::FlowRemoved(removed) => {
                removed.ofp_match.write(buf);
                buf.put_u64(removed.cookie);
                buf.put_u16(removed.priority);
                buf.put_u8(removed.reason);
                buf.put_u8(0);
                buf.put_u32(removed.duration_sec);
                buf.put_u32(removed.duration_nsec);
                buf.put_u16(removed.idle_timeout);
                buf.put_bytes(0, 2);
                buf.put_u64(removed.packet_count);
                buf.put_u64(removed.byte_count);
            }
            Message::PortStatus(status) => {
                buf.put_u8(status.reason as u8);
                buf.put_bytes(0, 7);
                status.desc.write(buf);
            }
            Message::PacketOut(pkt) => {
                buf.put_u32(pkt.buffer_id);
                buf.put_u16(pkt.in_port);
                buf.put_u16(Action::list_len(&pkt.actions) as u16);
                for action in &pkt.actions {
                    action.write(buf);
                }
                if pkt.buffer_id == OFP_NO_BUFFER {
                    buf.put_slice(&pkt.data);
                }
            }
            Message::FlowMod(fm) => {
                fm.ofp_match.write(buf);
                buf.put_u64(fm.cookie);
                buf.put_u16(fm.command as u16);
                buf.put_u16(fm.idle_timeout);
                buf.put_u16(fm.hard_timeout);
                buf.put_u16(fm.priority);
                buf.put_u32(fm.buffer_id);
                buf.put_u16(fm.out_port);
                buf.put_u16(fm.flags);
                for action in &fm.actions {
                    action.write(buf);
                }
            }
        }
    }

    /// Decodes one complete frame.
    ///
    /// Bytes past the length announced in the header are ignored.
    pub fn decode(frame: &[u8]) -> CodecResult<(Header, Message)> {
        let header = Header::parse(frame)?;
        let length = usize::from(header.length);
        CodecError::ensure("frame", length, frame.len())?;
        let body = &frame[OFP_HEADER_LEN..length];

        let message = match header.msg_type {
            MsgType::Hello => Message::Hello,
            MsgType::FeaturesRequest => Message::FeaturesRequest,
            MsgType::BarrierRequest => Message::BarrierRequest,
            MsgType::BarrierReply => Message::BarrierReply,
            MsgType::EchoRequest => Message::EchoRequest(body.to_vec()),
            MsgType::EchoReply => Message::EchoReply(body.to_vec()),
            MsgType::Error => Message::Error(decode_error(body)?),
            MsgType::FeaturesReply => Message::FeaturesReply(decode_features(body)?),
            MsgType::SetConfig => Message::SetConfig(decode_set_config(body)?),
            MsgType::PacketIn => Message::PacketIn(decode_packet_in(body)?),
            MsgType::FlowRemoved => Message::FlowRemoved(decode_flow_removed(body)?),
            MsgType::PortStatus => Message::PortStatus(decode_port_status(body)?),
            MsgType::PacketOut => Message::PacketOut(decode_packet_out(body)?),
            MsgType::FlowMod => Message::FlowMod(decode_flow_mod(body)?),
            other => return Err(CodecError::Unsupported(other)),
        };
        Ok((header, message))
    }
}

fn rest(cur: &Cursor<&[u8]>) -> Vec<u8> {
    let pos = cur.position() as usize;
    cur.get_ref()[pos..].to_vec()
}

fn decode_error(body: &[u8]) -> CodecResult<ErrorMsg> {
    CodecError::ensure("error", 4, body.len())?;
    let mut cur = Cursor::new(body);
    let err_type = cur.read_u16::<BigEndian>()?;
    let code = cur.read_u16::<BigEndian>()?;
    Ok(ErrorMsg {
        err_type,
        code,
        data: rest(&cur),
    })
}

fn decode_features(body: &[u8]) -> CodecResult<SwitchFeatures> {
    CodecError::ensure("features_reply", 24, body.len())?;
    let mut cur = Cursor::new(body);
    let datapath_id = cur.read_u64::<BigEndian>()?;
    let n_buffers = cur.read_u32::<BigEndian>()?;
    let n_tables = cur.read_u8()?;
    let mut pad = [0u8; 3];
    cur.read_exact(&mut pad)?;
    let capabilities = cur.read_u32::<BigEndian>()?;
    let actions = cur.read_u32::<BigEndian>()?;
    let ports = PhyPort::parse_list(&body[24..])?;
    Ok(SwitchFeatures {
        datapath_id,
        n_buffers,
        n_tables,
        capabilities,
        actions,
        ports,
    })
}

fn decode_set_config(body: &[u8]) -> CodecResult<SwitchConfig> {
    CodecError::ensure("set_config", 4, body.len())?;
    let mut cur = Cursor::new(body);
    Ok(SwitchConfig {
        flags: cur.read_u16::<BigEndian>()?,
        miss_send_len: cur.read_u16::<BigEndian>()?,
    })
}

fn decode_packet_in(body: &[u8]) -> CodecResult<PacketIn> {
    CodecError::ensure("packet_in", 10, body.len())?;
    let mut cur = Cursor::new(body);
    let buffer_id = cur.read_u32::<BigEndian>()?;
    let total_len = cur.read_u16::<BigEndian>()?;
    let in_port = cur.read_u16::<BigEndian>()?;
    let reason = cur.read_u8()?;
    cur.read_u8()?;
    Ok(PacketIn {
        buffer_id,
        total_len,
        in_port,
        reason,
        data: rest(&cur),
    })
}

fn decode_flow_removed(body: &[u8]) -> CodecResult<FlowRemoved> {
    CodecError::ensure("flow_removed", 80, body.len())?;
    let ofp_match = OfpMatch::parse(body)?;
    let mut cur = Cursor::new(&body[OFP_MATCH_LEN..]);
    let cookie = cur.read_u64::<BigEndian>()?;
    let priority = cur.read_u16::<BigEndian>()?;
    let reason = cur.read_u8()?;
    cur.read_u8()?;
    let duration_sec = cur.read_u32::<BigEndian>()?;
    let duration_nsec = cur.read_u32::<BigEndian>()?;
    let idle_timeout = cur.read_u16::<BigEndian>()?;
    cur.read_u16::<BigEndian>()?;
    Ok(FlowRemoved {
        ofp_match,
        cookie,
        priority,
        reason,
        duration_sec,
        duration_nsec,
        idle_timeout,
        packet_count: cur.read_u64::<BigEndian>()?,
        byte_count: cur.read_u64::<BigEndian>()?,
    })
}

fn decode_port_status(body: &[u8]) -> CodecResult<PortStatus> {
    CodecError::ensure("port_status", 8 + OFP_PHY_PORT_LEN, body.len())?;
    Ok(PortStatus {
        reason: PortReason::try_from(body[0])?,
        desc: PhyPort::parse(&body[8..])?,
    })
}

fn decode_packet_out(body: &[u8]) -> CodecResult<PacketOut> {
    CodecError::ensure("packet_out", 8, body.len())?;
    let mut cur = Cursor::new(body);
    let buffer_id = cur.read_u32::<BigEndian>()?;
    let in_port = cur.read_u16::<BigEndian>()?;
    let actions_len = usize::from(cur.read_u16::<BigEndian>()?);
    CodecError::ensure("packet_out actions", 8 + actions_len, body.len())?;
    let actions = Action::parse_list(&body[8..8 + actions_len])?;
    Ok(PacketOut {
        buffer_id,
        in_port,
        actions,
        data: body[8 + actions_len..].to_vec(),
    })
}

fn decode_flow_mod(body: &[u8]) -> CodecResult<FlowMod> {
    CodecError::ensure("flow_mod", 64, body.len())?;
    let ofp_match = OfpMatch::parse(body)?;
    let mut cur = Cursor::new(&body[OFP_MATCH_LEN..]);
    let cookie = cur.read_u64::<BigEndian>()?;
    let command = FlowModCommand::try_from(cur.read_u16::<BigEndian>()?)?;
    let idle_timeout = cur.read_u16::<BigEndian>()?;
    let hard_timeout = cur.read_u16::<BigEndian>()?;
    let priority = cur.read_u16::<BigEndian>()?;
    let buffer_id = cur.read_u32::<BigEndian>()?;
    let out_port = cur.read_u16::<BigEndian>()?;
    let flags = cur.read_u16::<BigEndian>()?;
    Ok(FlowMod {
        ofp_match,
        cookie,
        command,
        idle_timeout,
        hard_timeout,
        priority,
        buffer_id,
        out_port,
        flags,
        actions: Action::parse_list(&body[64..])?,
    })
}
