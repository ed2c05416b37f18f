//! The 8-byte OpenFlow header.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use std::io::Cursor;

use crate::consts::{OFP_HEADER_LEN, OFP_VERSION};
use crate::error::{CodecError, CodecResult};

/// OpenFlow 1.0 message types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    Vendor = 4,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    GetConfigRequest = 7,
    GetConfigReply = 8,
    SetConfig = 9,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    PortMod = 15,
    StatsRequest = 16,
    StatsReply = 17,
    BarrierRequest = 18,
    BarrierReply = 19,
    QueueGetConfigRequest = 20,
    QueueGetConfigReply = 21,
}

impl TryFrom<u8> for MsgType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        use MsgType::*;
        Ok(match value {
            0 => Hello,
            1 => Error,
            2 => EchoRequest,
            3 => EchoReply,
            4 => Vendor,
            5 => FeaturesRequest,
            6 => FeaturesReply,
            7 => GetConfigRequest,
            8 => GetConfigReply,
            9 => SetConfig,
            10 => PacketIn,
            11 => FlowRemoved,
            12 => PortStatus,
            13 => PacketOut,
            14 => FlowMod,
            15 => PortMod,
            16 => StatsRequest,
            17 => StatsReply,
            18 => BarrierRequest,
            19 => BarrierReply,
            20 => QueueGetConfigRequest,
            21 => QueueGetConfigReply,
            other => return Err(CodecError::UnknownType(other)),
        })
    }
}

/// Decoded header of an OpenFlow frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub msg_type: MsgType,
    /// Total frame length, header included.
    pub length: u16,
    pub xid: u32,
}

impl Header {
    pub fn new(msg_type: MsgType, length: u16, xid: u32) -> Self {
        Self {
            version: OFP_VERSION,
            msg_type,
            length,
            xid,
        }
    }

    /// Reads the frame length from the first four bytes without validating
    /// the rest of the header.
    pub fn peek_length(buf: &[u8]) -> Option<usize> {
        if buf.len() < 4 {
            return None;
        }
        Some(usize::from(u16::from_be_bytes([buf[2], buf[3]])))
    }

    /// Parses and validates the header at the start of `buf`.
    pub fn parse(buf: &[u8]) -> CodecResult<Self> {
        CodecError::ensure("header", OFP_HEADER_LEN, buf.len())?;
        let mut cur = Cursor::new(buf);
        let version = cur.read_u8()?;
        if version != OFP_VERSION {
            return Err(CodecError::BadVersion(version));
        }
        let msg_type = MsgType::try_from(cur.read_u8()?)?;
        let length = cur.read_u16::<BigEndian>()?;
        let xid = cur.read_u32::<BigEndian>()?;
        if usize::from(length) < OFP_HEADER_LEN {
            return Err(CodecError::BadLength {
                what: "header",
                length: usize::from(length),
            });
        }
        Ok(Self {
            version,
            msg_type,
            length,
            xid,
        })
    }

    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type as u8);
        buf.put_u16(self.length);
        buf.put_u32(self.xid);
    }
}
