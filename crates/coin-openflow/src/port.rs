//! The `ofp_phy_port` descriptor.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use coin_types::MacAddress;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

use crate::consts::{OFPPC_PORT_DOWN, OFPPS_LINK_DOWN, OFP_MAX_PORT_NAME_LEN, OFP_PHY_PORT_LEN};
use crate::error::{CodecError, CodecResult};

/// Description of a physical port as reported by the switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyPort {
    pub port_no: u16,
    pub hw_addr: MacAddress,
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
}

impl PhyPort {
    /// A port descriptor with all feature words zero.
    pub fn new(port_no: u16, name: impl Into<String>, hw_addr: MacAddress) -> Self {
        Self {
            port_no,
            hw_addr,
            name: name.into(),
            config: 0,
            state: 0,
            curr: 0,
            advertised: 0,
            supported: 0,
            peer: 0,
        }
    }

    /// Port administratively down.
    pub fn is_admin_down(&self) -> bool {
        self.config & OFPPC_PORT_DOWN != 0
    }

    /// No physical link present.
    pub fn is_link_down(&self) -> bool {
        self.state & OFPPS_LINK_DOWN != 0
    }

    pub fn write<B: BufMut>(&self, buf: &mut B) {
        let mut name = [0u8; OFP_MAX_PORT_NAME_LEN];
        let raw = self.name.as_bytes();
        let n = raw.len().min(OFP_MAX_PORT_NAME_LEN - 1);
        name[..n].copy_from_slice(&raw[..n]);

        buf.put_u16(self.port_no);
        buf.put_slice(self.hw_addr.as_bytes());
        buf.put_slice(&name);
        buf.put_u32(self.config);
        buf.put_u32(self.state);
        buf.put_u32(self.curr);
        buf.put_u32(self.advertised);
        buf.put_u32(self.supported);
        buf.put_u32(self.peer);
    }

    pub fn parse(buf: &[u8]) -> CodecResult<Self> {
        CodecError::ensure("phy_port", OFP_PHY_PORT_LEN, buf.len())?;
        let mut cur = Cursor::new(buf);
        let port_no = cur.read_u16::<BigEndian>()?;
        let mut hw_addr = [0u8; 6];
        cur.read_exact(&mut hw_addr)?;
        let mut name = [0u8; OFP_MAX_PORT_NAME_LEN];
        cur.read_exact(&mut name)?;
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());

        Ok(Self {
            port_no,
            hw_addr: MacAddress::new(hw_addr),
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
            config: cur.read_u32::<BigEndian>()?,
            state: cur.read_u32::<BigEndian>()?,
            curr: cur.read_u32::<BigEndian>()?,
            advertised: cur.read_u32::<BigEndian>()?,
            supported: cur.read_u32::<BigEndian>()?,
            peer: cur.read_u32::<BigEndian>()?,
        })
    }

    /// Parses a packed array of port descriptors occupying all of `buf`.
    pub fn parse_list(buf: &[u8]) -> CodecResult<Vec<Self>> {
        if buf.len() % OFP_PHY_PORT_LEN != 0 {
            return Err(CodecError::BadLength {
                what: "phy_port list",
                length: buf.len(),
            });
        }
        buf.chunks(OFP_PHY_PORT_LEN).map(PhyPort::parse).collect()
    }
}
