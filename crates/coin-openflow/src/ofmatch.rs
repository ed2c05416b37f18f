//! The `ofp_match` structure.
//!
//! Fields are `Option`s; `None` means the field is wildcarded. The wildcard
//! word is always derived from the fields, never stored, so a match can not
//! disagree with its own wildcards.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use coin_types::MacAddress;
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

use crate::consts::{
    ofpfw, ETH_TYPE_MIN, OFP_DL_TYPE_NOT_ETH_TYPE, OFP_MATCH_LEN, OFP_VLAN_NONE,
};
use crate::error::{CodecError, CodecResult};
use crate::packet::{ArpPacket, EthernetHeader, Ipv4Packet};

/// An IPv4 address with the number of significant leading bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl IpPrefix {
    /// Creates a prefix, clamping the length to 32.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            addr,
            prefix_len: prefix_len.min(32),
        }
    }

    /// A /32 prefix.
    pub fn host(addr: Ipv4Addr) -> Self {
        Self::new(addr, 32)
    }

    fn wildcard_bits(&self) -> u32 {
        32 - u32::from(self.prefix_len)
    }

    fn from_wildcard_bits(addr: u32, bits: u32) -> Option<Self> {
        if bits >= 32 {
            None
        } else {
            Some(Self::new(Ipv4Addr::from(addr), (32 - bits) as u8))
        }
    }
}

/// Fields to match against flows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OfpMatch {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddress>,
    pub dl_dst: Option<MacAddress>,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: Option<u8>,
    pub dl_type: Option<u16>,
    pub nw_tos: Option<u8>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<IpPrefix>,
    pub nw_dst: Option<IpPrefix>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl OfpMatch {
    /// A match with every field wildcarded.
    pub fn all() -> Self {
        Self::default()
    }

    /// The exact match of a packet received on `in_port`: every field is
    /// set, the ones the packet does not carry to zero.
    ///
    /// Returns `None` when `frame` is too short to hold an Ethernet header.
    pub fn from_packet(in_port: u16, frame: &[u8]) -> Option<Self> {
        let eth = EthernetHeader::parse(frame)?;
        let dl_type = if eth.ether_type < ETH_TYPE_MIN {
            OFP_DL_TYPE_NOT_ETH_TYPE
        } else {
            eth.ether_type
        };
        let mut m = Self {
            in_port: Some(in_port),
            dl_src: Some(eth.src),
            dl_dst: Some(eth.dst),
            dl_vlan: Some(eth.vlan_id().unwrap_or(OFP_VLAN_NONE)),
            dl_vlan_pcp: Some(eth.vlan_pcp().unwrap_or(0)),
            dl_type: Some(dl_type),
            nw_tos: Some(0),
            nw_proto: Some(0),
            nw_src: Some(IpPrefix::host(Ipv4Addr::UNSPECIFIED)),
            nw_dst: Some(IpPrefix::host(Ipv4Addr::UNSPECIFIED)),
            tp_src: Some(0),
            tp_dst: Some(0),
        };

        if let Some(ip) = Ipv4Packet::from_frame(frame) {
            m.nw_tos = Some(ip.tos & 0xfc);
            m.nw_proto = Some(ip.protocol);
            m.nw_src = Some(IpPrefix::host(ip.src));
            m.nw_dst = Some(IpPrefix::host(ip.dst));
            m.tp_src = Some(ip.tp_src);
            m.tp_dst = Some(ip.tp_dst);
        } else if let Some(arp) = ArpPacket::from_frame(frame) {
            // The low byte of the opcode stands in for the protocol
            m.nw_proto = Some((arp.operation & 0xff) as u8);
            m.nw_src = Some(IpPrefix::host(arp.sender_ip));
            m.nw_dst = Some(IpPrefix::host(arp.target_ip));
        }
        Some(m)
    }

    /// Derives the `wildcards` word from the populated fields.
    pub fn wildcards(&self) -> u32 {
        let mut w = ofpfw::ALL;
        let mut clear = |present: bool, bit: u32| {
            if present {
                w &= !bit;
            }
        };
        clear(self.in_port.is_some(), ofpfw::IN_PORT);
        clear(self.dl_vlan.is_some(), ofpfw::DL_VLAN);
        clear(self.dl_src.is_some(), ofpfw::DL_SRC);
        clear(self.dl_dst.is_some(), ofpfw::DL_DST);
        clear(self.dl_type.is_some(), ofpfw::DL_TYPE);
        clear(self.nw_proto.is_some(), ofpfw::NW_PROTO);
        clear(self.tp_src.is_some(), ofpfw::TP_SRC);
        clear(self.tp_dst.is_some(), ofpfw::TP_DST);
        clear(self.dl_vlan_pcp.is_some(), ofpfw::DL_VLAN_PCP);
        clear(self.nw_tos.is_some(), ofpfw::NW_TOS);

        if let Some(prefix) = self.nw_src {
            w = (w & !ofpfw::NW_SRC_MASK) | (prefix.wildcard_bits() << ofpfw::NW_SRC_SHIFT);
        }
        if let Some(prefix) = self.nw_dst {
            w = (w & !ofpfw::NW_DST_MASK) | (prefix.wildcard_bits() << ofpfw::NW_DST_SHIFT);
        }
        w
    }

    /// Writes the 40-byte wire form. Wildcarded fields are zeroed.
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        let mac = |m: Option<MacAddress>| m.map(|m| *m.as_bytes()).unwrap_or([0; 6]);
        let ip = |p: Option<IpPrefix>| p.map(|p| u32::from(p.addr)).unwrap_or(0);

        buf.put_u32(self.wildcards());
        buf.put_u16(self.in_port.unwrap_or(0));
        buf.put_slice(&mac(self.dl_src));
        buf.put_slice(&mac(self.dl_dst));
        buf.put_u16(self.dl_vlan.unwrap_or(0));
        buf.put_u8(self.dl_vlan_pcp.unwrap_or(0));
        buf.put_u8(0);
        buf.put_u16(self.dl_type.unwrap_or(0));
        buf.put_u8(self.nw_tos.unwrap_or(0));
        buf.put_u8(self.nw_proto.unwrap_or(0));
        buf.put_bytes(0, 2);
        buf.put_u32(ip(self.nw_src));
        buf.put_u32(ip(self.nw_dst));
        buf.put_u16(self.tp_src.unwrap_or(0));
        buf.put_u16(self.tp_dst.unwrap_or(0));
    }

    /// Parses the 40-byte wire form.
    pub fn parse(buf: &[u8]) -> CodecResult<Self> {
        CodecError::ensure("match", OFP_MATCH_LEN, buf.len())?;
        let mut cur = Cursor::new(buf);

        let w = cur.read_u32::<BigEndian>()?;
        let in_port = cur.read_u16::<BigEndian>()?;
        let mut dl_src = [0u8; 6];
        cur.read_exact(&mut dl_src)?;
        let mut dl_dst = [0u8; 6];
        cur.read_exact(&mut dl_dst)?;
        let dl_vlan = cur.read_u16::<BigEndian>()?;
        let dl_vlan_pcp = cur.read_u8()?;
        cur.read_u8()?;
        let dl_type = cur.read_u16::<BigEndian>()?;
        let nw_tos = cur.read_u8()?;
        let nw_proto = cur.read_u8()?;
        cur.read_u16::<BigEndian>()?;
        let nw_src = cur.read_u32::<BigEndian>()?;
        let nw_dst = cur.read_u32::<BigEndian>()?;
        let tp_src = cur.read_u16::<BigEndian>()?;
        let tp_dst = cur.read_u16::<BigEndian>()?;

        let unless = |bit: u32| w & bit == 0;
        Ok(Self {
            in_port: unless(ofpfw::IN_PORT).then_some(in_port),
            dl_src: unless(ofpfw::DL_SRC).then_some(MacAddress::new(dl_src)),
            dl_dst: unless(ofpfw::DL_DST).then_some(MacAddress::new(dl_dst)),
            dl_vlan: unless(ofpfw::DL_VLAN).then_some(dl_vlan),
            dl_vlan_pcp: unless(ofpfw::DL_VLAN_PCP).then_some(dl_vlan_pcp),
            dl_type: unless(ofpfw::DL_TYPE).then_some(dl_type),
            nw_tos: unless(ofpfw::NW_TOS).then_some(nw_tos),
            nw_proto: unless(ofpfw::NW_PROTO).then_some(nw_proto),
            nw_src: IpPrefix::from_wildcard_bits(
                nw_src,
                (w & ofpfw::NW_SRC_MASK) >> ofpfw::NW_SRC_SHIFT,
            ),
            nw_dst: IpPrefix::from_wildcard_bits(
                nw_dst,
                (w & ofpfw::NW_DST_MASK) >> ofpfw::NW_DST_SHIFT,
            ),
            tp_src: unless(ofpfw::TP_SRC).then_some(tp_src),
            tp_dst: unless(ofpfw::TP_DST).then_some(tp_dst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_all_wildcarded() {
        let m = OfpMatch::all();
        assert_eq!(m.wildcards(), ofpfw::ALL);

        let mut buf = Vec::new();
        m.write(&mut buf);
        assert_eq!(buf.len(), OFP_MATCH_LEN);
        assert_eq!(&buf[..4], &ofpfw::ALL.to_be_bytes());
        assert!(buf[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_nw_dst_prefix_wildcard_bits() {
        let m = OfpMatch {
            dl_type: Some(0x0800),
            nw_dst: Some(IpPrefix::new(Ipv4Addr::new(10, 0, 0, 0), 24)),
            ..Default::default()
        };
        let w = m.wildcards();
        assert_eq!((w & ofpfw::NW_DST_MASK) >> ofpfw::NW_DST_SHIFT, 8);
        assert_eq!(w & ofpfw::DL_TYPE, 0);
        assert_eq!(w & ofpfw::IN_PORT, ofpfw::IN_PORT);
    }

    #[test]
    fn test_parse_restores_fields() {
        let m = OfpMatch {
            in_port: Some(3),
            dl_dst: Some("02:00:00:00:00:09".parse().unwrap()),
            dl_type: Some(0x0800),
            nw_proto: Some(17),
            nw_dst: Some(IpPrefix::host(Ipv4Addr::new(10, 0, 0, 5))),
            tp_dst: Some(68),
            ..Default::default()
        };
        let mut buf = Vec::new();
        m.write(&mut buf);
        assert_eq!(OfpMatch::parse(&buf).unwrap(), m);
    }

    #[test]
    fn test_zero_prefix_parses_as_wildcard() {
        let m = OfpMatch {
            nw_dst: Some(IpPrefix::new(Ipv4Addr::UNSPECIFIED, 0)),
            ..Default::default()
        };
        let mut buf = Vec::new();
        m.write(&mut buf);
        assert_eq!(OfpMatch::parse(&buf).unwrap().nw_dst, None);
    }

    fn udp_frame() -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02, 0x02, 0, 0, 0, 0, 0x01]);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[0x45, 0x00, 0, 28, 0, 0, 0, 0, 64, 17, 0, 0]);
        frame.extend_from_slice(&[192, 168, 1, 7, 8, 8, 8, 8]);
        frame.extend_from_slice(&[0xc3, 0x50, 0x00, 0x35, 0, 8, 0, 0]);
        frame
    }

    #[test]
    fn test_from_packet_is_exact() {
        let m = OfpMatch::from_packet(4, &udp_frame()).unwrap();
        assert_eq!(m.wildcards(), 0);
        assert_eq!(m.in_port, Some(4));
        assert_eq!(m.dl_src, Some("02:00:00:00:00:01".parse().unwrap()));
        assert_eq!(m.dl_vlan, Some(OFP_VLAN_NONE));
        assert_eq!(m.dl_type, Some(0x0800));
        assert_eq!(m.nw_proto, Some(17));
        assert_eq!(m.nw_src, Some(IpPrefix::host(Ipv4Addr::new(192, 168, 1, 7))));
        assert_eq!(m.nw_dst, Some(IpPrefix::host(Ipv4Addr::new(8, 8, 8, 8))));
        assert_eq!((m.tp_src, m.tp_dst), (Some(50000), Some(53)));

        let mut buf = Vec::new();
        m.write(&mut buf);
        assert_eq!(OfpMatch::parse(&buf).unwrap(), m);
    }

    #[test]
    fn test_from_packet_arp_uses_opcode_and_addresses() {
        let arp = ArpPacket {
            operation: crate::packet::ARP_REPLY,
            sender_mac: "02:00:00:00:00:01".parse().unwrap(),
            sender_ip: Ipv4Addr::new(10, 0, 0, 1),
            target_mac: "02:00:00:00:00:02".parse().unwrap(),
            target_ip: Ipv4Addr::new(10, 0, 0, 2),
        };
        let frame = arp.to_frame(arp.target_mac);
        let m = OfpMatch::from_packet(1, &frame).unwrap();
        assert_eq!(m.dl_type, Some(0x0806));
        assert_eq!(m.nw_proto, Some(2));
        assert_eq!(m.nw_dst, Some(IpPrefix::host(Ipv4Addr::new(10, 0, 0, 2))));
        assert_eq!((m.tp_src, m.tp_dst), (Some(0), Some(0)));
    }

    #[test]
    fn test_from_packet_short_frame() {
        assert_eq!(OfpMatch::from_packet(1, &[0u8; 6]), None);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(
            OfpMatch::parse(&[0u8; 20]),
            Err(CodecError::Truncated { what: "match", .. })
        ));
    }
}
