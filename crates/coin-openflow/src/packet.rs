//! Minimal Ethernet, ARP, IPv4 and transport header parsing for packet-in
//! handling.

use coin_types::MacAddress;
use std::net::Ipv4Addr;

use crate::consts::{ETH_TYPE_ARP, ETH_TYPE_IP, ETH_TYPE_VLAN, IP_PROTO_ICMP, IP_PROTO_TCP, IP_PROTO_UDP};

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const ARP_IPV4_LEN: usize = 28;
const IPV4_MIN_HEADER_LEN: usize = 20;

/// ARP operation codes.
pub const ARP_REQUEST: u16 = 1;
pub const ARP_REPLY: u16 = 2;

/// The Ethernet header of a frame, VLAN tag skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub ether_type: u16,
    /// Tag control information of an 802.1Q frame
    pub tci: Option<u16>,
    /// Offset of the payload within the frame.
    pub payload_offset: usize,
}

impl EthernetHeader {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < ETH_HEADER_LEN {
            return None;
        }
        let dst = MacAddress::from_slice(&frame[0..6])?;
        let src = MacAddress::from_slice(&frame[6..12])?;
        let mut ether_type = u16::from_be_bytes([frame[12], frame[13]]);
        let mut payload_offset = ETH_HEADER_LEN;
        let mut tci = None;
        if ether_type == ETH_TYPE_VLAN {
            if frame.len() < ETH_HEADER_LEN + VLAN_TAG_LEN {
                return None;
            }
            tci = Some(u16::from_be_bytes([frame[14], frame[15]]));
            ether_type = u16::from_be_bytes([frame[16], frame[17]]);
            payload_offset += VLAN_TAG_LEN;
        }
        Some(Self {
            dst,
            src,
            ether_type,
            tci,
            payload_offset,
        })
    }

    /// 12-bit VLAN id of a tagged frame.
    pub fn vlan_id(&self) -> Option<u16> {
        self.tci.map(|tci| tci & 0x0fff)
    }

    /// 3-bit priority code point of a tagged frame.
    pub fn vlan_pcp(&self) -> Option<u8> {
        self.tci.map(|tci| (tci >> 13) as u8)
    }

    pub fn is_arp(&self) -> bool {
        self.ether_type == ETH_TYPE_ARP
    }

    pub fn is_ipv4(&self) -> bool {
        self.ether_type == ETH_TYPE_IP
    }
}

/// An IPv4-over-Ethernet ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parses the ARP payload of an Ethernet frame.
    ///
    /// Returns `None` for non-ARP frames and ARP for other protocols.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let eth = EthernetHeader::parse(frame)?;
        if !eth.is_arp() {
            return None;
        }
        let arp = frame.get(eth.payload_offset..eth.payload_offset + ARP_IPV4_LEN)?;

        let htype = u16::from_be_bytes([arp[0], arp[1]]);
        let ptype = u16::from_be_bytes([arp[2], arp[3]]);
        if htype != 1 || ptype != ETH_TYPE_IP || arp[4] != 6 || arp[5] != 4 {
            return None;
        }
        let ip = |b: &[u8]| Ipv4Addr::new(b[0], b[1], b[2], b[3]);
        Some(Self {
            operation: u16::from_be_bytes([arp[6], arp[7]]),
            sender_mac: MacAddress::from_slice(&arp[8..14])?,
            sender_ip: ip(&arp[14..18]),
            target_mac: MacAddress::from_slice(&arp[18..24])?,
            target_ip: ip(&arp[24..28]),
        })
    }

    /// Builds an untagged Ethernet frame carrying this packet.
    pub fn to_frame(&self, eth_dst: MacAddress) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ETH_HEADER_LEN + ARP_IPV4_LEN);
        frame.extend_from_slice(eth_dst.as_bytes());
        frame.extend_from_slice(self.sender_mac.as_bytes());
        frame.extend_from_slice(&ETH_TYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(&ETH_TYPE_IP.to_be_bytes());
        frame.extend_from_slice(&[6, 4]);
        frame.extend_from_slice(&self.operation.to_be_bytes());
        frame.extend_from_slice(self.sender_mac.as_bytes());
        frame.extend_from_slice(&self.sender_ip.octets());
        frame.extend_from_slice(self.target_mac.as_bytes());
        frame.extend_from_slice(&self.target_ip.octets());
        frame
    }
}

/// The fields of an IPv4 header that flows match on, plus the transport
/// ports when the packet carries the first fragment of a TCP or UDP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Packet {
    pub tos: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Source port, or ICMP type
    pub tp_src: u16,
    /// Destination port, or ICMP code
    pub tp_dst: u16,
}

impl Ipv4Packet {
    /// Parses the IPv4 payload of an Ethernet frame.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let eth = EthernetHeader::parse(frame)?;
        if !eth.is_ipv4() {
            return None;
        }
        let ip = frame.get(eth.payload_offset..)?;
        if ip.len() < IPV4_MIN_HEADER_LEN || ip[0] >> 4 != 4 {
            return None;
        }
        let header_len = usize::from(ip[0] & 0x0f) * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return None;
        }
        let fragment_offset = u16::from_be_bytes([ip[6], ip[7]]) & 0x1fff;
        let protocol = ip[9];

        let mut tp_src = 0;
        let mut tp_dst = 0;
        if fragment_offset == 0 {
            if let Some(l4) = ip.get(header_len..) {
                match protocol {
                    IP_PROTO_TCP | IP_PROTO_UDP if l4.len() >= 4 => {
                        tp_src = u16::from_be_bytes([l4[0], l4[1]]);
                        tp_dst = u16::from_be_bytes([l4[2], l4[3]]);
                    }
                    IP_PROTO_ICMP if l4.len() >= 2 => {
                        tp_src = u16::from(l4[0]);
                        tp_dst = u16::from(l4[1]);
                    }
                    _ => {}
                }
            }
        }

        Some(Self {
            tos: ip[1],
            protocol,
            src: Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]),
            dst: Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]),
            tp_src,
            tp_dst,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> ArpPacket {
        ArpPacket {
            operation: ARP_REQUEST,
            sender_mac: "02:00:00:00:00:01".parse().unwrap(),
            sender_ip: Ipv4Addr::new(10, 0, 0, 1),
            target_mac: MacAddress::ZERO,
            target_ip: Ipv4Addr::new(10, 0, 0, 254),
        }
    }

    #[test]
    fn test_parse_arp_request() {
        let frame = request().to_frame(MacAddress::BROADCAST);
        assert_eq!(frame.len(), 42);
        let eth = EthernetHeader::parse(&frame).unwrap();
        assert!(eth.is_arp());
        assert!(eth.dst.is_broadcast());
        assert_eq!(ArpPacket::from_frame(&frame), Some(request()));
    }

    #[test]
    fn test_parse_vlan_tagged_arp() {
        let plain = request().to_frame(MacAddress::BROADCAST);
        let mut tagged = plain[..12].to_vec();
        tagged.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a]);
        tagged.extend_from_slice(&plain[12..]);
        assert_eq!(ArpPacket::from_frame(&tagged), Some(request()));
    }

    #[test]
    fn test_ipv4_frame_is_not_arp() {
        let mut frame = vec![0u8; 34];
        frame[12] = 0x08;
        frame[13] = 0x00;
        assert!(EthernetHeader::parse(&frame).unwrap().is_ipv4());
        assert_eq!(ArpPacket::from_frame(&frame), None);
    }

    #[test]
    fn test_truncated_frames() {
        assert_eq!(EthernetHeader::parse(&[0u8; 10]), None);
        let frame = request().to_frame(MacAddress::BROADCAST);
        assert_eq!(ArpPacket::from_frame(&frame[..30]), None);
    }

    /// An untagged TCP segment from 10.0.0.1:40000 to 10.0.0.2:80.
    fn tcp_frame() -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        frame.extend_from_slice(&ETH_TYPE_IP.to_be_bytes());
        frame.extend_from_slice(&[0x45, 0x10, 0, 40, 0, 0, 0x40, 0, 64, IP_PROTO_TCP, 0, 0]);
        frame.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        frame.extend_from_slice(&40000u16.to_be_bytes());
        frame.extend_from_slice(&80u16.to_be_bytes());
        frame.extend_from_slice(&[0u8; 16]);
        frame
    }

    #[test]
    fn test_parse_tcp_segment() {
        let ip = Ipv4Packet::from_frame(&tcp_frame()).unwrap();
        assert_eq!(
            ip,
            Ipv4Packet {
                tos: 0x10,
                protocol: IP_PROTO_TCP,
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 2),
                tp_src: 40000,
                tp_dst: 80,
            }
        );
    }

    #[test]
    fn test_later_fragment_has_no_ports() {
        let mut frame = tcp_frame();
        // non-zero fragment offset
        frame[20] = 0x00;
        frame[21] = 0x01;
        let ip = Ipv4Packet::from_frame(&frame).unwrap();
        assert_eq!((ip.tp_src, ip.tp_dst), (0, 0));
    }

    #[test]
    fn test_vlan_tag_fields() {
        let plain = request().to_frame(MacAddress::BROADCAST);
        let mut tagged = plain[..12].to_vec();
        tagged.extend_from_slice(&[0x81, 0x00, 0xa0, 0x0a]);
        tagged.extend_from_slice(&plain[12..]);
        let eth = EthernetHeader::parse(&tagged).unwrap();
        assert_eq!(eth.vlan_id(), Some(10));
        assert_eq!(eth.vlan_pcp(), Some(5));
        assert_eq!(EthernetHeader::parse(&plain).unwrap().vlan_id(), None);
    }
}
