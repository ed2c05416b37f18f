//! Protocol constants for OpenFlow 1.0.

/// Protocol version carried in every header.
pub const OFP_VERSION: u8 = 0x01;

/// Fixed header size.
pub const OFP_HEADER_LEN: usize = 8;

/// Size of `ofp_match`.
pub const OFP_MATCH_LEN: usize = 40;

/// Size of `ofp_phy_port`.
pub const OFP_PHY_PORT_LEN: usize = 48;

/// Size of `ofp_action_output`.
pub const OFP_ACTION_OUTPUT_LEN: usize = 8;

/// Size of the fixed part of `ofp_flow_mod`, header included.
pub const OFP_FLOW_MOD_LEN: usize = 72;

/// Size of the fixed part of `ofp_switch_features`, header included.
pub const OFP_SWITCH_FEATURES_LEN: usize = 32;

/// Size of `ofp_port_status`, header included.
pub const OFP_PORT_STATUS_LEN: usize = 64;

/// Size of the fixed part of `ofp_packet_in`, header included (without pad).
pub const OFP_PACKET_IN_LEN: usize = 18;

/// Size of the fixed part of `ofp_packet_out`, header included.
pub const OFP_PACKET_OUT_LEN: usize = 16;

/// Size of `ofp_flow_removed`, header included.
pub const OFP_FLOW_REMOVED_LEN: usize = 88;

/// Size of `ofp_switch_config`, header included.
pub const OFP_SWITCH_CONFIG_LEN: usize = 12;

/// Size of the fixed part of `ofp_error_msg`, header included.
pub const OFP_ERROR_MSG_LEN: usize = 12;

/// `dl_vlan` of an untagged frame.
pub const OFP_VLAN_NONE: u16 = 0xffff;

/// `dl_type` of an 802.3 frame without an EtherType.
pub const OFP_DL_TYPE_NOT_ETH_TYPE: u16 = 0x05ff;

/// Smallest value of the length/type field that is an EtherType.
pub const ETH_TYPE_MIN: u16 = 0x0600;

/// Bytes of a table-miss packet sent to the controller.
pub const OFP_DEFAULT_MISS_SEND_LEN: u16 = 128;

/// Default flow priority.
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

/// Timeout value meaning "never expires".
pub const OFP_FLOW_PERMANENT: u16 = 0;

/// Buffer id meaning "packet not buffered on the switch".
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// Maximum length of a port name, NUL included.
pub const OFP_MAX_PORT_NAME_LEN: usize = 16;

/// Reserved port numbers.
pub mod ofpp {
    pub const MAX: u16 = 0xff00;
    pub const IN_PORT: u16 = 0xfff8;
    pub const TABLE: u16 = 0xfff9;
    pub const NORMAL: u16 = 0xfffa;
    pub const FLOOD: u16 = 0xfffb;
    pub const ALL: u16 = 0xfffc;
    pub const CONTROLLER: u16 = 0xfffd;
    pub const LOCAL: u16 = 0xfffe;
    pub const NONE: u16 = 0xffff;
}

/// Flow wildcard bits of `ofp_match.wildcards`.
pub mod ofpfw {
    pub const IN_PORT: u32 = 1 << 0;
    pub const DL_VLAN: u32 = 1 << 1;
    pub const DL_SRC: u32 = 1 << 2;
    pub const DL_DST: u32 = 1 << 3;
    pub const DL_TYPE: u32 = 1 << 4;
    pub const NW_PROTO: u32 = 1 << 5;
    pub const TP_SRC: u32 = 1 << 6;
    pub const TP_DST: u32 = 1 << 7;

    pub const NW_SRC_SHIFT: u32 = 8;
    pub const NW_SRC_BITS: u32 = 6;
    pub const NW_SRC_MASK: u32 = ((1 << NW_SRC_BITS) - 1) << NW_SRC_SHIFT;
    pub const NW_SRC_ALL: u32 = 32 << NW_SRC_SHIFT;

    pub const NW_DST_SHIFT: u32 = 14;
    pub const NW_DST_BITS: u32 = 6;
    pub const NW_DST_MASK: u32 = ((1 << NW_DST_BITS) - 1) << NW_DST_SHIFT;
    pub const NW_DST_ALL: u32 = 32 << NW_DST_SHIFT;

    pub const DL_VLAN_PCP: u32 = 1 << 20;
    pub const NW_TOS: u32 = 1 << 21;

    pub const ALL: u32 = (1 << 22) - 1;
}

/// Port config bits.
pub const OFPPC_PORT_DOWN: u32 = 1 << 0;

/// Port state bits.
pub const OFPPS_LINK_DOWN: u32 = 1 << 0;

/// Flow-mod flags.
pub const OFPFF_SEND_FLOW_REM: u16 = 1 << 0;
pub const OFPFF_CHECK_OVERLAP: u16 = 1 << 1;

/// Action type of `ofp_action_output`.
pub const OFPAT_OUTPUT: u16 = 0;

/// Ethernet types.
pub const ETH_TYPE_IP: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_VLAN: u16 = 0x8100;

/// IP protocol numbers.
pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_IGMP: u8 = 2;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

/// DHCP well-known ports.
pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;
