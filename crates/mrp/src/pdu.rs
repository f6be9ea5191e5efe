//! MRP PDU format and parsing.
//!
//! IEC 62439-2 Section 8 - MRPDU
//!
//! ```text
//! +------+------+-----------+-----------+---------+----------+--------+-----+
//! | DMAC | SMAC | [VLAN tag]| 0x88E3    | Version | kind TLV | Common | End |
//! |  6   |  6   |    4      |   2       |    2    |  ...     |   20   |  2  |
//! +------+------+-----------+-----------+---------+----------+--------+-----+
//! ```
//!
//! Each TLV is a 1-byte type, a 1-byte length and `length` bytes of value.
//! TLVs start on 4-byte boundaries measured from the start of the TLV area
//! (the byte after Version); the gap is zero padding. All integers are
//! big-endian.

use crate::error::PduError;
use crate::types::{
    DomainId, MRP_ETHERTYPE, MacAddr, PduCounters, PortRole, RingState,
};
use serde::{Deserialize, Serialize};

pub const TLV_END: u8 = 0x00;
pub const TLV_COMMON: u8 = 0x01;
pub const TLV_TEST: u8 = 0x02;
pub const TLV_TOPOLOGY_CHANGE: u8 = 0x03;
pub const TLV_LINK_DOWN: u8 = 0x04;
pub const TLV_LINK_UP: u8 = 0x05;
pub const TLV_IN_TEST: u8 = 0x06;
pub const TLV_IN_TOPOLOGY_CHANGE: u8 = 0x07;
pub const TLV_IN_LINK_DOWN: u8 = 0x08;
pub const TLV_IN_LINK_UP: u8 = 0x09;
pub const TLV_IN_LINK_STATUS_POLL: u8 = 0x0A;
pub const TLV_OPTION: u8 = 0x7F;

pub const SUB_TLV_TEST_MGR_NACK: u8 = 0x01;
pub const SUB_TLV_TEST_PROPAGATE: u8 = 0x02;

/// Value length of the manager SubTLVs (Prio, SA, OtherPrio, OtherSA)
pub const SUB_TLV_MANAGER_LEN: u8 = 16;

/// Ed1Type used in Option TLVs built by this engine
pub const OPTION_ED1_TYPE: u8 = 0x00;

/// Minimum Ethernet frame length without FCS
pub const ETH_MIN_LEN: usize = 60;

const ETH_HDR_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// VLAN TPIDs recognised on receive
const VLAN_TPIDS: [u16; 3] = [0x8100, 0x88A8, 0x9100];

/// Frame class, selected by the destination MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameClass {
    Test,
    Control,
    InTest,
    InControl,
}

impl FrameClass {
    pub const ALL: [FrameClass; 4] = [
        FrameClass::Test,
        FrameClass::Control,
        FrameClass::InTest,
        FrameClass::InControl,
    ];

    pub fn dmac(self) -> MacAddr {
        let last = match self {
            FrameClass::Test => 0x01,
            FrameClass::Control => 0x02,
            FrameClass::InTest => 0x03,
            FrameClass::InControl => 0x04,
        };
        MacAddr([0x01, 0x15, 0x4E, 0x00, 0x00, last])
    }

    pub fn from_dmac(mac: &MacAddr) -> Option<Self> {
        FrameClass::ALL.into_iter().find(|c| c.dmac() == *mac)
    }

    pub fn index(self) -> usize {
        match self {
            FrameClass::Test => 0,
            FrameClass::Control => 1,
            FrameClass::InTest => 2,
            FrameClass::InControl => 3,
        }
    }
}

/// Every PDU kind the engine sends or acts upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PduKind {
    Test,
    TopologyChange,
    LinkDown,
    LinkUp,
    InTest,
    InTopologyChange,
    InLinkDown,
    InLinkUp,
    InLinkStatusPoll,
    TestMgrNAck,
    TestPropagate,
}

impl PduKind {
    pub const ALL: [PduKind; 11] = [
        PduKind::Test,
        PduKind::TopologyChange,
        PduKind::LinkDown,
        PduKind::LinkUp,
        PduKind::InTest,
        PduKind::InTopologyChange,
        PduKind::InLinkDown,
        PduKind::InLinkUp,
        PduKind::InLinkStatusPoll,
        PduKind::TestMgrNAck,
        PduKind::TestPropagate,
    ];

    /// Type of the TLV following Version
    pub fn tlv_type(self) -> u8 {
        match self {
            PduKind::Test => TLV_TEST,
            PduKind::TopologyChange => TLV_TOPOLOGY_CHANGE,
            PduKind::LinkDown => TLV_LINK_DOWN,
            PduKind::LinkUp => TLV_LINK_UP,
            PduKind::InTest => TLV_IN_TEST,
            PduKind::InTopologyChange => TLV_IN_TOPOLOGY_CHANGE,
            PduKind::InLinkDown => TLV_IN_LINK_DOWN,
            PduKind::InLinkUp => TLV_IN_LINK_UP,
            PduKind::InLinkStatusPoll => TLV_IN_LINK_STATUS_POLL,
            PduKind::TestMgrNAck | PduKind::TestPropagate => TLV_OPTION,
        }
    }

    /// Value length of that TLV
    pub fn tlv_len(self) -> u8 {
        match self {
            PduKind::Test | PduKind::InTest => 18,
            PduKind::TopologyChange | PduKind::InTopologyChange | PduKind::InLinkStatusPoll => 10,
            PduKind::LinkDown | PduKind::LinkUp | PduKind::InLinkDown | PduKind::InLinkUp => 12,
            PduKind::TestMgrNAck | PduKind::TestPropagate => 4 + 2 + SUB_TLV_MANAGER_LEN,
        }
    }

    pub fn class(self) -> FrameClass {
        match self {
            PduKind::Test | PduKind::TestMgrNAck | PduKind::TestPropagate => FrameClass::Test,
            PduKind::TopologyChange | PduKind::LinkDown | PduKind::LinkUp => FrameClass::Control,
            PduKind::InTest => FrameClass::InTest,
            PduKind::InTopologyChange
            | PduKind::InLinkDown
            | PduKind::InLinkUp
            | PduKind::InLinkStatusPoll => FrameClass::InControl,
        }
    }

    /// PDUs addressed by interconnection ID rather than domain
    pub fn is_interconnection(self) -> bool {
        matches!(
            self.class(),
            FrameClass::InTest | FrameClass::InControl
        )
    }
}

/// 802.1Q tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanTag {
    pub tpid: u16,
    pub pcp: u8,
    pub vid: u16,
}

/// MRP_Test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestTlv {
    pub prio: u16,
    pub sa: MacAddr,
    pub port_role: PortRole,
    pub ring_state: RingState,
    pub transition: u16,
    pub timestamp: u32,
}

/// MRP_TopologyChange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyChangeTlv {
    pub prio: u16,
    pub sa: MacAddr,
    pub interval_ms: u16,
}

/// MRP_LinkDown / MRP_LinkUp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkChangeTlv {
    pub sa: MacAddr,
    pub port_role: PortRole,
    pub interval_ms: u16,
    pub blocked: bool,
}

/// MRP_InTest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InTestTlv {
    pub in_id: u16,
    pub sa: MacAddr,
    pub port_role: PortRole,
    pub in_state: RingState,
    pub transition: u16,
    pub timestamp: u32,
}

/// MRP_InTopologyChange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InTopologyChangeTlv {
    pub sa: MacAddr,
    pub in_id: u16,
    pub interval_ms: u16,
}

/// MRP_InLinkDown / MRP_InLinkUp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InLinkChangeTlv {
    pub sa: MacAddr,
    pub port_role: PortRole,
    pub in_id: u16,
    pub interval_ms: u16,
}

/// MRP_InLinkStatusPoll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InLinkStatusPollTlv {
    pub sa: MacAddr,
    pub port_role: PortRole,
    pub in_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTlvKind {
    TestMgrNAck,
    TestPropagate,
}

/// Manager SubTLV of an Option TLV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSubTlv {
    pub kind: SubTlvKind,
    pub prio: u16,
    pub sa: MacAddr,
    pub other_prio: u16,
    pub other_sa: MacAddr,
}

/// MRP_Option. Only the first SubTLV is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionTlv {
    pub oui: [u8; 3],
    pub ed1_type: u8,
    pub sub: Option<ManagerSubTlv>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduBody {
    Test(TestTlv),
    TopologyChange(TopologyChangeTlv),
    LinkDown(LinkChangeTlv),
    LinkUp(LinkChangeTlv),
    InTest(InTestTlv),
    InTopologyChange(InTopologyChangeTlv),
    InLinkDown(InLinkChangeTlv),
    InLinkUp(InLinkChangeTlv),
    InLinkStatusPoll(InLinkStatusPollTlv),
    Option(OptionTlv),
}

/// A decoded MRP frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrpPdu {
    pub dmac: MacAddr,
    pub smac: MacAddr,
    pub vlan: Option<VlanTag>,
    pub version: u16,
    pub sequence_id: u16,
    pub domain_id: DomainId,
    pub body: PduBody,
}

impl MrpPdu {
    /// Kind of the PDU; `None` for an Option TLV without a known SubTLV
    pub fn kind(&self) -> Option<PduKind> {
        Some(match &self.body {
            PduBody::Test(_) => PduKind::Test,
            PduBody::TopologyChange(_) => PduKind::TopologyChange,
            PduBody::LinkDown(_) => PduKind::LinkDown,
            PduBody::LinkUp(_) => PduKind::LinkUp,
            PduBody::InTest(_) => PduKind::InTest,
            PduBody::InTopologyChange(_) => PduKind::InTopologyChange,
            PduBody::InLinkDown(_) => PduKind::InLinkDown,
            PduBody::InLinkUp(_) => PduKind::InLinkUp,
            PduBody::InLinkStatusPoll(_) => PduKind::InLinkStatusPoll,
            PduBody::Option(opt) => match opt.sub?.kind {
                SubTlvKind::TestMgrNAck => PduKind::TestMgrNAck,
                SubTlvKind::TestPropagate => PduKind::TestPropagate,
            },
        })
    }

    /// Source address field of the kind TLV
    pub fn sa(&self) -> Option<MacAddr> {
        match &self.body {
            PduBody::Test(t) => Some(t.sa),
            PduBody::TopologyChange(t) => Some(t.sa),
            PduBody::LinkDown(t) | PduBody::LinkUp(t) => Some(t.sa),
            PduBody::InTest(t) => Some(t.sa),
            PduBody::InTopologyChange(t) => Some(t.sa),
            PduBody::InLinkDown(t) | PduBody::InLinkUp(t) => Some(t.sa),
            PduBody::InLinkStatusPoll(t) => Some(t.sa),
            PduBody::Option(opt) => opt.sub.map(|s| s.sa),
        }
    }

    /// Interconnection ID of an interconnection PDU
    pub fn in_id(&self) -> Option<u16> {
        match &self.body {
            PduBody::InTest(t) => Some(t.in_id),
            PduBody::InTopologyChange(t) => Some(t.in_id),
            PduBody::InLinkDown(t) | PduBody::InLinkUp(t) => Some(t.in_id),
            PduBody::InLinkStatusPoll(t) => Some(t.in_id),
            _ => None,
        }
    }

    pub fn is_interconnection(&self) -> bool {
        self.in_id().is_some()
    }
}

impl PduCounters {
    /// Count one PDU; `None` counts an uninterpreted Option TLV
    pub fn count(&mut self, kind: Option<PduKind>) {
        let c = match kind {
            Some(PduKind::Test) => &mut self.test,
            Some(PduKind::TopologyChange) => &mut self.topology_change,
            Some(PduKind::LinkDown) => &mut self.link_down,
            Some(PduKind::LinkUp) => &mut self.link_up,
            Some(PduKind::InTest) => &mut self.in_test,
            Some(PduKind::InTopologyChange) => &mut self.in_topology_change,
            Some(PduKind::InLinkDown) => &mut self.in_link_down,
            Some(PduKind::InLinkUp) => &mut self.in_link_up,
            Some(PduKind::InLinkStatusPoll) => &mut self.in_link_status_poll,
            Some(PduKind::TestMgrNAck) => &mut self.test_mgr_nack,
            Some(PduKind::TestPropagate) => &mut self.test_propagate,
            None => &mut self.option,
        };
        *c += 1;
    }
}

fn be16(b: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([b[off], b[off + 1]])
}

fn be32(b: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn mac(b: &[u8], off: usize) -> MacAddr {
    let mut m = [0u8; 6];
    m.copy_from_slice(&b[off..off + 6]);
    MacAddr(m)
}

fn port_role(v: u16, tlv: u8) -> Result<PortRole, PduError> {
    PortRole::from_wire(v).ok_or(PduError::InvalidField(tlv))
}

fn state(v: u16, tlv: u8) -> Result<RingState, PduError> {
    RingState::from_wire(v).ok_or(PduError::InvalidField(tlv))
}

/// Offset of the next TLV, 4-byte aligned relative to the TLV area
fn next_tlv(area_start: usize, off: usize, value_len: usize) -> usize {
    let end = off + 2 + value_len - area_start;
    area_start + end.div_ceil(4) * 4
}

/// Parse the kind TLV whose value is `v`
fn parse_body(tlv: u8, v: &[u8]) -> Result<PduBody, PduError> {
    let body = match tlv {
        TLV_TEST => PduBody::Test(TestTlv {
            prio: be16(v, 0),
            sa: mac(v, 2),
            port_role: port_role(be16(v, 8), tlv)?,
            ring_state: state(be16(v, 10), tlv)?,
            transition: be16(v, 12),
            timestamp: be32(v, 14),
        }),
        TLV_TOPOLOGY_CHANGE => PduBody::TopologyChange(TopologyChangeTlv {
            prio: be16(v, 0),
            sa: mac(v, 2),
            interval_ms: be16(v, 8),
        }),
        TLV_LINK_DOWN | TLV_LINK_UP => {
            let link = LinkChangeTlv {
                sa: mac(v, 0),
                port_role: port_role(be16(v, 6), tlv)?,
                interval_ms: be16(v, 8),
                blocked: be16(v, 10) != 0,
            };
            if tlv == TLV_LINK_DOWN {
                PduBody::LinkDown(link)
            } else {
                PduBody::LinkUp(link)
            }
        }
        TLV_IN_TEST => PduBody::InTest(InTestTlv {
            in_id: be16(v, 0),
            sa: mac(v, 2),
            port_role: port_role(be16(v, 8), tlv)?,
            in_state: state(be16(v, 10), tlv)?,
            transition: be16(v, 12),
            timestamp: be32(v, 14),
        }),
        TLV_IN_TOPOLOGY_CHANGE => PduBody::InTopologyChange(InTopologyChangeTlv {
            sa: mac(v, 0),
            in_id: be16(v, 6),
            interval_ms: be16(v, 8),
        }),
        TLV_IN_LINK_DOWN | TLV_IN_LINK_UP => {
            let link = InLinkChangeTlv {
                sa: mac(v, 0),
                port_role: port_role(be16(v, 6), tlv)?,
                in_id: be16(v, 8),
                interval_ms: be16(v, 10),
            };
            if tlv == TLV_IN_LINK_DOWN {
                PduBody::InLinkDown(link)
            } else {
                PduBody::InLinkUp(link)
            }
        }
        TLV_IN_LINK_STATUS_POLL => PduBody::InLinkStatusPoll(InLinkStatusPollTlv {
            sa: mac(v, 0),
            port_role: port_role(be16(v, 6), tlv)?,
            in_id: be16(v, 8),
        }),
        TLV_OPTION => PduBody::Option(parse_option(v)),
        other => return Err(PduError::UnknownType(other)),
    };
    Ok(body)
}

fn parse_option(v: &[u8]) -> OptionTlv {
    let mut sub = None;

    if v.len() >= 6 {
        let sub_type = v[4];
        let sub_len = v[5] as usize;
        let data = &v[6..];
        let kind = match sub_type {
            SUB_TLV_TEST_MGR_NACK => Some(SubTlvKind::TestMgrNAck),
            SUB_TLV_TEST_PROPAGATE => Some(SubTlvKind::TestPropagate),
            _ => None,
        };
        if let Some(kind) = kind
            && sub_len >= SUB_TLV_MANAGER_LEN as usize
            && data.len() >= SUB_TLV_MANAGER_LEN as usize
        {
            sub = Some(ManagerSubTlv {
                kind,
                prio: be16(data, 0),
                sa: mac(data, 2),
                other_prio: be16(data, 8),
                other_sa: mac(data, 10),
            });
        }
    }

    OptionTlv {
        oui: [v[0], v[1], v[2]],
        ed1_type: v[3],
        sub,
    }
}

fn expected_len(tlv: u8) -> Option<u8> {
    match tlv {
        TLV_TEST | TLV_IN_TEST | TLV_COMMON => Some(18),
        TLV_TOPOLOGY_CHANGE | TLV_IN_TOPOLOGY_CHANGE | TLV_IN_LINK_STATUS_POLL => Some(10),
        TLV_LINK_DOWN | TLV_LINK_UP | TLV_IN_LINK_DOWN | TLV_IN_LINK_UP => Some(12),
        TLV_END => Some(0),
        _ => None,
    }
}

fn check_len(tlv: u8, len: u8) -> Result<(), PduError> {
    let ok = match expected_len(tlv) {
        Some(expected) => len == expected,
        None if tlv == TLV_OPTION => len >= 4,
        None => true,
    };
    if ok {
        Ok(())
    } else {
        Err(PduError::LengthMismatch { tlv_type: tlv, len })
    }
}

/// Parse a complete Ethernet frame carrying an MRP PDU.
///
/// Unknown TLVs after the first are skipped, known ones are length checked.
/// The frame must contain a Common TLV and be terminated by End.
pub fn parse(frame: &[u8]) -> Result<MrpPdu, PduError> {
    if frame.len() < ETH_HDR_LEN {
        return Err(PduError::Truncated(frame.len()));
    }

    let dmac = mac(frame, 0);
    let smac = mac(frame, 6);
    let mut off = 12;
    let mut vlan = None;

    let mut ethertype = be16(frame, off);
    if VLAN_TPIDS.contains(&ethertype) {
        if frame.len() < ETH_HDR_LEN + VLAN_TAG_LEN {
            return Err(PduError::Truncated(frame.len()));
        }
        let tci = be16(frame, off + 2);
        vlan = Some(VlanTag {
            tpid: ethertype,
            pcp: (tci >> 13) as u8,
            vid: tci & 0x0FFF,
        });
        off += VLAN_TAG_LEN;
        ethertype = be16(frame, off);
    }
    if ethertype != MRP_ETHERTYPE {
        return Err(PduError::NotMrp(ethertype));
    }
    off += 2;

    if frame.len() < off + 2 {
        return Err(PduError::Truncated(frame.len()));
    }
    let version = be16(frame, off);
    off += 2;

    let area = off;
    let mut body = None;
    let mut common = None;

    loop {
        if off + 2 > frame.len() {
            return Err(if body.is_none() {
                PduError::Truncated(off)
            } else {
                PduError::MissingEnd
            });
        }
        let tlv = frame[off];
        let len = frame[off + 1];
        let value_start = off + 2;
        let value_end = value_start + len as usize;
        if value_end > frame.len() {
            return Err(PduError::Overrun(off));
        }
        let value = &frame[value_start..value_end];

        if body.is_none() {
            if (expected_len(tlv).is_none() && tlv != TLV_OPTION) || tlv == TLV_END || tlv == TLV_COMMON {
                return Err(PduError::UnknownType(tlv));
            }
            check_len(tlv, len)?;
            body = Some(parse_body(tlv, value)?);
        } else {
            match tlv {
                TLV_END => {
                    check_len(tlv, len)?;
                    break;
                }
                TLV_COMMON => {
                    check_len(tlv, len)?;
                    let mut id = [0u8; 16];
                    id.copy_from_slice(&value[2..18]);
                    common = Some((be16(value, 0), DomainId(id)));
                }
                _ if expected_len(tlv).is_some() || tlv == TLV_OPTION => check_len(tlv, len)?,
                _ => {}
            }
        }

        off = next_tlv(area, off, len as usize);
    }

    let (sequence_id, domain_id) = common.ok_or(PduError::MissingCommon)?;
    let body = body.ok_or(PduError::MissingEnd)?;

    Ok(MrpPdu {
        dmac,
        smac,
        vlan,
        version,
        sequence_id,
        domain_id,
        body,
    })
}
