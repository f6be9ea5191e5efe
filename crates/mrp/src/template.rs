//! Prebuilt MRP frames with patchable fields.
//!
//! A [`FrameTemplate`] holds a complete Ethernet frame for one PDU kind. The
//! static parts (addresses, VLAN tag, domain, in-ID, OUI) are written once at
//! build time; the dynamic parts are patched in place before each transmit.

use crate::error::PatchError;
use crate::pdu::{
    ETH_MIN_LEN, OPTION_ED1_TYPE, PduKind, SUB_TLV_MANAGER_LEN, SUB_TLV_TEST_MGR_NACK,
    SUB_TLV_TEST_PROPAGATE, TLV_COMMON, TLV_END, VlanTag,
};
use crate::types::{DomainId, MRP_ETHERTYPE, MRP_VERSION, MacAddr, PortRole};
use bytes::{BufMut, BytesMut};

/// Patchable field of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SequenceId,
    Timestamp,
    PortRole,
    State,
    Transition,
    Interval,
    Blocked,
    Prio,
    Sa,
    OtherPrio,
    OtherSa,
}

const FIELD_COUNT: usize = 11;

impl Field {
    fn index(self) -> usize {
        self as usize
    }

    /// Width on the wire in bytes
    pub fn width(self) -> usize {
        match self {
            Field::Timestamp => 4,
            Field::Sa | Field::OtherSa => 6,
            _ => 2,
        }
    }
}

/// Static content of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParams {
    /// Ethernet source: the MAC of the egress port
    pub smac: MacAddr,
    pub vlan: Option<VlanTag>,
    pub domain_id: DomainId,
    /// Bridge address carried in the SA fields
    pub sa: MacAddr,
    pub prio: u16,
    pub in_id: u16,
    pub oui: [u8; 3],
    pub port_role: PortRole,
}

/// A complete frame plus the offsets of its patchable fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTemplate {
    kind: PduKind,
    buf: Vec<u8>,
    fields: [Option<usize>; FIELD_COUNT],
}

struct Builder {
    buf: BytesMut,
    fields: [Option<usize>; FIELD_COUNT],
}

impl Builder {
    fn mark(&mut self, field: Field) {
        self.fields[field.index()] = Some(self.buf.len());
    }

    fn u16_field(&mut self, field: Field, v: u16) {
        self.mark(field);
        self.buf.put_u16(v);
    }

    fn u32_field(&mut self, field: Field, v: u32) {
        self.mark(field);
        self.buf.put_u32(v);
    }

    fn mac_field(&mut self, field: Field, mac: MacAddr) {
        self.mark(field);
        self.buf.put_slice(&mac.0);
    }

    fn align(&mut self, area_start: usize) {
        while (self.buf.len() - area_start) % 4 != 0 {
            self.buf.put_u8(0);
        }
    }
}

fn frame_len(kind: PduKind, tagged: bool) -> usize {
    let header = 12 + if tagged { 4 } else { 0 } + 2 + 2;
    let kind_tlv = (2 + kind.tlv_len() as usize).div_ceil(4) * 4;
    let common = 20;
    let end = 2;
    (header + kind_tlv + common + end).max(ETH_MIN_LEN)
}

/// Build the frame of `kind` with all dynamic fields zeroed
pub fn build_template(kind: PduKind, params: &TemplateParams) -> FrameTemplate {
    let len = frame_len(kind, params.vlan.is_some());
    let mut b = Builder {
        buf: BytesMut::with_capacity(len),
        fields: [None; FIELD_COUNT],
    };

    b.buf.put_slice(&kind.class().dmac().0);
    b.buf.put_slice(&params.smac.0);
    if let Some(tag) = params.vlan {
        b.buf.put_u16(tag.tpid);
        b.buf.put_u16(((tag.pcp as u16 & 0x7) << 13) | (tag.vid & 0x0FFF));
    }
    b.buf.put_u16(MRP_ETHERTYPE);
    b.buf.put_u16(MRP_VERSION);

    let area = b.buf.len();
    b.buf.put_u8(kind.tlv_type());
    b.buf.put_u8(kind.tlv_len());

    match kind {
        PduKind::Test => {
            b.u16_field(Field::Prio, params.prio);
            b.mac_field(Field::Sa, params.sa);
            b.u16_field(Field::PortRole, params.port_role.to_wire());
            b.u16_field(Field::State, 0);
            b.u16_field(Field::Transition, 0);
            b.u32_field(Field::Timestamp, 0);
        }
        PduKind::TopologyChange => {
            b.u16_field(Field::Prio, params.prio);
            b.mac_field(Field::Sa, params.sa);
            b.u16_field(Field::Interval, 0);
        }
        PduKind::LinkDown | PduKind::LinkUp => {
            b.mac_field(Field::Sa, params.sa);
            b.u16_field(Field::PortRole, params.port_role.to_wire());
            b.u16_field(Field::Interval, 0);
            b.u16_field(Field::Blocked, 0);
        }
        PduKind::InTest => {
            b.buf.put_u16(params.in_id);
            b.mac_field(Field::Sa, params.sa);
            b.u16_field(Field::PortRole, params.port_role.to_wire());
            b.u16_field(Field::State, 0);
            b.u16_field(Field::Transition, 0);
            b.u32_field(Field::Timestamp, 0);
        }
        PduKind::InTopologyChange => {
            b.mac_field(Field::Sa, params.sa);
            b.buf.put_u16(params.in_id);
            b.u16_field(Field::Interval, 0);
        }
        PduKind::InLinkDown | PduKind::InLinkUp => {
            b.mac_field(Field::Sa, params.sa);
            b.u16_field(Field::PortRole, params.port_role.to_wire());
            b.buf.put_u16(params.in_id);
            b.u16_field(Field::Interval, 0);
        }
        PduKind::InLinkStatusPoll => {
            b.mac_field(Field::Sa, params.sa);
            b.u16_field(Field::PortRole, params.port_role.to_wire());
            b.buf.put_u16(params.in_id);
        }
        PduKind::TestMgrNAck | PduKind::TestPropagate => {
            b.buf.put_slice(&params.oui);
            b.buf.put_u8(OPTION_ED1_TYPE);
            b.buf.put_u8(if kind == PduKind::TestMgrNAck {
                SUB_TLV_TEST_MGR_NACK
            } else {
                SUB_TLV_TEST_PROPAGATE
            });
            b.buf.put_u8(SUB_TLV_MANAGER_LEN);
            b.u16_field(Field::Prio, params.prio);
            b.mac_field(Field::Sa, params.sa);
            b.u16_field(Field::OtherPrio, 0);
            b.mac_field(Field::OtherSa, MacAddr::ZERO);
        }
    }
    b.align(area);

    b.buf.put_u8(TLV_COMMON);
    b.buf.put_u8(18);
    b.u16_field(Field::SequenceId, 0);
    b.buf.put_slice(&params.domain_id.0);

    b.buf.put_u8(TLV_END);
    b.buf.put_u8(0);

    if b.buf.len() < ETH_MIN_LEN {
        b.buf.resize(ETH_MIN_LEN, 0);
    }

    FrameTemplate {
        kind,
        buf: b.buf.to_vec(),
        fields: b.fields,
    }
}

impl FrameTemplate {
    pub fn kind(&self) -> PduKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.fields[field.index()].is_some()
    }

    fn range(&self, field: Field, width: usize) -> Result<std::ops::Range<usize>, PatchError> {
        if field.width() != width {
            return Err(PatchError::NoSuchField(field));
        }
        let off = self.fields[field.index()].ok_or(PatchError::NoSuchField(field))?;
        if off + width > self.buf.len() {
            return Err(PatchError::OutOfBounds(off));
        }
        Ok(off..off + width)
    }

    pub fn patch_u16(&mut self, field: Field, v: u16) -> Result<(), PatchError> {
        let r = self.range(field, 2)?;
        self.buf[r].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn patch_u32(&mut self, field: Field, v: u32) -> Result<(), PatchError> {
        let r = self.range(field, 4)?;
        self.buf[r].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub fn patch_mac(&mut self, field: Field, mac: MacAddr) -> Result<(), PatchError> {
        let r = self.range(field, 6)?;
        self.buf[r].copy_from_slice(&mac.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{PduBody, SubTlvKind, parse};
    use crate::types::RingState;

    fn params() -> TemplateParams {
        TemplateParams {
            smac: MacAddr([0x02, 0, 0, 0, 0, 0x01]),
            vlan: None,
            domain_id: DomainId([0x5A; 16]),
            sa: MacAddr([0x02, 0, 0, 0, 0, 0xAA]),
            prio: 0x8000,
            in_id: 7,
            oui: [0x00, 0x15, 0x4E],
            port_role: PortRole::Secondary,
        }
    }

    #[test]
    fn test_every_kind_round_trips() {
        let other_sa = MacAddr([0x02, 0, 0, 0, 0, 0xBB]);

        for kind in PduKind::ALL {
            let mut t = build_template(kind, &params());
            assert_eq!(t.as_bytes().len(), frame_len(kind, false));
            assert!(t.len() >= ETH_MIN_LEN);

            t.patch_u16(Field::SequenceId, 0x1234).unwrap();
            if t.has_field(Field::PortRole) {
                t.patch_u16(Field::PortRole, PortRole::Primary.to_wire())
                    .unwrap();
            }
            if t.has_field(Field::Interval) {
                t.patch_u16(Field::Interval, 40).unwrap();
            }
            if t.has_field(Field::State) {
                t.patch_u16(Field::State, RingState::Closed.to_wire()).unwrap();
            }
            if t.has_field(Field::Transition) {
                t.patch_u16(Field::Transition, 0x0102).unwrap();
            }
            if t.has_field(Field::Timestamp) {
                t.patch_u32(Field::Timestamp, 0xDEAD_BEEF).unwrap();
            }
            if t.has_field(Field::Blocked) {
                t.patch_u16(Field::Blocked, 1).unwrap();
            }
            if t.has_field(Field::OtherSa) {
                t.patch_u16(Field::OtherPrio, 0xA000).unwrap();
                t.patch_mac(Field::OtherSa, other_sa).unwrap();
            }

            let pdu = parse(t.as_bytes()).unwrap();
            assert_eq!(pdu.kind(), Some(kind));
            assert_eq!(pdu.sequence_id, 0x1234);
            assert_eq!(pdu.domain_id, DomainId([0x5A; 16]));
            assert_eq!(pdu.sa(), Some(params().sa));
            assert_eq!(pdu.dmac, kind.class().dmac());

            match pdu.body {
                PduBody::Test(tlv) => {
                    assert_eq!(tlv.prio, 0x8000);
                    assert_eq!(tlv.port_role, PortRole::Primary);
                    assert_eq!(tlv.ring_state, RingState::Closed);
                    assert_eq!(tlv.transition, 0x0102);
                    assert_eq!(tlv.timestamp, 0xDEAD_BEEF);
                }
                PduBody::TopologyChange(tlv) => {
                    assert_eq!(tlv.prio, 0x8000);
                    assert_eq!(tlv.interval_ms, 40);
                }
                PduBody::LinkDown(tlv) | PduBody::LinkUp(tlv) => {
                    assert_eq!(tlv.port_role, PortRole::Primary);
                    assert_eq!(tlv.interval_ms, 40);
                    assert!(tlv.blocked);
                }
                PduBody::InTest(tlv) => {
                    assert_eq!(tlv.in_id, 7);
                    assert_eq!(tlv.port_role, PortRole::Primary);
                    assert_eq!(tlv.in_state, RingState::Closed);
                    assert_eq!(tlv.transition, 0x0102);
                    assert_eq!(tlv.timestamp, 0xDEAD_BEEF);
                }
                PduBody::InTopologyChange(tlv) => {
                    assert_eq!((tlv.in_id, tlv.interval_ms), (7, 40));
                }
                PduBody::InLinkDown(tlv) | PduBody::InLinkUp(tlv) => {
                    assert_eq!(tlv.port_role, PortRole::Primary);
                    assert_eq!((tlv.in_id, tlv.interval_ms), (7, 40));
                }
                PduBody::InLinkStatusPoll(tlv) => {
                    assert_eq!(tlv.port_role, PortRole::Primary);
                    assert_eq!(tlv.in_id, 7);
                }
                PduBody::Option(opt) => {
                    let sub = opt.sub.unwrap();
                    assert_eq!(opt.oui, [0x00, 0x15, 0x4E]);
                    assert_eq!((sub.prio, sub.sa), (0x8000, params().sa));
                    assert_eq!(sub.other_prio, 0xA000);
                    assert_eq!(sub.other_sa, other_sa);
                    let expected = if kind == PduKind::TestMgrNAck {
                        SubTlvKind::TestMgrNAck
                    } else {
                        SubTlvKind::TestPropagate
                    };
                    assert_eq!(sub.kind, expected);
                }
            }
        }
    }

    #[test]
    fn test_link_change_defaults_to_unblocked() {
        let t = build_template(PduKind::LinkUp, &params());
        match parse(t.as_bytes()).unwrap().body {
            PduBody::LinkUp(tlv) => {
                assert!(!tlv.blocked);
                assert_eq!(tlv.port_role, PortRole::Secondary);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_vlan_tagged_template() {
        let mut p = params();
        p.vlan = Some(VlanTag {
            tpid: 0x88A8,
            pcp: 7,
            vid: 100,
        });
        let t = build_template(PduKind::Test, &p);
        assert_eq!(&t.as_bytes()[12..16], &[0x88, 0xA8, 0xE0, 0x64]);

        let pdu = parse(t.as_bytes()).unwrap();
        assert_eq!(pdu.vlan.map(|v| v.vid), Some(100));
    }

    #[test]
    fn test_tlvs_are_aligned() {
        // LinkDown value is 12 bytes: header + value = 14, padded to 16
        let t = build_template(PduKind::LinkDown, &params());
        let area = 16;
        let common = area + 16;
        assert_eq!(t.as_bytes()[common], TLV_COMMON);
        assert_eq!(&t.as_bytes()[common - 2..common], &[0, 0]);
    }

    #[test]
    fn test_patch_rejects_missing_field() {
        let mut t = build_template(PduKind::TopologyChange, &params());
        assert_eq!(
            t.patch_u32(Field::Timestamp, 1),
            Err(PatchError::NoSuchField(Field::Timestamp))
        );
        assert_eq!(
            t.patch_u16(Field::Blocked, 1),
            Err(PatchError::NoSuchField(Field::Blocked))
        );
        // width mismatch
        assert_eq!(
            t.patch_u16(Field::Sa, 1),
            Err(PatchError::NoSuchField(Field::Sa))
        );
    }
}
