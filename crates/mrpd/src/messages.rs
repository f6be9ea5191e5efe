//! Route netlink messages for bridge control.
//!
//! Only the parts of `ifinfomsg` and its attributes the daemon touches are
//! modelled; everything else is carried as raw bytes.

use mrp::hal::{PortVlanInfo, VlanMembers};
use netlink_packet_core::{NetlinkDeserializable, NetlinkHeader, NetlinkSerializable};
use netlink_packet_utils::Emitable;
use netlink_packet_utils::nla::{Nla, NlasIterator};
use thiserror::Error;

pub const RTM_NEWLINK: u16 = 16;
pub const RTM_GETLINK: u16 = 18;
pub const RTM_SETLINK: u16 = 19;

pub const AF_UNSPEC: u8 = 0;
pub const AF_BRIDGE: u8 = 7;

/// Bridge port states (`BR_STATE_*`)
pub const BR_STATE_FORWARDING: u8 = 3;
pub const BR_STATE_BLOCKING: u8 = 4;

/// `IFLA_EXT_MASK` bit asking for per-port VLAN entries
pub const RTEXT_FILTER_BRVLAN: u32 = 1 << 1;

const IFINFOMSG_LEN: usize = 16;
const NLA_F_NESTED: u16 = 0x8000;
const NLA_TYPE_MASK: u16 = 0x3FFF;

const IFLA_PROTINFO: u16 = 12;
const IFLA_LINKINFO: u16 = 18;
const IFLA_AF_SPEC: u16 = 26;
const IFLA_EXT_MASK: u16 = 29;

const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;

const IFLA_BR_STP_STATE: u16 = 5;

const IFLA_BRPORT_STATE: u16 = 1;
const IFLA_BRPORT_FLUSH: u16 = 24;

const IFLA_BRIDGE_VLAN_INFO: u16 = 2;

const BRIDGE_VLAN_INFO_PVID: u16 = 1 << 1;
const BRIDGE_VLAN_INFO_UNTAGGED: u16 = 1 << 2;
const BRIDGE_VLAN_INFO_RANGE_BEGIN: u16 = 1 << 3;
const BRIDGE_VLAN_INFO_RANGE_END: u16 = 1 << 4;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("link message of {0} bytes is truncated")]
    Truncated(usize),

    #[error("malformed attribute: {0}")]
    Attribute(String),
}

fn nested_len<T: Nla>(nlas: &[T]) -> usize {
    nlas.iter().map(|nla| nla.buffer_len()).sum()
}

fn emit_nested<T: Nla>(nlas: &[T], buffer: &mut [u8]) {
    let mut offset = 0;
    for nla in nlas {
        let len = nla.buffer_len();
        nla.emit(&mut buffer[offset..offset + len]);
        offset += len;
    }
}

/// Attributes of `buf` as (type, value) pairs, flag bits masked off
fn attributes(buf: &[u8]) -> Result<Vec<(u16, &[u8])>, MessageError> {
    NlasIterator::new(buf)
        .map(|nla| {
            let nla = nla.map_err(|e| MessageError::Attribute(e.to_string()))?;
            let kind = nla.kind() & NLA_TYPE_MASK;
            let len = nla.value_length();
            let inner: &[u8] = nla.into_inner();
            Ok((kind, &inner[4..4 + len]))
        })
        .collect()
}

fn parse_u32(value: &[u8]) -> Result<u32, MessageError> {
    value
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_ne_bytes)
        .ok_or_else(|| MessageError::Attribute(format!("{} byte u32", value.len())))
}

/// Bridge port attributes, nested in `IFLA_PROTINFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortNla {
    State(u8),
    /// Remove the learned FDB entries of the port
    Flush,
    Other(u16, Vec<u8>),
}

impl Nla for PortNla {
    fn value_len(&self) -> usize {
        match self {
            Self::State(_) => 1,
            Self::Flush => 0,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::State(_) => IFLA_BRPORT_STATE,
            Self::Flush => IFLA_BRPORT_FLUSH,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::State(state) => buffer[0] = *state,
            Self::Flush => {}
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl PortNla {
    fn parse(kind: u16, value: &[u8]) -> Self {
        match (kind, value) {
            (IFLA_BRPORT_STATE, [state, ..]) => Self::State(*state),
            (IFLA_BRPORT_FLUSH, _) => Self::Flush,
            _ => Self::Other(kind, value.to_vec()),
        }
    }
}

/// `struct bridge_vlan_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanEntry {
    pub flags: u16,
    pub vid: u16,
}

/// Per-family attributes, nested in `IFLA_AF_SPEC`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfSpecNla {
    VlanInfo(VlanEntry),
    Other(u16, Vec<u8>),
}

impl Nla for AfSpecNla {
    fn value_len(&self) -> usize {
        match self {
            Self::VlanInfo(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::VlanInfo(_) => IFLA_BRIDGE_VLAN_INFO,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::VlanInfo(entry) => {
                buffer[..2].copy_from_slice(&entry.flags.to_ne_bytes());
                buffer[2..4].copy_from_slice(&entry.vid.to_ne_bytes());
            }
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl AfSpecNla {
    fn parse(kind: u16, value: &[u8]) -> Self {
        match (kind, value) {
            (IFLA_BRIDGE_VLAN_INFO, [f0, f1, v0, v1, ..]) => Self::VlanInfo(VlanEntry {
                flags: u16::from_ne_bytes([*f0, *f1]),
                vid: u16::from_ne_bytes([*v0, *v1]),
            }),
            _ => Self::Other(kind, value.to_vec()),
        }
    }
}

/// Bridge device attributes, nested in `IFLA_INFO_DATA`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeNla {
    StpState(u32),
    Other(u16, Vec<u8>),
}

impl Nla for BridgeNla {
    fn value_len(&self) -> usize {
        match self {
            Self::StpState(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::StpState(_) => IFLA_BR_STP_STATE,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::StpState(state) => buffer.copy_from_slice(&state.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

/// Link type attributes, nested in `IFLA_LINKINFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoNla {
    Kind(String),
    /// Data of a bridge device
    BridgeData(Vec<BridgeNla>),
    Other(u16, Vec<u8>),
}

impl Nla for InfoNla {
    fn value_len(&self) -> usize {
        match self {
            Self::Kind(kind) => kind.len() + 1,
            Self::BridgeData(nlas) => nested_len(nlas),
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Kind(_) => IFLA_INFO_KIND,
            Self::BridgeData(_) => IFLA_INFO_DATA | NLA_F_NESTED,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Kind(kind) => {
                buffer[..kind.len()].copy_from_slice(kind.as_bytes());
                buffer[kind.len()] = 0;
            }
            Self::BridgeData(nlas) => emit_nested(nlas, buffer),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl InfoNla {
    fn parse_all(buf: &[u8]) -> Result<Vec<Self>, MessageError> {
        let mut bridge = false;
        let mut nlas = Vec::new();
        for (kind, value) in attributes(buf)? {
            let nla = match kind {
                IFLA_INFO_KIND => {
                    let name = String::from_utf8_lossy(value)
                        .trim_end_matches('\0')
                        .to_string();
                    bridge = name == "bridge";
                    Self::Kind(name)
                }
                IFLA_INFO_DATA if bridge => Self::BridgeData(
                    attributes(value)?
                        .into_iter()
                        .map(|(kind, value)| match kind {
                            IFLA_BR_STP_STATE => parse_u32(value).map(BridgeNla::StpState),
                            _ => Ok(BridgeNla::Other(kind, value.to_vec())),
                        })
                        .collect::<Result<_, _>>()?,
                ),
                _ => Self::Other(kind, value.to_vec()),
            };
            nlas.push(nla);
        }
        Ok(nlas)
    }
}

/// Top-level link attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNla {
    ProtInfo(Vec<PortNla>),
    LinkInfo(Vec<InfoNla>),
    AfSpec(Vec<AfSpecNla>),
    ExtMask(u32),
    Other(u16, Vec<u8>),
}

impl Nla for LinkNla {
    fn value_len(&self) -> usize {
        match self {
            Self::ProtInfo(nlas) => nested_len(nlas),
            Self::LinkInfo(nlas) => nested_len(nlas),
            Self::AfSpec(nlas) => nested_len(nlas),
            Self::ExtMask(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::ProtInfo(_) => IFLA_PROTINFO | NLA_F_NESTED,
            Self::LinkInfo(_) => IFLA_LINKINFO | NLA_F_NESTED,
            Self::AfSpec(_) => IFLA_AF_SPEC | NLA_F_NESTED,
            Self::ExtMask(_) => IFLA_EXT_MASK,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::ProtInfo(nlas) => emit_nested(nlas, buffer),
            Self::LinkInfo(nlas) => emit_nested(nlas, buffer),
            Self::AfSpec(nlas) => emit_nested(nlas, buffer),
            Self::ExtMask(mask) => buffer.copy_from_slice(&mask.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

/// `struct ifinfomsg` plus attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub family: u8,
    pub index: u32,
    pub nlas: Vec<LinkNla>,
}

impl LinkMessage {
    /// Change bridge port attributes of the port with interface `index`
    pub fn set_port(index: u32, port: Vec<PortNla>) -> Self {
        Self {
            family: AF_BRIDGE,
            index,
            nlas: vec![LinkNla::ProtInfo(port)],
        }
    }

    /// Dump every bridge port including its VLAN entries
    pub fn dump_port_vlans() -> Self {
        Self {
            family: AF_BRIDGE,
            index: 0,
            nlas: vec![LinkNla::ExtMask(RTEXT_FILTER_BRVLAN)],
        }
    }

    /// Query one link
    pub fn get(index: u32) -> Self {
        Self {
            family: AF_UNSPEC,
            index,
            nlas: Vec::new(),
        }
    }

    fn buffer_len(&self) -> usize {
        IFINFOMSG_LEN + nested_len(&self.nlas)
    }

    fn emit(&self, buffer: &mut [u8]) {
        buffer[..IFINFOMSG_LEN].fill(0);
        buffer[0] = self.family;
        buffer[4..8].copy_from_slice(&(self.index as i32).to_ne_bytes());
        emit_nested(&self.nlas, &mut buffer[IFINFOMSG_LEN..]);
    }

    pub fn parse(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < IFINFOMSG_LEN {
            return Err(MessageError::Truncated(buf.len()));
        }
        let index = i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]) as u32;

        let mut nlas = Vec::new();
        for (kind, value) in attributes(&buf[IFINFOMSG_LEN..])? {
            let nla = match kind {
                IFLA_PROTINFO => LinkNla::ProtInfo(
                    attributes(value)?
                        .into_iter()
                        .map(|(k, v)| PortNla::parse(k, v))
                        .collect(),
                ),
                IFLA_LINKINFO => LinkNla::LinkInfo(InfoNla::parse_all(value)?),
                IFLA_AF_SPEC => LinkNla::AfSpec(
                    attributes(value)?
                        .into_iter()
                        .map(|(k, v)| AfSpecNla::parse(k, v))
                        .collect(),
                ),
                IFLA_EXT_MASK => LinkNla::ExtMask(parse_u32(value)?),
                _ => LinkNla::Other(kind, value.to_vec()),
            };
            nlas.push(nla);
        }

        Ok(Self {
            family: buf[0],
            index,
            nlas,
        })
    }

    /// VLAN entries, `None` when the link reports no VLAN information
    pub fn vlans(&self) -> Option<Vec<VlanEntry>> {
        self.nlas.iter().find_map(|nla| match nla {
            LinkNla::AfSpec(spec) => Some(
                spec.iter()
                    .filter_map(|s| match s {
                        AfSpecNla::VlanInfo(entry) => Some(*entry),
                        AfSpecNla::Other(..) => None,
                    })
                    .collect(),
            ),
            _ => None,
        })
    }

    /// STP state of a bridge device
    pub fn stp_state(&self) -> Option<u32> {
        self.nlas
            .iter()
            .filter_map(|nla| match nla {
                LinkNla::LinkInfo(info) => Some(info),
                _ => None,
            })
            .flatten()
            .filter_map(|info| match info {
                InfoNla::BridgeData(data) => Some(data),
                _ => None,
            })
            .flatten()
            .find_map(|data| match data {
                BridgeNla::StpState(state) => Some(*state),
                BridgeNla::Other(..) => None,
            })
    }
}

/// Route netlink payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMessage {
    NewLink(LinkMessage),
    GetLink(LinkMessage),
    SetLink(LinkMessage),
    Other(u16, Vec<u8>),
}

impl NetlinkSerializable for RouteMessage {
    fn message_type(&self) -> u16 {
        match self {
            Self::NewLink(_) => RTM_NEWLINK,
            Self::GetLink(_) => RTM_GETLINK,
            Self::SetLink(_) => RTM_SETLINK,
            Self::Other(kind, _) => *kind,
        }
    }

    fn buffer_len(&self) -> usize {
        match self {
            Self::NewLink(msg) | Self::GetLink(msg) | Self::SetLink(msg) => msg.buffer_len(),
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn serialize(&self, buffer: &mut [u8]) {
        match self {
            Self::NewLink(msg) | Self::GetLink(msg) | Self::SetLink(msg) => msg.emit(buffer),
            Self::Other(_, bytes) => buffer[..bytes.len()].copy_from_slice(bytes),
        }
    }
}

impl NetlinkDeserializable for RouteMessage {
    type Error = MessageError;

    fn deserialize(header: &NetlinkHeader, payload: &[u8]) -> Result<Self, Self::Error> {
        Ok(match header.message_type {
            RTM_NEWLINK => Self::NewLink(LinkMessage::parse(payload)?),
            RTM_GETLINK => Self::GetLink(LinkMessage::parse(payload)?),
            RTM_SETLINK => Self::SetLink(LinkMessage::parse(payload)?),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

/// Port VLAN configuration from the kernel's VLAN entries. A port without
/// entries is a member of every VLAN with PVID 1.
pub fn port_vlan_info(entries: &[VlanEntry]) -> PortVlanInfo {
    if entries.is_empty() {
        return PortVlanInfo::default();
    }

    let mut info = PortVlanInfo {
        pvid: 0,
        untagged_vid: None,
        members: VlanMembers::List(Vec::new()),
    };
    let mut members = Vec::new();
    let mut range_start = None;
    for entry in entries {
        if entry.flags & BRIDGE_VLAN_INFO_RANGE_BEGIN != 0 {
            range_start = Some(entry.vid);
            continue;
        }
        let start = match range_start.take() {
            Some(start) if entry.flags & BRIDGE_VLAN_INFO_RANGE_END != 0 => start,
            _ => entry.vid,
        };
        members.extend(start..=entry.vid);

        if entry.flags & BRIDGE_VLAN_INFO_PVID != 0 {
            info.pvid = entry.vid;
        }
        if entry.flags & BRIDGE_VLAN_INFO_UNTAGGED != 0 && info.untagged_vid.is_none() {
            info.untagged_vid = Some(start);
        }
    }
    info.members = VlanMembers::List(members);
    info
}
