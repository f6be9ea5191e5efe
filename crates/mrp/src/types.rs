//! MRP data types and structures.
//!
//! Based on IEC 62439-2: Media Redundancy Protocol (MRP)

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MRP EtherType
pub const MRP_ETHERTYPE: u16 = 0x88E3;

/// MRP PDU version carried right after the EtherType
pub const MRP_VERSION: u16 = 0x0001;

/// Highest instance ID accepted by the directory
pub const INSTANCE_ID_MAX: InstanceId = 64;

/// Maximum length of the cosmetic name fields
pub const NAME_LEN_MAX: usize = 32;

/// Default priority of a configured manager
pub const MANAGER_PRIORITY_DEFAULT: u16 = 0x8000;

/// Default priority of an auto-manager
pub const AUTO_MANAGER_PRIORITY_DEFAULT: u16 = 0xA000;

/// Window a multiple-manager sighting stays raised (microseconds)
pub const MULTI_MANAGER_WINDOW_US: u64 = 10_000_000;

/// Physical port number (1-based)
pub type PortNo = u32;

/// Instance ID (1-based)
pub type InstanceId = u32;

/// Ethernet MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(format!("invalid MAC address '{}'", s));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid MAC address '{}'", s))?;
        }
        Ok(MacAddr(octets))
    }
}

/// 16-byte MRP domain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainId(pub [u8; 16]);

impl DomainId {
    pub fn is_all_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl Default for DomainId {
    /// The IEC default domain is all-ones.
    fn default() -> Self {
        DomainId([0xFF; 16])
    }
}

impl FromStr for DomainId {
    type Err = String;

    /// 32 hex digits, dashes anywhere (UUID notation)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: Vec<u8> = s.trim().bytes().filter(|b| *b != b'-').collect();
        if digits.len() != 32 {
            return Err(format!("invalid domain ID '{}'", s));
        }

        let mut id = [0u8; 16];
        for (byte, pair) in id.iter_mut().zip(digits.chunks(2)) {
            let hex = std::str::from_utf8(pair).map_err(|_| format!("invalid domain ID '{}'", s))?;
            *byte = u8::from_str_radix(hex, 16).map_err(|_| format!("invalid domain ID '{}'", s))?;
        }
        Ok(DomainId(id))
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Configured ring role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingRole {
    /// Media Redundancy Client
    Client,
    /// Media Redundancy Manager
    Manager,
    /// Media Redundancy Auto-manager
    AutoManager,
}

impl fmt::Display for RingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingRole::Client => write!(f, "MRC"),
            RingRole::Manager => write!(f, "MRM"),
            RingRole::AutoManager => write!(f, "MRA"),
        }
    }
}

/// Role an instance is currently acting in. Differs from the configured
/// role only for auto-managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperRole {
    Client,
    Manager,
}

impl fmt::Display for OperRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperRole::Client => write!(f, "CLIENT"),
            OperRole::Manager => write!(f, "MANAGER"),
        }
    }
}

/// Configured interconnection role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InRole {
    #[default]
    None,
    /// Media Redundancy Interconnection Manager
    Manager,
    /// Media Redundancy Interconnection Client
    Client,
}

impl fmt::Display for InRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InRole::None => write!(f, "NONE"),
            InRole::Manager => write!(f, "MIM"),
            InRole::Client => write!(f, "MIC"),
        }
    }
}

/// How the interconnection manager checks the redundant link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InMode {
    /// Poll the interconnection client for its link state
    #[default]
    LinkCheck,
    /// Send InTest frames around both rings
    RingCheck,
}

/// Recovery profile (maximum ring recovery time class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryProfile {
    Ms10,
    Ms30,
    Ms200,
    Ms500,
}

impl RecoveryProfile {
    pub fn millis(self) -> u32 {
        match self {
            RecoveryProfile::Ms10 => 10,
            RecoveryProfile::Ms30 => 30,
            RecoveryProfile::Ms200 => 200,
            RecoveryProfile::Ms500 => 500,
        }
    }

    pub fn is_faster_than(self, other: RecoveryProfile) -> bool {
        self.millis() < other.millis()
    }
}

impl fmt::Display for RecoveryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis())
    }
}

/// Source of the signal-fail indication of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SfTrigger {
    #[default]
    Link,
    Mep,
}

/// Key of a connectivity-fault endpoint used as signal-fail source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MepKey {
    pub domain: u32,
    pub service: u32,
    pub mep_id: u32,
}

impl fmt::Display for MepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.service, self.mep_id)
    }
}

/// Per-port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortConf {
    pub port: Option<PortNo>,
    #[serde(default)]
    pub sf_trigger: SfTrigger,
    #[serde(default)]
    pub mep: Option<MepKey>,
}

impl PortConf {
    pub fn link(port: PortNo) -> Self {
        Self {
            port: Some(port),
            sf_trigger: SfTrigger::Link,
            mep: None,
        }
    }
}

/// OUI used in Option TLVs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OuiType {
    #[default]
    Iec,
    Siemens,
    Custom([u8; 3]),
}

impl OuiType {
    pub fn octets(self) -> [u8; 3] {
        match self {
            OuiType::Iec => [0x00, 0x15, 0x4E],
            OuiType::Siemens => [0x08, 0x00, 0x06],
            OuiType::Custom(oui) => oui,
        }
    }
}

/// Per-instance configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConf {
    pub admin_active: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub domain_id: DomainId,
    pub role: RingRole,
    pub ring_port1: PortConf,
    pub ring_port2: PortConf,
    /// Ring VLAN, 0 = untagged
    #[serde(default)]
    pub vlan: u16,
    pub recovery_profile: RecoveryProfile,
    pub manager_priority: u16,
    #[serde(default)]
    pub react_on_link_change: bool,
    #[serde(default)]
    pub oui: OuiType,

    #[serde(default)]
    pub in_role: InRole,
    #[serde(default)]
    pub in_mode: InMode,
    #[serde(default)]
    pub in_port: PortConf,
    #[serde(default)]
    pub in_vlan: u16,
    #[serde(default)]
    pub in_id: u16,
    #[serde(default)]
    pub in_name: String,
    #[serde(default = "default_in_profile")]
    pub in_recovery_profile: RecoveryProfile,
}

fn default_in_profile() -> RecoveryProfile {
    RecoveryProfile::Ms500
}

impl Default for InstanceConf {
    fn default() -> Self {
        Self {
            admin_active: false,
            name: String::new(),
            domain_name: String::new(),
            domain_id: DomainId::default(),
            role: RingRole::Client,
            ring_port1: PortConf::default(),
            ring_port2: PortConf::default(),
            vlan: 0,
            recovery_profile: RecoveryProfile::Ms500,
            manager_priority: MANAGER_PRIORITY_DEFAULT,
            react_on_link_change: true,
            oui: OuiType::Iec,
            in_role: InRole::None,
            in_mode: InMode::LinkCheck,
            in_port: PortConf::default(),
            in_vlan: 0,
            in_id: 0,
            in_name: String::new(),
            in_recovery_profile: RecoveryProfile::Ms500,
        }
    }
}

impl InstanceConf {
    /// Port configuration of a slot
    pub fn port_conf(&self, slot: PortSlot) -> &PortConf {
        match slot {
            PortSlot::Port1 => &self.ring_port1,
            PortSlot::Port2 => &self.ring_port2,
            PortSlot::In => &self.in_port,
        }
    }

    /// Physical ports used by this configuration, by slot
    pub fn used_ports(&self) -> Vec<(PortSlot, PortNo)> {
        PortSlot::ALL
            .iter()
            .filter(|slot| **slot != PortSlot::In || self.in_role != InRole::None)
            .filter_map(|slot| self.port_conf(*slot).port.map(|p| (*slot, p)))
            .collect()
    }
}

/// Physical port slot of an instance. Primary/secondary designation is a
/// separate runtime property of the two ring slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSlot {
    Port1,
    Port2,
    In,
}

impl PortSlot {
    pub const ALL: [PortSlot; 3] = [PortSlot::Port1, PortSlot::Port2, PortSlot::In];
    pub const RING: [PortSlot; 2] = [PortSlot::Port1, PortSlot::Port2];

    pub fn index(self) -> usize {
        match self {
            PortSlot::Port1 => 0,
            PortSlot::Port2 => 1,
            PortSlot::In => 2,
        }
    }

    /// The other ring slot. The interconnection slot maps to itself.
    pub fn other(self) -> PortSlot {
        match self {
            PortSlot::Port1 => PortSlot::Port2,
            PortSlot::Port2 => PortSlot::Port1,
            PortSlot::In => PortSlot::In,
        }
    }
}

impl fmt::Display for PortSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSlot::Port1 => write!(f, "port1"),
            PortSlot::Port2 => write!(f, "port2"),
            PortSlot::In => write!(f, "in-port"),
        }
    }
}

/// Port role as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    Primary,
    Secondary,
    Interconnection,
}

impl PortRole {
    pub fn to_wire(self) -> u16 {
        match self {
            PortRole::Primary => 0x0000,
            PortRole::Secondary => 0x0001,
            PortRole::Interconnection => 0x0002,
        }
    }

    pub fn from_wire(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(PortRole::Primary),
            0x0001 => Some(PortRole::Secondary),
            0x0002 => Some(PortRole::Interconnection),
            _ => None,
        }
    }
}

/// Ring or interconnection state as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingState {
    #[default]
    Open,
    Closed,
}

impl RingState {
    pub fn to_wire(self) -> u16 {
        match self {
            RingState::Open => 0x0000,
            RingState::Closed => 0x0001,
        }
    }

    pub fn from_wire(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(RingState::Open),
            0x0001 => Some(RingState::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for RingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingState::Open => write!(f, "OPEN"),
            RingState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Ring state machine states (manager and client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingFsmState {
    #[default]
    PowerOn,
    AcStat1,
    PrmUp,
    ChkRo,
    ChkRc,
    DeIdle,
    Pt,
    De,
    PtIdle,
}

impl fmt::Display for RingFsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RingFsmState::PowerOn => "POWER_ON",
            RingFsmState::AcStat1 => "AC_STAT1",
            RingFsmState::PrmUp => "PRM_UP",
            RingFsmState::ChkRo => "CHK_RO",
            RingFsmState::ChkRc => "CHK_RC",
            RingFsmState::DeIdle => "DE_IDLE",
            RingFsmState::Pt => "PT",
            RingFsmState::De => "DE",
            RingFsmState::PtIdle => "PT_IDLE",
        };
        write!(f, "{}", s)
    }
}

/// Interconnection state machine states (MIM and MIC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFsmState {
    #[default]
    PowerOn,
    AcStat1,
    ChkIo,
    ChkIc,
    Pt,
    IpIdle,
}

impl fmt::Display for InFsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InFsmState::PowerOn => "POWER_ON",
            InFsmState::AcStat1 => "AC_STAT1",
            InFsmState::ChkIo => "CHK_IO",
            InFsmState::ChkIc => "CHK_IC",
            InFsmState::Pt => "PT",
            InFsmState::IpIdle => "IP_IDLE",
        };
        write!(f, "{}", s)
    }
}

/// A manager candidate in the priority/MAC election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerCandidate {
    pub priority: u16,
    pub mac: MacAddr,
}

impl ManagerCandidate {
    pub fn new(priority: u16, mac: MacAddr) -> Self {
        Self { priority, mac }
    }

    /// Lower priority value wins; on a tie the lower MAC wins.
    pub fn is_better_than(&self, other: &ManagerCandidate) -> bool {
        self.priority < other.priority
            || (self.priority == other.priority && self.mac < other.mac)
    }
}

/// Ring timing parameters, all intervals in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingTiming {
    pub topo_change_interval_us: u64,
    pub topo_repeat_count: u32,
    pub test_short_interval_us: u64,
    pub test_default_interval_us: u64,
    pub test_monitoring_count: u32,
    pub test_ext_monitoring_count: u32,
    pub link_down_interval_us: u64,
    pub link_up_interval_us: u64,
    pub link_change_count: u32,
}

impl RingTiming {
    pub fn for_profile(profile: RecoveryProfile) -> Self {
        match profile {
            RecoveryProfile::Ms500 => Self {
                topo_change_interval_us: 20_000,
                topo_repeat_count: 3,
                test_short_interval_us: 30_000,
                test_default_interval_us: 50_000,
                test_monitoring_count: 5,
                test_ext_monitoring_count: 15,
                link_down_interval_us: 20_000,
                link_up_interval_us: 20_000,
                link_change_count: 4,
            },
            RecoveryProfile::Ms200 => Self {
                topo_change_interval_us: 10_000,
                topo_repeat_count: 3,
                test_short_interval_us: 10_000,
                test_default_interval_us: 20_000,
                test_monitoring_count: 3,
                test_ext_monitoring_count: 15,
                link_down_interval_us: 20_000,
                link_up_interval_us: 20_000,
                link_change_count: 4,
            },
            RecoveryProfile::Ms30 => Self {
                topo_change_interval_us: 500,
                topo_repeat_count: 3,
                test_short_interval_us: 1_000,
                test_default_interval_us: 3_500,
                test_monitoring_count: 3,
                test_ext_monitoring_count: 15,
                link_down_interval_us: 1_000,
                link_up_interval_us: 1_000,
                link_change_count: 4,
            },
            RecoveryProfile::Ms10 => Self {
                topo_change_interval_us: 500,
                topo_repeat_count: 3,
                test_short_interval_us: 500,
                test_default_interval_us: 1_000,
                test_monitoring_count: 3,
                test_ext_monitoring_count: 15,
                link_down_interval_us: 1_000,
                link_up_interval_us: 1_000,
                link_change_count: 4,
            },
        }
    }
}

/// Interconnection timing parameters, all intervals in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InTiming {
    pub topo_change_interval_us: u64,
    pub topo_repeat_count: u32,
    pub test_default_interval_us: u64,
    pub test_monitoring_count: u32,
    pub link_down_interval_us: u64,
    pub link_up_interval_us: u64,
    pub link_change_count: u32,
    pub link_status_interval_us: u64,
    pub link_status_count: u32,
}

impl InTiming {
    /// Only the 200ms and 500ms classes are defined for interconnection;
    /// faster classes fall back to 200ms.
    pub fn for_profile(profile: RecoveryProfile) -> Self {
        match profile {
            RecoveryProfile::Ms500 => Self {
                topo_change_interval_us: 20_000,
                topo_repeat_count: 3,
                test_default_interval_us: 50_000,
                test_monitoring_count: 8,
                link_down_interval_us: 20_000,
                link_up_interval_us: 20_000,
                link_change_count: 4,
                link_status_interval_us: 20_000,
                link_status_count: 8,
            },
            _ => Self {
                topo_change_interval_us: 10_000,
                topo_repeat_count: 3,
                test_default_interval_us: 20_000,
                test_monitoring_count: 8,
                link_down_interval_us: 20_000,
                link_up_interval_us: 20_000,
                link_change_count: 4,
                link_status_interval_us: 20_000,
                link_status_count: 8,
            },
        }
    }
}

/// Platform capabilities, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Maximum number of instances in the directory
    pub instance_cnt_max: u32,
    /// Fastest recovery profile the platform can run
    pub fastest_recovery_profile: RecoveryProfile,
    /// The switch implements MRP ring blocking in hardware
    pub hw_mrp: bool,
    /// The switch can inject periodic frames by itself
    pub afi: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            instance_cnt_max: 8,
            fastest_recovery_profile: RecoveryProfile::Ms200,
            hw_mrp: false,
            afi: false,
        }
    }
}

bitflags! {
    /// Degraded-but-running conditions of an active instance
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct OperWarnings: u32 {
        const PORT1_HEALTH_UNUSABLE = 1 << 0;
        const PORT2_HEALTH_UNUSABLE = 1 << 1;
        const IN_HEALTH_UNUSABLE = 1 << 2;
        const PORT1_STP_ENABLED = 1 << 3;
        const PORT2_STP_ENABLED = 1 << 4;
        const IN_STP_ENABLED = 1 << 5;
        const PORT1_VLAN_MISMATCH = 1 << 6;
        const PORT2_VLAN_MISMATCH = 1 << 7;
        const IN_VLAN_MISMATCH = 1 << 8;
        const MULTIPLE_MRMS = 1 << 9;
        const MULTIPLE_MIMS = 1 << 10;
        const INTERNAL_ERROR = 1 << 11;
    }
}

impl OperWarnings {
    /// Bits recomputed from port conditions (health, STP, VLAN)
    pub const CONDITIONS: OperWarnings = OperWarnings::from_bits_truncate(0x1FF);

    pub fn health_unusable(slot: PortSlot) -> Self {
        match slot {
            PortSlot::Port1 => Self::PORT1_HEALTH_UNUSABLE,
            PortSlot::Port2 => Self::PORT2_HEALTH_UNUSABLE,
            PortSlot::In => Self::IN_HEALTH_UNUSABLE,
        }
    }

    pub fn stp_enabled(slot: PortSlot) -> Self {
        match slot {
            PortSlot::Port1 => Self::PORT1_STP_ENABLED,
            PortSlot::Port2 => Self::PORT2_STP_ENABLED,
            PortSlot::In => Self::IN_STP_ENABLED,
        }
    }

    pub fn vlan_mismatch(slot: PortSlot) -> Self {
        match slot {
            PortSlot::Port1 => Self::PORT1_VLAN_MISMATCH,
            PortSlot::Port2 => Self::PORT2_VLAN_MISMATCH,
            PortSlot::In => Self::IN_VLAN_MISMATCH,
        }
    }
}

/// Operational state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperState {
    #[default]
    Disabled,
    Active,
}

/// Live status of one port slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    pub slot: PortSlot,
    pub port: PortNo,
    pub role: PortRole,
    pub sf: bool,
    pub forwarding: bool,
    /// SF comes from the configured MEP (false: link state)
    pub sf_from_mep: bool,
}

/// Round-trip statistics of returning Test frames (microseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoundTripStats {
    pub valid: bool,
    pub min_us: u32,
    pub max_us: u32,
    pub last_us: u32,
}

impl RoundTripStats {
    pub fn record(&mut self, rtt_us: u32) {
        if !self.valid {
            self.min_us = rtt_us;
            self.max_us = rtt_us;
        } else {
            self.min_us = self.min_us.min(rtt_us);
            self.max_us = self.max_us.max(rtt_us);
        }
        self.last_us = rtt_us;
        self.valid = true;
    }

    /// Record the delay since `timestamp`, a 32-bit truncation of the clock
    pub fn record_since(&mut self, now_us: u64, timestamp: u32) {
        self.record((now_us as u32).wrapping_sub(timestamp));
    }
}

/// Instance status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub oper_state: OperState,
    pub oper_warnings: OperWarnings,
    pub oper_role: Option<OperRole>,
    pub ring_fsm: RingFsmState,
    pub ring_state: RingState,
    pub transitions: u16,
    pub ports: Vec<PortStatus>,
    pub in_fsm: Option<InFsmState>,
    pub in_state: RingState,
    pub in_transitions: u16,
    pub round_trip: RoundTripStats,
    pub best_manager: Option<ManagerCandidate>,
}

/// Per-kind PDU counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PduCounters {
    pub test: u64,
    pub topology_change: u64,
    pub link_down: u64,
    pub link_up: u64,
    pub in_test: u64,
    pub in_topology_change: u64,
    pub in_link_down: u64,
    pub in_link_up: u64,
    pub in_link_status_poll: u64,
    pub test_mgr_nack: u64,
    pub test_propagate: u64,
    pub option: u64,
}

/// Per-port statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortStatistics {
    pub tx: PduCounters,
    pub rx: PduCounters,
    pub rx_errors: u64,
    pub rx_unknown_domain: u64,
    pub rx_own: u64,
    pub forwarded: u64,
    pub tx_errors: u64,
}

/// Instance statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceStatistics {
    pub port1: PortStatistics,
    pub port2: PortStatistics,
    pub in_port: PortStatistics,
    pub fdb_flushes: u64,
    pub ring_open_count: u64,
    pub in_open_count: u64,
}

impl InstanceStatistics {
    pub fn port(&self, slot: PortSlot) -> &PortStatistics {
        match slot {
            PortSlot::Port1 => &self.port1,
            PortSlot::Port2 => &self.port2,
            PortSlot::In => &self.in_port,
        }
    }

    pub fn port_mut(&mut self, slot: PortSlot) -> &mut PortStatistics {
        match slot {
            PortSlot::Port1 => &mut self.port1,
            PortSlot::Port2 => &mut self.port2,
            PortSlot::In => &mut self.in_port,
        }
    }
}

/// Aggregated notification flags of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationStatus {
    pub multiple_mrms: bool,
    pub multiple_mims: bool,
    pub ring_open: bool,
    pub in_open: bool,
}
