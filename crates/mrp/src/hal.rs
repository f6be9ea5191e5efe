//! Switch abstraction consumed by the engine.
//!
//! The engine never talks to hardware or the operating system directly. The
//! host supplies implementations of these traits when it builds the
//! [`Engine`](crate::Engine).

use crate::error::HalResult;
use crate::pdu::FrameClass;
use crate::types::{InRole, MacAddr, ManagerCandidate, MepKey, OperRole, PortNo};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// ID of a periodic injection job
pub type AfiId = u32;

/// ID of an access-control entry
pub type AceId = u32;

/// ID of a hardware MRP object
pub type MrpHwId = u32;

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Microseconds since boot
    fn now_us(&self) -> u64;
}

/// Frame transmission
#[cfg_attr(test, automock)]
pub trait PacketIo: Send {
    /// Send one frame on `port`
    fn transmit(&mut self, port: PortNo, frame: &[u8]) -> HalResult<()>;

    /// Let the switch inject `frame` on `port` every `interval_us`
    fn afi_start(&mut self, port: PortNo, frame: &[u8], interval_us: u64) -> HalResult<AfiId>;

    fn afi_stop(&mut self, id: AfiId) -> HalResult<()>;
}

/// Access-control entry used by the software forwarding strategy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AclRule {
    pub dmac: MacAddr,
    /// Match on this VLAN; `None` matches untagged frames
    pub vid: Option<u16>,
    pub ingress: Vec<PortNo>,
    /// Ports the frame is forwarded to; empty drops it in hardware
    pub egress: Vec<PortNo>,
    pub cpu_copy: bool,
}

/// Access-control list
#[cfg_attr(test, automock)]
pub trait AclHal: Send {
    /// Add a rule, or replace rule `id`. Returns the ID of the stored rule.
    fn set(&mut self, id: Option<AceId>, rule: &AclRule) -> HalResult<AceId>;

    fn del(&mut self, id: AceId) -> HalResult<()>;

    fn get(&self, id: AceId) -> HalResult<AclRule>;
}

/// Ports and identifiers of a hardware MRP object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRingConf {
    pub port1: PortNo,
    pub port2: PortNo,
    pub in_port: Option<PortNo>,
    pub vlan: u16,
    pub in_vlan: u16,
    pub in_id: u16,
}

/// Loss-of-continuity monitoring parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocConfig {
    pub test_interval_us: u64,
    pub test_monitoring_count: u32,
    pub in_test_interval_us: u64,
    pub in_test_monitoring_count: u32,
}

/// Per-port loss-of-continuity flags of a hardware MRP object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwPortStatus {
    pub loc: bool,
    pub in_loc: bool,
}

/// Switch with MRP ring-blocking support
#[cfg_attr(test, automock)]
pub trait RingBlockHal: Send {
    fn mrp_add(&mut self, conf: &HwRingConf) -> HalResult<MrpHwId>;

    fn mrp_del(&mut self, id: MrpHwId) -> HalResult<()>;

    fn set_ring_role(&mut self, id: MrpHwId, role: OperRole) -> HalResult<()>;

    fn set_in_role(&mut self, id: MrpHwId, role: InRole) -> HalResult<()>;

    fn set_primary_port(&mut self, id: MrpHwId, port: PortNo) -> HalResult<()>;

    fn set_port_state(&mut self, id: MrpHwId, port: PortNo, forwarding: bool) -> HalResult<()>;

    fn set_loc_config(&mut self, id: MrpHwId, conf: &LocConfig) -> HalResult<()>;

    fn set_best_manager(&mut self, id: MrpHwId, best: &ManagerCandidate) -> HalResult<()>;

    /// Copy the next frame of `class` to the CPU, then stop copying
    fn copy_next_to_cpu(&mut self, id: MrpHwId, class: FrameClass) -> HalResult<()>;

    fn set_cpu_copy(&mut self, id: MrpHwId, class: FrameClass, enable: bool) -> HalResult<()>;

    fn port_status(&self, id: MrpHwId, port: PortNo) -> HalResult<HwPortStatus>;
}

/// Physical port forwarding control
#[cfg_attr(test, automock)]
pub trait PortControl: Send {
    fn set_forwarding(&mut self, port: PortNo, forwarding: bool) -> HalResult<()>;
}

/// MAC table
#[cfg_attr(test, automock)]
pub trait FdbHal: Send {
    /// Remove learned entries on `ports`
    fn flush(&mut self, ports: &[PortNo]) -> HalResult<()>;
}

/// Direction of a connectivity-fault endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MepDirection {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MepStatus {
    /// Connectivity is up (no signal fail)
    pub up: bool,
    pub admin_enabled: bool,
    pub direction: MepDirection,
    pub port: PortNo,
}

/// Connectivity-fault management
#[cfg_attr(test, automock)]
pub trait HealthHal: Send {
    fn status(&self, key: &MepKey) -> HalResult<MepStatus>;
}

/// VLAN membership of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VlanMembers {
    All,
    List(Vec<u16>),
}

impl VlanMembers {
    pub fn contains(&self, vid: u16) -> bool {
        match self {
            VlanMembers::All => true,
            VlanMembers::List(vids) => vids.contains(&vid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortVlanInfo {
    pub pvid: u16,
    /// VLAN sent untagged on egress, if any
    pub untagged_vid: Option<u16>,
    pub members: VlanMembers,
}

impl Default for PortVlanInfo {
    fn default() -> Self {
        Self {
            pvid: 1,
            untagged_vid: Some(1),
            members: VlanMembers::All,
        }
    }
}

/// Bridge configuration queries
#[cfg_attr(test, automock)]
pub trait BridgeHal: Send {
    fn port_vlan(&self, port: PortNo) -> HalResult<PortVlanInfo>;

    fn stp_enabled(&self, port: PortNo) -> HalResult<bool>;
}
