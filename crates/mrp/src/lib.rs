//! Media Redundancy Protocol (MRP) control plane
//!
//! Implementation of IEC 62439-2 ring redundancy for managed Ethernet
//! switches, independent of any particular switch or operating system.
//!
//! # Features
//!
//! - Ring manager (MRM), client (MRC) and auto-manager (MRA) state machines
//! - Interconnection manager (MIM, ring-check and link-check) and client (MIC)
//! - PDU codec with prebuilt frame templates and in-place patching
//! - Cooperative timer arena with drift-free periodic timers
//! - Hardware MRP or ACL-based forwarding control behind one trait
//! - Instance directory with configuration validation, status, statistics
//!   and a bounded history
//!
//! # Example
//!
//! ```
//! use mrp::pdu::{parse, PduKind};
//! use mrp::template::{build_template, TemplateParams};
//! use mrp::types::{DomainId, PortRole};
//!
//! let params = TemplateParams {
//!     smac: "02:00:00:00:00:01".parse().unwrap(),
//!     vlan: None,
//!     domain_id: DomainId::default(),
//!     sa: "02:00:00:00:00:aa".parse().unwrap(),
//!     prio: 0x8000,
//!     in_id: 0,
//!     oui: [0x08, 0x00, 0x06],
//!     port_role: PortRole::Primary,
//! };
//!
//! let frame = build_template(PduKind::Test, &params);
//! let pdu = parse(frame.as_bytes()).unwrap();
//! assert_eq!(pdu.kind(), Some(PduKind::Test));
//! ```
//!
//! The switch itself is reached through the traits in [`hal`]; a host wires
//! them into an [`Engine`] together with a [`ForwardingBackend`].

pub mod conf;
pub mod error;
pub mod forwarding;
pub mod hal;
pub mod history;
pub mod pdu;
pub mod template;
pub mod timer;
pub mod types;

mod engine;
mod instance;
mod interconnect;
mod ring;

pub use engine::{Engine, Platform, PortInfo, PortTable};
pub use error::{ConfError, HalError, HalResult, PduError};
pub use forwarding::{AclBackend, ForwardingBackend, HardwareBackend, InstanceView};
pub use instance::TimerKind;
pub use types::{
    Capabilities, InRole, InstanceConf, InstanceId, InstanceStatistics, InstanceStatus, MacAddr,
    NotificationStatus, OperWarnings, PortConf, PortNo, RingRole,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_conf() {
        let conf = InstanceConf::default();
        assert!(!conf.admin_active);
        assert_eq!(conf.role, RingRole::Client);
        assert_eq!(conf.in_role, InRole::None);
        assert_eq!(conf.role.to_string(), "MRC");
    }
}
