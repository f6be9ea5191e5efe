//! Error types of the MRP engine.

use crate::types::{InstanceId, PortNo, PortSlot};
use thiserror::Error;

/// Configuration errors. A rejected configuration is never partially applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfError {
    #[error("Instance ID {0} is out of range")]
    InvalidInstanceId(InstanceId),

    #[error("No such instance: {0}")]
    NoSuchInstance(InstanceId),

    #[error("Maximum number of instances ({0}) reached")]
    LimitReached(u32),

    #[error("Invalid name '{0}': at most 32 printable characters, no spaces")]
    InvalidName(String),

    #[error("Domain ID must not be all-zeros")]
    DomainIdAllZero,

    #[error("Invalid manager priority 0x{0:04x} for the configured role")]
    InvalidManagerPriority(u16),

    #[error("Invalid ring VLAN {0}")]
    InvalidVlan(u16),

    #[error("Invalid interconnection VLAN {0}")]
    InvalidInVlan(u16),

    #[error("Recovery profile {0} is not supported by this platform")]
    RecoveryProfileNotSupported(String),

    #[error("Interconnection recovery profile must be 200ms or 500ms")]
    InRecoveryProfileInvalid,

    #[error("No port configured for {0}")]
    MissingPort(PortSlot),

    #[error("Unknown port {0}")]
    UnknownPort(PortNo),

    #[error("Ring ports must differ")]
    RingPortsIdentical,

    #[error("Interconnection port must differ from the ring ports")]
    InPortIsRingPort,

    #[error("{0} uses MEP signal fail but no MEP is configured")]
    MepMissing(PortSlot),

    #[error("Two ports use the same MEP")]
    SameMep,

    #[error("Two instances with same port1 interface")]
    SamePort1,

    #[error("Two instances with same port2 interface")]
    SamePort2,

    #[error("Two instances with same interconnection port")]
    SameInPort,

    #[error("Port already in use by another instance's interconnection")]
    InterconnectionInUse,
}

/// PDU decode errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    #[error("Not an MRP frame (EtherType 0x{0:04x})")]
    NotMrp(u16),

    #[error("Truncated frame at offset {0}")]
    Truncated(usize),

    #[error("Unknown PDU type 0x{0:02x}")]
    UnknownType(u8),

    #[error("TLV 0x{tlv_type:02x} has length {len}")]
    LengthMismatch { tlv_type: u8, len: u8 },

    #[error("TLV at offset {0} overruns the frame")]
    Overrun(usize),

    #[error("Invalid field value in TLV 0x{0:02x}")]
    InvalidField(u8),

    #[error("Missing Common TLV")]
    MissingCommon,

    #[error("Missing End TLV")]
    MissingEnd,
}

/// Errors of template patching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("Template has no {0:?} field")]
    NoSuchField(crate::template::Field),

    #[error("Patch at offset {0} is out of bounds")]
    OutOfBounds(usize),
}

/// Timer subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("Periodic timer with zero period")]
    ZeroPeriod,

    #[error("Unknown timer handle")]
    UnknownHandle,
}

/// Errors reported by the switch abstraction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("{0}")]
    Failed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    Unsupported(&'static str),
}

impl HalError {
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        HalError::Failed(msg.to_string())
    }
}

pub type HalResult<T> = std::result::Result<T, HalError>;
