//! Shared fixtures for the engine integration tests: a fake switch that
//! records everything the engine asks of it and a clock the test advances.

#![allow(dead_code)]

use mrp::hal::{
    AceId, AclHal, AclRule, AfiId, BridgeHal, Clock, FdbHal, HealthHal, MepStatus, PacketIo,
    PortControl, PortVlanInfo,
};
use mrp::pdu::{self, MrpPdu, PduKind};
use mrp::template::{build_template, Field, FrameTemplate, TemplateParams};
use mrp::types::{DomainId, MepKey, PortRole};
use mrp::{
    AclBackend, Capabilities, Engine, HalError, HalResult, InstanceConf, MacAddr, Platform,
    PortConf, PortInfo, PortNo, PortTable, RingRole,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const NODE_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x10]);
pub const REMOTE_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x20]);
pub const PORTS: [PortNo; 4] = [1, 2, 3, 4];

/// Start of the test clock; far enough from zero that timestamps are not
/// mistaken for unset values
pub const T0: u64 = 1_000_000;

/// Monotonic clock moved by hand
#[derive(Debug)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self(AtomicU64::new(start_us))
    }

    pub fn set(&self, us: u64) {
        self.0.store(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything the engine did to the switch
#[derive(Debug, Default)]
pub struct Recorder {
    pub tx: Vec<(PortNo, Vec<u8>)>,
    /// Every forwarding change pushed to a port, in order
    pub forwarding_log: Vec<(PortNo, bool)>,
    pub forwarding: BTreeMap<PortNo, bool>,
    pub flushes: Vec<Vec<PortNo>>,
    pub acl: BTreeMap<AceId, AclRule>,
    next_ace: AceId,
}

pub type Shared = Arc<Mutex<Recorder>>;

/// One handle onto the shared recorder; the engine gets several
#[derive(Debug, Clone)]
pub struct FakeSwitch(pub Shared);

impl PacketIo for FakeSwitch {
    fn transmit(&mut self, port: PortNo, frame: &[u8]) -> HalResult<()> {
        self.0.lock().unwrap().tx.push((port, frame.to_vec()));
        Ok(())
    }

    fn afi_start(&mut self, _port: PortNo, _frame: &[u8], _interval_us: u64) -> HalResult<AfiId> {
        Err(HalError::Unsupported("afi"))
    }

    fn afi_stop(&mut self, _id: AfiId) -> HalResult<()> {
        Err(HalError::Unsupported("afi"))
    }
}

impl AclHal for FakeSwitch {
    fn set(&mut self, id: Option<AceId>, rule: &AclRule) -> HalResult<AceId> {
        let mut rec = self.0.lock().unwrap();
        let id = match id {
            Some(id) => id,
            None => {
                rec.next_ace += 1;
                rec.next_ace
            }
        };
        rec.acl.insert(id, rule.clone());
        Ok(id)
    }

    fn del(&mut self, id: AceId) -> HalResult<()> {
        self.0
            .lock()
            .unwrap()
            .acl
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| HalError::NotFound(format!("ace {}", id)))
    }

    fn get(&self, id: AceId) -> HalResult<AclRule> {
        self.0
            .lock()
            .unwrap()
            .acl
            .get(&id)
            .cloned()
            .ok_or_else(|| HalError::NotFound(format!("ace {}", id)))
    }
}

impl PortControl for FakeSwitch {
    fn set_forwarding(&mut self, port: PortNo, forwarding: bool) -> HalResult<()> {
        let mut rec = self.0.lock().unwrap();
        rec.forwarding_log.push((port, forwarding));
        rec.forwarding.insert(port, forwarding);
        Ok(())
    }
}

impl FdbHal for FakeSwitch {
    fn flush(&mut self, ports: &[PortNo]) -> HalResult<()> {
        self.0.lock().unwrap().flushes.push(ports.to_vec());
        Ok(())
    }
}

impl HealthHal for FakeSwitch {
    fn status(&self, key: &MepKey) -> HalResult<MepStatus> {
        Err(HalError::NotFound(key.to_string()))
    }
}

impl BridgeHal for FakeSwitch {
    fn port_vlan(&self, _port: PortNo) -> HalResult<PortVlanInfo> {
        Ok(PortVlanInfo::default())
    }

    fn stp_enabled(&self, _port: PortNo) -> HalResult<bool> {
        Ok(false)
    }
}

/// An engine on a four-port fake switch using the ACL backend
pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub switch: Shared,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_caps(Capabilities::default())
    }

    pub fn with_caps(caps: Capabilities) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let switch: Shared = Arc::default();
        let fake = FakeSwitch(switch.clone());

        let ports = PortTable::new(PORTS.iter().map(|p| {
            let mac = MacAddr([0x02, 0x00, 0x00, 0x00, 0x01, *p as u8]);
            (*p, PortInfo::new(mac))
        }));
        let platform = Platform {
            clock: clock.clone(),
            backend: Box::new(AclBackend::new(fake.clone(), fake.clone())),
            io: Box::new(fake.clone()),
            fdb: Box::new(fake.clone()),
            health: Box::new(fake.clone()),
            bridge: Box::new(fake),
        };

        Self {
            engine: Engine::new(caps, NODE_MAC, ports, platform),
            clock,
            switch,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_us()
    }

    /// Move the clock forward, running every timer on its own deadline
    pub fn advance(&mut self, us: u64) {
        let target = self.now() + us;
        while let Some(deadline) = self.engine.next_deadline() {
            if deadline > target {
                break;
            }
            self.clock.set(deadline.max(self.now()));
            self.engine.run_timers();
        }
        self.clock.set(target);
    }

    pub fn links_up(&mut self, ports: &[PortNo]) {
        for p in ports {
            self.engine.on_link_change(*p, true);
        }
    }

    pub fn forwarding(&self, port: PortNo) -> Option<bool> {
        self.switch.lock().unwrap().forwarding.get(&port).copied()
    }

    pub fn forwarding_log_len(&self) -> usize {
        self.switch.lock().unwrap().forwarding_log.len()
    }

    pub fn flush_count(&self) -> usize {
        self.switch.lock().unwrap().flushes.len()
    }

    pub fn clear_tx(&self) {
        self.switch.lock().unwrap().tx.clear();
    }

    /// Parsed frames of `kind` sent on `port`, oldest first
    pub fn sent(&self, port: PortNo, kind: PduKind) -> Vec<MrpPdu> {
        self.switch
            .lock()
            .unwrap()
            .tx
            .iter()
            .filter(|(p, _)| *p == port)
            .filter_map(|(_, f)| pdu::parse(f).ok())
            .filter(|pdu| pdu.kind() == Some(kind))
            .collect()
    }

    /// Raw bytes of the last frame of `kind` sent on `port`
    pub fn last_frame(&self, port: PortNo, kind: PduKind) -> Option<Vec<u8>> {
        self.switch
            .lock()
            .unwrap()
            .tx
            .iter()
            .rev()
            .filter(|(p, _)| *p == port)
            .find(|(_, f)| pdu::parse(f).ok().and_then(|pdu| pdu.kind()) == Some(kind))
            .map(|(_, f)| f.clone())
    }
}

pub fn ring_conf(role: RingRole, p1: PortNo, p2: PortNo) -> InstanceConf {
    InstanceConf {
        admin_active: true,
        role,
        ring_port1: PortConf::link(p1),
        ring_port2: PortConf::link(p2),
        manager_priority: match role {
            RingRole::AutoManager => 0xA000,
            _ => 0x8000,
        },
        ..InstanceConf::default()
    }
}

/// Frame of `kind` as another node with bridge address `sa` would send it
pub fn remote_frame(kind: PduKind, sa: MacAddr, prio: u16, in_id: u16) -> FrameTemplate {
    let params = TemplateParams {
        smac: sa,
        vlan: None,
        domain_id: DomainId::default(),
        sa,
        prio,
        in_id,
        oui: [0x00, 0x15, 0x4E],
        port_role: PortRole::Primary,
    };
    build_template(kind, &params)
}

/// MRP_Option frame carrying a manager negotiation SubTLV
pub fn manager_sub_frame(
    kind: PduKind,
    from: MacAddr,
    winner: (u16, MacAddr),
    other: (u16, MacAddr),
) -> Vec<u8> {
    let mut frame = remote_frame(kind, from, winner.0, 0);
    frame.patch_u16(Field::Prio, winner.0).unwrap();
    frame.patch_mac(Field::Sa, winner.1).unwrap();
    frame.patch_u16(Field::OtherPrio, other.0).unwrap();
    frame.patch_mac(Field::OtherSa, other.1).unwrap();
    frame.as_bytes().to_vec()
}
