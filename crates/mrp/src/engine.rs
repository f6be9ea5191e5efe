//! The engine: instance directory, shared context and event entry points.
//!
//! [`Engine`] is a plain value with no interior locking. The host serialises
//! every call (configuration, received frames, link events, timer runs)
//! through one lock and calls [`Engine::run_timers`] when
//! [`Engine::next_deadline`] is reached.

use crate::conf::{self, ConfEffects};
use crate::error::ConfError;
use crate::forwarding::ForwardingBackend;
use crate::hal::{BridgeHal, Clock, FdbHal, HealthHal, PacketIo};
use crate::history::HistoryEntry;
use crate::instance::{Instance, TimerEvent};
use crate::pdu::{self, FrameClass, MrpPdu, PduBody};
use crate::timer::TimerService;
use crate::types::{
    Capabilities, INSTANCE_ID_MAX, InstanceConf, InstanceId, InstanceStatistics, InstanceStatus,
    MacAddr, NotificationStatus, PortNo, PortSlot,
};
use crate::{interconnect, ring};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Static facts and link state of a switch port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    /// Source MAC of frames sent on the port
    pub mac: MacAddr,
    /// TPID used when MRP frames are sent tagged
    pub tpid: u16,
    pub link: bool,
}

impl PortInfo {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            tpid: 0x8100,
            link: false,
        }
    }
}

/// Ports of the switch, keyed by port number
#[derive(Debug, Clone, Default)]
pub struct PortTable {
    ports: BTreeMap<PortNo, PortInfo>,
}

impl PortTable {
    pub fn new(ports: impl IntoIterator<Item = (PortNo, PortInfo)>) -> Self {
        Self {
            ports: ports.into_iter().collect(),
        }
    }

    pub fn get(&self, port: PortNo) -> Option<&PortInfo> {
        self.ports.get(&port)
    }

    pub fn contains(&self, port: PortNo) -> bool {
        self.ports.contains_key(&port)
    }

    pub fn link(&self, port: PortNo) -> bool {
        self.ports.get(&port).is_some_and(|p| p.link)
    }

    /// Returns true when the link state changed
    fn set_link(&mut self, port: PortNo, up: bool) -> bool {
        match self.ports.get_mut(&port) {
            Some(info) if info.link != up => {
                info.link = up;
                true
            }
            _ => false,
        }
    }
}

/// Switch services the engine drives
pub struct Platform {
    pub clock: Arc<dyn Clock>,
    pub backend: Box<dyn ForwardingBackend>,
    pub io: Box<dyn PacketIo>,
    pub fdb: Box<dyn FdbHal>,
    pub health: Box<dyn HealthHal>,
    pub bridge: Box<dyn BridgeHal>,
}

/// Everything instances share
pub(crate) struct Context {
    pub(crate) caps: Capabilities,
    pub(crate) node_mac: MacAddr,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) timers: TimerService<TimerEvent>,
    pub(crate) backend: Box<dyn ForwardingBackend>,
    pub(crate) io: Box<dyn PacketIo>,
    pub(crate) fdb: Box<dyn FdbHal>,
    pub(crate) health: Box<dyn HealthHal>,
    pub(crate) bridge: Box<dyn BridgeHal>,
    pub(crate) ports: PortTable,
}

impl Context {
    pub(crate) fn now(&self) -> u64 {
        self.clock.now_us()
    }
}

/// MRP engine of one switch
pub struct Engine {
    instances: BTreeMap<InstanceId, Instance>,
    ctx: Context,
}

impl Engine {
    pub fn new(caps: Capabilities, node_mac: MacAddr, ports: PortTable, platform: Platform) -> Self {
        info!(node = %node_mac, backend = platform.backend.name(), ports = ports.ports.len(),
              "MRP engine created");
        Self {
            instances: BTreeMap::new(),
            ctx: Context {
                caps,
                node_mac,
                clock: platform.clock,
                timers: TimerService::new(),
                backend: platform.backend,
                io: platform.io,
                fdb: platform.fdb,
                health: platform.health,
                bridge: platform.bridge,
                ports,
            },
        }
    }

    fn instance(&self, id: InstanceId) -> Result<&Instance, ConfError> {
        self.instances.get(&id).ok_or(ConfError::NoSuchInstance(id))
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance, ConfError> {
        self.instances.get_mut(&id).ok_or(ConfError::NoSuchInstance(id))
    }

    // Configuration

    pub fn conf_default(&self) -> InstanceConf {
        InstanceConf::default()
    }

    /// Create or update an instance. A rejected configuration leaves the
    /// directory untouched.
    pub fn conf_set(&mut self, id: InstanceId, conf: InstanceConf) -> Result<(), ConfError> {
        if id == 0 || id > INSTANCE_ID_MAX {
            return Err(ConfError::InvalidInstanceId(id));
        }
        let exists = self.instances.contains_key(&id);
        if !exists && self.instances.len() >= self.ctx.caps.instance_cnt_max as usize {
            return Err(ConfError::LimitReached(self.ctx.caps.instance_cnt_max));
        }

        let ports = &self.ctx.ports;
        conf::validate(&conf, &self.ctx.caps, |p| ports.contains(p))?;
        if conf.admin_active {
            let others = self
                .instances
                .iter()
                .filter(|(other, inst)| **other != id && inst.conf.admin_active)
                .map(|(other, inst)| (*other, &inst.conf));
            conf::validate_against(&conf, others)?;
        }

        let ctx = &mut self.ctx;
        if !exists {
            info!(instance = id, role = %conf.role, active = conf.admin_active, "instance created");
            let mut inst = Instance::new(id, conf);
            if inst.conf.admin_active {
                inst.activate(ctx);
            }
            self.instances.insert(id, inst);
            return Ok(());
        }
        let Some(inst) = self.instances.get_mut(&id) else {
            return Err(ConfError::NoSuchInstance(id));
        };

        let effects = conf::classify(&inst.conf, &conf);
        debug!(instance = id, effects = ?effects, "configuration changed");

        if !inst.active || effects.contains(ConfEffects::REACTIVATE) {
            inst.deactivate(ctx);
            inst.conf = conf;
            inst.invalidate_templates();
            if inst.conf.admin_active {
                inst.activate(ctx);
            }
            return Ok(());
        }

        inst.conf = conf;
        if effects.contains(ConfEffects::REBUILD_PDUS) {
            inst.invalidate_templates();
            inst.refresh_conditions(ctx);
        }
        if effects.contains(ConfEffects::TIMING) {
            inst.apply_timing(ctx);
        }
        if effects.contains(ConfEffects::SF_REEVALUATE) {
            inst.refresh_conditions(ctx);
            inst.reevaluate_sf(ctx);
        }
        Ok(())
    }

    pub fn conf_get(&self, id: InstanceId) -> Result<InstanceConf, ConfError> {
        self.instance(id).map(|i| i.conf.clone())
    }

    /// Deactivate and remove an instance
    pub fn conf_del(&mut self, id: InstanceId) -> Result<(), ConfError> {
        let mut inst = self
            .instances
            .remove(&id)
            .ok_or(ConfError::NoSuchInstance(id))?;
        inst.deactivate(&mut self.ctx);
        info!(instance = id, "instance deleted");
        Ok(())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.ctx.caps
    }

    // Status

    pub fn status(&self, id: InstanceId) -> Result<InstanceStatus, ConfError> {
        self.instance(id).map(Instance::status)
    }

    pub fn statistics(&self, id: InstanceId) -> Result<InstanceStatistics, ConfError> {
        self.instance(id).map(|i| i.stats)
    }

    pub fn statistics_clear(&mut self, id: InstanceId) -> Result<(), ConfError> {
        self.instance_mut(id).map(Instance::clear_statistics)
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    /// First instance ID after `after`, or the first one when `None`
    pub fn next_instance_id(&self, after: Option<InstanceId>) -> Option<InstanceId> {
        match after {
            None => self.instances.keys().next().copied(),
            Some(id) => self
                .instances
                .range(id.saturating_add(1)..)
                .next()
                .map(|(k, _)| *k),
        }
    }

    pub fn history(&self, id: InstanceId) -> Result<Vec<HistoryEntry>, ConfError> {
        self.instance(id).map(Instance::history)
    }

    pub fn history_clear(&mut self, id: InstanceId) -> Result<(), ConfError> {
        self.instance_mut(id).map(|i| i.history.clear())
    }

    pub fn notification_status(&self, id: InstanceId) -> Result<NotificationStatus, ConfError> {
        self.instance(id).map(Instance::notification_status)
    }

    // Events

    /// Link state of `port` changed
    pub fn on_link_change(&mut self, port: PortNo, up: bool) {
        if !self.ctx.ports.set_link(port, up) {
            return;
        }
        debug!(port, up, "link change");
        for inst in self.instances.values_mut() {
            if inst.active && inst.slot_of(port).is_some() {
                inst.reevaluate_sf(&mut self.ctx);
            }
        }
    }

    /// Health endpoint states changed
    pub fn on_health_change(&mut self) {
        for inst in self.instances.values_mut().filter(|i| i.active) {
            inst.refresh_conditions(&self.ctx);
            inst.reevaluate_sf(&mut self.ctx);
        }
    }

    /// VLAN or STP configuration of the bridge changed
    pub fn on_bridge_change(&mut self) {
        for inst in self.instances.values_mut().filter(|i| i.active) {
            inst.refresh_conditions(&self.ctx);
        }
    }

    /// Loss-of-continuity interrupt of the hardware MRP object of `id`
    pub fn on_loc_interrupt(&mut self, id: InstanceId) {
        let ctx = &mut self.ctx;
        let Some(inst) = self.instances.get_mut(&id).filter(|i| i.active) else {
            return;
        };
        let loc = match ctx.backend.loc_state(&inst.view()) {
            Ok(loc) => loc,
            Err(e) => {
                inst.internal_error(ctx, "read loss of continuity", e);
                return;
            }
        };
        debug!(instance = id, ring = loc.ring, in_ring = loc.in_ring, "loss of continuity");
        ring::on_loc(inst, ctx, loc);
        interconnect::on_loc(inst, ctx, loc);
    }

    /// A frame with an MRP destination address arrived on `port`
    pub fn on_frame(&mut self, port: PortNo, frame: &[u8]) {
        let ctx = &mut self.ctx;
        let Some((inst, slot)) = self
            .instances
            .values_mut()
            .filter(|i| i.active)
            .find_map(|i| i.slot_of(port).map(|s| (i, s)))
        else {
            trace!(port, "MRP frame on a port without instance");
            return;
        };

        let pdu = match pdu::parse(frame) {
            Ok(pdu) => pdu,
            Err(e) => {
                debug!(instance = inst.id, port, error = %e, "malformed MRP frame");
                inst.stats.port_mut(slot).rx_errors += 1;
                return;
            }
        };
        trace!(instance = inst.id, port, kind = ?pdu.kind(), "rx");

        if pdu.is_interconnection() {
            receive_in(inst, ctx, slot, &pdu, frame);
        } else {
            receive_ring(inst, ctx, slot, &pdu);
        }
    }

    /// Run every timer due now
    pub fn run_timers(&mut self) {
        let now = self.ctx.now();
        for due in self.ctx.timers.take_due(now) {
            // an earlier callback may have stopped or restarted it
            if !self.ctx.timers.is_current(&due) {
                continue;
            }
            let TimerEvent { instance, kind } = due.event;
            trace!(instance, timer = kind.name(), "timer expired");
            if let Some(inst) = self.instances.get_mut(&instance) {
                inst.on_timer(&mut self.ctx, kind);
            }
        }
    }

    /// Earliest timer deadline in microseconds since boot
    pub fn next_deadline(&self) -> Option<u64> {
        self.ctx.timers.next_deadline()
    }

    /// Called whenever a timer is armed earlier than the current deadline
    pub fn set_timer_waker(&mut self, waker: Box<dyn Fn() + Send>) {
        self.ctx.timers.set_waker(waker);
    }

    /// Deactivate every instance, leaving all ports forwarding
    pub fn shutdown(&mut self) {
        for inst in self.instances.values_mut() {
            inst.deactivate(&mut self.ctx);
        }
    }
}

fn is_own(ctx: &Context, pdu: &MrpPdu) -> bool {
    pdu.sa() == Some(ctx.node_mac)
}

fn receive_ring(inst: &mut Instance, ctx: &mut Context, slot: PortSlot, pdu: &MrpPdu) {
    if slot == PortSlot::In {
        trace!(instance = inst.id, "ring PDU on interconnection port ignored");
        return;
    }
    let stats = inst.stats.port_mut(slot);
    if pdu.domain_id != inst.conf.domain_id {
        stats.rx_unknown_domain += 1;
        return;
    }
    stats.rx.count(pdu.kind());

    if is_own(ctx, pdu) && !matches!(pdu.body, PduBody::Test(_)) {
        inst.stats.port_mut(slot).rx_own += 1;
        return;
    }
    ring::on_pdu(inst, ctx, pdu);
}

fn receive_in(inst: &mut Instance, ctx: &mut Context, slot: PortSlot, pdu: &MrpPdu, frame: &[u8]) {
    inst.stats.port_mut(slot).rx.count(pdu.kind());

    if is_own(ctx, pdu) && !matches!(pdu.body, PduBody::InTest(_)) {
        inst.stats.port_mut(slot).rx_own += 1;
        return;
    }

    if FrameClass::from_dmac(&pdu.dmac) == Some(FrameClass::InControl) && !ctx.caps.hw_mrp {
        for target in interconnect::relay_targets(inst, ctx, slot, pdu) {
            inst.forward_raw(ctx, target, frame);
        }
    }
    interconnect::on_pdu(inst, ctx, pdu);
}
