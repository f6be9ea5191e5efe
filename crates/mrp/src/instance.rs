//! MRP instance record and the helpers the state machines act through.
//!
//! An [`Instance`] owns its configuration, protocol variables, timers, frame
//! templates and statistics. It never owns ports: the engine's port table
//! holds per-port facts and the forwarding backend applies port state.

use crate::engine::Context;
use crate::error::PatchError;
use crate::forwarding::InstanceView;
use crate::hal::AfiId;
use crate::history::{History, HistoryEntry, HistoryEvent};
use crate::pdu::{PduKind, VlanTag};
use crate::template::{Field, FrameTemplate, TemplateParams, build_template};
use crate::timer::TimerHandle;
use crate::types::{
    InFsmState, InRole, InTiming, InstanceConf, InstanceId, InstanceStatistics, InstanceStatus,
    ManagerCandidate, NotificationStatus, OperRole, OperState, OperWarnings, PortNo, PortRole,
    PortSlot, PortStatus, RingFsmState, RingRole, RingState, RingTiming, RoundTripStats,
    SfTrigger,
};
use crate::{interconnect, ring};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// PCP of every MRP frame sent tagged
const MRP_PCP: u8 = 7;

/// Purpose of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    RingTest,
    RingTopology,
    RingLinkUp,
    RingLinkDown,
    FdbFlush,
    MraMonitor,
    MultiManager,
    TestCopyResume,
    InTest,
    InTopology,
    InLinkUp,
    InLinkDown,
    InLinkStatus,
    MultiInManager,
    InTestCopyResume,
}

impl TimerKind {
    pub const COUNT: usize = 15;

    pub const ALL: [TimerKind; TimerKind::COUNT] = [
        TimerKind::RingTest,
        TimerKind::RingTopology,
        TimerKind::RingLinkUp,
        TimerKind::RingLinkDown,
        TimerKind::FdbFlush,
        TimerKind::MraMonitor,
        TimerKind::MultiManager,
        TimerKind::TestCopyResume,
        TimerKind::InTest,
        TimerKind::InTopology,
        TimerKind::InLinkUp,
        TimerKind::InLinkDown,
        TimerKind::InLinkStatus,
        TimerKind::MultiInManager,
        TimerKind::InTestCopyResume,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TimerKind::RingTest => "ring_test",
            TimerKind::RingTopology => "ring_topology",
            TimerKind::RingLinkUp => "ring_link_up",
            TimerKind::RingLinkDown => "ring_link_down",
            TimerKind::FdbFlush => "fdb_flush",
            TimerKind::MraMonitor => "mra_monitor",
            TimerKind::MultiManager => "multi_manager",
            TimerKind::TestCopyResume => "test_copy_resume",
            TimerKind::InTest => "in_test",
            TimerKind::InTopology => "in_topology",
            TimerKind::InLinkUp => "in_link_up",
            TimerKind::InLinkDown => "in_link_down",
            TimerKind::InLinkStatus => "in_link_status",
            TimerKind::MultiInManager => "multi_in_manager",
            TimerKind::InTestCopyResume => "in_test_copy_resume",
        }
    }
}

/// Payload of every engine timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub instance: InstanceId,
    pub kind: TimerKind,
}

/// Runtime state of one port slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRuntime {
    pub port: Option<PortNo>,
    pub sf: bool,
    pub sf_from_mep: bool,
    pub forwarding: bool,
}

impl Default for PortRuntime {
    fn default() -> Self {
        Self {
            port: None,
            sf: true,
            sf_from_mep: false,
            forwarding: false,
        }
    }
}

/// Signal-fail reading of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SfReading {
    pub sf: bool,
    pub from_mep: bool,
    pub unusable: bool,
}

#[derive(Debug, Clone)]
struct AfiJob {
    id: AfiId,
    frame: Vec<u8>,
}

/// One MRP instance
#[derive(Debug)]
pub struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) conf: InstanceConf,
    pub(crate) active: bool,

    pub(crate) oper_role: OperRole,
    pub(crate) ring_fsm: RingFsmState,
    pub(crate) ring_state: RingState,
    pub(crate) in_fsm: InFsmState,
    pub(crate) in_state: RingState,
    pub(crate) primary: PortSlot,
    pub(crate) ports: [PortRuntime; 3],
    pub(crate) ring_timing: RingTiming,
    pub(crate) in_timing: InTiming,

    pub(crate) transitions: u16,
    pub(crate) in_transitions: u16,
    sequence_id: u16,

    /// Test intervals elapsed without the own Test returning
    pub(crate) test_curr: u32,
    /// The test timer runs with the short interval
    pub(crate) test_short: bool,
    pub(crate) no_tc: bool,
    /// TopologyChange frames still to send
    pub(crate) topo_curr: u32,
    /// LinkDown/LinkUp frames still to send
    pub(crate) link_curr: u32,
    pub(crate) mra_missed: u32,
    pub(crate) best_manager: Option<ManagerCandidate>,
    pub(crate) test_copy_paused: bool,

    pub(crate) in_test_curr: u32,
    pub(crate) in_topo_curr: u32,
    pub(crate) in_link_curr: u32,
    pub(crate) in_poll_curr: u32,
    pub(crate) in_test_copy_paused: bool,

    pub(crate) warnings: OperWarnings,
    pub(crate) rtt: RoundTripStats,
    pub(crate) stats: InstanceStatistics,
    pub(crate) history: History,

    timers: Option<[TimerHandle; TimerKind::COUNT]>,
    templates: HashMap<(PortSlot, PduKind), FrameTemplate>,
    afi: HashMap<(PortSlot, PduKind), AfiJob>,
}

impl Instance {
    pub fn new(id: InstanceId, conf: InstanceConf) -> Self {
        let ring_timing = RingTiming::for_profile(conf.recovery_profile);
        let in_timing = InTiming::for_profile(conf.in_recovery_profile);
        Self {
            id,
            conf,
            active: false,
            oper_role: OperRole::Client,
            ring_fsm: RingFsmState::PowerOn,
            ring_state: RingState::Open,
            in_fsm: InFsmState::PowerOn,
            in_state: RingState::Open,
            primary: PortSlot::Port1,
            ports: [PortRuntime::default(); 3],
            ring_timing,
            in_timing,
            transitions: 0,
            in_transitions: 0,
            sequence_id: 0,
            test_curr: 0,
            test_short: false,
            no_tc: false,
            topo_curr: 0,
            link_curr: 0,
            mra_missed: 0,
            best_manager: None,
            test_copy_paused: false,
            in_test_curr: 0,
            in_topo_curr: 0,
            in_link_curr: 0,
            in_poll_curr: 0,
            in_test_copy_paused: false,
            warnings: OperWarnings::empty(),
            rtt: RoundTripStats::default(),
            stats: InstanceStatistics::default(),
            history: History::default(),
            timers: None,
            templates: HashMap::new(),
            afi: HashMap::new(),
        }
    }

    pub(crate) fn has_in_role(&self) -> bool {
        self.conf.in_role != InRole::None
    }

    pub(crate) fn secondary(&self) -> PortSlot {
        self.primary.other()
    }

    pub(crate) fn port(&self, slot: PortSlot) -> Option<PortNo> {
        self.ports[slot.index()].port
    }

    pub(crate) fn sf(&self, slot: PortSlot) -> bool {
        self.ports[slot.index()].sf
    }

    pub(crate) fn is_forwarding(&self, slot: PortSlot) -> bool {
        self.ports[slot.index()].forwarding
    }

    /// Slot that owns `port`, if any
    pub(crate) fn slot_of(&self, port: PortNo) -> Option<PortSlot> {
        PortSlot::ALL
            .into_iter()
            .filter(|s| *s != PortSlot::In || self.has_in_role())
            .find(|s| self.port(*s) == Some(port))
    }

    pub(crate) fn port_role(&self, slot: PortSlot) -> PortRole {
        match slot {
            PortSlot::In => PortRole::Interconnection,
            s if s == self.primary => PortRole::Primary,
            _ => PortRole::Secondary,
        }
    }

    pub(crate) fn manager_candidate(&self, ctx: &Context) -> ManagerCandidate {
        ManagerCandidate::new(self.conf.manager_priority, ctx.node_mac)
    }

    pub(crate) fn view(&self) -> InstanceView {
        InstanceView {
            id: self.id,
            role: self.conf.role,
            oper_role: self.oper_role,
            in_role: self.conf.in_role,
            ports: [
                self.ports[0].port,
                self.ports[1].port,
                self.ports[2].port,
            ],
            forwarding: [
                self.ports[0].forwarding,
                self.ports[1].forwarding,
                self.ports[2].forwarding,
            ],
            primary: self.primary,
            vlan: self.conf.vlan,
            in_vlan: self.conf.in_vlan,
            in_id: self.conf.in_id,
            ring_timing: self.ring_timing,
            in_timing: self.in_timing,
        }
    }

    pub(crate) fn record(&mut self, ctx: &Context, event: HistoryEvent) {
        self.history.push(ctx.now(), event);
    }

    pub(crate) fn internal_error(&mut self, ctx: &Context, what: &str, err: impl std::fmt::Display) {
        warn!(instance = self.id, error = %err, "{} failed", what);
        self.set_warnings(ctx, self.warnings | OperWarnings::INTERNAL_ERROR);
    }

    pub(crate) fn set_warnings(&mut self, ctx: &Context, warnings: OperWarnings) {
        if warnings == self.warnings {
            return;
        }
        let raised = warnings - self.warnings;
        if !raised.is_empty() {
            warn!(instance = self.id, warnings = ?raised, "operational warning raised");
        }
        self.warnings = warnings;
        self.record(ctx, HistoryEvent::WarningsChanged { warnings });
    }

    // Timers

    fn timer(&self, kind: TimerKind) -> Option<TimerHandle> {
        self.timers.map(|t| t[kind.index()])
    }

    pub(crate) fn start_timer(&mut self, ctx: &mut Context, kind: TimerKind, interval_us: u64, periodic: bool) {
        let Some(h) = self.timer(kind) else {
            return;
        };
        let now = ctx.now();
        if let Err(e) = ctx.timers.start_with(h, interval_us, periodic, now) {
            self.internal_error(ctx, kind.name(), e);
        }
    }

    /// Arm a one-shot timer unless it is already running
    pub(crate) fn start_timer_if_idle(&mut self, ctx: &mut Context, kind: TimerKind, interval_us: u64) {
        if !self.timer_active(ctx, kind) {
            self.start_timer(ctx, kind, interval_us, false);
        }
    }

    pub(crate) fn stop_timer(&mut self, ctx: &mut Context, kind: TimerKind) {
        if let Some(h) = self.timer(kind) {
            if let Err(e) = ctx.timers.stop(h) {
                debug!(instance = self.id, timer = ?kind, error = %e, "timer stop failed");
            }
        }
    }

    pub(crate) fn timer_active(&self, ctx: &Context, kind: TimerKind) -> bool {
        self.timer(kind).is_some_and(|h| ctx.timers.is_active(h))
    }

    // Transmission

    fn template_params(&self, ctx: &Context, slot: PortSlot) -> Option<TemplateParams> {
        let port = self.port(slot)?;
        let info = ctx.ports.get(port);
        let vid = if slot == PortSlot::In {
            self.conf.in_vlan
        } else {
            self.conf.vlan
        };
        let vlan = (vid != 0).then(|| VlanTag {
            tpid: info.map(|i| i.tpid).unwrap_or(0x8100),
            pcp: MRP_PCP,
            vid,
        });
        Some(TemplateParams {
            smac: info.map(|i| i.mac).unwrap_or(ctx.node_mac),
            vlan,
            domain_id: self.conf.domain_id,
            sa: ctx.node_mac,
            prio: self.conf.manager_priority,
            in_id: self.conf.in_id,
            oui: self.conf.oui.octets(),
            port_role: self.port_role(slot),
        })
    }

    /// Cached template of `kind` for `slot` with sequence ID and port role
    /// patched in, built on first use.
    fn prepared(&mut self, ctx: &Context, slot: PortSlot, kind: PduKind) -> Option<&mut FrameTemplate> {
        if !self.templates.contains_key(&(slot, kind)) {
            let params = self.template_params(ctx, slot)?;
            self.templates.insert((slot, kind), build_template(kind, &params));
        }
        let role = self.port_role(slot);
        let seq = self.sequence_id;
        self.sequence_id = seq.wrapping_add(1);

        let template = self.templates.get_mut(&(slot, kind))?;
        let patched = template.patch_u16(Field::SequenceId, seq).and_then(|_| {
            if template.has_field(Field::PortRole) {
                template.patch_u16(Field::PortRole, role.to_wire())
            } else {
                Ok(())
            }
        });
        patched.ok().map(|_| template)
    }

    /// Send one PDU on `slot`; `fill` patches the kind-specific fields
    pub(crate) fn send(
        &mut self,
        ctx: &mut Context,
        slot: PortSlot,
        kind: PduKind,
        fill: impl FnOnce(&mut FrameTemplate) -> Result<(), PatchError>,
    ) {
        let Some(port) = self.port(slot) else {
            return;
        };
        let id = self.id;
        let Some(template) = self.prepared(ctx, slot, kind) else {
            return;
        };
        if let Err(e) = fill(&mut *template) {
            warn!(instance = id, port, kind = ?kind, error = %e, "cannot patch frame");
            return;
        }

        match ctx.io.transmit(port, template.as_bytes()) {
            Ok(()) => {
                debug!(instance = id, port, kind = ?kind, "tx");
                self.stats.port_mut(slot).tx.count(Some(kind));
            }
            Err(e) => {
                debug!(instance = id, port, kind = ?kind, error = %e, "tx failed");
                self.stats.port_mut(slot).tx_errors += 1;
            }
        }
    }

    /// Send on both ring ports, secondary first
    pub(crate) fn send_ring(
        &mut self,
        ctx: &mut Context,
        kind: PduKind,
        fill: impl Fn(&mut FrameTemplate) -> Result<(), PatchError>,
    ) {
        for slot in [self.secondary(), self.primary] {
            self.send(ctx, slot, kind, &fill);
        }
    }

    /// Send on both ring ports and on the interconnection port when it has
    /// no signal fail
    pub(crate) fn send_in_all(
        &mut self,
        ctx: &mut Context,
        kind: PduKind,
        fill: impl Fn(&mut FrameTemplate) -> Result<(), PatchError>,
    ) {
        self.send_ring(ctx, kind, &fill);
        if !self.sf(PortSlot::In) {
            self.send(ctx, PortSlot::In, kind, &fill);
        }
    }

    /// Send a received frame unchanged on `slot`
    pub(crate) fn forward_raw(&mut self, ctx: &mut Context, slot: PortSlot, frame: &[u8]) {
        let Some(port) = self.port(slot) else {
            return;
        };
        match ctx.io.transmit(port, frame) {
            Ok(()) => self.stats.port_mut(slot).forwarded += 1,
            Err(_) => self.stats.port_mut(slot).tx_errors += 1,
        }
    }

    /// Drop every cached frame; they are rebuilt on next use
    pub(crate) fn invalidate_templates(&mut self) {
        self.templates.clear();
    }

    /// Frame bytes of `kind` for `slot` as they would be sent now, without
    /// consuming a sequence ID
    pub(crate) fn snapshot(
        &mut self,
        ctx: &Context,
        slot: PortSlot,
        kind: PduKind,
        fill: impl FnOnce(&mut FrameTemplate) -> Result<(), PatchError>,
    ) -> Option<Vec<u8>> {
        if !self.templates.contains_key(&(slot, kind)) {
            let params = self.template_params(ctx, slot)?;
            self.templates.insert((slot, kind), build_template(kind, &params));
        }
        let role = self.port_role(slot);
        let mut t = self.templates.get(&(slot, kind))?.clone();
        if t.has_field(Field::PortRole) {
            t.patch_u16(Field::PortRole, role.to_wire()).ok()?;
        }
        fill(&mut t).ok()?;
        Some(t.as_bytes().to_vec())
    }

    /// Keep the hardware injection job of `kind` on `slot` in line with
    /// `frame`. `None` stops the job.
    pub(crate) fn afi_set(
        &mut self,
        ctx: &mut Context,
        slot: PortSlot,
        kind: PduKind,
        frame: Option<Vec<u8>>,
        interval_us: u64,
    ) {
        let current = self.afi.get(&(slot, kind)).map(|j| &j.frame);
        if current == frame.as_ref() {
            return;
        }
        if let Some(job) = self.afi.remove(&(slot, kind))
            && let Err(e) = ctx.io.afi_stop(job.id)
        {
            self.internal_error(ctx, "AFI stop", e);
        }
        let (Some(frame), Some(port)) = (frame, self.port(slot)) else {
            return;
        };
        match ctx.io.afi_start(port, &frame, interval_us) {
            Ok(id) => {
                debug!(instance = self.id, port, kind = ?kind, "AFI job started");
                self.afi.insert((slot, kind), AfiJob { id, frame });
            }
            Err(e) => self.internal_error(ctx, "AFI start", e),
        }
    }

    fn afi_stop_all(&mut self, ctx: &mut Context) {
        let jobs: Vec<_> = self.afi.keys().copied().collect();
        for (slot, kind) in jobs {
            self.afi_set(ctx, slot, kind, None, 0);
        }
    }

    // Forwarding

    /// Set the forwarding flag of a slot. A no-op when the flag already has
    /// that value. Backend failures are reported but the flag is kept.
    pub(crate) fn set_forwarding(&mut self, ctx: &mut Context, slot: PortSlot, forwarding: bool) {
        if self.port(slot).is_none() || self.ports[slot.index()].forwarding == forwarding {
            return;
        }
        self.ports[slot.index()].forwarding = forwarding;
        debug!(instance = self.id, slot = %slot, forwarding, "port state");
        self.record(ctx, HistoryEvent::PortForwarding { slot, forwarding });

        if let Err(e) = ctx.backend.set_port_forwarding(&self.view(), slot) {
            self.internal_error(ctx, "set port forwarding", e);
        }
    }

    /// Exchange primary and secondary designation
    pub(crate) fn swap_primary(&mut self, ctx: &mut Context) {
        self.primary = self.primary.other();
        info!(instance = self.id, primary = %self.primary, "primary port swapped");
        self.record(ctx, HistoryEvent::PrimarySwapped { primary: self.primary });
        self.update_backend_role(ctx);
    }

    pub(crate) fn update_backend_role(&mut self, ctx: &mut Context) {
        if let Err(e) = ctx.backend.update_role(&self.view()) {
            self.internal_error(ctx, "update role", e);
        }
    }

    pub(crate) fn set_oper_role(&mut self, ctx: &mut Context, role: OperRole) {
        if self.oper_role == role {
            return;
        }
        info!(instance = self.id, from = %self.oper_role, to = %role, "operational role changed");
        self.record(
            ctx,
            HistoryEvent::RoleChanged {
                from: self.oper_role,
                to: role,
            },
        );
        self.oper_role = role;
        self.update_backend_role(ctx);
    }

    pub(crate) fn set_ring_fsm(&mut self, ctx: &Context, to: RingFsmState) {
        let from = self.ring_fsm;
        if from != to {
            info!(instance = self.id, from = %from, to = %to, "ring state machine");
            self.record(ctx, HistoryEvent::RingFsm { from, to });
            self.ring_fsm = to;
        }

        let state = if to == RingFsmState::ChkRc {
            RingState::Closed
        } else {
            RingState::Open
        };
        if state != self.ring_state {
            self.ring_state = state;
            self.record(ctx, HistoryEvent::RingState { state });
        }
    }

    pub(crate) fn set_in_fsm(&mut self, ctx: &Context, to: InFsmState) {
        let from = self.in_fsm;
        if from != to {
            info!(instance = self.id, from = %from, to = %to, "interconnection state machine");
            self.record(ctx, HistoryEvent::InFsm { from, to });
            self.in_fsm = to;
        }

        let state = match (self.conf.in_role, to) {
            (InRole::Manager, InFsmState::ChkIc) | (InRole::Client, InFsmState::IpIdle) => {
                RingState::Closed
            }
            _ => RingState::Open,
        };
        if state != self.in_state {
            self.in_state = state;
            self.record(ctx, HistoryEvent::InState { state });
        }
    }

    pub(crate) fn set_best_manager(&mut self, ctx: &mut Context, best: ManagerCandidate) {
        if self.best_manager == Some(best) {
            return;
        }
        debug!(instance = self.id, prio = best.priority, mac = %best.mac, "best manager");
        self.best_manager = Some(best);
        self.record(ctx, HistoryEvent::BestManager { manager: best });
        if let Err(e) = ctx.backend.set_best_manager(&self.view(), &best) {
            self.internal_error(ctx, "set best manager", e);
        }
    }

    // FDB

    /// Flush after `interval_ms`; zero flushes now. A pending flush is only
    /// pushed out, never brought forward.
    pub(crate) fn schedule_flush(&mut self, ctx: &mut Context, interval_ms: u16) {
        if interval_ms == 0 {
            self.stop_timer(ctx, TimerKind::FdbFlush);
            self.flush_now(ctx);
            return;
        }
        let Some(h) = self.timer(TimerKind::FdbFlush) else {
            return;
        };
        let now = ctx.now();
        if let Err(e) = ctx.timers.extend(h, interval_ms as u64 * 1000, now) {
            self.internal_error(ctx, "schedule flush", e);
        }
    }

    pub(crate) fn flush_now(&mut self, ctx: &mut Context) {
        let mut ports: Vec<PortNo> = PortSlot::RING.iter().filter_map(|s| self.port(*s)).collect();
        if self.has_in_role()
            && let Some(p) = self.port(PortSlot::In)
        {
            ports.push(p);
        }

        debug!(instance = self.id, ports = ?ports, "FDB flush");
        self.stats.fdb_flushes += 1;
        self.record(ctx, HistoryEvent::FdbFlush);
        if let Err(e) = ctx.fdb.flush(&ports) {
            self.internal_error(ctx, "FDB flush", e);
        }
    }

    // Signal fail and port conditions

    /// Read the signal-fail state of a slot. A MEP that is missing, disabled,
    /// Up-facing or on another port is not usable: link state is used
    /// instead and the slot is flagged.
    pub(crate) fn read_sf(&self, ctx: &Context, slot: PortSlot) -> SfReading {
        let conf = self.conf.port_conf(slot);
        let Some(port) = conf.port else {
            return SfReading {
                sf: true,
                from_mep: false,
                unusable: false,
            };
        };
        let link_sf = !ctx.ports.link(port);

        if conf.sf_trigger == SfTrigger::Mep {
            let usable = conf.mep.as_ref().and_then(|key| ctx.health.status(key).ok()).filter(|st| {
                st.admin_enabled && st.direction == crate::hal::MepDirection::Down && st.port == port
            });
            return match usable {
                Some(st) => SfReading {
                    sf: !st.up,
                    from_mep: true,
                    unusable: false,
                },
                None => SfReading {
                    sf: link_sf,
                    from_mep: false,
                    unusable: true,
                },
            };
        }

        SfReading {
            sf: link_sf,
            from_mep: false,
            unusable: false,
        }
    }

    pub(crate) fn used_slots(&self) -> &'static [PortSlot] {
        if self.has_in_role() {
            &PortSlot::ALL
        } else {
            &PortSlot::RING
        }
    }

    /// Recompute health, STP and VLAN warnings. Idempotent.
    pub(crate) fn refresh_conditions(&mut self, ctx: &Context) {
        let mut conditions = OperWarnings::empty();

        for slot in self.used_slots() {
            let Some(port) = self.port(*slot) else {
                continue;
            };
            if self.read_sf(ctx, *slot).unusable {
                conditions |= OperWarnings::health_unusable(*slot);
            }
            if ctx.bridge.stp_enabled(port).unwrap_or(false) {
                conditions |= OperWarnings::stp_enabled(*slot);
            }

            let vid = if *slot == PortSlot::In {
                self.conf.in_vlan
            } else {
                self.conf.vlan
            };
            if let Ok(info) = ctx.bridge.port_vlan(port) {
                let mismatch = if vid == 0 {
                    info.untagged_vid != Some(info.pvid)
                } else {
                    !info.members.contains(vid) || info.untagged_vid == Some(vid)
                };
                if mismatch {
                    conditions |= OperWarnings::vlan_mismatch(*slot);
                }
            }
        }

        let warnings = (self.warnings - OperWarnings::CONDITIONS) | conditions;
        self.set_warnings(ctx, warnings);
    }

    /// Re-read signal fail of every slot and feed changes to the state
    /// machines. Ring slots are handled primary first.
    pub(crate) fn reevaluate_sf(&mut self, ctx: &mut Context) {
        if !self.active {
            return;
        }
        for slot in [self.primary, self.secondary(), PortSlot::In] {
            if slot == PortSlot::In && !self.has_in_role() {
                continue;
            }
            let reading = self.read_sf(ctx, slot);
            let rt = &mut self.ports[slot.index()];
            rt.sf_from_mep = reading.from_mep;
            if rt.sf != reading.sf {
                rt.sf = reading.sf;
                debug!(instance = self.id, slot = %slot, sf = reading.sf, "signal fail");
                if slot == PortSlot::In {
                    interconnect::on_sf(self, ctx, reading.sf);
                } else {
                    ring::on_sf(self, ctx, slot, reading.sf);
                }
            }
        }
    }

    // Lifecycle

    /// Allocate timers and switch resources and start the state machines
    pub(crate) fn activate(&mut self, ctx: &mut Context) {
        let id = self.id;
        let mut handles = Vec::with_capacity(TimerKind::COUNT);
        for kind in TimerKind::ALL {
            handles.push(ctx.timers.create(kind.name(), TimerEvent { instance: id, kind }));
        }
        self.timers = handles.try_into().ok();

        self.ring_timing = RingTiming::for_profile(self.conf.recovery_profile);
        self.in_timing = InTiming::for_profile(self.conf.in_recovery_profile);
        for slot in PortSlot::ALL {
            self.ports[slot.index()] = PortRuntime {
                port: self.conf.port_conf(slot).port,
                ..PortRuntime::default()
            };
        }
        self.primary = PortSlot::Port1;
        self.oper_role = match self.conf.role {
            RingRole::Manager => OperRole::Manager,
            RingRole::Client | RingRole::AutoManager => OperRole::Client,
        };
        self.transitions = 0;
        self.in_transitions = 0;
        self.test_curr = 0;
        self.no_tc = false;
        self.best_manager = None;
        self.rtt = RoundTripStats::default();
        self.active = true;

        info!(instance = id, role = %self.conf.role, in_role = %self.conf.in_role,
              backend = ctx.backend.name(), "instance activated");
        self.record(ctx, HistoryEvent::Activated);

        if let Err(e) = ctx.backend.activate(&self.view()) {
            self.internal_error(ctx, "backend activate", e);
        }

        self.set_ring_fsm(ctx, RingFsmState::AcStat1);
        if self.has_in_role() {
            self.set_in_fsm(ctx, InFsmState::AcStat1);
        }
        if self.conf.role == RingRole::AutoManager {
            ring::start_monitor(self, ctx);
        }

        self.refresh_conditions(ctx);
        self.reevaluate_sf(ctx);
    }

    /// Release everything `activate` allocated and leave the ports forwarding
    pub(crate) fn deactivate(&mut self, ctx: &mut Context) {
        if !self.active {
            return;
        }
        self.afi_stop_all(ctx);
        if let Some(handles) = self.timers.take() {
            for h in handles {
                if let Err(e) = ctx.timers.destroy(h) {
                    warn!(instance = self.id, error = %e, "timer destroy failed");
                }
            }
        }
        self.invalidate_templates();

        if let Err(e) = ctx.backend.deactivate(&self.view()) {
            warn!(instance = self.id, error = %e, "backend deactivate failed");
        }

        for rt in self.ports.iter_mut() {
            rt.forwarding = true;
            rt.sf = true;
        }
        self.active = false;
        self.ring_fsm = RingFsmState::PowerOn;
        self.ring_state = RingState::Open;
        self.in_fsm = InFsmState::PowerOn;
        self.in_state = RingState::Open;
        self.warnings = OperWarnings::empty();
        self.test_copy_paused = false;
        self.in_test_copy_paused = false;

        info!(instance = self.id, "instance deactivated");
        self.record(ctx, HistoryEvent::Deactivated);
    }

    /// Route an expired timer to its state machine
    pub(crate) fn on_timer(&mut self, ctx: &mut Context, kind: TimerKind) {
        if !self.active {
            return;
        }
        match kind {
            TimerKind::FdbFlush => self.flush_now(ctx),
            TimerKind::RingTest
            | TimerKind::RingTopology
            | TimerKind::RingLinkUp
            | TimerKind::RingLinkDown
            | TimerKind::MraMonitor
            | TimerKind::MultiManager
            | TimerKind::TestCopyResume => ring::on_timer(self, ctx, kind),
            TimerKind::InTest
            | TimerKind::InTopology
            | TimerKind::InLinkUp
            | TimerKind::InLinkDown
            | TimerKind::InLinkStatus
            | TimerKind::MultiInManager
            | TimerKind::InTestCopyResume => interconnect::on_timer(self, ctx, kind),
        }
    }

    /// Reload timing parameters after a recovery profile change. Running
    /// periodic timers pick up the new interval right away.
    pub(crate) fn apply_timing(&mut self, ctx: &mut Context) {
        self.ring_timing = RingTiming::for_profile(self.conf.recovery_profile);
        self.in_timing = InTiming::for_profile(self.conf.in_recovery_profile);
        info!(instance = self.id, profile = %self.conf.recovery_profile, "timing updated");

        if let Err(e) = ctx.backend.update_timing(&self.view()) {
            self.internal_error(ctx, "update timing", e);
        }
        let periodic = [
            (TimerKind::RingTest, self.ring_timing.test_default_interval_us),
            (TimerKind::MraMonitor, self.ring_timing.test_default_interval_us),
            (TimerKind::InTest, self.in_timing.test_default_interval_us),
        ];
        for (kind, interval) in periodic {
            if self.timer_active(ctx, kind) {
                self.start_timer(ctx, kind, interval, true);
            }
        }
        self.test_short = false;
    }

    pub(crate) fn clear_statistics(&mut self) {
        self.stats = InstanceStatistics::default();
        self.rtt = RoundTripStats::default();
    }

    // Reporting

    pub(crate) fn status(&self) -> InstanceStatus {
        if !self.active {
            return InstanceStatus::default();
        }
        let ports = self
            .used_slots()
            .iter()
            .filter_map(|slot| {
                let rt = self.ports[slot.index()];
                rt.port.map(|port| PortStatus {
                    slot: *slot,
                    port,
                    role: self.port_role(*slot),
                    sf: rt.sf,
                    forwarding: rt.forwarding,
                    sf_from_mep: rt.sf_from_mep,
                })
            })
            .collect();

        InstanceStatus {
            oper_state: OperState::Active,
            oper_warnings: self.warnings,
            oper_role: Some(self.oper_role),
            ring_fsm: self.ring_fsm,
            ring_state: self.ring_state,
            transitions: self.transitions,
            ports,
            in_fsm: self.has_in_role().then_some(self.in_fsm),
            in_state: self.in_state,
            in_transitions: self.in_transitions,
            round_trip: self.rtt,
            best_manager: self.best_manager,
        }
    }

    pub(crate) fn notification_status(&self) -> NotificationStatus {
        NotificationStatus {
            multiple_mrms: self.warnings.contains(OperWarnings::MULTIPLE_MRMS),
            multiple_mims: self.warnings.contains(OperWarnings::MULTIPLE_MIMS),
            ring_open: self.active
                && self.oper_role == OperRole::Manager
                && self.ring_state == RingState::Open,
            in_open: self.active
                && self.conf.in_role == InRole::Manager
                && self.in_state == RingState::Open,
        }
    }

    pub(crate) fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }
}
