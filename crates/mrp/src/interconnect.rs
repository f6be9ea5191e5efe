//! Interconnection state machines.
//!
//! The interconnection manager (MIM) keeps its interconnection port blocked
//! while the interconnection is closed. In ring-check mode it learns that
//! from its own InTest frames coming back; in link-check mode it polls the
//! interconnection client (MIC), which reports the state of its own
//! interconnection link with InLinkUp/InLinkDown.

use crate::engine::Context;
use crate::forwarding::{CpuCopy, LocState};
use crate::instance::{Instance, TimerKind};
use crate::pdu::{FrameClass, InTestTlv, MrpPdu, PduBody, PduKind};
use crate::ring::COPY_PAUSE_US;
use crate::template::Field;
use crate::types::{
    InFsmState, InMode, InRole, MULTI_MANAGER_WINDOW_US, OperWarnings, PortSlot,
};
use tracing::{debug, info, warn};

fn enter(inst: &mut Instance, ctx: &mut Context, state: InFsmState) {
    inst.set_in_fsm(ctx, state);
    if ctx.caps.afi {
        afi_refresh(inst, ctx);
    }
}

// Transmission

fn in_test_running(inst: &Instance) -> bool {
    inst.conf.in_role == InRole::Manager
        && inst.conf.in_mode == InMode::RingCheck
        && matches!(inst.in_fsm, InFsmState::ChkIo | InFsmState::ChkIc)
}

fn afi_refresh(inst: &mut Instance, ctx: &mut Context) {
    let running = in_test_running(inst);
    let state = inst.in_state.to_wire();
    let transitions = inst.in_transitions;
    let interval = inst.in_timing.test_default_interval_us;

    for slot in PortSlot::ALL {
        let frame = running
            .then(|| {
                inst.snapshot(ctx, slot, PduKind::InTest, |t| {
                    t.patch_u16(Field::State, state)?;
                    t.patch_u16(Field::Transition, transitions)
                })
            })
            .flatten();
        inst.afi_set(ctx, slot, PduKind::InTest, frame, interval);
    }
}

fn send_in_test(inst: &mut Instance, ctx: &mut Context) {
    if ctx.caps.afi {
        afi_refresh(inst, ctx);
        return;
    }
    let state = inst.in_state.to_wire();
    let transitions = inst.in_transitions;
    let now = ctx.now() as u32;
    inst.send_in_all(ctx, PduKind::InTest, |t| {
        t.patch_u16(Field::State, state)?;
        t.patch_u16(Field::Transition, transitions)?;
        t.patch_u32(Field::Timestamp, now)
    });
}

fn in_test_request(inst: &mut Instance, ctx: &mut Context) {
    let interval = inst.in_timing.test_default_interval_us;
    inst.start_timer(ctx, TimerKind::InTest, interval, true);
    send_in_test(inst, ctx);
}

fn send_in_topology_change(inst: &mut Instance, ctx: &mut Context) {
    let interval_ms = (inst.in_topo_curr as u64 * inst.in_timing.topo_change_interval_us / 1000) as u16;
    inst.send_in_all(ctx, PduKind::InTopologyChange, |t| {
        t.patch_u16(Field::Interval, interval_ms)
    });
}

fn in_topology_change_request(inst: &mut Instance, ctx: &mut Context) {
    inst.in_topo_curr = inst.in_timing.topo_repeat_count.saturating_sub(1);
    send_in_topology_change(inst, ctx);
    if inst.in_topo_curr == 0 {
        inst.stop_timer(ctx, TimerKind::InTopology);
        inst.schedule_flush(ctx, 0);
    } else {
        let interval = inst.in_timing.topo_change_interval_us;
        inst.start_timer(ctx, TimerKind::InTopology, interval, false);
    }
}

fn link_interval(inst: &Instance, kind: PduKind) -> u64 {
    if kind == PduKind::InLinkUp {
        inst.in_timing.link_up_interval_us
    } else {
        inst.in_timing.link_down_interval_us
    }
}

fn send_in_link_change(inst: &mut Instance, ctx: &mut Context, kind: PduKind) {
    inst.in_link_curr = inst.in_link_curr.saturating_sub(1);
    let interval_ms = (inst.in_link_curr as u64 * link_interval(inst, kind) / 1000) as u16;
    inst.send_in_all(ctx, kind, |t| t.patch_u16(Field::Interval, interval_ms));
}

fn in_link_change_request(inst: &mut Instance, ctx: &mut Context, kind: PduKind) {
    let (timer, other) = if kind == PduKind::InLinkUp {
        (TimerKind::InLinkUp, TimerKind::InLinkDown)
    } else {
        (TimerKind::InLinkDown, TimerKind::InLinkUp)
    };
    inst.stop_timer(ctx, other);
    inst.in_link_curr = inst.in_timing.link_change_count;
    send_in_link_change(inst, ctx, kind);
    let interval = link_interval(inst, kind);
    inst.start_timer(ctx, timer, interval, false);
}

fn send_poll(inst: &mut Instance, ctx: &mut Context) {
    inst.in_poll_curr = inst.in_poll_curr.saturating_sub(1);
    inst.send_in_all(ctx, PduKind::InLinkStatusPoll, |_| Ok(()));
}

/// Burst of link-status polls; the interconnection is opened when it ends
/// without an InLinkUp
fn poll_request(inst: &mut Instance, ctx: &mut Context) {
    inst.in_poll_curr = inst.in_timing.link_status_count;
    send_poll(inst, ctx);
    let interval = inst.in_timing.link_status_interval_us;
    inst.start_timer(ctx, TimerKind::InLinkStatus, interval, true);
}

fn stop_checks(inst: &mut Instance, ctx: &mut Context) {
    inst.stop_timer(ctx, TimerKind::InTest);
    inst.stop_timer(ctx, TimerKind::InLinkStatus);
    inst.in_test_curr = 0;
    inst.in_poll_curr = 0;
}

// Manager

fn open_in(inst: &mut Instance, ctx: &mut Context) {
    warn!(instance = inst.id, in_id = inst.conf.in_id, "interconnection open");
    inst.stop_timer(ctx, TimerKind::InLinkStatus);
    inst.set_forwarding(ctx, PortSlot::In, true);
    inst.in_transitions = inst.in_transitions.wrapping_add(1);
    inst.stats.in_open_count += 1;
    inst.in_test_curr = 0;
    enter(inst, ctx, InFsmState::ChkIo);
    in_topology_change_request(inst, ctx);
    if inst.conf.in_mode == InMode::RingCheck {
        in_test_request(inst, ctx);
    }
}

fn close_in(inst: &mut Instance, ctx: &mut Context) {
    info!(instance = inst.id, in_id = inst.conf.in_id, "interconnection closed");
    inst.set_forwarding(ctx, PortSlot::In, false);
    inst.in_test_curr = 0;
    enter(inst, ctx, InFsmState::ChkIc);
    in_topology_change_request(inst, ctx);
}

fn mim_sf(inst: &mut Instance, ctx: &mut Context, sf: bool) {
    match (inst.in_fsm, sf) {
        (InFsmState::AcStat1, false) => {
            inst.set_forwarding(ctx, PortSlot::In, false);
            inst.in_test_curr = 0;
            enter(inst, ctx, InFsmState::ChkIc);
            match inst.conf.in_mode {
                InMode::RingCheck => in_test_request(inst, ctx),
                InMode::LinkCheck => poll_request(inst, ctx),
            }
        }
        (InFsmState::ChkIo, true) => {
            stop_checks(inst, ctx);
            inst.set_forwarding(ctx, PortSlot::In, false);
            enter(inst, ctx, InFsmState::AcStat1);
            in_topology_change_request(inst, ctx);
        }
        (InFsmState::ChkIc, true) => {
            stop_checks(inst, ctx);
            inst.set_forwarding(ctx, PortSlot::In, false);
            enter(inst, ctx, InFsmState::AcStat1);
        }
        _ => {}
    }
}

fn mim_own_test(inst: &mut Instance, ctx: &mut Context) {
    if inst.conf.in_mode != InMode::RingCheck {
        return;
    }
    match inst.in_fsm {
        InFsmState::ChkIo => close_in(inst, ctx),
        InFsmState::ChkIc => inst.in_test_curr = 0,
        _ => {}
    }
}

fn foreign_mim_seen(inst: &mut Instance, ctx: &mut Context, test: &InTestTlv) {
    if !inst.warnings.contains(OperWarnings::MULTIPLE_MIMS) {
        warn!(instance = inst.id, in_id = test.in_id, other = %test.sa, "multiple interconnection managers");
    }
    inst.set_warnings(ctx, inst.warnings | OperWarnings::MULTIPLE_MIMS);
    inst.start_timer(ctx, TimerKind::MultiInManager, MULTI_MANAGER_WINDOW_US, false);

    if ctx.caps.hw_mrp && !inst.in_test_copy_paused {
        inst.in_test_copy_paused = true;
        if let Err(e) = ctx.backend.set_cpu_copy(&inst.view(), FrameClass::InTest, CpuCopy::Off) {
            inst.internal_error(ctx, "pause InTest copy", e);
        }
        inst.start_timer(ctx, TimerKind::InTestCopyResume, COPY_PAUSE_US, false);
    }
}

fn mim_link_up(inst: &mut Instance, ctx: &mut Context) {
    if inst.conf.in_mode != InMode::LinkCheck {
        return;
    }
    match inst.in_fsm {
        InFsmState::ChkIc => {
            inst.stop_timer(ctx, TimerKind::InLinkStatus);
            inst.in_poll_curr = 0;
        }
        InFsmState::ChkIo => close_in(inst, ctx),
        _ => {}
    }
}

fn mim_link_down(inst: &mut Instance, ctx: &mut Context) {
    if inst.in_fsm == InFsmState::ChkIc {
        open_in(inst, ctx);
    }
}

fn on_in_test_timer(inst: &mut Instance, ctx: &mut Context) {
    if !in_test_running(inst) {
        inst.stop_timer(ctx, TimerKind::InTest);
        return;
    }
    if inst.in_fsm == InFsmState::ChkIc && !inst.in_test_copy_paused {
        if inst.in_test_curr + 1 >= inst.in_timing.test_monitoring_count {
            open_in(inst, ctx);
            return;
        }
        inst.in_test_curr += 1;
    }
    send_in_test(inst, ctx);
}

fn on_poll_timer(inst: &mut Instance, ctx: &mut Context) {
    if inst.in_fsm != InFsmState::ChkIc {
        inst.stop_timer(ctx, TimerKind::InLinkStatus);
        return;
    }
    if inst.in_poll_curr > 0 {
        send_poll(inst, ctx);
    } else {
        debug!(instance = inst.id, "no InLinkUp answer to polls");
        open_in(inst, ctx);
    }
}

fn on_in_topology_timer(inst: &mut Instance, ctx: &mut Context) {
    if inst.in_topo_curr == 0 {
        return;
    }
    inst.in_topo_curr -= 1;
    send_in_topology_change(inst, ctx);
    if inst.in_topo_curr == 0 {
        inst.schedule_flush(ctx, 0);
    } else {
        let interval = inst.in_timing.topo_change_interval_us;
        inst.start_timer(ctx, TimerKind::InTopology, interval, false);
    }
}

// Client

fn mic_sf(inst: &mut Instance, ctx: &mut Context, sf: bool) {
    match (inst.in_fsm, sf) {
        (InFsmState::AcStat1, false) => {
            inst.set_forwarding(ctx, PortSlot::In, false);
            in_link_change_request(inst, ctx, PduKind::InLinkUp);
            enter(inst, ctx, InFsmState::Pt);
        }
        (InFsmState::Pt | InFsmState::IpIdle, true) => {
            inst.set_forwarding(ctx, PortSlot::In, false);
            in_link_change_request(inst, ctx, PduKind::InLinkDown);
            enter(inst, ctx, InFsmState::AcStat1);
        }
        _ => {}
    }
}

fn mic_topology_change(inst: &mut Instance, ctx: &mut Context) {
    if inst.in_fsm == InFsmState::Pt {
        inst.stop_timer(ctx, TimerKind::InLinkUp);
        inst.in_link_curr = 0;
        inst.set_forwarding(ctx, PortSlot::In, true);
        enter(inst, ctx, InFsmState::IpIdle);
    }
}

/// Answer a link-status poll with the current state of the interconnection link
fn mic_poll_reply(inst: &mut Instance, ctx: &mut Context) {
    let kind = if inst.sf(PortSlot::In) {
        PduKind::InLinkDown
    } else {
        PduKind::InLinkUp
    };
    inst.send_in_all(ctx, kind, |t| t.patch_u16(Field::Interval, 0));
}

fn on_link_timer(inst: &mut Instance, ctx: &mut Context, kind: PduKind) {
    let (state, timer) = if kind == PduKind::InLinkUp {
        (InFsmState::Pt, TimerKind::InLinkUp)
    } else {
        (InFsmState::AcStat1, TimerKind::InLinkDown)
    };
    if inst.in_fsm != state {
        return;
    }

    if inst.in_link_curr > 0 {
        send_in_link_change(inst, ctx, kind);
        let interval = link_interval(inst, kind);
        inst.start_timer(ctx, timer, interval, false);
    } else if kind == PduKind::InLinkUp {
        inst.set_forwarding(ctx, PortSlot::In, true);
        enter(inst, ctx, InFsmState::IpIdle);
    }
}

// Entry points

/// Signal fail of the interconnection slot changed
pub(crate) fn on_sf(inst: &mut Instance, ctx: &mut Context, sf: bool) {
    match inst.conf.in_role {
        InRole::Manager => mim_sf(inst, ctx, sf),
        InRole::Client => mic_sf(inst, ctx, sf),
        InRole::None => {}
    }
}

/// An interconnection PDU accepted on any port of the instance
pub(crate) fn on_pdu(inst: &mut Instance, ctx: &mut Context, pdu: &MrpPdu) {
    let own_id = pdu.in_id() == Some(inst.conf.in_id);

    if let PduBody::InTopologyChange(tc) = &pdu.body {
        inst.schedule_flush(ctx, tc.interval_ms);
        if own_id && inst.conf.in_role == InRole::Client {
            mic_topology_change(inst, ctx);
        }
        return;
    }
    if !own_id {
        return;
    }

    match (&pdu.body, inst.conf.in_role) {
        (PduBody::InTest(test), InRole::Manager) => {
            if test.sa == ctx.node_mac {
                mim_own_test(inst, ctx);
            } else {
                foreign_mim_seen(inst, ctx, test);
            }
        }
        (PduBody::InLinkUp(_), InRole::Manager) => mim_link_up(inst, ctx),
        (PduBody::InLinkDown(_), InRole::Manager) => mim_link_down(inst, ctx),
        (PduBody::InLinkStatusPoll(_), InRole::Client) => mic_poll_reply(inst, ctx),
        _ => {}
    }
}

/// Ports an InControl frame received on `ingress` is relayed to. Only used
/// when the switch leaves these frames to the CPU.
pub(crate) fn relay_targets(inst: &Instance, ctx: &Context, ingress: PortSlot, pdu: &MrpPdu) -> Vec<PortSlot> {
    if !inst.has_in_role() || pdu.sa() == Some(ctx.node_mac) {
        return Vec::new();
    }
    let own_id = pdu.in_id() == Some(inst.conf.in_id);

    let candidates: Vec<PortSlot> = match (own_id, inst.conf.in_role, ingress) {
        (true, InRole::Manager, _) => Vec::new(),
        (true, _, PortSlot::In) => PortSlot::RING.to_vec(),
        (true, _, _) => vec![PortSlot::In],
        (false, _, _) => PortSlot::ALL
            .into_iter()
            .filter(|s| *s != ingress && inst.is_forwarding(*s))
            .collect(),
    };
    candidates.into_iter().filter(|s| !inst.sf(*s)).collect()
}

pub(crate) fn on_timer(inst: &mut Instance, ctx: &mut Context, kind: TimerKind) {
    match kind {
        TimerKind::InTest => on_in_test_timer(inst, ctx),
        TimerKind::InTopology => on_in_topology_timer(inst, ctx),
        TimerKind::InLinkUp => on_link_timer(inst, ctx, PduKind::InLinkUp),
        TimerKind::InLinkDown => on_link_timer(inst, ctx, PduKind::InLinkDown),
        TimerKind::InLinkStatus => on_poll_timer(inst, ctx),
        TimerKind::MultiInManager => {
            debug!(instance = inst.id, "multiple interconnection manager window expired");
            inst.set_warnings(ctx, inst.warnings - OperWarnings::MULTIPLE_MIMS);
        }
        TimerKind::InTestCopyResume => {
            inst.in_test_copy_paused = false;
            if let Err(e) = ctx.backend.set_cpu_copy(&inst.view(), FrameClass::InTest, CpuCopy::On) {
                inst.internal_error(ctx, "resume InTest copy", e);
            }
        }
        _ => {}
    }
}

/// Loss-of-continuity change of the interconnection reported by the hardware
pub(crate) fn on_loc(inst: &mut Instance, ctx: &mut Context, loc: LocState) {
    if !in_test_running(inst) {
        return;
    }
    let copy_next = match (inst.in_fsm, loc.in_ring) {
        (InFsmState::ChkIc, true) => {
            open_in(inst, ctx);
            true
        }
        (InFsmState::ChkIo, false) => true,
        _ => false,
    };
    if copy_next
        && let Err(e) = ctx.backend.set_cpu_copy(&inst.view(), FrameClass::InTest, CpuCopy::Next)
    {
        inst.internal_error(ctx, "copy next InTest", e);
    }
}
