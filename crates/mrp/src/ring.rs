//! Ring state machines: manager, client and auto-manager.
//!
//! A manager blocks its secondary port while its own Test frames come back
//! and forwards on it when they stop. A client forwards on both ports once
//! the link-up burst is over or a TopologyChange tells it to. An
//! auto-manager starts as client, promotes itself when Test frames stop and
//! yields to a better candidate.

use crate::engine::Context;
use crate::forwarding::{CpuCopy, LocState};
use crate::instance::{Instance, TimerKind};
use crate::pdu::{FrameClass, LinkChangeTlv, ManagerSubTlv, MrpPdu, PduBody, PduKind, SubTlvKind, TestTlv};
use crate::template::Field;
use crate::types::{
    MULTI_MANAGER_WINDOW_US, ManagerCandidate, OperRole, OperWarnings, PortSlot, RingFsmState,
    RingRole,
};
use tracing::{debug, info, warn};

/// CPU copy of Test frames is paused this long after a foreign manager shows up
pub(crate) const COPY_PAUSE_US: u64 = 5_000_000;

fn enter(inst: &mut Instance, ctx: &mut Context, state: RingFsmState) {
    inst.set_ring_fsm(ctx, state);
    if ctx.caps.afi {
        afi_refresh(inst, ctx);
    }
}

// Transmission

/// Keep the hardware Test injection in line with what a manager would send
fn afi_refresh(inst: &mut Instance, ctx: &mut Context) {
    let running = inst.oper_role == OperRole::Manager
        && matches!(
            inst.ring_fsm,
            RingFsmState::PrmUp | RingFsmState::ChkRo | RingFsmState::ChkRc
        );
    let state = inst.ring_state.to_wire();
    let transitions = inst.transitions;
    let interval = inst.ring_timing.test_default_interval_us;

    for slot in PortSlot::RING {
        let frame = running
            .then(|| {
                inst.snapshot(ctx, slot, PduKind::Test, |t| {
                    t.patch_u16(Field::State, state)?;
                    t.patch_u16(Field::Transition, transitions)
                })
            })
            .flatten();
        inst.afi_set(ctx, slot, PduKind::Test, frame, interval);
    }
}

fn send_test(inst: &mut Instance, ctx: &mut Context) {
    if ctx.caps.afi {
        afi_refresh(inst, ctx);
        return;
    }
    let state = inst.ring_state.to_wire();
    let transitions = inst.transitions;
    let now = ctx.now() as u32;
    inst.send_ring(ctx, PduKind::Test, |t| {
        t.patch_u16(Field::State, state)?;
        t.patch_u16(Field::Transition, transitions)?;
        t.patch_u32(Field::Timestamp, now)
    });
}

/// Send Test now and restart the test timer
fn test_request(inst: &mut Instance, ctx: &mut Context, short: bool) {
    let t = inst.ring_timing;
    let interval = if short {
        t.test_short_interval_us
    } else {
        t.test_default_interval_us
    };
    inst.test_short = short;
    inst.start_timer(ctx, TimerKind::RingTest, interval, true);
    send_test(inst, ctx);
}

fn send_topology_change(inst: &mut Instance, ctx: &mut Context) {
    let interval_ms = (inst.topo_curr as u64 * inst.ring_timing.topo_change_interval_us / 1000) as u16;
    inst.send_ring(ctx, PduKind::TopologyChange, |t| {
        t.patch_u16(Field::Interval, interval_ms)
    });
}

/// TopologyChange burst. Each frame announces the time left until the flush;
/// the last one announces zero and flushes locally.
fn topology_change_request(inst: &mut Instance, ctx: &mut Context) {
    inst.topo_curr = inst.ring_timing.topo_repeat_count.saturating_sub(1);
    send_topology_change(inst, ctx);
    if inst.topo_curr == 0 {
        inst.stop_timer(ctx, TimerKind::RingTopology);
        inst.schedule_flush(ctx, 0);
    } else {
        let interval = inst.ring_timing.topo_change_interval_us;
        inst.start_timer(ctx, TimerKind::RingTopology, interval, false);
    }
}

fn send_link_change(inst: &mut Instance, ctx: &mut Context, kind: PduKind) {
    let t = inst.ring_timing;
    let interval_us = if kind == PduKind::LinkUp {
        t.link_up_interval_us
    } else {
        t.link_down_interval_us
    };
    inst.link_curr = inst.link_curr.saturating_sub(1);
    let interval_ms = (inst.link_curr as u64 * interval_us / 1000) as u16;
    let blocked = !inst.is_forwarding(inst.secondary());

    let primary = inst.primary;
    inst.send(ctx, primary, kind, |t| {
        t.patch_u16(Field::Interval, interval_ms)?;
        t.patch_u16(Field::Blocked, blocked as u16)
    });
}

fn link_change_request(inst: &mut Instance, ctx: &mut Context, kind: PduKind) {
    let t = inst.ring_timing;
    let (timer, other, interval) = if kind == PduKind::LinkUp {
        (TimerKind::RingLinkUp, TimerKind::RingLinkDown, t.link_up_interval_us)
    } else {
        (TimerKind::RingLinkDown, TimerKind::RingLinkUp, t.link_down_interval_us)
    };
    inst.stop_timer(ctx, other);
    inst.link_curr = t.link_change_count;
    send_link_change(inst, ctx, kind);
    inst.start_timer(ctx, timer, interval, false);
}

fn send_manager_sub(
    inst: &mut Instance,
    ctx: &mut Context,
    kind: PduKind,
    winner: ManagerCandidate,
    other: ManagerCandidate,
) {
    debug!(instance = inst.id, kind = ?kind, winner = %winner.mac, other = %other.mac, "manager negotiation");
    inst.send_ring(ctx, kind, |t| {
        t.patch_u16(Field::Prio, winner.priority)?;
        t.patch_mac(Field::Sa, winner.mac)?;
        t.patch_u16(Field::OtherPrio, other.priority)?;
        t.patch_mac(Field::OtherSa, other.mac)
    });
}

// Manager

fn ring_opened(inst: &mut Instance) {
    inst.transitions = inst.transitions.wrapping_add(1);
    inst.stats.ring_open_count += 1;
}

/// Forward on the secondary port after the ring was found open
fn open_ring(inst: &mut Instance, ctx: &mut Context) {
    warn!(instance = inst.id, "ring open");
    let secondary = inst.secondary();
    inst.set_forwarding(ctx, secondary, true);
    ring_opened(inst);
    inst.test_curr = 0;
    enter(inst, ctx, RingFsmState::ChkRo);
    // NO_TC suppresses the TopologyChange burst as well as the short Test
    // interval; the IEC table leaves open whether a TC is still due.
    let tc = !inst.no_tc;
    if tc {
        topology_change_request(inst, ctx);
    }
    test_request(inst, ctx, tc);
}

/// Block the secondary port after the ring was found closed
fn close_ring(inst: &mut Instance, ctx: &mut Context) {
    info!(instance = inst.id, "ring closed");
    let secondary = inst.secondary();
    inst.set_forwarding(ctx, secondary, false);
    inst.test_curr = 0;
    inst.no_tc = false;
    enter(inst, ctx, RingFsmState::ChkRc);
}

fn manager_sf(inst: &mut Instance, ctx: &mut Context, slot: PortSlot, sf: bool) {
    let is_primary = slot == inst.primary;

    match (inst.ring_fsm, sf) {
        (RingFsmState::AcStat1, false) => {
            if !is_primary {
                inst.swap_primary(ctx);
            }
            let primary = inst.primary;
            inst.set_forwarding(ctx, primary, true);
            enter(inst, ctx, RingFsmState::PrmUp);
            test_request(inst, ctx, false);
        }
        (RingFsmState::PrmUp, true) if is_primary => {
            inst.stop_timer(ctx, TimerKind::RingTest);
            let primary = inst.primary;
            inst.set_forwarding(ctx, primary, false);
            enter(inst, ctx, RingFsmState::AcStat1);
        }
        (RingFsmState::PrmUp, false) if !is_primary => {
            inst.test_curr = 0;
            inst.no_tc = true;
            enter(inst, ctx, RingFsmState::ChkRc);
            test_request(inst, ctx, false);
        }
        (RingFsmState::ChkRo, true) => {
            if is_primary {
                inst.swap_primary(ctx);
            }
            let secondary = inst.secondary();
            inst.set_forwarding(ctx, secondary, false);
            enter(inst, ctx, RingFsmState::PrmUp);
            topology_change_request(inst, ctx);
            test_request(inst, ctx, true);
        }
        (RingFsmState::ChkRc, true) if is_primary => {
            inst.swap_primary(ctx);
            let (primary, secondary) = (inst.primary, inst.secondary());
            inst.set_forwarding(ctx, primary, true);
            inst.set_forwarding(ctx, secondary, false);
            ring_opened(inst);
            enter(inst, ctx, RingFsmState::PrmUp);
            topology_change_request(inst, ctx);
            test_request(inst, ctx, true);
        }
        (RingFsmState::ChkRc, true) => {
            ring_opened(inst);
            enter(inst, ctx, RingFsmState::PrmUp);
            test_request(inst, ctx, false);
        }
        _ => {}
    }
}

fn manager_own_test(inst: &mut Instance, ctx: &mut Context, test: &TestTlv) {
    if !ctx.caps.afi {
        inst.rtt.record_since(ctx.now(), test.timestamp);
    }

    match inst.ring_fsm {
        RingFsmState::PrmUp => close_ring(inst, ctx),
        RingFsmState::ChkRo => {
            close_ring(inst, ctx);
            topology_change_request(inst, ctx);
        }
        RingFsmState::ChkRc => {
            inst.test_curr = 0;
            inst.no_tc = false;
        }
        _ => {}
    }
}

/// Another node sends Test frames in this ring
fn foreign_manager_seen(inst: &mut Instance, ctx: &mut Context) {
    if !inst.warnings.contains(OperWarnings::MULTIPLE_MRMS) {
        warn!(instance = inst.id, "multiple ring managers");
    }
    inst.set_warnings(ctx, inst.warnings | OperWarnings::MULTIPLE_MRMS);
    inst.start_timer(ctx, TimerKind::MultiManager, MULTI_MANAGER_WINDOW_US, false);

    if ctx.caps.hw_mrp && !inst.test_copy_paused {
        inst.test_copy_paused = true;
        if let Err(e) = ctx.backend.set_cpu_copy(&inst.view(), FrameClass::Test, CpuCopy::Off) {
            inst.internal_error(ctx, "pause Test copy", e);
        }
        inst.start_timer(ctx, TimerKind::TestCopyResume, COPY_PAUSE_US, false);
    }
}

fn manager_foreign_test(inst: &mut Instance, ctx: &mut Context, test: &TestTlv) {
    if inst.conf.role == RingRole::AutoManager {
        let remote = ManagerCandidate::new(test.prio, test.sa);
        let local = inst.manager_candidate(ctx);
        if remote.is_better_than(&local) {
            demote(inst, ctx, remote);
            send_manager_sub(inst, ctx, PduKind::TestMgrNAck, remote, local);
            return;
        }
        send_manager_sub(inst, ctx, PduKind::TestMgrNAck, local, remote);
    }
    foreign_manager_seen(inst, ctx);
}

fn manager_link_change(inst: &mut Instance, ctx: &mut Context, kind: PduKind, change: &LinkChangeTlv) {
    if inst.conf.react_on_link_change {
        match (inst.ring_fsm, kind) {
            (RingFsmState::ChkRc, PduKind::LinkDown) => {
                open_ring(inst, ctx);
                return;
            }
            (RingFsmState::ChkRo, PduKind::LinkUp) if change.blocked => {
                close_ring(inst, ctx);
                inst.topo_curr = 0;
                inst.stop_timer(ctx, TimerKind::RingTopology);
                send_topology_change(inst, ctx);
                inst.schedule_flush(ctx, 0);
                test_request(inst, ctx, false);
                return;
            }
            _ => {}
        }
    }

    if matches!(
        inst.ring_fsm,
        RingFsmState::PrmUp | RingFsmState::ChkRo | RingFsmState::ChkRc
    ) {
        test_request(inst, ctx, true);
    }
}

fn on_test_timer(inst: &mut Instance, ctx: &mut Context) {
    if inst.oper_role != OperRole::Manager {
        inst.stop_timer(ctx, TimerKind::RingTest);
        return;
    }
    if inst.test_short {
        inst.test_short = false;
        let interval = inst.ring_timing.test_default_interval_us;
        inst.start_timer(ctx, TimerKind::RingTest, interval, true);
    }

    match inst.ring_fsm {
        RingFsmState::ChkRc => {
            if !inst.test_copy_paused {
                if inst.test_curr + 1 >= inst.ring_timing.test_monitoring_count {
                    open_ring(inst, ctx);
                    return;
                }
                inst.test_curr += 1;
            }
            send_test(inst, ctx);
        }
        RingFsmState::PrmUp | RingFsmState::ChkRo => send_test(inst, ctx),
        _ => {}
    }
}

fn on_topology_timer(inst: &mut Instance, ctx: &mut Context) {
    if inst.topo_curr == 0 {
        return;
    }
    inst.topo_curr -= 1;
    send_topology_change(inst, ctx);
    if inst.topo_curr == 0 {
        inst.schedule_flush(ctx, 0);
    } else {
        let interval = inst.ring_timing.topo_change_interval_us;
        inst.start_timer(ctx, TimerKind::RingTopology, interval, false);
    }
}

// Auto-manager

pub(crate) fn start_monitor(inst: &mut Instance, ctx: &mut Context) {
    inst.mra_missed = 0;
    let interval = inst.ring_timing.test_default_interval_us;
    inst.start_timer(ctx, TimerKind::MraMonitor, interval, true);
}

/// Give up the manager role in favour of `winner`
fn demote(inst: &mut Instance, ctx: &mut Context, winner: ManagerCandidate) {
    info!(instance = inst.id, winner = %winner.mac, prio = winner.priority, "yielding to better manager");
    inst.stop_timer(ctx, TimerKind::RingTest);
    inst.stop_timer(ctx, TimerKind::RingTopology);
    inst.topo_curr = 0;

    let next = match inst.ring_fsm {
        RingFsmState::ChkRc | RingFsmState::PrmUp => RingFsmState::DeIdle,
        RingFsmState::ChkRo => RingFsmState::PtIdle,
        other => other,
    };
    // The secondary forwarding state is left as is. The IEC NAck row names
    // no forwarding action and none is taken here.
    inst.set_oper_role(ctx, OperRole::Client);
    enter(inst, ctx, next);
    inst.set_best_manager(ctx, winner);
    start_monitor(inst, ctx);
}

/// Take over the manager role after Test frames stopped
fn promote(inst: &mut Instance, ctx: &mut Context) {
    info!(instance = inst.id, "no manager heard, taking over");
    inst.stop_timer(ctx, TimerKind::MraMonitor);
    inst.stop_timer(ctx, TimerKind::RingLinkUp);
    inst.stop_timer(ctx, TimerKind::RingLinkDown);
    inst.link_curr = 0;
    inst.best_manager = None;
    inst.set_oper_role(ctx, OperRole::Manager);

    if inst.sf(inst.primary) && inst.sf(inst.secondary()) {
        enter(inst, ctx, RingFsmState::AcStat1);
        return;
    }
    if inst.sf(inst.primary) {
        inst.swap_primary(ctx);
    }
    let (primary, secondary) = (inst.primary, inst.secondary());
    if inst.sf(secondary) {
        inst.set_forwarding(ctx, primary, true);
        enter(inst, ctx, RingFsmState::PrmUp);
    } else {
        inst.set_forwarding(ctx, secondary, false);
        inst.set_forwarding(ctx, primary, true);
        inst.test_curr = 0;
        inst.no_tc = true;
        enter(inst, ctx, RingFsmState::ChkRc);
    }
    test_request(inst, ctx, false);
}

fn on_monitor_timer(inst: &mut Instance, ctx: &mut Context) {
    if inst.oper_role != OperRole::Client {
        inst.stop_timer(ctx, TimerKind::MraMonitor);
        return;
    }
    inst.mra_missed += 1;
    if inst.mra_missed >= inst.ring_timing.test_ext_monitoring_count {
        promote(inst, ctx);
    }
}

/// Track a manager heard while acting as client
fn heard_manager(inst: &mut Instance, ctx: &mut Context, candidate: ManagerCandidate) {
    if inst.best_manager.is_none_or(|best| !best.is_better_than(&candidate)) {
        inst.set_best_manager(ctx, candidate);
        inst.mra_missed = 0;
    }
}

fn on_manager_sub(inst: &mut Instance, ctx: &mut Context, sub: &ManagerSubTlv) {
    if inst.conf.role != RingRole::AutoManager {
        return;
    }
    let winner = ManagerCandidate::new(sub.prio, sub.sa);

    match inst.oper_role {
        OperRole::Manager => {
            if sub.kind == SubTlvKind::TestMgrNAck && sub.other_sa == ctx.node_mac {
                demote(inst, ctx, winner);
                let local = inst.manager_candidate(ctx);
                send_manager_sub(inst, ctx, PduKind::TestPropagate, winner, local);
            }
        }
        OperRole::Client => heard_manager(inst, ctx, winner),
    }
}

// Client

fn client_sf(inst: &mut Instance, ctx: &mut Context, slot: PortSlot, sf: bool) {
    let is_primary = slot == inst.primary;

    match (inst.ring_fsm, sf) {
        (RingFsmState::AcStat1, false) => {
            if !is_primary {
                inst.swap_primary(ctx);
            }
            let primary = inst.primary;
            inst.set_forwarding(ctx, primary, true);
            enter(inst, ctx, RingFsmState::DeIdle);
        }
        (RingFsmState::DeIdle, false) if !is_primary => {
            link_change_request(inst, ctx, PduKind::LinkUp);
            enter(inst, ctx, RingFsmState::Pt);
        }
        (RingFsmState::DeIdle, true) if is_primary => {
            let primary = inst.primary;
            inst.set_forwarding(ctx, primary, false);
            enter(inst, ctx, RingFsmState::AcStat1);
        }
        (RingFsmState::Pt, true) => {
            inst.stop_timer(ctx, TimerKind::RingLinkUp);
            if is_primary {
                inst.swap_primary(ctx);
                let primary = inst.primary;
                inst.set_forwarding(ctx, primary, true);
            }
            let secondary = inst.secondary();
            inst.set_forwarding(ctx, secondary, false);
            link_change_request(inst, ctx, PduKind::LinkDown);
            enter(inst, ctx, RingFsmState::De);
        }
        (RingFsmState::PtIdle, true) => {
            if is_primary {
                inst.swap_primary(ctx);
            }
            let secondary = inst.secondary();
            inst.set_forwarding(ctx, secondary, false);
            link_change_request(inst, ctx, PduKind::LinkDown);
            enter(inst, ctx, RingFsmState::De);
        }
        (RingFsmState::De, false) if !is_primary => {
            link_change_request(inst, ctx, PduKind::LinkUp);
            enter(inst, ctx, RingFsmState::Pt);
        }
        (RingFsmState::De, true) if is_primary => {
            inst.stop_timer(ctx, TimerKind::RingLinkDown);
            let primary = inst.primary;
            inst.set_forwarding(ctx, primary, false);
            enter(inst, ctx, RingFsmState::AcStat1);
        }
        _ => {}
    }
}

fn client_topology_change(inst: &mut Instance, ctx: &mut Context, interval_ms: u16) {
    inst.schedule_flush(ctx, interval_ms);

    match inst.ring_fsm {
        RingFsmState::Pt => {
            inst.stop_timer(ctx, TimerKind::RingLinkUp);
            inst.link_curr = 0;
            let secondary = inst.secondary();
            inst.set_forwarding(ctx, secondary, true);
            enter(inst, ctx, RingFsmState::PtIdle);
        }
        RingFsmState::De => {
            inst.stop_timer(ctx, TimerKind::RingLinkDown);
            inst.link_curr = 0;
            enter(inst, ctx, RingFsmState::DeIdle);
        }
        _ => {}
    }
}

fn on_link_timer(inst: &mut Instance, ctx: &mut Context, kind: PduKind) {
    let (state, timer, interval) = if kind == PduKind::LinkUp {
        (RingFsmState::Pt, TimerKind::RingLinkUp, inst.ring_timing.link_up_interval_us)
    } else {
        (RingFsmState::De, TimerKind::RingLinkDown, inst.ring_timing.link_down_interval_us)
    };
    if inst.ring_fsm != state {
        return;
    }

    if inst.link_curr > 0 {
        send_link_change(inst, ctx, kind);
        inst.start_timer(ctx, timer, interval, false);
    } else if kind == PduKind::LinkUp {
        let secondary = inst.secondary();
        inst.set_forwarding(ctx, secondary, true);
        enter(inst, ctx, RingFsmState::PtIdle);
    } else {
        enter(inst, ctx, RingFsmState::DeIdle);
    }
}

// Entry points

/// Signal fail of a ring slot changed
pub(crate) fn on_sf(inst: &mut Instance, ctx: &mut Context, slot: PortSlot, sf: bool) {
    match inst.oper_role {
        OperRole::Manager => manager_sf(inst, ctx, slot, sf),
        OperRole::Client => client_sf(inst, ctx, slot, sf),
    }
}

/// A ring PDU accepted on a ring port
pub(crate) fn on_pdu(inst: &mut Instance, ctx: &mut Context, pdu: &MrpPdu) {
    let manager = inst.oper_role == OperRole::Manager;

    match &pdu.body {
        PduBody::Test(test) if test.sa == ctx.node_mac => {
            if manager {
                manager_own_test(inst, ctx, test);
            }
        }
        PduBody::Test(test) => {
            if manager {
                manager_foreign_test(inst, ctx, test);
            } else if inst.conf.role == RingRole::AutoManager {
                heard_manager(inst, ctx, ManagerCandidate::new(test.prio, test.sa));
            }
        }
        PduBody::TopologyChange(tc) if !manager => client_topology_change(inst, ctx, tc.interval_ms),
        PduBody::LinkDown(change) if manager => manager_link_change(inst, ctx, PduKind::LinkDown, change),
        PduBody::LinkUp(change) if manager => manager_link_change(inst, ctx, PduKind::LinkUp, change),
        PduBody::Option(opt) => {
            if let Some(sub) = &opt.sub {
                on_manager_sub(inst, ctx, sub);
            }
        }
        _ => {}
    }
}

pub(crate) fn on_timer(inst: &mut Instance, ctx: &mut Context, kind: TimerKind) {
    match kind {
        TimerKind::RingTest => on_test_timer(inst, ctx),
        TimerKind::RingTopology => on_topology_timer(inst, ctx),
        TimerKind::RingLinkUp => on_link_timer(inst, ctx, PduKind::LinkUp),
        TimerKind::RingLinkDown => on_link_timer(inst, ctx, PduKind::LinkDown),
        TimerKind::MraMonitor => on_monitor_timer(inst, ctx),
        TimerKind::MultiManager => {
            debug!(instance = inst.id, "multiple manager window expired");
            inst.set_warnings(ctx, inst.warnings - OperWarnings::MULTIPLE_MRMS);
        }
        TimerKind::TestCopyResume => {
            inst.test_copy_paused = false;
            if let Err(e) = ctx.backend.set_cpu_copy(&inst.view(), FrameClass::Test, CpuCopy::On) {
                inst.internal_error(ctx, "resume Test copy", e);
            }
        }
        _ => {}
    }
}

/// Loss-of-continuity change reported by the hardware
pub(crate) fn on_loc(inst: &mut Instance, ctx: &mut Context, loc: LocState) {
    if inst.oper_role != OperRole::Manager {
        return;
    }
    match (inst.ring_fsm, loc.ring) {
        (RingFsmState::ChkRc, true) => {
            open_ring(inst, ctx);
            if let Err(e) = ctx.backend.set_cpu_copy(&inst.view(), FrameClass::Test, CpuCopy::Next) {
                inst.internal_error(ctx, "copy next Test", e);
            }
        }
        (RingFsmState::ChkRo, false) => {
            if let Err(e) = ctx.backend.set_cpu_copy(&inst.view(), FrameClass::Test, CpuCopy::Next) {
                inst.internal_error(ctx, "copy next Test", e);
            }
        }
        _ => {}
    }
}
