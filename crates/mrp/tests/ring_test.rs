//! Ring state machine scenarios on a fake switch
//!
//! Tests cover:
//! - Manager closing and opening the ring from returning Test frames
//! - Manager reaction to a primary link failure
//! - Client link-up burst and TopologyChange handling
//! - Auto-manager promotion, demotion and negotiation frames
//! - Receive-side accounting of malformed and foreign-domain frames

mod support;

use mrp::pdu::{MrpPdu, PduBody, PduKind, SubTlvKind};
use mrp::template::Field;
use mrp::types::{DomainId, ManagerCandidate, OperRole, PortRole, PortSlot, RingFsmState, RingState};
use mrp::RingRole;
use support::*;

fn manager_sub(pdu: &MrpPdu) -> mrp::pdu::ManagerSubTlv {
    match &pdu.body {
        PduBody::Option(opt) => opt.sub.expect("manager SubTLV"),
        other => panic!("not an option frame: {:?}", other),
    }
}

/// Manager with both ring links up, sitting in CHK_RC
fn closed_manager() -> Harness {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::Manager, 1, 2)).unwrap();
    h.links_up(&[1, 2]);
    h
}

#[test]
fn test_manager_blocks_ring_ports_on_activation() {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::Manager, 1, 2)).unwrap();

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::AcStat1);
    assert_eq!(status.oper_role, Some(OperRole::Manager));
    assert_eq!(h.forwarding(1), Some(false));
    assert_eq!(h.forwarding(2), Some(false));
    assert!(h.sent(1, PduKind::Test).is_empty());
}

#[test]
fn test_manager_primary_up_starts_testing() {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::Manager, 1, 2)).unwrap();
    h.links_up(&[1]);

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::PrmUp);
    assert_eq!(status.ring_state, RingState::Open);
    assert_eq!(h.forwarding(1), Some(true));
    assert_eq!(h.forwarding(2), Some(false));

    let tests = h.sent(1, PduKind::Test);
    assert_eq!(tests.len(), 1);
    match tests[0].body {
        PduBody::Test(t) => {
            assert_eq!(t.sa, NODE_MAC);
            assert_eq!(t.prio, 0x8000);
            assert_eq!(t.port_role, PortRole::Primary);
            assert_eq!(t.timestamp, T0 as u32);
        }
        _ => unreachable!(),
    }

    h.advance(50_000);
    assert_eq!(h.sent(1, PduKind::Test).len(), 2);
}

#[test]
fn test_manager_closed_ring_keeps_secondary_blocked() {
    let mut h = closed_manager();
    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::ChkRc);
    assert_eq!(status.ring_state, RingState::Closed);

    // a Test sent on port 1 travels the ring and comes back on port 2
    let frame = h.last_frame(1, PduKind::Test).unwrap();
    h.advance(10_000);
    h.engine.on_frame(2, &frame);

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::ChkRc);
    assert_eq!(status.transitions, 0);
    assert!(status.round_trip.valid);
    assert_eq!(status.round_trip.last_us, 10_000);
    assert_eq!(h.forwarding(1), Some(true));
    assert_eq!(h.forwarding(2), Some(false));
    assert!(!h.engine.notification_status(1).unwrap().ring_open);

    let stats = h.engine.statistics(1).unwrap();
    assert_eq!(stats.port2.rx.test, 1);
    assert_eq!(stats.port2.rx_own, 0);
}

#[test]
fn test_manager_opens_ring_when_tests_stop() {
    let mut h = closed_manager();
    let frame = h.last_frame(1, PduKind::Test).unwrap();
    h.engine.on_frame(2, &frame);
    h.clear_tx();

    // four missed intervals are tolerated
    h.advance(4 * 50_000);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::ChkRc);

    h.advance(50_000);
    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::ChkRo);
    assert_eq!(status.ring_state, RingState::Open);
    assert_eq!(status.transitions, 1);
    assert_eq!(h.forwarding(2), Some(true));
    assert!(h.engine.notification_status(1).unwrap().ring_open);
    assert_eq!(h.engine.statistics(1).unwrap().ring_open_count, 1);

    let tcs = h.sent(2, PduKind::TopologyChange);
    assert_eq!(tcs.len(), 1);
    match tcs[0].body {
        PduBody::TopologyChange(tc) => assert_eq!(tc.interval_ms, 40),
        _ => unreachable!(),
    }

    // the burst ends with a local flush
    let flushes = h.flush_count();
    h.advance(40_000);
    assert_eq!(h.sent(2, PduKind::TopologyChange).len(), 3);
    assert_eq!(h.flush_count(), flushes + 1);
}

#[test]
fn test_manager_no_topology_change_before_first_close() {
    let mut h = closed_manager();
    h.clear_tx();

    // never saw its own Test since CHK_RC was entered from PRM_UP
    h.advance(5 * 50_000);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::ChkRo);
    assert!(h.sent(1, PduKind::TopologyChange).is_empty());
    assert!(h.sent(2, PduKind::TopologyChange).is_empty());
}

#[test]
fn test_manager_recloses_from_open_ring() {
    let mut h = closed_manager();
    h.advance(5 * 50_000);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::ChkRo);

    let frame = h.last_frame(2, PduKind::Test).unwrap();
    h.engine.on_frame(1, &frame);

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::ChkRc);
    assert_eq!(h.forwarding(2), Some(false));
    assert!(!h.sent(1, PduKind::TopologyChange).is_empty());
}

#[test]
fn test_manager_primary_link_down_in_closed_ring() {
    let mut h = closed_manager();
    h.clear_tx();
    h.engine.on_link_change(1, false);

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::PrmUp);
    assert_eq!(status.transitions, 1);
    let p2 = status.ports.iter().find(|p| p.slot == PortSlot::Port2).unwrap();
    assert_eq!(p2.role, PortRole::Primary);
    assert!(p2.forwarding);
    assert_eq!(h.forwarding(2), Some(true));
    assert_eq!(h.forwarding(1), Some(false));

    h.advance(40_000);
    let intervals: Vec<u16> = h
        .sent(2, PduKind::TopologyChange)
        .iter()
        .map(|pdu| match pdu.body {
            PduBody::TopologyChange(tc) => tc.interval_ms,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(intervals, vec![40, 20, 0]);
    assert_eq!(h.engine.statistics(1).unwrap().fdb_flushes, 1);
}

#[test]
fn test_manager_link_down_frame_opens_ring() {
    let mut h = closed_manager();
    let frame = remote_frame(PduKind::LinkDown, REMOTE_MAC, 0, 0);
    h.engine.on_frame(1, frame.as_bytes());

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.ring_fsm, RingFsmState::ChkRo);
    assert_eq!(h.forwarding(2), Some(true));
}

#[test]
fn test_client_link_up_burst() {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::Client, 1, 2)).unwrap();
    h.links_up(&[1]);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::DeIdle);
    assert_eq!(h.forwarding(1), Some(true));

    h.links_up(&[2]);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::Pt);
    assert_eq!(h.forwarding(2), Some(false));

    let ups = h.sent(1, PduKind::LinkUp);
    assert_eq!(ups.len(), 1);
    match ups[0].body {
        PduBody::LinkUp(lc) => {
            assert_eq!(lc.interval_ms, 60);
            assert!(lc.blocked);
        }
        _ => unreachable!(),
    }
    assert!(h.sent(2, PduKind::LinkUp).is_empty());

    h.advance(60_000);
    assert_eq!(h.sent(1, PduKind::LinkUp).len(), 4);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::Pt);

    // no TopologyChange arrived: forward once the burst is over
    h.advance(20_000);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::PtIdle);
    assert_eq!(h.forwarding(2), Some(true));
}

#[test]
fn test_client_topology_change_ends_burst_and_flushes() {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::Client, 1, 2)).unwrap();
    h.links_up(&[1, 2]);

    let mut tc = remote_frame(PduKind::TopologyChange, REMOTE_MAC, 0x8000, 0);
    tc.patch_u16(Field::Interval, 30).unwrap();
    h.engine.on_frame(1, tc.as_bytes());

    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::PtIdle);
    assert_eq!(h.forwarding(2), Some(true));
    assert_eq!(h.flush_count(), 0);

    h.advance(30_000);
    assert_eq!(h.flush_count(), 1);
    assert_eq!(h.switch.lock().unwrap().flushes[0], vec![1, 2]);
}

#[test]
fn test_client_secondary_down_sends_link_down() {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::Client, 1, 2)).unwrap();
    h.links_up(&[1, 2]);
    h.advance(80_000);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::PtIdle);

    h.engine.on_link_change(2, false);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::De);
    assert_eq!(h.forwarding(2), Some(false));
    assert_eq!(h.sent(1, PduKind::LinkDown).len(), 1);

    h.advance(80_000);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::DeIdle);
    assert_eq!(h.sent(1, PduKind::LinkDown).len(), 4);
}

/// Auto-manager that promoted itself and closed the ring
fn promoted_auto_manager() -> Harness {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::AutoManager, 1, 2)).unwrap();
    h.links_up(&[1, 2]);
    h.advance(15 * 50_000);
    h
}

#[test]
fn test_auto_manager_starts_as_client_and_promotes() {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::AutoManager, 1, 2)).unwrap();
    h.links_up(&[1, 2]);
    assert_eq!(h.engine.status(1).unwrap().oper_role, Some(OperRole::Client));

    h.advance(14 * 50_000);
    assert_eq!(h.engine.status(1).unwrap().oper_role, Some(OperRole::Client));

    h.advance(50_000);
    let status = h.engine.status(1).unwrap();
    assert_eq!(status.oper_role, Some(OperRole::Manager));
    assert_eq!(status.ring_fsm, RingFsmState::ChkRc);
    assert_eq!(h.forwarding(1), Some(true));
    assert_eq!(h.forwarding(2), Some(false));
    assert!(!h.sent(1, PduKind::Test).is_empty());
}

#[test]
fn test_auto_manager_stays_client_while_manager_heard() {
    let mut h = Harness::new();
    h.engine.conf_set(1, ring_conf(RingRole::AutoManager, 1, 2)).unwrap();
    h.links_up(&[1, 2]);

    h.advance(14 * 50_000);
    let test = remote_frame(PduKind::Test, REMOTE_MAC, 0x9000, 0);
    h.engine.on_frame(1, test.as_bytes());

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.best_manager, Some(ManagerCandidate::new(0x9000, REMOTE_MAC)));

    h.advance(14 * 50_000);
    assert_eq!(h.engine.status(1).unwrap().oper_role, Some(OperRole::Client));
    h.advance(50_000);
    assert_eq!(h.engine.status(1).unwrap().oper_role, Some(OperRole::Manager));
}

#[test]
fn test_auto_manager_yields_to_better_manager() {
    let mut h = promoted_auto_manager();
    h.clear_tx();

    let test = remote_frame(PduKind::Test, REMOTE_MAC, 0x9000, 0);
    h.engine.on_frame(1, test.as_bytes());

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.oper_role, Some(OperRole::Client));
    assert_eq!(status.ring_fsm, RingFsmState::DeIdle);
    assert_eq!(status.best_manager, Some(ManagerCandidate::new(0x9000, REMOTE_MAC)));

    let nacks = h.sent(1, PduKind::TestMgrNAck);
    assert_eq!(nacks.len(), 1);
    let sub = manager_sub(&nacks[0]);
    assert_eq!(sub.kind, SubTlvKind::TestMgrNAck);
    assert_eq!((sub.prio, sub.sa), (0x9000, REMOTE_MAC));
    assert_eq!((sub.other_prio, sub.other_sa), (0xA000, NODE_MAC));

    // no more Test frames from this node
    h.clear_tx();
    h.advance(200_000);
    assert!(h.sent(1, PduKind::Test).is_empty());
}

#[test]
fn test_auto_manager_rejects_worse_manager() {
    let mut h = promoted_auto_manager();
    h.clear_tx();

    let test = remote_frame(PduKind::Test, REMOTE_MAC, 0xB000, 0);
    h.engine.on_frame(1, test.as_bytes());

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.oper_role, Some(OperRole::Manager));
    let sub = manager_sub(&h.sent(1, PduKind::TestMgrNAck)[0]);
    assert_eq!((sub.prio, sub.sa), (0xA000, NODE_MAC));
    assert_eq!((sub.other_prio, sub.other_sa), (0xB000, REMOTE_MAC));
    assert!(h.engine.notification_status(1).unwrap().multiple_mrms);

    h.advance(10_000_000);
    assert!(!h.engine.notification_status(1).unwrap().multiple_mrms);
}

#[test]
fn test_auto_manager_demoted_by_nack() {
    let mut h = promoted_auto_manager();
    h.clear_tx();

    let nack = manager_sub_frame(
        PduKind::TestMgrNAck,
        REMOTE_MAC,
        (0x9000, REMOTE_MAC),
        (0xA000, NODE_MAC),
    );
    h.engine.on_frame(2, &nack);

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.oper_role, Some(OperRole::Client));
    let props = h.sent(1, PduKind::TestPropagate);
    assert_eq!(props.len(), 1);
    let sub = manager_sub(&props[0]);
    assert_eq!(sub.kind, SubTlvKind::TestPropagate);
    assert_eq!((sub.prio, sub.sa), (0x9000, REMOTE_MAC));
    assert_eq!(sub.other_sa, NODE_MAC);
}

#[test]
fn test_nack_for_another_node_is_ignored() {
    let mut h = promoted_auto_manager();
    let other = mrp::MacAddr([0x02, 0, 0, 0, 0, 0x30]);
    let nack = manager_sub_frame(
        PduKind::TestMgrNAck,
        REMOTE_MAC,
        (0x9000, REMOTE_MAC),
        (0xA000, other),
    );
    h.engine.on_frame(2, &nack);
    assert_eq!(h.engine.status(1).unwrap().oper_role, Some(OperRole::Manager));
}

#[test]
fn test_fixed_manager_ignores_negotiation() {
    let mut h = closed_manager();
    let test = remote_frame(PduKind::Test, REMOTE_MAC, 0x1000, 0);
    h.engine.on_frame(1, test.as_bytes());

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.oper_role, Some(OperRole::Manager));
    assert!(h.sent(1, PduKind::TestMgrNAck).is_empty());
    assert!(h.engine.notification_status(1).unwrap().multiple_mrms);
}

#[test]
fn test_malformed_frame_counted_once() {
    let mut h = closed_manager();
    let before = h.engine.statistics(1).unwrap();

    let mut frame = remote_frame(PduKind::Test, REMOTE_MAC, 0x9000, 0).as_bytes().to_vec();
    frame.truncate(20);
    h.engine.on_frame(1, &frame);

    let after = h.engine.statistics(1).unwrap();
    assert_eq!(after.port1.rx_errors, before.port1.rx_errors + 1);
    assert_eq!(after.port1.rx, before.port1.rx);
    assert_eq!(after.port2, before.port2);
    assert_eq!(h.engine.status(1).unwrap().ring_fsm, RingFsmState::ChkRc);
}

#[test]
fn test_foreign_domain_is_counted_and_dropped() {
    let mut h = Harness::new();
    let mut conf = ring_conf(RingRole::Manager, 1, 2);
    conf.domain_id = DomainId([0x11; 16]);
    h.engine.conf_set(1, conf).unwrap();
    h.links_up(&[1, 2]);

    let test = remote_frame(PduKind::Test, REMOTE_MAC, 0x1000, 0);
    h.engine.on_frame(1, test.as_bytes());

    let stats = h.engine.statistics(1).unwrap();
    assert_eq!(stats.port1.rx_unknown_domain, 1);
    assert_eq!(stats.port1.rx.test, 0);
    assert!(!h.engine.notification_status(1).unwrap().multiple_mrms);
}

#[test]
fn test_frame_on_unconfigured_port_is_ignored() {
    let mut h = closed_manager();
    let before = h.engine.statistics(1).unwrap();
    h.engine.on_frame(4, &[0u8; 10]);
    assert_eq!(h.engine.statistics(1).unwrap(), before);
}

#[test]
fn test_repeated_events_do_not_touch_forwarding() {
    let mut h = closed_manager();
    let conf = h.engine.conf_get(1).unwrap();
    let log = h.forwarding_log_len();
    let status = h.engine.status(1).unwrap();

    h.engine.on_health_change();
    h.engine.on_bridge_change();
    h.engine.on_link_change(1, true);
    h.engine.conf_set(1, conf).unwrap();

    assert_eq!(h.forwarding_log_len(), log);
    assert_eq!(h.engine.status(1).unwrap(), status);
}
