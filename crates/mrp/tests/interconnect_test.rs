//! Interconnection scenarios on a fake switch
//!
//! Tests cover:
//! - Ring-check manager closing and opening on its own InTest frames
//! - Link-check manager polling and reacting to InLinkUp/InLinkDown
//! - Client link bursts, poll replies and InTopologyChange handling
//! - Software relay of interconnection control frames

mod support;

use mrp::pdu::{PduBody, PduKind};
use mrp::template::Field;
use mrp::types::{InFsmState, InMode, PortConf, RingState};
use mrp::{InRole, InstanceConf, RingRole};
use support::*;

const IN_ID: u16 = 7;

fn in_conf(role: RingRole, in_role: InRole, in_mode: InMode) -> InstanceConf {
    InstanceConf {
        in_role,
        in_mode,
        in_port: PortConf::link(3),
        in_id: IN_ID,
        ..ring_conf(role, 1, 2)
    }
}

fn harness(role: RingRole, in_role: InRole, in_mode: InMode) -> Harness {
    let mut h = Harness::new();
    h.engine.conf_set(1, in_conf(role, in_role, in_mode)).unwrap();
    h.links_up(&[1, 2, 3]);
    h
}

fn in_link_interval(pdu: &mrp::pdu::MrpPdu) -> u16 {
    match pdu.body {
        PduBody::InLinkUp(lc) | PduBody::InLinkDown(lc) => lc.interval_ms,
        _ => panic!("not an interconnection link change: {:?}", pdu.body),
    }
}

#[test]
fn test_ring_check_manager_sends_in_test_everywhere() {
    let h = harness(RingRole::Manager, InRole::Manager, InMode::RingCheck);

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.in_fsm, Some(InFsmState::ChkIc));
    assert_eq!(status.in_state, RingState::Closed);
    assert_eq!(h.forwarding(3), Some(false));

    for port in [1, 2, 3] {
        let tests = h.sent(port, PduKind::InTest);
        assert_eq!(tests.len(), 1, "port {}", port);
        assert_eq!(tests[0].in_id(), Some(IN_ID));
    }
}

#[test]
fn test_ring_check_manager_opens_when_in_test_stops() {
    let mut h = harness(RingRole::Manager, InRole::Manager, InMode::RingCheck);

    // the InTest sent on the interconnection comes back through the other ring
    let frame = h.last_frame(3, PduKind::InTest).unwrap();
    h.engine.on_frame(1, &frame);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIc));

    h.advance(7 * 50_000);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIc));
    h.clear_tx();

    h.advance(50_000);
    let status = h.engine.status(1).unwrap();
    assert_eq!(status.in_fsm, Some(InFsmState::ChkIo));
    assert_eq!(status.in_state, RingState::Open);
    assert_eq!(status.in_transitions, 1);
    assert_eq!(h.forwarding(3), Some(true));
    assert_eq!(h.engine.statistics(1).unwrap().in_open_count, 1);
    assert!(h.engine.notification_status(1).unwrap().in_open);
    assert_eq!(h.sent(3, PduKind::InTopologyChange).len(), 1);

    // and closes again once its InTest returns
    let frame = h.last_frame(3, PduKind::InTest).unwrap();
    h.engine.on_frame(2, &frame);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIc));
    assert_eq!(h.forwarding(3), Some(false));
}

#[test]
fn test_foreign_in_test_flags_multiple_managers() {
    let mut h = harness(RingRole::Manager, InRole::Manager, InMode::RingCheck);
    let frame = remote_frame(PduKind::InTest, REMOTE_MAC, 0, IN_ID);
    h.engine.on_frame(3, frame.as_bytes());
    assert!(h.engine.notification_status(1).unwrap().multiple_mims);

    h.advance(10_000_000);
    assert!(!h.engine.notification_status(1).unwrap().multiple_mims);
}

#[test]
fn test_in_test_of_other_interconnection_is_ignored() {
    let mut h = harness(RingRole::Manager, InRole::Manager, InMode::RingCheck);
    let frame = remote_frame(PduKind::InTest, REMOTE_MAC, 0, IN_ID + 1);
    h.engine.on_frame(3, frame.as_bytes());
    assert!(!h.engine.notification_status(1).unwrap().multiple_mims);
}

#[test]
fn test_link_check_manager_opens_without_answer() {
    let mut h = harness(RingRole::Manager, InRole::Manager, InMode::LinkCheck);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIc));
    assert_eq!(h.sent(3, PduKind::InLinkStatusPoll).len(), 1);
    assert!(h.sent(3, PduKind::InTest).is_empty());

    h.advance(7 * 20_000);
    assert_eq!(h.sent(3, PduKind::InLinkStatusPoll).len(), 8);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIc));

    h.advance(20_000);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIo));
    assert_eq!(h.forwarding(3), Some(true));
}

#[test]
fn test_link_check_manager_follows_client_reports() {
    let mut h = harness(RingRole::Manager, InRole::Manager, InMode::LinkCheck);

    let up = remote_frame(PduKind::InLinkUp, REMOTE_MAC, 0, IN_ID);
    h.engine.on_frame(1, up.as_bytes());
    h.advance(400_000);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIc));
    assert_eq!(h.sent(3, PduKind::InLinkStatusPoll).len(), 1);

    let down = remote_frame(PduKind::InLinkDown, REMOTE_MAC, 0, IN_ID);
    h.engine.on_frame(1, down.as_bytes());
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIo));
    assert_eq!(h.forwarding(3), Some(true));

    h.engine.on_frame(2, up.as_bytes());
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::ChkIc));
    assert_eq!(h.forwarding(3), Some(false));
    assert_eq!(h.engine.status(1).unwrap().in_transitions, 1);
}

#[test]
fn test_manager_in_link_down_goes_to_ac_stat1() {
    let mut h = harness(RingRole::Manager, InRole::Manager, InMode::RingCheck);
    h.engine.on_link_change(3, false);

    let status = h.engine.status(1).unwrap();
    assert_eq!(status.in_fsm, Some(InFsmState::AcStat1));
    assert_eq!(h.forwarding(3), Some(false));

    h.clear_tx();
    h.advance(200_000);
    assert!(h.sent(1, PduKind::InTest).is_empty());
}

#[test]
fn test_client_link_up_burst() {
    let mut h = harness(RingRole::Client, InRole::Client, InMode::LinkCheck);
    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::Pt));
    assert_eq!(h.forwarding(3), Some(false));

    let ups = h.sent(3, PduKind::InLinkUp);
    assert_eq!(ups.len(), 1);
    assert_eq!(in_link_interval(&ups[0]), 60);
    assert_eq!(h.sent(1, PduKind::InLinkUp).len(), 1);

    h.advance(80_000);
    assert_eq!(h.sent(3, PduKind::InLinkUp).len(), 4);
    let status = h.engine.status(1).unwrap();
    assert_eq!(status.in_fsm, Some(InFsmState::IpIdle));
    assert_eq!(status.in_state, RingState::Closed);
    assert_eq!(h.forwarding(3), Some(true));
}

#[test]
fn test_client_topology_change_forwards_and_flushes() {
    let mut h = harness(RingRole::Client, InRole::Client, InMode::LinkCheck);

    let mut tc = remote_frame(PduKind::InTopologyChange, REMOTE_MAC, 0, IN_ID);
    tc.patch_u16(Field::Interval, 20).unwrap();
    h.engine.on_frame(1, tc.as_bytes());

    assert_eq!(h.engine.status(1).unwrap().in_fsm, Some(InFsmState::IpIdle));
    assert_eq!(h.forwarding(3), Some(true));

    let flushes = h.flush_count();
    h.advance(20_000);
    assert_eq!(h.flush_count(), flushes + 1);
    assert_eq!(h.switch.lock().unwrap().flushes.last().unwrap(), &vec![1, 2, 3]);
}

#[test]
fn test_client_answers_poll() {
    let mut h = harness(RingRole::Client, InRole::Client, InMode::LinkCheck);
    h.clear_tx();

    let poll = remote_frame(PduKind::InLinkStatusPoll, REMOTE_MAC, 0, IN_ID);
    h.engine.on_frame(1, poll.as_bytes());

    let replies = h.sent(1, PduKind::InLinkUp);
    assert_eq!(replies.len(), 1);
    assert_eq!(in_link_interval(&replies[0]), 0);
    assert!(h.sent(1, PduKind::InLinkDown).is_empty());
}

#[test]
fn test_client_in_link_down() {
    let mut h = harness(RingRole::Client, InRole::Client, InMode::LinkCheck);
    h.advance(80_000);
    h.clear_tx();

    h.engine.on_link_change(3, false);
    let status = h.engine.status(1).unwrap();
    assert_eq!(status.in_fsm, Some(InFsmState::AcStat1));
    assert_eq!(h.forwarding(3), Some(false));

    // the interconnection port itself is down
    assert_eq!(h.sent(1, PduKind::InLinkDown).len(), 1);
    assert!(h.sent(3, PduKind::InLinkDown).is_empty());

    h.advance(60_000);
    assert_eq!(h.sent(1, PduKind::InLinkDown).len(), 4);
}

#[test]
fn test_client_relays_own_control_frames_to_ring() {
    let mut h = harness(RingRole::Client, InRole::Client, InMode::LinkCheck);
    h.clear_tx();

    let up = remote_frame(PduKind::InLinkUp, REMOTE_MAC, 0, IN_ID);
    h.engine.on_frame(3, up.as_bytes());

    let tx = h.switch.lock().unwrap().tx.clone();
    let relayed: Vec<_> = tx.iter().filter(|(_, f)| f.as_slice() == up.as_bytes()).map(|(p, _)| *p).collect();
    assert_eq!(relayed, vec![1, 2]);

    let stats = h.engine.statistics(1).unwrap();
    assert_eq!(stats.port1.forwarded, 1);
    assert_eq!(stats.port2.forwarded, 1);
    assert_eq!(stats.in_port.rx.in_link_up, 1);
}

#[test]
fn test_manager_terminates_own_control_frames() {
    let mut h = harness(RingRole::Manager, InRole::Manager, InMode::LinkCheck);
    h.clear_tx();

    let up = remote_frame(PduKind::InLinkUp, REMOTE_MAC, 0, IN_ID);
    h.engine.on_frame(1, up.as_bytes());
    let relayed = h
        .switch
        .lock()
        .unwrap()
        .tx
        .iter()
        .any(|(_, f)| f.as_slice() == up.as_bytes());
    assert!(!relayed);
}

#[test]
fn test_hardware_mrp_does_not_relay() {
    let mut h = Harness::with_caps(mrp::Capabilities {
        hw_mrp: true,
        ..Default::default()
    });
    h.engine
        .conf_set(1, in_conf(RingRole::Client, InRole::Client, InMode::LinkCheck))
        .unwrap();
    h.links_up(&[1, 2, 3]);
    h.clear_tx();

    let up = remote_frame(PduKind::InLinkUp, REMOTE_MAC, 0, IN_ID);
    h.engine.on_frame(3, up.as_bytes());
    assert_eq!(h.engine.statistics(1).unwrap().port1.forwarded, 0);
}
