//! Forwarding and blocking control.
//!
//! The ring FSMs decide which ports forward; a [`ForwardingBackend`] turns
//! that decision into switch state. Two strategies exist:
//!
//! - [`HardwareBackend`]: the switch has an MRP object that blocks ring
//!   traffic, monitors loss of continuity and steers MRP frames by itself.
//! - [`AclBackend`]: MRP frames are steered by access-control rules, one per
//!   DMAC class and ingress side, recomputed on every change.
//!
//! Both also toggle the physical port forwarding state.

use crate::error::{HalError, HalResult};
use crate::hal::{
    AceId, AclHal, AclRule, HwRingConf, LocConfig, MrpHwId, PortControl, RingBlockHal,
};
use crate::pdu::FrameClass;
use crate::types::{
    InRole, InTiming, InstanceId, ManagerCandidate, OperRole, PortNo, PortSlot, RingRole,
    RingTiming,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Snapshot of what a backend needs to know about an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceView {
    pub id: InstanceId,
    pub role: RingRole,
    pub oper_role: OperRole,
    pub in_role: InRole,
    /// Physical port per slot
    pub ports: [Option<PortNo>; 3],
    /// Forwarding flag per slot
    pub forwarding: [bool; 3],
    /// Ring slot currently designated primary
    pub primary: PortSlot,
    pub vlan: u16,
    pub in_vlan: u16,
    pub in_id: u16,
    pub ring_timing: RingTiming,
    pub in_timing: InTiming,
}

impl InstanceView {
    pub fn port(&self, slot: PortSlot) -> Option<PortNo> {
        self.ports[slot.index()]
    }

    pub fn is_forwarding(&self, slot: PortSlot) -> bool {
        self.forwarding[slot.index()]
    }

    pub fn ring_ports(&self) -> Vec<PortNo> {
        PortSlot::RING.iter().filter_map(|s| self.port(*s)).collect()
    }

    pub fn in_port(&self) -> Option<PortNo> {
        if self.in_role == InRole::None {
            None
        } else {
            self.port(PortSlot::In)
        }
    }

    fn ring_forwarding(&self) -> bool {
        self.is_forwarding(PortSlot::Port1) && self.is_forwarding(PortSlot::Port2)
    }
}

/// CPU copy mode of a frame class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuCopy {
    Off,
    On,
    /// Copy one more frame, then stop
    Next,
}

/// Loss-of-continuity state reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocState {
    pub ring: bool,
    pub in_ring: bool,
}

/// Record the first failure of a best-effort sequence and keep going
fn keep_first(first: &mut Option<HalError>, res: HalResult<()>) {
    if let Err(e) = res {
        warn!(error = %e, "forwarding teardown step failed");
        first.get_or_insert(e);
    }
}

fn into_result(first: Option<HalError>) -> HalResult<()> {
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Strategy that applies forwarding decisions to the switch
pub trait ForwardingBackend: Send {
    fn name(&self) -> &'static str;

    /// Allocate resources and apply the current state
    fn activate(&mut self, view: &InstanceView) -> HalResult<()>;

    /// Release resources and leave the ports forwarding
    fn deactivate(&mut self, view: &InstanceView) -> HalResult<()>;

    /// Apply the forwarding flag of one slot
    fn set_port_forwarding(&mut self, view: &InstanceView, slot: PortSlot) -> HalResult<()>;

    /// Operational role or primary designation changed
    fn update_role(&mut self, view: &InstanceView) -> HalResult<()>;

    fn update_timing(&mut self, _view: &InstanceView) -> HalResult<()> {
        Ok(())
    }

    fn set_best_manager(&mut self, _view: &InstanceView, _best: &ManagerCandidate) -> HalResult<()> {
        Ok(())
    }

    fn set_cpu_copy(&mut self, _view: &InstanceView, _class: FrameClass, _mode: CpuCopy) -> HalResult<()> {
        Ok(())
    }

    fn loc_state(&self, _view: &InstanceView) -> HalResult<LocState> {
        Ok(LocState::default())
    }
}

/// Hardware MRP strategy
pub struct HardwareBackend<H: RingBlockHal, P: PortControl> {
    hal: H,
    ports: P,
    objects: BTreeMap<InstanceId, MrpHwId>,
}

impl<H: RingBlockHal, P: PortControl> HardwareBackend<H, P> {
    pub fn new(hal: H, ports: P) -> Self {
        Self {
            hal,
            ports,
            objects: BTreeMap::new(),
        }
    }

    fn object(&self, view: &InstanceView) -> HalResult<MrpHwId> {
        self.objects
            .get(&view.id)
            .copied()
            .ok_or_else(|| HalError::NotFound(format!("MRP object of instance {}", view.id)))
    }

    fn loc_config(view: &InstanceView) -> LocConfig {
        LocConfig {
            test_interval_us: view.ring_timing.test_default_interval_us,
            test_monitoring_count: view.ring_timing.test_monitoring_count,
            in_test_interval_us: view.in_timing.test_default_interval_us,
            in_test_monitoring_count: view.in_timing.test_monitoring_count,
        }
    }

    fn apply_role(&mut self, id: MrpHwId, view: &InstanceView) -> HalResult<()> {
        self.hal.set_ring_role(id, view.oper_role)?;
        self.hal.set_in_role(id, view.in_role)?;
        if let Some(port) = view.port(view.primary) {
            self.hal.set_primary_port(id, port)?;
        }

        let manager = view.oper_role == OperRole::Manager;
        let mra = view.role == RingRole::AutoManager;
        self.hal.set_cpu_copy(id, FrameClass::Test, manager || mra)?;
        self.hal.set_cpu_copy(id, FrameClass::Control, true)?;
        self.hal
            .set_cpu_copy(id, FrameClass::InTest, view.in_role == InRole::Manager)?;
        self.hal.set_cpu_copy(id, FrameClass::InControl, true)?;
        Ok(())
    }
}

impl<H: RingBlockHal, P: PortControl> ForwardingBackend for HardwareBackend<H, P> {
    fn name(&self) -> &'static str {
        "hardware"
    }

    fn activate(&mut self, view: &InstanceView) -> HalResult<()> {
        let (Some(port1), Some(port2)) = (view.port(PortSlot::Port1), view.port(PortSlot::Port2))
        else {
            return Err(HalError::failed("ring ports not configured"));
        };

        let id = self.hal.mrp_add(&HwRingConf {
            port1,
            port2,
            in_port: view.in_port(),
            vlan: view.vlan,
            in_vlan: view.in_vlan,
            in_id: view.in_id,
        })?;
        self.objects.insert(view.id, id);
        debug!(instance = view.id, object = id, "hardware MRP object added");

        self.apply_role(id, view)?;
        self.hal.set_loc_config(id, &Self::loc_config(view))?;
        for slot in PortSlot::ALL {
            if slot == PortSlot::In && view.in_port().is_none() {
                continue;
            }
            self.set_port_forwarding(view, slot)?;
        }
        Ok(())
    }

    fn deactivate(&mut self, view: &InstanceView) -> HalResult<()> {
        let mut first = None;
        if let Some(id) = self.objects.remove(&view.id) {
            keep_first(&mut first, self.hal.mrp_del(id));
        }
        for port in view.ring_ports().into_iter().chain(view.in_port()) {
            keep_first(&mut first, self.ports.set_forwarding(port, true));
        }
        into_result(first)
    }

    fn set_port_forwarding(&mut self, view: &InstanceView, slot: PortSlot) -> HalResult<()> {
        let Some(port) = view.port(slot) else {
            return Ok(());
        };
        let forwarding = view.is_forwarding(slot);
        self.ports.set_forwarding(port, forwarding)?;

        match self.objects.get(&view.id) {
            Some(id) => self.hal.set_port_state(*id, port, forwarding),
            None => {
                debug!(instance = view.id, port, "no MRP object, port state only");
                Ok(())
            }
        }
    }

    fn update_role(&mut self, view: &InstanceView) -> HalResult<()> {
        let id = self.object(view)?;
        self.apply_role(id, view)
    }

    fn update_timing(&mut self, view: &InstanceView) -> HalResult<()> {
        let id = self.object(view)?;
        self.hal.set_loc_config(id, &Self::loc_config(view))
    }

    fn set_best_manager(&mut self, view: &InstanceView, best: &ManagerCandidate) -> HalResult<()> {
        let id = self.object(view)?;
        self.hal.set_best_manager(id, best)
    }

    fn set_cpu_copy(&mut self, view: &InstanceView, class: FrameClass, mode: CpuCopy) -> HalResult<()> {
        let id = self.object(view)?;
        match mode {
            CpuCopy::Next => self.hal.copy_next_to_cpu(id, class),
            CpuCopy::On => self.hal.set_cpu_copy(id, class, true),
            CpuCopy::Off => self.hal.set_cpu_copy(id, class, false),
        }
    }

    fn loc_state(&self, view: &InstanceView) -> HalResult<LocState> {
        let id = self.object(view)?;
        let mut state = LocState::default();
        for port in view.ring_ports() {
            state.ring |= self.hal.port_status(id, port)?.loc;
        }
        if let Some(port) = view.in_port() {
            state.in_ring = self.hal.port_status(id, port)?.in_loc;
        }
        Ok(state)
    }
}

/// Rule of one class and ingress side as (egress, cpu copy)
type RuleDecision = (Vec<PortNo>, bool);

/// Compute the rule of `class` for frames entering on the ring ports
/// (`from_in == false`) or on the interconnection port.
pub fn acl_decision(view: &InstanceView, class: FrameClass, from_in: bool) -> RuleDecision {
    let manager = view.oper_role == OperRole::Manager;
    let ring_fwd = view.ring_forwarding();
    let ring = view.ring_ports();
    let both_or_none = |copy: bool| {
        if ring_fwd {
            (ring.clone(), copy)
        } else {
            (Vec::new(), copy)
        }
    };

    match (class, from_in) {
        (FrameClass::Test, false) => {
            if manager {
                (Vec::new(), true)
            } else {
                both_or_none(view.role == RingRole::AutoManager)
            }
        }
        (FrameClass::Control, false) => {
            if manager {
                (Vec::new(), true)
            } else {
                both_or_none(true)
            }
        }
        (FrameClass::Test, true) | (FrameClass::Control, true) => (Vec::new(), false),
        (FrameClass::InTest, false) => match view.in_role {
            InRole::Manager => (Vec::new(), true),
            InRole::Client => (view.in_port().into_iter().collect(), false),
            InRole::None => both_or_none(false),
        },
        (FrameClass::InTest, true) => match view.in_role {
            InRole::Manager => (Vec::new(), true),
            InRole::Client => (ring.clone(), false),
            InRole::None => (Vec::new(), false),
        },
        (FrameClass::InControl, _) => {
            if view.in_role != InRole::None {
                (Vec::new(), true)
            } else if from_in {
                (Vec::new(), false)
            } else {
                both_or_none(true)
            }
        }
    }
}

#[derive(Debug, Default)]
struct RuleSet {
    ring: [Option<(AceId, AclRule)>; 4],
    in_port: [Option<(AceId, AclRule)>; 4],
}

/// Access-control strategy
pub struct AclBackend<A: AclHal, P: PortControl> {
    acl: A,
    ports: P,
    rules: BTreeMap<InstanceId, RuleSet>,
    port_state: BTreeMap<PortNo, bool>,
}

impl<A: AclHal, P: PortControl> AclBackend<A, P> {
    pub fn new(acl: A, ports: P) -> Self {
        Self {
            acl,
            ports,
            rules: BTreeMap::new(),
            port_state: BTreeMap::new(),
        }
    }

    /// Cached rules of an instance, for inspection
    pub fn rules(&self, id: InstanceId) -> Vec<AclRule> {
        self.rules
            .get(&id)
            .map(|set| {
                set.ring
                    .iter()
                    .chain(set.in_port.iter())
                    .flatten()
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn vid(vlan: u16) -> Option<u16> {
        if vlan == 0 { None } else { Some(vlan) }
    }

    fn desired(view: &InstanceView, class: FrameClass, from_in: bool) -> Option<AclRule> {
        if from_in {
            let port = view.in_port()?;
            Some(Self::rule(view, class, true, vec![port], Self::vid(view.in_vlan)))
        } else {
            Some(Self::rule(view, class, false, view.ring_ports(), Self::vid(view.vlan)))
        }
    }

    fn rule(
        view: &InstanceView,
        class: FrameClass,
        from_in: bool,
        ingress: Vec<PortNo>,
        vid: Option<u16>,
    ) -> AclRule {
        let (egress, cpu_copy) = acl_decision(view, class, from_in);
        AclRule {
            dmac: class.dmac(),
            vid,
            ingress,
            egress,
            cpu_copy,
        }
    }

    /// Bring the HAL rules in line with `view`, touching only changed rules
    fn sync_rules(&mut self, view: &InstanceView) -> HalResult<()> {
        let set = self.rules.entry(view.id).or_default();

        for class in FrameClass::ALL {
            for from_in in [false, true] {
                let cached = if from_in {
                    &mut set.in_port[class.index()]
                } else {
                    &mut set.ring[class.index()]
                };
                let wanted = Self::desired(view, class, from_in);

                match (cached.as_ref(), wanted) {
                    (Some((_, have)), Some(want)) if *have == want => {}
                    (Some((id, _)), Some(want)) => {
                        let id = self.acl.set(Some(*id), &want)?;
                        *cached = Some((id, want));
                    }
                    (None, Some(want)) => {
                        let id = self.acl.set(None, &want)?;
                        debug!(instance = view.id, ace = id, class = ?class, "ACL rule added");
                        *cached = Some((id, want));
                    }
                    (Some((id, _)), None) => {
                        self.acl.del(*id)?;
                        *cached = None;
                    }
                    (None, None) => {}
                }
            }
        }
        Ok(())
    }

    fn apply_port(&mut self, port: PortNo, forwarding: bool) -> HalResult<()> {
        if self.port_state.get(&port) == Some(&forwarding) {
            return Ok(());
        }
        self.ports.set_forwarding(port, forwarding)?;
        self.port_state.insert(port, forwarding);
        Ok(())
    }
}

impl<A: AclHal, P: PortControl> ForwardingBackend for AclBackend<A, P> {
    fn name(&self) -> &'static str {
        "acl"
    }

    fn activate(&mut self, view: &InstanceView) -> HalResult<()> {
        self.sync_rules(view)?;
        for slot in PortSlot::ALL {
            if let Some(port) = view.port(slot)
                && (slot != PortSlot::In || view.in_port().is_some())
            {
                self.apply_port(port, view.is_forwarding(slot))?;
            }
        }
        Ok(())
    }

    fn deactivate(&mut self, view: &InstanceView) -> HalResult<()> {
        let mut first = None;
        if let Some(set) = self.rules.remove(&view.id) {
            for (id, _) in set.ring.into_iter().chain(set.in_port).flatten() {
                keep_first(&mut first, self.acl.del(id));
            }
        }
        for port in view.ring_ports().into_iter().chain(view.in_port()) {
            keep_first(&mut first, self.apply_port(port, true));
            self.port_state.remove(&port);
        }
        into_result(first)
    }

    fn set_port_forwarding(&mut self, view: &InstanceView, slot: PortSlot) -> HalResult<()> {
        if let Some(port) = view.port(slot) {
            self.apply_port(port, view.is_forwarding(slot))?;
        }
        self.sync_rules(view)
    }

    fn update_role(&mut self, view: &InstanceView) -> HalResult<()> {
        self.sync_rules(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{MockAclHal, MockPortControl, MockRingBlockHal};
    use crate::types::RecoveryProfile;
    use mockall::predicate::*;

    fn view(role: RingRole, oper_role: OperRole, in_role: InRole) -> InstanceView {
        InstanceView {
            id: 1,
            role,
            oper_role,
            in_role,
            ports: [Some(1), Some(2), Some(3)],
            forwarding: [true, false, false],
            primary: PortSlot::Port1,
            vlan: 0,
            in_vlan: 0,
            in_id: 5,
            ring_timing: RingTiming::for_profile(RecoveryProfile::Ms200),
            in_timing: InTiming::for_profile(RecoveryProfile::Ms200),
        }
    }

    #[test]
    fn test_decision_manager_consumes_ring_classes() {
        let v = view(RingRole::Manager, OperRole::Manager, InRole::None);
        assert_eq!(acl_decision(&v, FrameClass::Test, false), (vec![], true));
        assert_eq!(acl_decision(&v, FrameClass::Control, false), (vec![], true));
        assert_eq!(acl_decision(&v, FrameClass::InControl, false), (vec![], true));
    }

    #[test]
    fn test_decision_client_forwards_when_both_ports_forward() {
        let mut v = view(RingRole::Client, OperRole::Client, InRole::None);
        assert_eq!(acl_decision(&v, FrameClass::Test, false), (vec![], false));

        v.forwarding = [true, true, false];
        assert_eq!(acl_decision(&v, FrameClass::Test, false), (vec![1, 2], false));
        assert_eq!(acl_decision(&v, FrameClass::Control, false), (vec![1, 2], true));
        assert_eq!(acl_decision(&v, FrameClass::InTest, false), (vec![1, 2], false));
    }

    #[test]
    fn test_decision_auto_manager_client_copies_tests() {
        let mut v = view(RingRole::AutoManager, OperRole::Client, InRole::None);
        v.forwarding = [true, true, false];
        assert_eq!(acl_decision(&v, FrameClass::Test, false), (vec![1, 2], true));
    }

    #[test]
    fn test_decision_interconnection_roles() {
        let mim = view(RingRole::Client, OperRole::Client, InRole::Manager);
        assert_eq!(acl_decision(&mim, FrameClass::InTest, false), (vec![], true));
        assert_eq!(acl_decision(&mim, FrameClass::InTest, true), (vec![], true));
        assert_eq!(acl_decision(&mim, FrameClass::InControl, true), (vec![], true));

        let mic = view(RingRole::Client, OperRole::Client, InRole::Client);
        assert_eq!(acl_decision(&mic, FrameClass::InTest, false), (vec![3], false));
        assert_eq!(acl_decision(&mic, FrameClass::InTest, true), (vec![1, 2], false));
        assert_eq!(acl_decision(&mic, FrameClass::Test, true), (vec![], false));
    }

    #[test]
    fn test_acl_backend_only_touches_changed_rules() {
        let mut acl = MockAclHal::new();
        let mut next = 0;
        // 4 ring-side rules at activation, no in-port rules
        acl.expect_set().times(4).returning(move |_, _| {
            next += 1;
            Ok(next)
        });
        let mut ports = MockPortControl::new();
        ports
            .expect_set_forwarding()
            .with(eq(1), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        ports
            .expect_set_forwarding()
            .with(eq(2), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut backend = AclBackend::new(acl, ports);
        let v = view(RingRole::Manager, OperRole::Manager, InRole::None);
        backend.activate(&v).unwrap();
        assert_eq!(backend.rules(1).len(), 4);

        // same view again: neither rules nor ports change
        backend.set_port_forwarding(&v, PortSlot::Port1).unwrap();
        backend.update_role(&v).unwrap();
    }

    #[test]
    fn test_acl_backend_deactivate_releases_rules() {
        let mut acl = MockAclHal::new();
        let mut next = 0;
        acl.expect_set().times(4).returning(move |_, _| {
            next += 1;
            Ok(next)
        });
        acl.expect_del().times(4).returning(|_| Ok(()));
        let mut ports = MockPortControl::new();
        ports.expect_set_forwarding().returning(|_, _| Ok(()));

        let mut backend = AclBackend::new(acl, ports);
        let v = view(RingRole::Client, OperRole::Client, InRole::None);
        backend.activate(&v).unwrap();
        backend.deactivate(&v).unwrap();
        assert!(backend.rules(1).is_empty());
    }

    #[test]
    fn test_acl_backend_deactivate_continues_after_failure() {
        let mut acl = MockAclHal::new();
        let mut next = 0;
        acl.expect_set().times(4).returning(move |_, _| {
            next += 1;
            Ok(next)
        });
        // every rule is still attempted although the first delete fails
        acl.expect_del()
            .with(eq(1))
            .times(1)
            .returning(|_| Err(HalError::NotFound("ace 1".into())));
        acl.expect_del().times(3).returning(|_| Ok(()));

        let mut ports = MockPortControl::new();
        ports
            .expect_set_forwarding()
            .with(eq(1), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        ports
            .expect_set_forwarding()
            .with(eq(2), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));
        ports
            .expect_set_forwarding()
            .with(eq(2), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut backend = AclBackend::new(acl, ports);
        let v = view(RingRole::Client, OperRole::Client, InRole::None);
        backend.activate(&v).unwrap();

        let res = backend.deactivate(&v);
        assert!(matches!(res, Err(HalError::NotFound(_))));
        assert!(backend.rules(1).is_empty());
    }

    #[test]
    fn test_hardware_backend_deactivate_unblocks_after_failure() {
        let mut hal = MockRingBlockHal::new();
        hal.expect_mrp_add().times(1).returning(|_| Ok(7));
        hal.expect_set_ring_role().returning(|_, _| Ok(()));
        hal.expect_set_in_role().returning(|_, _| Ok(()));
        hal.expect_set_primary_port().returning(|_, _| Ok(()));
        hal.expect_set_cpu_copy().returning(|_, _, _| Ok(()));
        hal.expect_set_loc_config().returning(|_, _| Ok(()));
        hal.expect_set_port_state().returning(|_, _, _| Ok(()));
        hal.expect_mrp_del()
            .with(eq(7))
            .times(1)
            .returning(|_| Err(HalError::failed("busy")));

        let mut ports = MockPortControl::new();
        ports
            .expect_set_forwarding()
            .with(eq(1), eq(true))
            .times(2)
            .returning(|_, _| Ok(()));
        ports
            .expect_set_forwarding()
            .with(eq(2), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));
        ports
            .expect_set_forwarding()
            .with(eq(2), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut backend = HardwareBackend::new(hal, ports);
        let v = view(RingRole::Client, OperRole::Client, InRole::None);
        backend.activate(&v).unwrap();
        assert!(matches!(backend.deactivate(&v), Err(HalError::Failed(_))));
    }

    #[test]
    fn test_hardware_backend_port_state_without_object() {
        let mut ports = MockPortControl::new();
        ports
            .expect_set_forwarding()
            .with(eq(2), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        // no MRP object exists, so the hardware HAL must not be called
        let mut backend = HardwareBackend::new(MockRingBlockHal::new(), ports);
        let v = view(RingRole::Manager, OperRole::Manager, InRole::None);
        backend.set_port_forwarding(&v, PortSlot::Port2).unwrap();
    }

    #[test]
    fn test_hardware_backend_activation() {
        let mut hal = MockRingBlockHal::new();
        hal.expect_mrp_add().times(1).returning(|_| Ok(42));
        hal.expect_set_ring_role()
            .with(eq(42), eq(OperRole::Manager))
            .times(1)
            .returning(|_, _| Ok(()));
        hal.expect_set_in_role().returning(|_, _| Ok(()));
        hal.expect_set_primary_port()
            .with(eq(42), eq(1))
            .times(1)
            .returning(|_, _| Ok(()));
        hal.expect_set_cpu_copy().returning(|_, _, _| Ok(()));
        hal.expect_set_loc_config().times(1).returning(|_, _| Ok(()));
        hal.expect_set_port_state().times(2).returning(|_, _, _| Ok(()));
        hal.expect_copy_next_to_cpu()
            .with(eq(42), eq(FrameClass::Test))
            .times(1)
            .returning(|_, _| Ok(()));
        let mut ports = MockPortControl::new();
        ports.expect_set_forwarding().times(2).returning(|_, _| Ok(()));

        let mut backend = HardwareBackend::new(hal, ports);
        let v = view(RingRole::Manager, OperRole::Manager, InRole::None);
        backend.activate(&v).unwrap();
        backend
            .set_cpu_copy(&v, FrameClass::Test, CpuCopy::Next)
            .unwrap();
    }

    #[test]
    fn test_hardware_backend_unknown_instance() {
        let backend = HardwareBackend::new(MockRingBlockHal::new(), MockPortControl::new());
        let v = view(RingRole::Manager, OperRole::Manager, InRole::None);
        assert!(matches!(backend.loc_state(&v), Err(HalError::NotFound(_))));
    }
}
