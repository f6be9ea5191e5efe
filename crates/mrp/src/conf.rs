//! Configuration validation and change classification.

use crate::error::ConfError;
use crate::types::{
    Capabilities, InRole, InstanceConf, InstanceId, MepKey, NAME_LEN_MAX, PortNo, PortSlot,
    RecoveryProfile, RingRole, SfTrigger,
};
use bitflags::bitflags;

bitflags! {
    /// What an accepted configuration change requires of a running instance
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfEffects: u8 {
        /// Tear down and activate again
        const REACTIVATE = 1 << 0;
        /// Drop the frame templates
        const REBUILD_PDUS = 1 << 1;
        /// Recompute signal fail of the ports
        const SF_REEVALUATE = 1 << 2;
        /// Reload timing parameters
        const TIMING = 1 << 3;
        /// Nothing to do beyond storing it
        const COSMETIC = 1 << 4;
    }
}

fn check_name(name: &str) -> Result<(), ConfError> {
    if name.len() > NAME_LEN_MAX || !name.bytes().all(|b| (33..=126).contains(&b)) {
        return Err(ConfError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn vlan_ok(vid: u16) -> bool {
    vid <= 4094
}

/// The auto-manager range sits above the manager range and additionally
/// allows the lowest priority 0xFFFF.
fn priority_ok(role: RingRole, prio: u16) -> bool {
    match role {
        RingRole::Client => true,
        RingRole::Manager => prio == 0x0000 || prio == 0x8000 || (0x1000..=0x7000).contains(&prio),
        RingRole::AutoManager => (0x9000..=0xF000).contains(&prio) || prio == 0xFFFF,
    }
}

/// Checks that depend on this configuration and the platform only
pub fn validate(
    conf: &InstanceConf,
    caps: &Capabilities,
    known_port: impl Fn(PortNo) -> bool,
) -> Result<(), ConfError> {
    check_name(&conf.name)?;
    check_name(&conf.domain_name)?;
    check_name(&conf.in_name)?;

    if conf.domain_id.is_all_zero() {
        return Err(ConfError::DomainIdAllZero);
    }
    if !priority_ok(conf.role, conf.manager_priority) {
        return Err(ConfError::InvalidManagerPriority(conf.manager_priority));
    }
    if !vlan_ok(conf.vlan) {
        return Err(ConfError::InvalidVlan(conf.vlan));
    }
    if conf
        .recovery_profile
        .is_faster_than(caps.fastest_recovery_profile)
    {
        return Err(ConfError::RecoveryProfileNotSupported(
            conf.recovery_profile.to_string(),
        ));
    }

    let interconnected = conf.in_role != InRole::None;
    if interconnected {
        if !vlan_ok(conf.in_vlan) {
            return Err(ConfError::InvalidInVlan(conf.in_vlan));
        }
        if !matches!(
            conf.in_recovery_profile,
            RecoveryProfile::Ms200 | RecoveryProfile::Ms500
        ) {
            return Err(ConfError::InRecoveryProfileInvalid);
        }
    }

    let slots: &[PortSlot] = if interconnected {
        &PortSlot::ALL
    } else {
        &PortSlot::RING
    };

    let mut meps: Vec<MepKey> = Vec::new();
    for slot in slots {
        let pc = conf.port_conf(*slot);
        match pc.port {
            Some(port) if !known_port(port) => return Err(ConfError::UnknownPort(port)),
            None if conf.admin_active => return Err(ConfError::MissingPort(*slot)),
            _ => {}
        }
        if pc.sf_trigger == SfTrigger::Mep {
            let mep = pc.mep.ok_or(ConfError::MepMissing(*slot))?;
            if meps.contains(&mep) {
                return Err(ConfError::SameMep);
            }
            meps.push(mep);
        }
    }

    if let (Some(p1), Some(p2)) = (conf.ring_port1.port, conf.ring_port2.port)
        && p1 == p2
    {
        return Err(ConfError::RingPortsIdentical);
    }
    if interconnected
        && let Some(ip) = conf.in_port.port
        && (conf.ring_port1.port == Some(ip) || conf.ring_port2.port == Some(ip))
    {
        return Err(ConfError::InPortIsRingPort);
    }

    Ok(())
}

/// Checks against the configuration of every other enabled instance. At
/// most one instance per node may take an interconnection role.
pub fn validate_against<'a>(
    conf: &InstanceConf,
    others: impl IntoIterator<Item = (InstanceId, &'a InstanceConf)>,
) -> Result<(), ConfError> {
    let ring = |c: &InstanceConf| [c.ring_port1.port, c.ring_port2.port];
    let in_port = |c: &InstanceConf| {
        if c.in_role == InRole::None {
            None
        } else {
            c.in_port.port
        }
    };

    for (_, other) in others {
        let other_ring = ring(other);
        let other_in = in_port(other);

        if let Some(p) = conf.ring_port1.port {
            if other_ring.contains(&Some(p)) {
                return Err(ConfError::SamePort1);
            }
            if other_in == Some(p) {
                return Err(ConfError::InterconnectionInUse);
            }
        }
        if let Some(p) = conf.ring_port2.port {
            if other_ring.contains(&Some(p)) {
                return Err(ConfError::SamePort2);
            }
            if other_in == Some(p) {
                return Err(ConfError::InterconnectionInUse);
            }
        }
        if let Some(p) = in_port(conf) {
            if other_in == Some(p) {
                return Err(ConfError::SameInPort);
            }
            if other_ring.contains(&Some(p)) {
                return Err(ConfError::InterconnectionInUse);
            }
        }
        if conf.in_role != InRole::None && other.in_role != InRole::None {
            return Err(ConfError::InterconnectionInUse);
        }
    }
    Ok(())
}

/// Classify the change from `old` to `new`
pub fn classify(old: &InstanceConf, new: &InstanceConf) -> ConfEffects {
    let mut effects = ConfEffects::empty();

    let port = |c: &InstanceConf, s: PortSlot| c.port_conf(s).port;
    if old.admin_active != new.admin_active
        || old.role != new.role
        || old.in_role != new.in_role
        || old.in_mode != new.in_mode
        || PortSlot::ALL.iter().any(|s| port(old, *s) != port(new, *s))
    {
        effects |= ConfEffects::REACTIVATE;
    }

    if old.vlan != new.vlan
        || old.in_vlan != new.in_vlan
        || old.domain_id != new.domain_id
        || old.oui != new.oui
        || old.manager_priority != new.manager_priority
        || old.in_id != new.in_id
    {
        effects |= ConfEffects::REBUILD_PDUS;
    }

    if PortSlot::ALL.iter().any(|s| {
        let (a, b) = (old.port_conf(*s), new.port_conf(*s));
        a.sf_trigger != b.sf_trigger || a.mep != b.mep
    }) {
        effects |= ConfEffects::SF_REEVALUATE;
    }

    if old.recovery_profile != new.recovery_profile
        || old.in_recovery_profile != new.in_recovery_profile
    {
        effects |= ConfEffects::TIMING;
    }

    // react_on_link_change is read when a LinkDown/LinkUp arrives
    if old.name != new.name
        || old.domain_name != new.domain_name
        || old.in_name != new.in_name
        || old.react_on_link_change != new.react_on_link_change
    {
        effects |= ConfEffects::COSMETIC;
    }

    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DomainId, PortConf};

    fn caps() -> Capabilities {
        Capabilities {
            instance_cnt_max: 4,
            fastest_recovery_profile: RecoveryProfile::Ms200,
            hw_mrp: false,
            afi: false,
        }
    }

    fn ring(p1: PortNo, p2: PortNo) -> InstanceConf {
        InstanceConf {
            admin_active: true,
            ring_port1: PortConf::link(p1),
            ring_port2: PortConf::link(p2),
            ..Default::default()
        }
    }

    fn known(p: PortNo) -> bool {
        (1..=8).contains(&p)
    }

    #[test]
    fn test_valid_ring() {
        assert_eq!(validate(&ring(1, 2), &caps(), known), Ok(()));
    }

    #[test]
    fn test_names() {
        let mut c = ring(1, 2);
        c.name = "ring-A_1".into();
        assert!(validate(&c, &caps(), known).is_ok());

        c.name = "has space".into();
        assert!(matches!(validate(&c, &caps(), known), Err(ConfError::InvalidName(_))));

        c.name = "x".repeat(33);
        assert!(matches!(validate(&c, &caps(), known), Err(ConfError::InvalidName(_))));
    }

    #[test]
    fn test_domain_all_zero_rejected() {
        let mut c = ring(1, 2);
        c.domain_id = DomainId([0; 16]);
        assert_eq!(validate(&c, &caps(), known), Err(ConfError::DomainIdAllZero));
    }

    #[test]
    fn test_priority_ranges() {
        assert!(priority_ok(RingRole::Manager, 0x0000));
        assert!(priority_ok(RingRole::Manager, 0x7000));
        assert!(priority_ok(RingRole::Manager, 0x8000));
        assert!(!priority_ok(RingRole::Manager, 0x9000));
        assert!(!priority_ok(RingRole::Manager, 0x0001));
        assert!(!priority_ok(RingRole::Manager, 0x8001));
        assert!(priority_ok(RingRole::AutoManager, 0xA000));
        assert!(priority_ok(RingRole::AutoManager, 0xFFFF));
        assert!(!priority_ok(RingRole::AutoManager, 0x8000));
        assert!(!priority_ok(RingRole::AutoManager, 0xF001));
    }

    #[test]
    fn test_priority_inside_ranges() {
        assert!(priority_ok(RingRole::Manager, 0x1001));
        assert!(priority_ok(RingRole::Manager, 0x1234));
        assert!(priority_ok(RingRole::Manager, 0x6FFF));
        assert!(priority_ok(RingRole::AutoManager, 0x9500));
        assert!(priority_ok(RingRole::AutoManager, 0xEABC));

        let mut c = ring(1, 2);
        c.role = RingRole::Manager;
        c.manager_priority = 0x1234;
        assert_eq!(validate(&c, &caps(), known), Ok(()));
        c.manager_priority = 0x0FFF;
        assert_eq!(
            validate(&c, &caps(), known),
            Err(ConfError::InvalidManagerPriority(0x0FFF))
        );
    }

    #[test]
    fn test_ports() {
        assert_eq!(
            validate(&ring(1, 1), &caps(), known),
            Err(ConfError::RingPortsIdentical)
        );
        assert_eq!(
            validate(&ring(1, 9), &caps(), known),
            Err(ConfError::UnknownPort(9))
        );

        let mut c = ring(1, 2);
        c.ring_port2.port = None;
        assert_eq!(
            validate(&c, &caps(), known),
            Err(ConfError::MissingPort(PortSlot::Port2))
        );
        // inactive instances may leave ports out
        c.admin_active = false;
        assert!(validate(&c, &caps(), known).is_ok());
    }

    #[test]
    fn test_interconnection_port() {
        let mut c = ring(1, 2);
        c.in_role = InRole::Client;
        c.in_port = PortConf::link(2);
        assert_eq!(validate(&c, &caps(), known), Err(ConfError::InPortIsRingPort));

        c.in_port = PortConf::link(3);
        c.in_recovery_profile = RecoveryProfile::Ms30;
        assert_eq!(
            validate(&c, &caps(), known),
            Err(ConfError::InRecoveryProfileInvalid)
        );
    }

    #[test]
    fn test_unsupported_profile() {
        let mut c = ring(1, 2);
        c.recovery_profile = RecoveryProfile::Ms10;
        assert!(matches!(
            validate(&c, &caps(), known),
            Err(ConfError::RecoveryProfileNotSupported(_))
        ));
    }

    #[test]
    fn test_mep_rules() {
        let key = MepKey {
            domain: 1,
            service: 1,
            mep_id: 1,
        };
        let mut c = ring(1, 2);
        c.ring_port1.sf_trigger = SfTrigger::Mep;
        assert_eq!(
            validate(&c, &caps(), known),
            Err(ConfError::MepMissing(PortSlot::Port1))
        );

        c.ring_port1.mep = Some(key);
        c.ring_port2.sf_trigger = SfTrigger::Mep;
        c.ring_port2.mep = Some(key);
        assert_eq!(validate(&c, &caps(), known), Err(ConfError::SameMep));
    }

    #[test]
    fn test_cross_instance_conflicts() {
        let first = ring(1, 2);
        let others = [(1, &first)];

        assert_eq!(validate_against(&ring(1, 3), others), Err(ConfError::SamePort1));
        assert_eq!(validate_against(&ring(3, 2), others), Err(ConfError::SamePort2));
        assert_eq!(validate_against(&ring(3, 4), others), Ok(()));

        let mut ic = ring(5, 6);
        ic.in_role = InRole::Manager;
        ic.in_port = PortConf::link(1);
        assert_eq!(
            validate_against(&ic, others),
            Err(ConfError::InterconnectionInUse)
        );

        let mut other_ic = ring(3, 4);
        other_ic.in_role = InRole::Client;
        other_ic.in_port = PortConf::link(7);
        ic.in_port = PortConf::link(7);
        assert_eq!(
            validate_against(&ic, [(2, &other_ic)]),
            Err(ConfError::SameInPort)
        );

        // one interconnection role per node
        other_ic.in_port = PortConf::link(8);
        assert_eq!(
            validate_against(&ic, [(2, &other_ic)]),
            Err(ConfError::InterconnectionInUse)
        );
    }

    #[test]
    fn test_classify() {
        let old = ring(1, 2);

        let mut new = old.clone();
        new.name = "west".into();
        assert_eq!(classify(&old, &new), ConfEffects::COSMETIC);

        new = old.clone();
        new.vlan = 10;
        assert_eq!(classify(&old, &new), ConfEffects::REBUILD_PDUS);

        new = old.clone();
        new.ring_port2.port = Some(3);
        assert!(classify(&old, &new).contains(ConfEffects::REACTIVATE));

        new = old.clone();
        new.recovery_profile = RecoveryProfile::Ms200;
        assert_eq!(classify(&old, &new), ConfEffects::TIMING);

        assert!(classify(&old, &old).is_empty());
    }
}
