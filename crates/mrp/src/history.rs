//! Bounded operational history of an instance.

use crate::types::{
    InFsmState, ManagerCandidate, OperRole, OperWarnings, PortSlot, RingFsmState, RingState,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Entries kept per instance; older ones are dropped
pub const HISTORY_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Activated,
    Deactivated,
    RoleChanged { from: OperRole, to: OperRole },
    RingFsm { from: RingFsmState, to: RingFsmState },
    InFsm { from: InFsmState, to: InFsmState },
    RingState { state: RingState },
    InState { state: RingState },
    PortForwarding { slot: PortSlot, forwarding: bool },
    PrimarySwapped { primary: PortSlot },
    BestManager { manager: ManagerCandidate },
    WarningsChanged { warnings: OperWarnings },
    FdbFlush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Microseconds since boot
    pub time_us: u64,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn push(&mut self, time_us: u64, event: HistoryEvent) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry { time_us, event });
    }

    /// Entries, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
