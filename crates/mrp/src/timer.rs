//! Cooperative timer subsystem.
//!
//! Timers live in an arena and are addressed by [`TimerHandle`]. Armed timers
//! are kept in an ordered set keyed by `(deadline, handle)` so the earliest
//! deadline is always the first element. Nothing here sleeps: the host asks
//! for [`TimerService::next_deadline`], waits, then calls
//! [`TimerService::take_due`] and dispatches the returned events.
//!
//! Every start/stop bumps a per-timer stamp. A [`Due`] entry carries the stamp
//! it was collected with, so when one callback stops or restarts another timer
//! that was collected in the same batch, [`TimerService::is_current`] reports
//! the stale entry and the host skips it.

use crate::error::TimerError;
use std::collections::BTreeSet;
use tracing::trace;

/// Handle of a timer in a [`TimerService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle {
    index: u32,
    epoch: u32,
}

/// A timer that reached its deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Due<E> {
    pub handle: TimerHandle,
    pub stamp: u64,
    pub event: E,
}

#[derive(Debug)]
struct Slot<E> {
    name: &'static str,
    event: E,
    periodic: bool,
    period_us: u64,
    deadline: Option<u64>,
    stamp: u64,
    lost: u64,
}

#[derive(Debug)]
struct Entry<E> {
    epoch: u32,
    slot: Option<Slot<E>>,
}

/// Arena of timers with an ordered deadline queue
pub struct TimerService<E> {
    entries: Vec<Entry<E>>,
    free: Vec<u32>,
    queue: BTreeSet<(u64, TimerHandle)>,
    waker: Option<Box<dyn Fn() + Send>>,
}

impl<E: Clone> Default for TimerService<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for TimerService<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("timers", &(self.entries.len() - self.free.len()))
            .field("armed", &self.queue.len())
            .finish()
    }
}

impl<E: Clone> TimerService<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            queue: BTreeSet::new(),
            waker: None,
        }
    }

    /// Install a callback invoked whenever a newly armed deadline is sooner
    /// than the earliest one known so far.
    pub fn set_waker(&mut self, waker: Box<dyn Fn() + Send>) {
        self.waker = Some(waker);
    }

    /// Create an idle one-shot timer carrying `event`
    pub fn create(&mut self, name: &'static str, event: E) -> TimerHandle {
        let slot = Slot {
            name,
            event,
            periodic: false,
            period_us: 0,
            deadline: None,
            stamp: 0,
            lost: 0,
        };

        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.slot = Some(slot);
                TimerHandle {
                    index,
                    epoch: entry.epoch,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    epoch: 0,
                    slot: Some(slot),
                });
                TimerHandle { index, epoch: 0 }
            }
        }
    }

    /// Rebind period and mode. A running timer is stopped first.
    pub fn init(&mut self, h: TimerHandle, period_us: u64, periodic: bool) -> Result<(), TimerError> {
        self.stop(h)?;
        let slot = self.slot_mut(h)?;
        slot.period_us = period_us;
        slot.periodic = periodic;
        slot.lost = 0;
        Ok(())
    }

    /// Arm the timer `period_us` from `now`. Restarts it if already armed.
    pub fn start(&mut self, h: TimerHandle, now: u64) -> Result<(), TimerError> {
        let slot = self.slot(h)?;
        if slot.periodic && slot.period_us == 0 {
            return Err(TimerError::ZeroPeriod);
        }
        let deadline = now.saturating_add(slot.period_us);
        self.arm(h, deadline)
    }

    /// `init` followed by `start`
    pub fn start_with(
        &mut self,
        h: TimerHandle,
        period_us: u64,
        periodic: bool,
        now: u64,
    ) -> Result<(), TimerError> {
        if periodic && period_us == 0 {
            return Err(TimerError::ZeroPeriod);
        }
        self.init(h, period_us, periodic)?;
        self.start(h, now)
    }

    /// Push out the deadline of a one-shot timer to `now + timeout_us`, but
    /// only if that is later than the current deadline. An idle timer is
    /// simply started. Returns whether the deadline moved.
    pub fn extend(&mut self, h: TimerHandle, timeout_us: u64, now: u64) -> Result<bool, TimerError> {
        let slot = self.slot(h)?;
        if slot.periodic {
            return Ok(false);
        }
        let deadline = now.saturating_add(timeout_us);
        match slot.deadline {
            Some(current) if current >= deadline => Ok(false),
            _ => {
                self.slot_mut(h)?.period_us = timeout_us;
                self.arm(h, deadline)?;
                Ok(true)
            }
        }
    }

    /// Disarm the timer. Stopping an idle timer is a no-op apart from
    /// invalidating any collected expiry.
    pub fn stop(&mut self, h: TimerHandle) -> Result<(), TimerError> {
        let slot = self.slot_mut(h)?;
        slot.stamp += 1;
        if let Some(deadline) = slot.deadline.take() {
            self.queue.remove(&(deadline, h));
        }
        Ok(())
    }

    pub fn is_active(&self, h: TimerHandle) -> bool {
        self.slot(h).map(|s| s.deadline.is_some()).unwrap_or(false)
    }

    /// Remove the timer. The handle becomes invalid.
    pub fn destroy(&mut self, h: TimerHandle) -> Result<(), TimerError> {
        self.stop(h)?;
        let entry = &mut self.entries[h.index as usize];
        entry.slot = None;
        entry.epoch = entry.epoch.wrapping_add(1);
        self.free.push(h.index);
        Ok(())
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.first().map(|(deadline, _)| *deadline)
    }

    /// Number of periodic expiries skipped because the host ran late
    pub fn lost_callbacks(&self, h: TimerHandle) -> u64 {
        self.slot(h).map(|s| s.lost).unwrap_or(0)
    }

    pub fn name(&self, h: TimerHandle) -> Option<&'static str> {
        self.slot(h).ok().map(|s| s.name)
    }

    /// Microseconds until the timer fires, if armed
    pub fn remaining(&self, h: TimerHandle, now: u64) -> Option<u64> {
        self.slot(h)
            .ok()
            .and_then(|s| s.deadline)
            .map(|d| d.saturating_sub(now))
    }

    /// Collect every timer whose deadline is at or before `now`.
    ///
    /// One-shot timers become idle. Periodic timers advance by whole periods
    /// past `now`, so their deadlines stay on the original grid and skipped
    /// periods are counted as lost callbacks.
    pub fn take_due(&mut self, now: u64) -> Vec<Due<E>> {
        let mut due = Vec::new();

        while let Some(&(deadline, h)) = self.queue.first() {
            if deadline > now {
                break;
            }
            self.queue.remove(&(deadline, h));

            let Some(slot) = self.entries[h.index as usize].slot.as_mut() else {
                continue;
            };

            due.push(Due {
                handle: h,
                stamp: slot.stamp,
                event: slot.event.clone(),
            });

            if slot.periodic {
                let behind = (now - deadline) / slot.period_us;
                if behind > 0 {
                    slot.lost += behind;
                    trace!(timer = slot.name, lost = behind, "periodic timer ran late");
                }
                let next = deadline + (behind + 1) * slot.period_us;
                slot.deadline = Some(next);
                self.queue.insert((next, h));
            } else {
                slot.deadline = None;
            }
        }

        due
    }

    /// False when the timer was stopped, restarted or destroyed after `due`
    /// was collected.
    pub fn is_current(&self, due: &Due<E>) -> bool {
        self.slot(due.handle)
            .map(|s| s.stamp == due.stamp)
            .unwrap_or(false)
    }

    fn arm(&mut self, h: TimerHandle, deadline: u64) -> Result<(), TimerError> {
        let earliest = self.next_deadline();
        let slot = self.slot_mut(h)?;
        slot.stamp += 1;
        if let Some(old) = slot.deadline.replace(deadline) {
            self.queue.remove(&(old, h));
        }
        self.queue.insert((deadline, h));

        if earliest.is_none_or(|e| deadline < e) {
            if let Some(waker) = &self.waker {
                waker();
            }
        }
        Ok(())
    }

    fn slot(&self, h: TimerHandle) -> Result<&Slot<E>, TimerError> {
        self.entries
            .get(h.index as usize)
            .filter(|e| e.epoch == h.epoch)
            .and_then(|e| e.slot.as_ref())
            .ok_or(TimerError::UnknownHandle)
    }

    fn slot_mut(&mut self, h: TimerHandle) -> Result<&mut Slot<E>, TimerError> {
        self.entries
            .get_mut(h.index as usize)
            .filter(|e| e.epoch == h.epoch)
            .and_then(|e| e.slot.as_mut())
            .ok_or(TimerError::UnknownHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_one_shot_fires_once() {
        let mut timers = TimerService::new();
        let t = timers.create("flush", 7u32);
        timers.start_with(t, 100, false, 1_000).unwrap();

        assert_eq!(timers.next_deadline(), Some(1_100));
        assert!(timers.take_due(1_099).is_empty());

        let due = timers.take_due(1_100);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event, 7);
        assert!(!timers.is_active(t));
        assert!(timers.take_due(5_000).is_empty());
    }

    #[test]
    fn test_default_is_empty() {
        let timers: TimerService<u8> = TimerService::default();
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_periodic_zero_period_rejected() {
        let mut timers = TimerService::new();
        let t = timers.create("test", ());
        assert_eq!(timers.start_with(t, 0, true, 0), Err(TimerError::ZeroPeriod));
        assert!(!timers.is_active(t));
    }

    #[test]
    fn test_periodic_drift_is_bounded() {
        // Fire N times with jittered servicing; deadline k stays at
        // start + k * period regardless of when take_due ran.
        let mut timers = TimerService::new();
        let t = timers.create("test", ());
        let period = 1_000;
        timers.start_with(t, period, true, 0).unwrap();

        let mut fired = 0u64;
        let mut now = 0;
        for k in 1..=200u64 {
            now = k * period + (k * 37) % 400;
            fired += timers.take_due(now).len() as u64;
            assert_eq!(timers.next_deadline(), Some((k + 1) * period));
        }
        assert_eq!(fired, 200);
        assert_eq!(timers.lost_callbacks(t), 0);
        assert!(now >= 200 * period);
    }

    #[test]
    fn test_periodic_counts_lost_callbacks() {
        let mut timers = TimerService::new();
        let t = timers.create("test", ());
        timers.start_with(t, 10, true, 0).unwrap();

        // 4.5 periods late: one expiry delivered, three skipped
        let due = timers.take_due(45);
        assert_eq!(due.len(), 1);
        assert_eq!(timers.lost_callbacks(t), 3);
        assert_eq!(timers.next_deadline(), Some(50));
    }

    #[test]
    fn test_extend_only_moves_later() {
        let mut timers = TimerService::new();
        let t = timers.create("flush", ());

        assert!(timers.extend(t, 100, 0).unwrap());
        assert!(!timers.extend(t, 50, 0).unwrap());
        assert_eq!(timers.next_deadline(), Some(100));
        assert!(timers.extend(t, 60, 50).unwrap());
        assert_eq!(timers.next_deadline(), Some(110));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut timers = TimerService::new();
        let t = timers.create("test", ());
        timers.stop(t).unwrap();
        timers.start_with(t, 10, false, 0).unwrap();
        timers.stop(t).unwrap();
        timers.stop(t).unwrap();
        assert!(!timers.is_active(t));
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_stale_expiry_suppressed() {
        let mut timers = TimerService::new();
        let a = timers.create("a", 'a');
        let b = timers.create("b", 'b');
        timers.start_with(a, 10, false, 0).unwrap();
        timers.start_with(b, 10, false, 0).unwrap();

        let due = timers.take_due(10);
        assert_eq!(due.len(), 2);

        // the callback of the first entry stops the other one
        let other = if due[0].handle == a { b } else { a };
        timers.stop(other).unwrap();

        assert!(timers.is_current(&due[0]));
        assert!(!timers.is_current(&due[1]));
    }

    #[test]
    fn test_destroyed_handle_is_invalid() {
        let mut timers = TimerService::new();
        let t = timers.create("test", ());
        timers.destroy(t).unwrap();
        assert_eq!(timers.start(t, 0), Err(TimerError::UnknownHandle));

        // slot reuse does not revive the old handle
        let u = timers.create("other", ());
        assert_ne!(t, u);
        assert_eq!(timers.stop(t), Err(TimerError::UnknownHandle));
        assert!(timers.stop(u).is_ok());
    }

    #[test]
    fn test_waker_on_sooner_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerService::new();
        let c = calls.clone();
        timers.set_waker(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        let a = timers.create("a", ());
        let b = timers.create("b", ());
        timers.start_with(a, 100, false, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        timers.start_with(b, 200, false, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        timers.start_with(b, 50, false, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
