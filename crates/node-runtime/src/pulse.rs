//! Timed relay pulses.
//!
//! At most one pending pulse per relay. Requesting a pulse on a relay that
//! already has one moves its deadline and keeps the original restore value.

use node_common::RELAY_COUNT;

/// A pending restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTask {
    /// Zero-based relay index.
    pub relay: usize,
    /// Absolute expiry in clock milliseconds.
    pub due_ms: u64,
    /// State written back on expiry.
    pub restore: bool,
}

/// Whether a pulse request created a task or moved an existing deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseStart {
    /// New task; the caller toggles the relay.
    Started,
    /// Existing task rescheduled; the relay is left as is.
    Extended,
}

/// Pending pulse tasks, one slot per relay.
#[derive(Debug, Clone, Default)]
pub struct PulseScheduler {
    slots: [Option<PulseTask>; RELAY_COUNT],
}

impl PulseScheduler {
    /// No pending pulses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `relay` to return to `restore` at `due_ms`.
    ///
    /// # Panics
    ///
    /// Panics if `relay` is not below [`RELAY_COUNT`].
    pub fn schedule(&mut self, relay: usize, due_ms: u64, restore: bool) -> PulseStart {
        let slot = &mut self.slots[relay];
        if let Some(task) = slot.as_mut() {
            task.due_ms = due_ms;
            return PulseStart::Extended;
        }
        *slot = Some(PulseTask {
            relay,
            due_ms,
            restore,
        });
        PulseStart::Started
    }

    /// Drop the pending pulse on `relay`, if any.
    pub fn cancel(&mut self, relay: usize) -> Option<PulseTask> {
        self.slots.get_mut(relay).and_then(Option::take)
    }

    /// Remove and return every task due at `now_ms`.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<PulseTask> {
        self.slots
            .iter_mut()
            .filter_map(|slot| {
                if slot.as_ref().is_some_and(|task| task.due_ms <= now_ms) {
                    slot.take()
                } else {
                    None
                }
            })
            .collect()
    }

    /// Pending task on `relay`.
    #[must_use]
    pub fn pending(&self, relay: usize) -> Option<&PulseTask> {
        self.slots.get(relay).and_then(Option::as_ref)
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_tasks_taken_once() {
        let mut pulses = PulseScheduler::new();
        assert_eq!(pulses.schedule(1, 5_000, false), PulseStart::Started);
        assert_eq!(pulses.schedule(4, 6_000, true), PulseStart::Started);

        assert!(pulses.take_due(4_999).is_empty());
        let due = pulses.take_due(5_000);
        assert_eq!(
            due,
            vec![PulseTask {
                relay: 1,
                due_ms: 5_000,
                restore: false
            }]
        );
        assert!(pulses.take_due(5_500).is_empty());
        assert_eq!(pulses.len(), 1);
    }

    #[test]
    fn test_repeat_pulse_extends_and_keeps_restore() {
        let mut pulses = PulseScheduler::new();
        pulses.schedule(2, 5_000, false);
        assert_eq!(pulses.schedule(2, 8_000, true), PulseStart::Extended);

        let task = pulses.pending(2).copied().unwrap();
        assert_eq!(task.due_ms, 8_000);
        assert!(!task.restore);
        assert_eq!(pulses.len(), 1);
    }

    #[test]
    fn test_cancel() {
        let mut pulses = PulseScheduler::new();
        pulses.schedule(0, 100, true);
        assert!(pulses.cancel(0).is_some());
        assert!(pulses.cancel(0).is_none());
        assert!(pulses.cancel(99).is_none());
        assert!(pulses.is_empty());
    }
}
