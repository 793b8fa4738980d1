//! Per-transaction timer slots.

use std::sync::atomic::{AtomicI64, Ordering};

/// Which of the two per-transaction timers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Drives retransmissions.
    Retransmit,
    /// Drives the transaction timeout and state expiry.
    Timeout,
}

const TIMER_IDLE: i64 = -1;

static NEXT_TIMER_ID: AtomicI64 = AtomicI64::new(0);

/// A one-shot timer slot.
///
/// The stored id doubles as the cancellation token: a scheduled
/// callback presents its id, and only the callback whose id still
/// matches the slot may act. Cancelling resets the slot, turning any
/// late delivery into a no-op.
#[derive(Debug)]
pub(crate) struct TimerSlot {
    id: AtomicI64,
}

impl TimerSlot {
    pub fn new() -> Self {
        TimerSlot {
            id: AtomicI64::new(TIMER_IDLE),
        }
    }

    /// Arms the slot, returning the id the scheduled callback must
    /// present.
    pub fn arm(&self) -> i64 {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        self.id.store(id, Ordering::SeqCst);

        id
    }

    /// Disarms the slot.
    pub fn cancel(&self) {
        self.id.store(TIMER_IDLE, Ordering::SeqCst);
    }

    /// Returns `true` while a timer is armed.
    pub fn is_scheduled(&self) -> bool {
        self.id.load(Ordering::SeqCst) != TIMER_IDLE
    }

    /// Consumes the slot if `id` is still the armed one.
    pub fn consume(&self, id: i64) -> bool {
        self.id
            .compare_exchange(id, TIMER_IDLE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_and_consume() {
        let slot = TimerSlot::new();

        assert!(!slot.is_scheduled());

        let id = slot.arm();
        assert!(slot.is_scheduled());
        assert!(slot.consume(id));
        assert!(!slot.is_scheduled());

        // A consumed id cannot fire twice.
        assert!(!slot.consume(id));
    }

    #[test]
    fn test_cancel_makes_late_delivery_a_noop() {
        let slot = TimerSlot::new();

        let id = slot.arm();
        slot.cancel();

        assert!(!slot.consume(id));
    }

    #[test]
    fn test_rearm_invalidates_previous_id() {
        let slot = TimerSlot::new();

        let stale = slot.arm();
        let current = slot.arm();

        assert!(!slot.consume(stale));
        assert!(slot.consume(current));
    }
}
