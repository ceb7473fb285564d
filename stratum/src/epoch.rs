//! Revision epoch tracker: a bounded array of slots
//! recording which revisions currently have an active reader, used by
//! the buffer cache's sweeper to veto eviction of pages an MVCC reader
//! might still need.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StratumError};
use crate::ids::Revision;

/// A reservation in the tracker's slot array. `deregister` consumes
/// it, matching the single-release discipline guards use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochTicket(usize);

pub struct EpochTracker {
    slots: Mutex<Vec<Option<Revision>>>,
    last_committed: AtomicU64,
}

impl EpochTracker {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
            last_committed: AtomicU64::new(0),
        }
    }

    /// Reserves a free slot and records `revision`. A hard error
    /// (`PoolExhausted`) if every slot is taken — this bounds peak
    /// concurrent transactions.
    pub fn register(&self, revision: Revision) -> Result<EpochTicket> {
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let free = slots
            .iter()
            .position(Option::is_none)
            .ok_or(StratumError::PoolExhausted("epoch tracker has no free slot"))?;

        slots[free] = Some(revision);
        tracing::trace!(slot = free, %revision, "epoch ticket registered");
        Ok(EpochTicket(free))
    }

    pub fn deregister(&self, ticket: EpochTicket) {
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots[ticket.0] = None;
        tracing::trace!(slot = ticket.0, "epoch ticket deregistered");
    }

    /// The smallest revision any slot is pinned to, or the
    /// last-committed revision if nothing is currently active.
    #[must_use]
    pub fn min_active_revision(&self) -> Revision {
        let slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots
            .iter()
            .filter_map(|slot| *slot)
            .min()
            .unwrap_or_else(|| Revision(self.last_committed.load(Ordering::Acquire)))
    }

    /// Called on every successful commit so the watermark still makes
    /// sense once the last reader closes.
    pub fn record_commit(&self, revision: Revision) {
        self.last_committed.store(revision.0, Ordering::Release);
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::EpochTracker;
    use crate::error::StratumError;
    use crate::ids::Revision;

    #[test]
    fn min_active_revision_tracks_registered_tickets() {
        let tracker = EpochTracker::new(4);
        tracker.record_commit(Revision(5));
        assert_eq!(tracker.min_active_revision(), Revision(5));

        let a = tracker.register(Revision(3)).unwrap();
        let _b = tracker.register(Revision(4)).unwrap();
        assert_eq!(tracker.min_active_revision(), Revision(3));

        tracker.deregister(a);
        assert_eq!(tracker.min_active_revision(), Revision(4));
    }

    #[test]
    fn register_fails_when_pool_is_exhausted() {
        let tracker = EpochTracker::new(1);
        let _ticket = tracker.register(Revision(1)).unwrap();

        let err = tracker.register(Revision(2)).unwrap_err();
        assert!(matches!(err, StratumError::PoolExhausted(_)));
    }
}
