//! Per-escrow in-flight lock.
//!
//! Every mutating operation on an escrow holds a lease on its id from the
//! first read until commit or rollback. A second operation on the same id,
//! whether concurrent or reentrant from a custody or pool callback, is
//! rejected with [`EscrowLendError::EscrowLocked`] instead of seeing the
//! half-finished operation. Operations on different ids never contend.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use escrowlend_types::{EscrowId, EscrowLendError, Result};

/// Set of escrow ids with an operation in flight.
#[derive(Debug, Default)]
pub struct InFlightGuard {
    held: Mutex<HashSet<EscrowId>>,
}

impl InFlightGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<EscrowId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lease on `id`. Released when the returned value drops.
    ///
    /// # Errors
    /// Returns `EscrowLocked` if another operation holds the lease.
    pub fn acquire(&self, id: EscrowId) -> Result<EscrowLease<'_>> {
        if !self.held().insert(id) {
            tracing::warn!(escrow = %id, "rejected operation on locked escrow");
            return Err(EscrowLendError::EscrowLocked(id));
        }
        Ok(EscrowLease { guard: self, id })
    }

    #[must_use]
    pub fn is_held(&self, id: EscrowId) -> bool {
        self.held().contains(&id)
    }

    /// Number of operations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.held().len()
    }

    /// Lowest leased id, if any operation is in flight.
    #[must_use]
    pub fn first_held(&self) -> Option<EscrowId> {
        self.held().iter().min().copied()
    }
}

/// Exclusive right to mutate one escrow.
#[derive(Debug)]
pub struct EscrowLease<'a> {
    guard: &'a InFlightGuard,
    id: EscrowId,
}

impl EscrowLease<'_> {
    #[must_use]
    pub fn id(&self) -> EscrowId {
        self.id
    }
}

impl Drop for EscrowLease<'_> {
    fn drop(&mut self) {
        self.guard.held().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_locked() {
        let guard = InFlightGuard::new();
        let lease = guard.acquire(EscrowId(1)).unwrap();
        assert_eq!(lease.id(), EscrowId(1));
        let err = guard.acquire(EscrowId(1)).unwrap_err();
        assert!(matches!(err, EscrowLendError::EscrowLocked(EscrowId(1))));
    }

    #[test]
    fn different_ids_are_independent() {
        let guard = InFlightGuard::new();
        let _a = guard.acquire(EscrowId(1)).unwrap();
        let _b = guard.acquire(EscrowId(2)).unwrap();
        assert_eq!(guard.in_flight(), 2);
    }

    #[test]
    fn drop_releases_lease() {
        let guard = InFlightGuard::new();
        {
            let _lease = guard.acquire(EscrowId(7)).unwrap();
            assert!(guard.is_held(EscrowId(7)));
        }
        assert!(!guard.is_held(EscrowId(7)));
        assert!(guard.acquire(EscrowId(7)).is_ok());
    }

    #[test]
    fn concurrent_acquire_admits_one_at_a_time() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let guard = InFlightGuard::new();
        let barrier = std::sync::Barrier::new(8);
        let (admitted, holding, peak) = (
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
        );
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..50 {
                        if let Ok(lease) = guard.acquire(EscrowId(3)) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                            let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            assert_eq!(guard.in_flight(), 1);
                            std::thread::yield_now();
                            holding.fetch_sub(1, Ordering::SeqCst);
                            drop(lease);
                        }
                    }
                });
            }
        });
        assert!(admitted.load(Ordering::SeqCst) >= 1);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(guard.in_flight(), 0);
        assert_eq!(guard.first_held(), None);
    }

    #[test]
    fn first_held_reports_lowest_id() {
        let guard = InFlightGuard::new();
        let _a = guard.acquire(EscrowId(9)).unwrap();
        let _b = guard.acquire(EscrowId(4)).unwrap();
        assert_eq!(guard.first_held(), Some(EscrowId(4)));
    }
}
