//! Append-only, hash-chained event ledger.
//!
//! Every committed mutation appends one [`EscrowEvent`] sealed onto the
//! hash of its predecessor. The ledger keeps a bounded window in memory
//! (oldest evicted first, like an LRU cache with no hits) but the chain
//! head always reflects every event ever appended.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use escrowlend_types::{
    Amount, EscrowEvent, EscrowId, EscrowLendError, EventKind, PrincipalId, Result,
};

/// Bounded hash-chained event log.
#[derive(Debug)]
pub struct EventLedger {
    events: VecDeque<EscrowEvent>,
    capacity: usize,
    next_seq: u64,
    head: [u8; 32],
}

impl EventLedger {
    /// # Errors
    /// Returns `Configuration` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EscrowLendError::Configuration(
                "event ledger capacity must be > 0".into(),
            ));
        }
        Ok(Self {
            events: VecDeque::with_capacity(capacity.min(1_024)),
            capacity,
            next_seq: 1,
            head: [0u8; 32],
        })
    }

    /// Seal and append an event. Returns the stored event.
    pub fn append(
        &mut self,
        kind: EventKind,
        escrow_id: Option<EscrowId>,
        actor: PrincipalId,
        amount: Amount,
        record_version: u64,
        at: DateTime<Utc>,
    ) -> &EscrowEvent {
        let event = EscrowEvent::sealed(
            self.next_seq,
            kind,
            escrow_id,
            actor,
            amount,
            record_version,
            at,
            self.head,
        );
        self.next_seq += 1;
        self.head = event.hash;

        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        tracing::trace!(seq = event.seq, %kind, hash = %event.short_hash(), "ledger append");
        self.events.push_back(event);
        &self.events[self.events.len() - 1]
    }

    /// Hash of the newest event, or all zeros when empty.
    #[must_use]
    pub fn head(&self) -> [u8; 32] {
        self.head
    }

    /// Events appended since genesis, including evicted ones.
    #[must_use]
    pub fn total_appended(&self) -> u64 {
        self.next_seq - 1
    }

    /// Retained events touching `escrow_id`, oldest first.
    #[must_use]
    pub fn for_escrow(&self, escrow_id: EscrowId) -> Vec<EscrowEvent> {
        self.events
            .iter()
            .filter(|e| e.escrow_id == Some(escrow_id))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EscrowEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Recompute every retained hash and check each link.
    ///
    /// # Errors
    /// Returns `Internal` naming the first broken entry.
    pub fn verify_chain(&self) -> Result<()> {
        let mut prev: Option<&EscrowEvent> = None;
        for event in &self.events {
            if !event.is_intact() {
                return Err(EscrowLendError::Internal(format!(
                    "ledger event {} hash mismatch",
                    event.seq
                )));
            }
            if let Some(p) = prev {
                if event.prev_hash != p.hash || event.seq != p.seq + 1 {
                    return Err(EscrowLendError::Internal(format!(
                        "ledger chain broken between {} and {}",
                        p.seq, event.seq
                    )));
                }
            }
            prev = Some(event);
        }
        match prev {
            Some(last) if last.hash != self.head => Err(EscrowLendError::Internal(
                "ledger head does not match newest event".into(),
            )),
            _ => Ok(()),
        }
    }
}
