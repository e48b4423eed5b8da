//! Append-only audit trail types.
//!
//! Every committed mutation produces an [`EscrowEvent`]. Events are chained:
//! each carries the SHA-256 of its predecessor, so a dropped or edited entry
//! breaks every hash after it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Amount, EscrowId, PrincipalId, constants};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    EscrowCreated,
    Collateralized,
    Borrowed,
    Repaid,
    Released,
    Refunded,
    FraudFlagged,
    DebtWrittenOff,
    AuthorityUpdated,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EscrowCreated => "ESCROW_CREATED",
            Self::Collateralized => "COLLATERALIZED",
            Self::Borrowed => "BORROWED",
            Self::Repaid => "REPAID",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
            Self::FraudFlagged => "FRAUD_FLAGGED",
            Self::DebtWrittenOff => "DEBT_WRITTEN_OFF",
            Self::AuthorityUpdated => "AUTHORITY_UPDATED",
        };
        f.write_str(s)
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
    /// Position in the ledger, starting at 1.
    pub seq: u64,
    pub kind: EventKind,
    /// `None` for engine-wide events (authority updates).
    pub escrow_id: Option<EscrowId>,
    pub actor: PrincipalId,
    pub amount: Amount,
    /// Escrow record version after the mutation (0 for engine-wide events).
    pub record_version: u64,
    pub at: DateTime<Utc>,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl EscrowEvent {
    /// Build an event and seal it onto `prev_hash`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn sealed(
        seq: u64,
        kind: EventKind,
        escrow_id: Option<EscrowId>,
        actor: PrincipalId,
        amount: Amount,
        record_version: u64,
        at: DateTime<Utc>,
        prev_hash: [u8; 32],
    ) -> Self {
        let mut event = Self {
            seq,
            kind,
            escrow_id,
            actor,
            amount,
            record_version,
            at,
            prev_hash,
            hash: [0u8; 32],
        };
        event.hash = event.compute_hash();
        event
    }

    /// SHA-256 over the canonical encoding:
    /// `domain || seq || kind || escrow_id || actor || amount || version || at_micros || prev_hash`.
    #[must_use]
    pub fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(constants::EVENT_HASH_DOMAIN);
        hasher.update(self.seq.to_le_bytes());
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update(self.escrow_id.map_or(0, |id| id.0).to_le_bytes());
        hasher.update(self.actor.0.as_bytes());
        hasher.update(self.amount.units().to_le_bytes());
        hasher.update(self.record_version.to_le_bytes());
        hasher.update(self.at.timestamp_micros().to_le_bytes());
        hasher.update(self.prev_hash);
        hasher.finalize().into()
    }

    /// Whether the stored hash matches the contents.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Short hex form of the hash for log fields.
    #[must_use]
    pub fn short_hash(&self) -> String {
        hex::encode(&self.hash[..8])
    }
}

/// Debt netted against collateral during a forced unwind. The debtor keeps
/// the borrowed value; this is the record of that liability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtWriteOff {
    pub escrow_id: EscrowId,
    pub debtor: PrincipalId,
    pub amount: Amount,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u64, prev: [u8; 32]) -> EscrowEvent {
        EscrowEvent::sealed(
            seq,
            EventKind::Borrowed,
            Some(EscrowId(1)),
            PrincipalId::from_bytes([7u8; 16]),
            Amount(5_000),
            3,
            Utc::now(),
            prev,
        )
    }

    #[test]
    fn sealed_event_is_intact() {
        let e = event(1, [0u8; 32]);
        assert!(e.is_intact());
        assert_eq!(e.short_hash().len(), 16);
    }

    #[test]
    fn tampering_breaks_hash() {
        let mut e = event(1, [0u8; 32]);
        e.amount = Amount(5_001);
        assert!(!e.is_intact());
    }

    #[test]
    fn hash_depends_on_predecessor() {
        let at = Utc::now();
        let a = EscrowEvent::sealed(
            2,
            EventKind::Repaid,
            Some(EscrowId(1)),
            PrincipalId::NIL,
            Amount(1),
            1,
            at,
            [1u8; 32],
        );
        let b = EscrowEvent::sealed(
            2,
            EventKind::Repaid,
            Some(EscrowId(1)),
            PrincipalId::NIL,
            Amount(1),
            1,
            at,
            [2u8; 32],
        );
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn kind_display() {
        assert_eq!(EventKind::DebtWrittenOff.to_string(), "DEBT_WRITTEN_OFF");
    }
}
