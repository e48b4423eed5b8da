//! # Escrow: the canonical custody record
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  release   ┌──────────┐
//!   │ ACTIVE ├───────────▶│ RELEASED │
//!   └─┬────┬─┘            └──────────┘
//!     │    │ refund       ┌──────────┐
//!     │    └─────────────▶│ REFUNDED │
//!     │ fraud             └──────────┘
//!     ▼                         ▲
//!   ┌───────────────┐  forced   │
//!   │ FRAUD_FLAGGED ├───────────┘
//!   └───────────────┘
//! ```
//!
//! RELEASED and REFUNDED are terminal; the record is immutable once there.
//! FRAUD_FLAGGED only exists inside a fraud operation and is never committed
//! on its own: the same operation carries the escrow on to REFUNDED, leaving
//! `fraud_flagged` set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, EscrowId, EscrowLendError, PrincipalId, Result};

/// Lifecycle status of an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Funds held in engine custody (or pledged to the pool).
    Active,
    /// Funds paid out to the beneficiary. Terminal.
    Released,
    /// Funds returned to the depositor. Terminal.
    Refunded,
    /// Flagged by the Fraud Authority; forced refund pending.
    FraudFlagged,
}

impl EscrowStatus {
    /// Can an escrow in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Active,
                Self::Released | Self::Refunded | Self::FraudFlagged
            ) | (Self::FraudFlagged, Self::Refunded)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
            Self::FraudFlagged => write!(f, "FRAUD_FLAGGED"),
        }
    }
}

/// One escrow: value locked by `depositor` on behalf of `beneficiary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub depositor: PrincipalId,
    pub beneficiary: PrincipalId,
    /// Face amount held, in the value asset's smallest unit.
    pub amount: Amount,
    pub memo: String,
    pub status: EscrowStatus,
    /// Set by the Fraud Authority. Survives the transition to REFUNDED.
    pub fraud_flagged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Update counter, bumped on every committed mutation.
    pub version: u64,
}

impl Escrow {
    /// Build a new ACTIVE escrow, validating the party and amount invariants.
    ///
    /// # Errors
    /// - `InvalidParties` if beneficiary is null or equals depositor
    /// - `ZeroAmount` if amount is zero
    pub fn open(
        id: EscrowId,
        depositor: PrincipalId,
        beneficiary: PrincipalId,
        amount: Amount,
        memo: impl Into<String>,
    ) -> Result<Self> {
        Self::validate_terms(depositor, beneficiary, amount)?;
        let now = Utc::now();
        Ok(Self {
            id,
            depositor,
            beneficiary,
            amount,
            memo: memo.into(),
            status: EscrowStatus::Active,
            fraud_flagged: false,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    /// Party and amount checks shared by [`Escrow::open`] and callers that
    /// need to reject bad terms before doing anything else.
    ///
    /// # Errors
    /// - `InvalidParties` if beneficiary is null or equals depositor
    /// - `ZeroAmount` if amount is zero
    pub fn validate_terms(
        depositor: PrincipalId,
        beneficiary: PrincipalId,
        amount: Amount,
    ) -> Result<()> {
        if beneficiary.is_nil() {
            return Err(EscrowLendError::invalid_parties("beneficiary is null"));
        }
        if depositor.is_nil() {
            return Err(EscrowLendError::invalid_parties("depositor is null"));
        }
        if beneficiary == depositor {
            return Err(EscrowLendError::invalid_parties(
                "beneficiary must differ from depositor",
            ));
        }
        if amount.is_zero() {
            return Err(EscrowLendError::ZeroAmount);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EscrowStatus::Active
    }

    /// # Errors
    /// Returns `InvalidStatus` unless the escrow is ACTIVE.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(EscrowLendError::InvalidStatus {
                id: self.id,
                expected: EscrowStatus::Active,
                actual: self.status,
            })
        }
    }

    /// Move to `target`, enforcing the state machine.
    ///
    /// # Errors
    /// Returns `InvalidStatus` if the transition is not allowed.
    pub fn transition(&mut self, target: EscrowStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(EscrowLendError::InvalidStatus {
                id: self.id,
                expected: EscrowStatus::Active,
                actual: self.status,
            });
        }
        self.status = target;
        Ok(())
    }

    /// Flag as fraudulent (ACTIVE → FRAUD_FLAGGED).
    ///
    /// # Errors
    /// Returns `InvalidStatus` unless the escrow is ACTIVE.
    pub fn flag_fraud(&mut self) -> Result<()> {
        self.transition(EscrowStatus::FraudFlagged)?;
        self.fraud_flagged = true;
        Ok(())
    }

    /// Stamp a committed mutation.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.version += 1;
    }

    /// Whether `principal` is a party to this escrow.
    #[must_use]
    pub fn involves(&self, principal: PrincipalId) -> bool {
        self.depositor == principal || self.beneficiary == principal
    }
}

/// Dummy escrow for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Escrow {
    pub fn dummy(id: u64, amount: u128) -> Self {
        Self::open(
            EscrowId(id),
            PrincipalId::new(),
            PrincipalId::new(),
            Amount(amount),
            "dummy",
        )
        .expect("dummy escrow terms are valid")
    }
}
