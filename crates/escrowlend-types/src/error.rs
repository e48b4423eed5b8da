//! Error types for the EscrowLend engine.
//!
//! All errors use the `EL_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Escrow lifecycle errors
//! - 2xx: Collateral / borrowing errors
//! - 3xx: Custody and lending pool errors
//! - 4xx: Compliance and authority errors
//! - 9xx: General / internal errors
//!
//! Every error is raised before any effect is observable: an operation that
//! returns `Err` has left the ledger exactly as it found it.

use thiserror::Error;

use crate::{Amount, EscrowId, EscrowStatus};

/// Central error enum for all EscrowLend operations.
#[derive(Debug, Error)]
pub enum EscrowLendError {
    // =================================================================
    // Escrow Lifecycle Errors (1xx)
    // =================================================================
    /// No escrow exists under this id.
    #[error("EL_ERR_100: Escrow not found: {0}")]
    EscrowNotFound(EscrowId),

    /// Beneficiary equals depositor, or is the null principal.
    #[error("EL_ERR_101: Invalid parties: {reason}")]
    InvalidParties { reason: String },

    /// An amount that must be positive was zero.
    #[error("EL_ERR_102: Amount must be greater than zero")]
    ZeroAmount,

    /// The escrow is not in a state that permits this operation.
    #[error("EL_ERR_103: Invalid escrow status for {id}: expected {expected}, got {actual}")]
    InvalidStatus {
        id: EscrowId,
        expected: EscrowStatus,
        actual: EscrowStatus,
    },

    /// Another operation on this escrow is in flight (or this call is
    /// reentrant from inside one).
    #[error("EL_ERR_104: Escrow {0} is locked by an in-flight operation")]
    EscrowLocked(EscrowId),

    // =================================================================
    // Collateral / Borrowing Errors (2xx)
    // =================================================================
    /// The escrow is already pledged to the pool.
    #[error("EL_ERR_200: Escrow {0} is already collateralized")]
    AlreadyCollateralized(EscrowId),

    /// The escrow has not been pledged to the pool.
    #[error("EL_ERR_201: Escrow {0} is not collateralized")]
    NotCollateralized(EscrowId),

    /// The borrow would breach the LTV bound.
    #[error("EL_ERR_202: Exceeds borrow limit: requested {requested}, available {available}")]
    ExceedsBorrowLimit { requested: Amount, available: Amount },

    /// Release attempted while debt is outstanding.
    #[error("EL_ERR_203: Outstanding debt exists: {borrowed} still borrowed")]
    OutstandingDebtExists { borrowed: Amount },

    /// Repayment larger than the outstanding debt.
    #[error("EL_ERR_204: Repay exceeds debt: repaying {amount}, outstanding {borrowed}")]
    RepayExceedsDebt { amount: Amount, borrowed: Amount },

    /// Checked arithmetic overflowed or underflowed.
    #[error("EL_ERR_205: Amount arithmetic overflow")]
    AmountOverflow,

    // =================================================================
    // Custody / Pool Errors (3xx)
    // =================================================================
    /// A custody transfer or lending pool call did not succeed.
    #[error("EL_ERR_300: Custody transfer failed: {reason}")]
    CustodyTransferFailed { reason: String },

    /// Rolling back a partially applied operation failed. The ledger needs
    /// manual reconciliation. Critical.
    #[error("EL_ERR_301: Compensation failed for {id}: {reason}")]
    CompensationFailed { id: EscrowId, reason: String },

    /// The conservation audit found custody or pool balances that do not
    /// match the escrow records. Critical.
    #[error("EL_ERR_302: Conservation invariant violation: {reason}")]
    ConservationViolation { reason: String },

    // =================================================================
    // Compliance / Authority Errors (4xx)
    // =================================================================
    /// The compliance gate flagged the escrow at creation.
    #[error("EL_ERR_400: Compliance rejected: {reason}")]
    ComplianceRejected { reason: String },

    /// Caller is not the principal this operation requires.
    #[error("EL_ERR_401: Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Fraud flagging attempted with no Fraud Authority configured.
    #[error("EL_ERR_402: Fraud authority not configured")]
    AuthorityNotConfigured,

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("EL_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("EL_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("EL_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl EscrowLendError {
    /// Shorthand for a custody/pool failure.
    pub fn custody(reason: impl Into<String>) -> Self {
        Self::CustodyTransferFailed {
            reason: reason.into(),
        }
    }

    /// Shorthand for an authorization failure.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Shorthand for a party validation failure.
    pub fn invalid_parties(reason: impl Into<String>) -> Self {
        Self::InvalidParties {
            reason: reason.into(),
        }
    }

    /// Numeric code, e.g. `203` for `OutstandingDebtExists`.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::EscrowNotFound(_) => 100,
            Self::InvalidParties { .. } => 101,
            Self::ZeroAmount => 102,
            Self::InvalidStatus { .. } => 103,
            Self::EscrowLocked(_) => 104,
            Self::AlreadyCollateralized(_) => 200,
            Self::NotCollateralized(_) => 201,
            Self::ExceedsBorrowLimit { .. } => 202,
            Self::OutstandingDebtExists { .. } => 203,
            Self::RepayExceedsDebt { .. } => 204,
            Self::AmountOverflow => 205,
            Self::CustodyTransferFailed { .. } => 300,
            Self::CompensationFailed { .. } => 301,
            Self::ConservationViolation { .. } => 302,
            Self::ComplianceRejected { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::AuthorityNotConfigured => 402,
            Self::Internal(_) => 900,
            Self::Serialization(_) => 901,
            Self::Configuration(_) => 902,
        }
    }

    /// Whether this error means the ledger may be inconsistent and needs an
    /// operator. Everything else is a clean rejection.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::CompensationFailed { .. } | Self::ConservationViolation { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, EscrowLendError>;

impl From<serde_json::Error> for EscrowLendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = EscrowLendError::EscrowNotFound(EscrowId(7));
        let msg = format!("{err}");
        assert!(msg.starts_with("EL_ERR_100"), "Got: {msg}");
        assert!(msg.contains("escrow:7"));
    }

    #[test]
    fn exceeds_borrow_limit_display() {
        let err = EscrowLendError::ExceedsBorrowLimit {
            requested: Amount(8_001),
            available: Amount(8_000),
        };
        let msg = format!("{err}");
        assert!(msg.contains("EL_ERR_202"));
        assert!(msg.contains("8001"));
        assert!(msg.contains("8000"));
    }

    #[test]
    fn invalid_status_display() {
        let err = EscrowLendError::InvalidStatus {
            id: EscrowId(1),
            expected: EscrowStatus::Active,
            actual: EscrowStatus::Released,
        };
        let msg = format!("{err}");
        assert!(msg.contains("ACTIVE"));
        assert!(msg.contains("RELEASED"));
    }

    #[test]
    fn code_matches_display_prefix() {
        let errors = vec![
            EscrowLendError::ZeroAmount,
            EscrowLendError::AuthorityNotConfigured,
            EscrowLendError::AmountOverflow,
            EscrowLendError::custody("pool offline"),
            EscrowLendError::unauthorized("not depositor"),
            EscrowLendError::OutstandingDebtExists {
                borrowed: Amount(1),
            },
            EscrowLendError::Internal("test".into()),
        ];
        for err in errors {
            let msg = format!("{err}");
            let expected = format!("EL_ERR_{}", err.code());
            assert!(msg.starts_with(&expected), "{msg} vs {expected}");
        }
    }

    #[test]
    fn only_reconciliation_errors_are_critical() {
        assert!(
            EscrowLendError::CompensationFailed {
                id: EscrowId(1),
                reason: "x".into()
            }
            .is_critical()
        );
        assert!(!EscrowLendError::ZeroAmount.is_critical());
        assert!(!EscrowLendError::custody("x").is_critical());
    }
}
