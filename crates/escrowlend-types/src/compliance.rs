//! Compliance records and verdicts.
//!
//! Owned by the compliance gate. The engine only ever sees a
//! [`ComplianceVerdict`].

use serde::{Deserialize, Serialize};

use crate::{Amount, EscrowLendError, PrincipalId, Result, constants};

/// KYC verification tier, 0 (unverified) through 3 (institutional).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct VerificationLevel(u8);

impl VerificationLevel {
    pub const UNVERIFIED: Self = Self(0);
    pub const BASIC: Self = Self(1);
    pub const ENHANCED: Self = Self(2);
    pub const INSTITUTIONAL: Self = Self(3);

    /// # Errors
    /// Returns `Configuration` for levels above 3.
    pub fn new(level: u8) -> Result<Self> {
        if usize::from(level) < constants::VERIFICATION_TIERS {
            Ok(Self(level))
        } else {
            Err(EscrowLendError::Configuration(format!(
                "verification level {level} out of range 0..={}",
                constants::VERIFICATION_TIERS - 1
            )))
        }
    }

    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl TryFrom<u8> for VerificationLevel {
    type Error = EscrowLendError;

    fn try_from(level: u8) -> Result<Self> {
        Self::new(level)
    }
}

impl From<VerificationLevel> for u8 {
    fn from(level: VerificationLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Per-principal compliance state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub principal: PrincipalId,
    pub level: VerificationLevel,
    /// Maximum single escrow amount, derived from `level`.
    pub transaction_limit: Amount,
    /// AML risk score, 0..=100.
    pub risk_score: u8,
    pub blacklisted: bool,
}

impl ComplianceRecord {
    /// Record for a principal nobody has verified.
    #[must_use]
    pub fn unverified(
        principal: PrincipalId,
        tier_limits: &[Amount; constants::VERIFICATION_TIERS],
    ) -> Self {
        Self {
            principal,
            level: VerificationLevel::UNVERIFIED,
            transaction_limit: tier_limits[0],
            risk_score: 0,
            blacklisted: false,
        }
    }
}

/// Outcome of a compliance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub is_flagged: bool,
    /// Why the escrow was flagged. Empty when clear.
    pub reason: String,
}

impl ComplianceVerdict {
    #[must_use]
    pub fn clear() -> Self {
        Self {
            is_flagged: false,
            reason: String::new(),
        }
    }

    #[must_use]
    pub fn flagged(reason: impl Into<String>) -> Self {
        Self {
            is_flagged: true,
            reason: reason.into(),
        }
    }

    /// Turn a flagged verdict into `ComplianceRejected`.
    ///
    /// # Errors
    /// Returns `ComplianceRejected` carrying the reason if flagged.
    pub fn into_result(self) -> Result<()> {
        if self.is_flagged {
            Err(EscrowLendError::ComplianceRejected {
                reason: self.reason,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_range() {
        assert!(VerificationLevel::new(3).is_ok());
        assert!(matches!(
            VerificationLevel::new(4),
            Err(EscrowLendError::Configuration(_))
        ));
        assert_eq!(VerificationLevel::ENHANCED.index(), 2);
    }

    #[test]
    fn level_deserialize_rejects_out_of_range() {
        let ok: VerificationLevel = serde_json::from_str("2").unwrap();
        assert_eq!(ok, VerificationLevel::ENHANCED);
        assert!(serde_json::from_str::<VerificationLevel>("9").is_err());
    }

    #[test]
    fn verdict_into_result() {
        assert!(ComplianceVerdict::clear().into_result().is_ok());
        let err = ComplianceVerdict::flagged("blacklisted")
            .into_result()
            .unwrap_err();
        assert!(
            matches!(err, EscrowLendError::ComplianceRejected { ref reason } if reason == "blacklisted")
        );
    }
}
