//! Tiered compliance gate.
//!
//! Every principal has a [`ComplianceRecord`]: a verification level that
//! sets its per-escrow limit, an AML risk score, and a blacklist bit.
//! Unknown principals are treated as unverified.
//!
//! An escrow is flagged when any of these hold:
//!
//! - either party is blacklisted
//! - the amount exceeds the depositor's transaction limit
//! - either party's risk score is at or above the flag threshold
//!
//! The gate fails closed: a bad record never clears an escrow.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use escrowlend_types::{
    Amount, ComplianceConfig, ComplianceRecord, ComplianceVerdict, EscrowId, EscrowLendError,
    PrincipalId, Result, VerificationLevel, constants,
};

use crate::gate::ComplianceGate;

/// Compliance gate backed by per-principal records.
pub struct TieredComplianceGate {
    config: ComplianceConfig,
    records: RwLock<HashMap<PrincipalId, ComplianceRecord>>,
}

impl TieredComplianceGate {
    /// # Errors
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(config: ComplianceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            records: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ComplianceConfig {
        &self.config
    }

    /// The record for `principal`, or an unverified default.
    #[must_use]
    pub fn record(&self, principal: PrincipalId) -> ComplianceRecord {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&principal)
            .cloned()
            .unwrap_or_else(|| ComplianceRecord::unverified(principal, &self.config.tier_limits))
    }

    /// Set a principal's verification level. The transaction limit follows
    /// the level.
    pub fn verify(&self, principal: PrincipalId, level: VerificationLevel) {
        let limit = self.config.tier_limits[level.index()];
        self.update(principal, |r| {
            r.level = level;
            r.transaction_limit = limit;
        });
        tracing::info!(principal = %principal.short(), %level, %limit, "principal verified");
    }

    /// # Errors
    /// Returns `Configuration` if `score` is above the maximum.
    pub fn set_risk_score(&self, principal: PrincipalId, score: u8) -> Result<()> {
        if score > constants::MAX_RISK_SCORE {
            return Err(EscrowLendError::Configuration(format!(
                "risk score {score} exceeds {}",
                constants::MAX_RISK_SCORE
            )));
        }
        self.update(principal, |r| r.risk_score = score);
        tracing::debug!(principal = %principal.short(), score, "risk score updated");
        Ok(())
    }

    pub fn blacklist(&self, principal: PrincipalId) {
        self.update(principal, |r| r.blacklisted = true);
        tracing::warn!(principal = %principal.short(), "principal blacklisted");
    }

    pub fn unblacklist(&self, principal: PrincipalId) {
        self.update(principal, |r| r.blacklisted = false);
    }

    fn update(&self, principal: PrincipalId, f: impl FnOnce(&mut ComplianceRecord)) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .entry(principal)
            .or_insert_with(|| ComplianceRecord::unverified(principal, &self.config.tier_limits));
        f(record);
    }

    fn screen(&self, depositor: PrincipalId, beneficiary: PrincipalId, amount: Amount) -> Option<String> {
        let dep = self.record(depositor);
        let ben = self.record(beneficiary);

        if dep.blacklisted {
            return Some("depositor is blacklisted".into());
        }
        if ben.blacklisted {
            return Some("beneficiary is blacklisted".into());
        }
        if amount > dep.transaction_limit {
            return Some(format!(
                "amount {amount} exceeds depositor {} limit {}",
                dep.level, dep.transaction_limit
            ));
        }
        let threshold = self.config.risk_flag_threshold;
        if dep.risk_score >= threshold {
            return Some(format!("depositor risk score {} >= {threshold}", dep.risk_score));
        }
        if ben.risk_score >= threshold {
            return Some(format!("beneficiary risk score {} >= {threshold}", ben.risk_score));
        }
        None
    }
}

impl ComplianceGate for TieredComplianceGate {
    fn check_escrow(
        &self,
        escrow_id: EscrowId,
        depositor: PrincipalId,
        beneficiary: PrincipalId,
        amount: Amount,
    ) -> ComplianceVerdict {
        match self.screen(depositor, beneficiary, amount) {
            None => ComplianceVerdict::clear(),
            Some(reason) => {
                tracing::warn!(escrow = %escrow_id, %reason, "compliance flagged escrow");
                ComplianceVerdict::flagged(reason)
            }
        }
    }
}
