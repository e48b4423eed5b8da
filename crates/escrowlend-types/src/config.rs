//! Configuration types for the engine and its collaborators.
//!
//! Authorities are explicit configuration handed to the engine at
//! construction. Nothing here is a process-wide global.

use serde::{Deserialize, Serialize};

use crate::{Amount, EscrowLendError, PrincipalId, Result, constants};

/// Engine construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// May update the fraud authority.
    pub owner: PrincipalId,
    /// Custody account holding escrowed value on the engine's behalf.
    pub custody_account: PrincipalId,
    /// `None` disables fraud flagging entirely.
    #[serde(default)]
    pub fraud_authority: Option<PrincipalId>,
    /// Ledger events kept in memory.
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,
}

fn default_journal_capacity() -> usize {
    constants::DEFAULT_JOURNAL_CAPACITY
}

impl EngineConfig {
    /// Config with fresh owner and custody principals and no fraud authority.
    #[must_use]
    pub fn new(owner: PrincipalId, custody_account: PrincipalId) -> Self {
        Self {
            owner,
            custody_account,
            fraud_authority: None,
            journal_capacity: constants::DEFAULT_JOURNAL_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_fraud_authority(mut self, authority: PrincipalId) -> Self {
        self.fraud_authority = Some(authority);
        self
    }

    /// Parse and validate a JSON config.
    ///
    /// # Errors
    /// `Serialization` for malformed JSON, `Configuration` for invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns `Configuration` if principals are null or collide.
    pub fn validate(&self) -> Result<()> {
        if self.owner.is_nil() || self.custody_account.is_nil() {
            return Err(EscrowLendError::Configuration(
                "owner and custody_account must be set".into(),
            ));
        }
        if self.owner == self.custody_account {
            return Err(EscrowLendError::Configuration(
                "custody_account must differ from owner".into(),
            ));
        }
        if self.fraud_authority.is_some_and(|a| a.is_nil() || a == self.custody_account) {
            return Err(EscrowLendError::Configuration(
                "fraud_authority must be a real, non-custody principal".into(),
            ));
        }
        if self.journal_capacity == 0 {
            return Err(EscrowLendError::Configuration(
                "journal_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Compliance gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Per-transaction limit for verification levels 0..=3.
    pub tier_limits: [Amount; constants::VERIFICATION_TIERS],
    /// Risk score at or above which a party is flagged.
    pub risk_flag_threshold: u8,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            tier_limits: constants::DEFAULT_TIER_LIMITS.map(Amount),
            risk_flag_threshold: constants::DEFAULT_RISK_FLAG_THRESHOLD,
        }
    }
}

impl ComplianceConfig {
    /// # Errors
    /// Returns `Configuration` if limits are not non-decreasing or the
    /// threshold is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.tier_limits.windows(2).any(|w| w[0] > w[1]) {
            return Err(EscrowLendError::Configuration(
                "tier_limits must be non-decreasing by level".into(),
            ));
        }
        if self.risk_flag_threshold > constants::MAX_RISK_SCORE {
            return Err(EscrowLendError::Configuration(format!(
                "risk_flag_threshold must be <= {}",
                constants::MAX_RISK_SCORE
            )));
        }
        Ok(())
    }
}

/// Custodial lending pool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Custody account holding the pool's liquidity and supplied collateral.
    pub reserve_account: PrincipalId,
    /// Pool-side LTV ceiling on the aggregate account, in bps.
    #[serde(default = "default_pool_ltv")]
    pub max_ltv_bps: u16,
}

fn default_pool_ltv() -> u16 {
    constants::MAX_LTV_BPS
}

impl PoolConfig {
    #[must_use]
    pub fn new(reserve_account: PrincipalId) -> Self {
        Self {
            reserve_account,
            max_ltv_bps: constants::MAX_LTV_BPS,
        }
    }

    /// The pool ceiling must admit every draw the engine's own 80% bound
    /// allows, and stay a fraction of the collateral.
    ///
    /// # Errors
    /// Returns `Configuration` for a nil reserve or an LTV ceiling outside
    /// `MAX_LTV_BPS..=BPS_DENOMINATOR`.
    pub fn validate(&self) -> Result<()> {
        if self.reserve_account.is_nil() {
            return Err(EscrowLendError::Configuration(
                "reserve_account must be set".into(),
            ));
        }
        if self.max_ltv_bps < constants::MAX_LTV_BPS
            || u128::from(self.max_ltv_bps) > constants::BPS_DENOMINATOR
        {
            return Err(EscrowLendError::Configuration(format!(
                "pool max_ltv_bps must be within {}..={}, got {}",
                constants::MAX_LTV_BPS,
                constants::BPS_DENOMINATOR,
                self.max_ltv_bps
            )));
        }
        Ok(())
    }
}
