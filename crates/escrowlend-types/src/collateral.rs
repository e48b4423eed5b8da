//! Collateral sub-ledger types.
//!
//! A [`CollateralPosition`] is created lazily the first time an escrow is
//! pledged to the lending pool. It tracks what the engine supplied to the
//! pool on the escrow's behalf and what the depositor has drawn against it.
//!
//! Invariant, at every committed version:
//! ```text
//! borrowed ≤ floor(supplied × MAX_LTV_BPS / 10_000)
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Amount, EscrowId, EscrowLendError, Result, constants};

/// Per-escrow collateral and debt record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralPosition {
    pub escrow_id: EscrowId,
    pub is_collateralized: bool,
    /// Amount pledged to the pool. Equals the escrow amount once pledged.
    pub supplied: Amount,
    /// Outstanding debt drawn against the pledge.
    pub borrowed: Amount,
    pub last_updated: DateTime<Utc>,
    /// Update counter, bumped on every committed mutation.
    pub version: u64,
}

impl CollateralPosition {
    /// A fresh, unpledged position.
    #[must_use]
    pub fn new(escrow_id: EscrowId) -> Self {
        Self {
            escrow_id,
            is_collateralized: false,
            supplied: Amount::ZERO,
            borrowed: Amount::ZERO,
            last_updated: Utc::now(),
            version: 0,
        }
    }

    /// `floor(supplied × 80%)`, or zero when not pledged.
    #[must_use]
    pub fn borrow_limit(&self) -> Amount {
        if self.is_collateralized {
            self.supplied.apply_bps(constants::MAX_LTV_BPS)
        } else {
            Amount::ZERO
        }
    }

    /// Remaining borrowing capacity, clamped at zero.
    #[must_use]
    pub fn available_to_borrow(&self) -> Amount {
        self.borrow_limit().saturating_sub(self.borrowed)
    }

    /// Whether the LTV invariant holds.
    #[must_use]
    pub fn within_ltv(&self) -> bool {
        self.borrowed <= self.borrow_limit()
    }

    /// Pledge `amount` (unpledged → pledged, debt reset to zero).
    ///
    /// # Errors
    /// Returns `AlreadyCollateralized` if already pledged.
    pub fn pledge(&mut self, amount: Amount) -> Result<()> {
        if self.is_collateralized {
            return Err(EscrowLendError::AlreadyCollateralized(self.escrow_id));
        }
        self.is_collateralized = true;
        self.supplied = amount;
        self.borrowed = Amount::ZERO;
        Ok(())
    }

    /// Add `amount` to the debt, enforcing the LTV bound.
    ///
    /// # Errors
    /// - `NotCollateralized` if not pledged
    /// - `ExceedsBorrowLimit` if the new debt would exceed the limit
    pub fn record_borrow(&mut self, amount: Amount) -> Result<()> {
        self.ensure_collateralized()?;
        let available = self.available_to_borrow();
        if amount > available {
            return Err(EscrowLendError::ExceedsBorrowLimit {
                requested: amount,
                available,
            });
        }
        self.borrowed = self.borrowed.checked_add(amount)?;
        Ok(())
    }

    /// Subtract `amount` from the debt. Overpayment is rejected.
    ///
    /// # Errors
    /// - `NotCollateralized` if not pledged
    /// - `RepayExceedsDebt` if `amount > borrowed`
    pub fn record_repay(&mut self, amount: Amount) -> Result<()> {
        self.ensure_collateralized()?;
        if amount > self.borrowed {
            return Err(EscrowLendError::RepayExceedsDebt {
                amount,
                borrowed: self.borrowed,
            });
        }
        self.borrowed = self.borrowed.checked_sub(amount)?;
        Ok(())
    }

    /// Close the pledge. Requires all debt cleared.
    ///
    /// Returns the amount that was supplied (to be withdrawn from the pool).
    ///
    /// # Errors
    /// - `NotCollateralized` if not pledged
    /// - `OutstandingDebtExists` if `borrowed > 0`
    pub fn unwind(&mut self) -> Result<Amount> {
        self.ensure_collateralized()?;
        if !self.borrowed.is_zero() {
            return Err(EscrowLendError::OutstandingDebtExists {
                borrowed: self.borrowed,
            });
        }
        let supplied = self.supplied;
        self.is_collateralized = false;
        self.supplied = Amount::ZERO;
        Ok(supplied)
    }

    /// Close the pledge unconditionally, netting any debt against the
    /// collateral.
    ///
    /// Returns `(net_collateral, written_off_debt)`.
    ///
    /// # Errors
    /// Returns `NotCollateralized` if not pledged.
    pub fn force_unwind(&mut self) -> Result<(Amount, Amount)> {
        self.ensure_collateralized()?;
        let debt = self.borrowed;
        let net = self.supplied.checked_sub(debt)?;
        self.is_collateralized = false;
        self.supplied = Amount::ZERO;
        self.borrowed = Amount::ZERO;
        Ok((net, debt))
    }

    /// # Errors
    /// Returns `NotCollateralized` if not pledged.
    pub fn ensure_collateralized(&self) -> Result<()> {
        if self.is_collateralized {
            Ok(())
        } else {
            Err(EscrowLendError::NotCollateralized(self.escrow_id))
        }
    }

    /// Stamp a committed mutation.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_updated = at;
        self.version += 1;
    }

    /// Read-only view for callers.
    #[must_use]
    pub fn info(&self) -> CollateralInfo {
        CollateralInfo {
            escrow_id: self.escrow_id,
            is_collateralized: self.is_collateralized,
            supplied: self.supplied,
            borrowed: self.borrowed,
            borrow_limit: self.borrow_limit(),
            available_to_borrow: self.available_to_borrow(),
            current_ltv: self.borrowed.percent_of(self.supplied),
            last_updated: self.last_updated,
            version: self.version,
        }
    }
}

/// Snapshot returned by `get_collateral_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralInfo {
    pub escrow_id: EscrowId,
    pub is_collateralized: bool,
    pub supplied: Amount,
    pub borrowed: Amount,
    pub borrow_limit: Amount,
    pub available_to_borrow: Amount,
    /// Current LTV as a percentage (e.g. `62.5`). Display only.
    pub current_ltv: Decimal,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
}
