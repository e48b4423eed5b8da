//! Value conservation audit.
//!
//! Invariants between the engine's records and the external balances it
//! controls:
//! ```text
//! custody(vault)  == Σ amount   of ACTIVE, non-collateralized escrows
//! pool.supplied   == Σ supplied of collateralized positions
//! pool.borrowed   == Σ borrowed of collateralized positions
//! ```
//!
//! Only meaningful while no operation is in flight. A violation means value
//! leaked or was double counted; it is reported as a critical error.

use escrowlend_types::{
    Amount, CollateralPosition, Escrow, EscrowLendError, PoolAccount, Result,
};

/// Expected and observed totals from one audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConservationReport {
    pub expected_custody: Amount,
    pub actual_custody: Amount,
    pub expected_supplied: Amount,
    pub expected_borrowed: Amount,
    pub pool: PoolAccount,
}

impl ConservationReport {
    /// Sum the engine's records.
    ///
    /// # Errors
    /// Returns `AmountOverflow` if a total does not fit.
    pub fn tally<'a>(
        records: impl IntoIterator<Item = (&'a Escrow, Option<&'a CollateralPosition>)>,
        actual_custody: Amount,
        pool: PoolAccount,
    ) -> Result<Self> {
        let mut report = Self {
            actual_custody,
            pool,
            ..Self::default()
        };
        for (escrow, position) in records {
            match position.filter(|p| p.is_collateralized) {
                Some(p) => {
                    report.expected_supplied = report.expected_supplied.checked_add(p.supplied)?;
                    report.expected_borrowed = report.expected_borrowed.checked_add(p.borrowed)?;
                }
                None if escrow.is_active() => {
                    report.expected_custody = report.expected_custody.checked_add(escrow.amount)?;
                }
                None => {}
            }
        }
        Ok(report)
    }

    /// # Errors
    /// Returns `ConservationViolation` describing every mismatched total.
    pub fn verify(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.actual_custody != self.expected_custody {
            problems.push(format!(
                "custody {} != expected {}",
                self.actual_custody, self.expected_custody
            ));
        }
        if self.pool.supplied != self.expected_supplied {
            problems.push(format!(
                "pool supplied {} != expected {}",
                self.pool.supplied, self.expected_supplied
            ));
        }
        if self.pool.borrowed != self.expected_borrowed {
            problems.push(format!(
                "pool borrowed {} != expected {}",
                self.pool.borrowed, self.expected_borrowed
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(EscrowLendError::ConservationViolation {
                reason: problems.join("; "),
            })
        }
    }
}
