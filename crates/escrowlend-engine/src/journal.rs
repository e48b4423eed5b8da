//! Compensation journal for multi-step external effects.
//!
//! An engine operation may need several custody transfers and pool calls.
//! Each one that succeeds is recorded with its inverse. If a later step
//! fails, the recorded steps are undone newest first, so the operation as a
//! whole either completes or leaves custody and pool balances as they were.
//!
//! `settle_with_collateral` has no inverse and must be the final step.

use std::fmt;

use escrowlend_custody::{LendingPool, ValueCustody};
use escrowlend_types::{Amount, EscrowId, EscrowLendError, PrincipalId, Result};

/// One applied external effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Transfer {
        from: PrincipalId,
        to: PrincipalId,
        amount: Amount,
    },
    Supply(Amount),
    Withdraw(Amount),
    Borrow(Amount),
    Repay(Amount),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer { from, to, amount } => {
                write!(f, "transfer {amount} {} -> {}", from.short(), to.short())
            }
            Self::Supply(a) => write!(f, "pool supply {a}"),
            Self::Withdraw(a) => write!(f, "pool withdraw {a}"),
            Self::Borrow(a) => write!(f, "pool borrow {a}"),
            Self::Repay(a) => write!(f, "pool repay {a}"),
        }
    }
}

/// Applies external effects for one escrow and undoes them on failure.
///
/// Pool calls always route value through `vault`, the engine's custody
/// account.
pub struct Journal<'a> {
    escrow_id: EscrowId,
    vault: PrincipalId,
    custody: &'a dyn ValueCustody,
    pool: &'a dyn LendingPool,
    applied: Vec<Step>,
}

impl<'a> Journal<'a> {
    pub fn new(
        escrow_id: EscrowId,
        vault: PrincipalId,
        custody: &'a dyn ValueCustody,
        pool: &'a dyn LendingPool,
    ) -> Self {
        Self {
            escrow_id,
            vault,
            custody,
            pool,
            applied: Vec::new(),
        }
    }

    /// Run `steps`. On error every applied step is compensated and the
    /// original error returned, or `CompensationFailed` if an undo failed.
    ///
    /// # Errors
    /// The first step error, or `CompensationFailed`.
    pub fn execute(&mut self, steps: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        match steps(self) {
            Ok(()) => {
                self.applied.clear();
                Ok(())
            }
            Err(cause) => Err(self.rollback(cause)),
        }
    }

    pub fn transfer(&mut self, from: PrincipalId, to: PrincipalId, amount: Amount) -> Result<()> {
        self.apply(Step::Transfer { from, to, amount })
    }

    pub fn supply(&mut self, amount: Amount) -> Result<()> {
        self.apply(Step::Supply(amount))
    }

    pub fn withdraw(&mut self, amount: Amount) -> Result<()> {
        self.apply(Step::Withdraw(amount))
    }

    pub fn borrow(&mut self, amount: Amount) -> Result<()> {
        self.apply(Step::Borrow(amount))
    }

    pub fn repay(&mut self, amount: Amount) -> Result<()> {
        self.apply(Step::Repay(amount))
    }

    /// Net `amount` of debt against supplied collateral. Irreversible, so
    /// nothing may follow it.
    pub fn settle_with_collateral(&mut self, amount: Amount) -> Result<()> {
        self.pool.settle_with_collateral(amount)
    }

    /// Steps applied so far in the current `execute` call.
    #[must_use]
    pub fn applied(&self) -> &[Step] {
        &self.applied
    }

    fn apply(&mut self, step: Step) -> Result<()> {
        self.run(step)?;
        self.applied.push(step);
        Ok(())
    }

    fn run(&self, step: Step) -> Result<()> {
        match step {
            Step::Transfer { from, to, amount } => self.custody.transfer(from, to, amount),
            Step::Supply(a) => self.pool.supply(self.vault, a),
            Step::Withdraw(a) => self.pool.withdraw(self.vault, a),
            Step::Borrow(a) => self.pool.borrow(self.vault, a),
            Step::Repay(a) => self.pool.repay(self.vault, a),
        }
    }

    fn inverse(step: Step) -> Step {
        match step {
            Step::Transfer { from, to, amount } => Step::Transfer {
                from: to,
                to: from,
                amount,
            },
            Step::Supply(a) => Step::Withdraw(a),
            Step::Withdraw(a) => Step::Supply(a),
            Step::Borrow(a) => Step::Repay(a),
            Step::Repay(a) => Step::Borrow(a),
        }
    }

    fn rollback(&mut self, cause: EscrowLendError) -> EscrowLendError {
        while let Some(step) = self.applied.pop() {
            let undo = Self::inverse(step);
            if let Err(err) = self.run(undo) {
                tracing::error!(
                    escrow = %self.escrow_id,
                    %step,
                    %cause,
                    error = %err,
                    "compensation step failed"
                );
                return EscrowLendError::CompensationFailed {
                    id: self.escrow_id,
                    reason: format!("undo of `{step}` failed ({err}) after: {cause}"),
                };
            }
            tracing::debug!(escrow = %self.escrow_id, %step, "compensated");
        }
        cause
    }
}
