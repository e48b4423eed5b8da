//! Lending pool adapters.
//!
//! The engine never originates liquidity. It pledges collateral to, draws
//! loans from, and repays an external pooled-capital facility through the
//! [`LendingPool`] capability, injected at construction:
//!
//! - [`CustodialPool`]: a real pool whose reserve lives in the custody ledger
//! - [`MockPool`]: a custodial pool with a call log and fault injection
//! - [`NullPool`]: no facility configured; every operation fails
//!
//! Every operation is atomic: it either completes or leaves the pool's
//! recorded balance (and custody balances) unchanged.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use escrowlend_types::{Amount, EscrowLendError, PoolAccount, PoolConfig, PoolOp, PrincipalId, Result};

use crate::custody::ValueCustody;

/// Minimal contract the engine needs from a pooled-lending facility.
pub trait LendingPool: Send + Sync {
    /// Short name for log fields.
    fn name(&self) -> &'static str;

    /// Pledge `amount` of collateral, pulled from `from`.
    fn supply(&self, from: PrincipalId, amount: Amount) -> Result<()>;

    /// Return `amount` of collateral to `to`. Never more than supplied net
    /// of outstanding borrows.
    fn withdraw(&self, to: PrincipalId, amount: Amount) -> Result<()>;

    /// Lend `amount` out of pool liquidity to `to`.
    fn borrow(&self, to: PrincipalId, amount: Amount) -> Result<()>;

    /// Pay back `amount` of debt, pulled from `from`.
    fn repay(&self, from: PrincipalId, amount: Amount) -> Result<()>;

    /// Repay `amount` of debt out of supplied collateral. No value moves:
    /// supplied and borrowed both drop by `amount`.
    fn settle_with_collateral(&self, amount: Amount) -> Result<()>;

    /// The engine's aggregate account inside the pool.
    fn account(&self) -> PoolAccount;
}

// ---------------------------------------------------------------------------
// CustodialPool
// ---------------------------------------------------------------------------

/// Pool whose reserve is an account in the shared custody ledger.
///
/// Calls are serialized on the pool account lock, which is held across the
/// custody transfer so the balance check and the transfer are one step.
pub struct CustodialPool {
    custody: Arc<dyn ValueCustody>,
    config: PoolConfig,
    account: Mutex<PoolAccount>,
}

impl CustodialPool {
    /// # Errors
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(custody: Arc<dyn ValueCustody>, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            reserve = %config.reserve_account.short(),
            max_ltv_bps = config.max_ltv_bps,
            "custodial pool configured"
        );
        Ok(Self {
            custody,
            config,
            account: Mutex::new(PoolAccount::default()),
        })
    }

    /// The custody account holding pool liquidity.
    #[must_use]
    pub fn reserve_account(&self) -> PrincipalId {
        self.config.reserve_account
    }

    /// Liquidity currently sitting in the reserve.
    #[must_use]
    pub fn liquidity(&self) -> Amount {
        self.custody.balance_of(self.config.reserve_account)
    }

    fn lock(&self) -> MutexGuard<'_, PoolAccount> {
        self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LendingPool for CustodialPool {
    fn name(&self) -> &'static str {
        "custodial"
    }

    fn supply(&self, from: PrincipalId, amount: Amount) -> Result<()> {
        let mut acct = self.lock();
        let supplied = acct.supplied.checked_add(amount)?;
        self.custody
            .transfer(from, self.config.reserve_account, amount)?;
        acct.supplied = supplied;
        tracing::debug!(pool = self.name(), %amount, supplied = %acct.supplied, "collateral supplied");
        Ok(())
    }

    fn withdraw(&self, to: PrincipalId, amount: Amount) -> Result<()> {
        let mut acct = self.lock();
        if amount > acct.withdrawable() {
            return Err(EscrowLendError::custody(format!(
                "pool withdraw of {amount} exceeds supplied net of borrows ({})",
                acct.withdrawable()
            )));
        }
        let supplied = acct.supplied.checked_sub(amount)?;
        self.custody
            .transfer(self.config.reserve_account, to, amount)?;
        acct.supplied = supplied;
        tracing::debug!(pool = self.name(), %amount, supplied = %acct.supplied, "collateral withdrawn");
        Ok(())
    }

    fn borrow(&self, to: PrincipalId, amount: Amount) -> Result<()> {
        let mut acct = self.lock();
        let borrowed = acct.borrowed.checked_add(amount)?;
        let ceiling = acct.supplied.apply_bps(self.config.max_ltv_bps);
        if borrowed > ceiling {
            return Err(EscrowLendError::custody(format!(
                "pool borrow of {amount} exceeds pool LTV ceiling {ceiling}"
            )));
        }
        self.custody
            .transfer(self.config.reserve_account, to, amount)?;
        acct.borrowed = borrowed;
        tracing::debug!(pool = self.name(), %amount, borrowed = %acct.borrowed, "loan drawn");
        Ok(())
    }

    fn repay(&self, from: PrincipalId, amount: Amount) -> Result<()> {
        let mut acct = self.lock();
        if amount > acct.borrowed {
            return Err(EscrowLendError::custody(format!(
                "pool repay of {amount} exceeds outstanding {}",
                acct.borrowed
            )));
        }
        let borrowed = acct.borrowed.checked_sub(amount)?;
        self.custody
            .transfer(from, self.config.reserve_account, amount)?;
        acct.borrowed = borrowed;
        tracing::debug!(pool = self.name(), %amount, borrowed = %acct.borrowed, "loan repaid");
        Ok(())
    }

    fn settle_with_collateral(&self, amount: Amount) -> Result<()> {
        let mut acct = self.lock();
        if amount > acct.borrowed || amount > acct.supplied {
            return Err(EscrowLendError::custody(format!(
                "pool settlement of {amount} exceeds account (supplied {}, borrowed {})",
                acct.supplied, acct.borrowed
            )));
        }
        acct.supplied = acct.supplied.checked_sub(amount)?;
        acct.borrowed = acct.borrowed.checked_sub(amount)?;
        tracing::debug!(pool = self.name(), %amount, "debt settled from collateral");
        Ok(())
    }

    fn account(&self) -> PoolAccount {
        *self.lock()
    }
}

// ---------------------------------------------------------------------------
// MockPool
// ---------------------------------------------------------------------------

/// Custodial pool with a call log and one-shot fault injection.
pub struct MockPool {
    inner: CustodialPool,
    fail_next: Mutex<HashSet<PoolOp>>,
    calls: Mutex<Vec<(PoolOp, Amount)>>,
}

impl MockPool {
    /// # Errors
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(custody: Arc<dyn ValueCustody>, config: PoolConfig) -> Result<Self> {
        Ok(Self {
            inner: CustodialPool::new(custody, config)?,
            fail_next: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Make the next call of `op` fail without touching any balance.
    pub fn fail_next(&self, op: PoolOp) {
        self.fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    /// Every call made so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> Vec<(PoolOp, Amount)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn call_count(&self, op: PoolOp) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    #[must_use]
    pub fn reserve_account(&self) -> PrincipalId {
        self.inner.reserve_account()
    }

    fn intercept(&self, op: PoolOp, amount: Amount) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((op, amount));
        if self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&op)
        {
            tracing::debug!(%op, %amount, "mock pool: injected fault");
            return Err(EscrowLendError::custody(format!("injected {op} fault")));
        }
        Ok(())
    }
}

impl LendingPool for MockPool {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supply(&self, from: PrincipalId, amount: Amount) -> Result<()> {
        self.intercept(PoolOp::Supply, amount)?;
        self.inner.supply(from, amount)
    }

    fn withdraw(&self, to: PrincipalId, amount: Amount) -> Result<()> {
        self.intercept(PoolOp::Withdraw, amount)?;
        self.inner.withdraw(to, amount)
    }

    fn borrow(&self, to: PrincipalId, amount: Amount) -> Result<()> {
        self.intercept(PoolOp::Borrow, amount)?;
        self.inner.borrow(to, amount)
    }

    fn repay(&self, from: PrincipalId, amount: Amount) -> Result<()> {
        self.intercept(PoolOp::Repay, amount)?;
        self.inner.repay(from, amount)
    }

    fn settle_with_collateral(&self, amount: Amount) -> Result<()> {
        self.intercept(PoolOp::SettleWithCollateral, amount)?;
        self.inner.settle_with_collateral(amount)
    }

    fn account(&self) -> PoolAccount {
        self.inner.account()
    }
}

// ---------------------------------------------------------------------------
// NullPool
// ---------------------------------------------------------------------------

/// No lending facility. Escrow still works; collateralization does not.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPool;

impl NullPool {
    fn unavailable(op: PoolOp) -> EscrowLendError {
        EscrowLendError::custody(format!("{op}: no lending pool configured"))
    }
}

impl LendingPool for NullPool {
    fn name(&self) -> &'static str {
        "null"
    }

    fn supply(&self, _from: PrincipalId, _amount: Amount) -> Result<()> {
        Err(Self::unavailable(PoolOp::Supply))
    }

    fn withdraw(&self, _to: PrincipalId, _amount: Amount) -> Result<()> {
        Err(Self::unavailable(PoolOp::Withdraw))
    }

    fn borrow(&self, _to: PrincipalId, _amount: Amount) -> Result<()> {
        Err(Self::unavailable(PoolOp::Borrow))
    }

    fn repay(&self, _from: PrincipalId, _amount: Amount) -> Result<()> {
        Err(Self::unavailable(PoolOp::Repay))
    }

    fn settle_with_collateral(&self, _amount: Amount) -> Result<()> {
        Err(Self::unavailable(PoolOp::SettleWithCollateral))
    }

    fn account(&self) -> PoolAccount {
        PoolAccount::default()
    }
}
