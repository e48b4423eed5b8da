//! Value custody primitive.
//!
//! [`ValueCustody`] is the one way value moves between principals: an
//! all-or-nothing transfer. [`CustodyLedger`] is the in-memory
//! implementation: per-principal balances, account freezes, and a running
//! total of value minted in from outside so supply can be audited.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use escrowlend_types::{Amount, EscrowLendError, PrincipalId, Result};

/// Atomic transfer of the value asset between two principals.
///
/// A transfer either moves the full amount or leaves both balances
/// unchanged. Implementations must not call back into their caller.
pub trait ValueCustody: Send + Sync {
    /// # Errors
    /// Returns `CustodyTransferFailed` if the transfer cannot complete.
    fn transfer(&self, from: PrincipalId, to: PrincipalId, amount: Amount) -> Result<()>;

    /// Current balance held for `principal`.
    fn balance_of(&self, principal: PrincipalId) -> Amount;
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<PrincipalId, Amount>,
    frozen: HashSet<PrincipalId>,
    minted: Amount,
}

/// In-memory custody ledger.
#[derive(Debug, Default)]
pub struct CustodyLedger {
    state: Mutex<LedgerState>,
}

impl CustodyLedger {
    /// Create a new empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring external value into custody (on-ramp).
    ///
    /// # Errors
    /// Returns `AmountOverflow` if the balance or total supply would overflow.
    pub fn mint(&self, principal: PrincipalId, amount: Amount) -> Result<()> {
        let mut state = self.state();
        let minted = state.minted.checked_add(amount)?;
        let entry = state.balances.entry(principal).or_default();
        *entry = entry.checked_add(amount)?;
        state.minted = minted;
        Ok(())
    }

    /// Block all transfers into and out of `principal`.
    pub fn freeze_account(&self, principal: PrincipalId) {
        self.state().frozen.insert(principal);
    }

    pub fn unfreeze_account(&self, principal: PrincipalId) {
        self.state().frozen.remove(&principal);
    }

    #[must_use]
    pub fn is_frozen(&self, principal: PrincipalId) -> bool {
        self.state().frozen.contains(&principal)
    }

    /// Sum of every balance in the ledger.
    #[must_use]
    pub fn total_supply(&self) -> Amount {
        self.state()
            .balances
            .values()
            .fold(Amount::ZERO, |acc, b| Amount(acc.0.saturating_add(b.0)))
    }

    /// Total value minted in since genesis. Transfers never change it, so
    /// `total_supply() == minted()` always holds.
    #[must_use]
    pub fn minted(&self) -> Amount {
        self.state().minted
    }
}

impl ValueCustody for CustodyLedger {
    fn transfer(&self, from: PrincipalId, to: PrincipalId, amount: Amount) -> Result<()> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let mut state = self.state();
        if let Some(frozen) = [from, to].into_iter().find(|p| state.frozen.contains(p)) {
            return Err(EscrowLendError::custody(format!(
                "account {frozen} is frozen"
            )));
        }

        let available = state.balances.get(&from).copied().unwrap_or_default();
        if available < amount {
            return Err(EscrowLendError::custody(format!(
                "insufficient funds in {from}: need {amount}, have {available}"
            )));
        }
        let credited = state
            .balances
            .get(&to)
            .copied()
            .unwrap_or_default()
            .checked_add(amount)?;

        // Both sides validated; apply.
        state.balances.insert(from, available.checked_sub(amount)?);
        state.balances.insert(to, credited);
        tracing::trace!(%from, %to, %amount, "custody transfer");
        Ok(())
    }

    fn balance_of(&self, principal: PrincipalId) -> Amount {
        self.state()
            .balances
            .get(&principal)
            .copied()
            .unwrap_or_default()
    }
}
