//! Lending pool boundary types.

use serde::{Deserialize, Serialize};

use crate::Amount;

/// The engine's aggregate balance inside the lending pool.
///
/// The pool never sees individual escrows; per-escrow figures live in
/// [`crate::CollateralPosition`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAccount {
    pub supplied: Amount,
    pub borrowed: Amount,
}

impl PoolAccount {
    /// Collateral that can be withdrawn without uncovering debt.
    #[must_use]
    pub fn withdrawable(&self) -> Amount {
        self.supplied.saturating_sub(self.borrowed)
    }
}

/// One lending pool operation, for call logs and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolOp {
    Supply,
    Withdraw,
    Borrow,
    Repay,
    SettleWithCollateral,
}

impl std::fmt::Display for PoolOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Supply => write!(f, "SUPPLY"),
            Self::Withdraw => write!(f, "WITHDRAW"),
            Self::Borrow => write!(f, "BORROW"),
            Self::Repay => write!(f, "REPAY"),
            Self::SettleWithCollateral => write!(f, "SETTLE_WITH_COLLATERAL"),
        }
    }
}
