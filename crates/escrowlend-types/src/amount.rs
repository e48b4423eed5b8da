//! Fixed-point value amounts.
//!
//! Every amount is an unsigned integer count of the value asset's smallest
//! unit. Arithmetic is checked; nothing in the ledger ever wraps.

use std::fmt;

use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{EscrowLendError, Result, constants};

/// A non-negative quantity of the value asset, in its smallest unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u128::MAX);

    #[must_use]
    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    #[must_use]
    pub const fn units(self) -> u128 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// # Errors
    /// Returns `AmountOverflow` if the sum does not fit.
    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(EscrowLendError::AmountOverflow)
    }

    /// # Errors
    /// Returns `AmountOverflow` if `rhs > self`.
    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(EscrowLendError::AmountOverflow)
    }

    /// Difference clamped at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// `floor(self × bps / 10_000)` in integer arithmetic.
    ///
    /// Computed as `q × bps + floor(r × bps / 10_000)` with `q, r` the
    /// quotient and remainder of `self / 10_000`, so it never overflows for
    /// `bps ≤ 10_000`.
    #[must_use]
    pub fn apply_bps(self, bps: u16) -> Self {
        let denom = constants::BPS_DENOMINATOR;
        let bps = u128::from(bps);
        let q = self.0 / denom;
        let r = self.0 % denom;
        Self(q * bps + (r * bps) / denom)
    }

    /// The ratio `self / denom` as a percentage, for display only.
    ///
    /// Both operands drop the same low bits until they fit a `Decimal`
    /// mantissa, so the ratio survives amounts beyond `Decimal` range.
    /// Zero when `denom` is zero; saturates at `Decimal::MAX` when the ratio
    /// itself is unrepresentable.
    #[must_use]
    pub fn percent_of(self, denom: Self) -> Decimal {
        if denom.is_zero() {
            return Decimal::ZERO;
        }
        let bits = u128::BITS - self.0.max(denom.0).leading_zeros();
        let shift = bits.saturating_sub(PERCENT_OPERAND_BITS);
        let (n, d) = (self.0 >> shift, denom.0 >> shift);
        if d == 0 {
            return Decimal::MAX;
        }
        Decimal::from_u128(n)
            .zip(Decimal::from_u128(d))
            .and_then(|(n, d)| n.checked_mul(Decimal::ONE_HUNDRED)?.checked_div(d))
            .map_or(Decimal::MAX, |pct| pct.round_dp(4))
    }
}

/// Operand width for `percent_of`: `2^88 × 100` stays under the 96-bit
/// `Decimal` mantissa.
const PERCENT_OPERAND_BITS: u32 = 88;

impl From<u128> for Amount {
    fn from(units: u128) -> Self {
        Self(units)
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Self(u128::from(units))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
