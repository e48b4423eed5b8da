//! # escrowlend-custody
//!
//! **External value plumbing**: the value custody primitive and the lending
//! pool adapters the engine moves funds through.
//!
//! ## Architecture
//!
//! 1. **ValueCustody**: atomic principal-to-principal transfer
//! 2. **CustodyLedger**: in-memory custody with account freezes and a
//!    minted-supply total for audits
//! 3. **LendingPool**: supply / withdraw / borrow / repay capability
//! 4. **CustodialPool / MockPool / NullPool**: the injectable pool variants
//!
//! ## Value Flow
//!
//! ```text
//! depositor ──create──▶ engine custody ──collateralize──▶ pool reserve
//!                                                          │ borrow
//!                        beneficiary ◀──release── engine ◀─┘ withdraw
//! ```

pub mod custody;
pub mod pool;

pub use custody::{CustodyLedger, ValueCustody};
pub use pool::{CustodialPool, LendingPool, MockPool, NullPool};
