//! # escrowlend-engine
//!
//! **The accounting core**: escrow lifecycle state machine plus the
//! collateral and borrowing sub-ledger, over injected custody, lending pool,
//! and compliance collaborators.
//!
//! ## Escrow Lifecycle
//!
//! ```text
//! ACTIVE ──release──▶ RELEASED
//!   │  └──refund───▶ REFUNDED
//!   └─fraud─▶ FRAUD_FLAGGED ──▶ REFUNDED
//! ```
//!
//! ## Invariants
//!
//! - `borrowed ≤ floor(supplied × 80%)` for every collateralized escrow
//! - Release requires zero debt
//! - An operation that returns `Err` has changed nothing
//! - One operation in flight per escrow id

pub mod conservation;
pub mod engine;
pub mod guard;
pub mod journal;
pub mod ledger;

pub use conservation::ConservationReport;
pub use engine::LendingEngine;
pub use guard::{EscrowLease, InFlightGuard};
pub use journal::{Journal, Step};
pub use ledger::EventLedger;
