//! # escrowlend-types
//!
//! Shared types, errors, and configuration for the **EscrowLend**
//! collateralized escrow engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`EscrowId`], [`PrincipalId`]
//! - **Value**: [`Amount`] (fixed-point integer in the asset's smallest unit)
//! - **Escrow model**: [`Escrow`], [`EscrowStatus`]
//! - **Collateral model**: [`CollateralPosition`], [`CollateralInfo`]
//! - **Pool model**: [`PoolAccount`], [`PoolOp`]
//! - **Compliance model**: [`ComplianceRecord`], [`VerificationLevel`], [`ComplianceVerdict`]
//! - **Audit trail**: [`EscrowEvent`], [`EventKind`], [`DebtWriteOff`]
//! - **Configuration**: [`EngineConfig`], [`ComplianceConfig`], [`PoolConfig`]
//! - **Errors**: [`EscrowLendError`] with `EL_ERR_` prefix codes
//! - **Constants**: protocol LTV bound and defaults

pub mod amount;
pub mod collateral;
pub mod compliance;
pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod event;
pub mod ids;
pub mod pool;

// Re-export all primary types at crate root for ergonomic imports:
//   use escrowlend_types::{Escrow, EscrowId, Amount, ...};

pub use amount::*;
pub use collateral::*;
pub use compliance::*;
pub use config::*;
pub use error::*;
pub use escrow::*;
pub use event::*;
pub use ids::*;
pub use pool::*;

// Constants are accessed via `escrowlend_types::constants::FOO`
// (not re-exported to avoid name collisions).
