//! # escrowlend-compliance
//!
//! **Creation-time screening**: the compliance gate capability and a tiered
//! implementation (verification limits, AML risk score, blacklist).
//!
//! The engine consults the gate once per escrow, before any value moves.
//! Nothing after creation is re-screened.

pub mod gate;
pub mod tiered;

pub use gate::{ComplianceGate, PermissiveGate};
pub use tiered::TieredComplianceGate;
