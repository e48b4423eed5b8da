//! Compliance gate capability.

use escrowlend_types::{Amount, ComplianceVerdict, EscrowId, PrincipalId};

/// Screens a proposed escrow before any value moves.
///
/// Called exactly once per escrow, at creation. A flagged verdict aborts
/// the creation with `ComplianceRejected`.
pub trait ComplianceGate: Send + Sync {
    fn check_escrow(
        &self,
        escrow_id: EscrowId,
        depositor: PrincipalId,
        beneficiary: PrincipalId,
        amount: Amount,
    ) -> ComplianceVerdict;
}

/// Gate that clears everything. For deployments with no compliance layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveGate;

impl ComplianceGate for PermissiveGate {
    fn check_escrow(
        &self,
        _escrow_id: EscrowId,
        _depositor: PrincipalId,
        _beneficiary: PrincipalId,
        _amount: Amount,
    ) -> ComplianceVerdict {
        ComplianceVerdict::clear()
    }
}
