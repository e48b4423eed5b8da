//! End-to-end lifecycle tests.
//!
//! A full desk: in-memory custody, a mock lending pool over the same
//! custody, a tiered compliance gate, and the engine on top. Exercises the
//! escrow lifecycle from creation through collateralized borrowing to
//! release, refund, and fraud unwind, checking balances on every side.

use std::sync::Arc;

use escrowlend_compliance::TieredComplianceGate;
use escrowlend_custody::{CustodyLedger, LendingPool, MockPool, ValueCustody};
use escrowlend_engine::LendingEngine;
use escrowlend_types::*;
use rust_decimal::Decimal;

const STARTING_BALANCE: u128 = 1_000_000;
const POOL_LIQUIDITY: u128 = 10_000_000;

/// Engine plus every collaborator, with named principals.
struct Desk {
    engine: LendingEngine,
    custody: Arc<CustodyLedger>,
    pool: Arc<MockPool>,
    gate: Arc<TieredComplianceGate>,
    vault: PrincipalId,
    owner: PrincipalId,
    authority: PrincipalId,
    alice: PrincipalId,
    bob: PrincipalId,
    carol: PrincipalId,
}

impl Desk {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let custody = Arc::new(CustodyLedger::new());
        let reserve = PrincipalId::new();
        custody
            .mint(reserve, Amount(POOL_LIQUIDITY))
            .expect("mint pool liquidity");
        let pool = Arc::new(MockPool::new(custody.clone(), PoolConfig::new(reserve)).unwrap());
        let gate = Arc::new(
            TieredComplianceGate::new(ComplianceConfig::default()).expect("default config"),
        );

        let (owner, vault, authority) = (PrincipalId::new(), PrincipalId::new(), PrincipalId::new());
        let config = EngineConfig::from_json_str(
            &serde_json::json!({
                "owner": owner,
                "custody_account": vault,
                "fraud_authority": authority,
            })
            .to_string(),
        )
        .expect("engine config");
        let engine = LendingEngine::new(config, custody.clone(), pool.clone(), gate.clone())
            .expect("engine");

        let (alice, bob, carol) = (PrincipalId::new(), PrincipalId::new(), PrincipalId::new());
        for p in [alice, bob, carol] {
            custody
                .mint(p, Amount(STARTING_BALANCE))
                .expect("mint user balance");
            gate.verify(p, VerificationLevel::ENHANCED);
        }

        Self {
            engine,
            custody,
            pool,
            gate,
            vault,
            owner,
            authority,
            alice,
            bob,
            carol,
        }
    }

    /// Alice escrows `amount` for Bob.
    fn open(&self, amount: u128) -> EscrowId {
        self.engine
            .create_escrow(self.alice, self.bob, Amount(amount), "invoice 42")
            .expect("create escrow")
    }

    /// Alice escrows `amount` for Bob and pledges it.
    fn open_pledged(&self, amount: u128) -> EscrowId {
        let id = self.open(amount);
        self.engine
            .deposit_as_collateral(self.alice, id)
            .expect("collateralize");
        id
    }

    fn balance(&self, p: PrincipalId) -> Amount {
        self.custody.balance_of(p)
    }

    fn borrowed(&self, id: EscrowId) -> Amount {
        self.engine
            .get_collateral_info(id)
            .expect("collateral info")
            .borrowed
    }

    fn assert_books_balance(&self) {
        self.engine
            .verify_conservation()
            .expect("conservation holds");
        assert_eq!(self.custody.total_supply(), self.custody.minted());
        self.engine.verify_chain().expect("ledger chain intact");
    }
}

// =========================================================================
// Scenarios
// =========================================================================

#[test]
fn scenario_a_full_borrow_repay_release_cycle() {
    let desk = Desk::new();
    let id = desk.open(10_000);
    assert_eq!(desk.balance(desk.vault), Amount(10_000));

    desk.engine.deposit_as_collateral(desk.alice, id).unwrap();
    assert_eq!(desk.balance(desk.vault), Amount::ZERO);
    assert_eq!(desk.engine.get_borrow_limit(id).unwrap(), Amount(8_000));

    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(5_000))
        .unwrap();
    assert_eq!(desk.engine.get_available_to_borrow(id).unwrap(), Amount(3_000));
    assert_eq!(desk.balance(desk.alice), Amount(STARTING_BALANCE - 10_000 + 5_000));
    desk.assert_books_balance();

    desk.engine
        .repay_borrowed(desk.alice, id, Amount(5_000))
        .unwrap();
    assert_eq!(desk.engine.get_available_to_borrow(id).unwrap(), Amount(8_000));

    let bob_before = desk.balance(desk.bob);
    desk.engine.release_with_collateral(desk.alice, id).unwrap();
    assert_eq!(
        desk.balance(desk.bob).checked_sub(bob_before).unwrap(),
        Amount(10_000)
    );

    let escrow = desk.engine.get_escrow(id).unwrap();
    assert_eq!(escrow.status, EscrowStatus::Released);
    let info = desk.engine.get_collateral_info(id).unwrap();
    assert!(!info.is_collateralized);
    assert_eq!(info.borrowed, Amount::ZERO);
    assert_eq!(desk.pool.account(), PoolAccount::default());
    desk.assert_books_balance();
}

#[test]
fn scenario_b_borrow_limit_is_exact() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);

    let err = desk
        .engine
        .borrow_against_escrow(desk.alice, id, Amount(8_001))
        .unwrap_err();
    assert!(matches!(
        err,
        EscrowLendError::ExceedsBorrowLimit {
            requested: Amount(8_001),
            available: Amount(8_000),
        }
    ));
    assert_eq!(desk.pool.call_count(PoolOp::Borrow), 0);

    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(8_000))
        .unwrap();
    assert_eq!(desk.engine.get_available_to_borrow(id).unwrap(), Amount::ZERO);
    let info = desk.engine.get_collateral_info(id).unwrap();
    assert_eq!(info.current_ltv, Decimal::from(80));
    desk.assert_books_balance();
}

#[test]
fn scenario_c_release_gated_on_debt() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(5_000))
        .unwrap();

    let bob_before = desk.balance(desk.bob);
    let err = desk
        .engine
        .release_with_collateral(desk.alice, id)
        .unwrap_err();
    assert!(matches!(
        err,
        EscrowLendError::OutstandingDebtExists {
            borrowed: Amount(5_000)
        }
    ));
    assert_eq!(desk.balance(desk.bob), bob_before);
    assert_eq!(desk.engine.get_escrow(id).unwrap().status, EscrowStatus::Active);

    desk.engine
        .repay_borrowed(desk.alice, id, Amount(5_000))
        .unwrap();
    desk.engine.release_with_collateral(desk.alice, id).unwrap();
    assert_eq!(
        desk.balance(desk.bob),
        bob_before.checked_add(Amount(10_000)).unwrap()
    );
    desk.assert_books_balance();
}

#[test]
fn scenario_d_fraud_refunds_uncollateralized_escrow() {
    let desk = Desk::new();
    let id = desk.open(500);
    let alice_before = desk.balance(desk.alice);

    desk.engine.mark_fraud(desk.authority, id).unwrap();

    let escrow = desk.engine.get_escrow(id).unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert!(escrow.fraud_flagged);
    assert_eq!(
        desk.balance(desk.alice),
        alice_before.checked_add(Amount(500)).unwrap()
    );
    assert!(desk.engine.write_offs(desk.alice).is_empty());

    let kinds: Vec<EventKind> = desk.engine.events(id).iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::EscrowCreated,
            EventKind::FraudFlagged,
            EventKind::Refunded
        ]
    );
    desk.assert_books_balance();
}

#[test]
fn scenario_e_repeated_borrows_share_one_limit() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(3_000))
        .unwrap();
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(2_000))
        .unwrap();
    assert_eq!(desk.borrowed(id), Amount(5_000));

    let err = desk
        .engine
        .borrow_against_escrow(desk.alice, id, Amount(3_001))
        .unwrap_err();
    assert!(matches!(err, EscrowLendError::ExceedsBorrowLimit { .. }));
    assert_eq!(desk.borrowed(id), Amount(5_000));
    desk.assert_books_balance();
}

// =========================================================================
// Collateral rules
// =========================================================================

#[test]
fn double_collateralization_rejected() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);
    let err = desk
        .engine
        .deposit_as_collateral(desk.alice, id)
        .unwrap_err();
    assert!(matches!(err, EscrowLendError::AlreadyCollateralized(e) if e == id));
    assert_eq!(desk.pool.call_count(PoolOp::Supply), 1);
    assert_eq!(desk.pool.account().supplied, Amount(10_000));
}

#[test]
fn third_party_may_repay() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(4_000))
        .unwrap();

    desk.engine
        .repay_borrowed(desk.carol, id, Amount(1_500))
        .unwrap();
    assert_eq!(desk.borrowed(id), Amount(2_500));
    assert_eq!(desk.balance(desk.carol), Amount(STARTING_BALANCE - 1_500));

    let repaid = desk
        .engine
        .events(id)
        .into_iter()
        .find(|e| e.kind == EventKind::Repaid)
        .expect("repay event");
    assert_eq!(repaid.actor, desk.carol);
    desk.assert_books_balance();
}

#[test]
fn repay_rules() {
    let desk = Desk::new();
    let id = desk.open(10_000);
    assert!(matches!(
        desk.engine.repay_borrowed(desk.alice, id, Amount(1)),
        Err(EscrowLendError::NotCollateralized(_))
    ));
    desk.engine.deposit_as_collateral(desk.alice, id).unwrap();
    assert!(matches!(
        desk.engine.repay_borrowed(desk.alice, id, Amount::ZERO),
        Err(EscrowLendError::ZeroAmount)
    ));
    assert!(matches!(
        desk.engine.repay_borrowed(desk.alice, id, Amount(1)),
        Err(EscrowLendError::RepayExceedsDebt { .. })
    ));
    assert!(matches!(
        desk.engine.repay_borrowed(desk.vault, id, Amount(1)),
        Err(EscrowLendError::Unauthorized { .. })
    ));
    assert_eq!(desk.pool.call_count(PoolOp::Repay), 0);
}

#[test]
fn depositor_refund_requires_zero_debt() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(1_000))
        .unwrap();
    assert!(matches!(
        desk.engine.refund(desk.alice, id),
        Err(EscrowLendError::OutstandingDebtExists { .. })
    ));

    desk.engine
        .repay_borrowed(desk.alice, id, Amount(1_000))
        .unwrap();
    let alice_before = desk.balance(desk.alice);
    desk.engine.refund(desk.alice, id).unwrap();
    assert_eq!(
        desk.balance(desk.alice),
        alice_before.checked_add(Amount(10_000)).unwrap()
    );
    let escrow = desk.engine.get_escrow(id).unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert!(!escrow.fraud_flagged);
    desk.assert_books_balance();
}

// =========================================================================
// Fraud authority
// =========================================================================

#[test]
fn fraud_unwind_writes_off_debt() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(5_000))
        .unwrap();
    let reserve_before = desk.pool.reserve_account();
    let liquidity_before = desk.balance(reserve_before);

    desk.engine.mark_fraud(desk.authority, id).unwrap();

    // Alice keeps the 5,000 she borrowed and gets back the other 5,000.
    assert_eq!(desk.balance(desk.alice), Amount(STARTING_BALANCE));
    let escrow = desk.engine.get_escrow(id).unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert!(escrow.fraud_flagged);

    let info = desk.engine.get_collateral_info(id).unwrap();
    assert!(!info.is_collateralized);
    assert_eq!(info.borrowed, Amount::ZERO);

    let write_offs = desk.engine.write_offs(desk.alice);
    assert_eq!(write_offs.len(), 1);
    assert_eq!(write_offs[0].amount, Amount(5_000));
    assert_eq!(write_offs[0].escrow_id, id);

    assert_eq!(desk.pool.account(), PoolAccount::default());
    assert_eq!(desk.balance(reserve_before), liquidity_before.checked_sub(Amount(5_000)).unwrap());
    assert_eq!(
        desk.pool.calls().last().map(|(op, _)| *op),
        Some(PoolOp::SettleWithCollateral)
    );
    desk.assert_books_balance();
}

#[test]
fn authority_refund_is_forced_but_not_flagged() {
    let desk = Desk::new();
    let id = desk.open_pledged(10_000);
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(2_000))
        .unwrap();

    desk.engine.refund(desk.authority, id).unwrap();
    let escrow = desk.engine.get_escrow(id).unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert!(!escrow.fraud_flagged);
    assert_eq!(desk.engine.write_offs(desk.alice)[0].amount, Amount(2_000));
    desk.assert_books_balance();
}

#[test]
fn fraud_requires_configured_authority() {
    let desk = Desk::new();
    let id = desk.open(100);

    assert!(matches!(
        desk.engine.mark_fraud(desk.alice, id),
        Err(EscrowLendError::Unauthorized { .. })
    ));

    desk.engine.set_fraud_authority(desk.owner, None).unwrap();
    assert!(!desk.engine.is_fraud_authority_configured());
    assert!(matches!(
        desk.engine.mark_fraud(desk.authority, id),
        Err(EscrowLendError::AuthorityNotConfigured)
    ));
    assert!(matches!(
        desk.engine.refund(desk.authority, id),
        Err(EscrowLendError::Unauthorized { .. })
    ));

    desk.engine
        .set_fraud_authority(desk.owner, Some(desk.carol))
        .unwrap();
    desk.engine.mark_fraud(desk.carol, id).unwrap();
    assert!(desk.engine.get_escrow(id).unwrap().fraud_flagged);
}

#[test]
fn terminal_escrows_are_immutable() {
    let desk = Desk::new();
    let id = desk.open(1_000);
    desk.engine.release_with_collateral(desk.alice, id).unwrap();
    let before = desk.engine.get_escrow(id).unwrap();

    for result in [
        desk.engine.release_with_collateral(desk.alice, id),
        desk.engine.refund(desk.alice, id),
        desk.engine.mark_fraud(desk.authority, id),
        desk.engine.deposit_as_collateral(desk.alice, id),
    ] {
        assert!(matches!(result, Err(EscrowLendError::InvalidStatus { .. })));
    }
    assert_eq!(desk.engine.get_escrow(id).unwrap(), before);
}

// =========================================================================
// Authorization and compliance
// =========================================================================

#[test]
fn depositor_only_operations_reject_others() {
    let desk = Desk::new();
    let id = desk.open(10_000);
    assert!(matches!(
        desk.engine.deposit_as_collateral(desk.bob, id),
        Err(EscrowLendError::Unauthorized { .. })
    ));
    desk.engine.deposit_as_collateral(desk.alice, id).unwrap();
    assert!(matches!(
        desk.engine.borrow_against_escrow(desk.bob, id, Amount(1)),
        Err(EscrowLendError::Unauthorized { .. })
    ));
    assert!(matches!(
        desk.engine.release_with_collateral(desk.bob, id),
        Err(EscrowLendError::Unauthorized { .. })
    ));
    assert!(matches!(
        desk.engine.refund(desk.carol, id),
        Err(EscrowLendError::Unauthorized { .. })
    ));
    assert_eq!(desk.borrowed(id), Amount::ZERO);
}

#[test]
fn compliance_rejection_moves_no_funds() {
    let desk = Desk::new();
    desk.gate.blacklist(desk.bob);

    let err = desk
        .engine
        .create_escrow(desk.alice, desk.bob, Amount(100), "")
        .unwrap_err();
    assert!(matches!(err, EscrowLendError::ComplianceRejected { ref reason } if reason.contains("blacklisted")));
    assert_eq!(desk.balance(desk.alice), Amount(STARTING_BALANCE));
    assert_eq!(desk.engine.escrow_count(), 0);

    // The rejected creation consumed id 1.
    let id = desk
        .engine
        .create_escrow(desk.alice, desk.carol, Amount(100), "")
        .unwrap();
    assert_eq!(id, EscrowId(2));
}

#[test]
fn compliance_limit_follows_verification() {
    let desk = Desk::new();
    let dave = PrincipalId::new();
    desk.custody.mint(dave, Amount(STARTING_BALANCE)).unwrap();

    assert!(matches!(
        desk.engine.create_escrow(dave, desk.bob, Amount(1_001), ""),
        Err(EscrowLendError::ComplianceRejected { .. })
    ));
    desk.gate.verify(dave, VerificationLevel::BASIC);
    desk.engine
        .create_escrow(dave, desk.bob, Amount(1_001), "")
        .unwrap();

    desk.gate.set_risk_score(desk.bob, 90).unwrap();
    assert!(matches!(
        desk.engine.create_escrow(dave, desk.bob, Amount(10), ""),
        Err(EscrowLendError::ComplianceRejected { .. })
    ));
}

// =========================================================================
// Audit trail
// =========================================================================

#[test]
fn ledger_records_every_commit() {
    let desk = Desk::new();
    let head0 = desk.engine.ledger_head();
    let id = desk.open_pledged(10_000);
    desk.engine
        .borrow_against_escrow(desk.alice, id, Amount(100))
        .unwrap();
    desk.engine
        .repay_borrowed(desk.alice, id, Amount(100))
        .unwrap();
    desk.engine.release_with_collateral(desk.alice, id).unwrap();

    let events = desk.engine.events(id);
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::EscrowCreated,
            EventKind::Collateralized,
            EventKind::Borrowed,
            EventKind::Repaid,
            EventKind::Released
        ]
    );
    assert!(events.windows(2).all(|w| w[1].prev_hash == w[0].hash));
    assert_ne!(desk.engine.ledger_head(), head0);
    assert_eq!(desk.engine.ledger_head(), events[4].hash);

    // Failed operations append nothing.
    let head = desk.engine.ledger_head();
    let _ = desk.engine.refund(desk.alice, id);
    assert_eq!(desk.engine.ledger_head(), head);
}

#[test]
fn escrows_for_lists_party_escrows() {
    let desk = Desk::new();
    let a = desk.open(10);
    let b = desk
        .engine
        .create_escrow(desk.carol, desk.alice, Amount(10), "")
        .unwrap();
    assert_eq!(desk.engine.escrows_for(desk.alice), vec![a, b]);
    assert_eq!(desk.engine.escrows_for(desk.bob), vec![a]);
    assert!(desk.engine.escrows_for(desk.owner).is_empty());
}
