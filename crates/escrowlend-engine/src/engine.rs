//! The escrow lending engine.
//!
//! Owns every [`Escrow`] and [`CollateralPosition`] record and orchestrates
//! the value custody primitive, the lending pool, and the compliance gate.
//!
//! ## Operation shape
//!
//! Every mutating operation on an existing escrow runs the same way:
//!
//! 1. Take the escrow's in-flight lease (concurrent or reentrant callers get
//!    `EscrowLocked`)
//! 2. Copy the committed records and apply the change to the copies,
//!    validating every precondition
//! 3. Run the external custody/pool steps through a compensation journal
//! 4. Commit the copies, bump versions, append ledger events
//!
//! Any error before step 4 leaves the committed records untouched, and the
//! journal has already undone whatever external steps ran.
//!
//! Between steps 1 and 4 the committed records no longer match custody and
//! pool balances, so per-escrow views of a leased id and the conservation
//! audit answer `EscrowLocked` until the lease drops. They check the lease
//! while holding the book lock, and commit happens under that lock before
//! the lease is released, so a view never sees a half-applied operation.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::Utc;
use escrowlend_compliance::ComplianceGate;
use escrowlend_custody::{LendingPool, ValueCustody};
use escrowlend_types::{
    Amount, CollateralInfo, CollateralPosition, DebtWriteOff, EngineConfig, Escrow, EscrowEvent,
    EscrowId, EscrowLendError, EscrowStatus, EventKind, PrincipalId, Result, constants,
};

use crate::{
    conservation::ConservationReport, guard::InFlightGuard, journal::Journal,
    ledger::EventLedger,
};

/// Committed engine state. Only touched under the book lock, and never
/// across an external call.
#[derive(Debug)]
struct Book {
    escrows: BTreeMap<EscrowId, Escrow>,
    positions: HashMap<EscrowId, CollateralPosition>,
    write_offs: Vec<DebtWriteOff>,
    ledger: EventLedger,
}

/// Records staged by an operation, committed together.
struct Staged {
    actor: PrincipalId,
    escrow: Option<Escrow>,
    position: Option<CollateralPosition>,
    events: Vec<(EventKind, Amount)>,
    write_off: Option<DebtWriteOff>,
}

impl Staged {
    fn new(actor: PrincipalId) -> Self {
        Self {
            actor,
            escrow: None,
            position: None,
            events: Vec::new(),
            write_off: None,
        }
    }
}

/// How a refund unwinds the collateral position.
#[derive(Debug, Clone, Copy, Default)]
struct Unwind {
    /// Collateral pulled back from the pool into engine custody.
    withdraw: Amount,
    /// Paid out of engine custody to the depositor.
    payout: Amount,
    /// Debt netted against collateral.
    written_off: Amount,
}

/// Collateralized escrow lending engine.
pub struct LendingEngine {
    owner: PrincipalId,
    vault: PrincipalId,
    fraud_authority: RwLock<Option<PrincipalId>>,
    custody: Arc<dyn ValueCustody>,
    pool: Arc<dyn LendingPool>,
    compliance: Arc<dyn ComplianceGate>,
    next_id: AtomicU64,
    in_flight: InFlightGuard,
    book: Mutex<Book>,
}

impl LendingEngine {
    /// Build an engine over injected collaborators.
    ///
    /// # Errors
    /// Returns `Configuration` if `config` does not validate.
    pub fn new(
        config: EngineConfig,
        custody: Arc<dyn ValueCustody>,
        pool: Arc<dyn LendingPool>,
        compliance: Arc<dyn ComplianceGate>,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            engine = constants::ENGINE_NAME,
            version = constants::VERSION,
            owner = %config.owner.short(),
            vault = %config.custody_account.short(),
            pool = pool.name(),
            fraud_authority = config.fraud_authority.is_some(),
            "lending engine started"
        );
        Ok(Self {
            owner: config.owner,
            vault: config.custody_account,
            fraud_authority: RwLock::new(config.fraud_authority),
            custody,
            pool,
            compliance,
            next_id: AtomicU64::new(1),
            in_flight: InFlightGuard::new(),
            book: Mutex::new(Book {
                escrows: BTreeMap::new(),
                positions: HashMap::new(),
                write_offs: Vec::new(),
                ledger: EventLedger::new(config.journal_capacity)?,
            }),
        })
    }

    // -----------------------------------------------------------------
    // Escrow lifecycle
    // -----------------------------------------------------------------

    /// Lock `amount` from `depositor` in escrow for `beneficiary`.
    ///
    /// The compliance gate is consulted before any value moves. A rejected
    /// creation still consumes its id.
    ///
    /// # Errors
    /// - `InvalidParties` / `ZeroAmount` for bad terms
    /// - `ComplianceRejected` if the gate flags the escrow
    /// - `CustodyTransferFailed` if the deposit cannot be pulled
    pub fn create_escrow(
        &self,
        depositor: PrincipalId,
        beneficiary: PrincipalId,
        amount: Amount,
        memo: impl Into<String>,
    ) -> Result<EscrowId> {
        Escrow::validate_terms(depositor, beneficiary, amount)?;
        if depositor == self.vault || beneficiary == self.vault {
            return Err(EscrowLendError::invalid_parties(
                "engine custody account cannot be a party",
            ));
        }

        let id = EscrowId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let _lease = self.in_flight.acquire(id)?;
        self.compliance
            .check_escrow(id, depositor, beneficiary, amount)
            .into_result()?;

        let escrow = Escrow::open(id, depositor, beneficiary, amount, memo)?;
        self.custody.transfer(depositor, self.vault, amount)?;

        let mut book = self.book();
        book.ledger.append(
            EventKind::EscrowCreated,
            Some(id),
            depositor,
            amount,
            escrow.version,
            escrow.created_at,
        );
        book.escrows.insert(id, escrow);
        drop(book);

        tracing::info!(
            escrow = %id,
            depositor = %depositor.short(),
            beneficiary = %beneficiary.short(),
            %amount,
            "escrow created"
        );
        Ok(id)
    }

    /// Pay the escrow out to its beneficiary, unwinding the pledge first if
    /// collateralized. Depositor only.
    ///
    /// # Errors
    /// - `Unauthorized` unless `caller` is the depositor
    /// - `InvalidStatus` unless ACTIVE
    /// - `OutstandingDebtExists` if the pledge still carries debt
    /// - `CustodyTransferFailed` if the pool or the payout fails
    pub fn release_with_collateral(&self, caller: PrincipalId, id: EscrowId) -> Result<()> {
        let _lease = self.in_flight.acquire(id)?;
        let (mut escrow, mut position) = self.load(id)?;
        escrow.ensure_active()?;
        Self::ensure_depositor(&escrow, caller, "release")?;

        let withdraw = match position.as_mut().filter(|p| p.is_collateralized) {
            Some(p) => p.unwind()?,
            None => Amount::ZERO,
        };
        escrow.transition(EscrowStatus::Released)?;

        let (beneficiary, amount) = (escrow.beneficiary, escrow.amount);
        self.journal(id).execute(|j| {
            if !withdraw.is_zero() {
                j.withdraw(withdraw)?;
            }
            j.transfer(self.vault, beneficiary, amount)
        })?;

        let mut staged = Staged::new(caller);
        staged.events.push((EventKind::Released, amount));
        staged.escrow = Some(escrow);
        staged.position = position.filter(|_| !withdraw.is_zero());
        self.commit(staged);

        tracing::info!(
            escrow = %id,
            beneficiary = %beneficiary.short(),
            %amount,
            unwound = %withdraw,
            "escrow released"
        );
        Ok(())
    }

    /// Return the escrow to its depositor.
    ///
    /// The depositor may refund only a debt-free escrow. The fraud authority
    /// may refund unconditionally: outstanding debt is netted against the
    /// collateral and recorded as a write-off.
    ///
    /// # Errors
    /// - `Unauthorized` unless `caller` is the depositor or fraud authority
    /// - `InvalidStatus` unless ACTIVE
    /// - `OutstandingDebtExists` on a depositor refund with debt
    /// - `CustodyTransferFailed` if the pool or the payout fails
    pub fn refund(&self, caller: PrincipalId, id: EscrowId) -> Result<()> {
        let _lease = self.in_flight.acquire(id)?;
        let (escrow, position) = self.load(id)?;
        escrow.ensure_active()?;

        let forced = if caller == escrow.depositor {
            false
        } else if Some(caller) == self.fraud_authority() {
            true
        } else {
            return Err(EscrowLendError::unauthorized(format!(
                "only the depositor or fraud authority may refund {id}"
            )));
        };
        self.settle_refund(caller, escrow, position, forced)
    }

    /// Flag the escrow as fraudulent and force a refund. Fraud authority
    /// only. The flag stays readable on the refunded record.
    ///
    /// # Errors
    /// - `AuthorityNotConfigured` if no fraud authority is set
    /// - `Unauthorized` unless `caller` is the fraud authority
    /// - `InvalidStatus` unless ACTIVE
    /// - `CustodyTransferFailed` if the pool or the payout fails
    pub fn mark_fraud(&self, caller: PrincipalId, id: EscrowId) -> Result<()> {
        let authority = self
            .fraud_authority()
            .ok_or(EscrowLendError::AuthorityNotConfigured)?;
        if caller != authority {
            return Err(EscrowLendError::unauthorized(
                "only the fraud authority may flag fraud",
            ));
        }

        let _lease = self.in_flight.acquire(id)?;
        let (mut escrow, position) = self.load(id)?;
        escrow.flag_fraud()?;
        tracing::warn!(escrow = %id, amount = %escrow.amount, "escrow flagged as fraudulent");
        self.settle_refund(caller, escrow, position, true)
    }

    /// Shared tail of `refund` and `mark_fraud`. Caller holds the lease.
    fn settle_refund(
        &self,
        caller: PrincipalId,
        mut escrow: Escrow,
        mut position: Option<CollateralPosition>,
        forced: bool,
    ) -> Result<()> {
        let id = escrow.id;
        let plan = match position.as_mut().filter(|p| p.is_collateralized) {
            None => Unwind {
                payout: escrow.amount,
                ..Unwind::default()
            },
            Some(p) if forced => {
                let (net, debt) = p.force_unwind()?;
                Unwind {
                    withdraw: net,
                    payout: net,
                    written_off: debt,
                }
            }
            Some(p) => {
                let supplied = p.unwind()?;
                Unwind {
                    withdraw: supplied,
                    payout: supplied,
                    written_off: Amount::ZERO,
                }
            }
        };
        let unwound = plan.withdraw.checked_add(plan.written_off)?;
        escrow.transition(EscrowStatus::Refunded)?;

        let depositor = escrow.depositor;
        self.journal(id).execute(|j| {
            if !plan.withdraw.is_zero() {
                j.withdraw(plan.withdraw)?;
            }
            j.transfer(self.vault, depositor, plan.payout)?;
            if !plan.written_off.is_zero() {
                j.settle_with_collateral(plan.written_off)?;
            }
            Ok(())
        })?;

        let now = Utc::now();
        let mut staged = Staged::new(caller);
        if escrow.fraud_flagged {
            staged.events.push((EventKind::FraudFlagged, escrow.amount));
        }
        staged.events.push((EventKind::Refunded, plan.payout));
        if !plan.written_off.is_zero() {
            staged.events.push((EventKind::DebtWrittenOff, plan.written_off));
            staged.write_off = Some(DebtWriteOff {
                escrow_id: id,
                debtor: depositor,
                amount: plan.written_off,
                at: now,
            });
            tracing::warn!(
                escrow = %id,
                debtor = %depositor.short(),
                debt = %plan.written_off,
                "outstanding debt written off against collateral"
            );
        }
        staged.escrow = Some(escrow);
        staged.position = position.filter(|_| !unwound.is_zero());
        self.commit(staged);

        tracing::info!(
            escrow = %id,
            depositor = %depositor.short(),
            payout = %plan.payout,
            forced,
            "escrow refunded"
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Collateral and borrowing
    // -----------------------------------------------------------------

    /// Pledge the escrow's full amount to the lending pool. Depositor only.
    ///
    /// # Errors
    /// - `Unauthorized` unless `caller` is the depositor
    /// - `InvalidStatus` unless ACTIVE
    /// - `AlreadyCollateralized` on a second pledge
    /// - `CustodyTransferFailed` if the pool rejects the supply
    pub fn deposit_as_collateral(&self, caller: PrincipalId, id: EscrowId) -> Result<()> {
        let _lease = self.in_flight.acquire(id)?;
        let (escrow, position) = self.load(id)?;
        escrow.ensure_active()?;
        Self::ensure_depositor(&escrow, caller, "collateralize")?;

        let mut position = position.unwrap_or_else(|| CollateralPosition::new(id));
        position.pledge(escrow.amount)?;

        self.journal(id).execute(|j| j.supply(escrow.amount))?;

        let mut staged = Staged::new(caller);
        staged.events.push((EventKind::Collateralized, escrow.amount));
        staged.position = Some(position);
        self.commit(staged);

        tracing::info!(escrow = %id, supplied = %escrow.amount, "escrow collateralized");
        Ok(())
    }

    /// Draw `amount` from the pool and pay it to the depositor, within the
    /// LTV bound. Depositor only; may be called repeatedly.
    ///
    /// # Errors
    /// - `ZeroAmount` if `amount` is zero
    /// - `Unauthorized` unless `caller` is the depositor
    /// - `NotCollateralized` if the escrow is not pledged
    /// - `ExceedsBorrowLimit` if the new debt would exceed 80% of supplied
    /// - `CustodyTransferFailed` if the pool or the payout fails
    pub fn borrow_against_escrow(
        &self,
        caller: PrincipalId,
        id: EscrowId,
        amount: Amount,
    ) -> Result<()> {
        if amount.is_zero() {
            return Err(EscrowLendError::ZeroAmount);
        }
        let _lease = self.in_flight.acquire(id)?;
        let (escrow, position) = self.load(id)?;
        escrow.ensure_active()?;
        Self::ensure_depositor(&escrow, caller, "borrow against")?;

        let mut position = position.ok_or(EscrowLendError::NotCollateralized(id))?;
        position.record_borrow(amount)?;

        let depositor = escrow.depositor;
        self.journal(id).execute(|j| {
            j.borrow(amount)?;
            j.transfer(self.vault, depositor, amount)
        })?;

        let mut staged = Staged::new(caller);
        staged.events.push((EventKind::Borrowed, amount));
        tracing::debug!(
            escrow = %id,
            %amount,
            borrowed = %position.borrowed,
            available = %position.available_to_borrow(),
            "borrowed against escrow"
        );
        staged.position = Some(position);
        self.commit(staged);
        Ok(())
    }

    /// Repay `amount` of the escrow's debt out of `caller`'s funds. Any
    /// principal may repay on the depositor's behalf. Overpayment is
    /// rejected.
    ///
    /// # Errors
    /// - `ZeroAmount` if `amount` is zero
    /// - `InvalidStatus` unless ACTIVE
    /// - `NotCollateralized` if the escrow is not pledged
    /// - `RepayExceedsDebt` if `amount` exceeds the outstanding debt
    /// - `CustodyTransferFailed` if the caller cannot pay or the pool fails
    pub fn repay_borrowed(&self, caller: PrincipalId, id: EscrowId, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(EscrowLendError::ZeroAmount);
        }
        if caller == self.vault || caller.is_nil() {
            return Err(EscrowLendError::unauthorized(
                "repayment must come from an external principal",
            ));
        }
        let _lease = self.in_flight.acquire(id)?;
        let (escrow, position) = self.load(id)?;
        escrow.ensure_active()?;

        let mut position = position.ok_or(EscrowLendError::NotCollateralized(id))?;
        position.record_repay(amount)?;

        self.journal(id).execute(|j| {
            j.transfer(caller, self.vault, amount)?;
            j.repay(amount)
        })?;

        let mut staged = Staged::new(caller);
        staged.events.push((EventKind::Repaid, amount));
        tracing::debug!(
            escrow = %id,
            payer = %caller.short(),
            %amount,
            borrowed = %position.borrowed,
            "repaid escrow debt"
        );
        staged.position = Some(position);
        self.commit(staged);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Authority administration
    // -----------------------------------------------------------------

    /// Replace (or clear, with `None`) the fraud authority. Owner only.
    ///
    /// # Errors
    /// - `Unauthorized` unless `caller` is the owner
    /// - `Configuration` for a null or custody-account authority
    pub fn set_fraud_authority(
        &self,
        caller: PrincipalId,
        authority: Option<PrincipalId>,
    ) -> Result<()> {
        if caller != self.owner {
            return Err(EscrowLendError::unauthorized(
                "only the owner may update the fraud authority",
            ));
        }
        if authority.is_some_and(|a| a.is_nil() || a == self.vault) {
            return Err(EscrowLendError::Configuration(
                "fraud authority must be a real, non-custody principal".into(),
            ));
        }
        *self
            .fraud_authority
            .write()
            .unwrap_or_else(PoisonError::into_inner) = authority;

        self.book().ledger.append(
            EventKind::AuthorityUpdated,
            None,
            caller,
            Amount::ZERO,
            0,
            Utc::now(),
        );
        let shown = authority.map_or_else(|| "none".to_string(), |a| a.short());
        tracing::warn!(authority = %shown, "fraud authority updated");
        Ok(())
    }

    #[must_use]
    pub fn fraud_authority(&self) -> Option<PrincipalId> {
        *self
            .fraud_authority
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_fraud_authority_configured(&self) -> bool {
        self.fraud_authority().is_some()
    }

    // -----------------------------------------------------------------
    // Views (last committed state)
    // -----------------------------------------------------------------

    /// # Errors
    /// - `EscrowNotFound` for an unknown id
    /// - `EscrowLocked` while an operation on `id` is in flight
    pub fn get_escrow(&self, id: EscrowId) -> Result<Escrow> {
        Ok(self.settled(id)?.0)
    }

    /// Collateral snapshot. An escrow that was never pledged reports an
    /// empty position.
    ///
    /// # Errors
    /// - `EscrowNotFound` for an unknown id
    /// - `EscrowLocked` while an operation on `id` is in flight
    pub fn get_collateral_info(&self, id: EscrowId) -> Result<CollateralInfo> {
        let (escrow, position) = self.settled(id)?;
        Ok(position
            .unwrap_or_else(|| CollateralPosition {
                last_updated: escrow.created_at,
                ..CollateralPosition::new(id)
            })
            .info())
    }

    /// `floor(supplied × 80%)`; zero when not collateralized.
    ///
    /// # Errors
    /// Same as [`Self::get_collateral_info`].
    pub fn get_borrow_limit(&self, id: EscrowId) -> Result<Amount> {
        Ok(self.get_collateral_info(id)?.borrow_limit)
    }

    /// # Errors
    /// Same as [`Self::get_collateral_info`].
    pub fn get_available_to_borrow(&self, id: EscrowId) -> Result<Amount> {
        Ok(self.get_collateral_info(id)?.available_to_borrow)
    }

    /// Escrows where `principal` is depositor or beneficiary, by id.
    #[must_use]
    pub fn escrows_for(&self, principal: PrincipalId) -> Vec<EscrowId> {
        self.book()
            .escrows
            .values()
            .filter(|e| e.involves(principal))
            .map(|e| e.id)
            .collect()
    }

    #[must_use]
    pub fn escrow_count(&self) -> usize {
        self.book().escrows.len()
    }

    /// Retained ledger events for one escrow, oldest first.
    #[must_use]
    pub fn events(&self, id: EscrowId) -> Vec<EscrowEvent> {
        self.book().ledger.for_escrow(id)
    }

    /// Hash of the newest ledger event.
    #[must_use]
    pub fn ledger_head(&self) -> [u8; 32] {
        self.book().ledger.head()
    }

    /// # Errors
    /// Returns `Internal` if any retained event was altered or dropped.
    pub fn verify_chain(&self) -> Result<()> {
        self.book().ledger.verify_chain()
    }

    /// Debt written off against `principal` by forced unwinds.
    #[must_use]
    pub fn write_offs(&self, principal: PrincipalId) -> Vec<DebtWriteOff> {
        self.book()
            .write_offs
            .iter()
            .filter(|w| w.debtor == principal)
            .cloned()
            .collect()
    }

    /// Audit engine records against custody and pool balances.
    ///
    /// # Errors
    /// - `EscrowLocked` while any operation is in flight
    /// - `ConservationViolation` on any mismatch
    pub fn verify_conservation(&self) -> Result<ConservationReport> {
        let book = self.book();
        if let Some(id) = self.in_flight.first_held() {
            tracing::debug!(escrow = %id, "conservation audit deferred, operation in flight");
            return Err(EscrowLendError::EscrowLocked(id));
        }
        let report = ConservationReport::tally(
            book.escrows
                .values()
                .map(|e| (e, book.positions.get(&e.id))),
            self.custody.balance_of(self.vault),
            self.pool.account(),
        )?;
        drop(book);
        if let Err(err) = report.verify() {
            tracing::error!(error = %err, "conservation audit failed");
            return Err(err);
        }
        Ok(report)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn journal(&self, id: EscrowId) -> Journal<'_> {
        Journal::new(id, self.vault, self.custody.as_ref(), self.pool.as_ref())
    }

    /// Copies of the committed records for `id`.
    fn load(&self, id: EscrowId) -> Result<(Escrow, Option<CollateralPosition>)> {
        let book = self.book();
        let escrow = book
            .escrows
            .get(&id)
            .cloned()
            .ok_or(EscrowLendError::EscrowNotFound(id))?;
        Ok((escrow, book.positions.get(&id).cloned()))
    }

    /// Copies of the committed records for `id`, refused while a lease on
    /// `id` is held. The lease check runs under the book lock.
    fn settled(&self, id: EscrowId) -> Result<(Escrow, Option<CollateralPosition>)> {
        let book = self.book();
        if self.in_flight.is_held(id) {
            return Err(EscrowLendError::EscrowLocked(id));
        }
        let escrow = book
            .escrows
            .get(&id)
            .cloned()
            .ok_or(EscrowLendError::EscrowNotFound(id))?;
        Ok((escrow, book.positions.get(&id).cloned()))
    }

    fn ensure_depositor(escrow: &Escrow, caller: PrincipalId, action: &str) -> Result<()> {
        if caller == escrow.depositor {
            Ok(())
        } else {
            Err(EscrowLendError::unauthorized(format!(
                "only the depositor may {action} {}",
                escrow.id
            )))
        }
    }

    /// Publish staged records. Infallible: every check ran before the
    /// external steps.
    fn commit(&self, staged: Staged) {
        let now = Utc::now();
        let mut book = self.book();

        let mut escrow_version = None;
        let mut escrow_id = None;
        if let Some(mut escrow) = staged.escrow {
            escrow.touch(now);
            escrow_version = Some(escrow.version);
            escrow_id = Some(escrow.id);
            book.escrows.insert(escrow.id, escrow);
        }
        let mut position_version = 0;
        if let Some(mut position) = staged.position {
            position.touch(now);
            position_version = position.version;
            escrow_id = escrow_id.or(Some(position.escrow_id));
            book.positions.insert(position.escrow_id, position);
        }
        if let Some(write_off) = staged.write_off {
            book.write_offs.push(write_off);
        }

        let version = escrow_version.unwrap_or(position_version);
        for (kind, amount) in staged.events {
            book.ledger
                .append(kind, escrow_id, staged.actor, amount, version, now);
        }
    }
}
