//! End-to-end lifecycle of a beneficiary allocation.
//!
//! Drives owner and beneficiary actions through the confirm-then-mirror
//! path (in-memory ledger, SQLite index) and checks what the read views
//! report at each step.

use deadhand_core::{
    Address, Clock, InactivityUnit, InactivityWindow, ManualClock, NewRecord, Timestamp,
    ValidationError,
};
use deadhand_index::{QuerySurface, RecordStore, SqliteStore, StoreError};
use deadhand_ledger::{LedgerError, LedgerReader, MemoryLedger};
use deadhand_reconcile::{ActionError, Custodian, Outcome, Reconciler, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const T0: Timestamp = Timestamp::from_millis(1_706_745_600_000);
const HOUR: i64 = 3_600_000;

const OWNER: Address = Address::new([0x0a; 32]);
const BENE: Address = Address::new([0x0b; 32]);
const WALLET: Address = Address::new([0x0c; 32]);

struct World {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    ledger: Arc<MemoryLedger>,
    store: Arc<SqliteStore>,
    custodian: Custodian,
    query: QuerySurface,
}

fn world() -> World {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let ledger = Arc::new(MemoryLedger::new(clock.clone()));
    ledger.open_wallet(OWNER, WALLET);
    let store = Arc::new(SqliteStore::open(dir.path().join("index.sqlite")).unwrap());

    let engine = Reconciler::new(store.clone(), ledger.clone(), clock.clone())
        .with_retry(RetryPolicy::immediate(3));
    let custodian = Custodian::new(ledger.clone(), Arc::new(engine))
        .with_confirm_timeout(Duration::from_secs(30));
    let query = QuerySurface::new(store.clone());

    World {
        _dir: dir,
        clock,
        ledger,
        store,
        custodian,
        query,
    }
}

fn one_day(beneficiary: Address) -> NewRecord {
    NewRecord::new(
        OWNER,
        beneficiary,
        WALLET,
        5,
        InactivityWindow::parse(1, "days").unwrap(),
    )
    .unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_unattended_allocation_becomes_claimable() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();

    w.clock.set(T0.add_millis(12 * HOUR));
    let owner_view = w.query.owner_view(&OWNER, w.clock.now()).unwrap();
    assert_eq!(owner_view.len(), 1);
    assert_eq!(owner_view[0].record.beneficiary, BENE);
    assert!(!owner_view[0].claimable);
    assert_eq!(owner_view[0].remaining_ms, 43_200_000);

    w.clock.set(T0.add_millis(25 * HOUR));
    let claim_view = w.query.beneficiary_claim_view(&BENE, w.clock.now()).unwrap();
    assert_eq!(claim_view.actionable.len(), 1);
    assert!(claim_view.pending.is_empty());
    assert!(claim_view.actionable[0].claimable);
}

#[tokio::test]
async fn test_check_in_pushes_deadline_out() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();

    w.clock.set(T0.add_millis(20 * HOUR));
    w.custodian.check_in(OWNER, BENE, WALLET).await.unwrap();

    w.clock.set(T0.add_millis(25 * HOUR));
    let claim_view = w.query.beneficiary_claim_view(&BENE, w.clock.now()).unwrap();
    assert!(claim_view.actionable.is_empty());
    assert_eq!(claim_view.pending.len(), 1);
    assert_eq!(claim_view.pending[0].remaining_ms, 19 * HOUR);
    assert!(!claim_view.pending[0].claimable);
}

#[tokio::test]
async fn test_claim_removes_record_from_both_views() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();
    w.clock.set(T0.add_millis(25 * HOUR));

    let outcome = w.custodian.claim(BENE, WALLET).await.unwrap();
    assert!(matches!(outcome, Outcome::Removed(_)));

    let now = w.clock.now();
    assert!(w.query.owner_view(&OWNER, now).unwrap().is_empty());
    assert!(w.query.beneficiary_claim_view(&BENE, now).unwrap().is_empty());

    let snapshot = w.ledger.wallet(&WALLET).await.unwrap().unwrap();
    assert!(snapshot.beneficiary(&BENE).is_none());
}

#[tokio::test]
async fn test_transfer_closes_every_allocation_on_the_wallet() {
    let w = world();
    let other = Address::new([0x0d; 32]);
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();
    w.custodian.add_beneficiary(one_day(other)).await.unwrap();
    w.clock.advance_millis(HOUR);

    let outcome = w.custodian.execute_transfer(WALLET).await.unwrap();
    assert_eq!(outcome, Outcome::WalletClosed { removed: 2 });
    assert!(w.store.list_by_wallet(&WALLET).unwrap().is_empty());
    assert_eq!(
        w.store.wallet_closed_at(&WALLET).unwrap(),
        Some(T0.add_millis(HOUR))
    );
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_repeated_check_in_at_same_instant_is_idempotent() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();
    w.clock.set(T0.add_millis(5 * HOUR));

    let first = w.custodian.check_in(OWNER, BENE, WALLET).await.unwrap();
    let second = w.custodian.check_in(OWNER, BENE, WALLET).await.unwrap();
    assert_eq!(
        first.record().unwrap().last_checkin,
        second.record().unwrap().last_checkin
    );
    assert_eq!(
        w.store.list_by_owner(&OWNER).unwrap()[0].last_checkin,
        T0.add_millis(5 * HOUR)
    );
}

#[tokio::test]
async fn test_bad_input_rejected_before_anything_happens() {
    let w = world();

    assert!(matches!(
        InactivityWindow::parse(1, "fortnights"),
        Err(ValidationError::UnsupportedUnit(_))
    ));
    let window = InactivityWindow::new(1, InactivityUnit::Days).unwrap();
    assert_eq!(
        NewRecord::new(OWNER, BENE, WALLET, 0, window),
        Err(ValidationError::NonPositiveAllocation)
    );

    // A record assembled by hand still cannot reach the index
    let zero = NewRecord {
        owner: OWNER,
        beneficiary: BENE,
        wallet: WALLET,
        allocation: 0,
        window,
    };
    assert!(matches!(
        w.store.create(&zero, T0),
        Err(StoreError::Invalid(ValidationError::NonPositiveAllocation))
    ));
    let err = w.custodian.add_beneficiary(zero).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    assert!(w.store.list_by_owner(&OWNER).unwrap().is_empty());
    let snapshot = w.ledger.wallet(&WALLET).await.unwrap().unwrap();
    assert!(snapshot.beneficiaries.is_empty());
}

#[tokio::test]
async fn test_duplicate_add_is_rejected_by_ledger_first() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();
    let err = w.custodian.add_beneficiary(one_day(BENE)).await.unwrap_err();
    assert!(matches!(err, ActionError::Ledger(LedgerError::Rejected { .. })));
    assert_eq!(w.store.list_by_owner(&OWNER).unwrap().len(), 1);
}

#[tokio::test]
async fn test_early_claim_leaves_index_untouched() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();
    w.clock.set(T0.add_millis(23 * HOUR));

    let err = w.custodian.claim(BENE, WALLET).await.unwrap_err();
    assert!(matches!(err, ActionError::Ledger(_)));
    let claim_view = w.query.beneficiary_claim_view(&BENE, w.clock.now()).unwrap();
    assert_eq!(claim_view.pending.len(), 1);
}

#[tokio::test]
async fn test_ledger_rejection_never_writes() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();
    w.clock.set(T0.add_millis(25 * HOUR));

    w.ledger.reject_next("wallet frozen");
    let err = w.custodian.execute_transfer(WALLET).await.unwrap_err();
    assert_eq!(err.kind(), "ledger_error");
    assert_eq!(w.store.list_by_wallet(&WALLET).unwrap().len(), 1);
    assert_eq!(w.store.wallet_closed_at(&WALLET).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_slow_confirmation_is_indeterminate() {
    let w = world();
    w.custodian.add_beneficiary(one_day(BENE)).await.unwrap();
    w.ledger.set_latency(Duration::from_secs(45));

    w.clock.set(T0.add_millis(25 * HOUR));
    let err = w.custodian.claim(BENE, WALLET).await.unwrap_err();
    assert!(matches!(
        err,
        ActionError::Ledger(LedgerError::Indeterminate { .. })
    ));
    assert_eq!(err.kind(), "ledger_indeterminate");

    // The index still shows the record; the ledger has to be re-queried
    // before the caller retries.
    assert_eq!(w.store.list_by_beneficiary(&BENE).unwrap().len(), 1);
}
