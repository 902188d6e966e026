//! Index consistency under reordering, drift, concurrency and outages.

use deadhand_core::{
    Address, BeneficiaryRecord, Clock, InactivityUnit, InactivityWindow, ManualClock, NewRecord,
    RecordKey, Timestamp,
};
use deadhand_index::{RecordStore, SqliteStore, StoreError};
use deadhand_ledger::{AddBeneficiary, LedgerGateway, MemoryLedger};
use deadhand_reconcile::{
    DiscardReason, LedgerEvent, Outbox, Outcome, ReconcileError, Reconciler, RetryPolicy,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const T0: Timestamp = Timestamp::from_millis(1_706_745_600_000);
const HOUR: i64 = 3_600_000;

const OWNER: Address = Address::new([0x1a; 32]);
const BENE: Address = Address::new([0x1b; 32]);
const WALLET: Address = Address::new([0x1c; 32]);

fn at(hours: i64) -> Timestamp {
    T0.add_millis(hours * HOUR)
}

fn record(beneficiary: Address) -> NewRecord {
    NewRecord::new(
        OWNER,
        beneficiary,
        WALLET,
        5,
        InactivityWindow::new(1, InactivityUnit::Days).unwrap(),
    )
    .unwrap()
}

fn key(beneficiary: Address) -> RecordKey {
    RecordKey {
        owner: OWNER,
        beneficiary,
    }
}

/// SQLite store that can be told to fail its next `n` operations.
struct FlakyStore {
    inner: SqliteStore,
    failures: AtomicU32,
}

impl FlakyStore {
    fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(0),
        }
    }

    fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        let left = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match left {
            Ok(_) => Err(StoreError::Unavailable("database is locked".into())),
            Err(_) => Ok(()),
        }
    }
}

impl RecordStore for FlakyStore {
    fn create(&self, record: &NewRecord, at: Timestamp) -> Result<BeneficiaryRecord, StoreError> {
        self.check()?;
        self.inner.create(record, at)
    }

    fn get(&self, key: &RecordKey) -> Result<Option<BeneficiaryRecord>, StoreError> {
        self.check()?;
        self.inner.get(key)
    }

    fn list_by_owner(&self, owner: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        self.check()?;
        self.inner.list_by_owner(owner)
    }

    fn list_by_beneficiary(
        &self,
        beneficiary: &Address,
    ) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        self.check()?;
        self.inner.list_by_beneficiary(beneficiary)
    }

    fn list_by_wallet(&self, wallet: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        self.check()?;
        self.inner.list_by_wallet(wallet)
    }

    fn touch(&self, key: &RecordKey, at: Timestamp) -> Result<BeneficiaryRecord, StoreError> {
        self.check()?;
        self.inner.touch(key, at)
    }

    fn remove(&self, key: &RecordKey) -> Result<BeneficiaryRecord, StoreError> {
        self.check()?;
        self.inner.remove(key)
    }

    fn remove_all_for_wallet(
        &self,
        owner: &Address,
        wallet: &Address,
        at: Timestamp,
    ) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.remove_all_for_wallet(owner, wallet, at)
    }

    fn wallet_closed_at(&self, wallet: &Address) -> Result<Option<Timestamp>, StoreError> {
        self.check()?;
        self.inner.wallet_closed_at(wallet)
    }
}

struct Node {
    dir: TempDir,
    clock: Arc<ManualClock>,
    ledger: Arc<MemoryLedger>,
    store: Arc<FlakyStore>,
    engine: Arc<Reconciler>,
}

fn node() -> Node {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(at(100)));
    let ledger = Arc::new(MemoryLedger::new(clock.clone()));
    ledger.open_wallet(OWNER, WALLET);
    let store = Arc::new(FlakyStore::new(
        SqliteStore::open(dir.path().join("index.sqlite")).unwrap(),
    ));
    let outbox = Outbox::open(dir.path().join("outbox.json")).unwrap();
    let engine = Reconciler::new(store.clone(), ledger.clone(), clock.clone())
        .with_retry(RetryPolicy::immediate(3))
        .with_outbox(outbox);
    Node {
        dir,
        clock,
        ledger,
        store,
        engine: Arc::new(engine),
    }
}

// ============================================================================
// No resurrection
// ============================================================================

#[tokio::test]
async fn test_late_check_in_after_transfer_is_discarded() {
    let n = node();
    n.engine.on_beneficiary_added(record(BENE), at(0)).await.unwrap();

    // Ledger order: check-in at 5h, transfer at 6h. Delivery order reversed.
    n.engine.on_transfer_executed(OWNER, WALLET, at(6)).await.unwrap();
    let outcome = n
        .engine
        .on_check_in(OWNER, BENE, Some(WALLET), at(5))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Discarded(DiscardReason::WalletClosed));
    assert!(n.store.inner.list_by_wallet(&WALLET).unwrap().is_empty());
}

#[tokio::test]
async fn test_check_in_then_transfer_leaves_nothing() {
    let n = node();
    n.engine.on_beneficiary_added(record(BENE), at(0)).await.unwrap();

    n.engine
        .on_check_in(OWNER, BENE, Some(WALLET), at(5))
        .await
        .unwrap();
    n.engine.on_transfer_executed(OWNER, WALLET, at(6)).await.unwrap();

    assert!(n.store.inner.list_by_wallet(&WALLET).unwrap().is_empty());
}

#[tokio::test]
async fn test_late_check_in_without_wallet_cannot_resolve_closed_record() {
    let n = node();
    n.engine.on_beneficiary_added(record(BENE), at(0)).await.unwrap();
    n.engine.on_transfer_executed(OWNER, WALLET, at(6)).await.unwrap();

    let outcome = n.engine.on_check_in(OWNER, BENE, None, at(5)).await.unwrap();
    assert_eq!(outcome, Outcome::Discarded(DiscardReason::NoRecord));
    assert!(n.store.inner.get(&key(BENE)).unwrap().is_none());
}

#[tokio::test]
async fn test_wallet_reopens_for_later_additions() {
    let n = node();
    n.engine.on_beneficiary_added(record(BENE), at(0)).await.unwrap();
    n.engine.on_transfer_executed(OWNER, WALLET, at(6)).await.unwrap();

    // A stale add confirmed before the closure stays closed
    let err = n
        .engine
        .on_beneficiary_added(record(BENE), at(6))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Store(StoreError::WalletClosed { .. })
    ));

    let outcome = n
        .engine
        .on_beneficiary_added(record(BENE), at(7))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Created(_)));
    assert_eq!(n.store.inner.wallet_closed_at(&WALLET).unwrap(), None);
}

#[tokio::test]
async fn test_replayed_transfer_spares_later_additions() {
    let n = node();
    let later = Address::new([0x1d; 32]);
    n.engine.on_beneficiary_added(record(BENE), at(0)).await.unwrap();

    // The transfer at 6h is confirmed during an outage and queued
    n.store.fail_next(3);
    n.engine
        .on_transfer_executed(OWNER, WALLET, at(6))
        .await
        .unwrap_err();

    // The wallet is funded again and a new beneficiary added at 7h
    n.engine.on_beneficiary_added(record(later), at(7)).await.unwrap();

    let report = n.engine.replay_pending().await.unwrap();
    assert_eq!(report.applied, 1);

    let left: Vec<_> = n
        .store
        .inner
        .list_by_wallet(&WALLET)
        .unwrap()
        .into_iter()
        .map(|r| r.beneficiary)
        .collect();
    assert_eq!(left, vec![later]);
    assert_eq!(n.store.inner.wallet_closed_at(&WALLET).unwrap(), None);
}

#[tokio::test]
async fn test_transfer_naming_another_owner_changes_nothing() {
    let n = node();
    n.engine.on_beneficiary_added(record(BENE), at(0)).await.unwrap();

    let stranger = Address::new([0x1e; 32]);
    let outcome = n
        .engine
        .on_transfer_executed(stranger, WALLET, at(6))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Discarded(DiscardReason::OwnerMismatch));
    assert_eq!(n.store.inner.wallet_closed_at(&WALLET).unwrap(), None);

    let outcome = n
        .engine
        .on_check_in(OWNER, BENE, Some(WALLET), at(7))
        .await
        .unwrap();
    assert_eq!(outcome.record().unwrap().last_checkin, at(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_check_ins_racing_a_transfer() {
    let n = node();
    let others: Vec<Address> = (0..4u8).map(|i| Address::new([0x30 + i; 32])).collect();
    for bene in others.iter().chain(std::iter::once(&BENE)) {
        n.engine.on_beneficiary_added(record(*bene), at(0)).await.unwrap();
    }

    let mut tasks = Vec::new();
    for (i, bene) in others.iter().enumerate() {
        for k in 0..5i64 {
            let engine = n.engine.clone();
            let bene = *bene;
            let confirmed = T0.add_millis((i as i64 * 5 + k + 1) * 60_000);
            tasks.push(tokio::spawn(async move {
                engine
                    .on_check_in(OWNER, bene, Some(WALLET), confirmed)
                    .await
            }));
        }
    }
    let engine = n.engine.clone();
    tasks.push(tokio::spawn(async move {
        engine.on_transfer_executed(OWNER, WALLET, at(2)).await
    }));

    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(!matches!(outcome, Outcome::Created(_) | Outcome::Healed(_)));
    }
    assert!(n.store.inner.list_by_wallet(&WALLET).unwrap().is_empty());
}

// ============================================================================
// Self-healing
// ============================================================================

#[tokio::test]
async fn test_check_in_rebuilds_record_missing_from_index() {
    let n = node();

    // Confirmed on the ledger, but the mirror never happened
    let window = InactivityWindow::new(2, InactivityUnit::Days).unwrap();
    n.ledger
        .add_beneficiary(&AddBeneficiary {
            wallet: WALLET,
            beneficiary: BENE,
            allocation: 9,
            window,
        })
        .await
        .unwrap();
    n.clock.advance_millis(3 * HOUR);

    let outcome = n
        .engine
        .on_check_in(OWNER, BENE, Some(WALLET), n.clock.now())
        .await
        .unwrap();
    let Outcome::Healed(healed) = outcome else {
        panic!("expected a healed record, got {:?}", outcome);
    };
    assert_eq!(healed.allocation, 9);
    assert_eq!(healed.window, window);
    assert_eq!(healed.last_checkin, at(103));

    let stored = n.store.inner.get(&key(BENE)).unwrap().unwrap();
    assert_eq!(stored.wallet, WALLET);
}

#[tokio::test]
async fn test_check_in_unknown_to_ledger_is_discarded() {
    let n = node();
    let outcome = n
        .engine
        .on_check_in(OWNER, BENE, Some(WALLET), at(100))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Discarded(DiscardReason::NotOnLedger));
    assert!(n.store.inner.list_by_owner(&OWNER).unwrap().is_empty());
}

// ============================================================================
// Outages
// ============================================================================

#[tokio::test]
async fn test_transient_outage_is_retried_transparently() {
    let n = node();
    n.store.fail_next(2);
    let outcome = n.engine.on_beneficiary_added(record(BENE), at(0)).await.unwrap();
    assert!(matches!(outcome, Outcome::Created(_)));
    assert!(n.engine.outbox().is_empty());
}

#[tokio::test]
async fn test_persistent_outage_queues_and_survives_restart() {
    let n = node();
    n.store.fail_next(3);
    let err = n
        .engine
        .on_beneficiary_added(record(BENE), at(0))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Queued { attempts: 3, .. }));
    assert_eq!(err.kind(), "queued");
    assert!(n.store.inner.list_by_owner(&OWNER).unwrap().is_empty());

    // A fresh process over the same data directory picks the event up
    let outbox = Outbox::open(n.dir.path().join("outbox.json")).unwrap();
    assert_eq!(outbox.len(), 1);
    let pending = outbox.pending();
    assert!(matches!(
        pending[0].event,
        LedgerEvent::BeneficiaryAdded { .. }
    ));
    assert_eq!(pending[0].attempts, 3);

    let restarted = Reconciler::new(n.store.clone(), n.ledger.clone(), n.clock.clone())
        .with_retry(RetryPolicy::immediate(3))
        .with_outbox(outbox);
    let report = restarted.replay_pending().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.remaining, 0);
    assert!(restarted.outbox().is_empty());

    let stored = n.store.inner.list_by_owner(&OWNER).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].created_at, at(0));
}

#[tokio::test]
async fn test_replay_drops_events_overtaken_by_closure() {
    let n = node();
    n.store.fail_next(3);
    n.engine
        .on_beneficiary_added(record(BENE), at(0))
        .await
        .unwrap_err();

    // Meanwhile the wallet was closed
    n.engine.on_transfer_executed(OWNER, WALLET, at(6)).await.unwrap();

    let report = n.engine.replay_pending().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert!(n.engine.outbox().is_empty());
    assert!(n.store.inner.list_by_wallet(&WALLET).unwrap().is_empty());
}

#[tokio::test]
async fn test_replay_keeps_events_while_outage_lasts() {
    let n = node();
    n.store.fail_next(3);
    n.engine
        .on_transfer_executed(OWNER, WALLET, at(1))
        .await
        .unwrap_err();

    n.store.fail_next(3);
    let report = n.engine.replay_pending().await.unwrap();
    assert_eq!(report.remaining, 1);
    assert_eq!(n.engine.outbox().pending()[0].attempts, 6);

    let report = n.engine.replay_pending().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(n.store.inner.wallet_closed_at(&WALLET).unwrap(), Some(at(1)));
}
