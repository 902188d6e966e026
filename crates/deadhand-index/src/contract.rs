//! Behaviour every `RecordStore` must share. Each check uses its own
//! addresses so they can run against one store instance.

use crate::{RecordStore, StoreError};
use deadhand_core::{Address, InactivityUnit, InactivityWindow, NewRecord, RecordKey, Timestamp};

pub const T0: Timestamp = Timestamp::from_millis(1_706_745_600_000);

pub fn addr(n: u8) -> Address {
    Address::new([n; 32])
}

pub fn new_record(owner: u8, beneficiary: u8, wallet: u8) -> NewRecord {
    NewRecord::new(
        addr(owner),
        addr(beneficiary),
        addr(wallet),
        5,
        InactivityWindow::new(1, InactivityUnit::Days).unwrap(),
    )
    .unwrap()
}

fn key(owner: u8, beneficiary: u8) -> RecordKey {
    RecordKey {
        owner: addr(owner),
        beneficiary: addr(beneficiary),
    }
}

pub fn run_all(store: &dyn RecordStore) {
    create_and_get(store);
    duplicate_key(store);
    invalid_record(store);
    listing_order(store);
    touch_never_goes_backwards(store);
    touch_missing(store);
    remove_one(store);
    remove_all_for_wallet(store);
    closed_wallet_blocks_stale_create(store);
    closure_spares_later_records(store);
    closure_by_other_owner_changes_nothing(store);
}

fn create_and_get(store: &dyn RecordStore) {
    let created = store.create(&new_record(10, 11, 12), T0).unwrap();
    assert_eq!(created.last_checkin, T0);
    assert_eq!(created.created_at, T0);
    assert_eq!(created.allocation, 5);

    let fetched = store.get(&key(10, 11)).unwrap().unwrap();
    assert_eq!(fetched, created);
    assert!(store.get(&key(10, 99)).unwrap().is_none());
}

fn duplicate_key(store: &dyn RecordStore) {
    store.create(&new_record(20, 21, 22), T0).unwrap();
    // Same pair on a different wallet is still a duplicate
    let err = store.create(&new_record(20, 21, 23), T0).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(k) if k == key(20, 21)));
    assert_eq!(store.list_by_owner(&addr(20)).unwrap().len(), 1);
}

fn invalid_record(store: &dyn RecordStore) {
    let mut record = new_record(30, 31, 32);
    record.allocation = 0;
    let err = store.create(&record, T0).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
    assert!(store.list_by_owner(&addr(30)).unwrap().is_empty());
}

fn listing_order(store: &dyn RecordStore) {
    store.create(&new_record(40, 43, 49), T0).unwrap();
    store.create(&new_record(40, 41, 49), T0.add_millis(1)).unwrap();
    store.create(&new_record(40, 42, 48), T0.add_millis(2)).unwrap();
    store.create(&new_record(44, 41, 47), T0.add_millis(3)).unwrap();

    let owned: Vec<_> = store
        .list_by_owner(&addr(40))
        .unwrap()
        .into_iter()
        .map(|r| r.beneficiary)
        .collect();
    assert_eq!(owned, vec![addr(43), addr(41), addr(42)]);

    let claimable: Vec<_> = store
        .list_by_beneficiary(&addr(41))
        .unwrap()
        .into_iter()
        .map(|r| r.owner)
        .collect();
    assert_eq!(claimable, vec![addr(40), addr(44)]);

    assert_eq!(store.list_by_wallet(&addr(49)).unwrap().len(), 2);
}

fn touch_never_goes_backwards(store: &dyn RecordStore) {
    store.create(&new_record(50, 51, 52), T0).unwrap();

    let later = T0.add_millis(20 * 3_600_000);
    assert_eq!(store.touch(&key(50, 51), later).unwrap().last_checkin, later);
    // Repeating is idempotent
    assert_eq!(store.touch(&key(50, 51), later).unwrap().last_checkin, later);
    // A stale check-in does not rewind the clock
    let stale = T0.add_millis(3_600_000);
    assert_eq!(store.touch(&key(50, 51), stale).unwrap().last_checkin, later);

    let record = store.get(&key(50, 51)).unwrap().unwrap();
    assert_eq!(record.created_at, T0);
}

fn touch_missing(store: &dyn RecordStore) {
    let err = store.touch(&key(60, 61), T0).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(k) if k == key(60, 61)));
}

fn remove_one(store: &dyn RecordStore) {
    store.create(&new_record(70, 71, 73), T0).unwrap();
    store.create(&new_record(70, 72, 73), T0).unwrap();

    let removed = store.remove(&key(70, 71)).unwrap();
    assert_eq!(removed.beneficiary, addr(71));
    assert!(matches!(
        store.remove(&key(70, 71)).unwrap_err(),
        StoreError::NotFound(_)
    ));
    assert_eq!(store.list_by_wallet(&addr(73)).unwrap().len(), 1);
    // Single removal does not close the wallet
    assert!(store.wallet_closed_at(&addr(73)).unwrap().is_none());
}

fn remove_all_for_wallet(store: &dyn RecordStore) {
    store.create(&new_record(80, 81, 83), T0).unwrap();
    store.create(&new_record(80, 82, 83), T0).unwrap();
    store.create(&new_record(80, 84, 85), T0).unwrap();

    let closed = T0.add_millis(1_000);
    assert_eq!(store.remove_all_for_wallet(&addr(80), &addr(83), closed).unwrap(), 2);
    assert!(store.list_by_wallet(&addr(83)).unwrap().is_empty());
    assert_eq!(store.list_by_owner(&addr(80)).unwrap().len(), 1);
    assert_eq!(store.wallet_closed_at(&addr(83)).unwrap(), Some(closed));

    // Nothing left to delete, tombstone keeps the latest closure
    let again = T0.add_millis(2_000);
    assert_eq!(store.remove_all_for_wallet(&addr(80), &addr(83), again).unwrap(), 0);
    store.remove_all_for_wallet(&addr(80), &addr(83), closed).unwrap();
    assert_eq!(store.wallet_closed_at(&addr(83)).unwrap(), Some(again));
}

fn closed_wallet_blocks_stale_create(store: &dyn RecordStore) {
    let closed = T0.add_millis(10_000);
    store.remove_all_for_wallet(&addr(90), &addr(93), closed).unwrap();

    // Confirmed before (or at) the closure: must not reappear
    let err = store.create(&new_record(90, 91, 93), T0).unwrap_err();
    assert!(matches!(err, StoreError::WalletClosed { closed_at, .. } if closed_at == closed));
    let err = store.create(&new_record(90, 91, 93), closed).unwrap_err();
    assert!(matches!(err, StoreError::WalletClosed { .. }));

    // Confirmed after the closure: wallet reopened
    let reopened = closed.add_millis(1);
    store.create(&new_record(90, 91, 93), reopened).unwrap();
    assert!(store.wallet_closed_at(&addr(93)).unwrap().is_none());
}

fn closure_spares_later_records(store: &dyn RecordStore) {
    let hour = 3_600_000;
    let closed = T0.add_millis(6 * hour);

    // Ledger order: add, close, re-open with a new add
    store.create(&new_record(100, 101, 103), T0).unwrap();
    assert_eq!(store.remove_all_for_wallet(&addr(100), &addr(103), closed).unwrap(), 1);
    store
        .create(&new_record(100, 102, 103), T0.add_millis(7 * hour))
        .unwrap();

    // Same events, closure delivered last
    store.create(&new_record(104, 101, 105), T0).unwrap();
    store
        .create(&new_record(104, 102, 105), T0.add_millis(7 * hour))
        .unwrap();
    assert_eq!(store.remove_all_for_wallet(&addr(104), &addr(105), closed).unwrap(), 1);

    for wallet in [addr(103), addr(105)] {
        let left: Vec<_> = store
            .list_by_wallet(&wallet)
            .unwrap()
            .into_iter()
            .map(|r| r.beneficiary)
            .collect();
        assert_eq!(left, vec![addr(102)]);
        assert!(store.wallet_closed_at(&wallet).unwrap().is_none());
    }
}

fn closure_by_other_owner_changes_nothing(store: &dyn RecordStore) {
    store.create(&new_record(110, 111, 113), T0).unwrap();

    let closed = T0.add_millis(1_000);
    assert_eq!(store.remove_all_for_wallet(&addr(119), &addr(113), closed).unwrap(), 0);
    assert_eq!(store.list_by_wallet(&addr(113)).unwrap().len(), 1);
    assert!(store.wallet_closed_at(&addr(113)).unwrap().is_none());

    // The real owner can still check in
    let later = T0.add_millis(2_000);
    assert_eq!(store.touch(&key(110, 111), later).unwrap().last_checkin, later);
}
