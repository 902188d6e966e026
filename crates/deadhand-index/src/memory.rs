//! In-memory record store for tests and simulations.

use crate::{RecordStore, StoreError};
use deadhand_core::{Address, BeneficiaryRecord, NewRecord, RecordId, RecordKey, Timestamp};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    /// Creation order
    records: Vec<BeneficiaryRecord>,
    closed: HashMap<Address, (Address, Timestamp)>,
    /// Remaining operations to fail with `Unavailable`
    failures: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.lock_raw().failures = n;
    }

    fn lock_raw(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let mut state = self.lock_raw();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(state)
    }
}

impl MemoryState {
    fn position(&self, key: &RecordKey) -> Option<usize> {
        self.records.iter().position(|r| &r.key() == key)
    }

    fn filtered<F>(&self, pred: F) -> Vec<BeneficiaryRecord>
    where
        F: Fn(&BeneficiaryRecord) -> bool,
    {
        self.records.iter().filter(|r| pred(r)).cloned().collect()
    }
}

impl RecordStore for MemoryStore {
    fn create(&self, record: &NewRecord, at: Timestamp) -> Result<BeneficiaryRecord, StoreError> {
        record.validate()?;
        let mut state = self.lock()?;

        if let Some(&(_, closed_at)) = state.closed.get(&record.wallet) {
            if closed_at >= at {
                return Err(StoreError::WalletClosed {
                    wallet: record.wallet,
                    closed_at,
                });
            }
        }
        if state.position(&record.key()).is_some() {
            return Err(StoreError::Duplicate(record.key()));
        }
        state.closed.remove(&record.wallet);

        state.next_id += 1;
        let stored = BeneficiaryRecord {
            id: RecordId(state.next_id),
            owner: record.owner,
            beneficiary: record.beneficiary,
            wallet: record.wallet,
            allocation: record.allocation,
            window: record.window,
            last_checkin: at,
            created_at: at,
        };
        state.records.push(stored.clone());
        Ok(stored)
    }

    fn get(&self, key: &RecordKey) -> Result<Option<BeneficiaryRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.position(key).map(|i| state.records[i].clone()))
    }

    fn list_by_owner(&self, owner: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        Ok(self.lock()?.filtered(|r| &r.owner == owner))
    }

    fn list_by_beneficiary(
        &self,
        beneficiary: &Address,
    ) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        Ok(self.lock()?.filtered(|r| &r.beneficiary == beneficiary))
    }

    fn list_by_wallet(&self, wallet: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError> {
        Ok(self.lock()?.filtered(|r| &r.wallet == wallet))
    }

    fn touch(&self, key: &RecordKey, at: Timestamp) -> Result<BeneficiaryRecord, StoreError> {
        let mut state = self.lock()?;
        let i = state.position(key).ok_or(StoreError::NotFound(*key))?;
        let record = &mut state.records[i];
        record.last_checkin = record.last_checkin.max(at);
        Ok(record.clone())
    }

    fn remove(&self, key: &RecordKey) -> Result<BeneficiaryRecord, StoreError> {
        let mut state = self.lock()?;
        let i = state.position(key).ok_or(StoreError::NotFound(*key))?;
        Ok(state.records.remove(i))
    }

    fn remove_all_for_wallet(
        &self,
        owner: &Address,
        wallet: &Address,
        at: Timestamp,
    ) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let on_wallet = |r: &BeneficiaryRecord| &r.wallet == wallet;
        if state.records.iter().any(|r| on_wallet(r) && &r.owner != owner) {
            return Ok(0);
        }

        let before = state.records.len();
        state
            .records
            .retain(|r| !(on_wallet(r) && &r.owner == owner && r.created_at <= at));
        let deleted = before - state.records.len();

        let closed = state
            .closed
            .get(wallet)
            .map_or(at, |&(_, existing)| existing.max(at));
        let reopened = state
            .records
            .iter()
            .any(|r| on_wallet(r) && r.created_at > closed);
        if !reopened {
            state.closed.insert(*wallet, (*owner, closed));
        }
        Ok(deleted)
    }

    fn wallet_closed_at(&self, wallet: &Address) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.lock()?.closed.get(wallet).map(|&(_, at)| at))
    }
}
