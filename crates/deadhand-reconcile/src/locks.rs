//! Per-wallet serialization of index mutations.
//!
//! Different wallets never contend. A wallet has exactly one owner, so
//! serializing per wallet also orders every (owner, beneficiary) pair on it.

use deadhand_core::Address;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type WalletGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct WalletLocks {
    locks: Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `wallet`. Released when the guard drops.
    pub async fn acquire(&self, wallet: &Address) -> WalletGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(*wallet).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Wallets with a held or awaited lock.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}
