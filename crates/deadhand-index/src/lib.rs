//! deadhand Index
//!
//! The off-chain mirror of ledger beneficiary entries. It exists so expiry
//! questions ("what does this owner watch?", "what can this beneficiary
//! claim?") can be answered without scanning the ledger.
//!
//! Records are only ever written by the reconciliation engine after a ledger
//! confirmation. The [`RecordStore`] contract is what the engine relies on:
//!
//! - one active record per (owner, beneficiary)
//! - `touch` never moves `last_checkin` backwards
//! - `remove_all_for_wallet` deletes the wallet's records confirmed up to the
//!   closure and leaves a closure tombstone in one atomic step
//!
//! [`SqliteStore`] is the durable implementation, [`MemoryStore`] backs tests
//! and simulations. [`QuerySurface`] joins either with expiry evaluation.

pub mod memory;
pub mod query;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod contract;

pub use memory::MemoryStore;
pub use query::{ClaimView, QueryError, QuerySurface, RecordView};
pub use sqlite::SqliteStore;

use deadhand_core::{Address, BeneficiaryRecord, NewRecord, RecordKey, Timestamp, ValidationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("record already exists: {0}")]
    Duplicate(RecordKey),

    #[error("no active record: {0}")]
    NotFound(RecordKey),

    #[error("wallet {wallet} was closed at {closed_at}")]
    WalletClosed { wallet: Address, closed_at: Timestamp },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Invalid(_) => "validation",
            StoreError::Duplicate(_) => "duplicate_record",
            StoreError::NotFound(_) => "not_found",
            StoreError::WalletClosed { .. } => "wallet_closed",
            StoreError::Unavailable(_) => "store_unavailable",
            StoreError::Corrupt(_) => "store_corrupt",
        }
    }

    /// The same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Persistence contract for beneficiary records.
///
/// Timestamps are always passed in; implementations never read a clock.
/// Callers clamp them to local time first, so `last_checkin` and
/// `created_at` are never in the future.
pub trait RecordStore: Send + Sync {
    /// Insert a record with `last_checkin = created_at = at`.
    ///
    /// Fails with [`StoreError::Duplicate`] if the key is active and with
    /// [`StoreError::WalletClosed`] if the wallet was closed at or after `at`.
    /// A successful create clears an older closure tombstone.
    fn create(&self, record: &NewRecord, at: Timestamp) -> Result<BeneficiaryRecord, StoreError>;

    fn get(&self, key: &RecordKey) -> Result<Option<BeneficiaryRecord>, StoreError>;

    /// Active records of an owner in creation order.
    fn list_by_owner(&self, owner: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError>;

    /// Active records naming `beneficiary`, in creation order.
    fn list_by_beneficiary(
        &self,
        beneficiary: &Address,
    ) -> Result<Vec<BeneficiaryRecord>, StoreError>;

    fn list_by_wallet(&self, wallet: &Address) -> Result<Vec<BeneficiaryRecord>, StoreError>;

    /// Set `last_checkin = max(last_checkin, at)`.
    fn touch(&self, key: &RecordKey, at: Timestamp) -> Result<BeneficiaryRecord, StoreError>;

    /// Delete exactly one record, returning it.
    fn remove(&self, key: &RecordKey) -> Result<BeneficiaryRecord, StoreError>;

    /// Delete every record of `owner` on `wallet` created at or before `at`
    /// and tombstone the wallet as closed at `at`. Returns the number of
    /// records deleted.
    ///
    /// Records created after `at` survive, and their presence means the
    /// wallet was re-opened, so no tombstone is written. If the wallet is
    /// indexed under a different owner nothing changes and 0 is returned.
    fn remove_all_for_wallet(
        &self,
        owner: &Address,
        wallet: &Address,
        at: Timestamp,
    ) -> Result<usize, StoreError>;

    /// When the wallet was last closed, if it is still closed.
    fn wallet_closed_at(&self, wallet: &Address) -> Result<Option<Timestamp>, StoreError>;
}
