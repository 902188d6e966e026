//! deadhand Ledger Gateway
//!
//! The ledger is the system of record for custody and transfers. This crate
//! only describes how deadhand talks to it:
//!
//! - [`LedgerReader`]: fetch the authoritative state of a wallet (used for
//!   self-healing when the off-chain index has drifted)
//! - [`LedgerGateway`]: submit owner/beneficiary actions and wait for a
//!   [`Confirmation`]
//! - [`confirm_within`]: bound a confirmation wait; a timeout is reported as
//!   indeterminate, never as failure
//!
//! # Example
//!
//! ```ignore
//! use deadhand_ledger::{confirm_within, GraphqlReader, LedgerReader};
//!
//! let reader = GraphqlReader::new("https://sui-testnet.mystenlabs.com/graphql", timeout)?;
//! if let Some(wallet) = reader.wallet(&wallet_id).await? {
//!     println!("{} beneficiaries", wallet.beneficiaries.len());
//! }
//! ```

pub mod decode;
pub mod graphql;
pub mod memory;
pub mod snapshot;

pub use decode::{DecodeError, MoveValue};
pub use graphql::GraphqlReader;
pub use memory::MemoryLedger;
pub use snapshot::{LedgerBeneficiary, WalletSnapshot};

use async_trait::async_trait;
use deadhand_core::{Address, InactivityWindow, Timestamp};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default time to wait for a ledger confirmation.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} not confirmed within {waited:?}; outcome unknown, re-query the ledger before retrying")]
    Indeterminate {
        operation: &'static str,
        waited: Duration,
    },

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("malformed ledger payload: {0}")]
    Decode(#[from] DecodeError),
}

impl LedgerError {
    /// Timed out waiting; the action may or may not have been applied.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, LedgerError::Indeterminate { .. })
    }

    /// Worth retrying later without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Transport(_) | LedgerError::Indeterminate { .. }
        )
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        LedgerError::Transport(e.to_string())
    }
}

/// Proof that the ledger accepted an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Transaction digest
    pub digest: String,
    /// Wallet the action applied to
    pub wallet: Address,
    /// Owner of that wallet
    pub owner: Address,
    /// Beneficiary the action concerned, if any
    pub beneficiary: Option<Address>,
    /// Ledger time of the confirmation
    pub timestamp: Timestamp,
}

/// Request to lock an allocation for a new beneficiary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddBeneficiary {
    pub wallet: Address,
    pub beneficiary: Address,
    pub allocation: u64,
    pub window: InactivityWindow,
}

/// Read access to authoritative wallet state.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Fetch a wallet. `Ok(None)` means the ledger has no such wallet.
    async fn wallet(&self, wallet: &Address) -> Result<Option<WalletSnapshot>, LedgerError>;
}

/// Actions the index mirrors. Every method blocks until the ledger confirms
/// or rejects.
#[async_trait]
pub trait LedgerGateway: LedgerReader {
    async fn add_beneficiary(&self, request: &AddBeneficiary) -> Result<Confirmation, LedgerError>;

    async fn check_in(
        &self,
        wallet: &Address,
        beneficiary: &Address,
    ) -> Result<Confirmation, LedgerError>;

    /// Beneficiary withdrawal. The ledger enforces claimability.
    async fn claim(&self, wallet: &Address, beneficiary: &Address)
        -> Result<Confirmation, LedgerError>;

    async fn revoke_beneficiary(
        &self,
        wallet: &Address,
        beneficiary: &Address,
    ) -> Result<Confirmation, LedgerError>;

    /// Drain the wallet, ending every beneficiary entry on it.
    async fn execute_transfer(&self, wallet: &Address) -> Result<Confirmation, LedgerError>;
}

/// Wait at most `limit` for a ledger confirmation.
///
/// On timeout the pending future is dropped and the result is
/// [`LedgerError::Indeterminate`].
pub async fn confirm_within<F>(
    operation: &'static str,
    limit: Duration,
    pending: F,
) -> Result<Confirmation, LedgerError>
where
    F: Future<Output = Result<Confirmation, LedgerError>>,
{
    match tokio::time::timeout(limit, pending).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!(
                "{} not confirmed within {:?}; treating as indeterminate",
                operation,
                limit
            );
            Err(LedgerError::Indeterminate {
                operation,
                waited: limit,
            })
        }
    }
}
