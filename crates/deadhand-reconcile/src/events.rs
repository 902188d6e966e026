//! Confirmed ledger events the engine mirrors into the index.

use deadhand_core::{Address, BeneficiaryRecord, NewRecord, RecordKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An action the ledger has confirmed.
///
/// `confirmed_at` is the ledger's confirmation time. Events for the same
/// wallet are applied in the order they are handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Owner locked an allocation for a new beneficiary
    BeneficiaryAdded {
        record: NewRecord,
        confirmed_at: Timestamp,
    },

    /// Owner checked in. `wallet` is resolved from the index when absent.
    CheckedIn {
        owner: Address,
        beneficiary: Address,
        #[serde(default)]
        wallet: Option<Address>,
        confirmed_at: Timestamp,
    },

    /// Beneficiary withdrew their allocation
    Claimed {
        beneficiary: Address,
        wallet: Address,
        confirmed_at: Timestamp,
    },

    /// Owner removed one beneficiary. When `wallet` is given the record
    /// must belong to it.
    Revoked {
        owner: Address,
        beneficiary: Address,
        #[serde(default)]
        wallet: Option<Address>,
        confirmed_at: Timestamp,
    },

    /// Owner drained and closed the wallet
    TransferExecuted {
        owner: Address,
        wallet: Address,
        confirmed_at: Timestamp,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BeneficiaryAdded { .. } => "beneficiary_added",
            LedgerEvent::CheckedIn { .. } => "checked_in",
            LedgerEvent::Claimed { .. } => "claimed",
            LedgerEvent::Revoked { .. } => "revoked",
            LedgerEvent::TransferExecuted { .. } => "transfer_executed",
        }
    }

    /// Wallet the event concerns, if known without consulting the index.
    pub fn wallet(&self) -> Option<Address> {
        match self {
            LedgerEvent::BeneficiaryAdded { record, .. } => Some(record.wallet),
            LedgerEvent::CheckedIn { wallet, .. } | LedgerEvent::Revoked { wallet, .. } => *wallet,
            LedgerEvent::Claimed { wallet, .. } | LedgerEvent::TransferExecuted { wallet, .. } => {
                Some(*wallet)
            }
        }
    }

    pub fn confirmed_at(&self) -> Timestamp {
        match self {
            LedgerEvent::BeneficiaryAdded { confirmed_at, .. }
            | LedgerEvent::CheckedIn { confirmed_at, .. }
            | LedgerEvent::Claimed { confirmed_at, .. }
            | LedgerEvent::Revoked { confirmed_at, .. }
            | LedgerEvent::TransferExecuted { confirmed_at, .. } => *confirmed_at,
        }
    }

    /// Record key for single-record events.
    pub fn key(&self) -> Option<RecordKey> {
        match self {
            LedgerEvent::BeneficiaryAdded { record, .. } => Some(record.key()),
            LedgerEvent::CheckedIn {
                owner, beneficiary, ..
            }
            | LedgerEvent::Revoked {
                owner, beneficiary, ..
            } => Some(RecordKey {
                owner: *owner,
                beneficiary: *beneficiary,
            }),
            LedgerEvent::Claimed { .. } | LedgerEvent::TransferExecuted { .. } => None,
        }
    }

    /// Same event with the wallet filled in.
    pub(crate) fn with_wallet(mut self, resolved: Address) -> Self {
        match &mut self {
            LedgerEvent::CheckedIn { wallet, .. } | LedgerEvent::Revoked { wallet, .. } => {
                *wallet = Some(resolved);
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEvent::BeneficiaryAdded { record, .. } => {
                write!(f, "beneficiary_added({} on {})", record.key(), record.wallet)
            }
            LedgerEvent::CheckedIn {
                owner, beneficiary, ..
            } => write!(f, "checked_in({} -> {})", owner, beneficiary),
            LedgerEvent::Claimed {
                beneficiary,
                wallet,
                ..
            } => write!(f, "claimed({} from {})", beneficiary, wallet),
            LedgerEvent::Revoked {
                owner, beneficiary, ..
            } => write!(f, "revoked({} -> {})", owner, beneficiary),
            LedgerEvent::TransferExecuted { owner, wallet, .. } => {
                write!(f, "transfer_executed({} by {})", wallet, owner)
            }
        }
    }
}

/// Why an event was acknowledged without changing the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The wallet was closed at or after the event's confirmation
    WalletClosed,
    /// Nothing in the index matches; already mirrored or never existed
    NoRecord,
    /// Self-healing found no such beneficiary on the ledger
    NotOnLedger,
    /// The wallet is indexed under a different owner
    OwnerMismatch,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscardReason::WalletClosed => "wallet closed",
            DiscardReason::NoRecord => "no matching record",
            DiscardReason::NotOnLedger => "not on ledger",
            DiscardReason::OwnerMismatch => "wallet indexed under another owner",
        })
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created(BeneficiaryRecord),
    Touched(BeneficiaryRecord),
    /// Check-in found no record; it was re-derived from the ledger
    Healed(BeneficiaryRecord),
    Removed(BeneficiaryRecord),
    WalletClosed { removed: usize },
    Discarded(DiscardReason),
}

impl Outcome {
    pub fn is_discarded(&self) -> bool {
        matches!(self, Outcome::Discarded(_))
    }

    /// The record the index now holds (or just deleted).
    pub fn record(&self) -> Option<&BeneficiaryRecord> {
        match self {
            Outcome::Created(r) | Outcome::Touched(r) | Outcome::Healed(r) | Outcome::Removed(r) => {
                Some(r)
            }
            Outcome::WalletClosed { .. } | Outcome::Discarded(_) => None,
        }
    }
}
