//! Strongly typed view of a ledger wallet.

use deadhand_core::{Address, InactivityWindow, NewRecord, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};

/// One beneficiary entry as the ledger stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBeneficiary {
    pub address: Address,
    pub last_checkin: Timestamp,
    /// Inactivity threshold in milliseconds
    pub threshold_ms: i64,
    pub allocation: u64,
}

impl LedgerBeneficiary {
    pub fn window(&self) -> Result<InactivityWindow, ValidationError> {
        InactivityWindow::from_millis(self.threshold_ms)
    }
}

/// Authoritative state of one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub id: Address,
    pub owner: Address,
    /// Locked balance in ledger-native units
    pub balance: u64,
    pub beneficiaries: Vec<LedgerBeneficiary>,
}

impl WalletSnapshot {
    pub fn beneficiary(&self, address: &Address) -> Option<&LedgerBeneficiary> {
        self.beneficiaries.iter().find(|b| &b.address == address)
    }

    /// Re-derive the off-chain record for one beneficiary of this wallet.
    pub fn record_for(&self, beneficiary: &Address) -> Option<Result<NewRecord, ValidationError>> {
        let entry = self.beneficiary(beneficiary)?;
        Some(entry.window().and_then(|window| {
            NewRecord::new(self.owner, entry.address, self.id, entry.allocation, window)
        }))
    }
}
