//! In-process ledger used by tests and simulations.
//!
//! Enforces the same rules as the contract: one entry per beneficiary,
//! claims only after the inactivity window has elapsed. Failure injection:
//! [`MemoryLedger::reject_next`] and [`MemoryLedger::set_latency`]. Latency is
//! applied after the mutation, so a caller that gives up waiting sees an
//! indeterminate outcome for an action that did land.

use crate::snapshot::{LedgerBeneficiary, WalletSnapshot};
use crate::{AddBeneficiary, Confirmation, LedgerError, LedgerGateway, LedgerReader};
use async_trait::async_trait;
use deadhand_core::{expiry, Address, Clock, InactivityWindow, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<Address, WalletSnapshot>,
    reject_next: Option<String>,
    latency: Duration,
}

pub struct MemoryLedger {
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty wallet owned by `owner`.
    pub fn open_wallet(&self, owner: Address, wallet: Address) {
        self.put_wallet(WalletSnapshot {
            id: wallet,
            owner,
            balance: 0,
            beneficiaries: Vec::new(),
        });
    }

    /// Overwrite a wallet's state directly, bypassing the contract rules.
    pub fn put_wallet(&self, snapshot: WalletSnapshot) {
        self.lock().wallets.insert(snapshot.id, snapshot);
    }

    /// Reject the next mutating call with `reason`.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    /// Delay every confirmation by `latency` (after applying the action).
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    fn mutate<F>(
        &self,
        operation: &'static str,
        wallet: &Address,
        beneficiary: Option<Address>,
        apply: F,
    ) -> Result<(Confirmation, Duration), LedgerError>
    where
        F: FnOnce(&mut WalletSnapshot, Timestamp) -> Result<(), String>,
    {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(reason) = state.reject_next.take() {
            return Err(LedgerError::Rejected { operation, reason });
        }

        let latency = state.latency;
        let snapshot = state
            .wallets
            .get_mut(wallet)
            .ok_or_else(|| LedgerError::Rejected {
                operation,
                reason: format!("wallet {} does not exist", wallet),
            })?;

        apply(snapshot, now).map_err(|reason| LedgerError::Rejected { operation, reason })?;

        let confirmation = Confirmation {
            digest: hex::encode(rand::random::<[u8; 32]>()),
            wallet: *wallet,
            owner: snapshot.owner,
            beneficiary,
            timestamp: now,
        };
        log::debug!(
            "{} confirmed on {} (digest {})",
            operation,
            wallet,
            confirmation.digest
        );
        Ok((confirmation, latency))
    }

    async fn settle(
        &self,
        outcome: Result<(Confirmation, Duration), LedgerError>,
    ) -> Result<Confirmation, LedgerError> {
        let (confirmation, latency) = outcome?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(confirmation)
    }
}

fn take_entry(
    snapshot: &mut WalletSnapshot,
    beneficiary: &Address,
) -> Result<LedgerBeneficiary, String> {
    let index = snapshot
        .beneficiaries
        .iter()
        .position(|b| &b.address == beneficiary)
        .ok_or_else(|| format!("{} is not a beneficiary", beneficiary))?;
    let entry = snapshot.beneficiaries.remove(index);
    snapshot.balance = snapshot.balance.saturating_sub(entry.allocation);
    Ok(entry)
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn wallet(&self, wallet: &Address) -> Result<Option<WalletSnapshot>, LedgerError> {
        Ok(self.lock().wallets.get(wallet).cloned())
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn add_beneficiary(&self, request: &AddBeneficiary) -> Result<Confirmation, LedgerError> {
        let outcome = self.mutate(
            "add_beneficiary",
            &request.wallet,
            Some(request.beneficiary),
            |snapshot, now| {
                if snapshot.beneficiary(&request.beneficiary).is_some() {
                    return Err(format!("{} is already a beneficiary", request.beneficiary));
                }
                snapshot.balance = snapshot
                    .balance
                    .checked_add(request.allocation)
                    .ok_or("wallet balance overflow")?;
                snapshot.beneficiaries.push(LedgerBeneficiary {
                    address: request.beneficiary,
                    last_checkin: now,
                    threshold_ms: request.window.as_millis(),
                    allocation: request.allocation,
                });
                Ok(())
            },
        );
        self.settle(outcome).await
    }

    async fn check_in(
        &self,
        wallet: &Address,
        beneficiary: &Address,
    ) -> Result<Confirmation, LedgerError> {
        let outcome = self.mutate("check_in", wallet, Some(*beneficiary), |snapshot, now| {
            let entry = snapshot
                .beneficiaries
                .iter_mut()
                .find(|b| &b.address == beneficiary)
                .ok_or_else(|| format!("{} is not a beneficiary", beneficiary))?;
            entry.last_checkin = now;
            Ok(())
        });
        self.settle(outcome).await
    }

    async fn claim(
        &self,
        wallet: &Address,
        beneficiary: &Address,
    ) -> Result<Confirmation, LedgerError> {
        let outcome = self.mutate("claim", wallet, Some(*beneficiary), |snapshot, now| {
            let entry = snapshot
                .beneficiary(beneficiary)
                .ok_or_else(|| format!("{} is not a beneficiary", beneficiary))?;
            let window: InactivityWindow = entry.window().map_err(|e| e.to_string())?;
            if !expiry::is_claimable(entry.last_checkin, window, now) {
                return Err(format!(
                    "not yet claimable ({} ms remaining)",
                    expiry::remaining(entry.last_checkin, window, now)
                ));
            }
            take_entry(snapshot, beneficiary).map(|_| ())
        });
        self.settle(outcome).await
    }

    async fn revoke_beneficiary(
        &self,
        wallet: &Address,
        beneficiary: &Address,
    ) -> Result<Confirmation, LedgerError> {
        let outcome = self.mutate("revoke_beneficiary", wallet, Some(*beneficiary), |snapshot, _| {
            take_entry(snapshot, beneficiary).map(|_| ())
        });
        self.settle(outcome).await
    }

    async fn execute_transfer(&self, wallet: &Address) -> Result<Confirmation, LedgerError> {
        let outcome = self.mutate("execute_transfer", wallet, None, |snapshot, _| {
            snapshot.beneficiaries.clear();
            snapshot.balance = 0;
            Ok(())
        });
        self.settle(outcome).await
    }
}
