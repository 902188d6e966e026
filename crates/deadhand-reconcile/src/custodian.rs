//! Confirm-then-mirror owner and beneficiary actions.
//!
//! Each action goes to the ledger first and waits (bounded) for its
//! confirmation. Only a confirmation reaches the engine; a rejection or a
//! timeout leaves the index untouched.

use crate::{Outcome, ReconcileError, Reconciler};
use deadhand_core::{Address, NewRecord, ValidationError};
use deadhand_ledger::{
    confirm_within, AddBeneficiary, Confirmation, LedgerError, LedgerGateway,
    DEFAULT_CONFIRM_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The ledger did not confirm. Nothing was written.
    #[error(transparent)]
    Ledger(LedgerError),

    /// Confirmed on the ledger, but mirroring failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl ActionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Invalid(_) => "validation",
            ActionError::Ledger(LedgerError::Indeterminate { .. }) => "ledger_indeterminate",
            ActionError::Ledger(_) => "ledger_error",
            ActionError::Reconcile(e) => e.kind(),
        }
    }
}

pub struct Custodian {
    ledger: Arc<dyn LedgerGateway>,
    engine: Arc<Reconciler>,
    confirm_timeout: Duration,
}

impl Custodian {
    pub fn new(ledger: Arc<dyn LedgerGateway>, engine: Arc<Reconciler>) -> Self {
        Self {
            ledger,
            engine,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<Reconciler> {
        &self.engine
    }

    async fn confirm<F>(&self, operation: &'static str, pending: F) -> Result<Confirmation, ActionError>
    where
        F: std::future::Future<Output = Result<Confirmation, LedgerError>>,
    {
        confirm_within(operation, self.confirm_timeout, pending)
            .await
            .map_err(|e| {
                log::warn!("{} aborted, index untouched: {}", operation, e);
                ActionError::Ledger(e)
            })
    }

    /// Lock `record.allocation` for `record.beneficiary` and mirror it.
    pub async fn add_beneficiary(&self, record: NewRecord) -> Result<Outcome, ActionError> {
        record.validate()?;
        let request = AddBeneficiary {
            wallet: record.wallet,
            beneficiary: record.beneficiary,
            allocation: record.allocation,
            window: record.window,
        };
        let confirmation = self
            .confirm("add_beneficiary", self.ledger.add_beneficiary(&request))
            .await?;

        let mut record = record;
        if confirmation.owner != record.owner {
            log::warn!(
                "Ledger reports {} as owner of {}, not {}; mirroring the ledger's owner",
                confirmation.owner,
                record.wallet,
                record.owner
            );
            record.owner = confirmation.owner;
        }
        Ok(self
            .engine
            .on_beneficiary_added(record, confirmation.timestamp)
            .await?)
    }

    pub async fn check_in(
        &self,
        owner: Address,
        beneficiary: Address,
        wallet: Address,
    ) -> Result<Outcome, ActionError> {
        let confirmation = self
            .confirm("check_in", self.ledger.check_in(&wallet, &beneficiary))
            .await?;
        Ok(self
            .engine
            .on_check_in(owner, beneficiary, Some(confirmation.wallet), confirmation.timestamp)
            .await?)
    }

    /// Withdraw on behalf of `beneficiary`. The ledger decides claimability;
    /// the local expiry view is not consulted.
    pub async fn claim(&self, beneficiary: Address, wallet: Address) -> Result<Outcome, ActionError> {
        let confirmation = self
            .confirm("claim", self.ledger.claim(&wallet, &beneficiary))
            .await?;
        Ok(self
            .engine
            .on_claim(beneficiary, confirmation.wallet, confirmation.timestamp)
            .await?)
    }

    pub async fn revoke(
        &self,
        owner: Address,
        beneficiary: Address,
        wallet: Address,
    ) -> Result<Outcome, ActionError> {
        let confirmation = self
            .confirm(
                "revoke_beneficiary",
                self.ledger.revoke_beneficiary(&wallet, &beneficiary),
            )
            .await?;
        Ok(self
            .engine
            .on_revoke(owner, beneficiary, Some(confirmation.wallet), confirmation.timestamp)
            .await?)
    }

    pub async fn execute_transfer(&self, wallet: Address) -> Result<Outcome, ActionError> {
        let confirmation = self
            .confirm("execute_transfer", self.ledger.execute_transfer(&wallet))
            .await?;
        Ok(self
            .engine
            .on_transfer_executed(confirmation.owner, confirmation.wallet, confirmation.timestamp)
            .await?)
    }
}
