//! deadhand Reconciliation Engine
//!
//! Applies confirmed ledger events to the record index. The ledger is
//! authoritative; the index only ever follows it.
//!
//! # Rules
//!
//! - Events are applied only after the ledger confirmed them (see
//!   [`Custodian`] for the confirm-then-mirror composition)
//! - Mutations on one wallet are serialized; different wallets never contend
//! - A check-in for a wallet closed at or after the check-in's confirmation
//!   is discarded, so a late check-in cannot resurrect a closed wallet
//! - A closure only removes records confirmed before it; a later add
//!   re-opened the wallet whichever event arrives first
//! - A check-in with no matching record re-derives the record from the
//!   ledger instead of being dropped
//! - Store outages are retried with backoff; an event that still cannot be
//!   mirrored goes to the [`Outbox`] and is reported as
//!   [`ReconcileError::Queued`]
//!
//! # Example
//!
//! ```ignore
//! let engine = Reconciler::new(store, ledger, Arc::new(SystemClock))
//!     .with_retry(config.retry.clone())
//!     .with_outbox(Outbox::open(data_dir.join("outbox.json"))?);
//!
//! match engine.on_check_in(owner, beneficiary, Some(wallet), confirmed_at).await? {
//!     Outcome::Touched(record) => println!("next deadline {}", record.deadline()),
//!     other => println!("{:?}", other),
//! }
//! ```

pub mod custodian;
pub mod events;
pub mod locks;
pub mod outbox;
pub mod retry;

pub use custodian::{ActionError, Custodian};
pub use events::{DiscardReason, LedgerEvent, Outcome};
pub use locks::WalletLocks;
pub use outbox::{Outbox, OutboxError, QueuedEvent};
pub use retry::RetryPolicy;

use deadhand_core::{Address, Clock, NewRecord, RecordKey, Timestamp};
use deadhand_index::{RecordStore, StoreError};
use deadhand_ledger::{LedgerError, LedgerReader};
use std::sync::Arc;
use thiserror::Error;

/// Errors from applying a ledger event
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ledger lookup failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("{event} is confirmed on the ledger but not mirrored after {attempts} attempt(s) ({reason}); queued for replay")]
    Queued {
        event: &'static str,
        attempts: u32,
        reason: String,
    },

    #[error("{event} could not be mirrored or queued: {source}")]
    Outbox {
        event: &'static str,
        #[source]
        source: OutboxError,
    },
}

impl ReconcileError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Store(e) => e.kind(),
            ReconcileError::Ledger(LedgerError::Indeterminate { .. }) => "ledger_indeterminate",
            ReconcileError::Ledger(_) => "ledger_error",
            ReconcileError::Queued { .. } => "queued",
            ReconcileError::Outbox { .. } => "outbox_error",
        }
    }

    /// Worth another attempt with the same event.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_retryable(),
            ReconcileError::Ledger(e) => e.is_transient(),
            ReconcileError::Queued { .. } | ReconcileError::Outbox { .. } => false,
        }
    }
}

/// Summary of one outbox replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    /// Failed terminally and removed from the outbox
    pub dropped: usize,
    /// Still failing transiently; left queued
    pub remaining: usize,
}

pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerReader>,
    clock: Arc<dyn Clock>,
    locks: WalletLocks,
    retry: RetryPolicy,
    outbox: Outbox,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerReader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            locks: WalletLocks::new(),
            retry: RetryPolicy::default(),
            outbox: Outbox::in_memory(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = outbox;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn on_beneficiary_added(
        &self,
        record: NewRecord,
        confirmed_at: Timestamp,
    ) -> Result<Outcome, ReconcileError> {
        self.apply(LedgerEvent::BeneficiaryAdded {
            record,
            confirmed_at,
        })
        .await
    }

    pub async fn on_check_in(
        &self,
        owner: Address,
        beneficiary: Address,
        wallet: Option<Address>,
        confirmed_at: Timestamp,
    ) -> Result<Outcome, ReconcileError> {
        self.apply(LedgerEvent::CheckedIn {
            owner,
            beneficiary,
            wallet,
            confirmed_at,
        })
        .await
    }

    pub async fn on_claim(
        &self,
        beneficiary: Address,
        wallet: Address,
        confirmed_at: Timestamp,
    ) -> Result<Outcome, ReconcileError> {
        self.apply(LedgerEvent::Claimed {
            beneficiary,
            wallet,
            confirmed_at,
        })
        .await
    }

    pub async fn on_revoke(
        &self,
        owner: Address,
        beneficiary: Address,
        wallet: Option<Address>,
        confirmed_at: Timestamp,
    ) -> Result<Outcome, ReconcileError> {
        self.apply(LedgerEvent::Revoked {
            owner,
            beneficiary,
            wallet,
            confirmed_at,
        })
        .await
    }

    pub async fn on_transfer_executed(
        &self,
        owner: Address,
        wallet: Address,
        confirmed_at: Timestamp,
    ) -> Result<Outcome, ReconcileError> {
        self.apply(LedgerEvent::TransferExecuted {
            owner,
            wallet,
            confirmed_at,
        })
        .await
    }

    /// Apply one confirmed event, retrying store outages and queueing the
    /// event in the outbox if they persist.
    pub async fn apply(&self, event: LedgerEvent) -> Result<Outcome, ReconcileError> {
        let (result, attempts) = self.apply_with_retry(&event).await;
        match result {
            Err(e) if e.is_transient() => self.queue(event, attempts, e),
            other => other,
        }
    }

    /// Re-apply every queued event once (with the usual retries).
    pub async fn replay_pending(&self) -> Result<ReplayReport, OutboxError> {
        let mut report = ReplayReport::default();
        for queued in self.outbox.pending() {
            let (result, attempts) = self.apply_with_retry(&queued.event).await;
            match result {
                Ok(outcome) => {
                    log::info!("Replayed #{} {}: {:?}", queued.id, queued.event, outcome);
                    self.outbox.complete(queued.id)?;
                    report.applied += 1;
                }
                Err(e) if e.is_transient() => {
                    log::warn!("Replay of #{} {} still failing: {}", queued.id, queued.event, e);
                    self.outbox.record_failure(queued.id, attempts, e.to_string())?;
                    report.remaining += 1;
                }
                Err(e) => {
                    log::error!("Dropping queued #{} {}: {}", queued.id, queued.event, e);
                    self.outbox.complete(queued.id)?;
                    report.dropped += 1;
                }
            }
        }
        Ok(report)
    }

    fn queue(
        &self,
        event: LedgerEvent,
        attempts: u32,
        error: ReconcileError,
    ) -> Result<Outcome, ReconcileError> {
        let name = event.name();
        let reason = error.to_string();
        log::error!(
            "{} not mirrored after {} attempt(s): {}; queueing for replay",
            event,
            attempts,
            reason
        );
        match self
            .outbox
            .push(event, attempts, reason.clone(), self.clock.now())
        {
            Ok(_) => Err(ReconcileError::Queued {
                event: name,
                attempts,
                reason,
            }),
            Err(source) => Err(ReconcileError::Outbox {
                event: name,
                source,
            }),
        }
    }

    async fn apply_with_retry(&self, event: &LedgerEvent) -> (Result<Outcome, ReconcileError>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.apply_once(event).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        event,
                        attempt,
                        self.retry.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return (result, attempt),
            }
        }
    }

    /// Ledger confirmation time, never later than local now.
    fn effective_time(&self, confirmed_at: Timestamp) -> Timestamp {
        let now = self.clock.now();
        if confirmed_at > now {
            log::debug!("Confirmation time {} is ahead of local clock {}", confirmed_at, now);
            now
        } else {
            confirmed_at
        }
    }

    /// Fill in a missing wallet from the index. `None` when the record the
    /// event refers to is not indexed.
    fn resolve_wallet(&self, event: &LedgerEvent) -> Result<Option<LedgerEvent>, ReconcileError> {
        if event.wallet().is_some() {
            return Ok(Some(event.clone()));
        }
        let Some(key) = event.key() else {
            return Ok(None);
        };
        Ok(self
            .store
            .get(&key)?
            .map(|record| event.clone().with_wallet(record.wallet)))
    }

    async fn apply_once(&self, event: &LedgerEvent) -> Result<Outcome, ReconcileError> {
        let Some(event) = self.resolve_wallet(event)? else {
            log::warn!("Discarding {}: no indexed record to resolve its wallet", event);
            return Ok(Outcome::Discarded(DiscardReason::NoRecord));
        };
        let Some(wallet) = event.wallet() else {
            return Ok(Outcome::Discarded(DiscardReason::NoRecord));
        };

        let _guard = self.locks.acquire(&wallet).await;
        let at = self.effective_time(event.confirmed_at());

        match &event {
            LedgerEvent::BeneficiaryAdded { record, .. } => {
                let created = self.store.create(record, at)?;
                log::info!("Mirrored new beneficiary {} on {}", created.key(), wallet);
                Ok(Outcome::Created(created))
            }
            LedgerEvent::CheckedIn {
                owner, beneficiary, ..
            } => {
                let key = RecordKey {
                    owner: *owner,
                    beneficiary: *beneficiary,
                };
                self.check_in(key, wallet, at).await
            }
            LedgerEvent::Claimed { beneficiary, .. } => self.claim(*beneficiary, wallet),
            LedgerEvent::Revoked {
                owner, beneficiary, ..
            } => {
                let key = RecordKey {
                    owner: *owner,
                    beneficiary: *beneficiary,
                };
                self.revoke(key, wallet)
            }
            LedgerEvent::TransferExecuted { owner, .. } => {
                let indexed = self.store.list_by_wallet(&wallet)?;
                if let Some(other) = indexed.iter().find(|r| &r.owner != owner) {
                    log::warn!(
                        "Discarding transfer of {} by {}: indexed under owner {}",
                        wallet,
                        owner,
                        other.owner
                    );
                    return Ok(Outcome::Discarded(DiscardReason::OwnerMismatch));
                }
                let removed = self.store.remove_all_for_wallet(owner, &wallet, at)?;
                log::info!(
                    "Wallet {} closed by {}: removed {} record(s)",
                    wallet,
                    owner,
                    removed
                );
                Ok(Outcome::WalletClosed { removed })
            }
        }
    }

    async fn check_in(
        &self,
        key: RecordKey,
        wallet: Address,
        at: Timestamp,
    ) -> Result<Outcome, ReconcileError> {
        if let Some(record) = self.store.get(&key)? {
            if record.wallet != wallet {
                log::warn!(
                    "Discarding check-in {} on {}: record belongs to {}",
                    key,
                    wallet,
                    record.wallet
                );
                return Ok(Outcome::Discarded(DiscardReason::NoRecord));
            }
        }
        if let Some(closed_at) = self.store.wallet_closed_at(&wallet)? {
            if closed_at >= at {
                log::warn!(
                    "Discarding check-in {} at {}: wallet {} closed at {}",
                    key,
                    at,
                    wallet,
                    closed_at
                );
                return Ok(Outcome::Discarded(DiscardReason::WalletClosed));
            }
        }

        match self.store.touch(&key, at) {
            Ok(record) => {
                log::info!("Check-in {} at {}", key, record.last_checkin);
                Ok(Outcome::Touched(record))
            }
            Err(StoreError::NotFound(_)) => self.heal(key, wallet, at).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Re-derive a missing record from the ledger's view of the wallet.
    async fn heal(
        &self,
        key: RecordKey,
        wallet: Address,
        at: Timestamp,
    ) -> Result<Outcome, ReconcileError> {
        log::warn!("Check-in {} has no indexed record; consulting ledger", key);

        let Some(snapshot) = self.ledger.wallet(&wallet).await? else {
            log::warn!("Wallet {} not found on ledger; discarding check-in", wallet);
            return Ok(Outcome::Discarded(DiscardReason::NotOnLedger));
        };
        if snapshot.owner != key.owner {
            log::warn!(
                "Wallet {} is owned by {} on ledger, not {}; discarding check-in",
                wallet,
                snapshot.owner,
                key.owner
            );
            return Ok(Outcome::Discarded(DiscardReason::NotOnLedger));
        }
        let Some(entry) = snapshot.beneficiary(&key.beneficiary) else {
            log::warn!("{} is not a beneficiary of {} on ledger", key.beneficiary, wallet);
            return Ok(Outcome::Discarded(DiscardReason::NotOnLedger));
        };
        let checkin = self.effective_time(entry.last_checkin.max(at));

        let record = match snapshot.record_for(&key.beneficiary) {
            Some(result) => result.map_err(StoreError::from)?,
            None => return Ok(Outcome::Discarded(DiscardReason::NotOnLedger)),
        };
        match self.store.create(&record, checkin) {
            Ok(created) => {
                log::warn!("Healed {} on {} from ledger state", key, wallet);
                Ok(Outcome::Healed(created))
            }
            Err(StoreError::WalletClosed { .. }) => {
                Ok(Outcome::Discarded(DiscardReason::WalletClosed))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn claim(&self, beneficiary: Address, wallet: Address) -> Result<Outcome, ReconcileError> {
        let found = self
            .store
            .list_by_wallet(&wallet)?
            .into_iter()
            .find(|r| r.beneficiary == beneficiary);
        let Some(record) = found else {
            log::info!("Claim by {} on {} has no indexed record", beneficiary, wallet);
            return Ok(Outcome::Discarded(DiscardReason::NoRecord));
        };
        self.remove(record.key(), "Claim")
    }

    fn revoke(&self, key: RecordKey, wallet: Address) -> Result<Outcome, ReconcileError> {
        match self.store.get(&key)? {
            Some(record) if record.wallet == wallet => self.remove(key, "Revocation"),
            Some(record) => {
                log::warn!(
                    "Revocation of {} on {} ignored: record belongs to {}",
                    key,
                    wallet,
                    record.wallet
                );
                Ok(Outcome::Discarded(DiscardReason::NoRecord))
            }
            None => Ok(Outcome::Discarded(DiscardReason::NoRecord)),
        }
    }

    fn remove(&self, key: RecordKey, what: &str) -> Result<Outcome, ReconcileError> {
        match self.store.remove(&key) {
            Ok(record) => {
                log::info!("{} mirrored: removed {}", what, key);
                Ok(Outcome::Removed(record))
            }
            Err(StoreError::NotFound(_)) => Ok(Outcome::Discarded(DiscardReason::NoRecord)),
            Err(e) => Err(e.into()),
        }
    }
}
