//! Read views joining stored records with expiry evaluation.
//!
//! Pure read composition: nothing here writes, and a store failure is
//! reported as [`QueryError::Unavailable`] rather than a partial answer.

use crate::{RecordStore, StoreError};
use deadhand_core::{
    evaluate_window, Address, BeneficiaryRecord, HeartbeatConfig, Timestamp, Urgency,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("index unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::Unavailable(e.to_string())
    }
}

/// One record as seen at a given instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordView {
    pub record: BeneficiaryRecord,
    pub remaining_ms: i64,
    pub claimable: bool,
    pub deadline: Timestamp,
    pub urgency: Urgency,
}

/// A beneficiary's records split by whether they can be claimed right now.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClaimView {
    pub actionable: Vec<RecordView>,
    pub pending: Vec<RecordView>,
}

impl ClaimView {
    pub fn is_empty(&self) -> bool {
        self.actionable.is_empty() && self.pending.is_empty()
    }

    /// Every record, actionable first.
    pub fn all(&self) -> impl Iterator<Item = &RecordView> {
        self.actionable.iter().chain(self.pending.iter())
    }
}

pub struct QuerySurface {
    store: Arc<dyn RecordStore>,
    heartbeat: HeartbeatConfig,
}

impl QuerySurface {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_heartbeat(store, HeartbeatConfig::default())
    }

    pub fn with_heartbeat(store: Arc<dyn RecordStore>, heartbeat: HeartbeatConfig) -> Self {
        Self { store, heartbeat }
    }

    fn view(&self, record: BeneficiaryRecord, now: Timestamp) -> RecordView {
        let status = evaluate_window(record.last_checkin, record.window, now, &self.heartbeat);
        RecordView {
            record,
            remaining_ms: status.remaining_ms,
            claimable: status.claimable,
            deadline: status.deadline,
            urgency: status.urgency,
        }
    }

    /// Everything `owner` watches, in creation order.
    pub fn owner_view(&self, owner: &Address, now: Timestamp) -> Result<Vec<RecordView>, QueryError> {
        let records = self.store.list_by_owner(owner)?;
        Ok(records.into_iter().map(|r| self.view(r, now)).collect())
    }

    /// Owner view sorted most urgent first (ties keep creation order).
    pub fn owner_view_by_urgency(
        &self,
        owner: &Address,
        now: Timestamp,
    ) -> Result<Vec<RecordView>, QueryError> {
        let mut views = self.owner_view(owner, now)?;
        views.sort_by_key(|v| (v.urgency, v.remaining_ms));
        Ok(views)
    }

    pub fn beneficiary_claim_view(
        &self,
        beneficiary: &Address,
        now: Timestamp,
    ) -> Result<ClaimView, QueryError> {
        let records = self.store.list_by_beneficiary(beneficiary)?;
        let (actionable, pending) = records
            .into_iter()
            .map(|r| self.view(r, now))
            .partition(|v| v.claimable);
        Ok(ClaimView {
            actionable,
            pending,
        })
    }
}
