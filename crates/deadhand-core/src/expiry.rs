//! Inactivity expiry evaluation.
//!
//! Pure logic with no I/O and no clock reads. `now` is always an argument, so
//! every answer is reproducible from its inputs.
//!
//! A record is claimable iff `now >= last_checkin + window`. All arithmetic
//! is integer milliseconds.
//!
//! ```text
//! |--- Healthy ---|--- CheckinRecommended ---|--- CheckinRequired ---|--- Expired
//! 0%             50%                        90%                    100%
//! ```

use crate::record::{BeneficiaryRecord, InactivityWindow};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signed milliseconds until the window elapses. Zero or negative means claimable.
pub fn remaining(last_checkin: Timestamp, window: InactivityWindow, now: Timestamp) -> i64 {
    last_checkin
        .add_millis(window.as_millis())
        .millis_since(now)
}

pub fn is_claimable(last_checkin: Timestamp, window: InactivityWindow, now: Timestamp) -> bool {
    remaining(last_checkin, window, now) <= 0
}

/// When to nudge the owner toward a check-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Fraction of the window elapsed before a check-in is recommended (0.0 to 1.0).
    pub recommend_at: f64,
    /// Fraction of the window elapsed before a check-in is required (0.0 to 1.0).
    pub require_at: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            recommend_at: 0.5,
            require_at: 0.9,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum HeartbeatError {
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<(), HeartbeatError> {
        if self.recommend_at <= 0.0 || self.recommend_at >= 1.0 {
            return Err(HeartbeatError::InvalidThreshold(
                "recommend_at must be between 0.0 and 1.0 exclusive".into(),
            ));
        }
        if self.require_at <= self.recommend_at || self.require_at >= 1.0 {
            return Err(HeartbeatError::InvalidThreshold(
                "require_at must be between recommend_at and 1.0 exclusive".into(),
            ));
        }
        Ok(())
    }
}

/// How urgently the owner should check in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Window elapsed; the beneficiary can claim.
    Expired,
    CheckinRequired,
    CheckinRecommended,
    Healthy,
}

/// Expiry evaluation of one record at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpiryStatus {
    pub remaining_ms: i64,
    pub claimable: bool,
    pub deadline: Timestamp,
    pub urgency: Urgency,
}

/// Evaluate a window at `now`.
pub fn evaluate_window(
    last_checkin: Timestamp,
    window: InactivityWindow,
    now: Timestamp,
    config: &HeartbeatConfig,
) -> ExpiryStatus {
    let remaining_ms = remaining(last_checkin, window, now);
    let claimable = remaining_ms <= 0;

    // Integer comparison against the thresholds: elapsed / total >= f  <=>
    // elapsed * 1000 >= f * 1000 * total, at per-mille resolution.
    let total = window.as_millis();
    let elapsed = now.millis_since(last_checkin).max(0);
    let per_mille = |f: f64| (f * 1000.0).round() as i128;
    let elapsed_scaled = i128::from(elapsed) * 1000;
    let total = i128::from(total);

    let urgency = if claimable {
        Urgency::Expired
    } else if elapsed_scaled >= per_mille(config.require_at) * total {
        Urgency::CheckinRequired
    } else if elapsed_scaled >= per_mille(config.recommend_at) * total {
        Urgency::CheckinRecommended
    } else {
        Urgency::Healthy
    };

    ExpiryStatus {
        remaining_ms,
        claimable,
        deadline: last_checkin.add_millis(window.as_millis()),
        urgency,
    }
}

/// Evaluate a record at `now` with the default heartbeat thresholds.
pub fn evaluate(record: &BeneficiaryRecord, now: Timestamp) -> ExpiryStatus {
    evaluate_window(record.last_checkin, record.window, now, &HeartbeatConfig::default())
}
