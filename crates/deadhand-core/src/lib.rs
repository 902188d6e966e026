//! deadhand Core
//!
//! Shared types for the dead-man's-switch index.
//!
//! # Concepts
//!
//! - **Owner**: locks an allocation for one or more beneficiaries
//! - **Wallet**: the ledger-side custodial object holding the allocation
//! - **Check-in**: owner action that resets the inactivity clock
//! - **Claimable**: `now >= last_checkin + inactivity window`
//!
//! The ledger is authoritative; everything in this crate describes the
//! off-chain mirror of it and the pure expiry arithmetic on top.

pub mod address;
pub mod expiry;
pub mod record;
pub mod time;

pub use address::{Address, AddressError};
pub use expiry::{
    evaluate, evaluate_window, is_claimable, remaining, ExpiryStatus, HeartbeatConfig,
    HeartbeatError, Urgency,
};
pub use record::{
    BeneficiaryRecord, InactivityUnit, InactivityWindow, NewRecord, RecordId, RecordKey,
    ValidationError,
};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
