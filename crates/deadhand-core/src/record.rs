//! Beneficiary records and their validation rules.

use crate::address::{Address, AddressError};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Rejections raised before any mutation is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {source}")]
    InvalidAddress {
        field: &'static str,
        source: AddressError,
    },

    #[error("allocation must be greater than zero")]
    NonPositiveAllocation,

    #[error("allocation {0} exceeds the storable maximum")]
    AllocationTooLarge(u64),

    #[error("inactivity duration must be greater than zero")]
    NonPositiveDuration,

    #[error("unsupported inactivity unit '{0}' (expected minutes, hours or days)")]
    UnsupportedUnit(String),

    #[error("inactivity threshold of {0} ms is not a whole number of minutes")]
    UnrepresentableThreshold(i64),
}

impl ValidationError {
    /// Parse an address field, tagging failures with the field name.
    pub fn parse_address(field: &'static str, value: &str) -> Result<Address, ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
        value
            .parse()
            .map_err(|source| ValidationError::InvalidAddress { field, source })
    }
}

/// Unit of an inactivity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InactivityUnit {
    Minutes,
    Hours,
    Days,
}

impl InactivityUnit {
    pub const ALL: [InactivityUnit; 3] = [Self::Minutes, Self::Hours, Self::Days];

    /// Length of one unit in milliseconds.
    pub const fn millis(self) -> i64 {
        match self {
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }

    /// Numeric code used by the ledger contract (0 = minutes, 1 = hours, 2 = days).
    pub const fn ledger_code(self) -> u8 {
        match self {
            Self::Minutes => 0,
            Self::Hours => 1,
            Self::Days => 2,
        }
    }
}

impl FromStr for InactivityUnit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minutes" => Ok(Self::Minutes),
            "hours" => Ok(Self::Hours),
            "days" => Ok(Self::Days),
            other => Err(ValidationError::UnsupportedUnit(other.to_string())),
        }
    }
}

impl fmt::Display for InactivityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A positive inactivity duration with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InactivityWindow {
    duration: u32,
    unit: InactivityUnit,
}

impl InactivityWindow {
    pub fn new(duration: u32, unit: InactivityUnit) -> Result<Self, ValidationError> {
        if duration == 0 {
            return Err(ValidationError::NonPositiveDuration);
        }
        Ok(Self { duration, unit })
    }

    /// Validate raw, loosely-typed input (as received over the wire).
    pub fn parse(duration: i64, unit: &str) -> Result<Self, ValidationError> {
        if duration <= 0 {
            return Err(ValidationError::NonPositiveDuration);
        }
        let unit: InactivityUnit = unit.parse()?;
        let duration =
            u32::try_from(duration).map_err(|_| ValidationError::NonPositiveDuration)?;
        Self::new(duration, unit)
    }

    /// Recover a window from a ledger threshold in milliseconds, choosing the
    /// largest unit that divides it exactly.
    pub fn from_millis(ms: i64) -> Result<Self, ValidationError> {
        if ms <= 0 {
            return Err(ValidationError::NonPositiveDuration);
        }
        for unit in InactivityUnit::ALL.iter().rev() {
            if ms % unit.millis() == 0 {
                let duration = u32::try_from(ms / unit.millis())
                    .map_err(|_| ValidationError::UnrepresentableThreshold(ms))?;
                return Self::new(duration, *unit);
            }
        }
        Err(ValidationError::UnrepresentableThreshold(ms))
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn unit(&self) -> InactivityUnit {
        self.unit
    }

    /// Total window length in integer milliseconds.
    pub fn as_millis(&self) -> i64 {
        i64::from(self.duration) * self.unit.millis()
    }
}

impl fmt::Display for InactivityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.duration, self.unit)
    }
}

/// Logical key of a record: one active record per (owner, beneficiary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub owner: Address,
    pub beneficiary: Address,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.owner, self.beneficiary)
    }
}

/// Store-assigned identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated record awaiting insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub owner: Address,
    pub beneficiary: Address,
    pub wallet: Address,
    pub allocation: u64,
    pub window: InactivityWindow,
}

impl NewRecord {
    pub fn new(
        owner: Address,
        beneficiary: Address,
        wallet: Address,
        allocation: u64,
        window: InactivityWindow,
    ) -> Result<Self, ValidationError> {
        let record = Self {
            owner,
            beneficiary,
            wallet,
            allocation,
            window,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.allocation == 0 {
            return Err(ValidationError::NonPositiveAllocation);
        }
        if i64::try_from(self.allocation).is_err() {
            return Err(ValidationError::AllocationTooLarge(self.allocation));
        }
        if self.window.duration() == 0 {
            return Err(ValidationError::NonPositiveDuration);
        }
        Ok(())
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            owner: self.owner,
            beneficiary: self.beneficiary,
        }
    }
}

/// Off-chain mirror of one owner -> beneficiary allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeneficiaryRecord {
    pub id: RecordId,
    pub owner: Address,
    pub beneficiary: Address,
    pub wallet: Address,
    pub allocation: u64,
    pub window: InactivityWindow,
    pub last_checkin: Timestamp,
    pub created_at: Timestamp,
}

impl BeneficiaryRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            owner: self.owner,
            beneficiary: self.beneficiary,
        }
    }

    /// Moment the record becomes claimable.
    pub fn deadline(&self) -> Timestamp {
        self.last_checkin.add_millis(self.window.as_millis())
    }
}
