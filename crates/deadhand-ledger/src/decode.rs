//! Tagged-variant decoder for ledger wallet objects.
//!
//! Wallet contents arrive as a Move value tree where every value is a
//! single-key object naming its variant:
//!
//! ```text
//! {"Struct": [
//!   {"name": "owner", "value": {"Address": [0, 1, ...]}},
//!   {"name": "coin",  "value": {"Struct": [{"name": "value", "value": {"Number": "15"}}]}}
//! ]}
//! ```
//!
//! Each beneficiary is a dynamic field: the name BCS starts with the 32-byte
//! beneficiary address, the value BCS is three little-endian u64s
//! (`last_checkin` ms, `threshold` ms, `allocation`). Everything is checked
//! here once and leaves as a [`WalletSnapshot`].

use crate::snapshot::{LedgerBeneficiary, WalletSnapshot};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use deadhand_core::{Address, AddressError, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of an encoded beneficiary entry.
pub const BENEFICIARY_DATA_LEN: usize = 24;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a {expected}")]
    UnexpectedShape {
        field: &'static str,
        expected: &'static str,
    },

    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("payload too short: expected {expected} bytes, got {got}")]
    ShortPayload { expected: usize, got: usize },

    #[error("invalid number '{0}'")]
    BadNumber(String),

    #[error("value {0} out of range")]
    OutOfRange(u64),

    #[error("invalid address: {0}")]
    Address(#[from] AddressError),
}

/// A Move value as rendered by the ledger's query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveValue {
    Address(Vec<u8>),
    #[serde(rename = "UID")]
    Uid(Vec<u8>),
    Number(String),
    Bool(bool),
    String(String),
    Vector(Vec<MoveValue>),
    Option(Option<Box<MoveValue>>),
    Struct(Vec<MoveField>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveField {
    pub name: String,
    pub value: MoveValue,
}

impl MoveValue {
    fn fields(&self, field: &'static str) -> Result<&[MoveField], DecodeError> {
        match self {
            MoveValue::Struct(fields) => Ok(fields),
            _ => Err(DecodeError::UnexpectedShape {
                field,
                expected: "struct",
            }),
        }
    }

    fn get<'a>(fields: &'a [MoveField], name: &'static str) -> Result<&'a MoveValue, DecodeError> {
        fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
            .ok_or(DecodeError::MissingField(name))
    }

    fn address(&self, field: &'static str) -> Result<Address, DecodeError> {
        match self {
            MoveValue::Address(bytes) | MoveValue::Uid(bytes) => Ok(Address::from_slice(bytes)?),
            _ => Err(DecodeError::UnexpectedShape {
                field,
                expected: "address",
            }),
        }
    }

    /// First `Number` found depth-first (balances are wrapped in a struct).
    fn first_number(&self) -> Option<&str> {
        match self {
            MoveValue::Number(n) => Some(n),
            MoveValue::Struct(fields) => fields.iter().find_map(|f| f.value.first_number()),
            MoveValue::Option(Some(inner)) => inner.first_number(),
            _ => None,
        }
    }
}

/// `{ "bcs": "<base64>" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BcsNode {
    pub bcs: String,
}

/// One dynamic field of a wallet object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFieldNode {
    pub name: BcsNode,
    /// Absent when the field holds an object rather than a plain value
    #[serde(default)]
    pub value: Option<BcsNode>,
}

/// Decoded beneficiary entry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeneficiaryData {
    pub last_checkin_ms: u64,
    pub threshold_ms: u64,
    pub allocation: u64,
}

impl BeneficiaryData {
    pub fn to_bytes(&self) -> [u8; BENEFICIARY_DATA_LEN] {
        let mut out = [0u8; BENEFICIARY_DATA_LEN];
        out[0..8].copy_from_slice(&self.last_checkin_ms.to_le_bytes());
        out[8..16].copy_from_slice(&self.threshold_ms.to_le_bytes());
        out[16..24].copy_from_slice(&self.allocation.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < BENEFICIARY_DATA_LEN {
            return Err(DecodeError::ShortPayload {
                expected: BENEFICIARY_DATA_LEN,
                got: bytes.len(),
            });
        }
        let word = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(buf)
        };
        Ok(Self {
            last_checkin_ms: word(0),
            threshold_ms: word(1),
            allocation: word(2),
        })
    }
}

fn base64_decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    BASE64
        .decode(s)
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

fn to_i64(v: u64) -> Result<i64, DecodeError> {
    i64::try_from(v).map_err(|_| DecodeError::OutOfRange(v))
}

/// Decode one beneficiary dynamic field.
///
/// Returns `Ok(None)` for fields that carry no plain value (not a
/// beneficiary entry).
pub fn decode_beneficiary(node: &DynamicFieldNode) -> Result<Option<LedgerBeneficiary>, DecodeError> {
    let Some(value) = node.value.as_ref() else {
        return Ok(None);
    };

    let name = base64_decode(&node.name.bcs)?;
    if name.len() < 32 {
        return Err(DecodeError::ShortPayload {
            expected: 32,
            got: name.len(),
        });
    }
    let address = Address::from_slice(&name[..32])?;

    let data = BeneficiaryData::from_bytes(&base64_decode(&value.bcs)?)?;
    Ok(Some(LedgerBeneficiary {
        address,
        last_checkin: Timestamp::from_millis(to_i64(data.last_checkin_ms)?),
        threshold_ms: to_i64(data.threshold_ms)?,
        allocation: data.allocation,
    }))
}

/// Decode a wallet object's contents and dynamic fields.
pub fn decode_wallet(
    id: Address,
    contents: &MoveValue,
    dynamic_fields: &[DynamicFieldNode],
) -> Result<WalletSnapshot, DecodeError> {
    let fields = contents.fields("contents")?;

    let owner = MoveValue::get(fields, "owner")?.address("owner")?;

    let balance = match MoveValue::get(fields, "coin")?.first_number() {
        Some(n) => n
            .parse::<u64>()
            .map_err(|_| DecodeError::BadNumber(n.to_string()))?,
        None => {
            return Err(DecodeError::UnexpectedShape {
                field: "coin",
                expected: "balance",
            })
        }
    };

    let mut beneficiaries = Vec::with_capacity(dynamic_fields.len());
    for node in dynamic_fields {
        if let Some(entry) = decode_beneficiary(node)? {
            beneficiaries.push(entry);
        }
    }

    Ok(WalletSnapshot {
        id,
        owner,
        balance,
        beneficiaries,
    })
}

/// Encode a beneficiary dynamic field the way the ledger renders it.
pub fn encode_beneficiary(address: &Address, data: &BeneficiaryData) -> DynamicFieldNode {
    DynamicFieldNode {
        name: BcsNode {
            bcs: BASE64.encode(address.as_bytes()),
        },
        value: Some(BcsNode {
            bcs: BASE64.encode(data.to_bytes()),
        }),
    }
}
