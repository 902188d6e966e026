//! API route handlers

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use deadhand_core::{
    evaluate, Address, BeneficiaryRecord, ExpiryStatus, InactivityWindow, NewRecord, Timestamp,
    Urgency, ValidationError,
};
use deadhand_index::RecordView;
use deadhand_reconcile::Outcome;
use serde::{Deserialize, Serialize};

use super::{reply, ApiError, AppState};

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

// === Wire types ===

/// One record as returned by every endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordJson {
    pub id: i64,
    pub owner_address: Address,
    pub bene_address: Address,
    pub wallet_address: Address,
    pub allocation: u64,
    pub inactivity_duration: u32,
    pub inactivity_unit: &'static str,
    pub last_checkin: String,
    pub last_checkin_ms: i64,
    pub created_at: String,
    pub created_at_ms: i64,
    pub remaining_ms: i64,
    pub is_claimable: bool,
    pub deadline: String,
    pub urgency: Urgency,
}

impl RecordJson {
    fn new(record: &BeneficiaryRecord, status: ExpiryStatus) -> Self {
        Self {
            id: record.id.0,
            owner_address: record.owner,
            bene_address: record.beneficiary,
            wallet_address: record.wallet,
            allocation: record.allocation,
            inactivity_duration: record.window.duration(),
            inactivity_unit: record.window.unit().as_str(),
            last_checkin: record.last_checkin.to_rfc3339(),
            last_checkin_ms: record.last_checkin.as_millis(),
            created_at: record.created_at.to_rfc3339(),
            created_at_ms: record.created_at.as_millis(),
            remaining_ms: status.remaining_ms,
            is_claimable: status.claimable,
            deadline: status.deadline.to_rfc3339(),
            urgency: status.urgency,
        }
    }

    fn at(record: &BeneficiaryRecord, now: Timestamp) -> Self {
        Self::new(record, evaluate(record, now))
    }
}

impl From<&RecordView> for RecordJson {
    fn from(view: &RecordView) -> Self {
        let status = ExpiryStatus {
            remaining_ms: view.remaining_ms,
            claimable: view.claimable,
            deadline: view.deadline,
            urgency: view.urgency,
        };
        Self::new(&view.record, status)
    }
}

/// Integer field that clients send either as a JSON number or a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LooseInt {
    Number(i64),
    Text(String),
}

impl LooseInt {
    fn value(&self, field: &str) -> Result<i64, ApiError> {
        match self {
            LooseInt::Number(n) => Ok(*n),
            LooseInt::Text(s) => s.trim().parse().map_err(|_| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "validation",
                    format!("{} must be an integer", field),
                )
            }),
        }
    }
}

fn required(field: &'static str, value: Option<&str>) -> Result<Address, ValidationError> {
    ValidationError::parse_address(field, value.unwrap_or(""))
}

fn optional(field: &'static str, value: Option<&str>) -> Result<Option<Address>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => ValidationError::parse_address(field, v).map(Some),
    }
}

/// Ledger confirmation time supplied by the client, else now
fn confirmed_at(state: &AppState, ms: Option<i64>) -> Timestamp {
    ms.map(Timestamp::from_millis)
        .unwrap_or_else(|| state.clock.now())
}

fn unexpected(outcome: Outcome) -> ApiError {
    ApiError::internal("unexpected_outcome", format!("{:?}", outcome))
}

// === /api/beneficiaries ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    pub owner_address: Option<String>,
    /// `urgency` sorts most urgent first; default is creation order
    pub sort: Option<String>,
}

/// GET /api/beneficiaries?ownerAddress=
pub async fn list_beneficiaries(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Response {
    reply(&state, owner_records(&state, query))
}

fn owner_records(state: &AppState, query: OwnerQuery) -> Result<Vec<RecordJson>, ApiError> {
    let owner = required("ownerAddress", query.owner_address.as_deref())?;
    let now = state.clock.now();
    let views = match query.sort.as_deref() {
        None | Some("created") => state.query.owner_view(&owner, now)?,
        Some("urgency") => state.query.owner_view_by_urgency(&owner, now)?,
        Some(other) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "validation",
                format!("Unknown sort '{}' (expected created or urgency)", other),
            ))
        }
    };
    Ok(views.iter().map(RecordJson::from).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub owner_address: Option<String>,
    pub bene_address: Option<String>,
    pub wallet_address: Option<String>,
    pub allocation: Option<LooseInt>,
    pub inactivity_duration: Option<LooseInt>,
    pub inactivity_unit: Option<String>,
    pub confirmed_at: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResponse {
    pub success: bool,
    pub inserted_id: i64,
    pub record: RecordJson,
}

/// POST /api/beneficiaries - mirror a confirmed `add_beneficiary`
pub async fn add_beneficiary(
    State(state): State<AppState>,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => add(&state, request).await,
        Err(rejection) => Err(rejection.into()),
    };
    reply(&state, result)
}

async fn add(state: &AppState, request: AddRequest) -> Result<AddResponse, ApiError> {
    let owner = required("ownerAddress", request.owner_address.as_deref())?;
    let beneficiary = required("beneAddress", request.bene_address.as_deref())?;
    let wallet = required("walletAddress", request.wallet_address.as_deref())?;
    let (Some(allocation), Some(duration), Some(unit)) = (
        request.allocation,
        request.inactivity_duration,
        request.inactivity_unit,
    ) else {
        return Err(ValidationError::MissingField("allocation").into());
    };

    let allocation = allocation.value("allocation")?;
    if allocation <= 0 {
        return Err(ValidationError::NonPositiveAllocation.into());
    }
    let window = InactivityWindow::parse(duration.value("inactivityDuration")?, &unit)?;
    let record = NewRecord::new(owner, beneficiary, wallet, allocation as u64, window)?;

    let at = confirmed_at(state, request.confirmed_at);
    log::debug!("POST beneficiary {} on {} confirmed at {}", record.key(), wallet, at);
    match state.engine.on_beneficiary_added(record, at).await? {
        Outcome::Created(record) => Ok(AddResponse {
            success: true,
            inserted_id: record.id.0,
            record: RecordJson::at(&record, state.clock.now()),
        }),
        other => Err(unexpected(other)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub owner_address: Option<String>,
    pub bene_address: Option<String>,
    /// Looked up from the index when omitted
    pub wallet_address: Option<String>,
    pub confirmed_at: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResponse {
    pub success: bool,
    pub updated_count: usize,
    pub last_checkin: String,
    pub record: RecordJson,
    /// Set when the record was missing and rebuilt from the ledger
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub healed: bool,
}

/// PUT /api/beneficiaries - mirror a confirmed check-in
pub async fn check_in(
    State(state): State<AppState>,
    body: Result<Json<CheckInRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => touch(&state, request).await,
        Err(rejection) => Err(rejection.into()),
    };
    reply(&state, result)
}

async fn touch(state: &AppState, request: CheckInRequest) -> Result<CheckInResponse, ApiError> {
    let owner = required("ownerAddress", request.owner_address.as_deref())?;
    let beneficiary = required("beneAddress", request.bene_address.as_deref())?;
    let wallet = optional("walletAddress", request.wallet_address.as_deref())?;
    let at = confirmed_at(state, request.confirmed_at);
    log::debug!("PUT check-in {} -> {} confirmed at {}", owner, beneficiary, at);

    let (record, healed) = match state.engine.on_check_in(owner, beneficiary, wallet, at).await? {
        Outcome::Touched(record) => (record, false),
        Outcome::Healed(record) => (record, true),
        Outcome::Discarded(reason) => {
            return Err(ApiError::not_found("Beneficiary not found", reason))
        }
        other => return Err(unexpected(other)),
    };
    Ok(CheckInResponse {
        success: true,
        updated_count: 1,
        last_checkin: record.last_checkin.to_rfc3339(),
        record: RecordJson::at(&record, state.clock.now()),
        healed,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveRequest {
    pub owner_address: Option<String>,
    pub bene_address: Option<String>,
    pub wallet_address: Option<String>,
    pub confirmed_at: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResponse {
    pub success: bool,
    pub deleted_count: usize,
}

/// DELETE /api/beneficiaries
///
/// With `beneAddress`: mirror a confirmed revocation of that beneficiary.
/// With only `walletAddress`: mirror a confirmed transfer that closed the
/// wallet, removing every record on it.
pub async fn remove_beneficiaries(
    State(state): State<AppState>,
    body: Result<Json<RemoveRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => remove(&state, request).await,
        Err(rejection) => Err(rejection.into()),
    };
    reply(&state, result)
}

async fn remove(state: &AppState, request: RemoveRequest) -> Result<RemoveResponse, ApiError> {
    let owner = required("ownerAddress", request.owner_address.as_deref())?;
    let beneficiary = optional("beneAddress", request.bene_address.as_deref())?;
    let wallet = optional("walletAddress", request.wallet_address.as_deref())?;
    let at = confirmed_at(state, request.confirmed_at);
    log::debug!("DELETE beneficiaries of {} confirmed at {}", owner, at);

    let outcome = match (beneficiary, wallet) {
        (Some(beneficiary), wallet) => state.engine.on_revoke(owner, beneficiary, wallet, at).await?,
        (None, Some(wallet)) => state.engine.on_transfer_executed(owner, wallet, at).await?,
        (None, None) => return Err(ValidationError::MissingField("beneAddress").into()),
    };

    let deleted_count = match outcome {
        Outcome::Removed(_) => 1,
        Outcome::WalletClosed { removed } => removed,
        Outcome::Discarded(reason) => {
            return Err(ApiError::not_found("Beneficiary not found", reason))
        }
        other => return Err(unexpected(other)),
    };
    Ok(RemoveResponse {
        success: true,
        deleted_count,
    })
}

// === /api/claimlist ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryQuery {
    pub bene_address: Option<String>,
}

/// GET /api/claimlist?beneAddress= - claimable records first
pub async fn claim_list(
    State(state): State<AppState>,
    Query(query): Query<BeneficiaryQuery>,
) -> Response {
    reply(&state, claimable_records(&state, query))
}

fn claimable_records(
    state: &AppState,
    query: BeneficiaryQuery,
) -> Result<Vec<RecordJson>, ApiError> {
    let beneficiary = required("beneAddress", query.bene_address.as_deref())?;
    let view = state
        .query
        .beneficiary_claim_view(&beneficiary, state.clock.now())?;
    Ok(view.all().map(RecordJson::from).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub wallet_address: Option<String>,
    pub bene_address: Option<String>,
    pub confirmed_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub message: &'static str,
}

/// DELETE /api/claimlist - mirror a confirmed claim
pub async fn claim(
    State(state): State<AppState>,
    body: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => withdraw(&state, request).await,
        Err(rejection) => Err(rejection.into()),
    };
    reply(&state, result)
}

async fn withdraw(state: &AppState, request: ClaimRequest) -> Result<ClaimResponse, ApiError> {
    let wallet = required("walletAddress", request.wallet_address.as_deref())?;
    let beneficiary = required("beneAddress", request.bene_address.as_deref())?;
    let at = confirmed_at(state, request.confirmed_at);
    log::debug!("DELETE claim {} on {} confirmed at {}", beneficiary, wallet, at);

    match state.engine.on_claim(beneficiary, wallet, at).await? {
        Outcome::Removed(_) => Ok(ClaimResponse {
            success: true,
            message: "Beneficiary deleted",
        }),
        Outcome::Discarded(reason) => Err(ApiError::not_found("Document not found", reason)),
        other => Err(unexpected(other)),
    }
}
