use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use datavaccin_lib::record::{record_id_of, AGE_BRACKET, INJECTION_WEEK, MUNICIPALITY, RECORD_ID_KEY};
use chrono::Local;
use datavaccin_lib::{
    refresh_week, Input, Record, RecordFilter, RefreshOutcome, StoreError, WeekId,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::auth::{check_write_token, token_from_headers};
use super::error::ApiError;
use super::metrics::{record_mutation, record_refresh};
use super::state::AppState;

type Payload = Result<Json<Value>, JsonRejection>;

// ── Helpers ──────────────────────────────────────────────────

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if check_write_token(&state.config.auth, token_from_headers(headers)) {
        Ok(())
    } else {
        warn!("rejected write without a valid token");
        Err(ApiError::Unauthorized)
    }
}

fn body_object(payload: Payload) -> Result<Input, ApiError> {
    match payload? {
        Json(Value::Object(map)) => Ok(map),
        Json(_) => Err(ApiError::MalformedPayload(
            "expected a JSON object".to_string(),
        )),
    }
}

fn error_label(err: &StoreError) -> &'static str {
    match err {
        StoreError::MissingKey(_) => "missing_key",
        StoreError::Duplicate(_) => "duplicate",
        StoreError::Conflict { .. } => "conflict",
        StoreError::NotFound(_) => "not_found",
        StoreError::Io { .. } | StoreError::Json(_) => "error",
    }
}

/// Count the outcome of a store mutation and lift its error.
fn tracked<T>(op: &str, result: Result<T, StoreError>) -> Result<T, ApiError> {
    match &result {
        Ok(_) => record_mutation(op, "ok"),
        Err(e) => record_mutation(op, error_label(e)),
    }
    result.map_err(ApiError::from)
}

async fn create_in(
    state: &AppState,
    headers: &HeaderMap,
    payload: Payload,
    filter: Option<RecordFilter>,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    authorize(state, headers)?;
    let input = body_object(payload)?;
    let result = match filter {
        Some(filter) => state.store.create_scoped(&input, &filter).await,
        None => state.store.create(&input).await,
    };
    let record = tracked("create", result)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT on a filter path targets the record named by the body's `recordid`.
async fn update_from_body(
    state: &AppState,
    headers: &HeaderMap,
    payload: Payload,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    authorize(state, headers)?;
    let input = body_object(payload)?;
    let result = match record_id_of(&input) {
        Some(record_id) => state.store.update(record_id, &input).await,
        None => Err(StoreError::MissingKey(RECORD_ID_KEY)),
    };
    let record = tracked("update", result)?;
    Ok((StatusCode::CREATED, Json(record)))
}

// ── /records ─────────────────────────────────────────────────

pub async fn list_records(State(state): State<AppState>) -> Json<Vec<Record>> {
    Json(state.store.all().await)
}

pub async fn create_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Payload,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    create_in(&state, &headers, payload, None).await
}

// ── /records/{id} ────────────────────────────────────────────

pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get(&record_id).await {
        Ok(record) => Ok(Json(record).into_response()),
        Err(StoreError::NotFound(_)) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(e.into()),
    }
}

/// The body's `recordid` must match the path id: a mismatch is a 400
/// conflict, a missing one a 400 missing key.
pub async fn update_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
    headers: HeaderMap,
    payload: Payload,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    authorize(&state, &headers)?;
    let input = body_object(payload)?;
    let record = tracked("update", state.store.update(&record_id, &input).await)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    if state.store.delete(&record_id).await {
        record_mutation("delete", "ok");
        Ok((StatusCode::OK, Json(json!({"validation": "data deleted"}))).into_response())
    } else {
        record_mutation("delete", "not_found");
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

// ── /records/filter/{municipality} ───────────────────────────

pub async fn list_by_municipality(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
) -> Json<Vec<Record>> {
    Json(state.store.filter(&RecordFilter::municipality(&municipality)).await)
}

pub async fn create_in_municipality(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    headers: HeaderMap,
    payload: Payload,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let filter = RecordFilter::municipality(&municipality);
    create_in(&state, &headers, payload, Some(filter)).await
}

/// Distinct injection weeks across the whole store; the municipality segment
/// does not narrow the list.
pub async fn list_weeks(
    State(state): State<AppState>,
    Path(_municipality): Path<String>,
) -> Json<Value> {
    Json(json!({ INJECTION_WEEK: state.store.distinct(INJECTION_WEEK).await }))
}

// ── /records/filter/{municipality}/week/{week} ───────────────

pub async fn list_by_week(
    State(state): State<AppState>,
    Path((municipality, week)): Path<(String, String)>,
) -> Json<Vec<Record>> {
    let filter = RecordFilter::municipality(&municipality).week(&week);
    Json(state.store.filter(&filter).await)
}

pub async fn create_in_week(
    State(state): State<AppState>,
    Path((municipality, week)): Path<(String, String)>,
    headers: HeaderMap,
    payload: Payload,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let filter = RecordFilter::municipality(&municipality).week(&week);
    create_in(&state, &headers, payload, Some(filter)).await
}

/// Distinct age brackets across the whole store.
pub async fn list_ages(
    State(state): State<AppState>,
    Path(_segments): Path<(String, String)>,
) -> Json<Value> {
    Json(json!({ AGE_BRACKET: state.store.distinct(AGE_BRACKET).await }))
}

// ── /records/filter/{municipality}/week/{week}/age/{age} ─────

pub async fn list_by_age(
    State(state): State<AppState>,
    Path((municipality, week, age)): Path<(String, String, String)>,
) -> Json<Vec<Record>> {
    let filter = RecordFilter::municipality(&municipality).week(&week).age(&age);
    Json(state.store.filter(&filter).await)
}

pub async fn create_in_age(
    State(state): State<AppState>,
    Path((municipality, week, age)): Path<(String, String, String)>,
    headers: HeaderMap,
    payload: Payload,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let filter = RecordFilter::municipality(&municipality).week(&week).age(&age);
    create_in(&state, &headers, payload, Some(filter)).await
}

/// Shared by every PUT under `/records/filter/...`.
pub async fn update_in_filter(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Payload,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    update_from_body(&state, &headers, payload).await
}

// ── /municipalities ──────────────────────────────────────────

pub async fn list_municipalities(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "commune_code": state.store.distinct(MUNICIPALITY).await }))
}

// ── /refresh ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RefreshParams {
    week: Option<WeekId>,
}

/// Fetch one week into the live store and persist it, the current week when
/// none is given. This is how a week the scheduler missed gets loaded while
/// the server runs.
pub async fn trigger_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<RefreshParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let Query(params) = params?;
    let week = params
        .week
        .unwrap_or_else(|| WeekId::of(Local::now().naive_local()));
    info!(week = %week, "manual refresh requested");

    let policy = state.config.refresh.duplicates;
    let outcome = match refresh_week(week, state.source.as_ref(), &state.store, policy).await {
        Ok(outcome) => outcome,
        Err(e) => {
            record_refresh(None);
            return Err(e.into());
        }
    };
    record_refresh(Some(&outcome));

    let body = match outcome {
        RefreshOutcome::Refreshed {
            week,
            reported,
            appended,
            skipped,
            meta,
        } => json!({
            "week": week,
            "reported": reported,
            "appended": appended,
            "skipped": skipped,
            "records_count": meta.records_count,
            "hash": meta.hash,
            "saved_at": meta.saved_at,
        }),
        other => json!({ "week": week, "outcome": other.label() }),
    };
    Ok(Json(body))
}
