//! Handlers for the `/1.5/{uid}/info/*` routes.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{Map, Number, Value};

use crate::state::AppState;
use crate::storage::timestamp;

use super::error::AppResult;
use super::extract::{ConditionalHeaders, X_LAST_MODIFIED};
use super::{modified_value, require_uid};

/// `GET /1.5/{uid}/info/collections`: per-collection modified times.
pub async fn collections(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    conditional: ConditionalHeaders,
) -> AppResult<impl IntoResponse> {
    require_uid(&uid)?;
    let last = state.dispatch.last_modified(&uid).await?;
    conditional.check(last)?;
    let info = state.dispatch.info_collections(&uid).await?;
    let body: Map<String, Value> = info
        .into_iter()
        .map(|(name, modified)| (name, modified_value(modified)))
        .collect();
    Ok((
        [(X_LAST_MODIFIED, timestamp::format(last))],
        Json(Value::Object(body)),
    ))
}

/// `GET /1.5/{uid}/info/collection_counts`: live records per collection.
pub async fn collection_counts(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> AppResult<impl IntoResponse> {
    require_uid(&uid)?;
    let counts = state.dispatch.info_collection_counts(&uid).await?;
    Ok(Json(counts))
}

/// `GET /1.5/{uid}/info/collection_usage`: kilobytes per collection.
pub async fn collection_usage(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> AppResult<impl IntoResponse> {
    require_uid(&uid)?;
    let usage = state.dispatch.info_collection_usage(&uid).await?;
    let body: Map<String, Value> = usage
        .into_iter()
        .map(|(name, bytes)| {
            let kb = Number::from_f64(bytes as f64 / 1024.0)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            (name, kb)
        })
        .collect();
    Ok(Json(Value::Object(body)))
}

/// `GET /1.5/{uid}/info/quota`: `[used_kilobytes, null]`.
///
/// Quota limits are not enforced; the second element is always null.
pub async fn quota(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> AppResult<impl IntoResponse> {
    require_uid(&uid)?;
    let usage = state.dispatch.info_collection_usage(&uid).await?;
    let total: u64 = usage.values().sum();
    let used_kb = total as f64 / 1024.0;
    Ok(Json((used_kb, None::<f64>)))
}
