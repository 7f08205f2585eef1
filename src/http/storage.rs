//! Handlers for the `/1.5/{uid}/storage` routes.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::state::AppState;
use crate::storage::bso::valid_bso_id;
use crate::storage::timestamp::{self, Timestamp};
use crate::storage::{PutBsoInput, StorageError};

use super::error::{AppError, AppResult, WEAVE_INVALID_WBO};
use super::extract::{
    parse_bso_value, parse_into_bso, parse_list_params, ConditionalHeaders, ParseError,
    X_LAST_MODIFIED, X_WEAVE_NEXT_OFFSET,
};
use super::{modified_value, require_uid};

const MEDIA_JSON: &str = "application/json";
const MEDIA_NEWLINES: &str = "application/newlines";

fn media_type(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let media = content_type.split(';').next().unwrap_or_default();
    Some(media.trim().to_ascii_lowercase())
}

fn last_modified(modified: Timestamp) -> [(&'static str, String); 1] {
    [(X_LAST_MODIFIED, timestamp::format(modified))]
}

/// The Weave "invalid WBO" reply for a batch that could not be decoded.
/// The original server ships it with a 200; nothing is committed.
fn invalid_wbo_batch() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        WEAVE_INVALID_WBO,
    )
        .into_response()
}

async fn get_or_create_collection(
    state: &AppState,
    uid: &str,
    collection: &str,
) -> Result<i64, StorageError> {
    match state.dispatch.get_collection_id(uid, collection).await {
        Err(StorageError::NotFound) => state.dispatch.create_collection(uid, collection).await,
        other => other,
    }
}

/// `GET /1.5/{uid}/storage/{collection}`: list ids, or full records
/// with `full=1`.
pub async fn collection_get(
    State(state): State<AppState>,
    Path((uid, collection)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    conditional: ConditionalHeaders,
) -> AppResult<Response> {
    require_uid(&uid)?;
    let (mut query, full) = parse_list_params(&params)?;
    let cap = state.max_bso_get_limit;
    query.limit = Some(query.limit.map_or(cap, |limit| limit.min(cap)));

    let cid = match state.dispatch.get_collection_id(&uid, &collection).await {
        Ok(cid) => Some(cid),
        Err(StorageError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };
    let modified = match cid {
        Some(cid) => state.dispatch.get_collection_modified(&uid, cid).await?,
        None => 0,
    };
    conditional.check(modified)?;

    let page = match cid {
        Some(cid) => state.dispatch.get_bsos(&uid, cid, query).await?,
        None => Default::default(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        X_LAST_MODIFIED,
        HeaderValue::from_str(&timestamp::format(modified)).expect("timestamps are valid header values"),
    );
    if let Some(next) = page.next_offset {
        headers.insert(
            X_WEAVE_NEXT_OFFSET,
            HeaderValue::from_str(&next.to_string()).expect("offsets are valid header values"),
        );
    }

    if full {
        Ok((headers, Json(page.bsos)).into_response())
    } else {
        let ids: Vec<String> = page.bsos.into_iter().map(|bso| bso.id).collect();
        Ok((headers, Json(ids)).into_response())
    }
}

/// `POST /1.5/{uid}/storage/{collection}`: batched upsert.
pub async fn collection_post(
    State(state): State<AppState>,
    Path((uid, collection)): Path<(String, String)>,
    conditional: ConditionalHeaders,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    require_uid(&uid)?;

    let values: Vec<Value> = match media_type(&headers).as_deref() {
        Some(MEDIA_JSON) => {
            let body: Value = match serde_json::from_slice(&body) {
                Ok(body) => body,
                Err(_) => return Ok(invalid_wbo_batch()),
            };
            match body {
                Value::Array(values) => values,
                _ => return Ok(invalid_wbo_batch()),
            }
        }
        Some(MEDIA_NEWLINES) => {
            // objects separated by arbitrary whitespace, no wrapping array
            let stream = serde_json::Deserializer::from_slice(&body).into_iter::<Value>();
            match stream.collect() {
                Ok(values) => values,
                Err(_) => return Ok(invalid_wbo_batch()),
            }
        }
        _ => return Err(AppError::with_status(StatusCode::UNSUPPORTED_MEDIA_TYPE)),
    };

    let mut inputs: Vec<PutBsoInput> = Vec::with_capacity(values.len());
    let mut parse_failures: Vec<(String, &'static str)> = Vec::new();
    for value in &values {
        match parse_bso_value(value) {
            Ok(input) if input.id.is_some() => inputs.push(input),
            // no usable id to report the failure under: reject the batch
            Ok(_) | Err(ParseError { bid: None, .. }) => return Ok(invalid_wbo_batch()),
            Err(ParseError {
                bid: Some(bid),
                field,
            }) => parse_failures.push((bid, field)),
        }
    }

    let modified = match state.dispatch.get_collection_id(&uid, &collection).await {
        Ok(cid) => state.dispatch.get_collection_modified(&uid, cid).await?,
        Err(StorageError::NotFound) => 0,
        Err(err) => return Err(err.into()),
    };
    conditional.check_unmodified(modified)?;

    let cid = get_or_create_collection(&state, &uid, &collection).await?;
    let mut results = state.dispatch.post_bsos(&uid, cid, inputs).await?;
    for (bid, field) in parse_failures {
        results.failed.entry(bid).or_default().push(field.to_string());
    }
    Ok((last_modified(results.modified), Json(&results)).into_response())
}

/// `DELETE /1.5/{uid}/storage/{collection}`: drop the collection, or
/// just the records named by `ids=`.
pub async fn collection_delete(
    State(state): State<AppState>,
    Path((uid, collection)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    conditional: ConditionalHeaders,
) -> AppResult<Response> {
    require_uid(&uid)?;
    let (query, _) = parse_list_params(&params)?;

    let cid = state.dispatch.get_collection_id(&uid, &collection).await?;
    let modified = state.dispatch.get_collection_modified(&uid, cid).await?;
    conditional.check_unmodified(modified)?;

    let modified = match query.ids {
        Some(ids) => state.dispatch.delete_bsos(&uid, cid, ids).await?,
        None => state.dispatch.delete_collection(&uid, cid).await?,
    };
    Ok((
        last_modified(modified),
        Json(json!({ "modified": modified_value(modified) })),
    )
        .into_response())
}

/// `GET /1.5/{uid}/storage/{collection}/{bso}`: one record.
pub async fn bso_get(
    State(state): State<AppState>,
    Path((uid, collection, bid)): Path<(String, String, String)>,
    conditional: ConditionalHeaders,
) -> AppResult<Response> {
    require_uid(&uid)?;
    if !valid_bso_id(&bid) {
        return Err(AppError::invalid_wbo(StatusCode::BAD_REQUEST));
    }
    conditional.reject_both()?;

    let cid = state.dispatch.get_collection_id(&uid, &collection).await?;
    let bso = state.dispatch.get_bso(&uid, cid, &bid).await?;
    conditional.check(bso.modified)?;
    Ok((last_modified(bso.modified), Json(&bso)).into_response())
}

/// `PUT /1.5/{uid}/storage/{collection}/{bso}`: create or update one
/// record. The response body is the new timestamp.
pub async fn bso_put(
    State(state): State<AppState>,
    Path((uid, collection, bid)): Path<(String, String, String)>,
    conditional: ConditionalHeaders,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    require_uid(&uid)?;
    if !valid_bso_id(&bid) {
        return Err(AppError::invalid_wbo(StatusCode::BAD_REQUEST));
    }
    if media_type(&headers).as_deref() != Some(MEDIA_JSON) {
        return Err(AppError::with_status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }
    let input =
        parse_into_bso(&body).map_err(|_| AppError::invalid_wbo(StatusCode::BAD_REQUEST))?;

    let cid = get_or_create_collection(&state, &uid, &collection).await?;
    let existing = match state.dispatch.get_bso_modified(&uid, cid, &bid).await {
        Ok(modified) => modified,
        Err(StorageError::NotFound) => 0,
        Err(err) => return Err(err.into()),
    };
    conditional.check_unmodified(existing)?;

    let modified = state.dispatch.put_bso(&uid, cid, &bid, input).await?;
    Ok((last_modified(modified), Json(modified_value(modified))).into_response())
}

/// `DELETE /1.5/{uid}/storage/{collection}/{bso}`: drop one record.
pub async fn bso_delete(
    State(state): State<AppState>,
    Path((uid, collection, bid)): Path<(String, String, String)>,
    conditional: ConditionalHeaders,
) -> AppResult<Response> {
    require_uid(&uid)?;
    if !valid_bso_id(&bid) {
        return Err(AppError::invalid_wbo(StatusCode::BAD_REQUEST));
    }

    let cid = state.dispatch.get_collection_id(&uid, &collection).await?;
    let existing = state.dispatch.get_bso_modified(&uid, cid, &bid).await?;
    conditional.check_unmodified(existing)?;

    let modified = state.dispatch.delete_bso(&uid, cid, &bid).await?;
    Ok((last_modified(modified), Json(modified_value(modified))).into_response())
}

/// `DELETE /1.5/{uid}` and `DELETE /1.5/{uid}/storage`: full user wipe.
pub async fn delete_all(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> AppResult<Response> {
    require_uid(&uid)?;
    let modified = state.dispatch.delete_everything(&uid).await?;
    Ok((last_modified(modified), Json(modified_value(modified))).into_response())
}
