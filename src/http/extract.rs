//! Request parsing: conditional headers, collection query parameters,
//! and the field-by-field BSO body decoder.

use std::collections::HashMap;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use serde_json::Value;

use crate::storage::bso::valid_bso_id;
use crate::storage::store::{BsoQuery, Sort};
use crate::storage::timestamp::{self, Timestamp};
use crate::storage::PutBsoInput;

use super::error::AppError;

/// Header carrying the server clock on every response.
pub const X_WEAVE_TIMESTAMP: &str = "x-weave-timestamp";
/// Header carrying the target resource's modified timestamp.
pub const X_LAST_MODIFIED: &str = "x-last-modified";
/// Header carrying the resume offset of a truncated listing.
pub const X_WEAVE_NEXT_OFFSET: &str = "x-weave-next-offset";
/// Conditional request header: succeed only if modified since `t`.
pub const X_IF_MODIFIED_SINCE: &str = "x-if-modified-since";
/// Conditional request header: succeed only if unmodified since `t`.
pub const X_IF_UNMODIFIED_SINCE: &str = "x-if-unmodified-since";

/// The parsed conditional request headers.
///
/// A malformed value rejects the request with a plain 400 before the
/// handler runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalHeaders {
    /// `X-If-Modified-Since`, in hundredths.
    pub if_modified_since: Option<Timestamp>,
    /// `X-If-Unmodified-Since`, in hundredths.
    pub if_unmodified_since: Option<Timestamp>,
}

impl ConditionalHeaders {
    /// Evaluates both conditions against a resource timestamp: 304 when
    /// nothing changed since `X-If-Modified-Since`, 412 when something
    /// changed past `X-If-Unmodified-Since`.
    pub fn check(&self, modified: Timestamp) -> Result<(), AppError> {
        if let Some(t) = self.if_modified_since {
            if modified <= t {
                return Err(AppError::with_status(StatusCode::NOT_MODIFIED));
            }
        }
        if let Some(t) = self.if_unmodified_since {
            if modified > t {
                return Err(AppError::with_status(StatusCode::PRECONDITION_FAILED));
            }
        }
        Ok(())
    }

    /// Evaluates only `X-If-Unmodified-Since`, for write routes where a
    /// 304 would make no sense.
    pub fn check_unmodified(&self, modified: Timestamp) -> Result<(), AppError> {
        if let Some(t) = self.if_unmodified_since {
            if modified > t {
                return Err(AppError::with_status(StatusCode::PRECONDITION_FAILED));
            }
        }
        Ok(())
    }

    /// Rejects a request carrying both headers at once (single-BSO GET
    /// only).
    pub fn reject_both(&self) -> Result<(), AppError> {
        if self.if_modified_since.is_some() && self.if_unmodified_since.is_some() {
            return Err(AppError::with_status(StatusCode::BAD_REQUEST));
        }
        Ok(())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ConditionalHeaders {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let parse = |name: &str| -> Result<Option<Timestamp>, AppError> {
            match parts.headers.get(name) {
                None => Ok(None),
                Some(value) => value
                    .to_str()
                    .ok()
                    .and_then(timestamp::parse)
                    .map(Some)
                    .ok_or_else(|| AppError::with_status(StatusCode::BAD_REQUEST)),
            }
        };
        Ok(Self {
            if_modified_since: parse(X_IF_MODIFIED_SINCE)?,
            if_unmodified_since: parse(X_IF_UNMODIFIED_SINCE)?,
        })
    }
}

/// Parses and validates collection GET/DELETE query parameters.
///
/// Returns the storage query plus whether `full` records were requested.
/// Empty values are treated as absent; anything malformed is a plain
/// 400.
pub fn parse_list_params(params: &HashMap<String, String>) -> Result<(BsoQuery, bool), AppError> {
    let bad_request = || AppError::with_status(StatusCode::BAD_REQUEST);
    let mut query = BsoQuery::default();

    if let Some(ids) = params.get("ids").filter(|v| !v.is_empty()) {
        let ids: Vec<String> = ids.split(',').map(str::to_string).collect();
        if !ids.iter().all(|id| valid_bso_id(id)) {
            return Err(bad_request());
        }
        query.ids = Some(ids);
    }
    if let Some(newer) = params.get("newer").filter(|v| !v.is_empty()) {
        query.newer = Some(timestamp::parse(newer).ok_or_else(bad_request)?);
    }
    if let Some(older) = params.get("older").filter(|v| !v.is_empty()) {
        query.older = Some(timestamp::parse(older).ok_or_else(bad_request)?);
    }
    if let Some(limit) = params.get("limit").filter(|v| !v.is_empty()) {
        let limit: usize = limit.parse().map_err(|_| bad_request())?;
        if limit == 0 {
            return Err(bad_request());
        }
        query.limit = Some(limit);
    }
    if let Some(offset) = params.get("offset").filter(|v| !v.is_empty()) {
        query.offset = offset.parse().map_err(|_| bad_request())?;
    }
    if let Some(sort) = params.get("sort").filter(|v| !v.is_empty()) {
        query.sort = match sort.as_str() {
            "newest" => Sort::Newest,
            "oldest" => Sort::Oldest,
            "index" => Sort::Index,
            _ => return Err(bad_request()),
        };
    }
    let full = params.contains_key("full");
    Ok((query, full))
}

/// A BSO body that failed to decode, naming the offending field (`"-"`
/// when the body was not an object at all) and the record id when one
/// was recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The record id, when the `id` field itself decoded.
    pub bid: Option<String>,
    /// The field that failed.
    pub field: &'static str,
}

impl ParseError {
    fn new(bid: Option<&str>, field: &'static str) -> Self {
        Self {
            bid: bid.map(str::to_string),
            field,
        }
    }
}

/// Decodes raw JSON bytes into a [`PutBsoInput`].
pub fn parse_into_bso(raw: &[u8]) -> Result<PutBsoInput, ParseError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|_| ParseError::new(None, "-"))?;
    parse_bso_value(&value)
}

/// Decodes one already-parsed JSON value into a [`PutBsoInput`].
///
/// Fields are checked one by one so the error can name the first bad
/// one. Numeric strings are accepted for `sortindex` and `ttl`, matching
/// what shipped clients send; a JSON `null` sortindex means "clear".
pub fn parse_bso_value(value: &Value) -> Result<PutBsoInput, ParseError> {
    let object = value.as_object().ok_or(ParseError::new(None, "-"))?;

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return Err(ParseError::new(None, "id")),
    };
    let bid = id.as_deref();

    let payload = match object.get("payload") {
        None | Some(Value::Null) => None,
        Some(Value::String(payload)) => Some(payload.clone()),
        Some(_) => return Err(ParseError::new(bid, "payload")),
    };

    let sortindex = match object.get("sortindex") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(value) => {
            let n = parse_integer(value)
                .and_then(|n| i32::try_from(n).ok())
                .ok_or(ParseError::new(bid, "sortindex"))?;
            Some(Some(n))
        }
    };

    let ttl = match object.get("ttl") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_integer(value).ok_or(ParseError::new(bid, "ttl"))?),
    };

    Ok(PutBsoInput {
        id,
        payload,
        sortindex,
        ttl,
    })
}

fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
