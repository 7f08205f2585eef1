//! Basic Storage Objects and their validation limits.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use super::timestamp::Timestamp;
use super::StorageError;

/// Largest accepted BSO payload in bytes.
pub const MAX_BSO_PAYLOAD_SIZE: usize = 262_144;

/// Largest accepted sortindex magnitude.
pub const MAX_SORTINDEX: i32 = 999_999_999;

/// Longest accepted BSO id.
pub const MAX_BSO_ID_LEN: usize = 64;

/// A single record as stored and as returned by queries.
///
/// `modified` serializes as a `seconds.hh` JSON number and `ttl` is never
/// exposed on the wire, matching the Sync 1.5 output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bso {
    /// Record id, unique within its collection.
    pub id: String,
    /// Server-assigned modification timestamp.
    #[serde(serialize_with = "serialize_modified")]
    pub modified: Timestamp,
    /// Opaque client payload.
    pub payload: String,
    /// Optional client-assigned sort hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i32>,
}

fn serialize_modified<S: Serializer>(modified: &Timestamp, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_f64(*modified as f64 / 100.0)
}

/// One element of a PUT or batched POST, after JSON decoding.
///
/// Every field is optional: on update an absent field is left unchanged.
/// `sortindex` is tri-state: absent (`None`) keeps the stored value,
/// JSON `null` (`Some(None)`) clears it, and a number sets it. `ttl` is
/// the request-side seconds-from-now offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutBsoInput {
    /// Record id; from the body for POST, from the URL for PUT.
    pub id: Option<String>,
    /// New payload, if any.
    pub payload: Option<String>,
    /// Sortindex update, if any.
    pub sortindex: Option<Option<i32>>,
    /// Expiry offset in seconds, if any.
    pub ttl: Option<i64>,
}

/// Outcome of a batched POST.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostResults {
    /// Ids committed in this batch.
    pub success: Vec<String>,
    /// Per-id validation failures, keyed by id.
    pub failed: BTreeMap<String, Vec<String>>,
    /// Timestamp shared by every committed write.
    #[serde(skip)]
    pub modified: Timestamp,
}

/// Checks a BSO id: 1 to 64 characters from `[A-Za-z0-9._-]`.
pub fn valid_bso_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_BSO_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

/// Validates the mutable fields of a write before it reaches SQL.
///
/// Returns the first violated constraint; batched posts report it under
/// the offending id instead of failing the request.
pub fn validate_input(input: &PutBsoInput) -> Result<(), StorageError> {
    if let Some(id) = &input.id {
        if !valid_bso_id(id) {
            return Err(StorageError::InvalidBsoId);
        }
    }
    if let Some(payload) = &input.payload {
        if payload.len() > MAX_BSO_PAYLOAD_SIZE {
            return Err(StorageError::PayloadTooLarge);
        }
    }
    if let Some(Some(sortindex)) = input.sortindex {
        if !(-MAX_SORTINDEX..=MAX_SORTINDEX).contains(&sortindex) {
            return Err(StorageError::InvalidSortIndex);
        }
    }
    if let Some(ttl) = input.ttl {
        if ttl < 0 {
            return Err(StorageError::InvalidTtl);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bso_id_syntax() {
        assert!(valid_bso_id("bso1"));
        assert!(valid_bso_id("a.b_c-d"));
        assert!(valid_bso_id(&"x".repeat(64)));

        assert!(!valid_bso_id(""));
        assert!(!valid_bso_id(&"x".repeat(65)));
        assert!(!valid_bso_id("no\ttabs"));
        assert!(!valid_bso_id("no spaces"));
        assert!(!valid_bso_id("no/slash"));
        assert!(!valid_bso_id("nö"));
    }

    #[test]
    fn validation_limits() {
        let ok = PutBsoInput {
            id: Some("bso1".into()),
            payload: Some("hello".into()),
            sortindex: Some(Some(MAX_SORTINDEX)),
            ttl: Some(0),
        };
        assert!(validate_input(&ok).is_ok());

        let bad_id = PutBsoInput {
            id: Some("not ok".into()),
            ..Default::default()
        };
        assert!(matches!(
            validate_input(&bad_id),
            Err(StorageError::InvalidBsoId)
        ));

        let big = PutBsoInput {
            payload: Some("x".repeat(MAX_BSO_PAYLOAD_SIZE + 1)),
            ..Default::default()
        };
        assert!(matches!(
            validate_input(&big),
            Err(StorageError::PayloadTooLarge)
        ));

        let sort = PutBsoInput {
            sortindex: Some(Some(-MAX_SORTINDEX - 1)),
            ..Default::default()
        };
        assert!(matches!(
            validate_input(&sort),
            Err(StorageError::InvalidSortIndex)
        ));

        let ttl = PutBsoInput {
            ttl: Some(-1),
            ..Default::default()
        };
        assert!(matches!(validate_input(&ttl), Err(StorageError::InvalidTtl)));
    }

    #[test]
    fn bso_wire_format() {
        let bso = Bso {
            id: "bid".into(),
            modified: 140456,
            payload: "data".into(),
            sortindex: Some(2),
        };
        assert_eq!(
            serde_json::to_string(&bso).unwrap(),
            r#"{"id":"bid","modified":1404.56,"payload":"data","sortindex":2}"#
        );

        let bare = Bso {
            sortindex: None,
            ..bso
        };
        assert!(!serde_json::to_string(&bare).unwrap().contains("sortindex"));
    }
}
