//! The record-storage core: per-user stores, the pool that caches them,
//! the shards that serialise access, and the dispatch façade on top.
//!
//! Layering, bottom up:
//!
//! * [`store::Store`]: one user's records in one SQLite file. Single
//!   writer, no internal locking.
//! * [`pool::Pool`]: a bounded LRU of open stores with refcounted
//!   handles, so eviction never closes a store that is still in use.
//! * [`shard::Shard`]: a dedicated worker thread owning one pool;
//!   executes submitted closures one at a time, in submission order.
//! * [`dispatch::Dispatch`]: routes each user id to its shard and
//!   exposes the whole record API as async methods.

use thiserror::Error;

pub mod bso;
pub mod dispatch;
pub mod pool;
pub mod shard;
pub mod store;
pub mod timestamp;

pub use bso::{Bso, PostResults, PutBsoInput, MAX_BSO_PAYLOAD_SIZE, MAX_SORTINDEX};
pub use dispatch::Dispatch;
pub use store::{BsoPage, BsoQuery, Sort, Store};
pub use timestamp::Timestamp;

/// Errors produced by the storage core.
///
/// Validation variants surface as 400s (or per-id failures inside a
/// batch); [`StorageError::Database`] is the only variant carrying
/// internal detail and is masked before it reaches a response body.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The user, collection or BSO does not exist.
    #[error("not found")]
    NotFound,
    /// A BSO id is empty, too long, or contains forbidden characters.
    #[error("invalid BSO id")]
    InvalidBsoId,
    /// A sortindex lies outside `[-999999999, 999999999]`.
    #[error("invalid sortindex")]
    InvalidSortIndex,
    /// A payload exceeds [`bso::MAX_BSO_PAYLOAD_SIZE`].
    #[error("payload too large")]
    PayloadTooLarge,
    /// A negative TTL offset.
    #[error("invalid TTL")]
    InvalidTtl,
    /// The pool or dispatch has shut down.
    #[error("pool closed")]
    PoolClosed,
    /// An underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// A filesystem failure while opening or creating a store.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// The field name reported for a per-id batch failure.
    pub fn field(&self) -> &'static str {
        match self {
            StorageError::InvalidBsoId => "id",
            StorageError::InvalidSortIndex => "sortindex",
            StorageError::PayloadTooLarge => "payload",
            StorageError::InvalidTtl => "ttl",
            _ => "-",
        }
    }
}

/// Result alias for storage operations.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;
