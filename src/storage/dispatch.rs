//! The top-level storage façade.
//!
//! [`Dispatch`] owns N shards and routes every call by `hash(uid) % N`,
//! so all work for one user lands on one lane and runs in submission
//! order. It exposes the whole record API as async methods; each one
//! ships a closure to the right shard and awaits the reply.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

use crate::metrics::Metrics;

use super::bso::{Bso, PostResults, PutBsoInput};
use super::pool::Pool;
use super::shard::{Message, Shard, Work};
use super::store::{BsoPage, BsoQuery, Store};
use super::timestamp::{self, Timestamp};
use super::{Result, StorageError};

/// Default number of work lanes.
pub const DEFAULT_NUM_SHARDS: usize = 8;

/// Routes record operations to a set of single-threaded shards, each
/// with its own bounded pool of open user stores.
#[derive(Debug)]
pub struct Dispatch {
    shards: Vec<Shard>,
    metrics: Arc<Metrics>,
    closed: AtomicBool,
}

impl Dispatch {
    /// Creates the data directory and spawns `num_shards` shards, evenly
    /// splitting the `max_open_files` store budget between them.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        num_shards: usize,
        max_open_files: usize,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let num_shards = num_shards.max(1);
        let cache_size = (max_open_files / num_shards).max(1);
        info!(
            data_dir = %data_dir.display(),
            num_shards, cache_size, "starting storage dispatch"
        );
        let shards = (0..num_shards)
            .map(|index| {
                let pool = Pool::new(data_dir.clone(), cache_size, metrics.clone());
                Shard::spawn(index, pool)
            })
            .collect();
        Ok(Self {
            shards,
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Signals every shard to drain and close its pool, then waits until
    /// they all have. Afterwards every call fails with `PoolClosed`.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
        for shard in &self.shards {
            shard.shutdown().await;
        }
    }

    /// Whether [`Dispatch::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn shard_for(&self, uid: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        uid.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Ships `op` to `uid`'s shard and awaits its result.
    async fn with_store<T, F>(&self, uid: &str, op: F) -> Result<T>
    where
        F: FnOnce(&mut Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let work: Work = Box::new(move |store| {
            tx.send(store.and_then(op)).ok();
        });
        self.shard_for(uid)
            .submit(Message::Execute {
                uid: uid.to_string(),
                work,
            })
            .await?;
        rx.await.map_err(|_| StorageError::PoolClosed)?
    }

    // ---- collections ----

    /// Resolves a collection name for a user.
    pub async fn get_collection_id(&self, uid: &str, name: &str) -> Result<i64> {
        let name = name.to_string();
        self.with_store(uid, move |store| store.get_collection_id(&name))
            .await
    }

    /// Creates (or finds) a collection for a user.
    pub async fn create_collection(&self, uid: &str, name: &str) -> Result<i64> {
        let name = name.to_string();
        self.with_store(uid, move |store| store.create_collection(&name))
            .await
    }

    /// Deletes a collection and its records, returning the deletion
    /// timestamp.
    pub async fn delete_collection(&self, uid: &str, cid: i64) -> Result<Timestamp> {
        let now = timestamp::now();
        self.with_store(uid, move |store| {
            store.delete_collection(cid)?;
            Ok(now)
        })
        .await
    }

    /// Sets a collection's modified timestamp.
    pub async fn touch_collection(&self, uid: &str, cid: i64, modified: Timestamp) -> Result<()> {
        self.with_store(uid, move |store| store.touch_collection(cid, modified))
            .await
    }

    /// A collection's modified timestamp.
    pub async fn get_collection_modified(&self, uid: &str, cid: i64) -> Result<Timestamp> {
        self.with_store(uid, move |store| store.get_collection_modified(cid))
            .await
    }

    /// Per-collection modified timestamps for a user.
    pub async fn info_collections(&self, uid: &str) -> Result<BTreeMap<String, Timestamp>> {
        self.with_store(uid, |store| store.info_collections()).await
    }

    /// Per-collection live payload bytes for a user.
    pub async fn info_collection_usage(&self, uid: &str) -> Result<BTreeMap<String, u64>> {
        let now = timestamp::now();
        self.with_store(uid, move |store| store.info_collection_usage(now))
            .await
    }

    /// Per-collection live record counts for a user.
    pub async fn info_collection_counts(&self, uid: &str) -> Result<BTreeMap<String, u64>> {
        let now = timestamp::now();
        self.with_store(uid, move |store| store.info_collection_counts(now))
            .await
    }

    /// The user's last-modified timestamp.
    pub async fn last_modified(&self, uid: &str) -> Result<Timestamp> {
        self.with_store(uid, |store| store.last_modified()).await
    }

    // ---- BSOs ----

    /// Fetches one record.
    pub async fn get_bso(&self, uid: &str, cid: i64, bid: &str) -> Result<Bso> {
        let now = timestamp::now();
        let bid = bid.to_string();
        self.with_store(uid, move |store| store.get_bso(cid, &bid, now))
            .await
    }

    /// One record's modified timestamp.
    pub async fn get_bso_modified(&self, uid: &str, cid: i64, bid: &str) -> Result<Timestamp> {
        let now = timestamp::now();
        let bid = bid.to_string();
        self.with_store(uid, move |store| store.get_bso_modified(cid, &bid, now))
            .await
    }

    /// Queries a collection.
    pub async fn get_bsos(&self, uid: &str, cid: i64, query: BsoQuery) -> Result<BsoPage> {
        let now = timestamp::now();
        self.with_store(uid, move |store| store.get_bsos(cid, &query, now))
            .await
    }

    /// Creates or updates one record.
    pub async fn put_bso(
        &self,
        uid: &str,
        cid: i64,
        bid: &str,
        input: PutBsoInput,
    ) -> Result<Timestamp> {
        let now = timestamp::now();
        let bid = bid.to_string();
        let modified = self
            .with_store(uid, move |store| store.put_bso(cid, &bid, &input, now))
            .await?;
        self.metrics.bsos_written.inc();
        Ok(modified)
    }

    /// Applies a batch of writes in one transaction.
    pub async fn post_bsos(
        &self,
        uid: &str,
        cid: i64,
        inputs: Vec<PutBsoInput>,
    ) -> Result<PostResults> {
        let now = timestamp::now();
        let results = self
            .with_store(uid, move |store| store.post_bsos(cid, &inputs, now))
            .await?;
        self.metrics.bsos_written.inc_by(results.success.len() as u64);
        Ok(results)
    }

    /// Deletes one record.
    pub async fn delete_bso(&self, uid: &str, cid: i64, bid: &str) -> Result<Timestamp> {
        let now = timestamp::now();
        let bid = bid.to_string();
        let modified = self
            .with_store(uid, move |store| store.delete_bso(cid, &bid, now))
            .await?;
        self.metrics.bsos_deleted.inc();
        Ok(modified)
    }

    /// Deletes a set of records from a collection.
    pub async fn delete_bsos(&self, uid: &str, cid: i64, ids: Vec<String>) -> Result<Timestamp> {
        let now = timestamp::now();
        self.with_store(uid, move |store| store.delete_bsos(cid, &ids, now))
            .await
    }

    /// Wipes everything the user has, returning the deletion timestamp.
    pub async fn delete_everything(&self, uid: &str) -> Result<Timestamp> {
        let now = timestamp::now();
        self.with_store(uid, move |store| {
            store.delete_everything()?;
            Ok(now)
        })
        .await
    }

    /// Removes expired records for one user.
    pub async fn purge_expired(&self, uid: &str) -> Result<usize> {
        let now = timestamp::now();
        self.with_store(uid, move |store| store.purge_expired(now))
            .await
    }

    /// Runs an expiry sweep over every store currently open in any
    /// shard's pool, returning the total number of reaped records.
    pub async fn purge_resident(&self) -> Result<usize> {
        let now = timestamp::now();
        let mut purged = 0;
        for shard in &self.shards {
            let (reply, rx) = oneshot::channel();
            shard.submit(Message::Purge { now, reply }).await?;
            purged += rx.await.map_err(|_| StorageError::PoolClosed)??;
        }
        self.metrics.records_purged.inc_by(purged as u64);
        Ok(purged)
    }
}
