//! The per-user record engine.
//!
//! One [`Store`] owns one SQLite file holding every collection and BSO of
//! a single user. It is strictly single-writer: the owning shard is the
//! only caller, so there is no locking here; concurrency control lives
//! one level up.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::bso::{validate_input, Bso, PostResults, PutBsoInput};
use super::timestamp::Timestamp;
use super::{Result, StorageError};

/// Collections precreated in every fresh user database. Sync clients
/// expect to resolve these names without writing first; a user wipe
/// removes them for good.
const DEFAULT_COLLECTIONS: [&str; 10] = [
    "bookmarks",
    "history",
    "forms",
    "prefs",
    "tabs",
    "passwords",
    "crypto",
    "client",
    "keys",
    "meta",
];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id       INTEGER PRIMARY KEY,
    name     TEXT NOT NULL UNIQUE,
    modified INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS bsos (
    collection_id INTEGER NOT NULL REFERENCES collections (id) ON DELETE CASCADE,
    id            TEXT NOT NULL,
    sortindex     INTEGER,
    payload       TEXT NOT NULL DEFAULT '',
    modified      INTEGER NOT NULL,
    ttl           INTEGER,
    PRIMARY KEY (collection_id, id)
);

CREATE INDEX IF NOT EXISTS idx_bsos_collection_modified
    ON bsos (collection_id, modified);
CREATE INDEX IF NOT EXISTS idx_bsos_collection_sortindex
    ON bsos (collection_id, sortindex);
";

/// Requested ordering for [`Store::get_bsos`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Sort {
    /// Modified descending (the default).
    #[default]
    Newest,
    /// Modified ascending.
    Oldest,
    /// Sortindex descending, records without a sortindex last.
    Index,
}

/// Filters and paging for [`Store::get_bsos`].
#[derive(Debug, Clone, Default)]
pub struct BsoQuery {
    /// Restrict to these ids.
    pub ids: Option<Vec<String>>,
    /// Only records with `modified` strictly greater.
    pub newer: Option<Timestamp>,
    /// Only records with `modified` strictly less.
    pub older: Option<Timestamp>,
    /// Result ordering.
    pub sort: Sort,
    /// Maximum records to return; `None` means unbounded.
    pub limit: Option<usize>,
    /// Post-filter records to skip, from a previous page's next offset.
    pub offset: usize,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct BsoPage {
    /// The records, in query order.
    pub bsos: Vec<Bso>,
    /// Offset to resume from when more records remain.
    pub next_offset: Option<usize>,
}

/// A single user's record store, backed by one SQLite file.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (or creates) the store at `path`, creating parent
    /// directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "opening user store");
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Creates an in-memory store, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        let mut seed =
            conn.prepare("INSERT OR IGNORE INTO collections (name, modified) VALUES (?1, 0)")?;
        for name in DEFAULT_COLLECTIONS {
            seed.execute([name])?;
        }
        drop(seed);
        Ok(Self { conn })
    }

    // ---- collections ----

    /// Resolves a collection name to its id.
    pub fn get_collection_id(&self, name: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT id FROM collections WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::NotFound)
    }

    /// Creates a collection, returning the existing id if the name is
    /// already taken.
    pub fn create_collection(&mut self, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO collections (name, modified) VALUES (?1, 0)",
            [name],
        )?;
        self.get_collection_id(name)
    }

    /// Deletes a collection and everything in it.
    pub fn delete_collection(&mut self, cid: i64) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM collections WHERE id = ?1", [cid])?;
        if deleted == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// Sets a collection's modified timestamp.
    pub fn touch_collection(&mut self, cid: i64, modified: Timestamp) -> Result<()> {
        let touched = self.conn.execute(
            "UPDATE collections SET modified = ?1 WHERE id = ?2",
            params![modified, cid],
        )?;
        if touched == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// A collection's modified timestamp.
    pub fn get_collection_modified(&self, cid: i64) -> Result<Timestamp> {
        self.conn
            .query_row(
                "SELECT modified FROM collections WHERE id = ?1",
                [cid],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::NotFound)
    }

    /// Map of collection name to modified timestamp, for every collection
    /// that has seen a write.
    pub fn info_collections(&self) -> Result<BTreeMap<String, Timestamp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, modified FROM collections WHERE modified > 0")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut info = BTreeMap::new();
        for row in rows {
            let (name, modified): (String, Timestamp) = row?;
            info.insert(name, modified);
        }
        Ok(info)
    }

    /// Map of collection name to total live payload bytes.
    pub fn info_collection_usage(&self, now: Timestamp) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name, SUM(LENGTH(CAST(b.payload AS BLOB)))
             FROM bsos b JOIN collections c ON b.collection_id = c.id
             WHERE b.ttl IS NULL OR b.ttl >= ?1
             GROUP BY c.name",
        )?;
        let rows = stmt.query_map([now], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut usage = BTreeMap::new();
        for row in rows {
            let (name, bytes): (String, u64) = row?;
            usage.insert(name, bytes);
        }
        Ok(usage)
    }

    /// Map of collection name to live record count.
    pub fn info_collection_counts(&self, now: Timestamp) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name, COUNT(*)
             FROM bsos b JOIN collections c ON b.collection_id = c.id
             WHERE b.ttl IS NULL OR b.ttl >= ?1
             GROUP BY c.name",
        )?;
        let rows = stmt.query_map([now], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (name, count): (String, u64) = row?;
            counts.insert(name, count);
        }
        Ok(counts)
    }

    /// The user's last-modified timestamp: the max over all collections,
    /// 0 when the user has none.
    pub fn last_modified(&self) -> Result<Timestamp> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(modified), 0) FROM collections",
            [],
            |row| row.get(0),
        )?)
    }

    // ---- BSOs ----

    /// Fetches a single live record.
    pub fn get_bso(&self, cid: i64, bid: &str, now: Timestamp) -> Result<Bso> {
        self.conn
            .query_row(
                "SELECT id, sortindex, payload, modified FROM bsos
                 WHERE collection_id = ?1 AND id = ?2 AND (ttl IS NULL OR ttl >= ?3)",
                params![cid, bid, now],
                |row| {
                    Ok(Bso {
                        id: row.get(0)?,
                        sortindex: row.get(1)?,
                        payload: row.get(2)?,
                        modified: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::NotFound)
    }

    /// A single live record's modified timestamp.
    pub fn get_bso_modified(&self, cid: i64, bid: &str, now: Timestamp) -> Result<Timestamp> {
        self.conn
            .query_row(
                "SELECT modified FROM bsos
                 WHERE collection_id = ?1 AND id = ?2 AND (ttl IS NULL OR ttl >= ?3)",
                params![cid, bid, now],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::NotFound)
    }

    /// Runs a filtered, sorted, paged query over a collection.
    ///
    /// Expired records are excluded before any other filter. When a limit
    /// is set and more records remain past it, `next_offset` is the count
    /// of post-filter records consumed so far.
    pub fn get_bsos(&self, cid: i64, query: &BsoQuery, now: Timestamp) -> Result<BsoPage> {
        let mut sql = String::from(
            "SELECT id, sortindex, payload, modified FROM bsos
             WHERE collection_id = ? AND (ttl IS NULL OR ttl >= ?)",
        );
        let mut values: Vec<Value> = vec![cid.into(), now.into()];

        if let Some(ids) = &query.ids {
            sql.push_str(" AND id IN (");
            sql.push_str(&vec!["?"; ids.len()].join(","));
            sql.push(')');
            values.extend(ids.iter().map(|id| Value::from(id.clone())));
        }
        if let Some(newer) = query.newer {
            sql.push_str(" AND modified > ?");
            values.push(newer.into());
        }
        if let Some(older) = query.older {
            sql.push_str(" AND modified < ?");
            values.push(older.into());
        }

        sql.push_str(match query.sort {
            Sort::Newest => " ORDER BY modified DESC, id ASC",
            Sort::Oldest => " ORDER BY modified ASC, id ASC",
            // SQLite sorts NULLs last on DESC, which is what we want.
            Sort::Index => " ORDER BY sortindex DESC, modified DESC, id ASC",
        });

        // Fetch one row past the limit to learn whether more remain.
        sql.push_str(" LIMIT ? OFFSET ?");
        let fetch = query.limit.map(|l| l as i64 + 1).unwrap_or(-1);
        values.push(fetch.into());
        values.push((query.offset as i64).into());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(Bso {
                id: row.get(0)?,
                sortindex: row.get(1)?,
                payload: row.get(2)?,
                modified: row.get(3)?,
            })
        })?;
        let mut bsos = Vec::new();
        for row in rows {
            bsos.push(row?);
        }

        let mut page = BsoPage {
            bsos,
            next_offset: None,
        };
        if let Some(limit) = query.limit {
            if page.bsos.len() > limit {
                page.bsos.truncate(limit);
                page.next_offset = Some(query.offset + limit);
            }
        }
        Ok(page)
    }

    /// Creates or updates one record and touches its collection.
    ///
    /// Fields absent from `input` keep their stored values; see
    /// [`PutBsoInput`] for the sortindex tri-state.
    pub fn put_bso(
        &mut self,
        cid: i64,
        bid: &str,
        input: &PutBsoInput,
        now: Timestamp,
    ) -> Result<Timestamp> {
        if !super::bso::valid_bso_id(bid) {
            return Err(StorageError::InvalidBsoId);
        }
        validate_input(input)?;
        let tx = self.conn.transaction()?;
        let touched = tx.execute(
            "UPDATE collections SET modified = ?1 WHERE id = ?2",
            params![now, cid],
        )?;
        if touched == 0 {
            return Err(StorageError::NotFound);
        }
        upsert_bso(&tx, cid, bid, input, now)?;
        tx.commit()?;
        Ok(now)
    }

    /// Applies a batch of writes in one transaction.
    ///
    /// Each input is validated on its own; failures are recorded under
    /// the offending id and do not keep valid siblings from committing.
    /// Only a database error aborts the whole batch. The collection
    /// timestamp moves only when at least one record actually commits.
    pub fn post_bsos(
        &mut self,
        cid: i64,
        inputs: &[PutBsoInput],
        now: Timestamp,
    ) -> Result<PostResults> {
        let tx = self.conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row("SELECT id FROM collections WHERE id = ?1", [cid], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }
        let mut results = PostResults {
            modified: now,
            ..Default::default()
        };
        for input in inputs {
            let bid = input.id.clone().unwrap_or_default();
            let valid = if super::bso::valid_bso_id(&bid) {
                validate_input(input)
            } else {
                Err(StorageError::InvalidBsoId)
            };
            match valid {
                Ok(()) => {
                    upsert_bso(&tx, cid, &bid, input, now)?;
                    results.success.push(bid);
                }
                Err(err) => {
                    results.failed.entry(bid).or_default().push(err.field().to_string());
                }
            }
        }
        if !results.success.is_empty() {
            tx.execute(
                "UPDATE collections SET modified = ?1 WHERE id = ?2",
                params![now, cid],
            )?;
        }
        tx.commit()?;
        Ok(results)
    }

    /// Deletes one record and touches its collection.
    pub fn delete_bso(&mut self, cid: i64, bid: &str, now: Timestamp) -> Result<Timestamp> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM bsos WHERE collection_id = ?1 AND id = ?2",
            params![cid, bid],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound);
        }
        tx.execute(
            "UPDATE collections SET modified = ?1 WHERE id = ?2",
            params![now, cid],
        )?;
        tx.commit()?;
        Ok(now)
    }

    /// Deletes a set of records; ids that do not exist are ignored.
    pub fn delete_bsos(&mut self, cid: i64, ids: &[String], now: Timestamp) -> Result<Timestamp> {
        let tx = self.conn.transaction()?;
        if !ids.is_empty() {
            let mut sql = String::from("DELETE FROM bsos WHERE collection_id = ? AND id IN (");
            sql.push_str(&vec!["?"; ids.len()].join(","));
            sql.push(')');
            let mut values: Vec<Value> = vec![cid.into()];
            values.extend(ids.iter().map(|id| Value::from(id.clone())));
            tx.execute(&sql, params_from_iter(values))?;
        }
        let touched = tx.execute(
            "UPDATE collections SET modified = ?1 WHERE id = ?2",
            params![now, cid],
        )?;
        if touched == 0 {
            return Err(StorageError::NotFound);
        }
        tx.commit()?;
        Ok(now)
    }

    /// Wipes the user: all BSOs and all collections, seeded ones
    /// included.
    pub fn delete_everything(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM bsos", [])?;
        tx.execute("DELETE FROM collections", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Removes rows whose TTL has passed, returning how many went away.
    pub fn purge_expired(&mut self, now: Timestamp) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM bsos WHERE ttl IS NOT NULL AND ttl < ?1",
            [now],
        )?)
    }
}

fn upsert_bso(
    tx: &Transaction<'_>,
    cid: i64,
    bid: &str,
    input: &PutBsoInput,
    now: Timestamp,
) -> Result<()> {
    let existing: Option<(String, Option<i32>, Option<i64>)> = tx
        .query_row(
            "SELECT payload, sortindex, ttl FROM bsos
             WHERE collection_id = ?1 AND id = ?2 AND (ttl IS NULL OR ttl >= ?3)",
            params![cid, bid, now],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    match existing {
        Some((payload, sortindex, ttl)) => {
            let payload = input.payload.as_deref().unwrap_or(&payload);
            let sortindex = match input.sortindex {
                None => sortindex,
                Some(update) => update,
            };
            let ttl = match input.ttl {
                None => ttl,
                Some(offset) => Some(now + offset * 100),
            };
            tx.execute(
                "UPDATE bsos SET payload = ?1, sortindex = ?2, ttl = ?3, modified = ?4
                 WHERE collection_id = ?5 AND id = ?6",
                params![payload, sortindex, ttl, now, cid, bid],
            )?;
        }
        None => {
            // REPLACE also clears out a leftover expired row under this id.
            tx.execute(
                "INSERT OR REPLACE INTO bsos (collection_id, id, sortindex, payload, modified, ttl)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    cid,
                    bid,
                    input.sortindex.flatten(),
                    input.payload.as_deref().unwrap_or(""),
                    now,
                    input.ttl.map(|offset| now + offset * 100),
                ],
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::in_memory().unwrap()
    }

    fn put(store: &mut Store, cid: i64, bid: &str, payload: &str, now: Timestamp) -> Timestamp {
        let input = PutBsoInput {
            payload: Some(payload.to_string()),
            ..Default::default()
        };
        store.put_bso(cid, bid, &input, now).unwrap()
    }

    #[test]
    fn default_collections_are_seeded() {
        let store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        assert!(cid >= 1);
        assert!(matches!(
            store.get_collection_id("no_such_thing"),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn create_collection_is_idempotent() {
        let mut store = store();
        let a = store.create_collection("custom").unwrap();
        let b = store.create_collection("custom").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get_collection_id("custom").unwrap(), a);
    }

    #[test]
    fn delete_collection_cascades() {
        let mut store = store();
        let cid = store.create_collection("custom").unwrap();
        put(&mut store, cid, "bso1", "data", 100);
        store.delete_collection(cid).unwrap();
        assert!(matches!(
            store.get_collection_id("custom"),
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            store.get_bso(cid, "bso1", 100),
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            store.delete_collection(cid),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn info_collections_reports_written_only() {
        let mut store = store();
        assert!(store.info_collections().unwrap().is_empty());

        let cid = store.get_collection_id("bookmarks").unwrap();
        put(&mut store, cid, "bso1", "data", 1400);
        let info = store.info_collections().unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info["bookmarks"], 1400);
    }

    #[test]
    fn touch_collection_sets_modified() {
        let mut store = store();
        let cid = store.get_collection_id("history").unwrap();
        store.touch_collection(cid, 4200).unwrap();
        assert_eq!(store.get_collection_modified(cid).unwrap(), 4200);
        assert_eq!(store.last_modified().unwrap(), 4200);
        assert!(matches!(
            store.touch_collection(9999, 4200),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn put_creates_and_updates() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        let input = PutBsoInput {
            payload: Some("hello".into()),
            sortindex: Some(Some(1)),
            ttl: Some(1_000_000),
            ..Default::default()
        };
        let modified = store.put_bso(cid, "bso1", &input, 100).unwrap();
        assert_eq!(modified, 100);

        let bso = store.get_bso(cid, "bso1", 100).unwrap();
        assert_eq!(bso.payload, "hello");
        assert_eq!(bso.sortindex, Some(1));
        assert_eq!(bso.modified, 100);

        // update only the sortindex; payload must survive
        let update = PutBsoInput {
            sortindex: Some(Some(2)),
            ..Default::default()
        };
        store.put_bso(cid, "bso1", &update, 200).unwrap();
        let bso = store.get_bso(cid, "bso1", 200).unwrap();
        assert_eq!(bso.payload, "hello");
        assert_eq!(bso.sortindex, Some(2));
        assert_eq!(bso.modified, 200);

        // update only the payload; sortindex must survive
        let update = PutBsoInput {
            payload: Some("updated".into()),
            ..Default::default()
        };
        store.put_bso(cid, "bso1", &update, 300).unwrap();
        let bso = store.get_bso(cid, "bso1", 300).unwrap();
        assert_eq!(bso.payload, "updated");
        assert_eq!(bso.sortindex, Some(2));

        // a JSON null clears the sortindex
        let clear = PutBsoInput {
            sortindex: Some(None),
            ..Default::default()
        };
        store.put_bso(cid, "bso1", &clear, 400).unwrap();
        let bso = store.get_bso(cid, "bso1", 400).unwrap();
        assert_eq!(bso.sortindex, None);
    }

    #[test]
    fn put_keeps_timestamps_aligned() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        put(&mut store, cid, "bso1", "data", 500);
        let bso_modified = store.get_bso_modified(cid, "bso1", 500).unwrap();
        let col_modified = store.get_collection_modified(cid).unwrap();
        let user_modified = store.last_modified().unwrap();
        assert!(bso_modified <= col_modified && col_modified <= user_modified);
        assert_eq!(bso_modified, 500);
        assert_eq!(user_modified, 500);
    }

    #[test]
    fn put_rejects_invalid_input() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        assert!(matches!(
            store.put_bso(cid, "bad id", &PutBsoInput::default(), 100),
            Err(StorageError::InvalidBsoId)
        ));
        let big = PutBsoInput {
            payload: Some("x".repeat(super::super::bso::MAX_BSO_PAYLOAD_SIZE + 1)),
            ..Default::default()
        };
        assert!(matches!(
            store.put_bso(cid, "bso1", &big, 100),
            Err(StorageError::PayloadTooLarge)
        ));
        assert!(matches!(
            store.put_bso(12345, "bso1", &PutBsoInput::default(), 100),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn get_bsos_sorts_and_filters() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        for i in 0..5 {
            let input = PutBsoInput {
                payload: Some("data".into()),
                sortindex: Some(Some(i as i32)),
                ..Default::default()
            };
            store
                .put_bso(cid, &format!("bid_{i}"), &input, 100 + i)
                .unwrap();
        }
        let now = 1000;

        let ids = |page: &BsoPage| {
            page.bsos
                .iter()
                .map(|b| b.id.clone())
                .collect::<Vec<_>>()
        };

        let newest = store
            .get_bsos(cid, &BsoQuery::default(), now)
            .unwrap();
        assert_eq!(ids(&newest), ["bid_4", "bid_3", "bid_2", "bid_1", "bid_0"]);

        let oldest = store
            .get_bsos(
                cid,
                &BsoQuery {
                    sort: Sort::Oldest,
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(ids(&oldest), ["bid_0", "bid_1", "bid_2", "bid_3", "bid_4"]);

        let subset = store
            .get_bsos(
                cid,
                &BsoQuery {
                    ids: Some(vec!["bid_0".into(), "bid_2".into()]),
                    sort: Sort::Oldest,
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(ids(&subset), ["bid_0", "bid_2"]);

        // newer/older are strict bounds
        let newer = store
            .get_bsos(
                cid,
                &BsoQuery {
                    newer: Some(102),
                    sort: Sort::Oldest,
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(ids(&newer), ["bid_3", "bid_4"]);

        let older = store
            .get_bsos(
                cid,
                &BsoQuery {
                    older: Some(102),
                    sort: Sort::Oldest,
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(ids(&older), ["bid_0", "bid_1"]);
    }

    #[test]
    fn get_bsos_index_sort_puts_nulls_last() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        let with_index = |i: i32| PutBsoInput {
            payload: Some("data".into()),
            sortindex: Some(Some(i)),
            ..Default::default()
        };
        store.put_bso(cid, "low", &with_index(1), 100).unwrap();
        store.put_bso(cid, "high", &with_index(9), 100).unwrap();
        store
            .put_bso(cid, "none", &PutBsoInput::default(), 100)
            .unwrap();

        let page = store
            .get_bsos(
                cid,
                &BsoQuery {
                    sort: Sort::Index,
                    ..Default::default()
                },
                1000,
            )
            .unwrap();
        let ids: Vec<_> = page.bsos.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["high", "low", "none"]);
    }

    #[test]
    fn get_bsos_paginates() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        for i in 0..5 {
            put(&mut store, cid, &format!("bid_{i}"), "data", 100 + i);
        }
        let now = 1000;

        let first = store
            .get_bsos(
                cid,
                &BsoQuery {
                    sort: Sort::Oldest,
                    limit: Some(2),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(first.bsos.len(), 2);
        assert_eq!(first.next_offset, Some(2));

        let second = store
            .get_bsos(
                cid,
                &BsoQuery {
                    sort: Sort::Oldest,
                    limit: Some(2),
                    offset: first.next_offset.unwrap(),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(second.next_offset, Some(4));

        let third = store
            .get_bsos(
                cid,
                &BsoQuery {
                    sort: Sort::Oldest,
                    limit: Some(2),
                    offset: second.next_offset.unwrap(),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(third.bsos.len(), 1);
        assert_eq!(third.next_offset, None);

        // two pages of k equal one page of 2k
        let paged: Vec<_> = first
            .bsos
            .iter()
            .chain(second.bsos.iter())
            .map(|b| b.id.clone())
            .collect();
        let big = store
            .get_bsos(
                cid,
                &BsoQuery {
                    sort: Sort::Oldest,
                    limit: Some(4),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        let big_ids: Vec<_> = big.bsos.iter().map(|b| b.id.clone()).collect();
        assert_eq!(paged, big_ids);
    }

    #[test]
    fn expired_records_are_invisible() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        let input = PutBsoInput {
            payload: Some("ephemeral".into()),
            ttl: Some(10),
            ..Default::default()
        };
        store.put_bso(cid, "bso1", &input, 100).unwrap();

        // live until its absolute expiry of 100 + 10*100
        assert!(store.get_bso(cid, "bso1", 1100).is_ok());

        let later = 1101;
        assert!(matches!(
            store.get_bso(cid, "bso1", later),
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            store.get_bso_modified(cid, "bso1", later),
            Err(StorageError::NotFound)
        ));
        assert!(store
            .get_bsos(cid, &BsoQuery::default(), later)
            .unwrap()
            .bsos
            .is_empty());
        assert!(store.info_collection_counts(later).unwrap().is_empty());
        assert!(store.info_collection_usage(later).unwrap().is_empty());

        assert_eq!(store.purge_expired(later).unwrap(), 1);
        assert_eq!(store.purge_expired(later).unwrap(), 0);
    }

    #[test]
    fn put_after_expiry_starts_fresh() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        let input = PutBsoInput {
            payload: Some("old".into()),
            sortindex: Some(Some(5)),
            ttl: Some(10),
            ..Default::default()
        };
        store.put_bso(cid, "bso1", &input, 100).unwrap();

        // the row expired but was never purged; a new put must not
        // resurrect the old fields
        let revive = PutBsoInput {
            payload: Some("new".into()),
            ..Default::default()
        };
        store.put_bso(cid, "bso1", &revive, 2000).unwrap();
        let bso = store.get_bso(cid, "bso1", 2000).unwrap();
        assert_eq!(bso.payload, "new");
        assert_eq!(bso.sortindex, None);
    }

    #[test]
    fn post_commits_valid_siblings() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        let good = |id: &str| PutBsoInput {
            id: Some(id.into()),
            payload: Some("data".into()),
            ..Default::default()
        };
        let too_big = PutBsoInput {
            id: Some("test".into()),
            payload: Some("x".repeat(super::super::bso::MAX_BSO_PAYLOAD_SIZE + 1)),
            ..Default::default()
        };
        let inputs = vec![good("bso1"), too_big, good("bso2")];
        let results = store.post_bsos(cid, &inputs, 100).unwrap();

        assert_eq!(results.success, ["bso1", "bso2"]);
        assert_eq!(results.failed["test"], ["payload"]);
        assert_eq!(results.modified, 100);
        assert!(store.get_bso(cid, "bso1", 100).is_ok());
        assert!(store.get_bso(cid, "bso2", 100).is_ok());
        assert!(matches!(
            store.get_bso(cid, "test", 100),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn post_without_successes_leaves_collection_untouched() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();

        let results = store.post_bsos(cid, &[], 100).unwrap();
        assert!(results.success.is_empty());
        assert_eq!(store.get_collection_modified(cid).unwrap(), 0);

        // every item failing validation is just as empty a batch
        let bad = PutBsoInput {
            id: Some("bad id with spaces".into()),
            payload: Some("x".into()),
            ..Default::default()
        };
        let results = store.post_bsos(cid, &[bad], 200).unwrap();
        assert_eq!(results.failed.len(), 1);
        assert!(results.success.is_empty());
        assert_eq!(store.get_collection_modified(cid).unwrap(), 0);
        assert!(store.info_collections().unwrap().is_empty());
        assert_eq!(store.last_modified().unwrap(), 0);

        assert!(matches!(
            store.post_bsos(12345, &[], 100),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn delete_bso_and_bsos() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        for bid in ["bso1", "bso2", "bso3"] {
            put(&mut store, cid, bid, "data", 100);
        }

        assert!(matches!(
            store.delete_bso(cid, "missing", 200),
            Err(StorageError::NotFound)
        ));

        let modified = store.delete_bso(cid, "bso1", 200).unwrap();
        assert_eq!(modified, 200);
        assert_eq!(store.get_collection_modified(cid).unwrap(), 200);
        assert!(matches!(
            store.get_bso(cid, "bso1", 200),
            Err(StorageError::NotFound)
        ));

        store
            .delete_bsos(cid, &["bso2".into(), "nope".into()], 300)
            .unwrap();
        assert!(matches!(
            store.get_bso(cid, "bso2", 300),
            Err(StorageError::NotFound)
        ));
        assert!(store.get_bso(cid, "bso3", 300).is_ok());
    }

    #[test]
    fn delete_everything_forgets_default_collections() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        put(&mut store, cid, "bso1", "data", 100);

        store.delete_everything().unwrap();
        assert!(matches!(
            store.get_collection_id("bookmarks"),
            Err(StorageError::NotFound)
        ));
        assert_eq!(store.last_modified().unwrap(), 0);
    }

    #[test]
    fn usage_counts_bytes() {
        let mut store = store();
        let cid = store.get_collection_id("bookmarks").unwrap();
        for bid in ["bso1", "bso2", "bso3"] {
            put(&mut store, cid, bid, "initial payload", 100);
        }
        let usage = store.info_collection_usage(100).unwrap();
        assert_eq!(usage["bookmarks"], 45);
        let counts = store.info_collection_counts(100).unwrap();
        assert_eq!(counts["bookmarks"], 3);
    }
}
