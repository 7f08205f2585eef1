//! A Firefox Sync 1.5 storage server.
//!
//! Every user gets their own SQLite file; a fixed set of single-threaded
//! shards serialises all work per user, each shard keeping a bounded LRU
//! cache of open stores. The HTTP layer on top is bit-compatible with
//! the Sync 1.5 storage API.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod http;
pub mod metrics;
pub mod server;
pub mod state;
pub mod storage;
