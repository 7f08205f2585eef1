//! Shared state for the HTTP handlers.

use std::sync::Arc;

use crate::metrics::Metrics;
use crate::storage::Dispatch;

/// The shared app state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The sharded record store.
    pub dispatch: Arc<Dispatch>,
    /// Metrics collector.
    pub metrics: Arc<Metrics>,
    /// Silent cap on collection listing limits.
    pub max_bso_get_limit: usize,
}
