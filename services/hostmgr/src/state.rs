//! Application state shared across request handlers.

use std::sync::Arc;

use crate::client::ClusterManager;
use crate::pool::OfferPool;

/// Shared application state, passed to handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pool: Arc<OfferPool>,
    cluster: Arc<dyn ClusterManager>,
}

impl AppState {
    pub fn new(pool: Arc<OfferPool>, cluster: Arc<dyn ClusterManager>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { pool, cluster }),
        }
    }

    pub fn pool(&self) -> &Arc<OfferPool> {
        &self.inner.pool
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterManager> {
        &self.inner.cluster
    }
}
