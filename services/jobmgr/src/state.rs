//! Application state shared across request handlers.

use std::sync::Arc;

use crate::cache::JobCache;
use crate::goalstate::Driver;
use crate::hostclient::HostManagerClient;
use crate::storage::Store;
use crate::workflow::WorkflowController;

/// Shared application state, passed to handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    cache: Arc<JobCache>,
    driver: Arc<Driver>,
    hosts: Arc<dyn HostManagerClient>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<JobCache>,
        driver: Arc<Driver>,
        hosts: Arc<dyn HostManagerClient>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                cache,
                driver,
                hosts,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn cache(&self) -> &Arc<JobCache> {
        &self.inner.cache
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.inner.driver
    }

    pub fn hosts(&self) -> &Arc<dyn HostManagerClient> {
        &self.inner.hosts
    }

    pub fn workflow_controller(&self) -> WorkflowController {
        WorkflowController::new(
            Arc::clone(&self.inner.cache),
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.hosts),
        )
    }
}
