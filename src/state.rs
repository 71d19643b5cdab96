//! Shared state handed to every HTTP handler.

use std::sync::Arc;

use crate::{config::FixityConfig, services::fixity::FixityService, storage::local::LocalObjectStore};

#[derive(Clone)]
pub struct AppState {
    pub fixity: FixityService,
    /// Backing store, also reachable through `fixity` as an `ObjectStorage`.
    pub store: LocalObjectStore,
}

impl AppState {
    pub fn new(store: LocalObjectStore, config: FixityConfig) -> Self {
        let fixity = FixityService::with_defaults(Arc::new(store.clone()), config);
        Self { fixity, store }
    }
}
