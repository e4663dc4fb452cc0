use std::sync::Arc;

use datavaccin_lib::{DataSource, SharedStore};

use super::config::DvConfig;

/// Shared application state for the HTTP server.
///
/// The store handle is the same one the refresh scheduler holds, so a manual
/// refresh through the API lands in the live store.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Arc<DvConfig>,
    pub source: Arc<dyn DataSource>,
}

impl AppState {
    pub fn new(store: SharedStore, config: DvConfig, source: Arc<dyn DataSource>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            source,
        }
    }
}
