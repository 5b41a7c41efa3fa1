use std::path::PathBuf;
use std::sync::Arc;

use record_log::{JsonlFileStore, RecordStore};

pub const DEFAULT_LIMIT: u64 = 100;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn RecordStore>,
    max_limit: u64,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, max_limit: u64) -> Self {
        Self {
            store,
            max_limit: max_limit.max(1),
        }
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>, max_limit: u64) -> Self {
        Self::new(Arc::new(JsonlFileStore::new(data_dir)), max_limit)
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Requested window size, defaulted and capped.
    pub fn limit(&self, requested: Option<u64>) -> u64 {
        requested.unwrap_or(DEFAULT_LIMIT).min(self.max_limit)
    }
}
