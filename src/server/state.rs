use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::storage::BlobStore;

/// Shared application state
pub struct AppState {
    /// Metadata and face store
    pub db: Database,
    /// Original image bytes
    pub blobs: Box<dyn BlobStore>,
    /// Server configuration
    pub config: Config,
}

impl AppState {
    pub fn new(db: Database, blobs: Box<dyn BlobStore>, config: Config) -> Arc<Self> {
        Arc::new(AppState { db, blobs, config })
    }
}
