use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::ingest::{IngestQueue, IngestStats};
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub queue: Arc<IngestQueue>,
    pub stats: Arc<IngestStats>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}
