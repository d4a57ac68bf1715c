//! Shared server context handed to every command handler.

use std::sync::Arc;

use crate::broadcast::EventPublisher;
use crate::config::DaemonConfig;
use crate::fetch::MediaFetcher;
use crate::progress::ProgressTable;
use crate::store::Store;

/// Everything a command handler may touch.
///
/// Constructed once at startup; the config is immutable after init and the
/// remaining fields are collaborator handles with their own interior
/// synchronization, so the context is cheap to clone into background tasks.
#[derive(Clone)]
pub struct ServerContext {
    /// Immutable daemon configuration.
    pub config: DaemonConfig,

    /// Media-fetch collaborator.
    pub fetcher: Arc<dyn MediaFetcher>,

    /// Song/playlist catalog.
    pub store: Arc<Store>,

    /// Handle for publishing broadcast events.
    pub events: EventPublisher,

    /// Progress table for streaming playlist downloads.
    pub progress: Arc<ProgressTable>,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
