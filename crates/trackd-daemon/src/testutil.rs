//! Canned collaborators for unit tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use trackd_proto::EventMessage;

use crate::broadcast::EventPublisher;
use crate::config::DaemonConfig;
use crate::context::ServerContext;
use crate::fetch::{
    FetchConstraints, FetchError, MediaFetcher, Metadata, PlaylistEntry, PlaylistInfo, SearchHit,
    TrackRecord,
};
use crate::progress::ProgressTable;
use crate::store::Store;

/// Scripted [`MediaFetcher`] with per-call knobs.
#[derive(Default)]
pub(crate) struct MockFetcher {
    /// When set, every operation fails with this extractor message.
    pub fail_with: Option<String>,
    /// When `true`, `fetch_and_store` reports a constraint skip.
    pub skip_all: bool,
    /// URLs whose `fetch_and_store` fails individually.
    pub fail_urls: HashSet<String>,
    /// Canned search results.
    pub search_hits: Vec<SearchHit>,
    /// Canned playlist resolution.
    pub playlist: Option<PlaylistInfo>,
}

impl MockFetcher {
    pub(crate) fn track_for(url: &str) -> TrackRecord {
        TrackRecord {
            id: url.len() as i64,
            title: format!("Track for {url}"),
            filename: format!("/tmp/{}.mp3", url.len()),
            duration: Some(180),
            file_size: Some(3 * 1024 * 1024),
            platform: "https://youtube.com".to_string(),
            artist: "Mock Artist".to_string(),
            thumbnail_url: String::new(),
            is_stream: false,
            skipped: false,
        }
    }

    pub(crate) fn sample_playlist(url: &str, len: usize) -> PlaylistInfo {
        PlaylistInfo {
            title: "Mock Playlist".to_string(),
            url: url.to_string(),
            entries: (0..len)
                .map(|i| PlaylistEntry {
                    id: format!("vid{i}"),
                    url: format!("https://www.youtube.com/watch?v=vid{i}"),
                    title: format!("Entry {i}"),
                })
                .collect(),
        }
    }

    fn fail(&self) -> Option<FetchError> {
        self.fail_with
            .as_ref()
            .map(|message| FetchError::Extractor(message.clone()))
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, FetchError> {
        if let Some(error) = self.fail() {
            return Err(error);
        }
        Ok(Metadata {
            id: "mock".to_string(),
            title: format!("Metadata for {url}"),
            url: url.to_string(),
            duration: Some(180),
            uploader: "Mock Artist".to_string(),
            thumbnail: String::new(),
            filesize_approx: None,
            is_live: false,
        })
    }

    async fn fetch_and_store(
        &self,
        url: &str,
        _constraints: &FetchConstraints,
    ) -> Result<Option<TrackRecord>, FetchError> {
        if let Some(error) = self.fail() {
            return Err(error);
        }
        if self.fail_urls.contains(url) {
            return Err(FetchError::Extractor("this content is unavailable".to_string()));
        }
        if self.skip_all {
            return Ok(None);
        }
        Ok(Some(Self::track_for(url)))
    }

    async fn search(
        &self,
        _query: &str,
        _platform: &str,
        limit: usize,
        _include_live: bool,
    ) -> Result<Vec<SearchHit>, FetchError> {
        if let Some(error) = self.fail() {
            return Err(error);
        }
        Ok(self.search_hits.iter().take(limit).cloned().collect())
    }

    async fn playlist_entries(
        &self,
        url: &str,
        max_items: Option<usize>,
    ) -> Result<PlaylistInfo, FetchError> {
        if let Some(error) = self.fail() {
            return Err(error);
        }
        let mut info = self
            .playlist
            .clone()
            .unwrap_or_else(|| Self::sample_playlist(url, 3));
        if let Some(max) = max_items {
            info.entries.truncate(max);
        }
        Ok(info)
    }
}

/// Build a context around a [`MockFetcher`], dropping the event channel.
pub(crate) fn test_context() -> ServerContext {
    test_context_with_fetcher(MockFetcher::default()).0
}

/// Build a context and keep the raw event receiver for inspection.
pub(crate) fn test_context_with_fetcher(
    fetcher: MockFetcher,
) -> (ServerContext, mpsc::UnboundedReceiver<EventMessage>) {
    let (events, rx) = EventPublisher::test_channel();
    let ctx = ServerContext {
        config: DaemonConfig::default(),
        fetcher: Arc::new(fetcher),
        store: Arc::new(Store::open_in_memory().expect("in-memory store")),
        events,
        progress: Arc::new(ProgressTable::new()),
    };
    (ctx, rx)
}
