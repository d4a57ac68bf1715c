//! Shared test infrastructure for daemon integration tests.
//!
//! Each test gets an isolated daemon on a tempdir socket with a scripted
//! fetcher, so tests never touch the network or a real extractor and can
//! run in parallel.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use trackd_daemon::fetch::{
    FetchConstraints, FetchError, MediaFetcher, Metadata, PlaylistEntry, PlaylistInfo, SearchHit,
    TrackRecord,
};
use trackd_daemon::{DaemonConfig, Server, Store};
use trackd_proto::FrameCodec;

/// Scripted fetcher for end-to-end tests.
#[derive(Default)]
pub struct ScriptedFetcher {
    /// When set, every operation fails with this message.
    pub fail_with: Option<String>,
    /// Canned search results.
    pub search_hits: Vec<SearchHit>,
    /// Entry count for playlist resolutions.
    pub playlist_len: usize,
    /// URLs whose individual fetch fails.
    pub fail_urls: HashSet<String>,
}

impl ScriptedFetcher {
    fn fail(&self) -> Option<FetchError> {
        self.fail_with
            .as_ref()
            .map(|message| FetchError::Extractor(message.clone()))
    }

    pub fn track_for(url: &str) -> TrackRecord {
        TrackRecord {
            id: url.len() as i64,
            title: format!("Track for {url}"),
            filename: format!("/tmp/{}.mp3", url.len()),
            duration: Some(200),
            file_size: Some(1024 * 1024),
            platform: "https://youtube.com".to_string(),
            artist: "Test Artist".to_string(),
            thumbnail_url: String::new(),
            is_stream: false,
            skipped: false,
        }
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, FetchError> {
        if let Some(error) = self.fail() {
            return Err(error);
        }
        Ok(Metadata {
            id: "meta".to_string(),
            title: format!("Metadata for {url}"),
            url: url.to_string(),
            duration: Some(200),
            uploader: "Test Artist".to_string(),
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
            return Err(FetchError::Extractor(
                "this content is unavailable".to_string(),
            ));
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
        let len = max_items
            .unwrap_or(self.playlist_len)
            .min(self.playlist_len.max(1));
        Ok(PlaylistInfo {
            title: "Scripted Playlist".to_string(),
            url: url.to_string(),
            entries: (0..len)
                .map(|i| PlaylistEntry {
                    id: format!("vid{i}"),
                    url: format!("https://www.youtube.com/watch?v=vid{i}"),
                    title: format!("Entry {i}"),
                })
                .collect(),
        })
    }
}

/// An isolated daemon instance on a tempdir socket.
pub struct TestDaemon {
    pub server: Server,
    pub socket_path: PathBuf,
    _dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon with a default scripted fetcher.
    pub async fn start() -> Self {
        Self::start_with(ScriptedFetcher {
            playlist_len: 3,
            ..ScriptedFetcher::default()
        })
        .await
    }

    /// Start a daemon around a specific scripted fetcher.
    pub async fn start_with(fetcher: ScriptedFetcher) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let socket_path = dir.path().join("trackd.sock");

        let config = DaemonConfig {
            socket_path: socket_path.clone(),
            database_path: dir.path().join("trackd.db"),
            download_dir: dir.path().join("downloads"),
            ..DaemonConfig::default()
        };

        let server = Server::new(
            config,
            Arc::new(fetcher),
            Arc::new(Store::open_in_memory().expect("store")),
        );
        assert!(server.start().await.expect("server start"));

        Self {
            server,
            socket_path,
            _dir: dir,
        }
    }

    /// Connect a raw framed client, bypassing the client library.
    pub async fn raw_client(&self) -> Framed<UnixStream, FrameCodec> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect");
        Framed::new(stream, FrameCodec::new())
    }
}
