//! Media-fetch collaborator boundary.
//!
//! The daemon core never touches the extraction tool directly: everything
//! goes through the [`MediaFetcher`] trait, so the IPC layer can be tested
//! against a canned implementation and the production [`YtDlpFetcher`] stays
//! a thin subprocess wrapper.
//!
//! Skip semantics follow the extractor contract: constraint violations
//! (live stream, too long, too large, platform not whitelisted in search)
//! yield `Ok(None)` from [`MediaFetcher::fetch_and_store`], while hard
//! extractor failures yield a [`FetchError`] carrying the specific reason.

pub mod platform;
mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use ytdlp::YtDlpFetcher;

use crate::store::StoreError;

/// Errors from the fetch collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The URL's platform is not in the allowed-origin whitelist.
    #[error("platform '{0}' is not in the allowed origins list")]
    PlatformNotAllowed(String),

    /// Search is not implemented for the requested platform.
    #[error("search not supported for platform: {0}")]
    SearchUnsupported(String),

    /// The extractor process failed; the message is its classified reason.
    #[error("{0}")]
    Extractor(String),

    /// The extractor produced output that could not be interpreted.
    #[error("unreadable extractor output: {0}")]
    InvalidOutput(String),

    /// Spawning or reaping the extractor process failed.
    #[error("extractor process error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog access failed while recording a fetch.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Limits applied to a single fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchConstraints {
    /// Skip content longer than this many seconds.
    pub max_duration_seconds: Option<u64>,

    /// Skip content whose estimated size exceeds this many MiB.
    pub max_size_mb: Option<u64>,

    /// Permit live streams (content with no fixed duration).
    pub allow_live: bool,
}

/// Metadata for a single piece of content, without downloading it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Extractor-assigned content id.
    pub id: String,
    pub title: String,
    pub url: String,
    /// `None` for live streams.
    pub duration: Option<u64>,
    pub uploader: String,
    pub thumbnail: String,
    /// Extractor's size estimate, when it offers one.
    pub filesize_approx: Option<u64>,
    pub is_live: bool,
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub duration: Option<u64>,
    pub uploader: String,
    pub thumbnail: String,
    pub platform: String,
}

/// A fetched-and-cataloged track, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Catalog row id.
    pub id: i64,
    pub title: String,
    /// Absolute path of the stored audio file.
    pub filename: String,
    pub duration: Option<u64>,
    pub file_size: Option<u64>,
    pub platform: String,
    pub artist: String,
    pub thumbnail_url: String,
    pub is_stream: bool,
    /// `true` when the track was already cataloged and no download ran.
    pub skipped: bool,
}

/// One entry of a resolved playlist, before any download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub url: String,
    pub title: String,
}

/// A resolved playlist: title plus its (possibly truncated) entry list.
#[derive(Debug, Clone)]
pub struct PlaylistInfo {
    pub title: String,
    pub url: String,
    pub entries: Vec<PlaylistEntry>,
}

/// The media-fetch collaborator consumed by command handlers and the
/// playlist downloader.
///
/// Calls are blocking from the issuing connection task's perspective: a
/// long-running fetch stalls that one client's request/response cycle but
/// never other connections.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch metadata for a single URL without downloading.
    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, FetchError>;

    /// Fetch a URL's audio, store the file, and catalog it.
    ///
    /// Returns `Ok(None)` when the content was skipped because a constraint
    /// ruled it out.
    async fn fetch_and_store(
        &self,
        url: &str,
        constraints: &FetchConstraints,
    ) -> Result<Option<TrackRecord>, FetchError>;

    /// Search a platform, returning up to `limit` hits.
    ///
    /// An empty result list is a normal outcome, not an error.
    async fn search(
        &self,
        query: &str,
        platform: &str,
        limit: usize,
        include_live: bool,
    ) -> Result<Vec<SearchHit>, FetchError>;

    /// Resolve a playlist URL into its entry list without downloading.
    async fn playlist_entries(
        &self,
        url: &str,
        max_items: Option<usize>,
    ) -> Result<PlaylistInfo, FetchError>;
}

/// Check metadata against fetch constraints.
///
/// Returns `Some(reason)` when the content must be skipped.
#[must_use]
pub fn constraint_violation(metadata: &Metadata, constraints: &FetchConstraints) -> Option<String> {
    if !constraints.allow_live && metadata.duration.is_none() {
        return Some("content is a live stream".to_string());
    }

    if let (Some(max), Some(duration)) = (constraints.max_duration_seconds, metadata.duration) {
        if duration > max {
            return Some(format!("duration {duration}s exceeds limit {max}s"));
        }
    }

    if let (Some(max_mb), Some(size)) = (constraints.max_size_mb, metadata.filesize_approx) {
        let max_bytes = max_mb * 1024 * 1024;
        if size > max_bytes {
            return Some(format!(
                "estimated size {:.1}MiB exceeds limit {max_mb}MiB",
                size as f64 / (1024.0 * 1024.0)
            ));
        }
    }

    None
}
