//! Production [`MediaFetcher`] backed by the `yt-dlp` executable.
//!
//! Each operation spawns the extractor with `--dump-single-json` and parses
//! its stdout; downloads additionally run the audio-extraction pipeline and
//! verify the output file before the catalog is touched. The extractor's
//! own retry/backoff behavior is left alone.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::platform::{platform_for_url, platform_prefix, search_expression};
use super::{
    FetchConstraints, FetchError, MediaFetcher, Metadata, PlaylistEntry, PlaylistInfo, SearchHit,
    TrackRecord, constraint_violation,
};
use crate::store::{NewSong, Store};

/// Upper bound on live-ish content duration used by the radio heuristic.
const RADIO_DURATION_CUTOFF_SECS: u64 = 12 * 3600;

/// Extractor JSON for a single piece of content or a playlist.
///
/// Only the fields the daemon consumes are modeled; everything else in the
/// extractor's output is ignored.
#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    filesize_approx: Option<f64>,
    #[serde(default)]
    is_live: Option<bool>,
    /// Playlist/search entries; unavailable items come through as `null`.
    #[serde(default)]
    entries: Option<Vec<Option<RawInfo>>>,
}

impl RawInfo {
    fn duration_secs(&self) -> Option<u64> {
        self.duration.map(|d| d.max(0.0) as u64)
    }

    fn title_or_unknown(&self) -> String {
        self.title.clone().unwrap_or_else(|| "Unknown".to_string())
    }
}

/// `yt-dlp` subprocess fetcher.
pub struct YtDlpFetcher {
    binary: String,
    download_dir: PathBuf,
    allowed_origins: Vec<String>,
    store: Arc<Store>,
}

impl YtDlpFetcher {
    /// Create a fetcher storing files under `download_dir`.
    #[must_use]
    pub fn new(
        binary: impl Into<String>,
        download_dir: impl Into<PathBuf>,
        allowed_origins: Vec<String>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            binary: binary.into(),
            download_dir: download_dir.into(),
            allowed_origins,
            store,
        }
    }

    fn check_origin(&self, platform: &str) -> Result<(), FetchError> {
        if self.allowed_origins.iter().any(|origin| origin == platform) {
            Ok(())
        } else {
            Err(FetchError::PlatformNotAllowed(platform.to_string()))
        }
    }

    /// Run the extractor and parse its single-JSON stdout.
    async fn run_json(&self, args: &[&str]) -> Result<RawInfo, FetchError> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Extractor(classify_extractor_error(&stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|error| FetchError::InvalidOutput(error.to_string()))
    }

    /// Run a download invocation; only the exit status matters, the result
    /// is re-read from disk.
    async fn run_download(&self, url: &str, output_template: &str) -> Result<(), FetchError> {
        let output = Command::new(&self.binary)
            .args([
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "192K",
                "--no-overwrites",
                "--no-playlist",
                "--retries",
                "3",
                "--output",
                output_template,
                url,
            ])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Extractor(classify_extractor_error(&stderr)));
        }
        Ok(())
    }

    fn already_stored(&self, url: &str) -> Result<Option<TrackRecord>, FetchError> {
        let Some(row) = self.store.song_by_url(url)? else {
            return Ok(None);
        };
        if !std::path::Path::new(&row.file_path).exists() {
            // Row without a file: the file was cleaned up, refetch.
            return Ok(None);
        }

        debug!(url, title = %row.title, "track already cataloged, skipping download");
        Ok(Some(TrackRecord {
            id: row.id,
            title: row.title,
            filename: row.file_path,
            duration: row.duration,
            file_size: row.file_size,
            platform: row.platform,
            artist: row.artist,
            thumbnail_url: row.thumbnail_url,
            is_stream: row.is_stream,
            skipped: true,
        }))
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, FetchError> {
        let info = self
            .run_json(&["--dump-single-json", "--no-download", url])
            .await?;

        Ok(Metadata {
            id: info.id.clone().unwrap_or_default(),
            title: info.title_or_unknown(),
            url: info.webpage_url.clone().unwrap_or_else(|| url.to_string()),
            duration: info.duration_secs(),
            uploader: info
                .uploader
                .clone()
                .or(info.channel.clone())
                .unwrap_or_default(),
            thumbnail: info.thumbnail.clone().unwrap_or_default(),
            filesize_approx: info.filesize_approx.map(|size| size.max(0.0) as u64),
            is_live: info.is_live.unwrap_or(false) || info.duration.is_none(),
        })
    }

    async fn fetch_and_store(
        &self,
        url: &str,
        constraints: &FetchConstraints,
    ) -> Result<Option<TrackRecord>, FetchError> {
        let platform = platform_for_url(url);
        self.check_origin(&platform)?;

        if let Some(existing) = self.already_stored(url)? {
            return Ok(Some(existing));
        }

        let metadata = self.fetch_metadata(url).await?;
        if let Some(reason) = constraint_violation(&metadata, constraints) {
            info!(url, %reason, "skipping fetch");
            return Ok(None);
        }

        let prefix = platform_prefix(&platform);
        let filename = format!("{prefix}_{}.mp3", metadata.id);
        let full_path = self.download_dir.join(&filename);

        if full_path.exists() {
            debug!(path = %full_path.display(), "file already on disk, skipping download");
        } else {
            let template = self
                .download_dir
                .join(format!("{prefix}_%(id)s.%(ext)s"))
                .to_string_lossy()
                .into_owned();
            self.run_download(url, &template).await?;

            if !full_path.exists() {
                return Err(FetchError::Extractor(format!(
                    "download completed but file not found: {}",
                    full_path.display()
                )));
            }
        }

        let file_size = tokio::fs::metadata(&full_path).await.map(|m| m.len()).ok();

        self.store.warn_if_over_limit();
        let song_id = self.store.add_song(&NewSong {
            title: metadata.title.clone(),
            url: url.to_string(),
            platform: platform.clone(),
            file_path: full_path.to_string_lossy().into_owned(),
            duration: metadata.duration,
            file_size,
            thumbnail_url: metadata.thumbnail.clone(),
            artist: if metadata.uploader.is_empty() {
                "Unknown".to_string()
            } else {
                metadata.uploader.clone()
            },
            is_stream: metadata.is_live,
        })?;
        info!(url, song_id, title = %metadata.title, "track stored");

        Ok(Some(TrackRecord {
            id: song_id,
            title: metadata.title,
            filename: full_path.to_string_lossy().into_owned(),
            duration: metadata.duration,
            file_size,
            platform,
            artist: metadata.uploader,
            thumbnail_url: metadata.thumbnail,
            is_stream: metadata.is_live,
            skipped: false,
        }))
    }

    async fn search(
        &self,
        query: &str,
        platform: &str,
        limit: usize,
        include_live: bool,
    ) -> Result<Vec<SearchHit>, FetchError> {
        let Some((expression, origin)) = search_expression(platform, query, limit) else {
            return Err(FetchError::SearchUnsupported(platform.to_string()));
        };
        self.check_origin(&origin)?;

        let info = self
            .run_json(&[
                "--dump-single-json",
                "--no-download",
                "--ignore-errors",
                &expression,
            ])
            .await?;

        let mut hits = Vec::new();
        for entry in info.entries.unwrap_or_default().into_iter().flatten() {
            if !include_live && should_filter_live(&entry) {
                debug!(title = %entry.title_or_unknown(), "filtering live result");
                continue;
            }

            hits.push(SearchHit {
                title: entry.title_or_unknown(),
                url: entry.webpage_url.clone().unwrap_or_default(),
                duration: entry.duration_secs(),
                uploader: entry
                    .uploader
                    .clone()
                    .or(entry.channel.clone())
                    .unwrap_or_default(),
                thumbnail: entry.thumbnail.clone().unwrap_or_default(),
                platform: origin.clone(),
            });

            if hits.len() >= limit {
                break;
            }
        }

        if hits.is_empty() {
            debug!(query, "search returned no usable results");
        }
        Ok(hits)
    }

    async fn playlist_entries(
        &self,
        url: &str,
        max_items: Option<usize>,
    ) -> Result<PlaylistInfo, FetchError> {
        let platform = platform_for_url(url);
        self.check_origin(&platform)?;

        let info = self
            .run_json(&[
                "--dump-single-json",
                "--flat-playlist",
                "--no-download",
                "--ignore-errors",
                url,
            ])
            .await?;

        let mut entries = Vec::new();
        for entry in info.entries.unwrap_or_default().into_iter().flatten() {
            let Some(id) = entry.id.clone().filter(|id| !id.is_empty()) else {
                warn!("skipping unavailable playlist item");
                continue;
            };

            let entry_url = entry
                .webpage_url
                .clone()
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));

            entries.push(PlaylistEntry {
                id,
                url: entry_url,
                title: entry.title_or_unknown(),
            });

            if let Some(max) = max_items {
                if entries.len() >= max {
                    break;
                }
            }
        }

        if entries.is_empty() {
            return Err(FetchError::Extractor(
                "no items found in playlist or not a playlist URL".to_string(),
            ));
        }

        Ok(PlaylistInfo {
            title: info
                .title
                .unwrap_or_else(|| "Unknown Playlist".to_string()),
            url: url.to_string(),
            entries,
        })
    }
}

/// Heuristic live/radio filter applied to search results.
fn should_filter_live(entry: &RawInfo) -> bool {
    if entry.duration.is_none() {
        return true;
    }

    let title = entry.title_or_unknown().to_ascii_lowercase();
    if title.contains("radio") || title.contains("24/7") {
        return entry
            .duration_secs()
            .is_none_or(|duration| duration > RADIO_DURATION_CUTOFF_SECS);
    }

    false
}

/// Collapse extractor stderr into a stable, client-facing reason.
fn classify_extractor_error(stderr: &str) -> String {
    let lowered = stderr.to_ascii_lowercase();

    if lowered.contains("private") {
        return "this content is private".to_string();
    }
    if ["premium", "paywall", "subscribe", "login", "member", "paid"]
        .iter()
        .any(|term| lowered.contains(term))
    {
        return "this content requires a premium account or login".to_string();
    }
    if ["removed", "deleted", "taken down"]
        .iter()
        .any(|term| lowered.contains(term))
    {
        return "this content has been removed or deleted".to_string();
    }
    if lowered.contains("copyright") {
        return "this content is blocked due to copyright issues".to_string();
    }
    if lowered.contains("age") && (lowered.contains("restrict") || lowered.contains("verify")) {
        return "this content is age-restricted".to_string();
    }
    if (lowered.contains("geo") && lowered.contains("block")) || lowered.contains("country") {
        return "this content is not available in your country".to_string();
    }
    if lowered.contains("unavailable") {
        return "this content is unavailable".to_string();
    }
    if ["not exist", "no longer", "not found"]
        .iter()
        .any(|term| lowered.contains(term))
    {
        return "this content does not exist or could not be found".to_string();
    }

    // Fall back to the extractor's last non-empty line.
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("extractor failed")
        .to_string()
}
