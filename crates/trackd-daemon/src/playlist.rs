//! Playlist download engine.
//!
//! One engine serves both playlist commands: `download_playlist` runs it to
//! completion on the request path and returns the aggregate summary, while
//! `start_playlist_download` spawns it as a background task that reports
//! per-item progress through the event broadcaster: one
//! `playlist_item_downloaded` per completed track, then a terminal
//! `playlist_download_completed` or `playlist_download_error`.
//!
//! Individual item failures never abort the run; they become failed entries
//! in the summary (and failure counts in the progress table when
//! streaming). A streaming run where every item failed is reported as a
//! terminal error.

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use trackd_proto::JsonMap;

use crate::context::ServerContext;
use crate::fetch::platform::platform_for_url;
use crate::fetch::{FetchConstraints, FetchError, PlaylistInfo, TrackRecord};
use crate::progress::ProgressState;

/// Per-request playlist download options.
#[derive(Debug, Clone, Default)]
pub struct PlaylistOptions {
    /// Cap on the number of entries to download.
    pub max_items: Option<usize>,

    /// Constraints applied to each individual item.
    pub constraints: FetchConstraints,

    /// Opaque requester tag echoed in item events.
    pub requester: Option<String>,

    /// Opaque origin tag echoed in item events.
    pub guild_id: Option<String>,
}

/// Outcome of one playlist entry.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ItemOutcome {
    /// The entry was fetched (or dedup-skipped) successfully.
    Downloaded(TrackRecord),

    /// The entry failed or was ruled out; carries the reason.
    Failed {
        title: String,
        platform: String,
        skipped: bool,
        error: String,
    },
}

/// Aggregate result of a playlist run.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistSummary {
    pub playlist_title: String,
    pub playlist_url: String,
    /// Number of processed entries, successful or not.
    pub count: usize,
    pub successful_downloads: usize,
    pub items: Vec<ItemOutcome>,
    /// First successfully fetched track, convenient for immediate playback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_track: Option<TrackRecord>,
}

/// Resolve and download a playlist on the caller's task.
///
/// # Errors
///
/// Returns an error only when the playlist itself cannot be resolved;
/// per-item failures are folded into the summary.
pub async fn download_aggregate(
    ctx: &ServerContext,
    url: &str,
    options: &PlaylistOptions,
) -> Result<PlaylistSummary, FetchError> {
    let info = ctx.fetcher.playlist_entries(url, options.max_items).await?;
    Ok(run(ctx, &info, options, None).await)
}

/// Spawn a streaming download as an independent unit of work.
///
/// The caller has already resolved `info`, registered `playlist_id` in the
/// progress table, and returned its acknowledgement; from here on all
/// progress flows through the broadcaster.
pub fn spawn_streaming(
    ctx: ServerContext,
    playlist_id: String,
    info: PlaylistInfo,
    options: PlaylistOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let summary = run(&ctx, &info, &options, Some(&playlist_id)).await;

        if summary.successful_downloads == 0 && summary.count > 0 {
            warn!(
                playlist_id = %playlist_id,
                failed = summary.count,
                "streaming playlist download failed entirely"
            );
            ctx.progress.finish(&playlist_id, ProgressState::Failed);
            ctx.events.publish(
                "playlist_download_error",
                object(json!({
                    "playlist_id": playlist_id,
                    "playlist_title": summary.playlist_title,
                    "playlist_url": summary.playlist_url,
                    "error": format!("all {} playlist items failed", summary.count),
                })),
            );
            return;
        }

        ctx.progress.finish(&playlist_id, ProgressState::Completed);
        ctx.events.publish(
            "playlist_download_completed",
            object(json!({
                "playlist_id": playlist_id,
                "playlist_title": summary.playlist_title,
                "playlist_url": summary.playlist_url,
                "count": summary.count,
                "successful_downloads": summary.successful_downloads,
            })),
        );
    })
}

async fn run(
    ctx: &ServerContext,
    info: &PlaylistInfo,
    options: &PlaylistOptions,
    streaming_id: Option<&str>,
) -> PlaylistSummary {
    let platform = platform_for_url(&info.url);
    let total = info.entries.len();

    // Catalog bookkeeping is best-effort; a broken catalog must not stop
    // the downloads themselves.
    let catalog_id = match ctx.store.add_playlist(&info.title, &info.url, &platform) {
        Ok(id) => Some(id),
        Err(error) => {
            warn!(url = %info.url, error = %error, "could not catalog playlist");
            None
        },
    };

    let mut items = Vec::with_capacity(total);
    let mut successful = 0usize;
    let mut first_track: Option<TrackRecord> = None;

    for (position, entry) in info.entries.iter().enumerate() {
        debug!(
            position = position + 1,
            total,
            title = %entry.title,
            "processing playlist item"
        );

        match ctx
            .fetcher
            .fetch_and_store(&entry.url, &options.constraints)
            .await
        {
            Ok(Some(track)) => {
                successful += 1;

                if let Some(catalog_id) = catalog_id {
                    if let Err(error) =
                        ctx.store.add_song_to_playlist(catalog_id, track.id, position)
                    {
                        warn!(song_id = track.id, error = %error, "could not attach song to playlist");
                    }
                }

                if let Some(playlist_id) = streaming_id {
                    ctx.progress.record_success(playlist_id);
                    ctx.events.publish(
                        "playlist_item_downloaded",
                        item_event(&track, info, options, position, total),
                    );
                }

                if first_track.is_none() {
                    first_track = Some(track.clone());
                }
                items.push(ItemOutcome::Downloaded(track));
            },
            Ok(None) => {
                debug!(url = %entry.url, "playlist item ruled out by constraints");
                if let Some(playlist_id) = streaming_id {
                    ctx.progress.record_failure(playlist_id);
                }
                items.push(ItemOutcome::Failed {
                    title: entry.title.clone(),
                    platform: platform.clone(),
                    skipped: true,
                    error: "Download failed".to_string(),
                });
            },
            Err(error) => {
                warn!(url = %entry.url, error = %error, "playlist item failed");
                if let Some(playlist_id) = streaming_id {
                    ctx.progress.record_failure(playlist_id);
                }
                items.push(ItemOutcome::Failed {
                    title: entry.title.clone(),
                    platform: platform.clone(),
                    skipped: true,
                    error: error.to_string(),
                });
            },
        }
    }

    PlaylistSummary {
        playlist_title: info.title.clone(),
        playlist_url: info.url.clone(),
        count: items.len(),
        successful_downloads: successful,
        items,
        first_track,
    }
}

fn item_event(
    track: &TrackRecord,
    info: &PlaylistInfo,
    options: &PlaylistOptions,
    position: usize,
    total: usize,
) -> JsonMap {
    object(json!({
        "track": track,
        "position": position,
        "requester": options.requester,
        "guild_id": options.guild_id,
        "playlist": {
            "title": info.title,
            "url": info.url,
            "total_tracks": total,
        },
    }))
}

fn object(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        // json! with an object literal always produces an object.
        _ => JsonMap::new(),
    }
}
