//! Playlist commands: blocking download, non-blocking start, and status.

use async_trait::async_trait;
use serde_json::json;
use trackd_proto::{JsonMap, fresh_id};

use super::{constraints_from, opt_str, opt_u64, require_str, to_map};
use crate::context::ServerContext;
use crate::dispatch::{CommandHandler, HandlerError};
use crate::playlist::{PlaylistOptions, download_aggregate, spawn_streaming};

fn options_from(params: &JsonMap) -> PlaylistOptions {
    PlaylistOptions {
        max_items: opt_u64(params, "max_items").map(|max| max as usize),
        constraints: constraints_from(params),
        requester: opt_str(params, "requester"),
        guild_id: opt_str(params, "guild_id"),
    }
}

/// Download a whole playlist on the request path and return the aggregate.
pub struct DownloadPlaylistHandler;

#[async_trait]
impl CommandHandler for DownloadPlaylistHandler {
    async fn handle(&self, params: &JsonMap, ctx: &ServerContext) -> Result<JsonMap, HandlerError> {
        let url = require_str(params, "url", "URL is required")?;
        let options = options_from(params);

        let summary = download_aggregate(ctx, url, &options).await?;
        to_map(&summary)
    }
}

/// Kick off a streaming playlist download and acknowledge immediately.
///
/// The acknowledgement carries the generated playlist id, the playlist
/// title, and the total track count; completion and per-item progress are
/// reported exclusively through the event broadcaster.
pub struct StartPlaylistDownloadHandler;

#[async_trait]
impl CommandHandler for StartPlaylistDownloadHandler {
    async fn handle(&self, params: &JsonMap, ctx: &ServerContext) -> Result<JsonMap, HandlerError> {
        let url = require_str(params, "url", "URL is required")?;
        let options = options_from(params);

        let info = ctx.fetcher.playlist_entries(url, options.max_items).await?;
        let playlist_id = fresh_id();
        ctx.progress.begin(&playlist_id, info.entries.len());

        let mut data = JsonMap::new();
        data.insert("playlist_id".to_string(), json!(playlist_id));
        data.insert("title".to_string(), json!(info.title));
        data.insert("total_tracks".to_string(), json!(info.entries.len()));

        spawn_streaming(ctx.clone(), playlist_id, info, options);
        Ok(data)
    }
}

/// Report streaming download progress for a playlist id.
pub struct PlaylistStatusHandler;

#[async_trait]
impl CommandHandler for PlaylistStatusHandler {
    async fn handle(&self, params: &JsonMap, ctx: &ServerContext) -> Result<JsonMap, HandlerError> {
        let playlist_id = require_str(params, "playlist_id", "playlist_id is required")?;

        let Some(progress) = ctx.progress.get(playlist_id) else {
            return Err(HandlerError::OperationFailed(format!(
                "Unknown playlist: {playlist_id}"
            )));
        };

        let mut data = to_map(&progress)?;
        data.insert("playlist_id".to_string(), json!(playlist_id));
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockFetcher, test_context, test_context_with_fetcher};

    fn params(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_download_playlist_requires_url() {
        let ctx = test_context();
        let error = DownloadPlaylistHandler
            .handle(&JsonMap::new(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(error, HandlerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_download_playlist_aggregate_shape() {
        let ctx = test_context();
        let data = DownloadPlaylistHandler
            .handle(
                &params(json!({"url": "https://youtube.com/playlist?list=m"})),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(data["count"], json!(3));
        assert_eq!(data["successful_downloads"], json!(3));
        assert_eq!(data["items"].as_array().unwrap().len(), 3);
        assert_eq!(data["playlist_title"], json!("Mock Playlist"));
    }

    #[tokio::test]
    async fn test_start_playlist_download_acks_before_completion() {
        let mut fetcher = MockFetcher::default();
        fetcher.playlist = Some(MockFetcher::sample_playlist(
            "https://youtube.com/playlist?list=s",
            5,
        ));
        let (ctx, mut events) = test_context_with_fetcher(fetcher);

        let data = StartPlaylistDownloadHandler
            .handle(
                &params(json!({"url": "https://youtube.com/playlist?list=s", "max_items": 3})),
                &ctx,
            )
            .await
            .unwrap();

        let playlist_id = data["playlist_id"].as_str().unwrap().to_string();
        assert!(!playlist_id.is_empty());
        assert_eq!(data["title"], json!("Mock Playlist"));
        assert_eq!(data["total_tracks"], json!(3));

        // The ack registered the download before any event was consumed.
        assert!(ctx.progress.get(&playlist_id).is_some());

        // The spawned work eventually reports a terminal event.
        let mut saw_terminal = false;
        while let Some(event) = events.recv().await {
            if event.event == "playlist_download_completed" {
                assert_eq!(
                    event.data.unwrap()["playlist_id"],
                    json!(playlist_id.clone())
                );
                saw_terminal = true;
                break;
            }
        }
        assert!(saw_terminal);
    }

    #[tokio::test]
    async fn test_status_requires_playlist_id() {
        let ctx = test_context();
        let error = PlaylistStatusHandler
            .handle(&JsonMap::new(), &ctx)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("playlist_id is required"));
    }

    #[tokio::test]
    async fn test_status_reports_progress_counters() {
        let ctx = test_context();
        ctx.progress.begin("pl-x", 10);
        ctx.progress.record_success("pl-x");
        ctx.progress.record_failure("pl-x");

        let data = PlaylistStatusHandler
            .handle(&params(json!({"playlist_id": "pl-x"})), &ctx)
            .await
            .unwrap();
        assert_eq!(data["playlist_id"], json!("pl-x"));
        assert_eq!(data["total"], json!(10));
        assert_eq!(data["completed"], json!(1));
        assert_eq!(data["failed"], json!(1));
        assert_eq!(data["state"], json!("in_progress"));
    }

    #[tokio::test]
    async fn test_status_for_unknown_playlist_fails() {
        let ctx = test_context();
        let error = PlaylistStatusHandler
            .handle(&params(json!({"playlist_id": "missing"})), &ctx)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("Unknown playlist: missing"));
    }
}
