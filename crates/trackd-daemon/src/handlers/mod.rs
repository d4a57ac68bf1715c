//! Built-in command handlers.
//!
//! Each handler validates its parameters first, then delegates to a
//! collaborator; none of them touch sockets or framing. They are registered
//! by [`register_defaults`] at server construction, and additional handlers
//! can be registered through the same [`CommandRegistry`] seam without
//! touching the dispatcher.

mod download;
mod ping;
mod playlist;
mod search;

use std::sync::Arc;

use serde::Serialize;
use trackd_proto::JsonMap;

pub use ping::{PingHandler, pong_data};

use crate::dispatch::{CommandRegistry, HandlerError};
use crate::fetch::FetchConstraints;

/// Register every built-in command.
pub fn register_defaults(registry: &mut CommandRegistry) {
    registry.register("ping", Arc::new(ping::PingHandler));
    registry.register("search", Arc::new(search::SearchHandler));
    registry.register("download_audio", Arc::new(download::DownloadAudioHandler));
    registry.register(
        "download_playlist",
        Arc::new(playlist::DownloadPlaylistHandler),
    );
    registry.register(
        "start_playlist_download",
        Arc::new(playlist::StartPlaylistDownloadHandler),
    );
    registry.register(
        "get_playlist_download_status",
        Arc::new(playlist::PlaylistStatusHandler),
    );
}

/// Extract a required string parameter.
fn require_str<'a>(
    params: &'a JsonMap,
    key: &str,
    message: &str,
) -> Result<&'a str, HandlerError> {
    params
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| HandlerError::InvalidParams(message.to_string()))
}

fn opt_str(params: &JsonMap, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn opt_u64(params: &JsonMap, key: &str) -> Option<u64> {
    params.get(key).and_then(serde_json::Value::as_u64)
}

fn bool_or(params: &JsonMap, key: &str, default: bool) -> bool {
    params
        .get(key)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(default)
}

/// Parse the shared fetch-constraint parameters.
fn constraints_from(params: &JsonMap) -> FetchConstraints {
    FetchConstraints {
        max_duration_seconds: opt_u64(params, "max_duration_seconds"),
        max_size_mb: opt_u64(params, "max_size_mb"),
        allow_live: bool_or(params, "allow_live", false),
    }
}

/// Serialize a value into a response data map.
fn to_map<T: Serialize>(value: &T) -> Result<JsonMap, HandlerError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(HandlerError::OperationFailed(format!(
            "handler produced non-object data: {other}"
        ))),
        Err(error) => Err(HandlerError::OperationFailed(error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_require_str() {
        let map = params(json!({"url": "https://youtube.com/watch?v=a", "empty": ""}));
        assert_eq!(
            require_str(&map, "url", "URL is required").unwrap(),
            "https://youtube.com/watch?v=a"
        );
        assert!(require_str(&map, "missing", "URL is required").is_err());
        assert!(require_str(&map, "empty", "URL is required").is_err());
    }

    #[test]
    fn test_constraints_from_params() {
        let map = params(json!({
            "max_duration_seconds": 600,
            "allow_live": true,
        }));
        let constraints = constraints_from(&map);
        assert_eq!(constraints.max_duration_seconds, Some(600));
        assert_eq!(constraints.max_size_mb, None);
        assert!(constraints.allow_live);

        let defaults = constraints_from(&JsonMap::new());
        assert!(!defaults.allow_live);
    }

    #[test]
    fn test_register_defaults_covers_all_commands() {
        let mut registry = CommandRegistry::new();
        register_defaults(&mut registry);

        let mut names = registry.command_names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "download_audio",
                "download_playlist",
                "get_playlist_download_status",
                "ping",
                "search",
                "start_playlist_download",
            ]
        );
    }
}
