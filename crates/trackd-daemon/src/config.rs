//! Daemon configuration.
//!
//! Configuration is loaded once at startup from a JSON file and never
//! mutated afterwards; every handler invocation sees the same immutable
//! snapshot behind the server context.
//!
//! A missing or unreadable config file is not fatal: every field has a
//! default, and the daemon logs what it fell back to. The file path comes
//! from the `TRACKD_CONFIG` environment variable, defaulting to
//! `config/trackd.json`.
//!
//! # Socket Path
//!
//! The default socket path is `${XDG_RUNTIME_DIR}/trackd/trackd.sock`,
//! falling back to `/tmp/trackd/trackd.sock` when `XDG_RUNTIME_DIR` is not
//! set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default socket filename.
const DEFAULT_SOCKET_NAME: &str = "trackd.sock";

/// Default subdirectory under the runtime directory.
const DEFAULT_SUBDIR: &str = "trackd";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TRACKD_CONFIG";

/// Default config file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/trackd.json";

/// Get the default socket path based on environment.
///
/// Priority:
/// 1. `XDG_RUNTIME_DIR/trackd/trackd.sock` if `XDG_RUNTIME_DIR` is set
/// 2. `/tmp/trackd/trackd.sock` as fallback
#[must_use]
pub fn default_socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(
        |_| {
            PathBuf::from("/tmp")
                .join(DEFAULT_SUBDIR)
                .join(DEFAULT_SOCKET_NAME)
        },
        |runtime_dir| {
            PathBuf::from(runtime_dir)
                .join(DEFAULT_SUBDIR)
                .join(DEFAULT_SOCKET_NAME)
        },
    )
}

/// Process-wide daemon configuration, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path to listen on.
    pub socket_path: PathBuf,

    /// Directory where fetched audio files are stored.
    pub download_dir: PathBuf,

    /// Path to the sqlite catalog database.
    pub database_path: PathBuf,

    /// Origin whitelist; fetches from platforms outside this list are
    /// refused.
    pub allowed_origins: Vec<String>,

    /// Maximum concurrent client connections.
    pub max_connections: usize,

    /// Extractor executable invoked for metadata, search, and downloads.
    pub extractor: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            download_dir: PathBuf::from("downloads"),
            database_path: PathBuf::from("trackd.db"),
            allowed_origins: vec!["https://youtube.com".to_string()],
            max_connections: 100,
            extractor: "yt-dlp".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Read configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. Most callers
    /// want [`DaemonConfig::load`], which falls back to defaults instead.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(std::io::Error::other)
    }

    /// Load configuration, falling back to defaults on any problem.
    ///
    /// The path is `TRACKD_CONFIG` if set, else [`DEFAULT_CONFIG_PATH`].
    #[must_use]
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

        match Self::from_file(&path) {
            Ok(config) => config,
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "could not load config file, using defaults"
                );
                Self::default()
            },
        }
    }
}
