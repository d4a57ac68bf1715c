//! Playlist download progress tracking.
//!
//! Each `start_playlist_download` acknowledgement carries a generated
//! playlist id; the streaming downloader updates this table as items finish
//! so `get_playlist_download_status` can answer truthfully instead of
//! returning a canned in-progress placeholder.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

/// Lifecycle of one tracked playlist download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    InProgress,
    Completed,
    Failed,
}

/// Counters for one playlist download.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlaylistProgress {
    /// Number of entries the download was started with.
    pub total: usize,
    /// Items fetched successfully (including dedup skips).
    pub completed: usize,
    /// Items that failed or were ruled out by constraints.
    pub failed: usize,
    pub state: ProgressState,
}

/// Progress table keyed by generated playlist id.
#[derive(Debug, Default)]
pub struct ProgressTable {
    inner: Mutex<HashMap<String, PlaylistProgress>>,
}

impl ProgressTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new download with `total` pending items.
    pub fn begin(&self, playlist_id: &str, total: usize) {
        self.lock().insert(
            playlist_id.to_string(),
            PlaylistProgress {
                total,
                completed: 0,
                failed: 0,
                state: ProgressState::InProgress,
            },
        );
    }

    /// Record one successfully fetched item.
    pub fn record_success(&self, playlist_id: &str) {
        if let Some(progress) = self.lock().get_mut(playlist_id) {
            progress.completed += 1;
        }
    }

    /// Record one failed or skipped item.
    pub fn record_failure(&self, playlist_id: &str) {
        if let Some(progress) = self.lock().get_mut(playlist_id) {
            progress.failed += 1;
        }
    }

    /// Move a download to a terminal state.
    pub fn finish(&self, playlist_id: &str, state: ProgressState) {
        if let Some(progress) = self.lock().get_mut(playlist_id) {
            progress.state = state;
        }
    }

    /// Current counters for a playlist, if known.
    #[must_use]
    pub fn get(&self, playlist_id: &str) -> Option<PlaylistProgress> {
        self.lock().get(playlist_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PlaylistProgress>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let table = ProgressTable::new();
        assert!(table.get("missing").is_none());

        table.begin("pl-1", 3);
        let progress = table.get("pl-1").unwrap();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 0);
        assert_eq!(progress.state, ProgressState::InProgress);

        table.record_success("pl-1");
        table.record_success("pl-1");
        table.record_failure("pl-1");
        table.finish("pl-1", ProgressState::Completed);

        let progress = table.get("pl-1").unwrap();
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.state, ProgressState::Completed);
    }

    #[test]
    fn test_updates_to_unknown_ids_are_ignored() {
        let table = ProgressTable::new();
        table.record_success("ghost");
        table.finish("ghost", ProgressState::Failed);
        assert!(table.get("ghost").is_none());
    }
}
