//! Sqlite-backed song and playlist catalog.
//!
//! The catalog is a thin persistence collaborator: the IPC core only relays
//! its results. Download deduplication keys off `songs.url`: a song whose
//! row and file both exist is returned as already stored instead of being
//! fetched again.
//!
//! The connection lives behind a mutex; catalog traffic is rare relative to
//! socket traffic, so one connection with a busy timeout is enough.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

/// Soft ceiling on catalog size; exceeding it only logs a warning, cleanup
/// is an external process's job.
pub const CATALOG_SOFT_LIMIT: u64 = 500;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS songs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    title         TEXT NOT NULL,
    url           TEXT NOT NULL UNIQUE,
    platform      TEXT NOT NULL,
    file_path     TEXT NOT NULL,
    duration      INTEGER,
    file_size     INTEGER,
    thumbnail_url TEXT,
    artist        TEXT,
    download_date INTEGER NOT NULL,
    play_count    INTEGER NOT NULL DEFAULT 0,
    last_played   INTEGER,
    is_stream     INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS playlists (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    title         TEXT NOT NULL,
    url           TEXT NOT NULL UNIQUE,
    platform      TEXT NOT NULL,
    download_date INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS playlist_songs (
    playlist_id   INTEGER NOT NULL REFERENCES playlists(id),
    song_id       INTEGER NOT NULL REFERENCES songs(id),
    position      INTEGER NOT NULL,
    PRIMARY KEY (playlist_id, song_id)
);
";

/// Catalog errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database access failed.
    #[error("catalog error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A stored song row.
#[derive(Debug, Clone)]
pub struct SongRow {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub platform: String,
    pub file_path: String,
    pub duration: Option<u64>,
    pub file_size: Option<u64>,
    pub thumbnail_url: String,
    pub artist: String,
    pub is_stream: bool,
}

/// Fields for inserting a new song.
#[derive(Debug, Clone)]
pub struct NewSong {
    pub title: String,
    pub url: String,
    pub platform: String,
    pub file_path: String,
    pub duration: Option<u64>,
    pub file_size: Option<u64>,
    pub thumbnail_url: String,
    pub artist: String,
    pub is_stream: bool,
}

/// Song and playlist catalog.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and if necessary create) the catalog at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "catalog opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory catalog, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Look up a song by its source URL.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn song_by_url(&self, url: &str) -> Result<Option<SongRow>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, title, url, platform, file_path, duration, file_size,
                        thumbnail_url, artist, is_stream
                 FROM songs WHERE url = ?1",
                params![url],
                Self::song_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a song, returning the existing row's id if the URL is already
    /// cataloged.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn add_song(&self, song: &NewSong) -> Result<i64, StoreError> {
        if let Some(existing) = self.song_by_url(&song.url)? {
            debug!(url = %song.url, id = existing.id, "song already cataloged");
            return Ok(existing.id);
        }

        let conn = self.lock();
        conn.execute(
            "INSERT INTO songs (title, url, platform, file_path, duration, file_size,
                                thumbnail_url, artist, download_date, is_stream)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                song.title,
                song.url,
                song.platform,
                song.file_path,
                song.duration,
                song.file_size,
                song.thumbnail_url,
                song.artist,
                unix_now(),
                song.is_stream,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a playlist, returning the existing row's id if the URL is
    /// already cataloged.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn add_playlist(&self, title: &str, url: &str, platform: &str) -> Result<i64, StoreError> {
        let conn = self.lock();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM playlists WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO playlists (title, url, platform, download_date) VALUES (?1, ?2, ?3, ?4)",
            params![title, url, platform, unix_now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Attach a song to a playlist at `position`, updating the position if
    /// the pairing already exists.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn add_song_to_playlist(
        &self,
        playlist_id: i64,
        song_id: i64,
        position: usize,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO playlist_songs (playlist_id, song_id, position)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (playlist_id, song_id) DO UPDATE SET position = excluded.position",
            params![playlist_id, song_id, position as i64],
        )?;
        Ok(())
    }

    /// Total number of cataloged songs.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn song_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Log a warning when the catalog has grown past its soft limit.
    pub fn warn_if_over_limit(&self) {
        match self.song_count() {
            Ok(count) if count >= CATALOG_SOFT_LIMIT => {
                warn!(
                    count,
                    limit = CATALOG_SOFT_LIMIT,
                    "catalog exceeds retention target; cleanup is overdue"
                );
            },
            Ok(_) => {},
            Err(error) => warn!(error = %error, "could not check catalog size"),
        }
    }

    fn song_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SongRow> {
        Ok(SongRow {
            id: row.get(0)?,
            title: row.get(1)?,
            url: row.get(2)?,
            platform: row.get(3)?,
            file_path: row.get(4)?,
            duration: row.get(5)?,
            file_size: row.get(6)?,
            thumbnail_url: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            artist: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            is_stream: row.get(9)?,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Catalog lock poisoning would mean a panic mid-statement; the
        // connection itself is still usable.
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
