use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    fingerprint::{Fingerprint, FingerprintData},
    store::{FingerprintStore, NewSong, Song, SongId},
};

// Stays well below SQLITE_MAX_VARIABLE_NUMBER on old builds.
const PARAMS_PER_QUERY: usize = 500;

const SONG_COLUMNS: &str =
    "id, song_key, title, artist, album, duration, external_media_id";

/// SQLite-backed catalog. One connection guarded by a mutex, so the store can
/// be shared between threads.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!("opening catalog at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StoreUnavailable("sqlite connection lock poisoned".into()))
    }

    fn create_tables(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS songs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                song_key TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                album TEXT,
                duration REAL NOT NULL,
                external_media_id TEXT
            );
            CREATE TABLE IF NOT EXISTS fingerprints (
                hash INTEGER NOT NULL,
                song_id INTEGER NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
                anchor_offset INTEGER NOT NULL,
                PRIMARY KEY (hash, song_id, anchor_offset)
            );
            CREATE INDEX IF NOT EXISTS fingerprints_song ON fingerprints (song_id);",
        )?;
        Ok(())
    }

    pub fn fingerprint_count(&self) -> Result<usize> {
        let count: i64 =
            self.lock()?
                .query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        artist: row.get(3)?,
        album: row.get(4)?,
        duration_secs: row.get(5)?,
        external_media_id: row.get(6)?,
    })
}

fn placeholders(count: usize) -> String {
    std::iter::repeat_n("?", count).collect::<Vec<_>>().join(",")
}

impl FingerprintStore for SqliteStore {
    fn insert_song(&self, song: &NewSong) -> Result<SongId> {
        let conn = self.lock()?;
        let key = song.key();

        let existing: Option<SongId> = conn
            .query_row("SELECT id FROM songs WHERE song_key = ?", [&key], |row| {
                row.get(0)
            })
            .optional()?;
        if existing.is_some() {
            return Err(Error::DuplicateSong(key));
        }

        let mut stmt = conn.prepare_cached(
            "INSERT INTO songs (song_key, title, artist, album, duration, external_media_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        stmt.execute(params![
            &key,
            &song.title,
            &song.artist,
            &song.album,
            song.duration_secs,
            &song.external_media_id,
        ])?;

        let song_id = conn.last_insert_rowid();
        debug!(song_id, key = %key, "registered song");
        Ok(song_id)
    }

    fn put_fingerprints(&self, song_id: SongId, fingerprints: &[Fingerprint]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO fingerprints (hash, song_id, anchor_offset) VALUES (?, ?, ?)",
            )?;
            for fingerprint in fingerprints {
                stmt.execute(params![fingerprint.hash, song_id, fingerprint.anchor_offset])?;
            }
        }
        tx.commit()?;
        debug!(song_id, count = fingerprints.len(), "stored fingerprints");
        Ok(())
    }

    fn lookup(&self, hashes: &HashSet<u32>) -> Result<Vec<FingerprintData>> {
        let conn = self.lock()?;
        let hashes: Vec<u32> = hashes.iter().copied().collect();
        let mut rows = Vec::new();

        for chunk in hashes.chunks(PARAMS_PER_QUERY) {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT hash, anchor_offset, song_id FROM fingerprints WHERE hash IN ({})",
                placeholders(chunk.len())
            ))?;
            let found = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok(FingerprintData {
                        fingerprint: Fingerprint {
                            hash: row.get(0)?,
                            anchor_offset: row.get(1)?,
                        },
                        song_id: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.extend(found);
        }

        Ok(rows)
    }

    fn get_songs(&self, ids: &[SongId]) -> Result<Vec<Song>> {
        let conn = self.lock()?;
        let mut by_id = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(PARAMS_PER_QUERY) {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SONG_COLUMNS} FROM songs WHERE id IN ({})",
                placeholders(chunk.len())
            ))?;
            let songs = stmt
                .query_map(params_from_iter(chunk.iter()), song_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            by_id.extend(songs.into_iter().map(|song| (song.id, song)));
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn song_by_key(&self, key: &str) -> Result<Option<Song>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {SONG_COLUMNS} FROM songs WHERE song_key = ?"))?;
        Ok(stmt.query_row([key], song_from_row).optional()?)
    }

    fn set_external_media_id(&self, song_id: SongId, media_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE songs SET external_media_id = ? WHERE id = ?",
            params![media_id, song_id],
        )?;
        if changed == 0 {
            return Err(Error::invalid_input(format!("unknown song id {song_id}")));
        }
        Ok(())
    }

    fn delete_song(&self, song_id: SongId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM fingerprints WHERE song_id = ?", [song_id])?;
        tx.execute("DELETE FROM songs WHERE id = ?", [song_id])?;
        tx.commit()?;
        Ok(())
    }

    fn song_count(&self) -> Result<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
