//! Catalog records and the storage contract the matcher relies on.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    fingerprint::{Fingerprint, FingerprintData},
};

pub type SongId = i64;

/// Normalized catalog key: trimmed, lowercased `title:artist`.
pub fn song_key(title: &str, artist: &str) -> String {
    format!(
        "{}:{}",
        title.trim().to_lowercase(),
        artist.trim().to_lowercase()
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub key: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: f64,
    pub external_media_id: Option<String>,
}

/// Metadata supplied when a recording enters the catalog.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: f64,
    pub external_media_id: Option<String>,
}

impl NewSong {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        song_key(&self.title, &self.artist)
    }
}

/// Persistence for songs and their fingerprints.
///
/// Implementations are shared between concurrent searches and ingestions and
/// do their own locking. `lookup` and `get_songs` must resolve their whole key
/// set in one call; `put_fingerprints` must be atomic per call.
pub trait FingerprintStore: Send + Sync {
    /// Registers a song, failing with [`Error::DuplicateSong`] if its key exists.
    fn insert_song(&self, song: &NewSong) -> Result<SongId>;

    /// Stores fingerprints for a song; a `(hash, song, offset)` row that is
    /// already present is ignored.
    fn put_fingerprints(&self, song_id: SongId, fingerprints: &[Fingerprint]) -> Result<()>;

    /// Every stored fingerprint whose hash is in `hashes`.
    fn lookup(&self, hashes: &HashSet<u32>) -> Result<Vec<FingerprintData>>;

    /// Songs for the given ids; unknown ids are left out.
    fn get_songs(&self, ids: &[SongId]) -> Result<Vec<Song>>;

    fn song_by_key(&self, key: &str) -> Result<Option<Song>>;

    fn set_external_media_id(&self, song_id: SongId, media_id: &str) -> Result<()>;

    /// Removes a song together with its fingerprints.
    fn delete_song(&self, song_id: SongId) -> Result<()>;

    fn song_count(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
struct MemoryCatalog {
    next_id: SongId,
    songs: BTreeMap<SongId, Song>,
    keys: HashMap<String, SongId>,
    index: HashMap<u32, BTreeSet<(SongId, u32)>>,
}

/// Process-local store behind a single `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryCatalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryCatalog>> {
        self.inner
            .read()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryCatalog>> {
        self.inner
            .write()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".into()))
    }

    pub fn fingerprint_count(&self) -> Result<usize> {
        Ok(self.read()?.index.values().map(BTreeSet::len).sum())
    }
}

impl FingerprintStore for MemoryStore {
    fn insert_song(&self, song: &NewSong) -> Result<SongId> {
        let mut catalog = self.write()?;
        let key = song.key();
        if catalog.keys.contains_key(&key) {
            return Err(Error::DuplicateSong(key));
        }
        catalog.next_id += 1;
        let id = catalog.next_id;
        catalog.keys.insert(key.clone(), id);
        catalog.songs.insert(
            id,
            Song {
                id,
                key,
                title: song.title.clone(),
                artist: song.artist.clone(),
                album: song.album.clone(),
                duration_secs: song.duration_secs,
                external_media_id: song.external_media_id.clone(),
            },
        );
        Ok(id)
    }

    fn put_fingerprints(&self, song_id: SongId, fingerprints: &[Fingerprint]) -> Result<()> {
        let mut catalog = self.write()?;
        if !catalog.songs.contains_key(&song_id) {
            return Err(Error::invalid_input(format!("unknown song id {song_id}")));
        }
        for fingerprint in fingerprints {
            catalog
                .index
                .entry(fingerprint.hash)
                .or_default()
                .insert((song_id, fingerprint.anchor_offset));
        }
        Ok(())
    }

    fn lookup(&self, hashes: &HashSet<u32>) -> Result<Vec<FingerprintData>> {
        let catalog = self.read()?;
        let mut rows = Vec::new();
        for &hash in hashes {
            if let Some(entries) = catalog.index.get(&hash) {
                rows.extend(entries.iter().map(|&(song_id, anchor_offset)| FingerprintData {
                    fingerprint: Fingerprint {
                        hash,
                        anchor_offset,
                    },
                    song_id,
                }));
            }
        }
        Ok(rows)
    }

    fn get_songs(&self, ids: &[SongId]) -> Result<Vec<Song>> {
        let catalog = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| catalog.songs.get(id).cloned())
            .collect())
    }

    fn song_by_key(&self, key: &str) -> Result<Option<Song>> {
        let catalog = self.read()?;
        Ok(catalog
            .keys
            .get(key)
            .and_then(|id| catalog.songs.get(id))
            .cloned())
    }

    fn set_external_media_id(&self, song_id: SongId, media_id: &str) -> Result<()> {
        let mut catalog = self.write()?;
        let song = catalog
            .songs
            .get_mut(&song_id)
            .ok_or_else(|| Error::invalid_input(format!("unknown song id {song_id}")))?;
        song.external_media_id = Some(media_id.to_string());
        Ok(())
    }

    fn delete_song(&self, song_id: SongId) -> Result<()> {
        let mut catalog = self.write()?;
        if let Some(song) = catalog.songs.remove(&song_id) {
            catalog.keys.remove(&song.key);
        }
        catalog.index.retain(|_, entries| {
            entries.retain(|(id, _)| *id != song_id);
            !entries.is_empty()
        });
        Ok(())
    }

    fn song_count(&self) -> Result<usize> {
        Ok(self.read()?.songs.len())
    }
}
