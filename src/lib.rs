//! Acoustic fingerprinting and catalog matching.
//!
//! Audio is turned into a Hann-windowed magnitude spectrogram, local maxima
//! are picked out of it, and nearby maxima are paired into compact hashes.
//! Recordings are indexed by storing those hashes; a query clip is identified
//! by looking its hashes up in one batch and ranking the candidate songs by how
//! many hashes agree on a single time offset.

use std::{
    fs,
    path::Path,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod peaks;
pub mod sample;
pub mod spectrogram;
pub mod store;

pub use cancel::CancelToken;
pub use config::{FingerprintConfig, SearchConfig};
pub use error::{Error, Result};
pub use matcher::Match;
pub use sample::Sample;
pub use store::{FingerprintStore, NewSong, Song, SongId};

use fingerprint::fingerprint_samples;
use matcher::rank_matches;

/// Outcome of one recognition call.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub matches: Vec<Match>,
    pub elapsed: Duration,
}

/// Fingerprints `sample` and stores it as a new catalog song.
///
/// Fingerprinting happens before anything is written. If storing the
/// fingerprints fails, the song record is removed again so a song is either
/// fully indexed or absent.
pub fn ingest<S>(
    store: &S,
    song: &NewSong,
    sample: &Sample,
    config: &FingerprintConfig,
    cancel: &CancelToken,
) -> Result<SongId>
where
    S: FingerprintStore + ?Sized,
{
    if sample.sample.is_empty() {
        return Err(Error::invalid_input(format!(
            "no samples to ingest for '{}'",
            song.title
        )));
    }

    let prepared = sample.downsample(config.downsample);
    let fingerprints = fingerprint_samples(&prepared.sample, config, cancel)?;
    cancel.check()?;

    let song_id = store.insert_song(song)?;
    if let Err(err) = store.put_fingerprints(song_id, &fingerprints) {
        if let Err(cleanup) = store.delete_song(song_id) {
            warn!(song_id, error = %cleanup, "could not remove partially ingested song");
        }
        return Err(err);
    }

    info!(
        song_id,
        fingerprints = fingerprints.len(),
        "indexed '{}' by {}",
        song.title,
        song.artist
    );
    Ok(song_id)
}

/// Identifies `sample` against the catalog.
///
/// Cancellation (or the search timeout) is honored for the whole
/// fingerprint, lookup and scoring sequence; a cancelled call returns
/// [`Error::Cancelled`] and no partial matches.
pub fn recognize<S>(
    store: &S,
    sample: &Sample,
    config: &FingerprintConfig,
    search: &SearchConfig,
    cancel: &CancelToken,
) -> Result<Recognition>
where
    S: FingerprintStore + ?Sized,
{
    let start = Instant::now();
    let cancel = match search.timeout {
        Some(timeout) => cancel.child_with_timeout(timeout),
        None => cancel.clone(),
    };

    let prepared = sample.downsample(config.downsample);
    let fingerprints = fingerprint_samples(&prepared.sample, config, &cancel)?;
    cancel.check()?;

    let matches = rank_matches(store, &fingerprints, search.rank)?;
    cancel.check()?;

    let elapsed = start.elapsed();
    debug!(
        matches = matches.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "recognition finished"
    );
    Ok(Recognition { matches, elapsed })
}

/// Catalog metadata guessed from a file name of the form `Artist - Title.ext`.
pub fn song_from_path(path: &Path) -> NewSong {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match stem.split_once(" - ") {
        Some((artist, title)) => NewSong::new(title.trim(), artist.trim()),
        None => NewSong::new(stem.trim(), "Unknown Artist"),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3") || e.eq_ignore_ascii_case("wav"))
}

/// Indexes every MP3/WAV file directly inside `dir`.
///
/// Undecodable files are logged and counted as failed; songs whose key is
/// already in the catalog are skipped. Store failures abort the run.
pub fn index_folder<S>(
    store: &S,
    dir: &Path,
    config: &FingerprintConfig,
    cancel: &CancelToken,
) -> Result<IndexSummary>
where
    S: FingerprintStore + ?Sized,
{
    config.validate()?;

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_audio_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    info!("found {} audio files in {}", paths.len(), dir.display());

    let mut summary = IndexSummary::default();
    for path in paths {
        cancel.check()?;

        let mut song = song_from_path(&path);
        if store.song_by_key(&song.key())?.is_some() {
            debug!(path = %path.display(), "already indexed");
            summary.skipped += 1;
            continue;
        }

        let sample = match Sample::read(&path) {
            Ok(sample) => sample,
            Err(err) => {
                warn!("skipping {}: {}", path.display(), err);
                summary.failed += 1;
                continue;
            }
        };
        song.duration_secs = sample.duration_secs();

        match ingest(store, &song, &sample, config, cancel) {
            Ok(_) => summary.added += 1,
            Err(Error::DuplicateSong(key)) => {
                debug!(key = %key, "already indexed");
                summary.skipped += 1;
            }
            Err(err @ (Error::InvalidInput(_) | Error::EncodingOverflow { .. })) => {
                warn!("skipping {}: {}", path.display(), err);
                summary.failed += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        fingerprint::{Fingerprint, FingerprintData},
        store::MemoryStore,
    };

    fn chirp_sample(len: usize) -> Sample {
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / 8000.0;
                (2.0 * std::f32::consts::PI * (300.0 + 400.0 * t) * t).sin() * 0.5
            })
            .collect();
        Sample::new(samples, 8000)
    }

    fn small_config() -> FingerprintConfig {
        FingerprintConfig {
            window_size: 512,
            hop_size: 256,
            amplitude_threshold: 1.0,
            neighborhood: 4,
            ..Default::default()
        }
    }

    #[test]
    fn parses_artist_and_title_from_file_name() {
        let song = song_from_path(Path::new("/music/Daft Punk - One More Time.mp3"));
        assert_eq!(song.artist, "Daft Punk");
        assert_eq!(song.title, "One More Time");

        let song = song_from_path(Path::new("untitled.wav"));
        assert_eq!(song.artist, "Unknown Artist");
        assert_eq!(song.title, "untitled");
    }

    #[test]
    fn ingest_rejects_empty_samples() {
        let store = MemoryStore::new();
        let result = ingest(
            &store,
            &NewSong::new("Empty", "Nobody"),
            &Sample::new(Vec::new(), 8000),
            &small_config(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.song_count().unwrap(), 0);
    }

    /// Accepts songs but refuses every fingerprint write.
    struct BrokenWrites(MemoryStore);

    impl FingerprintStore for BrokenWrites {
        fn insert_song(&self, song: &NewSong) -> Result<SongId> {
            self.0.insert_song(song)
        }
        fn put_fingerprints(&self, _: SongId, _: &[Fingerprint]) -> Result<()> {
            Err(Error::StoreUnavailable("disk full".into()))
        }
        fn lookup(&self, hashes: &HashSet<u32>) -> Result<Vec<FingerprintData>> {
            self.0.lookup(hashes)
        }
        fn get_songs(&self, ids: &[SongId]) -> Result<Vec<Song>> {
            self.0.get_songs(ids)
        }
        fn song_by_key(&self, key: &str) -> Result<Option<Song>> {
            self.0.song_by_key(key)
        }
        fn set_external_media_id(&self, song_id: SongId, media_id: &str) -> Result<()> {
            self.0.set_external_media_id(song_id, media_id)
        }
        fn delete_song(&self, song_id: SongId) -> Result<()> {
            self.0.delete_song(song_id)
        }
        fn song_count(&self) -> Result<usize> {
            self.0.song_count()
        }
    }

    #[test]
    fn failed_fingerprint_write_leaves_no_song_behind() {
        let store = BrokenWrites(MemoryStore::new());
        let result = ingest(
            &store,
            &NewSong::new("Chirp", "Synth"),
            &chirp_sample(16000),
            &small_config(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        assert_eq!(store.song_count().unwrap(), 0);
    }

    #[test]
    fn cancelled_recognition_returns_no_matches() {
        let store = MemoryStore::new();
        let config = small_config();
        ingest(
            &store,
            &NewSong::new("Chirp", "Synth"),
            &chirp_sample(16000),
            &config,
            &CancelToken::new(),
        )
        .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = recognize(
            &store,
            &chirp_sample(16000),
            &config,
            &SearchConfig::default(),
            &cancel,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn expired_timeout_cancels_recognition() {
        let store = MemoryStore::new();
        let search = SearchConfig {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        let result = recognize(
            &store,
            &chirp_sample(16000),
            &small_config(),
            &search,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn short_query_yields_empty_recognition() {
        let store = MemoryStore::new();
        let recognition = recognize(
            &store,
            &Sample::new(vec![0.1; 100], 8000),
            &small_config(),
            &SearchConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(recognition.matches.is_empty());
    }
}
