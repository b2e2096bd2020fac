use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::Result,
    fingerprint::{Fingerprint, FingerprintData},
    store::{FingerprintStore, SongId},
};

/// A scored but not yet resolved candidate song.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub song_id: SongId,
    /// Size of the dominant offset bucket.
    pub score: u32,
    /// Dominant `stored - query` anchor offset, in frames.
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub song_id: SongId,
    pub title: String,
    pub artist: String,
    pub score: u32,
    pub external_media_id: Option<String>,
    /// Frame position of the query's start inside the matched song.
    pub offset: i64,
}

/*
    A true match lines up many hashes at the same time offset between the query and the stored
    recording, while random hash collisions from unrelated songs scatter across offsets. For each
    candidate song we therefore histogram `stored_offset - query_offset` over every pair of query
    and stored fingerprints that share a hash, and score the song by its tallest bucket.

    A stored fingerprint is paired with every query fingerprint carrying the same hash, so repeated
    hashes in the query all vote.
*/
pub fn score_candidates(query: &[Fingerprint], stored: &[FingerprintData]) -> Vec<Candidate> {
    let mut query_offsets: HashMap<u32, Vec<u32>> = HashMap::new();
    for fingerprint in query {
        query_offsets
            .entry(fingerprint.hash)
            .or_default()
            .push(fingerprint.anchor_offset);
    }

    let mut histograms: HashMap<SongId, HashMap<i64, u32>> = HashMap::new();
    for row in stored {
        let Some(offsets) = query_offsets.get(&row.fingerprint.hash) else {
            continue;
        };
        let histogram = histograms.entry(row.song_id).or_default();
        for &query_offset in offsets {
            let delta = row.fingerprint.anchor_offset as i64 - query_offset as i64;
            *histogram.entry(delta).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<Candidate> = histograms
        .into_iter()
        .filter_map(|(song_id, histogram)| {
            histogram
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(offset, score)| Candidate {
                    song_id,
                    score,
                    offset,
                })
        })
        .collect();

    candidates.sort_unstable_by(|a, b| b.score.cmp(&a.score).then(a.song_id.cmp(&b.song_id)));
    candidates
}

/// Looks the query's hashes up in one batch, scores every candidate and
/// resolves the best `rank` of them with one metadata fetch.
pub fn rank_matches<S>(store: &S, query: &[Fingerprint], rank: usize) -> Result<Vec<Match>>
where
    S: FingerprintStore + ?Sized,
{
    if query.is_empty() || rank == 0 {
        return Ok(Vec::new());
    }

    let hashes: HashSet<u32> = query.iter().map(|fp| fp.hash).collect();
    let stored = store.lookup(&hashes)?;
    debug!(
        hashes = hashes.len(),
        hits = stored.len(),
        "looked up query hashes"
    );

    let mut candidates = score_candidates(query, &stored);
    candidates.truncate(rank);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<SongId> = candidates.iter().map(|c| c.song_id).collect();
    let mut songs: HashMap<SongId, _> = store
        .get_songs(&ids)?
        .into_iter()
        .map(|song| (song.id, song))
        .collect();

    Ok(candidates
        .into_iter()
        .filter_map(|candidate| match songs.remove(&candidate.song_id) {
            Some(song) => Some(Match {
                song_id: song.id,
                title: song.title,
                artist: song.artist,
                score: candidate.score,
                external_media_id: song.external_media_id,
                offset: candidate.offset,
            }),
            None => {
                warn!(song_id = candidate.song_id, "candidate has no catalog entry");
                None
            }
        })
        .collect())
}
