use tracing::debug;

use crate::{
    cancel::CancelToken,
    config::FingerprintConfig,
    error::{Error, Result},
    peaks::{Peak, find_peaks},
    spectrogram::generate_spectrogram,
    store::SongId,
};

/*
    Hash layout, most significant bit first:
        11 bits anchor frequency bin
        11 bits point frequency bin
        10 bits frame delta
*/
const FREQ_BITS: u32 = 11;
const DELTA_BITS: u32 = 10;

pub const MAX_FREQ_BIN: u32 = (1 << FREQ_BITS) - 1;
pub const MAX_DELTA: u32 = (1 << DELTA_BITS) - 1;

/// A fingerprint attached to a catalog song, as persisted by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FingerprintData {
    pub fingerprint: Fingerprint,
    pub song_id: SongId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub hash: u32,
    /// Frame index of the anchor peak.
    pub anchor_offset: u32,
}

pub fn encode_hash(anchor_freq: u32, point_freq: u32, delta: u32) -> Result<u32> {
    check_field("anchor frequency", anchor_freq, MAX_FREQ_BIN)?;
    check_field("point frequency", point_freq, MAX_FREQ_BIN)?;
    check_field("delta", delta, MAX_DELTA)?;
    Ok((anchor_freq << (FREQ_BITS + DELTA_BITS)) | (point_freq << DELTA_BITS) | delta)
}

/// Inverse of [`encode_hash`]: `(anchor_freq, point_freq, delta)`.
pub fn decode_hash(hash: u32) -> (u32, u32, u32) {
    let anchor_freq = hash >> (FREQ_BITS + DELTA_BITS);
    let point_freq = (hash >> DELTA_BITS) & MAX_FREQ_BIN;
    let delta = hash & MAX_DELTA;
    (anchor_freq, point_freq, delta)
}

fn check_field(field: &'static str, value: u32, max: u32) -> Result<()> {
    if value > max {
        return Err(Error::EncodingOverflow { field, value, max });
    }
    Ok(())
}

/// Pairs every anchor with the next `fan_out - 1` peaks and hashes each pair
/// whose frame distance lies in `[min_delta, max_delta]`.
///
/// `peaks` must be in scan order (as returned by [`find_peaks`]).
pub fn generate_fingerprints(
    peaks: &[Peak],
    fan_out: usize,
    min_delta: u32,
    max_delta: u32,
) -> Result<Vec<Fingerprint>> {
    let mut fingerprints = Vec::new();

    for (i, anchor) in peaks.iter().enumerate() {
        let end = i.saturating_add(fan_out).min(peaks.len());
        for point in &peaks[(i + 1).min(end)..end] {
            let Some(delta) = point.frame.checked_sub(anchor.frame) else {
                continue;
            };
            if delta < min_delta || delta > max_delta {
                continue;
            }
            fingerprints.push(Fingerprint {
                hash: encode_hash(anchor.freq, point.freq, delta)?,
                anchor_offset: anchor.frame,
            });
        }
    }
    Ok(fingerprints)
}

/// Full samples -> spectrogram -> peaks -> fingerprints pipeline.
pub fn fingerprint_samples(
    samples: &[f32],
    config: &FingerprintConfig,
    cancel: &CancelToken,
) -> Result<Vec<Fingerprint>> {
    config.validate()?;

    let spectrogram = generate_spectrogram(samples, config.window_size, config.hop_size, cancel)?;
    cancel.check()?;

    let peaks = find_peaks(&spectrogram, config.amplitude_threshold, config.neighborhood);
    cancel.check()?;

    let fingerprints =
        generate_fingerprints(&peaks, config.fan_out, config.min_delta, config.max_delta)?;

    debug!(
        frames = spectrogram.frame_count(),
        peaks = peaks.len(),
        fingerprints = fingerprints.len(),
        "fingerprinted {} samples",
        samples.len()
    );
    Ok(fingerprints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(frame: u32, freq: u32) -> Peak {
        Peak { frame, freq }
    }

    #[test]
    fn hash_round_trips_across_field_ranges() {
        for anchor in [0, 1, 77, 1024, MAX_FREQ_BIN] {
            for point in [0, 3, 512, MAX_FREQ_BIN] {
                for delta in [0, 1, 200, MAX_DELTA] {
                    let hash = encode_hash(anchor, point, delta).unwrap();
                    assert_eq!(decode_hash(hash), (anchor, point, delta));
                }
            }
        }
    }

    #[test]
    fn distinct_triples_give_distinct_hashes() {
        let a = encode_hash(10, 20, 5).unwrap();
        let b = encode_hash(20, 10, 5).unwrap();
        let c = encode_hash(10, 20, 6).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn out_of_range_fields_overflow() {
        assert!(matches!(
            encode_hash(MAX_FREQ_BIN + 1, 0, 0),
            Err(Error::EncodingOverflow { field: "anchor frequency", .. })
        ));
        assert!(matches!(
            encode_hash(0, MAX_FREQ_BIN + 1, 0),
            Err(Error::EncodingOverflow { field: "point frequency", .. })
        ));
        assert!(matches!(
            encode_hash(0, 0, MAX_DELTA + 1),
            Err(Error::EncodingOverflow { field: "delta", .. })
        ));
    }

    #[test]
    fn fan_out_bounds_pairs_per_anchor() {
        let peaks: Vec<Peak> = (0..10).map(|i| peak(i, 100 + i)).collect();
        let fingerprints = generate_fingerprints(&peaks, 3, 0, 200).unwrap();
        // Each anchor pairs with at most two followers; the last anchor has none.
        assert_eq!(fingerprints.len(), 8 * 2 + 1);
        assert_eq!(
            fingerprints[0],
            Fingerprint {
                hash: encode_hash(100, 101, 1).unwrap(),
                anchor_offset: 0,
            }
        );
        assert_eq!(fingerprints[1].hash, encode_hash(100, 102, 2).unwrap());
    }

    #[test]
    fn huge_fan_out_pairs_with_available_peaks_only() {
        let peaks: Vec<Peak> = (0..6).map(|i| peak(i, 40 + i)).collect();
        let fingerprints = generate_fingerprints(&peaks, usize::MAX, 0, 200).unwrap();
        assert_eq!(fingerprints.len(), 6 * 5 / 2);
        assert_eq!(
            generate_fingerprints(&peaks, 1_000_000_000, 0, 200).unwrap(),
            fingerprints
        );
    }

    #[test]
    fn deltas_outside_range_are_skipped() {
        let peaks = vec![peak(0, 5), peak(0, 9), peak(3, 5), peak(50, 5)];
        let fingerprints = generate_fingerprints(&peaks, 4, 1, 10).unwrap();
        let triples: Vec<_> = fingerprints.iter().map(|f| decode_hash(f.hash)).collect();
        assert_eq!(triples, vec![(5, 5, 3), (9, 5, 3)]);
    }

    #[test]
    fn hashes_ignore_absolute_time() {
        let original = vec![peak(4, 30), peak(6, 40), peak(9, 35)];
        let shifted: Vec<Peak> = original.iter().map(|p| peak(p.frame + 100, p.freq)).collect();
        let a = generate_fingerprints(&original, 3, 0, 200).unwrap();
        let b = generate_fingerprints(&shifted, 3, 0, 200).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.anchor_offset + 100, y.anchor_offset);
        }
    }

    #[test]
    fn wide_bins_fail_loudly() {
        let peaks = vec![peak(0, 3000), peak(1, 10)];
        assert!(matches!(
            generate_fingerprints(&peaks, 2, 0, 10),
            Err(Error::EncodingOverflow { .. })
        ));
    }

    #[test]
    fn silence_has_no_fingerprints() {
        let config = FingerprintConfig::default().with_window(256, 128);
        let fingerprints =
            fingerprint_samples(&vec![0.0; 8192], &config, &CancelToken::new()).unwrap();
        assert!(fingerprints.is_empty());
    }

    #[test]
    fn unbounded_fan_out_and_neighborhood_still_run() {
        let config = FingerprintConfig {
            fan_out: usize::MAX,
            neighborhood: usize::MAX,
            ..FingerprintConfig::default().with_window(256, 128)
        };
        config.validate().unwrap();
        let tone: Vec<f32> = (0..4096)
            .map(|i| (i as f32 * 0.3).sin() * (1.0 + i as f32 / 4096.0))
            .collect();
        let fingerprints = fingerprint_samples(&tone, &config, &CancelToken::new()).unwrap();
        // A neighborhood covering the whole grid leaves a single peak.
        assert!(fingerprints.is_empty());
    }
}
