use rayon::prelude::*;

use crate::spectrogram::Spectrogram;

/// A local maximum of the spectrogram.
///
/// Field order gives the derived `Ord` the scan order: frame first, then bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Peak {
    pub frame: u32,
    pub freq: u32,
}

/// Finds every point at or above `threshold` that dominates its
/// `(2 * radius + 1)^2` neighborhood (clipped at the edges).
///
/// Equal magnitudes go to whichever point is scanned first: a candidate must
/// be strictly louder than neighbors scanned before it (earlier frame, or same
/// frame and lower bin) and at least as loud as the ones scanned after.
/// Output is ordered by frame, then bin.
pub fn find_peaks(spectrogram: &Spectrogram, threshold: f32, radius: usize) -> Vec<Peak> {
    let frames = spectrogram.frame_count();
    let bins = spectrogram.bin_count();
    if frames == 0 || bins == 0 {
        return Vec::new();
    }

    let per_frame: Vec<Vec<Peak>> = (0..frames)
        .into_par_iter()
        .map(|frame| {
            (0..bins)
                .filter(|&bin| is_peak(spectrogram, frame, bin, threshold, radius))
                .map(|bin| Peak {
                    frame: frame as u32,
                    freq: bin as u32,
                })
                .collect()
        })
        .collect();

    per_frame.into_iter().flatten().collect()
}

fn is_peak(
    spectrogram: &Spectrogram,
    frame: usize,
    bin: usize,
    threshold: f32,
    radius: usize,
) -> bool {
    let value = spectrogram.magnitude(frame, bin);
    if value < threshold {
        return false;
    }

    let frame_lo = frame.saturating_sub(radius);
    let frame_hi = frame.saturating_add(radius).min(spectrogram.frame_count() - 1);
    let bin_lo = bin.saturating_sub(radius);
    let bin_hi = bin.saturating_add(radius).min(spectrogram.bin_count() - 1);

    for t in frame_lo..=frame_hi {
        let row = spectrogram.frame(t);
        for f in bin_lo..=bin_hi {
            if t == frame && f == bin {
                continue;
            }
            let scanned_before = t < frame || (t == frame && f < bin);
            let other = row[f];
            if other > value || (scanned_before && other == value) {
                return false;
            }
        }
    }
    true
}
