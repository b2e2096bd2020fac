use std::f32::consts::PI;

use microfft::Complex32;
use rayon::prelude::*;

use crate::{
    cancel::CancelToken,
    error::{Error, Result},
};

/// Raised-cosine taper, `0.5 * (1 - cos(2*pi*k / (n - 1)))`.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f32;
    (0..size)
        .map(|k| 0.5 * (1.0 - (2.0 * PI * k as f32 / denom).cos()))
        .collect()
}

/// FFT lengths supported by the radix-2 real transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSize {
    S2,
    S4,
    S8,
    S16,
    S32,
    S64,
    S128,
    S256,
    S512,
    S1024,
    S2048,
    S4096,
}

impl From<WindowSize> for usize {
    fn from(window_size: WindowSize) -> Self {
        match window_size {
            WindowSize::S2 => 2,
            WindowSize::S4 => 4,
            WindowSize::S8 => 8,
            WindowSize::S16 => 16,
            WindowSize::S32 => 32,
            WindowSize::S64 => 64,
            WindowSize::S128 => 128,
            WindowSize::S256 => 256,
            WindowSize::S512 => 512,
            WindowSize::S1024 => 1024,
            WindowSize::S2048 => 2048,
            WindowSize::S4096 => 4096,
        }
    }
}

impl TryFrom<usize> for WindowSize {
    type Error = Error;

    fn try_from(size: usize) -> Result<Self> {
        match size {
            2 => Ok(WindowSize::S2),
            4 => Ok(WindowSize::S4),
            8 => Ok(WindowSize::S8),
            16 => Ok(WindowSize::S16),
            32 => Ok(WindowSize::S32),
            64 => Ok(WindowSize::S64),
            128 => Ok(WindowSize::S128),
            256 => Ok(WindowSize::S256),
            512 => Ok(WindowSize::S512),
            1024 => Ok(WindowSize::S1024),
            2048 => Ok(WindowSize::S2048),
            4096 => Ok(WindowSize::S4096),
            0 => Err(Error::invalid_input("window size must be positive")),
            other => Err(Error::invalid_input(format!(
                "window size {other} is not a power of two between 2 and 4096"
            ))),
        }
    }
}

macro_rules! rfft_into {
    ($func:path, $size:literal, $samples:expr) => {{
        let mut array: [f32; $size] = <[f32; $size]>::try_from($samples)
            .map_err(|_| Error::invalid_input("window length mismatch"))?;
        let spectrum: &mut [Complex32; $size / 2] = $func(&mut array);
        // microfft packs the Nyquist coefficient into the imaginary part of bin 0.
        spectrum[0].im = 0.0;
        spectrum.to_vec()
    }};
}

/// Real FFT of one tapered window; returns the `len / 2` lowest bins.
pub fn apply_fft(samples: &[f32], window_size: WindowSize) -> Result<Vec<Complex32>> {
    let result = match window_size {
        WindowSize::S2 => rfft_into!(microfft::real::rfft_2, 2, samples),
        WindowSize::S4 => rfft_into!(microfft::real::rfft_4, 4, samples),
        WindowSize::S8 => rfft_into!(microfft::real::rfft_8, 8, samples),
        WindowSize::S16 => rfft_into!(microfft::real::rfft_16, 16, samples),
        WindowSize::S32 => rfft_into!(microfft::real::rfft_32, 32, samples),
        WindowSize::S64 => rfft_into!(microfft::real::rfft_64, 64, samples),
        WindowSize::S128 => rfft_into!(microfft::real::rfft_128, 128, samples),
        WindowSize::S256 => rfft_into!(microfft::real::rfft_256, 256, samples),
        WindowSize::S512 => rfft_into!(microfft::real::rfft_512, 512, samples),
        WindowSize::S1024 => rfft_into!(microfft::real::rfft_1024, 1024, samples),
        WindowSize::S2048 => rfft_into!(microfft::real::rfft_2048, 2048, samples),
        WindowSize::S4096 => rfft_into!(microfft::real::rfft_4096, 4096, samples),
    };
    Ok(result)
}

/// Magnitude spectrogram stored as one flat frame-major buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    frames: usize,
    bins: usize,
    data: Vec<f32>,
}

impl Spectrogram {
    pub fn empty(bins: usize) -> Self {
        Self {
            frames: 0,
            bins,
            data: Vec::new(),
        }
    }

    /// Builds a spectrogram from explicit rows; every row must have the same length.
    pub fn from_frames(frames: Vec<Vec<f32>>) -> Result<Self> {
        let bins = frames.first().map_or(0, Vec::len);
        if frames.iter().any(|frame| frame.len() != bins) {
            return Err(Error::invalid_input("spectrogram frames differ in length"));
        }
        Ok(Self {
            frames: frames.len(),
            bins,
            data: frames.into_iter().flatten().collect(),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn bin_count(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    #[inline]
    pub fn magnitude(&self, frame: usize, bin: usize) -> f32 {
        self.data[frame * self.bins + bin]
    }

    pub fn frame(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.bins..(frame + 1) * self.bins]
    }
}

/// Number of full windows of `window` samples that fit at stride `hop`.
pub fn frame_count(sample_count: usize, window: usize, hop: usize) -> usize {
    if sample_count < window || hop == 0 {
        0
    } else {
        (sample_count - window) / hop + 1
    }
}

/// Slides a Hann-tapered window over `sample` and keeps the magnitude of the
/// lower half of each spectrum. Windows are transformed on the rayon pool,
/// each into its own row, so frame order does not depend on scheduling.
pub fn generate_spectrogram(
    sample: &[f32],
    window_size: usize,
    hop_size: usize,
    cancel: &CancelToken,
) -> Result<Spectrogram> {
    let window = WindowSize::try_from(window_size)?;
    if hop_size == 0 {
        return Err(Error::invalid_input("hop size must be positive"));
    }

    let bins = window_size / 2;
    let frames = frame_count(sample.len(), window_size, hop_size);
    if frames == 0 {
        return Ok(Spectrogram::empty(bins));
    }

    let taper = hann_window(window_size);
    let mut data = vec![0.0f32; frames * bins];

    data.par_chunks_mut(bins)
        .enumerate()
        .try_for_each(|(index, row)| -> Result<()> {
            cancel.check()?;
            let start = index * hop_size;
            let windowed: Vec<f32> = sample[start..start + window_size]
                .iter()
                .zip(&taper)
                .map(|(s, w)| s * w)
                .collect();
            let spectrum = apply_fft(&windowed, window)?;
            for (out, coefficient) in row.iter_mut().zip(&spectrum) {
                *out = coefficient.norm_sqr().sqrt();
            }
            Ok(())
        })?;

    Ok(Spectrogram { frames, bins, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn hann_window_tapers_to_zero_at_edges() {
        let window = hann_window(8);
        assert!(window[0].abs() < 1e-6);
        assert!(window[7].abs() < 1e-6);
        assert!(window.iter().all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn degenerate_hann_sizes_pass_samples_through() {
        assert!(hann_window(0).is_empty());
        assert_eq!(hann_window(1), vec![1.0]);
        assert_eq!(hann_window(2), vec![0.0, 0.0]);
    }

    #[test]
    fn short_input_gives_empty_spectrogram() {
        let spectrogram =
            generate_spectrogram(&[0.5; 100], 128, 64, &CancelToken::new()).unwrap();
        assert!(spectrogram.is_empty());
        assert_eq!(spectrogram.bin_count(), 64);
    }

    #[test]
    fn frame_count_follows_hop_arithmetic() {
        let samples = vec![0.0; 1000];
        let spectrogram = generate_spectrogram(&samples, 256, 128, &CancelToken::new()).unwrap();
        assert_eq!(spectrogram.frame_count(), (1000 - 256) / 128 + 1);
        assert_eq!(spectrogram.bin_count(), 128);
        assert_eq!(spectrogram.frame(0).len(), 128);
    }

    #[test]
    fn rejects_invalid_sizes() {
        let cancel = CancelToken::new();
        assert!(matches!(
            generate_spectrogram(&[0.0; 64], 0, 16, &cancel),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            generate_spectrogram(&[0.0; 64], 32, 0, &cancel),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            generate_spectrogram(&[0.0; 64], 24, 12, &cancel),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn tone_energy_lands_in_its_bin() {
        // 1 kHz at 8 kHz sample rate with 256-point FFT -> bin 32.
        let samples = sine(1000.0, 8000.0, 2048);
        let spectrogram = generate_spectrogram(&samples, 256, 128, &CancelToken::new()).unwrap();
        for frame in 0..spectrogram.frame_count() {
            let row = spectrogram.frame(frame);
            let loudest = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(bin, _)| bin)
                .unwrap();
            assert_eq!(loudest, 32);
        }
    }

    #[test]
    fn cancelled_token_aborts_transform() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = generate_spectrogram(&[0.1; 4096], 256, 128, &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn from_frames_rejects_ragged_rows() {
        assert!(Spectrogram::from_frames(vec![vec![1.0, 2.0], vec![1.0]]).is_err());
        let spectrogram = Spectrogram::from_frames(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(spectrogram.magnitude(1, 0), 3.0);
    }
}
