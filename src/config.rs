//! Tunables for fingerprinting and searching.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    fingerprint::{MAX_DELTA, MAX_FREQ_BIN},
    spectrogram::WindowSize,
};

/// Parameters of the samples -> fingerprints pipeline.
///
/// A catalog only matches queries fingerprinted with the same values, so the
/// config used at indexing time must also be used when searching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// FFT window length in samples (power of two).
    pub window_size: usize,
    /// Stride between successive windows in samples.
    pub hop_size: usize,
    /// Magnitude floor below which a bin can never be a peak.
    pub amplitude_threshold: f32,
    /// Peak neighborhood radius, in frames and bins.
    pub neighborhood: usize,
    /// Each anchor peak is paired with up to `fan_out - 1` following peaks.
    pub fan_out: usize,
    /// Smallest anchor-to-point distance in frames that produces a hash.
    pub min_delta: u32,
    /// Largest anchor-to-point distance in frames that produces a hash.
    pub max_delta: u32,
    /// Decimation factor applied to decoded audio before fingerprinting.
    pub downsample: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            window_size: 4096,
            hop_size: 2048,
            amplitude_threshold: 10.0,
            neighborhood: 20,
            fan_out: 15,
            min_delta: 0,
            max_delta: 200,
            downsample: 1,
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> Result<()> {
        let window = WindowSize::try_from(self.window_size)?;
        if self.hop_size == 0 {
            return Err(Error::invalid_input("hop size must be positive"));
        }
        if usize::from(window) / 2 > MAX_FREQ_BIN as usize + 1 {
            return Err(Error::invalid_input(format!(
                "window size {} yields more bins than the hash can encode",
                self.window_size
            )));
        }
        if self.fan_out < 2 {
            return Err(Error::invalid_input("fan-out must be at least 2"));
        }
        if self.min_delta > self.max_delta {
            return Err(Error::invalid_input(format!(
                "delta range [{}, {}] is empty",
                self.min_delta, self.max_delta
            )));
        }
        if self.max_delta > MAX_DELTA {
            return Err(Error::EncodingOverflow {
                field: "delta",
                value: self.max_delta,
                max: MAX_DELTA,
            });
        }
        if self.downsample == 0 {
            return Err(Error::invalid_input("downsample factor must be positive"));
        }
        if !self.amplitude_threshold.is_finite() {
            return Err(Error::invalid_input("amplitude threshold must be finite"));
        }
        Ok(())
    }

    /// Per-call override of the window and hop sizes.
    pub fn with_window(mut self, window_size: usize, hop_size: usize) -> Self {
        self.window_size = window_size;
        self.hop_size = hop_size;
        self
    }

    /// Reads a JSON config; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: FingerprintConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// How many ranked matches to resolve and return.
    pub rank: usize,
    /// Budget for the whole fingerprint + lookup + scoring call.
    pub timeout: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rank: 5,
            timeout: None,
        }
    }
}
