use std::{fs::File, io::BufReader, path::Path};

use tracing::debug;

use crate::error::{Error, Result};

/// Mono audio with amplitudes normalized to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub sample: Vec<f32>,
    pub sample_rate: usize,
}

impl Sample {
    pub fn new(sample: Vec<f32>, sample_rate: usize) -> Self {
        Sample {
            sample,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample.len() as f64 / self.sample_rate as f64
    }

    pub fn low_pass_filter(&self, cutoff_freq: f32) -> Sample {
        // IIR low pass filter
        // y[n] = alpha * x[n] + (1.0 - alpha) * y[n-1]

        let fc = cutoff_freq / self.sample_rate as f32;
        let alpha = 2.0 * std::f32::consts::PI * fc / (2.0 * std::f32::consts::PI * fc + 1.0);

        let mut filtered = Vec::with_capacity(self.sample.len());
        let mut previous = match self.sample.first() {
            Some(&first) => first,
            None => return Sample::new(Vec::new(), self.sample_rate),
        };
        filtered.push(previous);

        for &x in &self.sample[1..] {
            previous = alpha * x + (1.0 - alpha) * previous;
            filtered.push(previous);
        }

        Sample::new(filtered, self.sample_rate)
    }

    pub fn downsample(&self, factor: usize) -> Sample {
        if factor <= 1 {
            return self.clone();
        }
        /*
            When downsampling by a factor, the Nyquist frequency of the new sample rate
            will be (sample_rate/factor)/2. To prevent aliasing, we need to filter out
            frequencies above this threshold. Using 0.45 instead of 0.5 provides a small
            margin to account for the non-ideal nature of our simple filter.
        */
        let cutoff_freq = (self.sample_rate / factor) as f32 * 0.45;
        let filtered = self.low_pass_filter(cutoff_freq);

        let downsampled = filtered.sample.iter().step_by(factor).copied().collect();
        Sample::new(downsampled, self.sample_rate / factor)
    }

    /// Decodes an MP3 or WAV file, chosen by extension.
    pub fn read(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let sample = match extension.as_deref() {
            Some("mp3") => Self::read_mp3(path)?,
            Some("wav") => Self::read_wav(path)?,
            _ => return Err(Error::decode(path, "unsupported format (expected mp3 or wav)")),
        };
        debug!(
            path = %path.display(),
            samples = sample.sample.len(),
            sample_rate = sample.sample_rate,
            "decoded audio"
        );
        Ok(sample)
    }

    pub fn read_mp3(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut decoder = minimp3::Decoder::new(reader);

        let mut mono_samples = Vec::new();
        let mut sampling_rate = 0;

        loop {
            let minimp3::Frame {
                data,
                sample_rate,
                channels,
                ..
            } = match decoder.next_frame() {
                Ok(frame) => frame,
                Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => break,
                Err(minimp3::Error::SkippedData) => continue,
                Err(err) => return Err(Error::decode(path, format!("{err:?}"))),
            };

            if sampling_rate == 0 {
                sampling_rate = sample_rate;
            }
            if channels == 0 {
                return Err(Error::decode(path, "frame without channels"));
            }
            let scale = channels as f32 * 32768.0;
            mono_samples.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().map(|&s| s as f32).sum::<f32>() / scale),
            );
        }

        if sampling_rate <= 0 {
            return Err(Error::decode(path, "no audio frames"));
        }
        Ok(Sample::new(mono_samples, sampling_rate as usize))
    }

    pub fn read_wav(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path).map_err(|e| Error::decode(path, e))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(Error::decode(path, "zero channels"));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::decode(path, e))?,
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| Error::decode(path, e))?
            }
        };

        let mono = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Ok(Sample::new(mono, spec.sample_rate as usize))
    }
}
