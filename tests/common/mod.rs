#![allow(dead_code)]

use std::f32::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng};
use shezem_rs::{FingerprintConfig, Sample};

pub const SAMPLE_RATE: usize = 8000;
pub const NOTE_LEN: usize = 2048;

pub fn test_config() -> FingerprintConfig {
    FingerprintConfig {
        window_size: 1024,
        hop_size: 512,
        amplitude_threshold: 1.0,
        neighborhood: 5,
        fan_out: 10,
        min_delta: 0,
        max_delta: 200,
        downsample: 1,
    }
}

/// A sequence of decaying two-tone notes with seeded random pitches.
pub fn synth_song(seed: u64, notes: usize) -> Sample {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(notes * NOTE_LEN);

    for _ in 0..notes {
        let f1: f32 = rng.gen_range(200.0..1800.0);
        let f2: f32 = rng.gen_range(1900.0..3600.0);
        for i in 0..NOTE_LEN {
            let t = i as f32 / SAMPLE_RATE as f32;
            let envelope = (-3.0 * i as f32 / NOTE_LEN as f32).exp();
            let value = 0.3 * (2.0 * PI * f1 * t).sin() + 0.2 * (2.0 * PI * f2 * t).sin();
            samples.push(value * envelope);
        }
    }
    Sample::new(samples, SAMPLE_RATE)
}

pub fn excerpt(sample: &Sample, start: usize, len: usize) -> Sample {
    let end = (start + len).min(sample.sample.len());
    Sample::new(sample.sample[start..end].to_vec(), sample.sample_rate)
}

pub fn with_noise(sample: &Sample, amplitude: f32, seed: u64) -> Sample {
    let mut rng = StdRng::seed_from_u64(seed);
    let noisy = sample
        .sample
        .iter()
        .map(|v| v + rng.gen_range(-amplitude..amplitude))
        .collect();
    Sample::new(noisy, sample.sample_rate)
}
