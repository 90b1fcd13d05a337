//! Smoothed RMS loudness over overlapping frames.

use crate::config::AnalyzerConfig;
use crate::error::Result;
use crate::pcm;
use crate::processing::FrameReducer;

/// Root mean square of a frame, 0 for an empty one.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Exponentially weighted moving average: `alpha * previous + (1 - alpha) * current`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoother {
    alpha: f32,
    value: f32,
}

impl Smoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, value: 0.0 }
    }

    pub fn update(&mut self, current: f32) -> f32 {
        self.value = self.alpha * self.value + (1.0 - self.alpha) * current;
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Loudness {
    /// RMS of the latest frame
    pub rms: f32,
    /// Smoothed RMS across frames
    pub smoothed: f32,
}

pub struct LoudnessReducer {
    samples: Vec<f32>,
    smoother: Smoother,
}

impl FrameReducer for LoudnessReducer {
    type Output = Loudness;

    const NAME: &'static str = "loudness";

    fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            samples: vec![0.0; config.frame_len],
            smoother: Smoother::new(config.smoothing),
        }
    }

    fn initial(&self) -> Loudness {
        Loudness::default()
    }

    fn reduce(&mut self, frame: &[u8]) -> Result<Loudness> {
        let decoded = pcm::decode_pcm16_le(frame, &mut self.samples);
        let rms = rms(&self.samples[..decoded]);
        let smoothed = self.smoother.update(rms);
        Ok(Loudness { rms, smoothed })
    }
}
