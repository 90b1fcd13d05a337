//! Capture and framing parameters shared by every analyzer.

use crate::error::{AnalyzerError, Result};

/// Capture sample rate (Hz)
pub const SAMPLE_RATE: u32 = 44_100;

/// Samples per frame, also the FFT length
pub const FRAME_LEN: usize = 1024;

/// Samples shared between consecutive loudness frames (50%)
pub const LOUDNESS_OVERLAP: usize = 512;

/// Weight kept on the previous smoothed loudness value
pub const LOUDNESS_SMOOTHING: f32 = 0.8;

/// Bytes per PCM16 sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// How much of each captured frame is decoded before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeSpan {
    /// Decode and DC-correct every sample of the frame.
    #[default]
    Full,
    /// Decode only the first `frame_len / 2` samples and leave the upper half
    /// of the transform input at zero. Bin 0 also carries the Nyquist term,
    /// `sqrt(re₀² + re_nyq²)`, as a packed real-FFT layout would report it.
    HalfFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Sample rate of the incoming PCM (Hz)
    pub sample_rate: u32,

    /// Frame length in samples (power of two, equal to the FFT length)
    pub frame_len: usize,

    /// Samples carried over from one frame into the next
    pub overlap: usize,

    /// Exponential smoothing factor for loudness, in [0, 1)
    pub smoothing: f32,

    pub decode_span: DecodeSpan,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self::spectrum()
    }
}

impl AnalyzerConfig {
    /// Non-overlapped 1024-sample frames for the magnitude spectrum.
    pub fn spectrum() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_len: FRAME_LEN,
            overlap: 0,
            smoothing: LOUDNESS_SMOOTHING,
            decode_span: DecodeSpan::Full,
        }
    }

    /// 1024-sample frames with 512 samples of overlap for smoothed RMS.
    pub fn loudness() -> Self {
        Self {
            overlap: LOUDNESS_OVERLAP,
            ..Self::spectrum()
        }
    }

    /// Fresh samples read per frame once the first frame is filled.
    pub fn hop(&self) -> usize {
        self.frame_len - self.overlap
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_len * BYTES_PER_SAMPLE
    }

    /// Number of reported magnitude bins (DC up to, not including, Nyquist).
    pub fn bin_count(&self) -> usize {
        self.frame_len / 2
    }

    /// Centre frequency of a magnitude bin (Hz)
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.frame_len as f32
    }

    /// Nearest magnitude bin for a frequency (Hz)
    pub fn frequency_bin(&self, hz: f32) -> usize {
        let bin = (hz * self.frame_len as f32 / self.sample_rate as f32).round();
        (bin.max(0.0) as usize).min(self.bin_count().saturating_sub(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AnalyzerError::InvalidConfig(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if self.frame_len < 2 || !self.frame_len.is_power_of_two() {
            return Err(AnalyzerError::InvalidConfig(format!(
                "frame length must be a power of two, got {}",
                self.frame_len
            )));
        }
        if self.overlap >= self.frame_len {
            return Err(AnalyzerError::InvalidConfig(format!(
                "overlap {} must be smaller than the frame length {}",
                self.overlap, self.frame_len
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(AnalyzerError::InvalidConfig(format!(
                "smoothing factor must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}
