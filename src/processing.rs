use realfft::{RealFftPlanner, RealToComplex};
use rustfft::{num_complex::Complex, num_traits::Zero};
use std::sync::Arc;

use crate::config::{AnalyzerConfig, DecodeSpan};
use crate::error::Result;
use crate::pcm;

/// Per-frame strategy plugged into the shared capture loop.
pub trait FrameReducer: Send + 'static {
    type Output: Send + Sync + 'static;

    /// Short name used for the worker thread and log lines.
    const NAME: &'static str;

    fn from_config(config: &AnalyzerConfig) -> Self
    where
        Self: Sized;

    /// Value readers see before the first frame arrives.
    fn initial(&self) -> Self::Output;

    /// Turns one frame of little-endian PCM16 bytes into an output value.
    fn reduce(&mut self, frame: &[u8]) -> Result<Self::Output>;
}

/// Magnitude spectrum of one frame.
///
/// The transform is unnormalized: a bin-aligned sinusoid of peak amplitude
/// `A` shows up as `A * frame_len / 2` in its bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// `frame_len / 2` bins from DC up to, not including, Nyquist
    pub magnitudes: Vec<f32>,
    /// Mean removed from the decoded samples before the transform
    pub dc_offset: f32,
    pub sample_rate: u32,
    pub frame_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: usize,
    pub frequency_hz: f32,
    pub magnitude: f32,
}

impl Spectrum {
    pub fn silent(config: &AnalyzerConfig) -> Self {
        Self {
            magnitudes: vec![0.0; config.bin_count()],
            dc_offset: 0.0,
            sample_rate: config.sample_rate,
            frame_len: config.frame_len,
        }
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.frame_len as f32
    }

    /// Strongest bin, or `None` for an all-zero spectrum.
    pub fn peak(&self) -> Option<Peak> {
        let (bin, &magnitude) = self
            .magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;

        if magnitude <= 0.0 {
            return None;
        }
        Some(Peak {
            bin,
            frequency_hz: self.bin_frequency(bin),
            magnitude,
        })
    }
}

/// Decode → DC removal → real FFT → magnitudes.
pub struct SpectrumReducer {
    fft: Arc<dyn RealToComplex<f32>>,
    decode_span: DecodeSpan,
    sample_rate: u32,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
}

impl SpectrumReducer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.frame_len);
        let output = fft.make_output_vec();

        Self {
            fft,
            decode_span: config.decode_span,
            sample_rate: config.sample_rate,
            input: vec![0.0; config.frame_len],
            output,
        }
    }

    pub fn compute_fft(&mut self, frame: &[u8]) -> Result<Spectrum> {
        let frame_len = self.input.len();
        let span = match self.decode_span {
            DecodeSpan::Full => frame_len,
            DecodeSpan::HalfFrame => frame_len / 2,
        };

        // the transform uses its input as scratch, so start clean every frame
        self.input.fill(0.0);
        self.output.fill(Complex::zero());

        let decoded = pcm::decode_pcm16_le(frame, &mut self.input[..span]);
        let dc_offset = pcm::remove_dc_offset(&mut self.input[..decoded]);

        self.fft.process(&mut self.input, &mut self.output)?;

        let mut magnitudes: Vec<f32> = self.output[..frame_len / 2]
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im).sqrt())
            .collect();

        // packed real-FFT layout: the Nyquist real part shares bin 0
        if self.decode_span == DecodeSpan::HalfFrame {
            magnitudes[0] = self.output[0].re.hypot(self.output[frame_len / 2].re);
        }

        Ok(Spectrum {
            magnitudes,
            dc_offset,
            sample_rate: self.sample_rate,
            frame_len,
        })
    }
}

impl FrameReducer for SpectrumReducer {
    type Output = Spectrum;

    const NAME: &'static str = "spectrum";

    fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(config)
    }

    fn initial(&self) -> Spectrum {
        Spectrum {
            magnitudes: vec![0.0; self.input.len() / 2],
            dc_offset: 0.0,
            sample_rate: self.sample_rate,
            frame_len: self.input.len(),
        }
    }

    fn reduce(&mut self, frame: &[u8]) -> Result<Spectrum> {
        self.compute_fft(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const N: usize = 1024;

    /// PCM16 bytes of `amplitude * sin(2π·hz·t) + bias` at 44.1 kHz.
    fn tone_frame(hz: f32, amplitude: f32, bias: f32) -> Vec<u8> {
        let samples: Vec<i16> = (0..N)
            .map(|i| {
                let t = i as f32 / 44_100.0;
                let value = amplitude * (2.0 * PI * hz * t).sin() + bias;
                (value * 32767.0).round() as i16
            })
            .collect();
        let mut bytes = Vec::new();
        pcm::encode_pcm16_le(&samples, &mut bytes);
        bytes
    }

    fn bin_hz(bin: usize) -> f32 {
        bin as f32 * 44_100.0 / N as f32
    }

    #[test]
    fn test_silence_gives_zero_spectrum() {
        let mut reducer = SpectrumReducer::new(&AnalyzerConfig::spectrum());
        let spectrum = reducer.compute_fft(&vec![0u8; N * 2]).unwrap();

        assert_eq!(spectrum.magnitudes.len(), N / 2);
        assert_eq!(spectrum.dc_offset, 0.0);
        assert!(spectrum.magnitudes.iter().all(|&m| m == 0.0));
        assert!(spectrum.peak().is_none());
    }

    #[test]
    fn test_bin_aligned_tone_peaks_at_its_bin() {
        let mut reducer = SpectrumReducer::new(&AnalyzerConfig::spectrum());
        let spectrum = reducer.compute_fft(&tone_frame(bin_hz(37), 0.5, 0.0)).unwrap();

        let peak = spectrum.peak().unwrap();
        assert_eq!(peak.bin, 37);
        // unnormalized: A * N / 2
        assert!((peak.magnitude - 256.0).abs() < 1.0, "peak {}", peak.magnitude);

        for (bin, &m) in spectrum.magnitudes.iter().enumerate() {
            if bin != 37 {
                assert!(m < 0.5, "bin {} leaked {}", bin, m);
            }
        }
    }

    #[test]
    fn test_one_kilohertz_tone() {
        let mut reducer = SpectrumReducer::new(&AnalyzerConfig::spectrum());
        let spectrum = reducer.compute_fft(&tone_frame(1000.0, 0.5, 0.0)).unwrap();

        let peak = spectrum.peak().unwrap();
        assert_eq!(peak.bin, 23);
        assert!((peak.frequency_hz - 990.5).abs() < 1.0);
        // 1000 Hz sits 0.22 bins off-centre, so leakage trims the ideal 256
        assert!(peak.magnitude > 200.0 && peak.magnitude < 260.0, "peak {}", peak.magnitude);
    }

    #[test]
    fn test_dc_bias_is_removed() {
        let mut reducer = SpectrumReducer::new(&AnalyzerConfig::spectrum());
        let spectrum = reducer
            .compute_fft(&tone_frame(bin_hz(12), 0.3, 0.25))
            .unwrap();

        assert!((spectrum.dc_offset - 0.25).abs() < 1e-3);
        assert!(spectrum.magnitudes[0] < 0.5);
        assert_eq!(spectrum.peak().unwrap().bin, 12);
    }

    #[test]
    fn test_half_frame_ignores_upper_half() {
        let config = AnalyzerConfig {
            decode_span: DecodeSpan::HalfFrame,
            ..AnalyzerConfig::spectrum()
        };
        let mut reducer = SpectrumReducer::new(&config);

        let tone = tone_frame(bin_hz(16), 0.5, 0.0);
        let mut loud_tail = tone.clone();
        for byte in loud_tail[N..].iter_mut() {
            *byte = 0x40;
        }
        let mut quiet_tail = tone.clone();
        for byte in quiet_tail[N..].iter_mut() {
            *byte = 0;
        }

        let loud = reducer.compute_fft(&loud_tail).unwrap();
        let quiet = reducer.compute_fft(&quiet_tail).unwrap();
        assert_eq!(loud, quiet);

        // only half the samples carry the tone
        let peak = quiet.peak().unwrap();
        assert_eq!(peak.bin, 16);
        assert!((peak.magnitude - 128.0).abs() < 1.0, "peak {}", peak.magnitude);
    }

    fn alternating_frame(level: i16) -> Vec<u8> {
        let samples: Vec<i16> = (0..N)
            .map(|n| if n % 2 == 0 { level } else { -level })
            .collect();
        let mut frame = Vec::new();
        pcm::encode_pcm16_le(&samples, &mut frame);
        frame
    }

    #[test]
    fn test_half_frame_folds_nyquist_into_dc_bin() {
        let config = AnalyzerConfig {
            decode_span: DecodeSpan::HalfFrame,
            ..AnalyzerConfig::spectrum()
        };
        let mut reducer = SpectrumReducer::new(&config);
        let spectrum = reducer.compute_fft(&alternating_frame(8192)).unwrap();

        // 512 decoded samples of ±0.25 sum to 128 at Nyquist
        assert!(
            (spectrum.magnitudes[0] - 128.0).abs() < 1e-2,
            "bin 0 {}",
            spectrum.magnitudes[0]
        );
    }

    #[test]
    fn test_full_frame_drops_nyquist() {
        let mut reducer = SpectrumReducer::new(&AnalyzerConfig::spectrum());
        let spectrum = reducer.compute_fft(&alternating_frame(8192)).unwrap();

        assert!(spectrum.magnitudes[0] < 1e-2, "bin 0 {}", spectrum.magnitudes[0]);
        assert!(spectrum.magnitudes.iter().all(|&m| m < 1e-2));
    }

    #[test]
    fn test_reducer_reuses_buffers_between_frames() {
        let mut reducer = SpectrumReducer::new(&AnalyzerConfig::spectrum());
        let _ = reducer.compute_fft(&tone_frame(bin_hz(40), 0.9, 0.0)).unwrap();
        let silent = reducer.compute_fft(&vec![0u8; N * 2]).unwrap();

        assert!(silent.magnitudes.iter().all(|&m| m == 0.0));
        assert_eq!(reducer.initial(), Spectrum::silent(&AnalyzerConfig::spectrum()));
    }
}
