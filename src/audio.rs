//! PCM16 mono sources feeding the framer: live input, WAV replay and memory.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::{AnalyzerConfig, BYTES_PER_SAMPLE};
use crate::error::{AnalyzerError, Result};
use crate::pcm;

/// How long a device read sleeps when the ring is empty
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A blocking reader of little-endian PCM16 mono bytes.
pub trait FrameSource {
    /// Reads up to `buf.len()` bytes, blocking until at least one sample is
    /// available. `Ok(0)` means the stream has ended or `cancel` fired.
    fn read(&mut self, buf: &mut [u8], cancel: &CancelToken) -> Result<usize>;
}

/// What the default input device will be opened with.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
}

/// Live capture from the default input device.
///
/// The device callback downmixes into a lock-free ring of mono i16 samples
/// holding one second of audio; when the capture thread falls behind, the
/// newest samples that do not fit are dropped.
pub struct DeviceSource {
    ring: HeapCons<i16>,
    scratch: Vec<i16>,
    dropped: Arc<AtomicU64>,
    #[allow(dead_code)]
    stream: cpal::Stream,
}

impl DeviceSource {
    /// Checks that the default input device can deliver the configured rate.
    pub fn probe(config: &AnalyzerConfig) -> Result<DeviceInfo> {
        let (device, supported) = select_input(config)?;
        Ok(DeviceInfo {
            name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
            channels: supported.channels(),
            sample_format: supported.sample_format(),
            sample_rate: supported.sample_rate().0,
        })
    }

    /// Opens and starts the default input device.
    ///
    /// The returned source owns the `cpal::Stream`, so it must be created on
    /// the thread that reads from it.
    pub fn open(config: &AnalyzerConfig) -> Result<Self> {
        let (device, supported) = select_input(config)?;
        let sample_format = supported.sample_format();
        let channels = supported.channels() as usize;
        let stream_config: cpal::StreamConfig = supported.into();

        info!(
            "Audio input: {} @ {}Hz, {} channel(s), {:?}",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            stream_config.sample_rate.0,
            channels,
            sample_format
        );

        let (producer, ring) = HeapRb::<i16>::new(config.sample_rate as usize).split();
        let dropped = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            SampleFormat::I16 => Self::build_input_stream::<i16>(
                &device,
                &stream_config,
                channels,
                producer,
                dropped.clone(),
            )?,
            SampleFormat::U16 => Self::build_input_stream::<u16>(
                &device,
                &stream_config,
                channels,
                producer,
                dropped.clone(),
            )?,
            SampleFormat::I32 => Self::build_input_stream::<i32>(
                &device,
                &stream_config,
                channels,
                producer,
                dropped.clone(),
            )?,
            SampleFormat::F32 => Self::build_input_stream::<f32>(
                &device,
                &stream_config,
                channels,
                producer,
                dropped.clone(),
            )?,
            other => {
                return Err(AnalyzerError::UnsupportedFormat(format!(
                    "input sample format {:?}",
                    other
                )))
            }
        };

        // Start the stream
        stream.play()?;

        Ok(Self {
            ring,
            scratch: Vec::new(),
            dropped,
            stream,
        })
    }

    fn build_input_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        channels: usize,
        mut producer: HeapProd<i16>,
        dropped: Arc<AtomicU64>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let mut mono = Vec::new();
        let data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
            downmix_to_pcm16(data, channels, &mut mono);
            push_or_drop(&mut producer, &mono, &dropped);
        };

        let err_fn = |err: cpal::StreamError| {
            warn!("Input stream error: {}", err);
        };

        let stream = device.build_input_stream(config, data_fn, err_fn, None)?;

        Ok(stream)
    }
}

/// Averages interleaved frames down to mono and converts them to i16,
/// clipping anything outside full scale. Replaces the contents of `out`.
fn downmix_to_pcm16<T>(data: &[T], channels: usize, out: &mut Vec<i16>)
where
    T: Sample,
    f32: FromSample<T>,
{
    out.clear();
    for frame in data.chunks(channels.max(1)) {
        let mono = frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32;
        let scaled = (mono * pcm::PCM16_SCALE).round();
        out.push(scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
    }
}

/// Queues samples for the capture thread, counting the ones that do not fit.
fn push_or_drop(producer: &mut HeapProd<i16>, samples: &[i16], dropped: &AtomicU64) {
    let pushed = producer.push_slice(samples);
    if pushed < samples.len() {
        let lost = (samples.len() - pushed) as u64;
        let total = dropped.fetch_add(lost, Ordering::Relaxed) + lost;
        debug!("capture thread behind, dropped {} input samples so far", total);
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            info!("Audio input closed, {} samples dropped while behind", dropped);
        }
    }
}

impl FrameSource for DeviceSource {
    fn read(&mut self, buf: &mut [u8], cancel: &CancelToken) -> Result<usize> {
        self.scratch.resize(buf.len() / BYTES_PER_SAMPLE, 0);
        loop {
            if cancel.is_cancelled() {
                return Ok(0);
            }

            let n = self.ring.pop_slice(&mut self.scratch);
            if n > 0 {
                for (pair, sample) in buf.chunks_exact_mut(BYTES_PER_SAMPLE).zip(&self.scratch[..n]) {
                    pair.copy_from_slice(&sample.to_le_bytes());
                }
                return Ok(n * BYTES_PER_SAMPLE);
            }

            thread::sleep(DEVICE_POLL_INTERVAL);
        }
    }
}

/// Picks the default input device and a configuration at the requested rate,
/// preferring native i16 and the fewest channels.
fn select_input(config: &AnalyzerConfig) -> Result<(cpal::Device, cpal::SupportedStreamConfig)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AnalyzerError::DeviceUnavailable("no input device available".to_string()))?;

    let wanted = cpal::SampleRate(config.sample_rate);
    let range = device
        .supported_input_configs()?
        .filter(|range| range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate())
        .min_by_key(|range| (range.sample_format() != SampleFormat::I16, range.channels()))
        .ok_or_else(|| {
            AnalyzerError::DeviceUnavailable(format!(
                "input device does not support {} Hz",
                config.sample_rate
            ))
        })?;

    Ok((device, range.with_sample_rate(wanted)))
}

/// Replays a mono 16-bit integer WAV file.
pub struct WavSource {
    reader: hound::WavReader<BufReader<File>>,
    pacing: Option<Pacing>,
}

/// Wall-clock bookkeeping for real-time replay.
struct Pacing {
    started: Instant,
    delivered: u64,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = hound::WavReader::open(path.as_ref())?;
        check_wav_spec(&reader.spec())?;
        debug!(
            "Replaying {} ({} samples @ {}Hz)",
            path.as_ref().display(),
            reader.len(),
            reader.spec().sample_rate
        );
        Ok(Self {
            reader,
            pacing: None,
        })
    }

    /// Delivers samples no faster than the file's sample rate, like a live line.
    pub fn paced(mut self) -> Self {
        self.pacing = Some(Pacing {
            started: Instant::now(),
            delivered: 0,
        });
        self
    }

    /// Reads only the header, for sizing an analyzer before replay.
    pub fn spec_of(path: impl AsRef<Path>) -> Result<hound::WavSpec> {
        let spec = hound::WavReader::open(path)?.spec();
        check_wav_spec(&spec)?;
        Ok(spec)
    }
}

fn check_wav_spec(spec: &hound::WavSpec) -> Result<()> {
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(AnalyzerError::UnsupportedFormat(format!(
            "expected mono 16-bit integer PCM, got {} channel(s) of {}-bit {:?}",
            spec.channels, spec.bits_per_sample, spec.sample_format
        )));
    }
    Ok(())
}

impl FrameSource for WavSource {
    fn read(&mut self, buf: &mut [u8], cancel: &CancelToken) -> Result<usize> {
        if cancel.is_cancelled() {
            return Ok(0);
        }

        let mut written = 0;
        let mut samples = self.reader.samples::<i16>();
        for pair in buf.chunks_exact_mut(BYTES_PER_SAMPLE) {
            match samples.next() {
                Some(sample) => {
                    pair.copy_from_slice(&sample?.to_le_bytes());
                    written += BYTES_PER_SAMPLE;
                }
                None => break,
            }
        }

        if let Some(pacing) = self.pacing.as_mut() {
            pacing.delivered += (written / BYTES_PER_SAMPLE) as u64;
            let due = Duration::from_secs_f64(
                pacing.delivered as f64 / self.reader.spec().sample_rate as f64,
            );
            if let Some(wait) = due.checked_sub(pacing.started.elapsed()) {
                thread::sleep(wait);
            }
        }
        Ok(written)
    }
}

/// Audio that is already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bytes: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        let mut bytes = Vec::new();
        pcm::encode_pcm16_le(samples, &mut bytes);
        Self::from_bytes(bytes)
    }
}

impl FrameSource for MemorySource {
    fn read(&mut self, buf: &mut [u8], cancel: &CancelToken) -> Result<usize> {
        if cancel.is_cancelled() {
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len() - self.pos);
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
