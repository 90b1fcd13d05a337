//! Background capture loop shared by every reducer.
//!
//! An [`Analyzer`] owns one worker thread at a time. The worker pulls frames
//! from a [`FrameSource`], reduces them, and publishes each result as an
//! immutable snapshot that any number of readers can poll.

use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::audio::{DeviceSource, FrameSource};
use crate::cancel::CancelToken;
use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, Result};
use crate::framing::Framer;
use crate::loudness::{Loudness, LoudnessReducer};
use crate::processing::{FrameReducer, Spectrum, SpectrumReducer};

/// Latest value published by a single writer.
///
/// Publishing swaps in a new `Arc`, so a reader holds either the old or the
/// new snapshot in full, never a mix of the two.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: Mutex<Arc<T>>,
    frames: AtomicU64,
}

impl<T> SnapshotCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: Mutex::new(Arc::new(initial)),
            frames: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, value: T) {
        let value = Arc::new(value);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = value;
        self.frames.fetch_add(1, Ordering::Release);
    }

    pub fn latest(&self) -> Arc<T> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of values published so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

/// Clears the running flag when the worker exits, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Analyzer<R: FrameReducer> {
    config: AnalyzerConfig,
    output: Arc<SnapshotCell<R::Output>>,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

pub type SpectrumAnalyzer = Analyzer<SpectrumReducer>;
pub type LoudnessAnalyzer = Analyzer<LoudnessReducer>;

impl<R: FrameReducer> Analyzer<R> {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        let initial = R::from_config(&config).initial();

        Ok(Self {
            config,
            output: Arc::new(SnapshotCell::new(initial)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
            worker: None,
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Captures from the default input device.
    pub fn start(&mut self) -> Result<()> {
        self.start_with(DeviceSource::open)
    }

    /// Starts the capture loop on a new thread, reading from whatever `open`
    /// returns. `open` runs on that thread, so the source need not be `Send`.
    ///
    /// Returns once the source is open. Calling this while the loop is
    /// already running does nothing; calling it after [`stop`](Self::stop)
    /// waits for the stopping worker and starts a new one.
    pub fn start_with<S, F>(&mut self, open: F) -> Result<()>
    where
        S: FrameSource + 'static,
        F: FnOnce(&AnalyzerConfig) -> Result<S> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            self.join();
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{} analyzer already running", R::NAME);
            return Ok(());
        }

        // reap a worker that already finished on its own
        if let Some(previous) = self.worker.take() {
            let _ = previous.join();
        }

        let cancel = CancelToken::new();
        self.cancel = cancel.clone();

        let config = self.config.clone();
        let output = Arc::clone(&self.output);
        let guard = RunningGuard(Arc::clone(&self.running));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let spawned = thread::Builder::new()
            .name(format!("{}-analyzer", R::NAME))
            .spawn(move || {
                let _guard = guard;
                let mut source = match open(&config) {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                run_frames(&mut source, R::from_config(&config), &output, &cancel, &config);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.running.store(false, Ordering::Release);
                return Err(err.into());
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("{} analyzer started", R::NAME);
                self.worker = Some(handle);
                Ok(())
            }
            Ok(Err(err)) => {
                error!("{} analyzer failed to start: {}", R::NAME, err);
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                let err = AnalyzerError::DeviceUnavailable(
                    "capture thread exited during startup".to_string(),
                );
                error!("{} analyzer failed to start: {}", R::NAME, err);
                Err(err)
            }
        }
    }

    /// Asks the capture loop to exit; does not wait for it.
    pub fn stop(&self) {
        if self.is_running() {
            info!("{} analyzer stopping", R::NAME);
        }
        self.cancel.cancel();
    }

    /// Waits for the worker to exit. For a live device this only returns
    /// after [`stop`](Self::stop); a finite source ends on its own.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("{} analyzer thread panicked", R::NAME);
            }
        }
    }

    /// `stop` followed by `join`.
    pub fn shutdown(&mut self) {
        self.stop();
        self.join();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Latest published output; stays valid while newer frames arrive.
    pub fn latest(&self) -> Arc<R::Output> {
        self.output.latest()
    }

    /// Frames reduced since construction.
    pub fn frames(&self) -> u64 {
        self.output.frames()
    }
}

impl<R: FrameReducer> Drop for Analyzer<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Analyzer<SpectrumReducer> {
    pub fn fft_magnitudes(&self) -> Arc<Spectrum> {
        self.latest()
    }
}

impl Analyzer<LoudnessReducer> {
    /// Loudness analyzer on the default input device, failing up front when
    /// no usable device is present.
    pub fn open_default() -> Result<Self> {
        let config = AnalyzerConfig::loudness();
        match DeviceSource::probe(&config) {
            Ok(device) => debug!("loudness input: {:?}", device),
            Err(err) => {
                error!("Unable to access audio input: {}", err);
                return Err(err);
            }
        }
        Self::new(config)
    }

    pub fn smoothed_rms(&self) -> f32 {
        self.latest().smoothed
    }

    pub fn loudness(&self) -> Loudness {
        *self.latest()
    }
}

fn run_frames<R, S>(
    source: &mut S,
    mut reducer: R,
    output: &SnapshotCell<R::Output>,
    cancel: &CancelToken,
    config: &AnalyzerConfig,
) where
    R: FrameReducer,
    S: FrameSource + ?Sized,
{
    let mut framer = Framer::new(config);
    let mut reduced = 0u64;

    loop {
        let frame = match framer.next_frame(source, cancel) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                error!("{} capture failed: {}", R::NAME, err);
                break;
            }
        };

        match reducer.reduce(frame) {
            Ok(value) => {
                output.publish(value);
                reduced += 1;
            }
            Err(err) => {
                error!("{} frame processing failed: {}", R::NAME, err);
                break;
            }
        }
    }

    info!("{} analyzer stopped after {} frames", R::NAME, reduced);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySource;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Endless silence, paced so the worker does not spin.
    struct PacedSilence;

    impl FrameSource for PacedSilence {
        fn read(&mut self, buf: &mut [u8], cancel: &CancelToken) -> Result<usize> {
            if cancel.is_cancelled() {
                return Ok(0);
            }
            thread::sleep(Duration::from_millis(1));
            buf.fill(0);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_snapshot_cell_swaps_whole_values() {
        let cell = SnapshotCell::new(vec![0.0f32; 4]);
        let before = cell.latest();

        cell.publish(vec![1.0; 4]);

        assert_eq!(*before, vec![0.0; 4]);
        assert_eq!(*cell.latest(), vec![1.0; 4]);
        assert_eq!(cell.frames(), 1);
    }

    #[test]
    fn test_initial_spectrum_is_zero() {
        let analyzer = SpectrumAnalyzer::new(AnalyzerConfig::spectrum()).unwrap();
        let spectrum = analyzer.fft_magnitudes();

        assert_eq!(spectrum.magnitudes.len(), 512);
        assert!(spectrum.magnitudes.iter().all(|&m| m == 0.0));
        assert!(!analyzer.is_running());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = AnalyzerConfig {
            frame_len: 1000,
            ..AnalyzerConfig::spectrum()
        };
        assert!(matches!(
            SpectrumAnalyzer::new(config),
            Err(AnalyzerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_failed_open_leaves_output_untouched() {
        let mut analyzer = SpectrumAnalyzer::new(AnalyzerConfig::spectrum()).unwrap();

        let result = analyzer.start_with(|_| -> Result<MemorySource> {
            Err(AnalyzerError::DeviceUnavailable("no line".to_string()))
        });

        assert!(matches!(result, Err(AnalyzerError::DeviceUnavailable(_))));
        assert!(!analyzer.is_running());
        assert_eq!(analyzer.frames(), 0);
        assert!(analyzer.fft_magnitudes().magnitudes.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_start_twice_runs_one_loop() {
        let opens = Arc::new(AtomicUsize::new(0));
        let mut analyzer = LoudnessAnalyzer::new(AnalyzerConfig::loudness()).unwrap();

        for _ in 0..2 {
            let opens = Arc::clone(&opens);
            analyzer
                .start_with(move |_| {
                    opens.fetch_add(1, Ordering::SeqCst);
                    Ok(PacedSilence)
                })
                .unwrap();
        }

        assert!(analyzer.is_running());
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        analyzer.shutdown();
        assert!(!analyzer.is_running());
    }

    #[test]
    fn test_restart_immediately_after_stop() {
        let opens = Arc::new(AtomicUsize::new(0));
        let mut analyzer = SpectrumAnalyzer::new(AnalyzerConfig::spectrum()).unwrap();

        for _ in 0..2 {
            let opens = Arc::clone(&opens);
            analyzer
                .start_with(move |_| {
                    opens.fetch_add(1, Ordering::SeqCst);
                    Ok(PacedSilence)
                })
                .unwrap();
            analyzer.stop();
        }
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        // no join between stop and start
        analyzer.start_with(|_| Ok(PacedSilence)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(analyzer.is_running());

        analyzer.shutdown();
        assert!(!analyzer.is_running());
    }

    #[test]
    fn test_stop_then_restart() {
        let mut analyzer = SpectrumAnalyzer::new(AnalyzerConfig::spectrum()).unwrap();

        analyzer.start_with(|_| Ok(PacedSilence)).unwrap();
        analyzer.stop();
        analyzer.join();
        assert!(!analyzer.is_running());

        analyzer.start_with(|_| Ok(PacedSilence)).unwrap();
        assert!(analyzer.is_running());
        analyzer.shutdown();
        assert!(!analyzer.is_running());
    }

    #[test]
    fn test_finite_source_runs_to_completion() {
        let config = AnalyzerConfig::loudness();
        let samples = vec![8192i16; config.frame_len * 4];
        let mut analyzer = LoudnessAnalyzer::new(config).unwrap();

        analyzer
            .start_with(move |_| Ok(MemorySource::from_samples(&samples)))
            .unwrap();
        analyzer.join();

        // 4096 samples, 1024-sample frames, 512-sample hop
        assert_eq!(analyzer.frames(), 7);
        assert!(!analyzer.is_running());

        let loudness = analyzer.loudness();
        assert!((loudness.rms - 0.25).abs() < 1e-6);
        let expected = 0.25 * (1.0 - 0.8f32.powi(7));
        assert!((analyzer.smoothed_rms() - expected).abs() < 1e-5);
    }
}
