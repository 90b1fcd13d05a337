//! Streaming audio analysis for a radio player's visualizer.
//!
//! One capture/framing engine ([`Analyzer`]) drives a pluggable per-frame
//! [`FrameReducer`]: [`SpectrumReducer`] produces a magnitude spectrum,
//! [`LoudnessReducer`] a smoothed RMS level.

pub mod analyzer;
pub mod audio;
pub mod bars;
pub mod cancel;
pub mod config;
pub mod error;
pub mod framing;
pub mod loudness;
pub mod pcm;
pub mod processing;

pub use analyzer::{Analyzer, LoudnessAnalyzer, SnapshotCell, SpectrumAnalyzer};
pub use audio::{DeviceSource, FrameSource, MemorySource, WavSource};
pub use cancel::CancelToken;
pub use config::{AnalyzerConfig, DecodeSpan};
pub use error::{AnalyzerError, Result};
pub use loudness::{Loudness, LoudnessReducer};
pub use processing::{FrameReducer, Peak, Spectrum, SpectrumReducer};
