use log::debug;

use crate::audio::FrameSource;
use crate::cancel::CancelToken;
use crate::config::{AnalyzerConfig, BYTES_PER_SAMPLE};
use crate::error::Result;

/// Cuts a PCM byte stream into fixed-length, optionally overlapping frames.
///
/// The frame buffer is reused: each new frame keeps the trailing `overlap`
/// samples of the previous one and reads `hop` fresh samples behind them.
pub struct Framer {
    frame: Vec<u8>,
    hop_bytes: usize,
    primed: bool,
}

impl Framer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            frame: vec![0; config.frame_bytes()],
            hop_bytes: config.hop() * BYTES_PER_SAMPLE,
            primed: false,
        }
    }

    /// Blocks until the next full frame is available.
    ///
    /// Returns `None` once the source ends or `cancel` fires; a partially
    /// filled trailing frame is discarded and the next call starts a fresh
    /// frame with no overlap.
    pub fn next_frame<S>(&mut self, source: &mut S, cancel: &CancelToken) -> Result<Option<&[u8]>>
    where
        S: FrameSource + ?Sized,
    {
        let carried = if self.primed {
            self.frame.copy_within(self.hop_bytes.., 0);
            self.frame.len() - self.hop_bytes
        } else {
            0
        };
        let mut filled = carried;

        while filled < self.frame.len() {
            if cancel.is_cancelled() {
                self.primed = false;
                return Ok(None);
            }
            let n = source.read(&mut self.frame[filled..], cancel)?;
            if n == 0 {
                if filled > carried && !cancel.is_cancelled() {
                    debug!("discarding partial trailing frame of {} bytes", filled - carried);
                }
                self.primed = false;
                return Ok(None);
            }
            filled += n;
        }

        self.primed = true;
        Ok(Some(self.frame.as_slice()))
    }
}
