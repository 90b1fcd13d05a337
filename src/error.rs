use thiserror::Error;

/// Everything that can stop an analyzer from producing frames.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("audio input unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid analyzer config: {0}")]
    InvalidConfig(String),

    #[error("wav source: {0}")]
    Wav(#[from] hound::Error),

    #[error("fft: {0}")]
    Fft(#[from] realfft::FftError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = AnalyzerError> = std::result::Result<T, E>;

// opening, configuring or starting the input line all count as acquiring the device
impl From<cpal::SupportedStreamConfigsError> for AnalyzerError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        AnalyzerError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AnalyzerError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AnalyzerError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AnalyzerError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AnalyzerError::DeviceUnavailable(err.to_string())
    }
}
