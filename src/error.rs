//! Error types for `HomeAI`

use thiserror::Error;

/// Result type alias for `HomeAI` operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `HomeAI`
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credentials, bad activation word, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// No speech started before the listen timeout elapsed
    #[error("capture timed out waiting for speech")]
    CaptureTimeout,

    /// The capture device could not be opened or stopped delivering audio
    #[error("capture device error: {0}")]
    CaptureDevice(String),

    /// The recogniser found no speech in the recording
    #[error("no speech detected")]
    NoSpeechDetected,

    /// The recogniser heard speech but could not turn it into text
    #[error("speech could not be understood")]
    Unintelligible,

    /// The transcriber returned an empty text
    #[error("transcription is empty")]
    TranscriptionEmpty,

    /// A remote service could not be reached or answered with an error
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A remote service rejected the request because a quota is used up
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Audio decoding or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure taxonomy the session maps to spoken messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CaptureTimeout,
    CaptureDeviceFailure,
    RecognitionUnintelligible,
    TranscriptionEmpty,
    UpstreamServiceUnavailable,
    UpstreamQuotaExceeded,
    ConfigurationInvalid,
}

impl Error {
    /// Classify into the failure taxonomy
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Toml(_) => ErrorKind::ConfigurationInvalid,
            Self::CaptureTimeout | Self::NoSpeechDetected => ErrorKind::CaptureTimeout,
            Self::CaptureDevice(_) | Self::Audio(_) | Self::Io(_) => {
                ErrorKind::CaptureDeviceFailure
            }
            Self::Unintelligible => ErrorKind::RecognitionUnintelligible,
            Self::TranscriptionEmpty => ErrorKind::TranscriptionEmpty,
            Self::QuotaExceeded(_) => ErrorKind::UpstreamQuotaExceeded,
            Self::ServiceUnavailable(_) | Self::Http(_) | Self::Serialization(_) => {
                ErrorKind::UpstreamServiceUnavailable
            }
        }
    }
}

/// Map a non-success HTTP response from `service` to an upstream error
pub(crate) fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let detail = format!("{service} error {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::PAYMENT_REQUIRED
    {
        Error::QuotaExceeded(detail)
    } else {
        Error::ServiceUnavailable(detail)
    }
}
