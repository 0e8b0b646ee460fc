//! Speech capture gateway
//!
//! Records utterances from the capture device and classifies what the
//! recogniser or transcriber made of them. The device is opened for each
//! listen and closed again on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::response::UpstreamFailure;
use crate::collaborators::{CaptureDevice, RecordLimits, Recognizer, Transcriber};
use crate::error::ErrorKind;
use crate::http::with_deadline;
use crate::vocabulary::tokenize;
use crate::voice::samples_to_wav;
use crate::{Error, Result};

/// Energy threshold never drops below this after calibration
pub const MIN_ENERGY_THRESHOLD: f32 = 0.01;

/// Factor applied to the measured ambient level
const AMBIENT_HEADROOM: f32 = 1.5;

/// Result of listening for the activation word
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    /// Lower-cased tokens in spoken order
    Recognized(Vec<String>),
    NotUnderstood,
    TimedOut,
    DeviceError(String),
}

/// Result of listening for a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Transcribed free text, passed on verbatim
    Prompt(String),
    NotUnderstood,
    TimedOut,
    DeviceError(String),
    Upstream(UpstreamFailure),
}

/// Recording and recognition settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub activation_limits: RecordLimits,
    pub command_limits: RecordLimits,
    /// Language passed to the recogniser (e.g. "en-GB")
    pub recognizer_language: String,
    /// Language passed to the transcriber (e.g. "en")
    pub transcription_language: String,
    /// Keep the last activation and command recordings here
    pub recordings_dir: Option<PathBuf>,
    /// Longest the recogniser or transcriber may take per request
    pub request_timeout: Duration,
}

/// Keeps the device open for as long as it lives
///
/// Also closes the device when a listen is cancelled mid-recording.
struct OpenDevice<'a> {
    device: &'a mut dyn CaptureDevice,
}

impl<'a> OpenDevice<'a> {
    fn open(device: &'a mut dyn CaptureDevice) -> Result<Self> {
        device.open()?;
        Ok(Self { device })
    }
}

impl Drop for OpenDevice<'_> {
    fn drop(&mut self) {
        self.device.close();
    }
}

/// Listens through the capture device
pub struct SpeechCaptureGateway {
    device: Box<dyn CaptureDevice>,
    recognizer: Arc<dyn Recognizer>,
    transcriber: Arc<dyn Transcriber>,
    settings: CaptureSettings,
}

impl SpeechCaptureGateway {
    /// Create a gateway
    #[must_use]
    pub fn new(
        device: Box<dyn CaptureDevice>,
        recognizer: Arc<dyn Recognizer>,
        transcriber: Arc<dyn Transcriber>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            device,
            recognizer,
            transcriber,
            settings,
        }
    }

    /// Use a fixed energy threshold for both listens
    pub fn set_energy_threshold(&mut self, threshold: f32) {
        self.settings.activation_limits.energy_threshold = threshold;
        self.settings.command_limits.energy_threshold = threshold;
    }

    /// Measure ambient noise for `duration` and derive the energy threshold
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureDevice` if the device cannot be opened or
    /// delivers no audio
    pub async fn calibrate(&mut self, duration: Duration) -> Result<f32> {
        let ambient = {
            let mut open = OpenDevice::open(self.device.as_mut())?;
            open.device.ambient_level(duration).await?
        };

        let threshold = (ambient * AMBIENT_HEADROOM).max(MIN_ENERGY_THRESHOLD);
        tracing::info!(ambient, threshold, "calibrated energy threshold");
        self.set_energy_threshold(threshold);
        Ok(threshold)
    }

    /// Listen for a short utterance and tokenize what was recognised
    pub async fn listen_for_activation(&mut self) -> RecognitionOutcome {
        let wav = match self.record(Phase::Activation).await {
            Ok(wav) => wav,
            Err(e) if e.kind() == ErrorKind::CaptureTimeout => {
                return RecognitionOutcome::TimedOut;
            }
            Err(e) => {
                tracing::error!(error = %e, "activation capture failed");
                return RecognitionOutcome::DeviceError(e.to_string());
            }
        };

        let recognized = with_deadline(
            "recognizer",
            self.settings.request_timeout,
            self.recognizer
                .recognize(&wav, &self.settings.recognizer_language),
        )
        .await;
        match recognized {
            Ok(text) => {
                let tokens = tokenize(&text);
                tracing::debug!(text = %text, ?tokens, "recognised utterance");
                if tokens.is_empty() {
                    RecognitionOutcome::NotUnderstood
                } else {
                    RecognitionOutcome::Recognized(tokens)
                }
            }
            Err(e) => match e.kind() {
                ErrorKind::CaptureTimeout => RecognitionOutcome::TimedOut,
                ErrorKind::RecognitionUnintelligible => RecognitionOutcome::NotUnderstood,
                _ => {
                    tracing::warn!(error = %e, "recogniser failed");
                    RecognitionOutcome::NotUnderstood
                }
            },
        }
    }

    /// Listen for a command and transcribe it as free text
    pub async fn listen_for_command(&mut self) -> CommandOutcome {
        let wav = match self.record(Phase::Command).await {
            Ok(wav) => wav,
            Err(e) if e.kind() == ErrorKind::CaptureTimeout => {
                return CommandOutcome::TimedOut;
            }
            Err(e) => {
                tracing::error!(error = %e, "command capture failed");
                return CommandOutcome::DeviceError(e.to_string());
            }
        };

        let transcribed = with_deadline(
            "transcriber",
            self.settings.request_timeout,
            self.transcriber
                .transcribe(&wav, &self.settings.transcription_language),
        )
        .await;
        match transcribed {
            Ok(text) if text.trim().is_empty() => CommandOutcome::NotUnderstood,
            Ok(text) => CommandOutcome::Prompt(text.trim().to_string()),
            Err(e) => match e.kind() {
                ErrorKind::CaptureTimeout => CommandOutcome::TimedOut,
                ErrorKind::RecognitionUnintelligible | ErrorKind::TranscriptionEmpty => {
                    CommandOutcome::NotUnderstood
                }
                ErrorKind::CaptureDeviceFailure => CommandOutcome::DeviceError(e.to_string()),
                ErrorKind::UpstreamServiceUnavailable
                | ErrorKind::UpstreamQuotaExceeded
                | ErrorKind::ConfigurationInvalid => {
                    tracing::error!(error = %e, "transcription failed");
                    CommandOutcome::Upstream(UpstreamFailure::from_error(&e))
                }
            },
        }
    }

    /// Record one utterance and encode it as WAV
    async fn record(&mut self, phase: Phase) -> Result<Vec<u8>> {
        let limits = match phase {
            Phase::Activation => self.settings.activation_limits,
            Phase::Command => self.settings.command_limits,
        };

        let (samples, sample_rate) = {
            let mut open = OpenDevice::open(self.device.as_mut())?;
            let samples = open.device.record(&limits).await?;
            (samples, open.device.sample_rate())
        };

        if samples.is_empty() {
            return Err(Error::CaptureTimeout);
        }

        let wav = samples_to_wav(&samples, sample_rate)?;
        self.save_recording(phase.file_name(), &wav);
        Ok(wav)
    }

    fn save_recording(&self, file_name: &str, wav: &[u8]) {
        let Some(dir) = &self.settings.recordings_dir else {
            return;
        };

        let path = dir.join(file_name);
        let saved = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, wav));
        match saved {
            Ok(()) => tracing::debug!(path = %path.display(), "saved recording"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to save recording"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Activation,
    Command,
}

impl Phase {
    const fn file_name(self) -> &'static str {
        match self {
            Self::Activation => "activation.wav",
            Self::Command => "command.wav",
        }
    }
}
