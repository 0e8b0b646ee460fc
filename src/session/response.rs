//! Response gateway: language model and speech synthesis

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::cache::{CachePolicy, SpeechCache};
use super::feedback::AudioFeedbackPlayer;
use super::messages::MessageKey;
use crate::collaborators::{LanguageModel, SpeechSynthesizer, VoiceOptions};
use crate::error::ErrorKind;
use crate::http::with_deadline;
use crate::{Error, Result as CrateResult};
use crate::voice::Clip;

/// Kind of upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    ServiceUnavailable,
    QuotaExceeded,
}

/// A remote service failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub kind: UpstreamKind,
    pub detail: String,
}

impl UpstreamFailure {
    /// Classify an upstream error
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        let kind = match error.kind() {
            ErrorKind::UpstreamQuotaExceeded => UpstreamKind::QuotaExceeded,
            _ => UpstreamKind::ServiceUnavailable,
        };
        Self {
            kind,
            detail: error.to_string(),
        }
    }

    /// Position in the failure taxonomy
    #[must_use]
    pub const fn error_kind(&self) -> ErrorKind {
        match self.kind {
            UpstreamKind::ServiceUnavailable => ErrorKind::UpstreamServiceUnavailable,
            UpstreamKind::QuotaExceeded => ErrorKind::UpstreamQuotaExceeded,
        }
    }

    /// Message announcing this failure
    #[must_use]
    pub const fn message(&self) -> MessageKey {
        MessageKey::for_error(self.error_kind())
    }
}

impl From<UpstreamFailure> for Error {
    fn from(failure: UpstreamFailure) -> Self {
        match failure.kind {
            UpstreamKind::ServiceUnavailable => Self::ServiceUnavailable(failure.detail),
            UpstreamKind::QuotaExceeded => Self::QuotaExceeded(failure.detail),
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Result of asking the language model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Answered(String),
    TranscriptionEmpty,
    UpstreamFailure(UpstreamFailure),
}

/// Model and voice used for responses
#[derive(Debug, Clone)]
pub struct ResponseSettings {
    pub model: String,
    pub voice: VoiceOptions,
    /// Longest the model or the synthesiser may take per request
    pub request_timeout: Duration,
}

/// Asks the language model and turns text into played speech
pub struct ResponseGateway {
    model: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    settings: ResponseSettings,
    cache: SpeechCache,
}

impl ResponseGateway {
    /// Create a gateway
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        settings: ResponseSettings,
        cache: SpeechCache,
    ) -> Self {
        Self {
            model,
            synthesizer,
            settings,
            cache,
        }
    }

    /// Ask the language model; failures come back as an outcome
    pub async fn ask(&self, prompt: &str) -> ResponseOutcome {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return ResponseOutcome::TranscriptionEmpty;
        }

        tracing::info!(prompt, model = %self.settings.model, "asking language model");
        let answer = with_deadline(
            "language model",
            self.settings.request_timeout,
            self.model.complete(prompt, &self.settings.model),
        )
        .await;
        match answer {
            Ok(answer) => {
                tracing::info!(answer = %answer, "language model answered");
                ResponseOutcome::Answered(answer)
            }
            Err(e) => {
                tracing::error!(error = %e, "language model request failed");
                ResponseOutcome::UpstreamFailure(UpstreamFailure::from_error(&e))
            }
        }
    }

    /// Speech for `text`, from the cache or freshly synthesised
    ///
    /// # Errors
    ///
    /// Returns the upstream failure if synthesis fails or returns
    /// undecodable audio
    pub async fn synthesize(
        &self,
        text: &str,
        policy: CachePolicy,
    ) -> Result<Clip, UpstreamFailure> {
        if let CachePolicy::Use(key) = policy {
            if let Some(clip) = self.cache.load(key) {
                return Ok(clip);
            }
        }

        let audio = with_deadline(
            "speech synthesizer",
            self.settings.request_timeout,
            self.synthesizer.synthesize(text, &self.settings.voice),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "speech synthesis failed");
            UpstreamFailure::from_error(&e)
        })?;

        let name = match policy {
            CachePolicy::Uncached => "speech",
            CachePolicy::Use(key) | CachePolicy::Refresh(key) => key,
        };
        let clip = Clip::from_synthesized(name, &audio).map_err(|e| {
            tracing::error!(error = %e, "synthesised audio could not be decoded");
            UpstreamFailure {
                kind: UpstreamKind::ServiceUnavailable,
                detail: e.to_string(),
            }
        })?;

        if let CachePolicy::Use(key) | CachePolicy::Refresh(key) = policy {
            if let Err(e) = self.cache.store(key, &audio, &clip) {
                tracing::warn!(key, error = %e, "failed to cache speech");
            }
        }

        Ok(clip)
    }

    /// Synthesise `text` and play it, waiting until it has been spoken
    ///
    /// # Errors
    ///
    /// Returns the upstream failure if synthesis fails, or the playback error
    /// if the speech could not be played
    pub async fn speak(
        &self,
        player: &AudioFeedbackPlayer,
        text: &str,
        policy: CachePolicy,
    ) -> CrateResult<()> {
        let clip = self.synthesize(text, policy).await?;
        player.play_once(&clip).await
    }
}
