//! Daemon - the voice assistant service
//!
//! Assembles the concrete collaborators from configuration, calibrates the
//! microphone, and runs the session until it terminates or is interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::collaborators::{PlaybackPrimitive, Recognizer};
use crate::config::EnergyThreshold;
use crate::llm::ChatClient;
use crate::session::{
    AudioFeedbackPlayer, FeedbackClips, ResponseGateway, SessionController,
    SpeechCaptureGateway, SpeechCache,
};
use crate::voice::{
    AudioPlayback, Clip, MicrophoneCapture, SpeechToText, SttProvider, TextToSpeech, TtsProvider,
};
use crate::{Config, Error, Result};

/// How long ambient noise is sampled at startup
const CALIBRATION_DURATION: Duration = Duration::from_secs(1);

/// Startup switches that are not part of the configuration file
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Skip the welcome message
    pub no_welcome: bool,

    /// Resynthesise cached system messages
    pub refresh_cache: bool,
}

/// The `HomeAI` daemon - wires collaborators into a session
pub struct Daemon {
    config: Config,
    options: DaemonOptions,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config, options: DaemonOptions) -> Self {
        Self { config, options }
    }

    /// Run the session until it terminates or the process is interrupted
    ///
    /// # Errors
    ///
    /// Returns error if a startup precondition fails (credentials, capture
    /// or playback device)
    #[allow(clippy::future_not_send)]
    pub async fn run(self) -> Result<()> {
        let config = self.config;

        let stt = Arc::new(build_speech_to_text(&config)?);
        let model = Arc::new(build_chat_client(&config));
        let synthesizer = Arc::new(build_text_to_speech(&config)?);

        let microphone = MicrophoneCapture::new(config.capture.microphone.as_deref())?;
        let playback: Arc<dyn PlaybackPrimitive> = Arc::new(AudioPlayback::new()?);

        let mut capture = SpeechCaptureGateway::new(
            Box::new(microphone),
            Arc::clone(&stt) as Arc<dyn Recognizer>,
            stt,
            config.capture_settings(),
        );

        match config.capture.energy_threshold {
            EnergyThreshold::Auto => {
                tracing::info!("calibrating microphone, please stay quiet");
                capture.calibrate(CALIBRATION_DURATION).await?;
            }
            EnergyThreshold::Fixed(threshold) => capture.set_energy_threshold(threshold),
        }

        let response = ResponseGateway::new(
            model,
            synthesizer,
            config.response_settings(),
            SpeechCache::new(&config.audio.dir),
        );

        let clips = FeedbackClips {
            listening: load_clip(&config.audio.listening_clip),
            processing: load_clip(&config.audio.processing_clip),
        };

        let mut session_config = config.session.clone();
        session_config.refresh_cache = self.options.refresh_cache;

        let mut controller = SessionController::new(
            session_config,
            capture,
            response,
            AudioFeedbackPlayer::new(Arc::clone(&playback)),
        )
        .with_feedback_clips(clips);

        if !self.options.no_welcome {
            controller.welcome().await;
        }

        tracing::info!(
            "homeai ready - say \"{}\"",
            config.session.activation_word
        );

        let interrupted = tokio::select! {
            () = controller.run() => false,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("interrupted, shutting down");
                true
            }
        };

        if interrupted {
            controller.shutdown().await;
            playback.stop();
        }

        Ok(())
    }
}

/// Build the recogniser/transcriber for the configured provider
///
/// # Errors
///
/// Returns `Error::Config` if the provider's API key is missing
pub fn build_speech_to_text(config: &Config) -> Result<SpeechToText> {
    let key = match config.stt.provider {
        SttProvider::Whisper => config.api_keys.openai.clone(),
        SttProvider::Deepgram => config.api_keys.deepgram.clone(),
    };
    let stt = SpeechToText::new(
        config.stt.provider,
        required_key(key, "speech-to-text")?,
        config.stt.model.clone(),
    )?;
    Ok(stt.with_timeout(config.request_timeout))
}

/// Build the synthesiser for the configured provider
///
/// # Errors
///
/// Returns `Error::Config` if the provider's API key is missing
pub fn build_text_to_speech(config: &Config) -> Result<TextToSpeech> {
    let tts = match config.tts.provider {
        TtsProvider::OpenAI => TextToSpeech::new_openai(
            required_key(config.api_keys.openai.clone(), "text-to-speech")?,
            config.tts.model.clone(),
            config.tts.speed,
        )?,
        TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs(
            required_key(config.api_keys.elevenlabs.clone(), "text-to-speech")?,
            config.tts.model.clone(),
        )?,
    };
    Ok(tts.with_timeout(config.request_timeout))
}

/// Build the language model client
#[must_use]
pub fn build_chat_client(config: &Config) -> ChatClient {
    ChatClient::new(&config.llm.base_url, config.api_keys.openai.clone())
        .with_system_prompt(config.llm.system_prompt.clone())
        .with_temperature(config.llm.temperature)
        .with_timeout(config.request_timeout)
}

fn required_key(key: Option<SecretString>, purpose: &str) -> Result<SecretString> {
    key.ok_or_else(|| Error::Config(format!("API key required for {purpose}")))
}

/// Decode a feedback sound; a missing or broken file is logged and skipped
fn load_clip(path: &Path) -> Option<Clip> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "feedback sound not found, skipping");
        return None;
    }

    match Clip::from_file(path) {
        Ok(clip) => {
            tracing::debug!(
                path = %path.display(),
                duration = ?clip.duration(),
                "loaded feedback sound"
            );
            Some(clip)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load feedback sound");
            None
        }
    }
}
