//! Text-to-speech (TTS) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::collaborators::{AudioFormat, SpeechSynthesizer, SynthesizedAudio, VoiceOptions};
use crate::error::status_error;
use crate::http;
use crate::{Error, Result};

/// Raw PCM rate produced by `OpenAI` TTS
const OPENAI_PCM_RATE: u32 = 24000;

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    /// Parse a provider name from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unknown providers
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }

    /// Default model for the provider
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_multilingual_v2",
        }
    }

    /// Format actually delivered for a requested format
    #[must_use]
    pub const fn output_format(self, requested: AudioFormat) -> AudioFormat {
        match (self, requested) {
            (_, AudioFormat::Mp3) => AudioFormat::Mp3,
            (Self::OpenAI, AudioFormat::Pcm { .. }) => AudioFormat::Pcm {
                sample_rate: OPENAI_PCM_RATE,
            },
            (Self::ElevenLabs, AudioFormat::Pcm { sample_rate }) => {
                AudioFormat::Pcm { sample_rate }
            }
        }
    }
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI` with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: SecretString, model: String, speed: f32) -> Result<Self> {
        Self::new(TtsProvider::OpenAI, api_key, model, speed)
    }

    /// Create a new TTS instance using ElevenLabs with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, model: String) -> Result<Self> {
        // ElevenLabs doesn't use speed in the same way
        Self::new(TtsProvider::ElevenLabs, api_key, model, 1.0)
    }

    /// Create a new TTS instance for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        provider: TtsProvider,
        api_key: SecretString,
        model: String,
        speed: f32,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!("API key required for {provider:?} TTS")));
        }

        Ok(Self {
            client: http::client(http::DEFAULT_REQUEST_TIMEOUT),
            api_key,
            speed,
            model,
            provider,
        })
    }

    /// Fail requests that take longer than `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http::client(timeout);
        self
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str, voice: &VoiceOptions) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &voice.voice_id,
            speed: self.speed,
            response_format: match voice.format {
                AudioFormat::Mp3 => "mp3",
                AudioFormat::Pcm { .. } => "pcm",
            },
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI TTS", status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, voice: &VoiceOptions) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            language_code: &'a str,
        }

        let output_format = match voice.format {
            AudioFormat::Mp3 => "mp3_44100_128".to_string(),
            AudioFormat::Pcm { sample_rate } => format!("pcm_{sample_rate}"),
        };
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format={output_format}",
            voice.voice_id
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            language_code: voice
                .language_code
                .split(['-', '_'])
                .next()
                .unwrap_or(&voice.language_code),
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("ElevenLabs TTS", status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<SynthesizedAudio> {
        tracing::debug!(
            chars = text.len(),
            voice = %voice.voice_id,
            language = %voice.language_code,
            "synthesizing speech"
        );

        let bytes = match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, voice).await?,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await?,
        };

        if bytes.is_empty() {
            return Err(Error::ServiceUnavailable("TTS returned no audio".to_string()));
        }

        Ok(SynthesizedAudio {
            format: self.provider.output_format(voice.format),
            bytes,
        })
    }
}
