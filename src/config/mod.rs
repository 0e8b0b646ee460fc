//! Configuration management for `HomeAI`
//!
//! The configuration is built once at startup (env > toml > default),
//! validated, and handed to the session by value.

pub mod file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use self::file::{EnergyThresholdFile, HomeAiConfigFile, WordList};
use crate::collaborators::{AudioFormat, RecordLimits, VoiceOptions};
use crate::http::DEFAULT_REQUEST_TIMEOUT;
use crate::llm::DEFAULT_BASE_URL;
use crate::session::{CaptureSettings, Messages, ResponseSettings, SessionConfig};
use crate::vocabulary::{CommandWords, tokenize};
use crate::voice::{SttProvider, TtsProvider};
use crate::{Error, Result};

/// Default PCM rate requested from the synthesiser
const DEFAULT_PCM_RATE: u32 = 24000;

/// `HomeAI` configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Session behaviour
    pub session: SessionConfig,

    /// Microphone and speech detection
    pub capture: CaptureConfig,

    /// Speech-to-text
    pub stt: SttConfig,

    /// Language model
    pub llm: LlmConfig,

    /// Text-to-speech
    pub tts: TtsConfig,

    /// Feedback sounds and speech cache
    pub audio: AudioConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Longest a single remote request may take
    pub request_timeout: Duration,
}

/// Ambient noise threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergyThreshold {
    /// Measure ambient noise at startup
    Auto,
    /// Fixed RMS level
    Fixed(f32),
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Substring of the input device name; default device when `None`
    pub microphone: Option<String>,

    /// How long to wait for speech to start
    pub listen_duration: Duration,

    /// Longest utterance
    pub phrase_time_limit: Duration,

    /// Silence that ends an utterance
    pub pause_threshold: Duration,

    pub energy_threshold: EnergyThreshold,

    /// Directory for the last activation/command recordings
    pub recordings_dir: Option<PathBuf>,
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
    pub recognizer_language: String,
    pub transcription_language: String,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub model: String,
    pub voice: String,
    pub language: String,
    pub format: AudioFormat,
    pub speed: f32,
}

/// Audio files configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Directory with feedback sounds and the speech cache
    pub dir: PathBuf,

    /// Acknowledgement cue
    pub listening_clip: PathBuf,

    /// Processing loop
    pub processing_clip: PathBuf,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, chat, TTS)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load configuration from the file at `path` (or the standard path) and
    /// the process environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file or the resulting configuration is
    /// invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::from_sources(fc, |name| std::env::var(name).ok())
    }

    /// Build and validate a configuration from a parsed file and an
    /// environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a value is invalid
    pub fn from_sources<F>(fc: HomeAiConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
        };

        let activation_word = env("HOMEAI_ACTIVATION_WORD")
            .or(fc.session.activation_word)
            .unwrap_or_else(|| "computer".to_string())
            .trim()
            .to_lowercase();

        let defaults = CommandWords::default();
        let commands = CommandWords {
            stop: words_or(fc.commands.stop, defaults.stop),
            mute: words_or(fc.commands.mute, defaults.mute),
            unmute: words_or(fc.commands.unmute, defaults.unmute),
            terminate: words_or(fc.commands.terminate, defaults.terminate),
        };

        let default_messages = Messages::default();
        let m = fc.messages;
        let messages = Messages {
            welcome: m.welcome.unwrap_or(default_messages.welcome),
            did_not_understand: m
                .did_not_understand
                .unwrap_or(default_messages.did_not_understand),
            shutdown: m.shutdown.unwrap_or(default_messages.shutdown),
            generic_error: m.generic_error.unwrap_or(default_messages.generic_error),
            muted: m.muted.unwrap_or(default_messages.muted),
            quota_exceeded: m.quota_exceeded.unwrap_or(default_messages.quota_exceeded),
        }
        .with_activation_word(&activation_word);

        // Audio directory (~/.local/share/homeai/audio on Linux)
        let audio_dir = env("HOMEAI_AUDIO_DIR")
            .or(fc.audio.dir)
            .map_or_else(default_audio_dir, PathBuf::from);
        let audio = AudioConfig {
            listening_clip: audio_dir.join(
                fc.audio
                    .listening_clip
                    .unwrap_or_else(|| "listening.wav".to_string()),
            ),
            processing_clip: audio_dir.join(
                fc.audio
                    .processing_clip
                    .unwrap_or_else(|| "processing.wav".to_string()),
            ),
            dir: audio_dir,
        };

        let session = SessionConfig {
            activation_word,
            commands,
            messages,
            fade_duration: seconds("audio.fade_duration", fc.audio.fade_duration, 1.0)?,
            device_retry_delay: seconds(
                "session.device_retry_delay",
                fc.session.device_retry_delay,
                1.0,
            )?,
            bypass_response_cache: fc.audio.bypass_response_cache.unwrap_or(true),
            answer_in_background: fc.session.answer_in_background.unwrap_or(false),
            refresh_cache: false,
        };

        let request_timeout = seconds(
            "session.request_timeout",
            fc.session.request_timeout,
            DEFAULT_REQUEST_TIMEOUT.as_secs_f64(),
        )?;

        let energy_threshold = match fc.capture.energy_threshold {
            None => EnergyThreshold::Auto,
            Some(EnergyThresholdFile::Named(name)) if name.eq_ignore_ascii_case("auto") => {
                EnergyThreshold::Auto
            }
            Some(EnergyThresholdFile::Named(name)) => {
                return Err(Error::Config(format!(
                    "capture.energy_threshold must be a number or \"auto\", got \"{name}\""
                )));
            }
            Some(EnergyThresholdFile::Fixed(value)) => EnergyThreshold::Fixed(value),
        };

        let capture = CaptureConfig {
            microphone: env("HOMEAI_MICROPHONE").or(fc.capture.microphone),
            listen_duration: seconds("capture.listen_duration", fc.capture.listen_duration, 3.0)?,
            phrase_time_limit: seconds(
                "capture.phrase_time_limit",
                fc.capture.phrase_time_limit,
                10.0,
            )?,
            pause_threshold: seconds("capture.pause_threshold", fc.capture.pause_threshold, 0.8)?,
            energy_threshold,
            recordings_dir: fc.capture.recordings_dir.map(PathBuf::from),
        };

        let stt = SttConfig {
            provider: SttProvider::parse(fc.stt.provider.as_deref().unwrap_or("whisper"))?,
            model: fc.stt.model.unwrap_or_else(|| "whisper-1".to_string()),
            recognizer_language: fc
                .stt
                .recognizer_language
                .unwrap_or_else(|| "en-GB".to_string()),
            transcription_language: fc
                .stt
                .transcription_language
                .unwrap_or_else(|| "en".to_string()),
        };

        let llm = LlmConfig {
            model: env("HOMEAI_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            base_url: fc
                .llm
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            system_prompt: fc.llm.system_prompt,
            temperature: fc.llm.temperature.unwrap_or(0.0),
        };

        let tts_provider = TtsProvider::parse(fc.tts.provider.as_deref().unwrap_or("openai"))?;
        let format = match fc.tts.format.as_deref().unwrap_or("mp3") {
            "mp3" => AudioFormat::Mp3,
            "pcm" => AudioFormat::Pcm {
                sample_rate: fc.tts.sample_rate.unwrap_or(DEFAULT_PCM_RATE),
            },
            other => {
                return Err(Error::Config(format!(
                    "tts.format must be \"mp3\" or \"pcm\", got \"{other}\""
                )));
            }
        };
        let tts = TtsConfig {
            provider: tts_provider,
            model: fc
                .tts
                .model
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            voice: env("HOMEAI_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| default_voice(tts_provider).to_string()),
            language: fc.tts.language.unwrap_or_else(|| "en-GB".to_string()),
            format,
            speed: fc.tts.speed.unwrap_or(1.0),
        };

        let config = Self {
            session,
            capture,
            stt,
            llm,
            tts,
            audio,
            api_keys,
            request_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before a session is created
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        let word = &self.session.activation_word;
        let tokens = tokenize(word);
        if tokens.len() != 1 || tokens[0] != *word {
            return Err(Error::Config(format!(
                "activation word must be a single word, got \"{word}\""
            )));
        }

        let mut owners: HashMap<String, &str> = HashMap::new();
        for (command, words) in self.session.commands.iter() {
            if words.is_empty() {
                return Err(Error::Config(format!(
                    "no control words configured for \"{command}\""
                )));
            }
            for w in words {
                let normalized = w.to_lowercase();
                if normalized == *word {
                    return Err(Error::Config(format!(
                        "control word \"{w}\" equals the activation word"
                    )));
                }
                if let Some(other) = owners.insert(normalized, command.name()) {
                    if other != command.name() {
                        return Err(Error::Config(format!(
                            "control word \"{w}\" is used for both \"{other}\" and \"{command}\""
                        )));
                    }
                }
            }
        }

        let keys = &self.api_keys;
        match self.stt.provider {
            SttProvider::Whisper => require(keys.openai.as_ref(), "OPENAI_API_KEY", "Whisper STT")?,
            SttProvider::Deepgram => {
                require(keys.deepgram.as_ref(), "DEEPGRAM_API_KEY", "Deepgram STT")?;
            }
        }
        match self.tts.provider {
            TtsProvider::OpenAI => require(keys.openai.as_ref(), "OPENAI_API_KEY", "OpenAI TTS")?,
            TtsProvider::ElevenLabs => {
                require(keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY", "ElevenLabs TTS")?;
            }
        }
        // Local OpenAI-compatible servers run without a key
        if self.llm.base_url.trim_end_matches('/') == DEFAULT_BASE_URL {
            require(keys.openai.as_ref(), "OPENAI_API_KEY", "the language model")?;
        }

        if !self.tts.speed.is_finite() || self.tts.speed <= 0.0 {
            return Err(Error::Config("tts.speed must be positive".to_string()));
        }
        if let EnergyThreshold::Fixed(value) = self.capture.energy_threshold {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "capture.energy_threshold must be between 0 and 1, got {value}"
                )));
            }
        }

        Ok(())
    }

    /// Bounds used while listening for the activation word and for commands
    #[must_use]
    pub fn record_limits(&self) -> RecordLimits {
        RecordLimits {
            timeout: self.capture.listen_duration,
            max_duration: self.capture.phrase_time_limit,
            pause: self.capture.pause_threshold,
            energy_threshold: match self.capture.energy_threshold {
                EnergyThreshold::Fixed(value) => value,
                EnergyThreshold::Auto => crate::session::MIN_ENERGY_THRESHOLD,
            },
        }
    }

    /// Settings for the speech capture gateway
    #[must_use]
    pub fn capture_settings(&self) -> CaptureSettings {
        let limits = self.record_limits();
        CaptureSettings {
            activation_limits: limits,
            command_limits: limits,
            recognizer_language: self.stt.recognizer_language.clone(),
            transcription_language: self.stt.transcription_language.clone(),
            recordings_dir: self.capture.recordings_dir.clone(),
            request_timeout: self.request_timeout,
        }
    }

    /// Settings for the response gateway
    #[must_use]
    pub fn response_settings(&self) -> ResponseSettings {
        ResponseSettings {
            model: self.llm.model.clone(),
            voice: VoiceOptions {
                voice_id: self.tts.voice.clone(),
                language_code: self.tts.language.clone(),
                format: self.tts.format,
            },
            request_timeout: self.request_timeout,
        }
    }
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn require(key: Option<&SecretString>, var: &str, purpose: &str) -> Result<()> {
    match key {
        Some(key) if !key.expose_secret().is_empty() => Ok(()),
        _ => Err(Error::Config(format!("{var} is required for {purpose}"))),
    }
}

fn words_or(words: Option<WordList>, default: Vec<String>) -> Vec<String> {
    words.map_or(default, WordList::into_words)
}

/// Positive duration in seconds
fn seconds(name: &str, value: Option<f64>, default: f64) -> Result<Duration> {
    let secs = value.unwrap_or(default);
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::Config(format!("{name} must be positive, got {secs}")));
    }
    Ok(Duration::from_secs_f64(secs))
}

const fn default_voice(provider: TtsProvider) -> &'static str {
    match provider {
        TtsProvider::OpenAI => "alloy",
        // "Rachel"
        TtsProvider::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
    }
}

/// Default audio directory: `~/.local/share/homeai/audio`
fn default_audio_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/homeai/audio"),
        |d| d.data_dir().join("homeai").join("audio"),
    )
}
