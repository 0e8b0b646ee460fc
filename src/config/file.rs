//! TOML configuration file loading
//!
//! Supports `~/.config/homeai/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HomeAiConfigFile {
    /// Activation behaviour
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Control words per command
    #[serde(default)]
    pub commands: CommandsFileConfig,

    /// Microphone and speech detection
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech-to-text
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Language model
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Text-to-speech
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Feedback sounds and speech cache
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Spoken system messages
    #[serde(default)]
    pub messages: MessagesFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Word that wakes the session (e.g. "computer")
    pub activation_word: Option<String>,

    /// Play answers in the background so they can be stopped
    pub answer_in_background: Option<bool>,

    /// Seconds to wait after a capture device failure
    pub device_retry_delay: Option<f64>,

    /// Seconds a remote service (STT, LLM, TTS) may take to answer
    pub request_timeout: Option<f64>,
}

/// A list of words, written either as an array or comma separated
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WordList {
    List(Vec<String>),
    Csv(String),
}

impl WordList {
    /// Trimmed, non-empty words
    #[must_use]
    pub fn into_words(self) -> Vec<String> {
        let words = match self {
            Self::List(words) => words,
            Self::Csv(csv) => csv.split(',').map(str::to_string).collect(),
        };
        words
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect()
    }
}

/// Control words
#[derive(Debug, Default, Deserialize)]
pub struct CommandsFileConfig {
    pub stop: Option<WordList>,
    pub mute: Option<WordList>,
    pub unmute: Option<WordList>,
    pub terminate: Option<WordList>,
}

/// Energy threshold: a number or "auto"
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnergyThresholdFile {
    Fixed(f32),
    Named(String),
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Substring of the input device name
    pub microphone: Option<String>,

    /// Seconds to wait for speech to start
    pub listen_duration: Option<f64>,

    /// Longest utterance in seconds
    pub phrase_time_limit: Option<f64>,

    /// Seconds of silence that end an utterance
    pub pause_threshold: Option<f64>,

    /// RMS threshold, or "auto" to calibrate at startup
    pub energy_threshold: Option<EnergyThresholdFile>,

    /// Directory for the last activation/command recordings
    pub recordings_dir: Option<String>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,

    /// Model identifier (e.g. "whisper-1")
    pub model: Option<String>,

    /// Language for activation recognition (e.g. "en-GB")
    pub recognizer_language: Option<String>,

    /// Language for command transcription (e.g. "en")
    pub transcription_language: Option<String>,
}

/// Language model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-3.5-turbo")
    pub model: Option<String>,

    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,

    /// System message sent with every prompt
    pub system_prompt: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<String>,

    /// Model identifier (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// Language code (e.g. "en-GB")
    pub language: Option<String>,

    /// "mp3" or "pcm"
    pub format: Option<String>,

    /// Sample rate for PCM output
    pub sample_rate: Option<u32>,

    /// Speed multiplier
    pub speed: Option<f32>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Directory with feedback sounds and the speech cache
    pub dir: Option<String>,

    /// Acknowledgement cue (relative to `dir`)
    pub listening_clip: Option<String>,

    /// Processing loop (relative to `dir`)
    pub processing_clip: Option<String>,

    /// Fade-out in seconds
    pub fade_duration: Option<f64>,

    /// Synthesise answers without touching the cache
    pub bypass_response_cache: Option<bool>,
}

/// System message texts
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesFileConfig {
    pub welcome: Option<String>,
    pub did_not_understand: Option<String>,
    pub shutdown: Option<String>,
    pub generic_error: Option<String>,
    pub muted: Option<String>,
    pub quota_exceeded: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist. Without one the standard path is used and
/// a missing file yields defaults.
///
/// # Errors
///
/// Returns `Error::Config` if an explicit file is missing, or if a file
/// cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<HomeAiConfigFile> {
    let path = match path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(HomeAiConfigFile::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let config = parse_config(&content)
        .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns `Error::Toml` if the contents are not a valid config
pub fn parse_config(content: &str) -> Result<HomeAiConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/homeai/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("homeai").join("config.toml"))
}
