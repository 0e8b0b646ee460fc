//! Collaborator interfaces consumed by the session
//!
//! Playback is synchronous and returns immediately. Capture and remote
//! services are async so a pending recording or request never blocks the
//! runtime. Concrete implementations live in [`crate::voice`] and
//! [`crate::llm`]; tests provide scripted doubles.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::voice::Clip;

/// Bounds for a single recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordLimits {
    /// How long to wait for speech to start
    pub timeout: Duration,
    /// Longest utterance to record once speech started
    pub max_duration: Duration,
    /// Silence that ends an utterance
    pub pause: Duration,
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,
}

/// Microphone abstraction
///
/// `open` acquires the device, `close` releases it. `record` may only be
/// called between the two. Audio streams are usually tied to the thread that
/// opened them, so the futures are not `Send`.
#[async_trait(?Send)]
pub trait CaptureDevice {
    /// Acquire the device
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureDevice` if the device cannot be opened
    fn open(&mut self) -> Result<()>;

    /// Release the device; safe to call when not open
    fn close(&mut self);

    /// Record one utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureTimeout` if no speech starts within
    /// `limits.timeout`, `Error::CaptureDevice` if capture fails
    async fn record(&mut self, limits: &RecordLimits) -> Result<Vec<f32>>;

    /// Measure ambient noise (RMS) over `duration`
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureDevice` if capture fails
    async fn ambient_level(&mut self, duration: Duration) -> Result<f32>;

    /// Sample rate of recorded audio
    fn sample_rate(&self) -> u32;
}

/// Short-utterance recogniser used for activation listening
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognise speech in WAV audio
    ///
    /// # Errors
    ///
    /// `Error::NoSpeechDetected`, `Error::Unintelligible`, or an upstream error
    async fn recognize(&self, wav: &[u8], language: &str) -> Result<String>;
}

/// Free-text transcriber used for commands
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio; the result may be empty
    ///
    /// # Errors
    ///
    /// `Error::ServiceUnavailable` (or another upstream error)
    async fn transcribe(&self, wav: &[u8], language: &str) -> Result<String>;
}

/// Language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt
    ///
    /// # Errors
    ///
    /// `Error::ServiceUnavailable` or `Error::QuotaExceeded`
    async fn complete(&self, prompt: &str, model: &str) -> Result<String>;
}

/// Encoding of synthesised audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    /// Signed 16-bit little-endian mono PCM
    Pcm { sample_rate: u32 },
}

/// Synthesised speech
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

/// Options passed to the synthesiser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOptions {
    pub voice_id: String,
    pub language_code: String,
    pub format: AudioFormat,
}

/// Text-to-speech synthesiser
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesise `text`
    ///
    /// # Errors
    ///
    /// `Error::ServiceUnavailable` (or another upstream error)
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<SynthesizedAudio>;
}

/// How often a clip is played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loops {
    Once,
    Forever,
}

/// Low-level playback primitive
///
/// Holds one loaded clip; `play` returns immediately and audio continues on the
/// implementation's own thread until it ends, is stopped, or has faded out.
pub trait PlaybackPrimitive: Send + Sync {
    /// Load a clip, replacing the previous one
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the clip cannot be prepared for the device
    fn load(&self, clip: &Clip) -> Result<()>;

    /// Start playing the loaded clip
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if nothing is loaded or the device fails
    fn play(&self, loops: Loops) -> Result<()>;

    /// Whether audio is currently playing (including an ongoing fade)
    fn is_busy(&self) -> bool;

    /// Ramp volume to silence over `duration`, then stop
    fn fade_out(&self, duration: Duration);

    /// Stop immediately
    fn stop(&self);
}
