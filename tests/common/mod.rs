//! Shared test utilities
//!
//! Scripted collaborators for driving a session without audio hardware or
//! network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use homeai::collaborators::{
    AudioFormat, CaptureDevice, LanguageModel, Loops, PlaybackPrimitive, Recognizer,
    RecordLimits, SpeechSynthesizer, SynthesizedAudio, Transcriber, VoiceOptions,
};
use homeai::session::{
    AudioFeedbackPlayer, CaptureSettings, FeedbackClips, ResponseGateway, ResponseSettings,
    SessionConfig, SessionController, SpeechCache, SpeechCaptureGateway,
};
use homeai::voice::Clip;
use homeai::{Error, Result};

/// Sample rate used by all test audio
pub const TEST_RATE: u32 = 16000;

/// A short clip of silence
#[must_use]
pub fn test_clip(name: &str) -> Clip {
    Clip::from_samples(name, vec![0.0; 160], TEST_RATE)
}

/// What the playback primitive was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Load(String),
    Play(String, Loops),
    Fade,
    Stop,
}

/// Busy polls a single play lasts unless held
const SINGLE_PLAY_POLLS: usize = 3;

/// How long the current playback stays audible
#[derive(Debug, Clone, Copy)]
enum Audible {
    Polls(usize),
    UntilStopped,
}

#[derive(Default)]
struct PlayerState {
    loaded: Option<String>,
    playing: Option<Audible>,
    hold_next: bool,
    failing: Vec<String>,
}

/// Playback primitive that records every call
///
/// Single plays stay busy for a few `is_busy` polls, or until stopped when
/// held; loops stay busy until stopped or faded.
#[derive(Default)]
pub struct InstrumentedPlayback {
    events: Mutex<Vec<Event>>,
    state: Mutex<PlayerState>,
    overlaps: AtomicUsize,
}

impl InstrumentedPlayback {
    /// All recorded events
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Names of clips started, in order
    #[must_use]
    pub fn played(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Play(name, _) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// How often `play` was called while earlier audio was still audible
    #[must_use]
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Index of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events().iter().position(predicate)
    }

    /// Keep the next single play audible until it is stopped or faded
    pub fn hold_next_single_play(&self) {
        self.state.lock().unwrap().hold_next = true;
    }

    /// Make `play` fail whenever `clip` is loaded
    pub fn fail_clip(&self, clip: &str) {
        self.state.lock().unwrap().failing.push(clip.to_string());
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl PlaybackPrimitive for InstrumentedPlayback {
    fn load(&self, clip: &Clip) -> Result<()> {
        self.record(Event::Load(clip.name().to_string()));
        self.state.lock().unwrap().loaded = Some(clip.name().to_string());
        Ok(())
    }

    fn play(&self, loops: Loops) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(name) = state.loaded.clone() else {
            return Err(Error::Audio("nothing loaded".to_string()));
        };
        if state.failing.contains(&name) {
            return Err(Error::Audio(format!("{name} cannot be played")));
        }
        if state.playing.is_some() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let held = std::mem::take(&mut state.hold_next);
        state.playing = Some(match loops {
            Loops::Once if !held => Audible::Polls(SINGLE_PLAY_POLLS),
            Loops::Once | Loops::Forever => Audible::UntilStopped,
        });
        drop(state);

        self.record(Event::Play(name, loops));
        Ok(())
    }

    fn is_busy(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.playing {
            Some(Audible::UntilStopped) => true,
            Some(Audible::Polls(0)) | None => {
                state.playing = None;
                false
            }
            Some(Audible::Polls(n)) => {
                state.playing = Some(Audible::Polls(n - 1));
                true
            }
        }
    }

    fn fade_out(&self, _duration: Duration) {
        self.record(Event::Fade);
        self.state.lock().unwrap().playing = None;
    }

    fn stop(&self) {
        self.record(Event::Stop);
        self.state.lock().unwrap().playing = None;
    }
}

/// Observes the scripted capture device after it was boxed
#[derive(Clone, Default)]
pub struct DeviceMonitor {
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub is_open: Arc<AtomicBool>,
    pub recorded_while_closed: Arc<AtomicBool>,
    script: Arc<Mutex<VecDeque<Result<Vec<f32>>>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl DeviceMonitor {
    /// Queue the result of the next recording
    pub fn push(&self, result: Result<Vec<f32>>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Make every recording take `delay` before it returns
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

/// Capture device returning scripted recordings
///
/// Without a script every recording is a short burst of "speech".
pub struct ScriptedDevice {
    monitor: DeviceMonitor,
}

impl ScriptedDevice {
    #[must_use]
    pub fn new(monitor: DeviceMonitor) -> Self {
        Self { monitor }
    }
}

#[async_trait(?Send)]
impl CaptureDevice for ScriptedDevice {
    fn open(&mut self) -> Result<()> {
        self.monitor.opens.fetch_add(1, Ordering::SeqCst);
        self.monitor.is_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if self.monitor.is_open.swap(false, Ordering::SeqCst) {
            self.monitor.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn record(&mut self, _limits: &RecordLimits) -> Result<Vec<f32>> {
        if !self.monitor.is_open.load(Ordering::SeqCst) {
            self.monitor.recorded_while_closed.store(true, Ordering::SeqCst);
        }
        let delay = *self.monitor.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.monitor
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![0.2; 1600]))
    }

    async fn ambient_level(&mut self, _duration: Duration) -> Result<f32> {
        Ok(0.004)
    }

    fn sample_rate(&self) -> u32 {
        TEST_RATE
    }
}

/// Recogniser answering from a script; `Err(NoSpeechDetected)` when exhausted
#[derive(Default)]
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Result<String>>>,
    pub calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn say(&self, text: &str) {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, error: Error) {
        self.script.lock().unwrap().push_back(Err(error));
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _wav: &[u8], _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(Error::NoSpeechDetected))
    }
}

/// Transcriber answering from a script; empty text when exhausted
#[derive(Default)]
pub struct ScriptedTranscriber {
    script: Mutex<VecDeque<Result<String>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn say(&self, text: &str) {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, error: Error) {
        self.script.lock().unwrap().push_back(Err(error));
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _wav: &[u8], _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Language model answering from a script and recording prompts
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<(String, String)>>,
    stalled: AtomicBool,
}

impl ScriptedModel {
    /// Never answer; every request hangs
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn answer(&self, text: &str) {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, error: Error) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// `(prompt, model)` pairs received
    #[must_use]
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), model.to_string()));
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::ServiceUnavailable("no scripted answer".to_string())))
    }
}

/// Synthesiser returning a short PCM clip and recording every text
#[derive(Default)]
pub struct RecordingSynthesizer {
    texts: Mutex<Vec<String>>,
    failures: AtomicUsize,
}

impl RecordingSynthesizer {
    /// Texts synthesised so far
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    /// Fail the next `count` requests
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &VoiceOptions) -> Result<SynthesizedAudio> {
        self.texts.lock().unwrap().push(text.to_string());

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::ServiceUnavailable("synthesis down".to_string()));
        }

        let bytes = (0..160_i16).flat_map(|i| (i * 100).to_le_bytes()).collect();
        Ok(SynthesizedAudio {
            format: AudioFormat::Pcm {
                sample_rate: TEST_RATE,
            },
            bytes,
        })
    }
}

/// Limits used by the scripted capture
#[must_use]
pub fn test_limits() -> RecordLimits {
    RecordLimits {
        timeout: Duration::from_secs(3),
        max_duration: Duration::from_secs(10),
        pause: Duration::from_millis(800),
        energy_threshold: 0.01,
    }
}

/// Deadline for scripted remote calls
pub const TEST_REQUEST_TIMEOUT: Duration = Duration::from_millis(200);

/// Session settings with fast retries
#[must_use]
pub fn test_config() -> SessionConfig {
    SessionConfig {
        device_retry_delay: Duration::from_millis(10),
        fade_duration: Duration::from_millis(50),
        ..SessionConfig::default()
    }
}

/// A controller wired to scripted collaborators
pub struct Harness {
    pub controller: SessionController,
    pub playback: Arc<InstrumentedPlayback>,
    pub device: DeviceMonitor,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub model: Arc<ScriptedModel>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub cache_dir: tempfile::TempDir,
}

impl Harness {
    /// Build a harness with feedback clips named "listening" and "processing"
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let playback = Arc::new(InstrumentedPlayback::default());
        let device = DeviceMonitor::default();
        let recognizer = Arc::new(ScriptedRecognizer::default());
        let transcriber = Arc::new(ScriptedTranscriber::default());
        let model = Arc::new(ScriptedModel::default());
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let cache_dir = tempfile::tempdir().unwrap();

        let capture = SpeechCaptureGateway::new(
            Box::new(ScriptedDevice::new(device.clone())),
            Arc::clone(&recognizer) as Arc<dyn Recognizer>,
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            CaptureSettings {
                activation_limits: test_limits(),
                command_limits: test_limits(),
                recognizer_language: "en-GB".to_string(),
                transcription_language: "en".to_string(),
                recordings_dir: None,
                request_timeout: TEST_REQUEST_TIMEOUT,
            },
        );

        let response = ResponseGateway::new(
            Arc::clone(&model) as Arc<dyn LanguageModel>,
            Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>,
            ResponseSettings {
                model: "gpt-3.5-turbo".to_string(),
                voice: VoiceOptions {
                    voice_id: "alloy".to_string(),
                    language_code: "en-GB".to_string(),
                    format: AudioFormat::Mp3,
                },
                request_timeout: TEST_REQUEST_TIMEOUT,
            },
            SpeechCache::new(cache_dir.path()),
        );

        let player = AudioFeedbackPlayer::new(Arc::clone(&playback) as Arc<dyn PlaybackPrimitive>);
        let controller = SessionController::new(config, capture, response, player)
            .with_feedback_clips(FeedbackClips {
                listening: Some(test_clip("listening")),
                processing: Some(test_clip("processing")),
            });

        Self {
            controller,
            playback,
            device,
            recognizer,
            transcriber,
            model,
            synthesizer,
            cache_dir,
        }
    }
}
