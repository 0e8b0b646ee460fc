//! Voice session
//!
//! [`SessionController`] drives the listen, capture, respond cycle. It owns
//! the [`Session`] and is the only place that starts or ends background
//! feedback: every transition that produces audio first resolves the
//! running feedback through [`SessionController::ensure_feedback_stopped`].

mod cache;
mod capture;
mod feedback;
mod messages;
mod response;

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

pub use cache::{CachePolicy, SpeechCache};
pub use capture::{
    CaptureSettings, CommandOutcome, MIN_ENERGY_THRESHOLD, RecognitionOutcome,
    SpeechCaptureGateway,
};
pub use feedback::{AudioFeedbackPlayer, FeedbackHandle, Resolution};
pub use messages::{MessageKey, Messages};
pub use response::{
    ResponseGateway, ResponseOutcome, ResponseSettings, UpstreamFailure, UpstreamKind,
};

use crate::collaborators::Loops;
use crate::error::ErrorKind;
use crate::vocabulary::{CommandWords, ControlCommand, ControlVocabulary};
use crate::voice::Clip;

/// Cache key of the most recent answer
const RESPONSE_CACHE_KEY: &str = "response";

/// Where the session is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingActivation,
    /// Announcing that commands are suppressed
    Muted,
    CapturingCommand,
    AwaitingResponse,
    Speaking,
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingActivation => "awaiting_activation",
            Self::Muted => "muted",
            Self::CapturingCommand => "capturing_command",
            Self::AwaitingResponse => "awaiting_response",
            Self::Speaking => "speaking",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Behaviour settings of the session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub activation_word: String,
    pub commands: CommandWords,
    pub messages: Messages,
    /// Fade applied to the processing loop before an answer and on "stop"
    pub fade_duration: Duration,
    /// Pause after a capture device failure while waiting for activation
    pub device_retry_delay: Duration,
    /// Synthesise answers without touching the speech cache
    pub bypass_response_cache: bool,
    /// Play answers in the background so "stop" can interrupt them
    pub answer_in_background: bool,
    /// Resynthesise each system message once instead of using the cache
    pub refresh_cache: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            activation_word: "computer".to_string(),
            commands: CommandWords::default(),
            messages: Messages::default(),
            fade_duration: Duration::from_secs(1),
            device_retry_delay: Duration::from_secs(1),
            bypass_response_cache: true,
            answer_in_background: false,
            refresh_cache: false,
        }
    }
}

/// Pre-recorded feedback sounds; missing ones are skipped
#[derive(Debug, Clone, Default)]
pub struct FeedbackClips {
    /// Acknowledges the activation word
    pub listening: Option<Clip>,
    /// Loops while waiting on the language model
    pub processing: Option<Clip>,
}

/// Mutable state of the running session
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    muted: bool,
    /// The capture device failed and the user has been told
    device_outage: bool,
    active_feedback: Option<FeedbackHandle>,
    pending_command: Option<CommandOutcome>,
    pending_answer: Option<String>,
}

impl Session {
    const fn new() -> Self {
        Self {
            state: SessionState::AwaitingActivation,
            muted: false,
            device_outage: false,
            active_feedback: None,
            pending_command: None,
            pending_answer: None,
        }
    }
}

/// Drives the session state machine
pub struct SessionController {
    config: SessionConfig,
    vocabulary: ControlVocabulary,
    capture: SpeechCaptureGateway,
    response: ResponseGateway,
    player: AudioFeedbackPlayer,
    clips: FeedbackClips,
    refreshed: HashSet<MessageKey>,
    session: Session,
}

impl SessionController {
    /// Create a controller in `AwaitingActivation`
    #[must_use]
    pub fn new(
        config: SessionConfig,
        capture: SpeechCaptureGateway,
        response: ResponseGateway,
        player: AudioFeedbackPlayer,
    ) -> Self {
        let vocabulary = ControlVocabulary::new(&config.activation_word, &config.commands);
        Self {
            config,
            vocabulary,
            capture,
            response,
            player,
            clips: FeedbackClips::default(),
            refreshed: HashSet::new(),
            session: Session::new(),
        }
    }

    /// Use these feedback sounds
    #[must_use]
    pub fn with_feedback_clips(mut self, clips: FeedbackClips) -> Self {
        self.clips = clips;
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.session.state
    }

    /// Whether command capture is suppressed
    #[must_use]
    pub const fn is_muted(&self) -> bool {
        self.session.muted
    }

    /// Whether a background playback is owned by the session
    #[must_use]
    pub const fn has_active_feedback(&self) -> bool {
        self.session.active_feedback.is_some()
    }

    /// Speak the welcome message followed by the listening cue
    pub async fn welcome(&mut self) {
        self.announce(MessageKey::Welcome).await;
        self.start_feedback(self.clips.listening.clone(), Loops::Once)
            .await;
        self.ensure_feedback_stopped(Resolution::Drain).await;
    }

    /// Run until the session shuts down
    pub async fn run(&mut self) {
        tracing::info!(
            activation_word = self.vocabulary.activation_word(),
            "session started"
        );

        while self.session.state != SessionState::ShuttingDown {
            self.step().await;
        }

        self.ensure_feedback_stopped(Resolution::Stop).await;
        tracing::info!("session ended");
    }

    /// Execute the current state and move to the next one
    pub async fn step(&mut self) -> SessionState {
        let from = self.session.state;
        let next = match from {
            SessionState::AwaitingActivation => self.await_activation().await,
            SessionState::Muted => {
                self.announce(MessageKey::Muted).await;
                SessionState::AwaitingActivation
            }
            SessionState::CapturingCommand => self.capture_command().await,
            SessionState::AwaitingResponse => self.await_response().await,
            SessionState::Speaking => self.speak_answer().await,
            SessionState::ShuttingDown => SessionState::ShuttingDown,
        };

        if next != from {
            tracing::debug!(%from, to = %next, "state transition");
        }
        self.session.state = next;
        next
    }

    /// Silence whatever the session is playing and end it
    pub async fn shutdown(&mut self) {
        self.ensure_feedback_stopped(Resolution::Stop).await;
        self.session.state = SessionState::ShuttingDown;
    }

    async fn await_activation(&mut self) -> SessionState {
        let outcome = self.capture.listen_for_activation().await;
        if let RecognitionOutcome::DeviceError(reason) = outcome {
            tracing::error!(
                reason = %reason,
                retry_in = ?self.config.device_retry_delay,
                "capture device failed while waiting for activation"
            );
            // Tell the user once per outage, not on every retry
            if !self.session.device_outage {
                self.session.device_outage = true;
                self.announce(MessageKey::for_error(ErrorKind::CaptureDeviceFailure))
                    .await;
            }
            tokio::time::sleep(self.config.device_retry_delay).await;
            return SessionState::AwaitingActivation;
        }

        if self.session.device_outage {
            tracing::info!("capture device recovered");
            self.session.device_outage = false;
        }

        let RecognitionOutcome::Recognized(tokens) = outcome else {
            return SessionState::AwaitingActivation;
        };

        let command = self.vocabulary.classify(&tokens);
        if command != ControlCommand::None {
            tracing::info!(%command, "activation recognised");
        }

        match command {
            ControlCommand::None => SessionState::AwaitingActivation,
            ControlCommand::Activation => {
                if !self.session.muted {
                    self.start_feedback(self.clips.listening.clone(), Loops::Once)
                        .await;
                }
                SessionState::CapturingCommand
            }
            ControlCommand::Stop => {
                self.ensure_feedback_stopped(Resolution::Fade(self.config.fade_duration))
                    .await;
                SessionState::AwaitingActivation
            }
            ControlCommand::Mute => {
                self.session.muted = true;
                SessionState::AwaitingActivation
            }
            ControlCommand::Unmute => {
                self.session.muted = false;
                SessionState::AwaitingActivation
            }
            ControlCommand::Terminate => {
                self.announce(MessageKey::Shutdown).await;
                SessionState::ShuttingDown
            }
        }
    }

    async fn capture_command(&mut self) -> SessionState {
        if self.session.muted {
            self.ensure_feedback_stopped(Resolution::Stop).await;
            return SessionState::Muted;
        }

        // The cue must not end up in the recording
        self.ensure_feedback_stopped(Resolution::Drain).await;
        self.session.pending_command = Some(self.capture.listen_for_command().await);
        SessionState::AwaitingResponse
    }

    async fn await_response(&mut self) -> SessionState {
        let command = match self.session.pending_command.take() {
            Some(CommandOutcome::Prompt(prompt)) => Ok(prompt),
            Some(CommandOutcome::NotUnderstood) => Err(ErrorKind::RecognitionUnintelligible),
            Some(CommandOutcome::TimedOut) => Err(ErrorKind::CaptureTimeout),
            Some(CommandOutcome::DeviceError(_)) => Err(ErrorKind::CaptureDeviceFailure),
            Some(CommandOutcome::Upstream(failure)) => Err(failure.error_kind()),
            None => return SessionState::AwaitingActivation,
        };
        let prompt = match command {
            Ok(prompt) => prompt,
            Err(kind) => {
                self.announce(MessageKey::for_error(kind)).await;
                return SessionState::AwaitingActivation;
            }
        };

        self.start_feedback(self.clips.processing.clone(), Loops::Forever)
            .await;

        match self.response.ask(&prompt).await {
            ResponseOutcome::Answered(answer) => {
                self.session.pending_answer = Some(answer);
                SessionState::Speaking
            }
            ResponseOutcome::TranscriptionEmpty => {
                self.announce(MessageKey::for_error(ErrorKind::TranscriptionEmpty))
                    .await;
                SessionState::AwaitingActivation
            }
            ResponseOutcome::UpstreamFailure(failure) => {
                tracing::warn!(%failure, "no answer");
                self.announce(failure.message()).await;
                SessionState::AwaitingActivation
            }
        }
    }

    async fn speak_answer(&mut self) -> SessionState {
        let Some(answer) = self.session.pending_answer.take() else {
            self.ensure_feedback_stopped(Resolution::Stop).await;
            return SessionState::AwaitingActivation;
        };

        let policy = if self.config.bypass_response_cache {
            CachePolicy::Uncached
        } else {
            CachePolicy::Refresh(RESPONSE_CACHE_KEY)
        };

        // The processing loop keeps playing while the answer is synthesised
        let clip = match self.response.synthesize(&answer, policy).await {
            Ok(clip) => clip,
            Err(failure) => {
                tracing::warn!(%failure, "answer could not be synthesised");
                self.announce(failure.message()).await;
                return SessionState::AwaitingActivation;
            }
        };

        self.ensure_feedback_stopped(Resolution::Fade(self.config.fade_duration))
            .await;

        if self.config.answer_in_background {
            self.start_feedback(Some(clip), Loops::Once).await;
        } else if let Err(e) = self.player.play_once(&clip).await {
            tracing::error!(error = %e, "failed to play answer");
        }

        SessionState::AwaitingActivation
    }

    /// Speak a system message, blocking until it has been played
    async fn announce(&mut self, key: MessageKey) {
        self.ensure_feedback_stopped(Resolution::Stop).await;

        let policy = if self.config.refresh_cache && self.refreshed.insert(key) {
            CachePolicy::Refresh(key.as_str())
        } else {
            CachePolicy::Use(key.as_str())
        };

        let text = self.config.messages.text(key);
        if let Err(e) = self.response.speak(&self.player, text, policy).await {
            tracing::error!(message = %key, error = %e, "failed to speak system message");
            // Fall back to the cue so the user still hears that the session is ready
            if let Some(cue) = &self.clips.listening {
                if let Err(e) = self.player.play_once(cue).await {
                    tracing::error!(error = %e, "failed to play fallback cue");
                }
            }
        }
    }

    /// Start background playback as the active feedback
    async fn start_feedback(&mut self, clip: Option<Clip>, loops: Loops) {
        self.ensure_feedback_stopped(Resolution::Stop).await;

        let Some(clip) = clip else {
            return;
        };
        match self.player.play_background(&clip, loops) {
            Ok(handle) => self.session.active_feedback = Some(handle),
            Err(e) => tracing::warn!(clip = clip.name(), error = %e, "failed to start feedback"),
        }
    }

    /// Resolve the active feedback, if any, and wait until it is silent
    pub async fn ensure_feedback_stopped(&mut self, resolution: Resolution) {
        if let Some(handle) = self.session.active_feedback.take() {
            tracing::debug!(clip = handle.clip(), ?resolution, "ending feedback");
            self.player.resolve(handle, resolution).await;
        }
    }
}
