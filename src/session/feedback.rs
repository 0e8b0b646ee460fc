//! Audio feedback player
//!
//! Wraps a [`PlaybackPrimitive`] with blocking and background playback. The
//! player never stops earlier audio on its own; callers resolve the previous
//! [`FeedbackHandle`] before starting anything new.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::collaborators::{Loops, PlaybackPrimitive};
use crate::voice::Clip;

/// How often playback state is polled
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Extra time allowed beyond a clip's or fade's nominal duration
const GRACE: Duration = Duration::from_secs(1);

/// How a running background playback is ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Silence immediately
    Stop,
    /// Ramp down over the given duration, then stop
    Fade(Duration),
    /// Let a single play end by itself; loops are stopped
    Drain,
}

/// Ownership of one background playback
///
/// Dropping the handle without resolving it leaves the audio running; the
/// session always passes it back to [`AudioFeedbackPlayer::resolve`].
#[must_use = "background playback must be resolved"]
pub struct FeedbackHandle {
    clip: String,
    /// Length of a single play; `None` for loops
    length: Option<Duration>,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl FeedbackHandle {
    /// Name of the clip being played
    #[must_use]
    pub fn clip(&self) -> &str {
        &self.clip
    }
}

impl std::fmt::Debug for FeedbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackHandle")
            .field("clip", &self.clip)
            .field("finished", &self.watcher.is_finished())
            .finish_non_exhaustive()
    }
}

/// Plays cues, loops and speech through a playback primitive
#[derive(Clone)]
pub struct AudioFeedbackPlayer {
    primitive: Arc<dyn PlaybackPrimitive>,
}

impl AudioFeedbackPlayer {
    /// Create a player over `primitive`
    #[must_use]
    pub fn new(primitive: Arc<dyn PlaybackPrimitive>) -> Self {
        Self { primitive }
    }

    /// Play `clip` once and wait until it has finished
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be loaded or started
    pub async fn play_once(&self, clip: &Clip) -> Result<()> {
        tracing::debug!(clip = clip.name(), "playing clip");
        self.primitive.load(clip)?;
        self.primitive.play(Loops::Once)?;

        let deadline = Instant::now() + clip.duration() + GRACE;
        while self.primitive.is_busy() {
            if Instant::now() >= deadline {
                tracing::warn!(clip = clip.name(), "playback overran, stopping");
                self.primitive.stop();
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Ok(())
    }

    /// Start `clip` in the background and return immediately
    ///
    /// Loading and starting happen before this returns, so a `resolve` issued
    /// right after always acts on this playback.
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be loaded or started
    pub fn play_background(&self, clip: &Clip, loops: Loops) -> Result<FeedbackHandle> {
        tracing::debug!(clip = clip.name(), ?loops, "starting background playback");
        self.primitive.load(clip)?;
        self.primitive.play(loops)?;

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch(Arc::clone(&self.primitive), cancel.clone()));

        Ok(FeedbackHandle {
            clip: clip.name().to_string(),
            length: match loops {
                Loops::Once => Some(clip.duration()),
                Loops::Forever => None,
            },
            cancel,
            watcher,
        })
    }

    /// Stop immediately; a no-op when nothing plays
    pub fn stop(&self) {
        self.primitive.stop();
    }

    /// End a background playback and wait until it is silent
    pub async fn resolve(&self, handle: FeedbackHandle, resolution: Resolution) {
        let FeedbackHandle {
            clip,
            length,
            cancel,
            mut watcher,
        } = handle;

        match (resolution, length) {
            (Resolution::Stop, _) | (Resolution::Drain, None) => {
                self.primitive.stop();
            }
            (Resolution::Drain, Some(length)) => {
                if tokio::time::timeout(length + GRACE, &mut watcher)
                    .await
                    .is_ok()
                {
                    return;
                }
                tracing::warn!(clip = %clip, "playback overran, stopping");
                self.primitive.stop();
            }
            (Resolution::Fade(duration), _) => {
                self.primitive.fade_out(duration);
                if tokio::time::timeout(duration + GRACE, &mut watcher)
                    .await
                    .is_ok()
                {
                    tracing::debug!(clip = %clip, "background playback faded out");
                    return;
                }
                tracing::warn!(clip = %clip, "fade did not finish, stopping");
                self.primitive.stop();
            }
        }

        cancel.cancel();
        if let Err(e) = watcher.await {
            tracing::warn!(clip = %clip, error = %e, "playback watcher failed");
        }
        tracing::debug!(clip = %clip, "background playback stopped");
    }
}

/// Complete once the primitive falls silent or `cancel` fires
async fn watch(primitive: Arc<dyn PlaybackPrimitive>, cancel: CancellationToken) {
    let mut ticks = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {
                if !primitive.is_busy() {
                    break;
                }
            }
        }
    }
}
