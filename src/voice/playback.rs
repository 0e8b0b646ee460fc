//! Audio playback to speakers
//!
//! Each `play` runs its output stream on a dedicated thread (cpal streams are
//! not `Send`), so the primitive itself can be shared with the session's
//! background feedback task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::Clip;
use crate::collaborators::{Loops, PlaybackPrimitive};
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// How often the stream thread checks for completion
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lets the device drain its last buffer before the stream is dropped
const DRAIN_DELAY: Duration = Duration::from_millis(100);

/// State of one `play` call
#[derive(Default)]
struct PlayState {
    finished: AtomicBool,
    fade: Mutex<Option<(Instant, Duration)>>,
}

impl PlayState {
    /// Current gain, marking the play finished once a fade completes
    fn gain(&self) -> f32 {
        let Ok(fade) = self.fade.lock() else {
            return 1.0;
        };
        let Some((start, duration)) = *fade else {
            return 1.0;
        };

        let progress = if duration.is_zero() {
            1.0
        } else {
            start.elapsed().as_secs_f32() / duration.as_secs_f32()
        };
        if progress >= 1.0 {
            self.finished.store(true, Ordering::SeqCst);
            return 0.0;
        }
        1.0 - progress
    }
}

/// Plays clips on the default output device
pub struct AudioPlayback {
    config: StreamConfig,
    loaded: Mutex<Option<Arc<[f32]>>>,
    current: Mutex<Option<Arc<PlayState>>>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            loaded: Mutex::new(None),
            current: Mutex::new(None),
        })
    }

    /// Output sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn current(&self) -> Option<Arc<PlayState>> {
        self.current.lock().ok().and_then(|c| c.clone())
    }
}

impl PlaybackPrimitive for AudioPlayback {
    fn load(&self, clip: &Clip) -> Result<()> {
        let samples = clip.resampled(self.sample_rate())?;
        tracing::trace!(clip = clip.name(), samples = samples.len(), "clip loaded");

        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| Error::Audio("playback state poisoned".to_string()))?;
        *loaded = Some(samples);
        Ok(())
    }

    fn play(&self, loops: Loops) -> Result<()> {
        let samples = self
            .loaded
            .lock()
            .ok()
            .and_then(|l| l.clone())
            .ok_or_else(|| Error::Audio("no clip loaded".to_string()))?;

        // One stream at a time
        self.stop();

        if samples.is_empty() {
            return Ok(());
        }

        let state = Arc::new(PlayState::default());
        let config = self.config.clone();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_state = Arc::clone(&state);
        std::thread::spawn(move || {
            let stream = match build_stream(&config, samples, loops, Arc::clone(&thread_state)) {
                Ok(stream) => stream,
                Err(e) => {
                    thread_state.finished.store(true, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            while !thread_state.finished.load(Ordering::SeqCst) {
                std::thread::sleep(POLL_INTERVAL);
            }
            std::thread::sleep(DRAIN_DELAY);
            drop(stream);
            tracing::trace!("playback stream closed");
        });

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited".to_string()))??;

        if let Ok(mut current) = self.current.lock() {
            *current = Some(state);
        }
        tracing::debug!(?loops, "playback started");
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.current()
            .is_some_and(|s| !s.finished.load(Ordering::SeqCst))
    }

    fn fade_out(&self, duration: Duration) {
        if let Some(state) = self.current() {
            if let Ok(mut fade) = state.fade.lock() {
                fade.get_or_insert((Instant::now(), duration));
            }
            tracing::debug!(ms = duration.as_millis(), "fading out");
        }
    }

    fn stop(&self) {
        let previous = self.current.lock().ok().and_then(|mut c| c.take());
        if let Some(state) = previous {
            state.finished.store(true, Ordering::SeqCst);
            tracing::debug!("playback stopped");
        }
    }
}

/// Build and start an output stream feeding `samples`
fn build_stream(
    config: &StreamConfig,
    samples: Arc<[f32]>,
    loops: Loops,
    state: Arc<PlayState>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let mut pos = 0usize;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let gain = state.gain();
                if state.finished.load(Ordering::SeqCst) {
                    data.fill(0.0);
                    return;
                }

                for frame in data.chunks_mut(channels) {
                    if pos >= samples.len() {
                        if loops == Loops::Forever {
                            pos = 0;
                        } else {
                            state.finished.store(true, Ordering::SeqCst);
                            frame.fill(0.0);
                            continue;
                        }
                    }
                    frame.fill(samples[pos] * gain);
                    pos += 1;
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
