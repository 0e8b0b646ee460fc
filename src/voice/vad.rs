//! Energy-based speech detection
//!
//! Splits a stream of microphone chunks into one utterance: waits for speech
//! to start (bounded by a timeout), then accumulates until a pause or the
//! phrase limit is reached.

use crate::collaborators::RecordLimits;

/// Audio kept from before speech onset (in samples at 16kHz)
const PRE_ROLL_SAMPLES: usize = 4800; // 0.3 seconds

/// Minimum duration of speech for a complete utterance (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// State of the speech detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Waiting for speech
    Waiting,
    /// Speech started, accumulating
    Speaking,
    /// Utterance complete (pause after speech or phrase limit)
    Complete,
    /// No speech before the timeout
    TimedOut,
}

/// Detects one utterance in a stream of samples
pub struct SpeechDetector {
    threshold: f32,
    timeout_samples: usize,
    max_samples: usize,
    pause_samples: usize,
    state: Detection,
    waited: usize,
    pre_roll: Vec<f32>,
    speech_buffer: Vec<f32>,
    voiced_samples: usize,
    silence_counter: usize,
}

impl SpeechDetector {
    /// Create a detector for the given limits and sample rate
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(limits: &RecordLimits, sample_rate: u32) -> Self {
        let to_samples = |d: std::time::Duration| (d.as_secs_f64() * f64::from(sample_rate)) as usize;

        Self {
            threshold: limits.energy_threshold,
            timeout_samples: to_samples(limits.timeout),
            max_samples: to_samples(limits.max_duration),
            pause_samples: to_samples(limits.pause),
            state: Detection::Waiting,
            waited: 0,
            pre_roll: Vec::new(),
            speech_buffer: Vec::new(),
            voiced_samples: 0,
            silence_counter: 0,
        }
    }

    /// Feed a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> Detection {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            Detection::Waiting => {
                if is_speech {
                    self.state = Detection::Speaking;
                    self.speech_buffer = std::mem::take(&mut self.pre_roll);
                    self.speech_buffer.extend_from_slice(samples);
                    self.voiced_samples = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                } else {
                    self.waited += samples.len();
                    self.pre_roll.extend_from_slice(samples);
                    if self.pre_roll.len() > PRE_ROLL_SAMPLES {
                        let excess = self.pre_roll.len() - PRE_ROLL_SAMPLES;
                        self.pre_roll.drain(..excess);
                    }
                    if self.waited >= self.timeout_samples {
                        self.state = Detection::TimedOut;
                    }
                }
            }
            Detection::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.voiced_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let paused = self.silence_counter >= self.pause_samples;
                if paused && self.voiced_samples < MIN_SPEECH_SAMPLES {
                    // Too short to be speech: back to waiting
                    tracing::trace!(voiced = self.voiced_samples, "discarding noise blip");
                    self.waited += self.speech_buffer.len();
                    self.speech_buffer.clear();
                    self.voiced_samples = 0;
                    self.state = if self.waited >= self.timeout_samples {
                        Detection::TimedOut
                    } else {
                        Detection::Waiting
                    };
                } else if paused || self.speech_buffer.len() >= self.max_samples {
                    tracing::debug!(
                        samples = self.speech_buffer.len(),
                        paused,
                        "utterance complete"
                    );
                    self.state = Detection::Complete;
                }
            }
            Detection::Complete | Detection::TimedOut => {}
        }

        self.state
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> Detection {
        self.state
    }

    /// Take the utterance, including the pre-roll before onset
    pub fn take_utterance(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech_buffer)
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
