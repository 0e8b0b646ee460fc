//! Voice processing module
//!
//! Concrete hardware and cloud collaborators: microphone capture with speech
//! detection, clip decoding and playback, STT and TTS.

mod capture;
mod clip;
mod playback;
mod stt;
mod tts;
pub mod vad;

pub use capture::{MicrophoneCapture, SAMPLE_RATE, list_input_devices, samples_to_wav};
pub use clip::Clip;
pub use playback::AudioPlayback;
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};
