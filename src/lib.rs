//! `HomeAI` - voice-driven assistant loop
//!
//! Listens for an activation word, captures a spoken command, asks a language
//! model and speaks the answer, with audio feedback while it waits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 SessionController                    │
//! │   state machine  │  control words  │  feedback loop  │
//! └──────┬──────────────────┬──────────────────┬────────┘
//!        │                  │                  │
//! ┌──────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐
//! │ SpeechCapture│  │ ResponseGate- │  │ AudioFeedback │
//! │   Gateway    │  │     way       │  │    Player     │
//! │ mic  │  STT  │  │ LLM  │  TTS   │  │   playback    │
//! └──────────────┘  └───────────────┘  └───────────────┘
//! ```

pub mod collaborators;
pub mod config;
pub mod daemon;
pub mod error;
pub mod http;
pub mod llm;
pub mod session;
pub mod vocabulary;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, ErrorKind, Result};
pub use session::{SessionController, SessionState};
pub use vocabulary::{ControlCommand, ControlVocabulary};
