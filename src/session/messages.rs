//! Fixed system messages spoken by the session

use std::fmt;

use crate::error::ErrorKind;

/// Identity of a system message; doubles as its speech cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Welcome,
    DidNotUnderstand,
    Shutdown,
    GenericError,
    Muted,
    QuotaExceeded,
}

impl MessageKey {
    /// All message keys
    pub const ALL: [Self; 6] = [
        Self::Welcome,
        Self::DidNotUnderstand,
        Self::Shutdown,
        Self::GenericError,
        Self::Muted,
        Self::QuotaExceeded,
    ];

    /// Stable identifier used as the cache file name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::DidNotUnderstand => "didNotUnderstand",
            Self::Shutdown => "shutdown",
            Self::GenericError => "genericError",
            Self::Muted => "muted",
            Self::QuotaExceeded => "quotaExceeded",
        }
    }

    /// Message announcing a recoverable failure
    #[must_use]
    pub const fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::CaptureTimeout
            | ErrorKind::RecognitionUnintelligible
            | ErrorKind::TranscriptionEmpty => Self::DidNotUnderstand,
            ErrorKind::UpstreamQuotaExceeded => Self::QuotaExceeded,
            ErrorKind::CaptureDeviceFailure
            | ErrorKind::UpstreamServiceUnavailable
            | ErrorKind::ConfigurationInvalid => Self::GenericError,
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Texts of the system messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Messages {
    /// May contain `{activation_word}`
    pub welcome: String,
    pub did_not_understand: String,
    pub shutdown: String,
    pub generic_error: String,
    pub muted: String,
    pub quota_exceeded: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            welcome: "Hello, I am your personal artificial intelligence. Please say the \
                      activation word {activation_word}, if you like to ask me anything."
                .to_string(),
            did_not_understand: "Sorry, I did not understand this".to_string(),
            shutdown: "Shutting down".to_string(),
            generic_error: "Something went wrong".to_string(),
            muted: "I am currently inactive. Activate me to ask questions".to_string(),
            quota_exceeded: "My request limit is used up. Please try again later".to_string(),
        }
    }
}

impl Messages {
    /// Text for `key`
    #[must_use]
    pub fn text(&self, key: MessageKey) -> &str {
        match key {
            MessageKey::Welcome => &self.welcome,
            MessageKey::DidNotUnderstand => &self.did_not_understand,
            MessageKey::Shutdown => &self.shutdown,
            MessageKey::GenericError => &self.generic_error,
            MessageKey::Muted => &self.muted,
            MessageKey::QuotaExceeded => &self.quota_exceeded,
        }
    }

    /// Fill in the `{activation_word}` placeholder
    #[must_use]
    pub fn with_activation_word(mut self, word: &str) -> Self {
        self.welcome = self.welcome.replace("{activation_word}", word);
        self
    }
}
