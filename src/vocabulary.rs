//! Control vocabulary
//!
//! Maps recognised words to session commands. A control word only counts when
//! it directly follows the activation word, so "computer stop" stops playback
//! while "computer, can you please stop the music" is passed on as a question.

use std::fmt;

/// Command derived from one recognised utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Activation word without a trailing control word
    Activation,
    Stop,
    Mute,
    Unmute,
    Terminate,
    /// Activation word absent
    None,
}

impl ControlCommand {
    /// Configuration name of a control command
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Stop => "stop",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Terminate => "terminate",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Spoken words for each control command
///
/// Every command accepts several words so the assistant can be used in more
/// than one language (e.g. `stop = ["stop", "halt"]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandWords {
    pub stop: Vec<String>,
    pub mute: Vec<String>,
    pub unmute: Vec<String>,
    pub terminate: Vec<String>,
}

impl Default for CommandWords {
    fn default() -> Self {
        Self {
            stop: vec!["stop".to_string()],
            mute: vec!["mute".to_string()],
            unmute: vec!["unmute".to_string()],
            terminate: vec!["terminate".to_string()],
        }
    }
}

impl CommandWords {
    /// Iterate over `(command, words)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (ControlCommand, &[String])> {
        [
            (ControlCommand::Stop, self.stop.as_slice()),
            (ControlCommand::Mute, self.mute.as_slice()),
            (ControlCommand::Unmute, self.unmute.as_slice()),
            (ControlCommand::Terminate, self.terminate.as_slice()),
        ]
        .into_iter()
    }
}

/// Lookup table from recognised tokens to control commands
#[derive(Debug, Clone)]
pub struct ControlVocabulary {
    activation_word: String,
    commands: Vec<(String, ControlCommand)>,
}

impl ControlVocabulary {
    /// Build a vocabulary; all words are normalised to lower case
    #[must_use]
    pub fn new(activation_word: &str, words: &CommandWords) -> Self {
        let commands = words
            .iter()
            .flat_map(|(command, list)| list.iter().map(move |w| (normalize(w), command)))
            .filter(|(w, _)| !w.is_empty())
            .collect();

        Self {
            activation_word: normalize(activation_word),
            commands,
        }
    }

    /// The normalised activation word
    #[must_use]
    pub fn activation_word(&self) -> &str {
        &self.activation_word
    }

    /// Look up the control command for the token following the activation word
    #[must_use]
    pub fn lookup(&self, token: &str) -> ControlCommand {
        let token = normalize(token);
        self.commands
            .iter()
            .find(|(word, _)| *word == token)
            .map_or(ControlCommand::None, |(_, command)| *command)
    }

    /// Classify a recognised token sequence
    ///
    /// Only the first occurrence of the activation word is considered.
    #[must_use]
    pub fn classify<S: AsRef<str>>(&self, tokens: &[S]) -> ControlCommand {
        let Some(pos) = tokens
            .iter()
            .position(|t| normalize(t.as_ref()) == self.activation_word)
        else {
            return ControlCommand::None;
        };

        match tokens.get(pos + 1).map(|t| self.lookup(t.as_ref())) {
            Some(ControlCommand::None) | None => ControlCommand::Activation,
            Some(command) => command,
        }
    }
}

/// Split recogniser output into lower-case word tokens
///
/// Punctuation around words is dropped ("Computer, stop." → `["computer", "stop"]`).
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(normalize)
        .filter(|w| !w.is_empty())
        .collect()
}

fn normalize(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}
