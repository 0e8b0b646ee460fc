//! On-disk cache of synthesised speech

use std::path::PathBuf;

use crate::Result;
use crate::collaborators::{AudioFormat, SynthesizedAudio};
use crate::voice::{Clip, samples_to_wav};

/// Whether synthesised speech goes through the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Always synthesise, store nothing
    Uncached,
    /// Play the cached audio for this key if present, otherwise synthesise and store
    Use(&'static str),
    /// Synthesise and overwrite the entry for this key
    Refresh(&'static str),
}

/// Synthesised speech stored as `<key>.mp3` or `<key>.wav`
#[derive(Debug, Clone)]
pub struct SpeechCache {
    dir: PathBuf,
}

impl SpeechCache {
    /// Cache rooted at `dir` (created on first store)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cached clip for `key`, if one exists and decodes
    #[must_use]
    pub fn load(&self, key: &str) -> Option<Clip> {
        ["mp3", "wav"]
            .iter()
            .map(|ext| self.dir.join(format!("{key}.{ext}")))
            .find(|path| path.is_file())
            .and_then(|path| match Clip::from_file(&path) {
                Ok(clip) => {
                    tracing::debug!(key, path = %path.display(), "using cached speech");
                    Some(clip)
                }
                Err(e) => {
                    tracing::warn!(key, path = %path.display(), error = %e, "ignoring unreadable cache entry");
                    None
                }
            })
    }

    /// Store speech for `key`
    ///
    /// MP3 is written as received; PCM is wrapped into a WAV file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn store(&self, key: &str, audio: &SynthesizedAudio, clip: &Clip) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let (path, bytes) = match audio.format {
            AudioFormat::Mp3 => (self.dir.join(format!("{key}.mp3")), audio.bytes.clone()),
            AudioFormat::Pcm { .. } => (
                self.dir.join(format!("{key}.wav")),
                samples_to_wav(clip.samples(), clip.sample_rate())?,
            ),
        };

        // Only one entry per key may exist, otherwise `load` could pick a stale one
        for ext in ["mp3", "wav"] {
            let other = self.dir.join(format!("{key}.{ext}"));
            if other != path && other.exists() {
                std::fs::remove_file(&other)?;
            }
        }

        std::fs::write(&path, bytes)?;
        tracing::debug!(key, path = %path.display(), "cached speech");
        Ok(path)
    }
}
