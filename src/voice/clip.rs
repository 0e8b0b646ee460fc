//! Decoded audio clips
//!
//! Feedback sounds come from WAV/MP3 files in the audio directory; synthesised
//! speech arrives as MP3 or raw PCM. Everything is decoded to mono f32.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{AudioFormat, SynthesizedAudio};
use crate::{Error, Result};

/// A decoded mono clip
#[derive(Debug, Clone)]
pub struct Clip {
    name: String,
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl Clip {
    /// Wrap already decoded samples
    #[must_use]
    pub fn from_samples(name: impl Into<String>, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            name: name.into(),
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Load a WAV or MP3 file, chosen by extension
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .map_or_else(|| "clip".to_string(), |s| s.to_string_lossy().into_owned());
        let data = std::fs::read(path)?;

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "wav" | "wave" => Self::from_wav(name, &data),
            "mp3" => Self::from_mp3(name, &data),
            _ => Err(Error::Audio(format!(
                "unsupported clip format: {}",
                path.display()
            ))),
        }
    }

    /// Decode synthesised audio
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails
    pub fn from_synthesized(name: impl Into<String>, audio: &SynthesizedAudio) -> Result<Self> {
        match audio.format {
            AudioFormat::Mp3 => Self::from_mp3(name, &audio.bytes),
            AudioFormat::Pcm { sample_rate } => {
                Ok(Self::from_pcm16(name, &audio.bytes, sample_rate))
            }
        }
    }

    /// Decode WAV bytes (integer or float samples, any channel count)
    ///
    /// # Errors
    ///
    /// Returns error if the WAV data is invalid
    pub fn from_wav(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let mut reader =
            hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?,
            hound::SampleFormat::Int => {
                #[allow(clippy::cast_precision_loss)]
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| Error::Audio(e.to_string()))?
            }
        };

        Ok(Self::from_samples(
            name,
            downmix(&interleaved, usize::from(spec.channels)),
            spec.sample_rate,
        ))
    }

    /// Decode MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn from_mp3(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let mut decoder = minimp3::Decoder::new(Cursor::new(data));
        let mut samples = Vec::new();
        let mut sample_rate = 0_u32;

        loop {
            match decoder.next_frame() {
                Ok(frame) => {
                    sample_rate = frame.sample_rate as u32;
                    let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    samples.extend(downmix(&pcm, frame.channels));
                }
                Err(minimp3::Error::Eof) => break,
                Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
            }
        }

        if sample_rate == 0 {
            return Err(Error::Audio("MP3 contains no frames".to_string()));
        }

        Ok(Self::from_samples(name, samples, sample_rate))
    }

    /// Decode signed 16-bit little-endian mono PCM
    #[must_use]
    pub fn from_pcm16(name: impl Into<String>, data: &[u8], sample_rate: u32) -> Self {
        let samples = data
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
            .collect();
        Self::from_samples(name, samples, sample_rate)
    }

    /// Clip name (file stem or message key)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decoded samples
    #[must_use]
    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    /// Sample rate of the decoded samples
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playing time of one pass
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Resample to `rate`, returning the samples for playback
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be created
    pub fn resampled(&self, rate: u32) -> Result<Arc<[f32]>> {
        if rate == self.sample_rate || self.samples.is_empty() {
            return Ok(Arc::clone(&self.samples));
        }
        resample(&self.samples, self.sample_rate, rate).map(Into::into)
    }
}

/// Average interleaved channels into mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let count = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / count)
        .collect()
}

/// Resample audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize + 1);

    for chunk in input.chunks(chunk_size) {
        // Pad the tail so the last partial chunk is not dropped
        let mut block = chunk.to_vec();
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output.iter().map(|&s| s as f32).collect())
}
