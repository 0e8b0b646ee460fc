//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::vad::{Detection, SpeechDetector, calculate_energy};
use crate::collaborators::{CaptureDevice, RecordLimits};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often the capture buffer is drained while recording
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period before a silent stream is treated as a dead device
const STALL_GRACE: Duration = Duration::from_secs(2);

/// Captures audio from the default or a named input device
pub struct MicrophoneCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl MicrophoneCapture {
    /// Open the default input device, or the first whose name contains `name`
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureDevice` if no suitable device exists
    pub fn new(name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match name {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| Error::CaptureDevice(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n.contains(wanted)))
                .ok_or_else(|| Error::CaptureDevice(format!("no microphone matching '{wanted}'")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| Error::CaptureDevice("no input device available".to_string()))?,
        };

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::CaptureDevice(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::CaptureDevice("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::info!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "microphone selected"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Get captured audio buffer and clear it
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}

#[async_trait(?Send)]
impl CaptureDevice for MicrophoneCapture {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        if let Ok(mut buf) = buffer.lock() {
            buf.clear();
        }

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::CaptureDevice(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::CaptureDevice(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    async fn record(&mut self, limits: &RecordLimits) -> Result<Vec<f32>> {
        if self.stream.is_none() {
            return Err(Error::CaptureDevice("capture device not open".to_string()));
        }

        let mut detector = SpeechDetector::new(limits, SAMPLE_RATE);
        let deadline = Instant::now() + limits.timeout + limits.max_duration + STALL_GRACE;

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let chunk = self.take_buffer();
            if !chunk.is_empty() {
                match detector.process(&chunk) {
                    Detection::Complete => return Ok(detector.take_utterance()),
                    Detection::TimedOut => return Err(Error::CaptureTimeout),
                    Detection::Waiting | Detection::Speaking => {}
                }
            }

            if Instant::now() > deadline {
                return Err(Error::CaptureDevice(
                    "microphone stopped delivering audio".to_string(),
                ));
            }
        }
    }

    async fn ambient_level(&mut self, duration: Duration) -> Result<f32> {
        if self.stream.is_none() {
            return Err(Error::CaptureDevice("capture device not open".to_string()));
        }

        self.take_buffer();
        tokio::time::sleep(duration).await;
        let samples = self.take_buffer();

        if samples.is_empty() {
            return Err(Error::CaptureDevice(
                "no audio received during calibration".to_string(),
            ));
        }

        Ok(calculate_energy(&samples))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Names of all input devices on the default host
///
/// # Errors
///
/// Returns `Error::CaptureDevice` if devices cannot be enumerated
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| Error::CaptureDevice(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
