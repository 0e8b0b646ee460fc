use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use homeai::collaborators::{CaptureDevice, SpeechSynthesizer};
use homeai::daemon::{DaemonOptions, build_text_to_speech};
use homeai::session::AudioFeedbackPlayer;
use homeai::voice::vad::calculate_energy;
use homeai::voice::{AudioPlayback, Clip, MicrophoneCapture, list_input_devices};
use homeai::{Config, Daemon};

/// `HomeAI` - voice assistant with activation word and spoken answers
#[derive(Parser)]
#[command(name = "homeai", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "HOMEAI_CONFIG")]
    config: Option<PathBuf>,

    /// Use the first input device whose name contains this text
    #[arg(short, long)]
    microphone: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Skip the welcome message
    #[arg(long)]
    no_welcome: bool,

    /// Resynthesise cached system messages
    #[arg(long)]
    refresh_cache: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List available microphones
    ListMicrophones,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,homeai=info",
        1 => "info,homeai=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::ListMicrophones => list_microphones(),
            Command::TestMic { duration } => test_mic(cli.microphone.as_deref(), duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(cli.config.as_deref(), &text).await,
        };
    }

    tracing::info!(config = ?cli.config, "starting homeai");

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.microphone.is_some() {
        config.capture.microphone = cli.microphone;
    }
    tracing::debug!(?config, "loaded configuration");

    let options = DaemonOptions {
        no_welcome: cli.no_welcome,
        refresh_cache: cli.refresh_cache,
    };

    // Run until terminated by voice or interrupted
    Daemon::new(config, options).run().await?;

    Ok(())
}

/// Print available input devices
fn list_microphones() -> anyhow::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("No microphones found");
    }
    for (index, name) in devices.iter().enumerate() {
        println!("{index}: {name}");
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(microphone: Option<&str>, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = MicrophoneCapture::new(microphone)?;
    capture.open()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("Quiet-room RMS is a good starting point for capture.energy_threshold.");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let clip = Clip::from_samples("tone", samples, sample_rate);
    let player = AudioFeedbackPlayer::new(Arc::new(AudioPlayback::new()?));

    println!("Playing {:?} of audio...", clip.duration());
    player.play_once(&clip).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output with the configured provider
async fn test_tts(config_path: Option<&std::path::Path>, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load(config_path)?;
    let tts = build_text_to_speech(&config)?;

    println!("Synthesizing speech...");
    let audio = tts
        .synthesize(text, &config.response_settings().voice)
        .await?;
    println!("Got {} bytes of {:?} audio", audio.bytes.len(), audio.format);

    let clip = Clip::from_synthesized("test", &audio)?;
    let player = AudioFeedbackPlayer::new(Arc::new(AudioPlayback::new()?));

    println!("Playing audio...");
    player.play_once(&clip).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
