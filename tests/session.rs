//! Session state machine tests

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{
    Event, Harness, InstrumentedPlayback, TEST_REQUEST_TIMEOUT, test_clip, test_config,
};
use homeai::collaborators::{Loops, PlaybackPrimitive};
use homeai::session::{AudioFeedbackPlayer, MessageKey, Messages, SessionConfig};
use homeai::{Error, SessionState};

fn messages() -> Messages {
    Messages::default()
}

#[tokio::test]
async fn test_speech_without_activation_word_is_ignored() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("what is the weather like");

    let next = h.controller.step().await;

    assert_eq!(next, SessionState::AwaitingActivation);
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 0);
    assert!(h.model.prompts().is_empty());
    assert!(h.playback.events().is_empty());
}

#[tokio::test]
async fn test_activation_plays_cue_and_captures_command() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("Computer");

    let next = h.controller.step().await;

    assert_eq!(next, SessionState::CapturingCommand);
    assert_eq!(
        h.playback.events(),
        vec![
            Event::Load("listening".to_string()),
            Event::Play("listening".to_string(), Loops::Once),
        ]
    );
    assert!(h.controller.has_active_feedback());
}

#[tokio::test]
async fn test_question_is_answered_once_after_loop_stops() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.transcriber.say("What is 2+2?");
    h.model.answer("4");

    assert_eq!(h.controller.step().await, SessionState::CapturingCommand);
    assert_eq!(h.controller.step().await, SessionState::AwaitingResponse);
    assert_eq!(h.controller.step().await, SessionState::Speaking);
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);

    assert_eq!(
        h.model.prompts(),
        vec![("What is 2+2?".to_string(), "gpt-3.5-turbo".to_string())]
    );
    assert_eq!(h.synthesizer.texts(), vec!["4".to_string()]);

    let played = h.playback.played();
    assert_eq!(played, vec!["listening", "processing", "speech"]);

    let loop_started = h
        .playback
        .position(|e| *e == Event::Play("processing".to_string(), Loops::Forever))
        .unwrap();
    let faded = h.playback.position(|e| *e == Event::Fade).unwrap();
    let answered = h
        .playback
        .position(|e| *e == Event::Play("speech".to_string(), Loops::Once))
        .unwrap();
    assert!(loop_started < faded);
    assert!(faded < answered);

    assert_eq!(h.playback.overlaps(), 0);
    assert!(!h.controller.has_active_feedback());
}

#[tokio::test]
async fn test_mute_suppresses_commands_until_unmuted() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer mute");
    h.recognizer.say("computer");

    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert!(h.controller.is_muted());

    assert_eq!(h.controller.step().await, SessionState::CapturingCommand);
    assert_eq!(h.controller.step().await, SessionState::Muted);
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);

    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 0);
    assert!(h.model.prompts().is_empty());
    assert_eq!(h.synthesizer.texts(), vec![messages().muted]);
    assert_eq!(h.playback.played(), vec![MessageKey::Muted.as_str()]);

    h.recognizer.say("computer unmute");
    h.controller.step().await;
    assert!(!h.controller.is_muted());
}

#[tokio::test]
async fn test_control_word_must_follow_activation_word() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer please stop");

    // Not a stop: the activation word alone was heard
    assert_eq!(h.controller.step().await, SessionState::CapturingCommand);
    assert!(!h.playback.events().contains(&Event::Fade));

    let mut h = Harness::new(test_config());
    h.recognizer.say("stop computer");
    assert_eq!(h.controller.step().await, SessionState::CapturingCommand);
}

#[tokio::test]
async fn test_unintelligible_activation_stays_waiting() {
    let mut h = Harness::new(test_config());
    h.recognizer.fail(Error::Unintelligible);

    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 1);
    assert!(h.synthesizer.texts().is_empty());
    assert!(h.playback.events().is_empty());
}

#[tokio::test]
async fn test_activation_timeout_stays_waiting() {
    let mut h = Harness::new(test_config());
    h.device.push(Err(Error::CaptureTimeout));

    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(h.synthesizer.texts().is_empty());
    assert!(h.playback.events().is_empty());
}

#[test]
fn test_overlapping_single_plays_are_counted() {
    let playback = InstrumentedPlayback::default();

    playback.load(&test_clip("first")).unwrap();
    playback.play(Loops::Once).unwrap();
    playback.load(&test_clip("second")).unwrap();
    playback.play(Loops::Once).unwrap();

    assert_eq!(playback.overlaps(), 1);
}

#[test]
fn test_player_stop_is_idempotent() {
    let playback = Arc::new(InstrumentedPlayback::default());
    let player = AudioFeedbackPlayer::new(Arc::clone(&playback) as Arc<dyn PlaybackPrimitive>);

    player.stop();
    player.stop();

    assert_eq!(playback.events(), vec![Event::Stop, Event::Stop]);
    assert_eq!(playback.overlaps(), 0);
}

#[tokio::test]
async fn test_stop_without_feedback_is_noop() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer stop");
    h.recognizer.say("computer stop");

    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);

    assert!(h.playback.events().is_empty());
    assert!(!h.controller.has_active_feedback());
}

#[tokio::test]
async fn test_stop_fades_background_answer() {
    let config = SessionConfig {
        answer_in_background: true,
        ..test_config()
    };
    let mut h = Harness::new(config);
    h.recognizer.say("computer");
    h.transcriber.say("Tell me a long story");
    h.model.answer("Once upon a time");
    h.recognizer.say("please computer stop now");

    for _ in 0..4 {
        h.controller.step().await;
    }
    assert!(h.controller.has_active_feedback());

    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert!(!h.controller.has_active_feedback());
    assert_eq!(h.playback.events().last(), Some(&Event::Fade));
}

#[tokio::test]
async fn test_activation_stops_background_answer_before_cue() {
    let config = SessionConfig {
        answer_in_background: true,
        ..test_config()
    };
    let mut h = Harness::new(config);
    h.recognizer.say("computer");
    h.transcriber.say("Tell me a long story");
    h.model.answer("Once upon a time");
    h.recognizer.say("computer");

    for _ in 0..3 {
        h.controller.step().await;
    }
    h.playback.hold_next_single_play();
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert!(h.playback.is_busy());

    assert_eq!(h.controller.step().await, SessionState::CapturingCommand);

    let answered = h
        .playback
        .position(|e| *e == Event::Play("speech".to_string(), Loops::Once))
        .unwrap();
    let events = h.playback.events();
    assert_eq!(
        events[answered + 1..],
        [
            Event::Stop,
            Event::Load("listening".to_string()),
            Event::Play("listening".to_string(), Loops::Once),
        ]
    );
    assert_eq!(h.playback.overlaps(), 0);
}

#[tokio::test]
async fn test_terminate_announces_shutdown() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("hello there");
    h.recognizer.say("computer terminate");

    h.controller.run().await;

    assert_eq!(h.controller.state(), SessionState::ShuttingDown);
    assert_eq!(h.synthesizer.texts(), vec![messages().shutdown]);
    assert_eq!(h.playback.played(), vec![MessageKey::Shutdown.as_str()]);
    assert!(h.model.prompts().is_empty());
}

#[tokio::test]
async fn test_model_failure_speaks_generic_error() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.transcriber.say("What is 2+2?");
    h.model
        .fail(Error::ServiceUnavailable("connection refused".to_string()));

    h.controller.step().await;
    h.controller.step().await;
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);

    assert_eq!(h.synthesizer.texts(), vec![messages().generic_error]);

    // The processing loop is stopped before the message is spoken
    let stopped = h.playback.position(|e| *e == Event::Stop).unwrap();
    let spoken = h
        .playback
        .position(|e| *e == Event::Play("genericError".to_string(), Loops::Once))
        .unwrap();
    assert!(stopped < spoken);
    assert!(!h.controller.has_active_feedback());
}

#[tokio::test]
async fn test_stalled_model_times_out_with_generic_error() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.transcriber.say("What is 2+2?");
    h.model.stall();

    h.controller.step().await;
    h.controller.step().await;
    let started = Instant::now();
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert!(started.elapsed() < TEST_REQUEST_TIMEOUT + Duration::from_secs(1));

    assert_eq!(h.model.prompts().len(), 1);
    assert_eq!(h.synthesizer.texts(), vec![messages().generic_error]);

    let looping = h
        .playback
        .position(|e| *e == Event::Play("processing".to_string(), Loops::Forever))
        .unwrap();
    let stopped = h.playback.position(|e| *e == Event::Stop).unwrap();
    let spoken = h
        .playback
        .position(|e| *e == Event::Play("genericError".to_string(), Loops::Once))
        .unwrap();
    assert!(looping < stopped);
    assert!(stopped < spoken);
    assert!(!h.controller.has_active_feedback());
}

#[tokio::test]
async fn test_quota_failure_speaks_quota_message() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.transcriber.say("What is 2+2?");
    h.model.fail(Error::QuotaExceeded("429".to_string()));

    for _ in 0..3 {
        h.controller.step().await;
    }

    assert_eq!(h.controller.state(), SessionState::AwaitingActivation);
    assert_eq!(h.synthesizer.texts(), vec![messages().quota_exceeded]);
}

#[tokio::test]
async fn test_empty_transcription_speaks_did_not_understand() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.transcriber.say("   ");

    for _ in 0..3 {
        h.controller.step().await;
    }

    assert_eq!(h.controller.state(), SessionState::AwaitingActivation);
    assert!(h.model.prompts().is_empty());
    assert_eq!(h.synthesizer.texts(), vec![messages().did_not_understand]);
}

#[tokio::test]
async fn test_command_timeout_speaks_did_not_understand() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.controller.step().await;

    h.device.push(Err(Error::CaptureTimeout));
    assert_eq!(h.controller.step().await, SessionState::AwaitingResponse);
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);

    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.synthesizer.texts(), vec![messages().did_not_understand]);
}

#[tokio::test]
async fn test_device_outage_is_announced_once() {
    let mut h = Harness::new(test_config());
    h.device
        .push(Err(Error::CaptureDevice("unplugged".to_string())));
    h.device
        .push(Err(Error::CaptureDevice("unplugged".to_string())));

    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.synthesizer.texts(), vec![messages().generic_error]);
    assert_eq!(h.playback.played(), vec!["genericError"]);

    // A good recording ends the outage, so the next failure is announced again
    h.recognizer.say("hello there");
    h.device.push(Ok(vec![0.2; 1600]));
    h.device
        .push(Err(Error::CaptureDevice("unplugged".to_string())));
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);
    assert_eq!(h.controller.step().await, SessionState::AwaitingActivation);

    assert_eq!(h.playback.played(), vec!["genericError", "genericError"]);
}

#[tokio::test]
async fn test_cancelled_recording_releases_device() {
    let mut h = Harness::new(test_config());
    h.device.slow_down(Duration::from_secs(1));

    let started = Instant::now();
    tokio::select! {
        _ = h.controller.step() => panic!("recording finished before it was cancelled"),
        () = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(h.device.opens.load(Ordering::SeqCst), 1);
    assert_eq!(h.device.closes.load(Ordering::SeqCst), 1);
    assert!(!h.device.is_open.load(Ordering::SeqCst));
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.state(), SessionState::AwaitingActivation);
}

#[tokio::test]
async fn test_device_released_on_every_path() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.device.push(Ok(vec![0.2; 1600]));
    h.device.push(Err(Error::CaptureDevice("overrun".to_string())));
    h.recognizer.fail(Error::Unintelligible);
    h.device.push(Ok(Vec::new()));
    h.recognizer.say("computer terminate");

    h.controller.run().await;

    let opens = h.device.opens.load(Ordering::SeqCst);
    assert!(opens >= 4);
    assert_eq!(opens, h.device.closes.load(Ordering::SeqCst));
    assert!(!h.device.is_open.load(Ordering::SeqCst));
    assert!(!h.device.recorded_while_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_system_messages_come_from_cache() {
    let mut h = Harness::new(test_config());
    for _ in 0..2 {
        h.recognizer.say("computer");
        h.transcriber.say("");
        for _ in 0..3 {
            h.controller.step().await;
        }
    }

    assert_eq!(h.synthesizer.texts(), vec![messages().did_not_understand]);
    assert!(h.cache_dir.path().join("didNotUnderstand.wav").is_file());
    assert_eq!(
        h.playback
            .played()
            .iter()
            .filter(|name| *name == "didNotUnderstand")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_failed_message_falls_back_to_cue() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer terminate");
    h.synthesizer.fail_next(1);

    h.controller.step().await;

    assert_eq!(h.controller.state(), SessionState::ShuttingDown);
    assert_eq!(h.playback.played(), vec!["listening"]);
}

#[tokio::test]
async fn test_unplayable_message_falls_back_to_cue() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer terminate");
    h.playback.fail_clip(MessageKey::Shutdown.as_str());

    h.controller.step().await;

    assert_eq!(h.controller.state(), SessionState::ShuttingDown);
    assert_eq!(h.synthesizer.texts(), vec![messages().shutdown]);
    assert_eq!(h.playback.played(), vec!["listening"]);
}

#[tokio::test]
async fn test_welcome_speaks_then_cues() {
    let mut h = Harness::new(test_config());

    h.controller.welcome().await;

    assert_eq!(h.playback.played(), vec!["welcome", "listening"]);
    assert!(!h.controller.has_active_feedback());
    assert_eq!(h.controller.state(), SessionState::AwaitingActivation);
}

#[tokio::test]
async fn test_shutdown_silences_feedback() {
    let mut h = Harness::new(test_config());
    h.recognizer.say("computer");
    h.controller.step().await;
    assert!(h.controller.has_active_feedback());

    h.controller.shutdown().await;

    assert_eq!(h.controller.state(), SessionState::ShuttingDown);
    assert!(!h.controller.has_active_feedback());
    assert_eq!(h.playback.events().last(), Some(&Event::Stop));
}
