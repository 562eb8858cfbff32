//! End-to-end dictation flow over in-memory audio.
//!
//! Audio is replayed unpaced, one 100 ms chunk every 10 ms, so each test runs
//! roughly ten times faster than real time. Transcribers are mocks: the wake
//! transcriber answers "hey cat" exactly once.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use wakescribe::audio::WavAudioSource;
use wakescribe::controller::{ControllerConfig, DictationController, Transcribers};
use wakescribe::pipeline::{CollectingEmitter, CollectorSink, RecordingState};
use wakescribe::stt::{MockTranscriber, ScriptedTranscriber};

const RATE: usize = 16_000;

fn speech(seconds: f32) -> Vec<f32> {
    let n = (seconds * RATE as f32) as usize;
    (0..n)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / RATE as f32).sin())
        .collect()
}

fn silence(seconds: f32) -> Vec<f32> {
    vec![0.0; (seconds * RATE as f32) as usize]
}

fn fast_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.listening.capture_poll_interval = Duration::from_millis(10);
    config.listening.analysis_interval = Duration::from_millis(10);
    config.coordinator.poll_interval = Duration::from_millis(10);
    config.coordinator.silence.silence_duration_ms = 3000;
    config.coordinator.silence.no_speech_timeout_ms = 8000;
    config.event_poll_interval = Duration::from_millis(10);
    config
}

struct Harness {
    controller: DictationController,
    sink: CollectorSink,
    observed: CollectingEmitter,
    wake: ScriptedTranscriber,
    cancel: MockTranscriber,
    dictation: MockTranscriber,
}

fn harness(config: ControllerConfig, cancel_hears: &str, dictation_hears: &str) -> Harness {
    let sink = CollectorSink::new();
    let observed = CollectingEmitter::new();
    let wake = ScriptedTranscriber::new().then("hey cat", 0.95);
    let cancel = MockTranscriber::new("cancel").with_response(cancel_hears);
    let dictation = MockTranscriber::new("dictation").with_response(dictation_hears);

    let transcribers = Transcribers {
        wake: Arc::new(wake.clone()),
        cancel: Arc::new(cancel.clone()),
        dictation: Arc::new(dictation.clone()),
    };
    let controller =
        DictationController::with_transcribers(config, transcribers, Box::new(sink.clone()))
            .with_observer(Arc::new(observed.clone()));

    Harness {
        controller,
        sink,
        observed,
        wake,
        cancel,
        dictation,
    }
}

fn replay(harness: &mut Harness, audio: Vec<f32>) {
    let source = WavAudioSource::from_samples(audio).unpaced();
    harness
        .controller
        .start_listening(Box::new(source))
        .unwrap();
    let shutdown = AtomicBool::new(false);
    harness
        .controller
        .run(&shutdown, Some(Duration::from_secs(20)))
        .unwrap();
}

#[test]
fn speech_then_silence_is_kept_and_transcribed() {
    let mut h = harness(fast_config(), "take a note", "take a note");
    let audio = [speech(0.8), speech(2.0), silence(4.0)].concat();

    replay(&mut h, audio);

    assert_eq!(h.sink.texts(), vec!["take a note"]);
    assert_eq!(h.dictation.calls(), 1);
    assert_eq!(h.observed.count("wake_phrase_detected"), 1);
    assert_eq!(h.observed.count("silence_stop_keep"), 1);
    assert_eq!(h.observed.count("recording_cancelled"), 0);

    let stats = h.controller.stats();
    assert_eq!(stats.recordings, 1);
    assert_eq!(stats.kept, 1);
    assert_eq!(stats.transcriptions, 1);
    assert_eq!(h.controller.state().current(), RecordingState::Listening);
}

#[test]
fn cancel_phrase_discards_without_transcribing() {
    let mut h = harness(fast_config(), "nevermind", "should never be seen");
    let audio = [speech(0.8), speech(1.2), silence(5.0)].concat();

    replay(&mut h, audio);

    assert!(h.sink.texts().is_empty());
    assert_eq!(h.dictation.calls(), 0);
    assert!(h.cancel.calls() >= 1);
    assert_eq!(h.observed.count("recording_cancelled"), 1);
    assert_eq!(h.observed.count("silence_stop_keep"), 0);
    assert_eq!(h.controller.stats().cancelled, 1);
}

#[test]
fn wake_without_speech_times_out_and_is_discarded() {
    let mut config = fast_config();
    // Trailing wake audio must not count as dictation.
    config.coordinator.silence.min_speech_frames = 40;
    let mut h = harness(config, "", "should never be seen");
    let audio = [speech(0.8), silence(10.0)].concat();

    replay(&mut h, audio);

    assert!(h.sink.texts().is_empty());
    assert_eq!(h.dictation.calls(), 0);
    assert_eq!(h.observed.count("silence_timeout_abort"), 1);
    assert_eq!(h.controller.stats().discarded, 1);
    assert_eq!(h.controller.state().current(), RecordingState::Listening);
}

#[test]
fn silence_never_wakes() {
    let mut h = harness(fast_config(), "", "");

    replay(&mut h, silence(5.0));

    assert_eq!(h.wake.calls(), 0);
    assert!(h.observed.is_empty());
    assert_eq!(h.controller.stats().recordings, 0);
}

#[test]
fn shutdown_returns_collected_text() {
    let mut h = harness(fast_config(), "buy milk", "buy milk");
    let audio = [speech(0.8), speech(1.5), silence(4.0)].concat();

    replay(&mut h, audio);

    assert_eq!(h.controller.shutdown(), Some("buy milk".to_string()));
    assert_eq!(h.controller.state().current(), RecordingState::Idle);
}
