//! Always-listening pipeline: capture -> SampleBuffer -> wake analysis.
//!
//! Two threads run while listening:
//!
//! - the capture thread polls the [`AudioSource`], pushes every chunk into the
//!   rolling [`SampleBuffer`] and, while a recording is in progress, into the
//!   recording's [`RecordingBuffer`];
//! - the analysis thread wakes up on a fixed interval, snapshots the most
//!   recent window and runs the [`WakePhraseDetector`] on it.
//!
//! A detection is sent as a [`PipelineEvent::WakePhraseDetected`]; the
//! pipeline then disarms itself until [`ListeningPipeline::resume`] so one
//! utterance produces one event.

use crate::audio::recorder::AudioSource;
use crate::audio::sample_buffer::{RecordingBuffer, SampleBuffer};
use crate::defaults;
use crate::detect::wake::{WakeDetectorConfig, WakePhraseDetector};
use crate::error::{DetectionError, Result, WakescribeError};
use crate::pipeline::events::{EventEmitter, PipelineEvent};
use crate::pipeline::worker::join_all_within;
use crate::stt::transcriber::Transcriber;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Timing and detection settings of the listening pipeline.
#[derive(Debug, Clone)]
pub struct ListeningConfig {
    pub wake: WakeDetectorConfig,
    /// Audio analyzed per wake cycle.
    pub window_ms: u32,
    pub analysis_interval: Duration,
    /// New audio required before the window is analyzed again.
    pub min_new_audio_ms: u32,
    /// Buffered audio required before any analysis.
    pub min_audio_ms: u32,
    pub buffer_ms: u32,
    pub capture_poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            wake: WakeDetectorConfig::default(),
            window_ms: defaults::WAKE_WINDOW_MS,
            analysis_interval: Duration::from_millis(defaults::ANALYSIS_INTERVAL_MS),
            min_new_audio_ms: defaults::WAKE_MIN_NEW_AUDIO_MS,
            min_audio_ms: defaults::MIN_AUDIO_FOR_ANALYSIS_MS,
            buffer_ms: defaults::LISTENING_BUFFER_MS,
            capture_poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_INTERVAL_MS),
            stop_timeout: Duration::from_millis(defaults::STOP_TIMEOUT_MS),
        }
    }
}

/// State shared between the pipeline handle and its threads.
struct Shared {
    running: AtomicBool,
    /// Wake analysis enabled. Cleared by a detection or `pause`.
    armed: AtomicBool,
    /// Write position of the buffer at the last analysis.
    analyzed_upto: AtomicU64,
    detections: AtomicU64,
    /// Recording currently fed by the capture thread.
    tap: Mutex<Option<RecordingBuffer>>,
}

pub struct ListeningPipeline {
    config: ListeningConfig,
    transcriber: Arc<dyn Transcriber>,
    buffer: SampleBuffer,
    shared: Arc<Shared>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl ListeningPipeline {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: ListeningConfig) -> Self {
        let buffer = SampleBuffer::with_duration_ms(config.buffer_ms, config.wake.sample_rate);
        Self {
            config,
            transcriber,
            buffer,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                armed: AtomicBool::new(false),
                analyzed_upto: AtomicU64::new(0),
                detections: AtomicU64::new(0),
                tap: Mutex::new(None),
            }),
            threads: Vec::new(),
        }
    }

    /// Start capturing from `source` and analyzing for the wake phrase.
    ///
    /// The source is owned by the capture thread from here on and is stopped
    /// and dropped when capture ends, whether by [`stop`](Self::stop) or
    /// because the device went away.
    pub fn start(
        &mut self,
        mut source: Box<dyn AudioSource>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(WakescribeError::PipelineAlreadyRunning);
        }
        // Threads of a run that ended on its own (device loss, end of file).
        self.reap_threads();

        if source.sample_rate() != self.config.wake.sample_rate {
            return Err(WakescribeError::AudioFormatMismatch {
                expected: format!("{} Hz", self.config.wake.sample_rate),
                actual: format!("{} Hz", source.sample_rate()),
            });
        }

        source.start()?;
        tracing::info!(source = source.name(), "Listening started");

        self.buffer.clear();
        self.shared.analyzed_upto.store(0, Ordering::SeqCst);
        self.shared.armed.store(true, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let capture = CaptureLoop {
            buffer: self.buffer.clone(),
            shared: self.shared.clone(),
            emitter: emitter.clone(),
            poll_interval: self.config.capture_poll_interval,
        };
        let capture_handle = thread::Builder::new()
            .name("wakescribe-capture".to_string())
            .spawn(move || capture.run(source));
        let capture_handle = match capture_handle {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        self.threads.push(("capture", capture_handle));

        let rate = self.config.wake.sample_rate;
        let analysis = AnalysisLoop {
            detector: WakePhraseDetector::new(self.transcriber.clone(), self.config.wake.clone()),
            buffer: self.buffer.clone(),
            shared: self.shared.clone(),
            emitter,
            interval: self.config.analysis_interval,
            window_samples: defaults::ms_to_samples(self.config.window_ms, rate),
            min_new_samples: defaults::ms_to_samples(self.config.min_new_audio_ms, rate) as u64,
            min_samples: defaults::ms_to_samples(self.config.min_audio_ms, rate),
        };
        let analysis_handle = thread::Builder::new()
            .name("wakescribe-wake".to_string())
            .spawn(move || analysis.run());
        match analysis_handle {
            Ok(handle) => self.threads.push(("wake-analysis", handle)),
            Err(e) => {
                self.stop();
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Stop analysis and capture and release the audio source.
    ///
    /// Safe to call when never started; calling it twice is a no-op.
    pub fn stop(&mut self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        self.shared.armed.store(false, Ordering::SeqCst);
        self.reap_threads();
        self.end_recording();
        self.buffer.clear();
        if was_running {
            tracing::info!("Listening stopped");
        }
    }

    fn reap_threads(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.running.store(false, Ordering::SeqCst);
        join_all_within(std::mem::take(&mut self.threads), self.config.stop_timeout);
    }

    /// Whether capture is still running. Turns false on its own when the
    /// source disconnects or a finite source is exhausted.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether the wake analysis is currently active.
    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::SeqCst)
    }

    /// Route captured audio into a new recording.
    ///
    /// Audio captured since the last wake detection is carried over, so
    /// words spoken right after the wake phrase are not lost.
    pub fn begin_recording(&self) -> RecordingBuffer {
        let recording = RecordingBuffer::new(self.config.wake.sample_rate);
        let mut tap = self.shared.tap.lock();
        if !self.shared.armed.load(Ordering::SeqCst) {
            recording.append(&self.buffer.snapshot_samples(self.buffer.len()));
        }
        if let Some(previous) = tap.replace(recording.clone()) {
            previous.close();
        }
        recording
    }

    /// Stop feeding the current recording, keeping whatever it holds.
    pub fn end_recording(&self) {
        if let Some(recording) = self.shared.tap.lock().take() {
            recording.close();
        }
    }

    /// Suspend wake analysis (capture continues).
    ///
    /// A recording begun after this starts with the audio captured since.
    pub fn pause(&self) {
        self.shared.armed.store(false, Ordering::SeqCst);
        self.buffer.clear();
    }

    /// Re-arm wake analysis on fresh audio.
    pub fn resume(&self) {
        self.buffer.clear();
        self.shared.analyzed_upto.store(0, Ordering::SeqCst);
        self.shared.armed.store(true, Ordering::SeqCst);
    }

    /// Number of wake detections since creation.
    pub fn detections(&self) -> u64 {
        self.shared.detections.load(Ordering::SeqCst)
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &ListeningConfig {
        &self.config
    }
}

impl Drop for ListeningPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureLoop {
    buffer: SampleBuffer,
    shared: Arc<Shared>,
    emitter: Arc<dyn EventEmitter>,
    poll_interval: Duration,
}

impl CaptureLoop {
    fn run(self, mut source: Box<dyn AudioSource>) {
        let finite = source.is_finite();
        let mut consecutive_errors: u32 = 0;
        let mut chunks: u64 = 0;

        while self.shared.running.load(Ordering::SeqCst) {
            let samples = match source.read_samples() {
                Ok(samples) => {
                    consecutive_errors = 0;
                    samples
                }
                Err(e) if e.is_device_unavailable() => {
                    tracing::warn!(source = source.name(), "Capture device lost: {e}");
                    self.unavailable(e.to_string());
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= defaults::MAX_CONSECUTIVE_CAPTURE_ERRORS {
                        tracing::error!(
                            source = source.name(),
                            "Audio capture failed {consecutive_errors} times in a row: {e}"
                        );
                        self.unavailable(e.to_string());
                        break;
                    }
                    tracing::debug!("Audio read failed: {e}");
                    thread::sleep(self.poll_interval);
                    continue;
                }
            };

            if samples.is_empty() {
                if source.is_exhausted() {
                    tracing::info!(source = source.name(), "Audio source exhausted");
                    break;
                }
                thread::sleep(self.poll_interval);
                continue;
            }

            {
                let tap = self.shared.tap.lock();
                self.buffer.push(&samples);
                if let Some(recording) = tap.as_ref() {
                    recording.append(&samples);
                }
            }
            chunks += 1;

            thread::sleep(self.poll_interval);
        }

        self.shared.running.store(false, Ordering::SeqCst);
        if chunks == 0 && !finite {
            tracing::warn!(source = source.name(), "No audio captured from the source");
        }
        if let Err(e) = source.stop() {
            tracing::warn!("Failed to stop audio capture: {e}");
        }
        tracing::debug!(chunks, "Capture thread finished");
    }

    fn unavailable(&self, reason: String) {
        self.shared.armed.store(false, Ordering::SeqCst);
        self.emitter
            .emit(PipelineEvent::ListeningUnavailable { reason });
    }
}

struct AnalysisLoop {
    detector: WakePhraseDetector,
    buffer: SampleBuffer,
    shared: Arc<Shared>,
    emitter: Arc<dyn EventEmitter>,
    interval: Duration,
    window_samples: usize,
    min_new_samples: u64,
    min_samples: usize,
}

impl AnalysisLoop {
    fn run(self) {
        while self.shared.running.load(Ordering::SeqCst) {
            thread::sleep(self.interval);
            if self.shared.armed.load(Ordering::SeqCst) {
                self.cycle();
            }
        }
        tracing::debug!("Wake analysis thread finished");
    }

    fn cycle(&self) {
        if self.buffer.len() < self.min_samples {
            return;
        }
        let analyzed = self.shared.analyzed_upto.load(Ordering::SeqCst);
        if self.buffer.total_written().saturating_sub(analyzed) < self.min_new_samples {
            return;
        }

        let (window, position) = self.buffer.snapshot_with_position(self.window_samples);
        self.shared.analyzed_upto.store(position, Ordering::SeqCst);

        match self.detector.analyze(&window) {
            Ok(result) if result.detected => {
                // Only the cycle that disarms the pipeline reports the detection.
                if self
                    .shared
                    .armed
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return;
                }
                self.buffer.clear();
                self.shared.analyzed_upto.store(0, Ordering::SeqCst);
                let detection_id = self.shared.detections.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    detection_id,
                    text = %result.matched_text,
                    confidence = result.confidence,
                    "Wake phrase detected"
                );
                self.emitter.emit(PipelineEvent::WakePhraseDetected {
                    detection_id,
                    matched_text: result.matched_text,
                    confidence: result.confidence,
                });
            }
            Ok(result) => {
                tracing::trace!(text = %result.matched_text, "No wake phrase in window");
            }
            Err(DetectionError::EmptyBuffer) => {}
            Err(e) => {
                tracing::warn!("Wake analysis failed, retrying next cycle: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::MockAudioSource;
    use crate::pipeline::events::CollectingEmitter;
    use crate::stt::transcriber::{MockTranscriber, ScriptedTranscriber};
    use std::time::Instant;

    fn speech_chunk() -> Vec<f32> {
        (0..1600).map(|i| 0.2 * ((i as f32) * 0.05).sin()).collect()
    }

    fn fast_config() -> ListeningConfig {
        ListeningConfig {
            analysis_interval: Duration::from_millis(10),
            capture_poll_interval: Duration::from_millis(2),
            ..ListeningConfig::default()
        }
    }

    fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_stop_without_start_is_safe_and_idempotent() {
        let mut pipeline = ListeningPipeline::new(
            Arc::new(MockTranscriber::new("mock")),
            ListeningConfig::default(),
        );
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_wake_phrase_emitted_once_per_detection() {
        let transcriber = MockTranscriber::new("mock").with_response("hey cat");
        let mut pipeline = ListeningPipeline::new(Arc::new(transcriber), fast_config());
        let emitter = CollectingEmitter::new();
        let source = MockAudioSource::new().with_samples(speech_chunk());

        pipeline
            .start(Box::new(source), Arc::new(emitter.clone()))
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || emitter.count("wake_phrase_detected") == 1));

        // Disarmed: more audio with the same phrase must not re-trigger.
        thread::sleep(Duration::from_millis(200));
        assert_eq!(emitter.count("wake_phrase_detected"), 1);
        assert!(!pipeline.is_armed());
        pipeline.stop();

        match &emitter.events()[0] {
            PipelineEvent::WakePhraseDetected {
                detection_id,
                matched_text,
                ..
            } => {
                assert_eq!(*detection_id, 1);
                assert_eq!(matched_text, "hey cat");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_resume_rearms_detection() {
        let transcriber = MockTranscriber::new("mock").with_response("hey cat");
        let mut pipeline = ListeningPipeline::new(Arc::new(transcriber), fast_config());
        let emitter = CollectingEmitter::new();
        pipeline
            .start(
                Box::new(MockAudioSource::new().with_samples(speech_chunk())),
                Arc::new(emitter.clone()),
            )
            .unwrap();

        assert!(wait_for(Duration::from_secs(2), || emitter.count("wake_phrase_detected") == 1));
        pipeline.resume();
        assert!(wait_for(Duration::from_secs(2), || emitter.count("wake_phrase_detected") == 2));
        assert_eq!(pipeline.detections(), 2);
        pipeline.stop();
    }

    #[test]
    fn test_silence_is_never_transcribed() {
        let transcriber = MockTranscriber::new("mock").with_response("hey cat");
        let mut pipeline = ListeningPipeline::new(Arc::new(transcriber.clone()), fast_config());
        let emitter = CollectingEmitter::new();
        pipeline
            .start(Box::new(MockAudioSource::new()), Arc::new(emitter.clone()))
            .unwrap();

        thread::sleep(Duration::from_millis(300));
        pipeline.stop();
        assert_eq!(transcriber.calls(), 0);
        assert!(emitter.is_empty());
    }

    #[test]
    fn test_transcription_errors_are_retried() {
        let transcriber = ScriptedTranscriber::new()
            .then_fail("model busy")
            .then_fail("model busy")
            .then("hey cat", 0.95);
        let mut pipeline = ListeningPipeline::new(Arc::new(transcriber.clone()), fast_config());
        let emitter = CollectingEmitter::new();
        pipeline
            .start(
                Box::new(MockAudioSource::new().with_samples(speech_chunk())),
                Arc::new(emitter.clone()),
            )
            .unwrap();

        assert!(wait_for(Duration::from_secs(3), || emitter.count("wake_phrase_detected") == 1));
        assert!(transcriber.calls() >= 3);
        pipeline.stop();
    }

    #[test]
    fn test_disconnect_emits_unavailable_and_releases_source() {
        let source = MockAudioSource::new().with_disconnect_after(3);
        let probe = source.clone();
        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        let emitter = CollectingEmitter::new();
        pipeline
            .start(Box::new(source), Arc::new(emitter.clone()))
            .unwrap();

        assert!(wait_for(Duration::from_secs(2), || !pipeline.is_running()));
        assert!(wait_for(Duration::from_secs(1), || probe.stop_calls() == 1));
        assert_eq!(emitter.count("listening_unavailable"), 1);
        assert!(!probe.is_started());
        pipeline.stop();
        assert_eq!(probe.stop_calls(), 1);
    }

    #[test]
    fn test_repeated_read_errors_give_up() {
        let source = MockAudioSource::new().with_read_failure();
        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        let emitter = CollectingEmitter::new();
        pipeline
            .start(Box::new(source), Arc::new(emitter.clone()))
            .unwrap();

        assert!(wait_for(Duration::from_secs(2), || !pipeline.is_running()));
        assert_eq!(emitter.count("listening_unavailable"), 1);
    }

    #[test]
    fn test_finite_source_ends_quietly() {
        let source = MockAudioSource::new().with_max_reads(5);
        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        let emitter = CollectingEmitter::new();
        pipeline
            .start(Box::new(source), Arc::new(emitter.clone()))
            .unwrap();

        assert!(wait_for(Duration::from_secs(2), || !pipeline.is_running()));
        pipeline.stop();
        assert!(emitter.is_empty());
    }

    #[test]
    fn test_start_failure_leaves_pipeline_stopped() {
        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        let result = pipeline.start(
            Box::new(MockAudioSource::new().with_start_failure()),
            Arc::new(CollectingEmitter::new()),
        );
        assert!(matches!(
            result,
            Err(WakescribeError::AudioDeviceNotFound { .. })
        ));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_double_start_is_rejected() {
        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        let emitter: Arc<dyn EventEmitter> = Arc::new(CollectingEmitter::new());
        pipeline
            .start(Box::new(MockAudioSource::new()), emitter.clone())
            .unwrap();
        assert!(matches!(
            pipeline.start(Box::new(MockAudioSource::new()), emitter),
            Err(WakescribeError::PipelineAlreadyRunning)
        ));
        pipeline.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        let emitter: Arc<dyn EventEmitter> = Arc::new(CollectingEmitter::new());
        pipeline
            .start(Box::new(MockAudioSource::new()), emitter.clone())
            .unwrap();
        pipeline.stop();
        pipeline
            .start(Box::new(MockAudioSource::new()), emitter)
            .unwrap();
        assert!(pipeline.is_running());
        pipeline.stop();
    }

    #[test]
    fn test_recording_tap_receives_audio_until_ended() {
        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        pipeline
            .start(
                Box::new(MockAudioSource::new().with_samples(speech_chunk())),
                Arc::new(CollectingEmitter::new()),
            )
            .unwrap();

        let recording = pipeline.begin_recording();
        assert!(wait_for(Duration::from_secs(1), || recording.len() >= 16000));
        pipeline.end_recording();
        assert!(!recording.is_open());

        let len = recording.len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(recording.len(), len);
        pipeline.stop();
    }

    #[test]
    fn test_sample_rate_mismatch_is_rejected() {
        struct Source8k;
        impl AudioSource for Source8k {
            fn start(&mut self) -> Result<()> {
                Ok(())
            }
            fn stop(&mut self) -> Result<()> {
                Ok(())
            }
            fn read_samples(&mut self) -> Result<Vec<f32>> {
                Ok(Vec::new())
            }
            fn sample_rate(&self) -> u32 {
                8000
            }
        }

        let mut pipeline =
            ListeningPipeline::new(Arc::new(MockTranscriber::new("mock")), fast_config());
        assert!(matches!(
            pipeline.start(Box::new(Source8k), Arc::new(CollectingEmitter::new())),
            Err(WakescribeError::AudioFormatMismatch { .. })
        ));
    }
}
