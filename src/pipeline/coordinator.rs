//! Interrupt detection while a recording is in progress.
//!
//! The coordinator thread owns a [`SilenceDetector`] and a
//! [`CancelPhraseDetector`] for the duration of one recording, feeds them the
//! recording's audio on a fixed poll interval and turns the first verdict
//! into a state transition. The detectors travel back through the thread's
//! join handle so the next recording reuses them.

use crate::audio::sample_buffer::RecordingBuffer;
use crate::audio::vad::{Clock, SystemClock};
use crate::defaults;
use crate::detect::cancel::{CancelDetectorConfig, CancelPhraseDetector, CancelPhraseResult};
use crate::detect::silence::{SilenceConfig, SilenceDetectionResult, SilenceDetector, StopReason};
use crate::error::{CoordinatorError, Result};
use crate::pipeline::events::{EventEmitter, PipelineEvent};
use crate::pipeline::state::{RecordingId, StateAuthority, TransitionReason};
use crate::pipeline::worker::join_until;
use crate::stt::transcriber::Transcriber;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub silence: SilenceConfig,
    pub cancel: CancelDetectorConfig,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            silence: SilenceConfig::default(),
            cancel: CancelDetectorConfig::default(),
            poll_interval: Duration::from_millis(defaults::DETECTION_INTERVAL_MS),
            stop_timeout: Duration::from_millis(defaults::STOP_TIMEOUT_MS),
        }
    }
}

/// How a monitoring run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// Cancel phrase: recording aborted, audio discarded.
    Cancelled { phrase: String },
    /// Silence after speech: recording moved to Processing, audio kept.
    Kept,
    /// No speech: recording aborted, audio discarded.
    Discarded,
    /// `stop_monitoring` was called.
    Stopped,
    /// The recording was ended by someone else first.
    Superseded,
    /// The recording buffer was closed from outside and fully read.
    BufferClosed,
}

/// The two detectors that can interrupt a recording.
pub struct InterruptDetectors {
    pub silence: SilenceDetector,
    pub cancel: CancelPhraseDetector,
}

struct MonitorSession {
    recording_id: RecordingId,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<(InterruptDetectors, MonitorOutcome)>,
}

pub struct RecordingCoordinator {
    config: CoordinatorConfig,
    transcriber: Arc<dyn Transcriber>,
    clock: Arc<dyn Clock>,
    /// Idle detectors; `None` while a monitoring thread owns them.
    detectors: Option<InterruptDetectors>,
    session: Option<MonitorSession>,
    last_outcome: Option<MonitorOutcome>,
}

impl RecordingCoordinator {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: CoordinatorConfig) -> Self {
        Self::with_clock(transcriber, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transcriber: Arc<dyn Transcriber>,
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut coordinator = Self {
            config,
            transcriber,
            clock,
            detectors: None,
            session: None,
            last_outcome: None,
        };
        coordinator.detectors = Some(coordinator.build_detectors());
        coordinator
    }

    fn build_detectors(&self) -> InterruptDetectors {
        InterruptDetectors {
            silence: SilenceDetector::new(self.config.silence),
            cancel: CancelPhraseDetector::with_clock(
                self.transcriber.clone(),
                self.config.cancel.clone(),
                self.clock.clone(),
            ),
        }
    }

    /// Start watching recording `recording_id` for silence and cancel phrases.
    pub fn start_monitoring(
        &mut self,
        recording_id: RecordingId,
        buffer: RecordingBuffer,
        state: StateAuthority,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<()> {
        self.reap_finished();
        if self.session.is_some() {
            return Err(CoordinatorError::AlreadyMonitoring.into());
        }

        let mut detectors = match self.detectors.take() {
            Some(detectors) => detectors,
            None => {
                tracing::debug!("Rebuilding interrupt detectors");
                self.build_detectors()
            }
        };
        detectors.silence.reset();
        detectors.cancel.start_session();

        let stop = Arc::new(AtomicBool::new(false));
        let monitor = MonitorLoop {
            recording_id,
            buffer,
            state,
            emitter,
            stop: stop.clone(),
            poll_interval: self.config.poll_interval,
        };
        let handle = thread::Builder::new()
            .name("wakescribe-monitor".to_string())
            .spawn(move || {
                let outcome = monitor.run(&mut detectors);
                detectors.cancel.end_session();
                (detectors, outcome)
            })?;

        tracing::debug!(recording = %recording_id, "Monitoring recording");
        self.session = Some(MonitorSession {
            recording_id,
            stop,
            handle,
        });
        Ok(())
    }

    /// Signal the monitoring thread to exit and wait for it, up to the stop timeout.
    ///
    /// Returns the run's outcome, or `None` if the thread panicked or missed
    /// the deadline (its detectors are rebuilt for the next recording).
    pub fn stop_monitoring(&mut self) -> std::result::Result<Option<MonitorOutcome>, CoordinatorError> {
        let session = self.session.take().ok_or(CoordinatorError::NotMonitoring)?;
        session.stop.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + self.config.stop_timeout;
        Ok(self.finish(session, deadline))
    }

    fn finish(&mut self, session: MonitorSession, deadline: Instant) -> Option<MonitorOutcome> {
        let recording = session.recording_id;
        match join_until(session.handle, deadline, "monitor") {
            Some((detectors, outcome)) => {
                tracing::debug!(%recording, ?outcome, "Monitoring finished");
                self.detectors = Some(detectors);
                self.last_outcome = Some(outcome.clone());
                Some(outcome)
            }
            None => None,
        }
    }

    /// Collect a thread that already exited on its own.
    fn reap_finished(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.handle.is_finished())
            && let Some(session) = self.session.take()
        {
            let _outcome = self.finish(session, Instant::now());
        }
    }

    /// Whether a monitoring thread is still running.
    pub fn is_monitoring(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.handle.is_finished())
    }

    pub fn monitored_recording(&self) -> Option<RecordingId> {
        self.session.as_ref().map(|session| session.recording_id)
    }

    /// Outcome of the most recently collected run.
    pub fn last_outcome(&mut self) -> Option<MonitorOutcome> {
        self.reap_finished();
        self.last_outcome.clone()
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _outcome = self.stop_monitoring();
        }
    }
}

struct MonitorLoop {
    recording_id: RecordingId,
    buffer: RecordingBuffer,
    state: StateAuthority,
    emitter: Arc<dyn EventEmitter>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl MonitorLoop {
    fn run(&self, detectors: &mut InterruptDetectors) -> MonitorOutcome {
        let id = self.recording_id;
        let mut cursor = 0;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return MonitorOutcome::Stopped;
            }
            if !self.state.is_recording(id) {
                return MonitorOutcome::Superseded;
            }

            let chunk = self.buffer.read_from(cursor);
            if chunk.is_empty() {
                if !self.buffer.is_open() {
                    return MonitorOutcome::BufferClosed;
                }
                thread::sleep(self.poll_interval);
                continue;
            }
            cursor += chunk.len();

            // Cancel is checked first and wins a tie with silence.
            if let Some(outcome) = self.check_cancel(&mut detectors.cancel, &chunk) {
                return outcome;
            }

            match detectors.silence.process_samples(&chunk) {
                SilenceDetectionResult::Continue => {}
                SilenceDetectionResult::Stop(StopReason::SilenceAfterSpeech) => {
                    return self.keep();
                }
                SilenceDetectionResult::Stop(StopReason::NoSpeechTimeout) => {
                    return self.discard();
                }
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn check_cancel(
        &self,
        cancel: &mut CancelPhraseDetector,
        chunk: &[f32],
    ) -> Option<MonitorOutcome> {
        if !cancel.has_session() {
            return None;
        }
        cancel.push_samples(chunk);

        match cancel.analyze_and_abort() {
            Ok(CancelPhraseResult::Detected { phrase, .. }) => {
                match self
                    .state
                    .abort(self.recording_id, TransitionReason::Cancelled)
                {
                    Ok(_) => {
                        self.buffer.discard();
                        self.emitter.emit(PipelineEvent::RecordingCancelled {
                            recording_id: self.recording_id,
                            phrase: phrase.clone(),
                        });
                        Some(MonitorOutcome::Cancelled { phrase })
                    }
                    Err(e) => {
                        tracing::debug!("Cancel lost the race: {e}");
                        Some(MonitorOutcome::Superseded)
                    }
                }
            }
            Ok(CancelPhraseResult::WindowExpired) => {
                tracing::debug!(recording = %self.recording_id, "Cancel window closed");
                cancel.end_session();
                None
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Cancel analysis failed, retrying next cycle: {e}");
                None
            }
        }
    }

    fn keep(&self) -> MonitorOutcome {
        match self
            .state
            .stop_recording(self.recording_id, TransitionReason::AutoStopped)
        {
            Ok(_) => {
                self.buffer.close();
                let samples = self.buffer.len();
                tracing::info!(recording = %self.recording_id, samples, "Speech ended, keeping recording");
                self.emitter.emit(PipelineEvent::SilenceStopKeep {
                    recording_id: self.recording_id,
                    samples,
                });
                MonitorOutcome::Kept
            }
            Err(e) => {
                tracing::debug!("Silence stop lost the race: {e}");
                MonitorOutcome::Superseded
            }
        }
    }

    fn discard(&self) -> MonitorOutcome {
        match self
            .state
            .abort(self.recording_id, TransitionReason::Aborted)
        {
            Ok(_) => {
                self.buffer.discard();
                tracing::debug!(recording = %self.recording_id, "No speech, discarding recording");
                self.emitter.emit(PipelineEvent::SilenceTimeoutAbort {
                    recording_id: self.recording_id,
                });
                MonitorOutcome::Discarded
            }
            Err(e) => {
                tracing::debug!("No-speech abort lost the race: {e}");
                MonitorOutcome::Superseded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::MockClock;
    use crate::pipeline::events::CollectingEmitter;
    use crate::pipeline::state::RecordingState;
    use crate::stt::transcriber::MockTranscriber;

    fn speech(seconds: f32) -> Vec<f32> {
        let count = (seconds * 16000.0) as usize;
        (0..count)
            .map(|i| 0.25 * ((i as f32) * 0.06).sin())
            .collect()
    }

    fn silence(seconds: f32) -> Vec<f32> {
        vec![0.0; (seconds * 16000.0) as usize]
    }

    fn config(silence_ms: u32, no_speech_ms: u32) -> CoordinatorConfig {
        CoordinatorConfig {
            silence: SilenceConfig {
                silence_duration_ms: silence_ms,
                no_speech_timeout_ms: no_speech_ms,
                ..SilenceConfig::default()
            },
            poll_interval: Duration::from_millis(5),
            ..CoordinatorConfig::default()
        }
    }

    struct Fixture {
        coordinator: RecordingCoordinator,
        state: StateAuthority,
        emitter: CollectingEmitter,
        clock: MockClock,
    }

    fn fixture(cancel_hears: MockTranscriber, config: CoordinatorConfig) -> Fixture {
        let clock = MockClock::new();
        Fixture {
            coordinator: RecordingCoordinator::with_clock(
                Arc::new(cancel_hears),
                config,
                Arc::new(clock.clone()),
            ),
            state: StateAuthority::new(),
            emitter: CollectingEmitter::new(),
            clock,
        }
    }

    impl Fixture {
        fn begin(&mut self) -> (RecordingId, RecordingBuffer) {
            if self.state.current() == RecordingState::Idle {
                self.state
                    .transition_to(RecordingState::Listening, TransitionReason::ListeningEnabled)
                    .unwrap();
            }
            let id = self.state.begin_recording(TransitionReason::WakePhrase).unwrap();
            let buffer = RecordingBuffer::new(16000);
            self.coordinator
                .start_monitoring(
                    id,
                    buffer.clone(),
                    self.state.clone(),
                    Arc::new(self.emitter.clone()),
                )
                .unwrap();
            (id, buffer)
        }

        fn wait_until_done(&self) {
            let deadline = Instant::now() + Duration::from_secs(2);
            while self.coordinator.is_monitoring() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            assert!(!self.coordinator.is_monitoring(), "monitor did not finish");
        }
    }

    #[test]
    fn test_no_speech_timeout_discards_and_returns_to_listening() {
        let transcriber = MockTranscriber::new("mock").with_response("hello");
        let mut f = fixture(transcriber.clone(), config(2000, 8000));
        let (id, buffer) = f.begin();

        for _ in 0..5 {
            buffer.append(&silence(2.0));
        }
        f.wait_until_done();

        assert_eq!(f.state.current(), RecordingState::Listening);
        assert!(buffer.is_discarded());
        assert_eq!(
            f.emitter.events(),
            vec![PipelineEvent::SilenceTimeoutAbort { recording_id: id }]
        );
        assert_eq!(f.coordinator.last_outcome(), Some(MonitorOutcome::Discarded));
        // Silent audio never reaches the transcriber.
        assert_eq!(transcriber.calls(), 0);
    }

    #[test]
    fn test_silence_after_speech_keeps_audio() {
        let transcriber = MockTranscriber::new("mock").with_response("hello world");
        let mut f = fixture(transcriber, config(3000, 8000));
        let (id, buffer) = f.begin();

        buffer.append(&speech(2.0));
        buffer.append(&silence(4.0));
        f.wait_until_done();

        assert_eq!(f.state.current(), RecordingState::Processing);
        assert!(!buffer.is_discarded());
        assert!(!buffer.is_open());
        assert_eq!(buffer.len(), 6 * 16000);
        assert_eq!(
            f.emitter.events(),
            vec![PipelineEvent::SilenceStopKeep {
                recording_id: id,
                samples: 6 * 16000
            }]
        );
    }

    #[test]
    fn test_cancel_phrase_discards_once() {
        let transcriber = MockTranscriber::new("mock")
            .with_response("nevermind")
            .with_confidence(0.95);
        let mut f = fixture(transcriber, config(2000, 5000));
        let (id, buffer) = f.begin();

        buffer.append(&silence(1.0));
        f.clock.advance(Duration::from_secs(1));
        buffer.append(&speech(1.0));
        f.wait_until_done();

        assert_eq!(f.state.current(), RecordingState::Listening);
        assert!(buffer.is_discarded());
        assert_eq!(f.emitter.count("recording_cancelled"), 1);
        assert_eq!(
            f.emitter.events()[0],
            PipelineEvent::RecordingCancelled {
                recording_id: id,
                phrase: "nevermind".to_string()
            }
        );
    }

    #[test]
    fn test_cancel_wins_over_silence_in_the_same_poll() {
        let transcriber = MockTranscriber::new("mock")
            .with_response("cancel")
            .with_confidence(0.99);
        let mut f = fixture(transcriber, config(1000, 5000));
        let (_, buffer) = f.begin();

        let mut chunk = speech(1.0);
        chunk.extend(silence(2.0));
        buffer.append(&chunk);
        f.wait_until_done();

        assert_eq!(f.emitter.count("recording_cancelled"), 1);
        assert_eq!(f.emitter.count("silence_stop_keep"), 0);
        assert_eq!(f.state.current(), RecordingState::Listening);
    }

    #[test]
    fn test_cancel_ignored_after_window() {
        let transcriber = MockTranscriber::new("mock")
            .with_response("cancel")
            .with_confidence(0.99);
        let mut f = fixture(transcriber.clone(), config(2000, 8000));
        let (_, buffer) = f.begin();

        f.clock.advance(Duration::from_millis(3100));
        buffer.append(&speech(1.0));
        buffer.append(&silence(2.5));
        f.wait_until_done();

        assert_eq!(transcriber.calls(), 0);
        assert_eq!(f.emitter.count("recording_cancelled"), 0);
        assert_eq!(f.emitter.count("silence_stop_keep"), 1);
    }

    #[test]
    fn test_external_stop_wins_and_nothing_is_emitted() {
        let mut f = fixture(MockTranscriber::new("mock"), config(2000, 5000));
        let (id, buffer) = f.begin();

        f.state
            .stop_recording(id, TransitionReason::ExternalStop)
            .unwrap();
        buffer.append(&silence(6.0));
        f.wait_until_done();

        assert_eq!(f.state.current(), RecordingState::Processing);
        assert!(f.emitter.is_empty());
        assert!(!buffer.is_discarded());
        assert_eq!(f.coordinator.last_outcome(), Some(MonitorOutcome::Superseded));
    }

    #[test]
    fn test_stop_monitoring_is_prompt() {
        let mut f = fixture(MockTranscriber::new("mock"), config(2000, 5000));
        let (id, _buffer) = f.begin();
        assert_eq!(f.coordinator.monitored_recording(), Some(id));

        let start = Instant::now();
        let outcome = f.coordinator.stop_monitoring().unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(outcome, Some(MonitorOutcome::Stopped));
        assert_eq!(f.coordinator.monitored_recording(), None);
        assert_eq!(f.state.current(), RecordingState::Recording);
    }

    #[test]
    fn test_session_misuse_is_rejected() {
        let mut f = fixture(MockTranscriber::new("mock"), config(2000, 5000));
        assert_eq!(
            f.coordinator.stop_monitoring(),
            Err(CoordinatorError::NotMonitoring)
        );

        let (id, buffer) = f.begin();
        let second = f.coordinator.start_monitoring(
            id,
            buffer,
            f.state.clone(),
            Arc::new(f.emitter.clone()),
        );
        assert!(matches!(
            second,
            Err(crate::error::WakescribeError::Coordinator(
                CoordinatorError::AlreadyMonitoring
            ))
        ));
        f.coordinator.stop_monitoring().unwrap();
    }

    #[test]
    fn test_closed_buffer_ends_monitoring() {
        let mut f = fixture(MockTranscriber::new("mock"), config(2000, 5000));
        let (_, buffer) = f.begin();
        buffer.append(&silence(0.5));
        buffer.close();
        f.wait_until_done();
        assert_eq!(f.coordinator.last_outcome(), Some(MonitorOutcome::BufferClosed));
        assert!(f.emitter.is_empty());
    }

    #[test]
    fn test_detectors_are_reused_across_recordings() {
        let transcriber = MockTranscriber::new("mock").with_response("hello");
        let mut f = fixture(transcriber, config(1000, 3000));

        let (_, first) = f.begin();
        first.append(&silence(4.0));
        f.wait_until_done();
        assert_eq!(f.coordinator.last_outcome(), Some(MonitorOutcome::Discarded));

        let (second_id, second) = f.begin();
        second.append(&speech(1.0));
        second.append(&silence(1.5));
        f.wait_until_done();
        assert_eq!(f.coordinator.last_outcome(), Some(MonitorOutcome::Kept));
        assert_eq!(f.state.current_recording(), Some(second_id));
        assert_eq!(f.state.current(), RecordingState::Processing);
    }
}
