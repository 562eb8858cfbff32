//! Dictation controller: the one owner of the recording state.
//!
//! The listening pipeline and the recording coordinator only report what
//! they saw. The controller consumes their [`PipelineEvent`]s on its own
//! thread and turns them into the next step: start a recording, transcribe
//! kept audio, resume listening or give up on a lost device.

use crate::audio::recorder::AudioSource;
use crate::audio::sample_buffer::RecordingBuffer;
use crate::defaults;
use crate::error::{Result, WakescribeError};
use crate::pipeline::coordinator::{CoordinatorConfig, RecordingCoordinator};
use crate::pipeline::events::{ChannelEmitter, EventEmitter, PipelineEvent};
use crate::pipeline::listening::{ListeningConfig, ListeningPipeline};
use crate::pipeline::sink::TextSink;
use crate::pipeline::state::{RecordingId, RecordingState, StateAuthority, TransitionReason};
use crate::stt::transcriber::Transcriber;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Opens a replacement capture source after the current one disappears.
pub type SourceFactory = Box<dyn FnMut() -> Result<Box<dyn AudioSource>> + Send>;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub listening: ListeningConfig,
    pub coordinator: CoordinatorConfig,
    /// How long `run` waits for an event before re-checking shutdown.
    pub event_poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listening: ListeningConfig::default(),
            coordinator: CoordinatorConfig::default(),
            event_poll_interval: Duration::from_millis(defaults::DETECTION_INTERVAL_MS),
        }
    }
}

/// The transcription backends of each stage.
///
/// A live session uses one model for everything; tests script each stage.
#[derive(Clone)]
pub struct Transcribers {
    pub wake: Arc<dyn Transcriber>,
    pub cancel: Arc<dyn Transcriber>,
    pub dictation: Arc<dyn Transcriber>,
}

impl Transcribers {
    pub fn shared(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            wake: transcriber.clone(),
            cancel: transcriber.clone(),
            dictation: transcriber,
        }
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub wake_detections: u64,
    pub recordings: u64,
    pub kept: u64,
    pub cancelled: u64,
    pub discarded: u64,
    pub transcriptions: u64,
    pub device_retries: u64,
}

struct ActiveRecording {
    id: RecordingId,
    buffer: RecordingBuffer,
}

pub struct DictationController {
    config: ControllerConfig,
    state: StateAuthority,
    pipeline: ListeningPipeline,
    coordinator: RecordingCoordinator,
    dictation: Arc<dyn Transcriber>,
    sink: Box<dyn TextSink>,
    emitter: ChannelEmitter,
    events: Receiver<PipelineEvent>,
    observer: Option<Arc<dyn EventEmitter>>,
    fallback: Option<SourceFactory>,
    retried_device: bool,
    source_name: String,
    active: Option<ActiveRecording>,
    stats: SessionStats,
}

impl DictationController {
    pub fn new(
        config: ControllerConfig,
        transcriber: Arc<dyn Transcriber>,
        sink: Box<dyn TextSink>,
    ) -> Self {
        Self::with_transcribers(config, Transcribers::shared(transcriber), sink)
    }

    pub fn with_transcribers(
        config: ControllerConfig,
        transcribers: Transcribers,
        sink: Box<dyn TextSink>,
    ) -> Self {
        let (emitter, events) = ChannelEmitter::bounded(defaults::EVENT_CHANNEL_CAPACITY);
        Self {
            pipeline: ListeningPipeline::new(transcribers.wake, config.listening.clone()),
            coordinator: RecordingCoordinator::new(transcribers.cancel, config.coordinator.clone()),
            dictation: transcribers.dictation,
            config,
            state: StateAuthority::new(),
            sink,
            emitter,
            events,
            observer: None,
            fallback: None,
            retried_device: false,
            source_name: String::new(),
            active: None,
            stats: SessionStats::default(),
        }
    }

    /// Receive a copy of every event after the controller handled it.
    pub fn with_observer(mut self, observer: Arc<dyn EventEmitter>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Source to fall back to once if the capture device disappears.
    pub fn with_fallback_source(mut self, factory: SourceFactory) -> Self {
        self.fallback = Some(factory);
        self
    }

    pub fn state(&self) -> &StateAuthority {
        &self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn pipeline(&self) -> &ListeningPipeline {
        &self.pipeline
    }

    fn shared_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(self.emitter.clone())
    }

    /// Enter Listening and start capturing from `source`.
    pub fn start_listening(&mut self, source: Box<dyn AudioSource>) -> Result<()> {
        if self.state.current() == RecordingState::Idle {
            self.state
                .transition_to(RecordingState::Listening, TransitionReason::ListeningEnabled)?;
        }
        self.source_name = source.name().to_string();
        let emitter = self.shared_emitter();
        if let Err(e) = self.pipeline.start(source, emitter) {
            self.disable_listening(TransitionReason::ListeningDisabled);
            return Err(e);
        }
        Ok(())
    }

    fn disable_listening(&mut self, reason: TransitionReason) {
        if self.state.current() == RecordingState::Listening
            && let Err(e) = self.state.transition_to(RecordingState::Idle, reason)
        {
            tracing::debug!("Could not leave Listening: {e}");
        }
    }

    /// Process events until `shutdown` is set, `max_duration` elapses or a
    /// finite source has been fully handled.
    pub fn run(&mut self, shutdown: &AtomicBool, max_duration: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                tracing::debug!("Shutdown requested");
                return Ok(());
            }
            if let Some(limit) = max_duration
                && started.elapsed() >= limit
            {
                tracing::info!("Session time limit reached");
                return Ok(());
            }

            match self.events.recv_timeout(self.config.event_poll_interval) {
                Ok(event) => self.handle_event(event)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }

            if !self.pipeline.is_running() && self.events.is_empty() {
                // Capture ended without a device error: the source ran dry.
                let Some(active) = &self.active else {
                    tracing::debug!("Audio source finished");
                    return Ok(());
                };
                // The coordinator judges the tail of the recording first.
                active.buffer.close();
                if !self.coordinator.is_monitoring() && self.events.is_empty() {
                    self.stop_recording()?;
                }
            }
        }
    }

    /// React to one pipeline event.
    pub fn handle_event(&mut self, event: PipelineEvent) -> Result<()> {
        tracing::debug!(event = event.name(), "Pipeline event");
        let result = match &event {
            PipelineEvent::WakePhraseDetected { .. } => {
                self.stats.wake_detections += 1;
                let current = self.state.current();
                if current == RecordingState::Listening {
                    self.begin_recording(TransitionReason::WakePhrase).map(|_| ())
                } else {
                    tracing::debug!(state = ?current, "Ignoring wake phrase outside Listening");
                    Ok(())
                }
            }
            PipelineEvent::SilenceStopKeep { recording_id, .. } => {
                self.finish_kept(*recording_id)
            }
            PipelineEvent::RecordingCancelled {
                recording_id,
                phrase,
            } => {
                tracing::info!(recording = %recording_id, %phrase, "Recording discarded");
                self.stats.cancelled += 1;
                self.finish_discarded(*recording_id);
                Ok(())
            }
            PipelineEvent::SilenceTimeoutAbort { recording_id } => {
                tracing::debug!(recording = %recording_id, "False activation, back to listening");
                self.stats.discarded += 1;
                self.finish_discarded(*recording_id);
                Ok(())
            }
            PipelineEvent::ListeningUnavailable { reason } => self.recover_listening(reason),
        };

        if let Some(observer) = &self.observer {
            observer.emit(event);
        }
        result
    }

    /// Start a recording without the wake phrase.
    pub fn start_recording(&mut self) -> Result<RecordingId> {
        if !self.pipeline.is_running() {
            return Err(WakescribeError::AudioCapture {
                message: "no audio source is running".to_string(),
            });
        }
        self.pipeline.pause();
        self.begin_recording(TransitionReason::ManualStart)
    }

    fn begin_recording(&mut self, reason: TransitionReason) -> Result<RecordingId> {
        let id = self.state.begin_recording(reason)?;
        let buffer = self.pipeline.begin_recording();
        let started = self.coordinator.start_monitoring(
            id,
            buffer.clone(),
            self.state.clone(),
            self.shared_emitter(),
        );
        if let Err(e) = started {
            tracing::error!(recording = %id, "Could not monitor recording: {e}");
            buffer.discard();
            self.pipeline.end_recording();
            let _aborted = self.state.abort(id, TransitionReason::Aborted);
            self.resume_listening();
            return Err(e);
        }

        tracing::info!(recording = %id, "Recording started");
        self.stats.recordings += 1;
        self.active = Some(ActiveRecording { id, buffer });
        Ok(id)
    }

    /// Stop the active recording from outside and transcribe it.
    ///
    /// Returns `false` if the coordinator ended the recording first; its
    /// event is then still on its way.
    pub fn stop_recording(&mut self) -> Result<bool> {
        let Some(id) = self.active.as_ref().map(|active| active.id) else {
            return Ok(false);
        };
        if let Err(e) = self.state.stop_recording(id, TransitionReason::ExternalStop) {
            tracing::debug!("External stop lost the race: {e}");
            return Ok(false);
        }
        tracing::info!(recording = %id, "Recording stopped");
        self.finish_kept(id)?;
        Ok(true)
    }

    fn take_active(&mut self, id: RecordingId) -> Option<ActiveRecording> {
        match self.active.take() {
            Some(active) if active.id == id => Some(active),
            other => {
                tracing::debug!(recording = %id, "Event for a recording that is not active");
                self.active = other;
                None
            }
        }
    }

    fn collect_monitor(&mut self) {
        if let Err(e) = self.coordinator.stop_monitoring() {
            tracing::trace!("{e}");
        }
    }

    fn finish_kept(&mut self, id: RecordingId) -> Result<()> {
        let Some(active) = self.take_active(id) else {
            return Ok(());
        };
        self.pipeline.end_recording();
        self.collect_monitor();
        self.stats.kept += 1;

        let samples = active.buffer.take_samples();
        let outcome = self.transcribe_and_deliver(&samples, active.buffer.sample_rate());

        if let Err(e) = self.state.complete(id) {
            tracing::warn!(recording = %id, "Could not complete recording: {e}");
        }
        self.resume_listening();
        outcome
    }

    fn transcribe_and_deliver(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        match self.dictation.transcribe(samples, sample_rate) {
            Ok(transcription) => {
                let text = transcription.text.trim();
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    confidence = transcription.confidence,
                    "Transcribed recording"
                );
                if text.is_empty() {
                    return Ok(());
                }
                self.stats.transcriptions += 1;
                self.sink.handle(text)
            }
            Err(e) => {
                // The audio is lost but listening goes on.
                tracing::error!("Transcription failed: {e}");
                Ok(())
            }
        }
    }

    fn finish_discarded(&mut self, id: RecordingId) {
        if self.take_active(id).is_none() {
            return;
        }
        self.pipeline.end_recording();
        self.collect_monitor();
        self.resume_listening();
    }

    fn resume_listening(&mut self) {
        if self.state.current() == RecordingState::Listening && self.pipeline.is_running() {
            self.pipeline.resume();
        }
    }

    fn recover_listening(&mut self, reason: &str) -> Result<()> {
        tracing::warn!(source = %self.source_name, "Listening unavailable: {reason}");

        if let Some(active) = self.active.take() {
            self.collect_monitor();
            active.buffer.discard();
            if let Err(e) = self.state.abort(active.id, TransitionReason::DeviceUnavailable) {
                tracing::debug!("Recording already ended: {e}");
            }
        }
        self.pipeline.stop();

        if !self.retried_device
            && let Some(factory) = self.fallback.as_mut()
        {
            self.retried_device = true;
            self.stats.device_retries += 1;
            match factory() {
                Ok(source) => {
                    let name = source.name().to_string();
                    let emitter = self.shared_emitter();
                    match self.pipeline.start(source, emitter) {
                        Ok(()) => {
                            tracing::info!(source = %name, "Listening resumed on fallback device");
                            self.source_name = name;
                            return Ok(());
                        }
                        Err(e) => tracing::error!("Fallback device failed to start: {e}"),
                    }
                }
                Err(e) => tracing::error!("No fallback device: {e}"),
            }
        }

        self.disable_listening(TransitionReason::DeviceUnavailable);
        Err(WakescribeError::AudioDeviceDisconnected {
            device: self.source_name.clone(),
        })
    }

    /// Stop everything and return the sink's accumulated text.
    pub fn shutdown(&mut self) -> Option<String> {
        if let Some(active) = self.active.take() {
            self.collect_monitor();
            active.buffer.discard();
            let _aborted = self.state.abort(active.id, TransitionReason::ExternalStop);
        }
        self.pipeline.stop();
        self.disable_listening(TransitionReason::ListeningDisabled);
        tracing::debug!(stats = ?self.stats, "Session finished");
        self.sink.finish()
    }
}
