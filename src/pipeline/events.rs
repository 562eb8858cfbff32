//! Signals the pipeline and coordinator send to the rest of the application.

use crate::defaults;
use crate::pipeline::state::RecordingId;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One pipeline signal. Emitted at most once per logical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The wake phrase was heard while listening.
    WakePhraseDetected {
        detection_id: u64,
        matched_text: String,
        confidence: f32,
    },
    /// A cancel phrase ended the recording; its audio is gone.
    RecordingCancelled {
        recording_id: RecordingId,
        phrase: String,
    },
    /// The capture device went away; listening has stopped.
    ListeningUnavailable { reason: String },
    /// The recording never contained speech; its audio is gone.
    SilenceTimeoutAbort { recording_id: RecordingId },
    /// Speech ended in silence; the audio is kept for transcription.
    SilenceStopKeep {
        recording_id: RecordingId,
        samples: usize,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::WakePhraseDetected { .. } => "wake_phrase_detected",
            PipelineEvent::RecordingCancelled { .. } => "recording_cancelled",
            PipelineEvent::ListeningUnavailable { .. } => "listening_unavailable",
            PipelineEvent::SilenceTimeoutAbort { .. } => "silence_timeout_abort",
            PipelineEvent::SilenceStopKeep { .. } => "silence_stop_keep",
        }
    }

    /// Recording this event belongs to, if any.
    pub fn recording_id(&self) -> Option<RecordingId> {
        match self {
            PipelineEvent::RecordingCancelled { recording_id, .. }
            | PipelineEvent::SilenceTimeoutAbort { recording_id }
            | PipelineEvent::SilenceStopKeep { recording_id, .. } => Some(*recording_id),
            PipelineEvent::WakePhraseDetected { .. } | PipelineEvent::ListeningUnavailable { .. } => {
                None
            }
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Receives pipeline signals. Called from worker threads; may block briefly.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

impl<E: EventEmitter + ?Sized> EventEmitter for Arc<E> {
    fn emit(&self, event: PipelineEvent) {
        (**self).emit(event)
    }
}

/// Forwards events into a bounded crossbeam channel.
///
/// Every event drives a state change on the receiving side (a disarmed wake
/// loop, a recording waiting in Processing), so a full channel is waited on
/// for up to `send_timeout` before the event is given up.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: Sender<PipelineEvent>,
    send_timeout: Duration,
}

impl ChannelEmitter {
    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self {
            tx,
            send_timeout: Duration::from_millis(defaults::EVENT_SEND_TIMEOUT_MS),
        }
    }

    /// Create an emitter together with the receiving end.
    pub fn bounded(capacity: usize) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self::new(tx), rx)
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: PipelineEvent) {
        match self.tx.send_timeout(event, self.send_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                tracing::error!(
                    event = event.name(),
                    recording = ?event.recording_id(),
                    "Event channel stayed full, event lost"
                );
            }
            Err(SendTimeoutError::Disconnected(event)) => {
                tracing::debug!(event = event.name(), "Event receiver gone, dropping event");
            }
        }
    }
}

/// Records every event it receives. Used in tests.
#[derive(Debug, Clone, Default)]
pub struct CollectingEmitter {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    /// Number of events with the given [`PipelineEvent::name`].
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventEmitter for CollectingEmitter {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().push(event);
    }
}
