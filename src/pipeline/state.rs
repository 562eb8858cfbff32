//! Recording state machine.
//!
//! One [`StateAuthority`] owns the application's [`RecordingState`].
//! Detectors report verdicts; only the pipeline, the coordinator and the
//! controller call the transition methods here. Every transition that ends
//! a recording names the recording it means, so a late verdict for a
//! recording that already ended is refused instead of ending the next one.

use crate::error::StateError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Top-level state of the dictation app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    /// Not listening for the wake phrase.
    #[default]
    Idle,
    /// Always-listening: waiting for the wake phrase.
    Listening,
    /// Capturing a dictation.
    Recording,
    /// Transcribing a finished dictation.
    Processing,
}

impl RecordingState {
    pub fn description(&self) -> &'static str {
        match self {
            RecordingState::Idle => "Idle",
            RecordingState::Listening => "Listening for wake phrase",
            RecordingState::Recording => "Recording",
            RecordingState::Processing => "Transcribing",
        }
    }

    /// Whether the microphone is in use in this state.
    pub fn is_capturing_audio(&self) -> bool {
        matches!(self, RecordingState::Listening | RecordingState::Recording)
    }
}

/// Identifies one recording from wake to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordingId(pub u64);

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    ListeningEnabled,
    ListeningDisabled,
    WakePhrase,
    ManualStart,
    /// Cancel phrase spoken; audio discarded.
    Cancelled,
    /// Silence after speech; audio kept.
    AutoStopped,
    /// No speech at all; audio discarded.
    Aborted,
    /// Stopped from outside the coordinator (hotkey, shutdown).
    ExternalStop,
    TranscriptionComplete,
    DeviceUnavailable,
}

/// A transition that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RecordingState,
    pub to: RecordingState,
    pub reason: TransitionReason,
    pub recording: Option<RecordingId>,
}

fn is_valid_transition(from: RecordingState, to: RecordingState) -> bool {
    use RecordingState::*;
    matches!(
        (from, to),
        (Idle, Listening)
            | (Idle, Recording)
            | (Listening, Idle)
            | (Listening, Recording)
            | (Recording, Processing)
            | (Recording, Listening)
            | (Recording, Idle)
            | (Processing, Listening)
            | (Processing, Idle)
    )
}

/// The state machine proper. Not shared; see [`StateAuthority`].
#[derive(Debug)]
pub struct RecordingStateMachine {
    state: RecordingState,
    entered_at: Instant,
    recording: Option<RecordingId>,
    next_recording: u64,
    /// Where a recording returns to when it ends.
    resume_to: RecordingState,
    last_transition: Option<Transition>,
}

impl RecordingStateMachine {
    pub fn new() -> Self {
        Self {
            state: RecordingState::Idle,
            entered_at: Instant::now(),
            recording: None,
            next_recording: 1,
            resume_to: RecordingState::Idle,
            last_transition: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn current_recording(&self) -> Option<RecordingId> {
        self.recording
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        self.entered_at.elapsed()
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.last_transition
    }

    /// State a recording returns to when it is cancelled, aborted or completed.
    pub fn resume_state(&self) -> RecordingState {
        self.resume_to
    }

    /// Apply a validated transition.
    ///
    /// Entering `Recording` allocates a new [`RecordingId`]; leaving
    /// `Recording`/`Processing` for `Idle` or `Listening` clears it.
    pub fn transition_to(
        &mut self,
        to: RecordingState,
        reason: TransitionReason,
    ) -> Result<Transition, StateError> {
        let from = self.state;
        if !is_valid_transition(from, to) {
            return Err(StateError::InvalidTransition { from, to });
        }

        match to {
            RecordingState::Recording => {
                self.resume_to = from;
                self.recording = Some(RecordingId(self.next_recording));
                self.next_recording += 1;
            }
            RecordingState::Idle | RecordingState::Listening => {
                self.recording = None;
                self.resume_to = to;
            }
            RecordingState::Processing => {}
        }

        let transition = Transition {
            from,
            to,
            reason,
            recording: self.recording,
        };
        self.state = to;
        self.entered_at = Instant::now();
        self.last_transition = Some(transition);

        tracing::debug!(?from, ?to, ?reason, recording = ?transition.recording, "State transition");
        Ok(transition)
    }

    fn ensure_current(&self, id: RecordingId) -> Result<(), StateError> {
        if self.recording == Some(id) {
            Ok(())
        } else {
            Err(StateError::StaleRecording {
                expected: id,
                actual: self.recording,
            })
        }
    }

    /// Start a recording and return its id.
    pub fn begin_recording(&mut self, reason: TransitionReason) -> Result<RecordingId, StateError> {
        self.transition_to(RecordingState::Recording, reason)?;
        self.recording.ok_or(StateError::InvalidTransition {
            from: self.state,
            to: RecordingState::Recording,
        })
    }

    /// Recording -> Processing, keeping the audio.
    pub fn stop_recording(
        &mut self,
        id: RecordingId,
        reason: TransitionReason,
    ) -> Result<Transition, StateError> {
        self.ensure_current(id)?;
        if self.state != RecordingState::Recording {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: RecordingState::Processing,
            });
        }
        self.transition_to(RecordingState::Processing, reason)
    }

    /// Recording -> back where it came from, discarding the audio.
    pub fn abort(
        &mut self,
        id: RecordingId,
        reason: TransitionReason,
    ) -> Result<Transition, StateError> {
        self.ensure_current(id)?;
        let resume = self.resume_to;
        if self.state != RecordingState::Recording {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: resume,
            });
        }
        self.transition_to(resume, reason)
    }

    /// Processing -> back where the recording came from.
    pub fn complete(&mut self, id: RecordingId) -> Result<Transition, StateError> {
        self.ensure_current(id)?;
        let resume = self.resume_to;
        if self.state != RecordingState::Processing {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: resume,
            });
        }
        self.transition_to(resume, TransitionReason::TranscriptionComplete)
    }

    pub fn is_recording(&self, id: RecordingId) -> bool {
        self.state == RecordingState::Recording && self.recording == Some(id)
    }
}

impl Default for RecordingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the one state machine. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct StateAuthority {
    inner: Arc<Mutex<RecordingStateMachine>>,
}

impl StateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> RecordingState {
        self.inner.lock().state()
    }

    pub fn current_recording(&self) -> Option<RecordingId> {
        self.inner.lock().current_recording()
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.inner.lock().last_transition()
    }

    pub fn transition_to(
        &self,
        to: RecordingState,
        reason: TransitionReason,
    ) -> Result<Transition, StateError> {
        self.inner.lock().transition_to(to, reason)
    }

    pub fn begin_recording(&self, reason: TransitionReason) -> Result<RecordingId, StateError> {
        self.inner.lock().begin_recording(reason)
    }

    pub fn stop_recording(
        &self,
        id: RecordingId,
        reason: TransitionReason,
    ) -> Result<Transition, StateError> {
        self.inner.lock().stop_recording(id, reason)
    }

    pub fn abort(&self, id: RecordingId, reason: TransitionReason) -> Result<Transition, StateError> {
        self.inner.lock().abort(id, reason)
    }

    pub fn complete(&self, id: RecordingId) -> Result<Transition, StateError> {
        self.inner.lock().complete(id)
    }

    pub fn is_recording(&self, id: RecordingId) -> bool {
        self.inner.lock().is_recording(id)
    }

    pub fn resume_state(&self) -> RecordingState {
        self.inner.lock().resume_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn listening_machine() -> RecordingStateMachine {
        let mut machine = RecordingStateMachine::new();
        machine
            .transition_to(RecordingState::Listening, TransitionReason::ListeningEnabled)
            .unwrap();
        machine
    }

    #[test]
    fn test_starts_idle() {
        let machine = RecordingStateMachine::new();
        assert_eq!(machine.state(), RecordingState::Idle);
        assert_eq!(machine.current_recording(), None);
        assert!(machine.last_transition().is_none());
    }

    #[test]
    fn test_wake_keep_complete_cycle() {
        let mut machine = listening_machine();

        assert!(machine.state().is_capturing_audio());
        let id = machine.begin_recording(TransitionReason::WakePhrase).unwrap();
        assert_eq!(machine.state(), RecordingState::Recording);
        assert!(machine.is_recording(id));
        assert!(machine.time_in_state() < std::time::Duration::from_secs(5));

        let stop = machine
            .stop_recording(id, TransitionReason::AutoStopped)
            .unwrap();
        assert_eq!(stop.from, RecordingState::Recording);
        assert_eq!(stop.to, RecordingState::Processing);
        assert_eq!(stop.recording, Some(id));

        assert!(!machine.state().is_capturing_audio());

        machine.complete(id).unwrap();
        assert_eq!(machine.state(), RecordingState::Listening);
        assert_eq!(machine.current_recording(), None);
    }

    #[test]
    fn test_abort_returns_to_listening() {
        let mut machine = listening_machine();
        let id = machine.begin_recording(TransitionReason::WakePhrase).unwrap();
        let transition = machine.abort(id, TransitionReason::Cancelled).unwrap();
        assert_eq!(transition.to, RecordingState::Listening);
        assert_eq!(transition.reason, TransitionReason::Cancelled);
    }

    #[test]
    fn test_manual_recording_from_idle_returns_to_idle() {
        let mut machine = RecordingStateMachine::new();
        let id = machine.begin_recording(TransitionReason::ManualStart).unwrap();
        machine.abort(id, TransitionReason::Aborted).unwrap();
        assert_eq!(machine.state(), RecordingState::Idle);
    }

    #[test]
    fn test_recording_ids_are_unique() {
        let mut machine = listening_machine();
        let first = machine.begin_recording(TransitionReason::WakePhrase).unwrap();
        machine.abort(first, TransitionReason::Aborted).unwrap();
        let second = machine.begin_recording(TransitionReason::WakePhrase).unwrap();
        assert_ne!(first, second);
        assert_eq!(second.to_string(), "#2");
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut machine = RecordingStateMachine::new();
        assert_eq!(
            machine.transition_to(RecordingState::Processing, TransitionReason::AutoStopped),
            Err(StateError::InvalidTransition {
                from: RecordingState::Idle,
                to: RecordingState::Processing
            })
        );
        assert_eq!(machine.state(), RecordingState::Idle);

        let mut machine = listening_machine();
        assert!(
            machine
                .transition_to(RecordingState::Listening, TransitionReason::ListeningEnabled)
                .is_err()
        );
    }

    #[test]
    fn test_stale_recording_cannot_end_the_next_one() {
        let mut machine = listening_machine();
        let old = machine.begin_recording(TransitionReason::WakePhrase).unwrap();
        machine.abort(old, TransitionReason::Cancelled).unwrap();
        let current = machine.begin_recording(TransitionReason::WakePhrase).unwrap();

        assert_eq!(
            machine.stop_recording(old, TransitionReason::AutoStopped),
            Err(StateError::StaleRecording {
                expected: old,
                actual: Some(current)
            })
        );
        assert!(machine.is_recording(current));
    }

    #[test]
    fn test_stop_and_abort_race_only_one_wins() {
        let mut machine = listening_machine();
        let id = machine.begin_recording(TransitionReason::WakePhrase).unwrap();
        machine.stop_recording(id, TransitionReason::ExternalStop).unwrap();

        assert!(machine.abort(id, TransitionReason::Cancelled).is_err());
        assert_eq!(machine.state(), RecordingState::Processing);
    }

    #[test]
    fn test_complete_requires_processing() {
        let mut machine = listening_machine();
        let id = machine.begin_recording(TransitionReason::WakePhrase).unwrap();
        assert!(matches!(
            machine.complete(id),
            Err(StateError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_authority_is_shared_between_threads() {
        let authority = StateAuthority::new();
        authority
            .transition_to(RecordingState::Listening, TransitionReason::ListeningEnabled)
            .unwrap();
        let id = authority.begin_recording(TransitionReason::WakePhrase).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let authority = authority.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        authority.stop_recording(id, TransitionReason::AutoStopped).is_ok()
                    } else {
                        authority.abort(id, TransitionReason::Cancelled).is_ok()
                    }
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_ne!(authority.current(), RecordingState::Recording);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&RecordingState::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(serde_json::to_string(&RecordingId(7)).unwrap(), "7");
    }
}
