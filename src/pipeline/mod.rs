//! Always-listening pipeline and recording state.
//!
//! Capture and wake analysis run in [`listening`], interrupt detection during
//! a recording in [`coordinator`]. Both report through [`events`] and change
//! state only through the [`state::StateAuthority`].

pub mod coordinator;
pub mod events;
pub mod listening;
pub mod sink;
pub mod state;
mod worker;

pub use coordinator::{CoordinatorConfig, InterruptDetectors, MonitorOutcome, RecordingCoordinator};
pub use events::{ChannelEmitter, CollectingEmitter, EventEmitter, PipelineEvent};
pub use listening::{ListeningConfig, ListeningPipeline};
pub use sink::{CollectorSink, StdoutSink, TextSink};
pub use state::{
    RecordingId, RecordingState, RecordingStateMachine, StateAuthority, Transition,
    TransitionReason,
};
