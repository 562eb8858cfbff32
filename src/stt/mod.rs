//! Speech-to-text engines.

pub mod transcriber;
pub mod whisper;

pub use transcriber::{
    MockTranscriber, ScriptedTranscriber, Transcriber, TranscriberConfig, Transcription,
};
pub use whisper::WhisperTranscriber;
