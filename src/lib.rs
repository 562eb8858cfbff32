//! wakescribe - Always-listening voice dictation
//!
//! Waits for a wake phrase, records until the speaker falls silent or says a
//! cancel phrase, and transcribes only the recordings that are kept.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod controller;
pub mod defaults;
pub mod detect;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod stt;

// Composition root - needs the microphone and the CLI
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Core traits (source → detect → sink)
pub use audio::recorder::AudioSource;
pub use pipeline::sink::{CollectorSink, StdoutSink, TextSink};
pub use stt::transcriber::Transcriber;

// Detectors
pub use detect::{CancelPhraseDetector, SilenceDetector, WakePhraseDetector};

// Pipeline and state
pub use controller::{ControllerConfig, DictationController, Transcribers};
pub use pipeline::{
    ListeningPipeline, PipelineEvent, RecordingCoordinator, RecordingState, StateAuthority,
};

// Error handling
pub use error::{Result, WakescribeError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
