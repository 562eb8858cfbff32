//! Error types for wakescribe.

use crate::pipeline::state::{RecordingId, RecordingState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WakescribeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device disconnected: {device}")]
    AudioDeviceDisconnected { device: String },

    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("WAV decoding failed: {0}")]
    Wav(#[from] hound::Error),

    // Transcription errors
    #[error("Transcription model not found at {path}")]
    TranscriptionModelNotFound { path: String },

    #[error("Transcription inference failed: {message}")]
    TranscriptionInferenceFailed { message: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    // Pipeline lifecycle errors
    #[error("Listening pipeline is already running")]
    PipelineAlreadyRunning,

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl WakescribeError {
    /// Returns true if the error means the capture device is gone for good.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            WakescribeError::AudioDeviceDisconnected { .. }
                | WakescribeError::AudioDeviceNotFound { .. }
        )
    }
}

/// Non-fatal failure of a single detection cycle.
///
/// The caller logs it and tries again on the next cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("No audio to analyze")]
    EmptyBuffer,

    #[error("Transcription failed: {message}")]
    Transcription { message: String },
}

impl From<WakescribeError> for DetectionError {
    fn from(error: WakescribeError) -> Self {
        DetectionError::Transcription {
            message: error.to_string(),
        }
    }
}

/// A state transition that the state authority refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: RecordingState,
        to: RecordingState,
    },

    #[error("Recording {expected} is no longer active (current: {actual:?})")]
    StaleRecording {
        expected: RecordingId,
        actual: Option<RecordingId>,
    },
}

/// Misuse of the recording coordinator's session API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("A recording is already being monitored")]
    AlreadyMonitoring,

    #[error("No recording is being monitored")]
    NotMonitoring,
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, WakescribeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = WakescribeError::ConfigInvalidValue {
            key: "wake.confidence_threshold".to_string(),
            message: "must be between 0.0 and 1.0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for wake.confidence_threshold: must be between 0.0 and 1.0"
        );
    }

    #[test]
    fn test_audio_device_disconnected_display() {
        let error = WakescribeError::AudioDeviceDisconnected {
            device: "USB Headset".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device disconnected: USB Headset");
    }

    #[test]
    fn test_device_unavailable_classification() {
        assert!(
            WakescribeError::AudioDeviceDisconnected {
                device: "mic".to_string()
            }
            .is_device_unavailable()
        );
        assert!(
            WakescribeError::AudioDeviceNotFound {
                device: "mic".to_string()
            }
            .is_device_unavailable()
        );
        assert!(
            !WakescribeError::AudioCapture {
                message: "overrun".to_string()
            }
            .is_device_unavailable()
        );
    }

    #[test]
    fn test_detection_error_from_transcription_failure() {
        let error: DetectionError = WakescribeError::TranscriptionInferenceFailed {
            message: "out of memory".to_string(),
        }
        .into();
        assert_eq!(
            error,
            DetectionError::Transcription {
                message: "Transcription inference failed: out of memory".to_string()
            }
        );
    }

    #[test]
    fn test_state_error_display() {
        let error = StateError::InvalidTransition {
            from: RecordingState::Idle,
            to: RecordingState::Processing,
        };
        assert_eq!(
            error.to_string(),
            "Invalid transition from Idle to Processing"
        );

        let stale = StateError::StaleRecording {
            expected: RecordingId(3),
            actual: Some(RecordingId(4)),
        };
        assert!(stale.to_string().contains("Recording #3"));
    }

    #[test]
    fn test_coordinator_error_wraps_transparently() {
        let error: WakescribeError = CoordinatorError::AlreadyMonitoring.into();
        assert_eq!(error.to_string(), "A recording is already being monitored");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: WakescribeError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: WakescribeError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<WakescribeError>();
        assert_sync::<WakescribeError>();
        assert_send::<DetectionError>();
        assert_send::<StateError>();
    }
}
