//! Default configuration constants for wakescribe.
//!
//! This module provides shared constants used across the detectors, the
//! pipeline and the configuration file so they never drift apart.

/// Default audio sample rate in Hz.
///
/// 16kHz is what the transcription model expects; every buffer and timer in
/// the pipeline is expressed in samples at this rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Length of one VAD frame in samples (32ms at 16kHz).
pub const VAD_FRAME_SAMPLES: usize = 512;

/// RMS level above which a frame counts as speech.
pub const SPEECH_THRESHOLD: f32 = 0.02;

// Wake phrase detection

/// Phrase that moves the app from Listening to Recording.
pub const WAKE_PHRASE: &str = "hey cat";

/// Phrases that sound like the wake phrase but must never trigger it.
pub const WAKE_REJECTIONS: &[&str] = &["hey matt", "hey mat", "pay cat", "hey"];

/// Minimum transcription confidence for a wake detection.
pub const WAKE_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// Amount of recent audio analyzed per wake cycle (milliseconds).
pub const WAKE_WINDOW_MS: u32 = 2000;

/// How often the analysis thread wakes up to check the buffer (milliseconds).
pub const ANALYSIS_INTERVAL_MS: u64 = 150;

/// New audio required before the wake window is analyzed again (milliseconds).
///
/// Half the wake window: every sample is transcribed at most twice, and a
/// phrase split across one window boundary is still whole in the next.
pub const WAKE_MIN_NEW_AUDIO_MS: u32 = 1000;

/// Buffered audio required before the first wake analysis (milliseconds).
pub const MIN_AUDIO_FOR_ANALYSIS_MS: u32 = 250;

/// Speech frames a wake window needs before it is worth transcribing.
pub const WAKE_MIN_SPEECH_FRAMES: usize = 4;

/// Capacity of the listening ring buffer (milliseconds of audio).
pub const LISTENING_BUFFER_MS: u32 = 4000;

// Silence detection

/// Silence after speech that ends a recording and keeps it (milliseconds).
pub const SILENCE_DURATION_MS: u32 = 2000;

/// Time without any speech after which a recording is a false activation (milliseconds).
pub const NO_SPEECH_TIMEOUT_MS: u32 = 5000;

/// Consecutive speech frames needed before the silence detector believes speech started.
pub const SILENCE_MIN_SPEECH_FRAMES: usize = 2;

// Cancel phrase detection

/// Phrases that abort a recording when spoken early enough.
pub const CANCEL_PHRASES: &[&str] = &["cancel", "nevermind", "never mind", "nvm"];

/// Phrases that sound like a cancel phrase but must never abort a recording.
pub const CANCEL_REJECTIONS: &[&str] = &["can't sell", "can sell"];

/// Minimum transcription confidence for a cancel detection.
///
/// Higher than the wake threshold: a false abort throws away the user's words.
pub const CANCEL_CONFIDENCE_THRESHOLD: f32 = 0.9;

/// How long after recording starts a cancel phrase is honoured (milliseconds).
pub const CANCEL_WINDOW_MS: u32 = 3000;

/// New audio required before the cancel session is analyzed again (milliseconds).
pub const CANCEL_MIN_NEW_AUDIO_MS: u32 = 500;

/// Speech frames a cancel session needs before it is worth transcribing.
pub const CANCEL_MIN_SPEECH_FRAMES: usize = 2;

/// Words allowed around a cancel phrase ("uh cancel", "cancel cancel").
pub const CANCEL_MAX_EXTRA_WORDS: usize = 2;

// Recording coordination

/// Poll interval of the capture thread (milliseconds, ~60Hz).
pub const CAPTURE_POLL_INTERVAL_MS: u64 = 16;

/// Capture read failures in a row after which the device is given up on.
pub const MAX_CONSECUTIVE_CAPTURE_ERRORS: u32 = 10;

/// Poll interval of the recording coordinator (milliseconds).
pub const DETECTION_INTERVAL_MS: u64 = 100;

/// Upper bound on waiting for a worker thread during shutdown (milliseconds).
pub const STOP_TIMEOUT_MS: u64 = 2000;

/// Capacity of the pipeline event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// How long an emitter waits for room in a full event channel (milliseconds).
pub const EVENT_SEND_TIMEOUT_MS: u64 = 1000;

/// Whisper model file looked up in the data directory when none is configured.
pub const DEFAULT_MODEL_FILE: &str = "ggml-base.en.bin";

/// Default transcription language.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Convert a duration in milliseconds to a sample count at `sample_rate`.
pub const fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

/// Convert a sample count at `sample_rate` to milliseconds.
pub const fn samples_to_ms(samples: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples as u64 * 1000 / sample_rate as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vad_frame_is_32ms_at_default_rate() {
        assert_eq!(ms_to_samples(32, SAMPLE_RATE), VAD_FRAME_SAMPLES);
    }

    #[test]
    fn sample_conversions_round_trip_whole_milliseconds() {
        assert_eq!(ms_to_samples(2000, 16000), 32000);
        assert_eq!(samples_to_ms(32000, 16000), 2000);
        assert_eq!(samples_to_ms(100, 0), 0);
    }

    #[test]
    fn cancel_is_stricter_than_wake() {
        assert!(CANCEL_CONFIDENCE_THRESHOLD > WAKE_CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn wake_windows_overlap_at_most_twice() {
        assert!(WAKE_MIN_NEW_AUDIO_MS < WAKE_WINDOW_MS);
        assert!(WAKE_MIN_NEW_AUDIO_MS * 2 >= WAKE_WINDOW_MS);
        assert!(LISTENING_BUFFER_MS >= WAKE_WINDOW_MS);
    }

    #[test]
    fn blocked_emitters_release_before_stop_deadline() {
        assert!(EVENT_SEND_TIMEOUT_MS < STOP_TIMEOUT_MS);
    }

    #[test]
    fn timeout_outlasts_post_speech_silence() {
        assert!(NO_SPEECH_TIMEOUT_MS > SILENCE_DURATION_MS);
    }
}
