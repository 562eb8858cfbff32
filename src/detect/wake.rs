//! Wake phrase detection over a rolling window of listening audio.

use crate::audio::vad::EnergyVad;
use crate::defaults;
use crate::detect::matcher::{MatchOutcome, PhraseMatcher};
use crate::error::DetectionError;
use crate::stt::transcriber::Transcriber;
use std::sync::Arc;

/// Configuration for wake phrase detection.
#[derive(Debug, Clone)]
pub struct WakeDetectorConfig {
    pub phrase: String,
    pub rejections: Vec<String>,
    pub confidence_threshold: f32,
    /// Speech frames a window needs before it is transcribed at all.
    pub min_speech_frames: usize,
    pub speech_threshold: f32,
    pub sample_rate: u32,
}

impl Default for WakeDetectorConfig {
    fn default() -> Self {
        Self {
            phrase: defaults::WAKE_PHRASE.to_string(),
            rejections: defaults::WAKE_REJECTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            confidence_threshold: defaults::WAKE_CONFIDENCE_THRESHOLD,
            min_speech_frames: defaults::WAKE_MIN_SPEECH_FRAMES,
            speech_threshold: defaults::SPEECH_THRESHOLD,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

/// Outcome of one wake analysis cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct WakePhraseResult {
    pub detected: bool,
    pub confidence: f32,
    /// Normalized transcript of the window (empty if nothing was transcribed).
    pub matched_text: String,
}

impl WakePhraseResult {
    fn not_detected() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            matched_text: String::new(),
        }
    }
}

/// Transcribes a window of audio and checks it for the wake phrase.
pub struct WakePhraseDetector {
    transcriber: Arc<dyn Transcriber>,
    matcher: PhraseMatcher,
    vad: EnergyVad,
    min_speech_frames: usize,
    sample_rate: u32,
}

impl WakePhraseDetector {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: WakeDetectorConfig) -> Self {
        let matcher = PhraseMatcher::new(&[config.phrase.as_str()], config.confidence_threshold)
            .with_rejections(&config.rejections);
        Self {
            transcriber,
            matcher,
            vad: EnergyVad::new(config.speech_threshold),
            min_speech_frames: config.min_speech_frames,
            sample_rate: config.sample_rate,
        }
    }

    /// Analyze one detection window.
    ///
    /// Windows without enough speech energy are not transcribed. Errors are
    /// per-cycle: the caller logs them and tries again on the next window.
    pub fn analyze(&self, window: &[f32]) -> Result<WakePhraseResult, DetectionError> {
        if window.is_empty() {
            return Err(DetectionError::EmptyBuffer);
        }

        if !self.vad.has_speech(window, self.min_speech_frames) {
            tracing::trace!(samples = window.len(), "Wake window has no speech, skipping");
            return Ok(WakePhraseResult::not_detected());
        }

        let transcription = self.transcriber.transcribe(window, self.sample_rate)?;

        let result = match self.matcher.evaluate(&transcription) {
            MatchOutcome::Matched(found) => WakePhraseResult {
                detected: true,
                confidence: found.confidence,
                matched_text: found.matched_text,
            },
            MatchOutcome::BelowThreshold(found) => {
                tracing::debug!(
                    text = %found.matched_text,
                    confidence = found.confidence,
                    threshold = self.matcher.confidence_threshold(),
                    "Wake phrase heard below confidence threshold"
                );
                WakePhraseResult {
                    detected: false,
                    confidence: found.confidence,
                    matched_text: found.matched_text,
                }
            }
            MatchOutcome::Rejected { rejection, text } => {
                tracing::debug!(%text, %rejection, "Rejected wake phrase near-miss");
                WakePhraseResult {
                    detected: false,
                    confidence: transcription.confidence,
                    matched_text: text,
                }
            }
            MatchOutcome::NoMatch { text } => WakePhraseResult {
                detected: false,
                confidence: transcription.confidence,
                matched_text: text,
            },
        };

        Ok(result)
    }
}
