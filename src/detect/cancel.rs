//! Cancel phrase detection during the first seconds of a recording.
//!
//! A session opens when a recording starts and stays open for a fixed
//! wall-clock window. While it is open the recording's audio is collected
//! and periodically transcribed; once it closes, analysis short-circuits.

use crate::audio::vad::{Clock, EnergyVad, SystemClock};
use crate::defaults;
use crate::detect::matcher::{MatchOutcome, PhraseMatcher};
use crate::error::DetectionError;
use crate::stt::transcriber::Transcriber;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for cancel phrase detection.
#[derive(Debug, Clone)]
pub struct CancelDetectorConfig {
    pub phrases: Vec<String>,
    pub rejections: Vec<String>,
    pub confidence_threshold: f32,
    pub window_ms: u32,
    /// New session audio required before analyzing again.
    pub min_new_audio_ms: u32,
    pub min_speech_frames: usize,
    pub speech_threshold: f32,
    /// Words allowed around the phrase before it counts as dictation.
    pub max_extra_words: usize,
    pub sample_rate: u32,
}

impl Default for CancelDetectorConfig {
    fn default() -> Self {
        Self {
            phrases: defaults::CANCEL_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rejections: defaults::CANCEL_REJECTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            confidence_threshold: defaults::CANCEL_CONFIDENCE_THRESHOLD,
            window_ms: defaults::CANCEL_WINDOW_MS,
            min_new_audio_ms: defaults::CANCEL_MIN_NEW_AUDIO_MS,
            min_speech_frames: defaults::CANCEL_MIN_SPEECH_FRAMES,
            speech_threshold: defaults::SPEECH_THRESHOLD,
            max_extra_words: defaults::CANCEL_MAX_EXTRA_WORDS,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

/// Verdict of one cancel analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelPhraseResult {
    /// A cancel phrase was spoken; the session has ended.
    Detected { phrase: String, confidence: f32 },
    /// Analyzed, nothing to act on.
    NotDetected,
    /// Not enough new audio since the last analysis.
    Pending,
    /// The session's window has closed without a cancel phrase.
    WindowExpired,
    /// No session is active.
    NoSession,
}

#[derive(Debug, Clone, Copy)]
struct CancelSession {
    started_at: Instant,
    /// Session audio length at the last analysis.
    analyzed_len: usize,
    expired: bool,
}

/// Session-scoped cancel phrase detector.
pub struct CancelPhraseDetector {
    transcriber: Arc<dyn Transcriber>,
    matcher: PhraseMatcher,
    vad: EnergyVad,
    config: CancelDetectorConfig,
    clock: Arc<dyn Clock>,
    session: Option<CancelSession>,
    /// Session audio. Reused across sessions, never grows past one window.
    samples: Vec<f32>,
    window_capacity: usize,
}

impl CancelPhraseDetector {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: CancelDetectorConfig) -> Self {
        Self::with_clock(transcriber, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transcriber: Arc<dyn Transcriber>,
        config: CancelDetectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let matcher = PhraseMatcher::new(&config.phrases, config.confidence_threshold)
            .with_rejections(&config.rejections)
            .with_max_extra_words(config.max_extra_words);
        let window_capacity = defaults::ms_to_samples(config.window_ms, config.sample_rate);
        Self {
            transcriber,
            matcher,
            vad: EnergyVad::new(config.speech_threshold),
            clock,
            session: None,
            samples: Vec::with_capacity(window_capacity),
            window_capacity,
            config,
        }
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms as u64)
    }

    /// Open a new window, superseding any previous session.
    pub fn start_session(&mut self) {
        if self.session.is_some() {
            tracing::debug!("Cancel session superseded by a new recording");
        }
        self.samples.clear();
        self.session = Some(CancelSession {
            started_at: self.clock.now(),
            analyzed_len: 0,
            expired: false,
        });
    }

    /// Close the session and drop its audio. No-op without a session.
    pub fn end_session(&mut self) {
        self.session = None;
        self.samples.clear();
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// True while a session exists and its window has not elapsed.
    pub fn is_window_open(&self) -> bool {
        self.session.is_some_and(|session| {
            !session.expired
                && self.clock.now().saturating_duration_since(session.started_at) < self.window()
        })
    }

    /// Time left in the window, zero without an open session.
    pub fn remaining(&self) -> Duration {
        match self.session {
            Some(session) if !session.expired => self
                .window()
                .saturating_sub(self.clock.now().saturating_duration_since(session.started_at)),
            _ => Duration::ZERO,
        }
    }

    /// Collect recording audio. Ignored unless the window is open.
    pub fn push_samples(&mut self, chunk: &[f32]) {
        if !self.is_window_open() {
            return;
        }
        let room = self.window_capacity.saturating_sub(self.samples.len());
        let take = room.min(chunk.len());
        self.samples.extend_from_slice(&chunk[..take]);
    }

    /// Session audio collected so far.
    pub fn buffered_samples(&self) -> usize {
        self.samples.len()
    }

    /// Analyze the session audio for a cancel phrase.
    ///
    /// On detection the session ends and its audio is dropped; the caller
    /// is expected to discard the recording as well. The first call after
    /// the window closes still analyzes audio collected inside the window
    /// that no earlier call looked at; later calls only report expiry.
    pub fn analyze_and_abort(&mut self) -> Result<CancelPhraseResult, DetectionError> {
        let Some(mut session) = self.session else {
            return Ok(CancelPhraseResult::NoSession);
        };
        if session.expired {
            return Ok(CancelPhraseResult::WindowExpired);
        }

        if !self.is_window_open() {
            tracing::trace!("Cancel window closed");
            session.expired = true;
            self.session = Some(session);
            let verdict = if self.samples.len() > session.analyzed_len {
                self.analyze_collected()
            } else {
                Ok(CancelPhraseResult::NotDetected)
            };
            self.samples.clear();
            return match verdict? {
                detected @ CancelPhraseResult::Detected { .. } => Ok(detected),
                _ => Ok(CancelPhraseResult::WindowExpired),
            };
        }

        let min_new = defaults::ms_to_samples(self.config.min_new_audio_ms, self.config.sample_rate);
        if self.samples.len() < session.analyzed_len + min_new.max(1) {
            return Ok(CancelPhraseResult::Pending);
        }
        session.analyzed_len = self.samples.len();
        self.session = Some(session);

        self.analyze_collected()
    }

    fn analyze_collected(&mut self) -> Result<CancelPhraseResult, DetectionError> {
        if !self.vad.has_speech(&self.samples, self.config.min_speech_frames) {
            return Ok(CancelPhraseResult::NotDetected);
        }

        let transcription = self
            .transcriber
            .transcribe(&self.samples, self.config.sample_rate)?;

        match self.matcher.evaluate(&transcription) {
            MatchOutcome::Matched(found) => {
                tracing::info!(phrase = %found.phrase, confidence = found.confidence, "Cancel phrase detected");
                self.end_session();
                Ok(CancelPhraseResult::Detected {
                    phrase: found.phrase,
                    confidence: found.confidence,
                })
            }
            MatchOutcome::BelowThreshold(found) => {
                tracing::debug!(
                    text = %found.matched_text,
                    confidence = found.confidence,
                    "Cancel phrase heard below confidence threshold"
                );
                Ok(CancelPhraseResult::NotDetected)
            }
            MatchOutcome::Rejected { rejection, text } => {
                tracing::debug!(%text, %rejection, "Rejected cancel phrase near-miss");
                Ok(CancelPhraseResult::NotDetected)
            }
            MatchOutcome::NoMatch { .. } => Ok(CancelPhraseResult::NotDetected),
        }
    }
}
