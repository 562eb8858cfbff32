//! Silence-based end of recording.
//!
//! Two timers run over the recording's audio: time since the last speech
//! frame (once speech was confirmed) and total time while no speech has been
//! confirmed. They lead to opposite outcomes for the captured audio, see
//! [`StopReason`]. Timers count samples, not wall-clock time, so results do
//! not depend on how promptly the coordinator polls.

use crate::audio::vad::{AutoLevel, calculate_rms};
use crate::defaults;

/// Configuration for silence detection.
#[derive(Debug, Clone, Copy)]
pub struct SilenceConfig {
    /// RMS level above which a frame counts as speech.
    pub speech_threshold: f32,
    /// Silence after speech that ends the recording (milliseconds).
    pub silence_duration_ms: u32,
    /// Time without any speech after which the recording is dropped (milliseconds).
    pub no_speech_timeout_ms: u32,
    /// Consecutive speech frames needed to believe speech started.
    pub min_speech_frames: usize,
    /// Raise the threshold above the measured room noise.
    pub adaptive_threshold: bool,
    pub sample_rate: u32,
    pub frame_samples: usize,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::SPEECH_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            no_speech_timeout_ms: defaults::NO_SPEECH_TIMEOUT_MS,
            min_speech_frames: defaults::SILENCE_MIN_SPEECH_FRAMES,
            adaptive_threshold: false,
            sample_rate: defaults::SAMPLE_RATE,
            frame_samples: defaults::VAD_FRAME_SAMPLES,
        }
    }
}

/// Why a recording should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user spoke and then went quiet: keep the audio and transcribe it.
    SilenceAfterSpeech,
    /// Nobody spoke at all: a false activation, discard the audio.
    NoSpeechTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceDetectionResult {
    Continue,
    Stop(StopReason),
}

/// Per-recording speech/silence tracker.
///
/// Reused across recordings; call [`SilenceDetector::reset`] when one begins.
#[derive(Debug)]
pub struct SilenceDetector {
    config: SilenceConfig,
    /// Samples of an incomplete frame carried over to the next chunk.
    pending: Vec<f32>,
    consecutive_speech_frames: usize,
    speech_confirmed: bool,
    samples_since_speech: u64,
    samples_total: u64,
    auto_level: Option<AutoLevel>,
    last_level: f32,
    verdict: SilenceDetectionResult,
}

impl SilenceDetector {
    pub fn new(config: SilenceConfig) -> Self {
        let frame_samples = config.frame_samples.max(1);
        Self {
            config: SilenceConfig {
                frame_samples,
                ..config
            },
            pending: Vec::with_capacity(frame_samples),
            consecutive_speech_frames: 0,
            speech_confirmed: false,
            samples_since_speech: 0,
            samples_total: 0,
            auto_level: config
                .adaptive_threshold
                .then(|| AutoLevel::new(config.speech_threshold)),
            last_level: 0.0,
            verdict: SilenceDetectionResult::Continue,
        }
    }

    /// Forget everything about the previous recording. Keeps allocations.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.consecutive_speech_frames = 0;
        self.speech_confirmed = false;
        self.samples_since_speech = 0;
        self.samples_total = 0;
        self.last_level = 0.0;
        self.verdict = SilenceDetectionResult::Continue;
        if self.config.adaptive_threshold {
            self.auto_level = Some(AutoLevel::new(self.config.speech_threshold));
        }
    }

    /// Feed the next chunk of recorded audio.
    ///
    /// Once a stop verdict is reached it is repeated until `reset`.
    pub fn process_samples(&mut self, chunk: &[f32]) -> SilenceDetectionResult {
        if self.verdict != SilenceDetectionResult::Continue {
            return self.verdict;
        }

        let frame_samples = self.config.frame_samples;
        let mut rest = chunk;

        if !self.pending.is_empty() {
            let needed = frame_samples - self.pending.len();
            let take = needed.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() < frame_samples {
                return self.verdict;
            }
            let frame = std::mem::take(&mut self.pending);
            self.process_frame(&frame);
            self.pending = frame;
            self.pending.clear();
            if self.verdict != SilenceDetectionResult::Continue {
                return self.verdict;
            }
        }

        let mut frames = rest.chunks_exact(frame_samples);
        for frame in frames.by_ref() {
            self.process_frame(frame);
            if self.verdict != SilenceDetectionResult::Continue {
                return self.verdict;
            }
        }
        self.pending.extend_from_slice(frames.remainder());

        self.verdict
    }

    fn process_frame(&mut self, frame: &[f32]) {
        let level = calculate_rms(frame);
        let threshold = self.current_threshold();
        let is_speech = level > threshold;
        if let Some(auto_level) = self.auto_level.as_mut() {
            auto_level.update(level, is_speech);
        }
        self.last_level = level;

        let frame_len = frame.len() as u64;
        self.samples_total += frame_len;

        if is_speech {
            self.consecutive_speech_frames += 1;
            self.samples_since_speech = 0;
            if !self.speech_confirmed
                && self.consecutive_speech_frames >= self.config.min_speech_frames
            {
                tracing::debug!(
                    after_ms = defaults::samples_to_ms(self.samples_total as usize, self.config.sample_rate),
                    "Speech started"
                );
                self.speech_confirmed = true;
            }
        } else {
            self.consecutive_speech_frames = 0;
            self.samples_since_speech += frame_len;
        }

        let silence_limit =
            defaults::ms_to_samples(self.config.silence_duration_ms, self.config.sample_rate) as u64;
        let timeout_limit =
            defaults::ms_to_samples(self.config.no_speech_timeout_ms, self.config.sample_rate) as u64;

        if self.speech_confirmed && self.samples_since_speech >= silence_limit {
            self.verdict = SilenceDetectionResult::Stop(StopReason::SilenceAfterSpeech);
        } else if !self.speech_confirmed && self.samples_total >= timeout_limit {
            self.verdict = SilenceDetectionResult::Stop(StopReason::NoSpeechTimeout);
        }
    }

    /// True once speech has been confirmed in this recording.
    pub fn speech_detected(&self) -> bool {
        self.speech_confirmed
    }

    /// Milliseconds since the last speech frame.
    pub fn silence_ms(&self) -> u64 {
        defaults::samples_to_ms(self.samples_since_speech as usize, self.config.sample_rate)
    }

    /// Milliseconds of audio processed in this recording.
    pub fn elapsed_ms(&self) -> u64 {
        defaults::samples_to_ms(self.samples_total as usize, self.config.sample_rate)
    }

    /// Threshold used for the next frame.
    pub fn current_threshold(&self) -> f32 {
        self.auto_level
            .as_ref()
            .map_or(self.config.speech_threshold, AutoLevel::threshold)
    }

    pub fn last_level(&self) -> f32 {
        self.last_level
    }

    pub fn config(&self) -> &SilenceConfig {
        &self.config
    }
}
