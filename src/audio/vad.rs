//! Voice Activity Detection (VAD) primitives.
//!
//! Energy-based speech classification of fixed-size frames, an adaptive
//! noise-floor tracker, and the clock abstraction used for wall-clock timers.

use crate::defaults;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Mock clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Creates a new mock clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Advances the mock clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// Returns 0.0 for silence (or no samples), ~0.707 for a full-scale sine
/// wave and 1.0 for a constant full-scale signal.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let s = sample as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Frame-level energy classifier.
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
    frame_samples: usize,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            frame_samples: defaults::VAD_FRAME_SAMPLES,
        }
    }

    pub fn with_frame_samples(mut self, frame_samples: usize) -> Self {
        self.frame_samples = frame_samples.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// True if the frame's RMS is above the speech threshold.
    pub fn is_speech(&self, frame: &[f32]) -> bool {
        calculate_rms(frame) > self.threshold
    }

    /// Number of complete frames in `samples` classified as speech.
    ///
    /// A trailing partial frame is ignored.
    pub fn count_speech_frames(&self, samples: &[f32]) -> usize {
        samples
            .chunks_exact(self.frame_samples)
            .filter(|frame| self.is_speech(frame))
            .count()
    }

    /// True once `min_frames` speech frames are found. Stops scanning early.
    pub fn has_speech(&self, samples: &[f32], min_frames: usize) -> bool {
        if min_frames == 0 {
            return true;
        }
        samples
            .chunks_exact(self.frame_samples)
            .filter(|frame| self.is_speech(frame))
            .nth(min_frames - 1)
            .is_some()
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(defaults::SPEECH_THRESHOLD)
    }
}

/// Tracks the ambient noise floor and derives a speech threshold from it.
///
/// The floor only learns from non-speech frames, faster for the first
/// hundred frames, and the threshold never drops below the configured minimum.
#[derive(Debug, Clone)]
pub struct AutoLevel {
    ambient_level: f32,
    smoothing: f32,
    min_threshold: f32,
    threshold_multiplier: f32,
    frame_count: u64,
}

impl AutoLevel {
    pub fn new(min_threshold: f32) -> Self {
        Self {
            ambient_level: 0.01,
            smoothing: 0.95,
            min_threshold,
            threshold_multiplier: 2.5,
            frame_count: 0,
        }
    }

    /// Feed one frame's level and return the threshold to use for the next frame.
    pub fn update(&mut self, level: f32, is_speech: bool) -> f32 {
        self.frame_count += 1;

        // Skip the first frames; they often contain device start-up clicks.
        if !is_speech && self.frame_count > 10 {
            let alpha = if self.frame_count < 100 {
                0.1
            } else {
                1.0 - self.smoothing
            };
            self.ambient_level = self.ambient_level * (1.0 - alpha) + level * alpha;
        }

        self.threshold()
    }

    pub fn threshold(&self) -> f32 {
        (self.ambient_level * self.threshold_multiplier).max(self.min_threshold)
    }

    pub fn ambient(&self) -> f32 {
        self.ambient_level
    }
}
