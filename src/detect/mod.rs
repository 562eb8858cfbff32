//! Detectors that turn audio into verdicts: wake phrase, cancel phrase, silence.
//!
//! Detectors never change application state themselves; the listening
//! pipeline and recording coordinator act on what they report.

pub mod cancel;
pub mod matcher;
pub mod silence;
pub mod wake;

pub use cancel::{CancelDetectorConfig, CancelPhraseDetector, CancelPhraseResult};
pub use matcher::{MatchOutcome, PhraseMatch, PhraseMatcher};
pub use silence::{SilenceConfig, SilenceDetectionResult, SilenceDetector, StopReason};
pub use wake::{WakeDetectorConfig, WakePhraseDetector, WakePhraseResult};
