//! Audio capture, buffering and voice activity detection.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod recorder;
pub mod resample;
pub mod sample_buffer;
pub mod vad;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::CpalAudioSource;
pub use recorder::{AudioSource, MockAudioSource};
pub use sample_buffer::{RecordingBuffer, SampleBuffer};
pub use vad::{AutoLevel, Clock, EnergyVad, MockClock, SystemClock};
pub use wav::WavAudioSource;
