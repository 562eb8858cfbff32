use crate::defaults;
use crate::error::{Result, WakescribeError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device, WAV replay, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio and release the underlying device.
    fn stop(&mut self) -> Result<()>;

    /// Read the samples captured since the previous call.
    ///
    /// Samples are mono f32 in `[-1.0, 1.0]` at [`AudioSource::sample_rate`].
    /// An empty vector means nothing new arrived yet. A disconnected device
    /// reports [`WakescribeError::AudioDeviceDisconnected`].
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Sample rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32 {
        defaults::SAMPLE_RATE
    }

    /// True for sources that end (files) rather than run until stopped.
    fn is_finite(&self) -> bool {
        false
    }

    /// True once a finite source has delivered all of its audio.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Human-readable name for logs and "unavailable" notices.
    fn name(&self) -> &str {
        "audio source"
    }
}

/// Mock audio source for testing.
///
/// Every read returns the configured chunk, so a capture loop polling it
/// produces an endless stream of identical audio.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    samples: Vec<f32>,
    should_fail_start: bool,
    should_fail_read: bool,
    disconnect_after: Option<usize>,
    max_reads: Option<usize>,
    error_message: String,
    started: Arc<AtomicBool>,
    stop_calls: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MockAudioSource {
    /// Create a mock that yields 100ms of silence per read.
    pub fn new() -> Self {
        Self {
            samples: vec![0.0; 1600],
            should_fail_start: false,
            should_fail_read: false,
            disconnect_after: None,
            max_reads: None,
            error_message: "mock audio error".to_string(),
            started: Arc::new(AtomicBool::new(false)),
            stop_calls: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the chunk returned by each read.
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail every read with a capture error.
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Simulate the device being unplugged after `reads` successful reads.
    pub fn with_disconnect_after(mut self, reads: usize) -> Self {
        self.disconnect_after = Some(reads);
        self
    }

    /// Make the source finite: after `reads` reads it returns empty chunks.
    pub fn with_max_reads(mut self, reads: usize) -> Self {
        self.max_reads = Some(reads);
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started. Shared between clones.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of times `stop` was called. Shared between clones.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Number of reads served so far. Shared between clones.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(WakescribeError::AudioDeviceNotFound {
                device: self.error_message.clone(),
            });
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let count = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_read {
            return Err(WakescribeError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if let Some(limit) = self.disconnect_after
            && count >= limit
        {
            return Err(WakescribeError::AudioDeviceDisconnected {
                device: "mock".to_string(),
            });
        }
        if let Some(limit) = self.max_reads
            && count >= limit
        {
            return Ok(Vec::new());
        }
        Ok(self.samples.clone())
    }

    fn is_finite(&self) -> bool {
        self.max_reads.is_some()
    }

    fn is_exhausted(&self) -> bool {
        self.max_reads
            .is_some_and(|limit| self.reads.load(Ordering::SeqCst) >= limit)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_audio_source_returns_configured_samples() {
        let mut source = MockAudioSource::new().with_samples(vec![0.1, 0.2, 0.3]);
        assert_eq!(source.read_samples().unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(source.read_samples().unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(source.read_count(), 2);
    }

    #[test]
    fn test_mock_audio_source_default_is_100ms_of_silence() {
        let mut source = MockAudioSource::new();
        let samples = source.read_samples().unwrap();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mock_audio_source_start_stop_state_is_shared_between_clones() {
        let mut source = MockAudioSource::new();
        let observer = source.clone();

        source.start().unwrap();
        assert!(observer.is_started());

        source.stop().unwrap();
        assert!(!observer.is_started());
        assert_eq!(observer.stop_calls(), 1);
    }

    #[test]
    fn test_mock_audio_source_start_failure() {
        let mut source = MockAudioSource::new()
            .with_start_failure()
            .with_error_message("USB Mic");

        match source.start() {
            Err(WakescribeError::AudioDeviceNotFound { device }) => assert_eq!(device, "USB Mic"),
            other => panic!("Expected AudioDeviceNotFound, got {:?}", other),
        }
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_audio_source_read_failure() {
        let mut source = MockAudioSource::new().with_read_failure();
        match source.read_samples() {
            Err(WakescribeError::AudioCapture { message }) => {
                assert_eq!(message, "mock audio error")
            }
            other => panic!("Expected AudioCapture error, got {:?}", other),
        }
    }

    #[test]
    fn test_mock_audio_source_disconnects_after_limit() {
        let mut source = MockAudioSource::new().with_disconnect_after(2);
        assert!(source.read_samples().is_ok());
        assert!(source.read_samples().is_ok());
        let err = source.read_samples().unwrap_err();
        assert!(err.is_device_unavailable());
    }

    #[test]
    fn test_mock_audio_source_finite_source_runs_dry() {
        let mut source = MockAudioSource::new().with_max_reads(1);
        assert!(source.is_finite());
        assert_eq!(source.read_samples().unwrap().len(), 1600);
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_audio_source_trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_samples(vec![0.5; 4]));
        assert!(source.start().is_ok());
        assert_eq!(source.read_samples().unwrap().len(), 4);
        assert_eq!(source.sample_rate(), 16000);
        assert!(!source.is_finite());
        assert!(source.stop().is_ok());
    }
}
