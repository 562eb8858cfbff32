use crate::defaults;
use crate::error::{Result, WakescribeError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Text recognized in a block of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// Engine confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

impl Transcription {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (real Whisper vs mock).
pub trait Transcriber: Send + Sync {
    /// Transcribe mono f32 samples recorded at `sample_rate`.
    fn transcribe(&self, audio: &[f32], sample_rate: u32) -> Result<Transcription>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing one model between detectors.
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[f32], sample_rate: u32) -> Result<Transcription> {
        (**self).transcribe(audio, sample_rate)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Configuration for transcriber initialization
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub model_path: PathBuf,
    pub language: String,
    /// Number of threads for inference (None = engine default)
    pub threads: Option<usize>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(""),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
        }
    }
}

/// Mock transcriber for testing.
///
/// Clones share the call counter.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    confidence: f32,
    should_fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            confidence: 1.0,
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the confidence reported with the response
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of transcribe calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, _audio: &[f32], _sample_rate: u32) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            Err(WakescribeError::Transcription {
                message: "mock transcription failure".to_string(),
            })
        } else {
            Ok(Transcription::new(self.response.clone(), self.confidence))
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}

/// Transcriber that plays back a queue of responses, then a fallback.
///
/// Useful when a test needs "nothing, nothing, then the wake phrase".
#[derive(Debug, Clone)]
pub struct ScriptedTranscriber {
    script: Arc<Mutex<VecDeque<Result<Transcription>>>>,
    fallback: Transcription,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Transcription::new("", 0.0),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a successful response.
    pub fn then(self, text: &str, confidence: f32) -> Self {
        self.script
            .lock()
            .push_back(Ok(Transcription::new(text, confidence)));
        self
    }

    /// Queue a failed call.
    pub fn then_fail(self, message: &str) -> Self {
        self.script
            .lock()
            .push_back(Err(WakescribeError::TranscriptionInferenceFailed {
                message: message.to_string(),
            }));
        self
    }

    /// Response returned once the queue is empty.
    pub fn with_fallback(mut self, text: &str, confidence: f32) -> Self {
        self.fallback = Transcription::new(text, confidence);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl Default for ScriptedTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, _audio: &[f32], _sample_rate: u32) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn is_ready(&self) -> bool {
        true
    }
}
