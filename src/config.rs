use crate::controller::ControllerConfig;
use crate::defaults;
use crate::detect::cancel::CancelDetectorConfig;
use crate::detect::silence::SilenceConfig;
use crate::detect::wake::WakeDetectorConfig;
use crate::error::{Result, WakescribeError};
use crate::pipeline::coordinator::CoordinatorConfig;
use crate::pipeline::listening::ListeningConfig;
use crate::stt::transcriber::TranscriberConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub wake: WakeConfig,
    pub silence: SilenceSection,
    pub cancel: CancelSection,
    pub recording: RecordingSection,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    /// Whisper model file. Defaults to the model in the data directory.
    pub model_path: Option<PathBuf>,
    pub language: String,
    pub threads: Option<usize>,
}

/// Wake phrase detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WakeConfig {
    pub phrase: String,
    pub confidence_threshold: f32,
    pub window_ms: u32,
    pub analysis_interval_ms: u64,
    pub min_new_audio_ms: u32,
    pub min_speech_frames: usize,
    pub speech_threshold: f32,
    pub rejections: Vec<String>,
}

/// Silence-based end of recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SilenceSection {
    pub speech_threshold: f32,
    pub silence_duration_ms: u32,
    pub no_speech_timeout_ms: u32,
    pub min_speech_frames: usize,
    pub adaptive_threshold: bool,
}

/// Cancel phrase detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CancelSection {
    pub phrases: Vec<String>,
    pub rejections: Vec<String>,
    pub confidence_threshold: f32,
    pub window_ms: u32,
    pub min_new_audio_ms: u32,
    pub min_speech_frames: usize,
    pub max_extra_words: usize,
}

/// Recording coordination timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingSection {
    pub poll_interval_ms: u64,
    pub stop_timeout_ms: u64,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: defaults::WAKE_PHRASE.to_string(),
            confidence_threshold: defaults::WAKE_CONFIDENCE_THRESHOLD,
            window_ms: defaults::WAKE_WINDOW_MS,
            analysis_interval_ms: defaults::ANALYSIS_INTERVAL_MS,
            min_new_audio_ms: defaults::WAKE_MIN_NEW_AUDIO_MS,
            min_speech_frames: defaults::WAKE_MIN_SPEECH_FRAMES,
            speech_threshold: defaults::SPEECH_THRESHOLD,
            rejections: owned(defaults::WAKE_REJECTIONS),
        }
    }
}

impl Default for SilenceSection {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::SPEECH_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            no_speech_timeout_ms: defaults::NO_SPEECH_TIMEOUT_MS,
            min_speech_frames: defaults::SILENCE_MIN_SPEECH_FRAMES,
            adaptive_threshold: false,
        }
    }
}

impl Default for CancelSection {
    fn default() -> Self {
        Self {
            phrases: owned(defaults::CANCEL_PHRASES),
            rejections: owned(defaults::CANCEL_REJECTIONS),
            confidence_threshold: defaults::CANCEL_CONFIDENCE_THRESHOLD,
            window_ms: defaults::CANCEL_WINDOW_MS,
            min_new_audio_ms: defaults::CANCEL_MIN_NEW_AUDIO_MS,
            min_speech_frames: defaults::CANCEL_MIN_SPEECH_FRAMES,
            max_extra_words: defaults::CANCEL_MAX_EXTRA_WORDS,
        }
    }
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::DETECTION_INTERVAL_MS,
            stop_timeout_ms: defaults::STOP_TIMEOUT_MS,
        }
    }
}

impl SttConfig {
    /// Configured model, or the default model file in the data directory.
    pub fn resolved_model_path(&self) -> PathBuf {
        self.model_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("wakescribe")
                .join("models")
                .join(defaults::DEFAULT_MODEL_FILE)
        })
    }
}

fn invalid(key: &str, message: &str) -> WakescribeError {
    WakescribeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn check_unit(key: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(key, "must be between 0.0 and 1.0"))
    }
}

fn check_nonzero(key: &str, value: u64) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(invalid(key, "must be greater than zero"))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WakescribeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                WakescribeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(WakescribeError::ConfigFileNotFound { .. }) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - WAKESCRIBE_MODEL → stt.model_path
    /// - WAKESCRIBE_LANGUAGE → stt.language
    /// - WAKESCRIBE_AUDIO_DEVICE → audio.device
    /// - WAKESCRIBE_WAKE_PHRASE → wake.phrase
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("WAKESCRIBE_MODEL")
            && !model.is_empty()
        {
            self.stt.model_path = Some(PathBuf::from(model));
        }

        if let Ok(language) = std::env::var("WAKESCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.stt.language = language;
        }

        if let Ok(device) = std::env::var("WAKESCRIBE_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(phrase) = std::env::var("WAKESCRIBE_WAKE_PHRASE")
            && !phrase.is_empty()
        {
            self.wake.phrase = phrase;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/wakescribe/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wakescribe")
            .join("config.toml")
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        check_nonzero("audio.sample_rate", self.audio.sample_rate as u64)?;
        if self.audio.sample_rate != defaults::SAMPLE_RATE {
            return Err(invalid(
                "audio.sample_rate",
                &format!("only {} Hz is supported", defaults::SAMPLE_RATE),
            ));
        }

        if self.wake.phrase.trim().is_empty() {
            return Err(invalid("wake.phrase", "must not be empty"));
        }
        check_unit("wake.confidence_threshold", self.wake.confidence_threshold)?;
        check_unit("wake.speech_threshold", self.wake.speech_threshold)?;
        check_nonzero("wake.window_ms", self.wake.window_ms as u64)?;
        check_nonzero("wake.analysis_interval_ms", self.wake.analysis_interval_ms)?;
        check_nonzero("wake.min_new_audio_ms", self.wake.min_new_audio_ms as u64)?;

        check_unit("silence.speech_threshold", self.silence.speech_threshold)?;
        check_nonzero(
            "silence.silence_duration_ms",
            self.silence.silence_duration_ms as u64,
        )?;
        check_nonzero(
            "silence.no_speech_timeout_ms",
            self.silence.no_speech_timeout_ms as u64,
        )?;

        if self.cancel.phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(invalid("cancel.phrases", "must contain at least one phrase"));
        }
        check_unit("cancel.confidence_threshold", self.cancel.confidence_threshold)?;
        check_nonzero("cancel.window_ms", self.cancel.window_ms as u64)?;
        check_nonzero("cancel.min_new_audio_ms", self.cancel.min_new_audio_ms as u64)?;

        check_nonzero("recording.poll_interval_ms", self.recording.poll_interval_ms)?;
        check_nonzero("recording.stop_timeout_ms", self.recording.stop_timeout_ms)?;
        Ok(())
    }

    /// Serialize to TOML (for `config show` / `config init`).
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WakescribeError::ConfigParse {
            message: e.to_string(),
        })
    }

    pub fn transcriber_config(&self) -> TranscriberConfig {
        TranscriberConfig {
            model_path: self.stt.resolved_model_path(),
            language: self.stt.language.clone(),
            threads: self.stt.threads,
        }
    }

    /// Detector and pipeline settings derived from this configuration.
    pub fn controller_config(&self) -> ControllerConfig {
        let rate = self.audio.sample_rate;
        let stop_timeout = Duration::from_millis(self.recording.stop_timeout_ms);

        let wake = WakeDetectorConfig {
            phrase: self.wake.phrase.clone(),
            rejections: self.wake.rejections.clone(),
            confidence_threshold: self.wake.confidence_threshold,
            min_speech_frames: self.wake.min_speech_frames,
            speech_threshold: self.wake.speech_threshold,
            sample_rate: rate,
        };
        let silence = SilenceConfig {
            speech_threshold: self.silence.speech_threshold,
            silence_duration_ms: self.silence.silence_duration_ms,
            no_speech_timeout_ms: self.silence.no_speech_timeout_ms,
            min_speech_frames: self.silence.min_speech_frames,
            adaptive_threshold: self.silence.adaptive_threshold,
            sample_rate: rate,
            ..SilenceConfig::default()
        };
        let cancel = CancelDetectorConfig {
            phrases: self.cancel.phrases.clone(),
            rejections: self.cancel.rejections.clone(),
            confidence_threshold: self.cancel.confidence_threshold,
            window_ms: self.cancel.window_ms,
            min_new_audio_ms: self.cancel.min_new_audio_ms,
            min_speech_frames: self.cancel.min_speech_frames,
            speech_threshold: self.silence.speech_threshold,
            max_extra_words: self.cancel.max_extra_words,
            sample_rate: rate,
        };

        ControllerConfig {
            listening: ListeningConfig {
                wake,
                window_ms: self.wake.window_ms,
                analysis_interval: Duration::from_millis(self.wake.analysis_interval_ms),
                min_new_audio_ms: self.wake.min_new_audio_ms,
                buffer_ms: self.wake.window_ms.max(defaults::LISTENING_BUFFER_MS),
                stop_timeout,
                ..ListeningConfig::default()
            },
            coordinator: CoordinatorConfig {
                silence,
                cancel,
                poll_interval: Duration::from_millis(self.recording.poll_interval_ms),
                stop_timeout,
            },
            event_poll_interval: Duration::from_millis(self.recording.poll_interval_ms),
        }
    }
}
