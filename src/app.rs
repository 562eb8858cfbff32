//! Dictation application entry points.
//!
//! Wires audio source → listening pipeline → recording coordinator → stdout
//! for the `listen` and `replay` commands.

use crate::audio::capture::CpalAudioSource;
use crate::audio::recorder::AudioSource;
use crate::audio::wav::WavAudioSource;
use crate::config::Config;
use crate::controller::{DictationController, SourceFactory};
use crate::error::Result;
use crate::pipeline::events::{EventEmitter, PipelineEvent};
use crate::pipeline::sink::StdoutSink;
use crate::stt::transcriber::Transcriber;
use crate::stt::whisper::WhisperTranscriber;
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub device: Option<String>,
    pub model: Option<PathBuf>,
    pub wake_phrase: Option<String>,
    pub language: Option<String>,
}

impl Overrides {
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(device) = self.device {
            config.audio.device = Some(device);
        }
        if let Some(model) = self.model {
            config.stt.model_path = Some(model);
        }
        if let Some(phrase) = self.wake_phrase {
            config.wake.phrase = phrase;
        }
        if let Some(language) = self.language {
            config.stt.language = language;
        }
        config
    }
}

/// Session options shared by `listen` and `replay`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub quiet: bool,
    /// Stream events as JSON lines instead of notices.
    pub json_events: bool,
    pub max_session: Option<Duration>,
}

/// Text shown to the user for an event, if any.
pub fn notice_for(event: &PipelineEvent, wake_phrase: &str) -> Option<String> {
    match event {
        PipelineEvent::WakePhraseDetected { matched_text, .. } => {
            Some(format!("Heard \"{matched_text}\", recording..."))
        }
        PipelineEvent::RecordingCancelled { phrase, .. } => {
            Some(format!("Cancelled (\"{phrase}\"), nothing kept"))
        }
        PipelineEvent::SilenceTimeoutAbort { .. } => {
            Some(format!("No speech heard, listening for \"{wake_phrase}\""))
        }
        PipelineEvent::ListeningUnavailable { reason } => {
            Some(format!("Listening unavailable: {reason}"))
        }
        PipelineEvent::SilenceStopKeep { .. } => Some("Transcribing...".to_string()),
    }
}

/// Prints short status notices on stderr.
struct NoticePrinter {
    wake_phrase: String,
}

impl EventEmitter for NoticePrinter {
    fn emit(&self, event: PipelineEvent) {
        let Some(notice) = notice_for(&event, &self.wake_phrase) else {
            return;
        };
        match event {
            PipelineEvent::RecordingCancelled { .. } => eprintln!("{}", notice.yellow()),
            PipelineEvent::ListeningUnavailable { .. } => eprintln!("{}", notice.red()),
            PipelineEvent::WakePhraseDetected { .. } => eprintln!("{}", notice.green()),
            _ => eprintln!("{}", notice.dimmed()),
        }
    }
}

/// Writes each event as one JSON line, for front-ends driving the CLI.
struct JsonEventWriter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonEventWriter<W> {
    fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> EventEmitter for JsonEventWriter<W> {
    fn emit(&self, event: PipelineEvent) {
        let line = match event.to_json() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(event = event.name(), "Failed to encode event: {e}");
                return;
            }
        };
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::debug!("Failed to write event: {e}");
        }
    }
}

fn load_transcriber(config: &Config, quiet: bool) -> Result<Arc<dyn Transcriber>> {
    let transcriber_config = config.transcriber_config();
    if !quiet {
        eprintln!(
            "Loading model '{}'...",
            transcriber_config.model_path.display()
        );
    }
    Ok(Arc::new(WhisperTranscriber::new(transcriber_config)?))
}

fn build_controller(config: &Config, options: SessionOptions) -> Result<DictationController> {
    config.validate()?;
    let transcriber = load_transcriber(config, options.quiet)?;
    let mut controller =
        DictationController::new(config.controller_config(), transcriber, Box::new(StdoutSink));
    if options.json_events {
        controller = controller.with_observer(Arc::new(JsonEventWriter::new(std::io::stderr())));
    } else if !options.quiet {
        controller = controller.with_observer(Arc::new(NoticePrinter {
            wake_phrase: config.wake.phrase.clone(),
        }));
    }
    Ok(controller)
}

fn run_session(
    mut controller: DictationController,
    shutdown: &AtomicBool,
    options: SessionOptions,
) -> Result<()> {
    let result = controller.run(shutdown, options.max_session);
    controller.shutdown();
    tracing::info!(stats = ?controller.stats(), "Session ended");
    result
}

/// Listen on the microphone until interrupted.
///
/// If the configured device disappears, the system default device is tried once.
pub fn run_listen(config: Config, shutdown: &AtomicBool, options: SessionOptions) -> Result<()> {
    let controller = build_controller(&config, options)?;

    let source = CpalAudioSource::new(config.audio.device.as_deref())?;
    let fallback: SourceFactory = Box::new(|| {
        let source: Box<dyn AudioSource> = Box::new(CpalAudioSource::new(None)?);
        Ok(source)
    });
    let mut controller = controller.with_fallback_source(fallback);

    controller.start_listening(Box::new(source))?;
    if !options.quiet {
        eprintln!(
            "Ready. Say \"{}\" to start dictating.",
            config.wake.phrase.bold()
        );
    }
    run_session(controller, shutdown, options)
}

/// Run the dictation flow over a WAV file.
pub fn run_replay(
    config: Config,
    path: &Path,
    realtime: bool,
    shutdown: &AtomicBool,
    options: SessionOptions,
) -> Result<()> {
    let mut controller = build_controller(&config, options)?;

    let source = WavAudioSource::open(path)?;
    let source = if realtime { source } else { source.unpaced() };
    if !options.quiet {
        eprintln!(
            "Replaying {} ({:.1}s)",
            path.display(),
            source.duration().as_secs_f32()
        );
    }

    controller.start_listening(Box::new(source))?;
    run_session(controller, shutdown, options)
}
