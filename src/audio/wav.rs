//! WAV file audio source for replaying recordings through the pipeline.

use crate::audio::recorder::AudioSource;
use crate::audio::resample::{downmix_to_mono, resample};
use crate::audio::vad::{Clock, SystemClock};
use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, WakescribeError};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Audio source that reads from WAV file data.
///
/// Supports arbitrary sample rates, channel counts and sample formats,
/// converting to 16kHz mono f32. By default samples are released at
/// wall-clock speed so the pipeline's timers behave as with a live microphone.
pub struct WavAudioSource {
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
    paced: bool,
    started_at: Option<Instant>,
    clock: Arc<dyn Clock>,
    name: String,
}

impl WavAudioSource {
    /// Open a WAV file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| WakescribeError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        let mut source = Self::from_reader(Box::new(std::io::BufReader::new(file)))?;
        source.name = path.display().to_string();
        Ok(source)
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let wav_reader = hound::WavReader::new(reader)?;
        let spec = wav_reader.spec();

        let raw = read_normalized(wav_reader, spec)?;
        let mono = downmix_to_mono(&raw, spec.channels as usize);
        let samples = resample(&mono, spec.sample_rate, SAMPLE_RATE);

        tracing::debug!(
            source_rate = spec.sample_rate,
            channels = spec.channels,
            samples = samples.len(),
            "Loaded WAV audio"
        );

        Ok(Self::from_samples(samples))
    }

    /// Create from 16kHz mono samples already in memory.
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
            // 100ms chunks at 16kHz
            chunk_size: 1600,
            paced: true,
            started_at: None,
            clock: Arc::new(SystemClock),
            name: "wav".to_string(),
        }
    }

    /// Release audio as fast as it is read instead of at wall-clock speed.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Use a custom clock for pacing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Total duration of the file at 16kHz.
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / SAMPLE_RATE as f64)
    }

    /// Consume the source and return all samples as a single buffer.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    fn due_position(&self) -> usize {
        if !self.paced {
            return self.position + self.chunk_size;
        }
        match self.started_at {
            Some(started) => {
                let elapsed = self.clock.now().saturating_duration_since(started);
                (elapsed.as_secs_f64() * SAMPLE_RATE as f64) as usize
            }
            None => self.position,
        }
    }
}

fn read_normalized<R: Read>(reader: hound::WavReader<R>, spec: hound::WavSpec) -> Result<Vec<f32>> {
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(samples)
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        self.started_at = Some(self.clock.now());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started_at = None;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = self.due_position().min(self.samples.len());
        if end <= self.position {
            return Ok(Vec::new());
        }
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
