//! Real audio capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::AudioSource;
use crate::audio::resample::{downmix_to_mono, resample};
use crate::defaults;
use crate::error::{Result, WakescribeError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns to filter out (not useful for voice input).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Display name of a device, using `description()` with `name()` as fallback.
fn device_display_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|desc| desc.name().to_string())
        .unwrap_or_else(|_| {
            #[allow(deprecated)]
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        })
}

/// List available audio input devices, marking preferred ones with "\[recommended\]".
///
/// Filters out obviously unusable devices (surround channels, HDMI, etc.).
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| WakescribeError::AudioCapture {
            message: format!("Failed to enumerate input devices: {}", e),
        })?;

    Ok(devices
        .map(|device| device_display_name(&device))
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

/// Best default input device, preferring PipeWire/PulseAudio over the system default.
fn best_default_device(host: &cpal::Host) -> Result<cpal::Device> {
    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if is_preferred_device(&device_display_name(&device)) {
                return Ok(device);
            }
        }
    }

    host.default_input_device()
        .ok_or_else(|| WakescribeError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
}

/// Resolve a device by name, falling back to the default device when it is missing.
fn resolve_device(device_name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let found = host
            .input_devices()
            .map_err(|e| WakescribeError::AudioCapture {
                message: format!("Failed to enumerate devices: {}", e),
            })?
            .find(|dev| device_display_name(dev) == name);

        if let Some(device) = found {
            return Ok(device);
        }
        tracing::warn!(device = name, "Input device not found, using default device");
    }

    best_default_device(&host)
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in CpalAudioSource,
/// and only to pause or drop it.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Shared between the CPAL callbacks and the reader.
#[derive(Default)]
struct CaptureShared {
    buffer: Mutex<Vec<f32>>,
    callback_count: AtomicU64,
    disconnected: AtomicBool,
}

/// Real audio capture implementation using CPAL.
///
/// Captures mono f32 audio at 16kHz. Tries 16kHz/mono directly first, then
/// falls back to the device's native config with software conversion.
pub struct CpalAudioSource {
    device: cpal::Device,
    device_name: String,
    stream: Mutex<Option<SendableStream>>,
    shared: Arc<CaptureShared>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Create a capture source for `device_name`, or the default device if `None`.
    ///
    /// A named device that no longer exists falls back to the default device.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = resolve_device(device_name)?;
        let device_name = device_display_name(&device);
        tracing::debug!(device = %device_name, "Selected input device");

        Ok(Self {
            device,
            device_name,
            stream: Mutex::new(None),
            shared: Arc::new(CaptureShared::default()),
            sample_rate: defaults::SAMPLE_RATE,
        })
    }

    fn error_callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let shared = Arc::clone(&self.shared);
        let device = self.device_name.clone();
        move |err| {
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                tracing::error!(device = %device, "Audio device disconnected");
                shared.disconnected.store(true, Ordering::SeqCst);
            } else {
                tracing::error!(device = %device, "Audio stream error: {}", err);
            }
        }
    }

    /// Try f32/16kHz/mono first, then the device's native config.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::clone(&self.shared);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                shared.callback_count.fetch_add(1, Ordering::Relaxed);
                shared.buffer.lock().extend_from_slice(data);
            },
            self.error_callback(),
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Capture at the device's native rate/channels and convert in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| WakescribeError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "Using native audio format, converting in software"
        );

        let shared = Arc::clone(&self.shared);
        let deliver = move |mono: Vec<f32>| {
            shared.callback_count.fetch_add(1, Ordering::Relaxed);
            let converted = resample(&mono, native_rate, target_rate);
            shared.buffer.lock().extend_from_slice(&converted);
        };

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    deliver(downmix_to_mono(data, native_channels));
                },
                self.error_callback(),
                None,
            ),
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats = crate::audio::resample::i16_to_f32(data);
                    deliver(downmix_to_mono(&floats, native_channels));
                },
                self.error_callback(),
                None,
            ),
            fmt => {
                return Err(WakescribeError::AudioFormatMismatch {
                    expected: "f32 or i16".to_string(),
                    actual: format!("{:?}", fmt),
                });
            }
        };

        stream.map_err(|e| WakescribeError::AudioCapture {
            message: format!("Failed to build native input stream: {}", e),
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.lock().is_some() {
            return Ok(());
        }
        self.shared.disconnected.store(false, Ordering::SeqCst);

        let stream = self.build_stream()?;
        stream.play().map_err(|e| WakescribeError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept a non-native config but never fire the callback.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let stream = if self.shared.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            self.shared.buffer.lock().clear();

            let native = self.build_stream_native()?;
            native.play().map_err(|e| WakescribeError::AudioCapture {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        *self.stream.lock() = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(sendable) = self.stream.lock().take() {
            sendable
                .0
                .pause()
                .map_err(|e| WakescribeError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.shared.disconnected.load(Ordering::SeqCst) {
            return Err(WakescribeError::AudioDeviceDisconnected {
                device: self.device_name.clone(),
            });
        }
        Ok(std::mem::take(&mut *self.shared.buffer.lock()))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}
