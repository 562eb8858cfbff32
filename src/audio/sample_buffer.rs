//! Shared audio buffers between the capture thread and its consumers.
//!
//! [`SampleBuffer`] is a fixed-capacity ring: the capture thread pushes,
//! analysis threads take copy-out snapshots of the most recent audio.
//! [`RecordingBuffer`] is the growing, append-only store of one recording.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Ring {
    samples: Box<[f32]>,
    /// Next slot to write.
    write_pos: usize,
    /// Valid samples currently held (<= capacity).
    len: usize,
    /// Samples ever pushed since creation or the last clear.
    total_written: u64,
}

impl Ring {
    fn push(&mut self, input: &[f32]) {
        let capacity = self.samples.len();
        if capacity == 0 {
            return;
        }
        self.total_written += input.len() as u64;

        // Only the tail of an oversized push survives.
        let input = if input.len() > capacity {
            &input[input.len() - capacity..]
        } else {
            input
        };

        let first = (capacity - self.write_pos).min(input.len());
        self.samples[self.write_pos..self.write_pos + first].copy_from_slice(&input[..first]);
        let rest = input.len() - first;
        self.samples[..rest].copy_from_slice(&input[first..]);

        self.write_pos = (self.write_pos + input.len()) % capacity;
        self.len = (self.len + input.len()).min(capacity);
    }

    fn latest(&self, count: usize) -> Vec<f32> {
        let capacity = self.samples.len();
        let count = count.min(self.len);
        let mut out = Vec::with_capacity(count);
        if count == 0 {
            return out;
        }
        let start = (self.write_pos + capacity - count) % capacity;
        if start + count <= capacity {
            out.extend_from_slice(&self.samples[start..start + count]);
        } else {
            out.extend_from_slice(&self.samples[start..]);
            out.extend_from_slice(&self.samples[..count - (capacity - start)]);
        }
        out
    }
}

/// Fixed-capacity ring buffer of mono samples.
///
/// Clones share the same storage. Every operation takes the lock once, so a
/// capture callback is only ever blocked by a single memcpy on the reader side.
#[derive(Clone)]
pub struct SampleBuffer {
    inner: Arc<Mutex<Ring>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples at `sample_rate`.
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ring {
                samples: vec![0.0; capacity].into_boxed_slice(),
                write_pos: 0,
                len: 0,
                total_written: 0,
            })),
            sample_rate,
        }
    }

    /// Create a buffer sized to hold `ms` milliseconds of audio.
    pub fn with_duration_ms(ms: u32, sample_rate: u32) -> Self {
        Self::new(crate::defaults::ms_to_samples(ms, sample_rate), sample_rate)
    }

    /// Append samples, overwriting the oldest data on overflow.
    pub fn push(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        self.inner.lock().push(samples);
    }

    /// Copy out the most recent `duration` of audio (fewer samples if not yet filled).
    pub fn snapshot(&self, duration: Duration) -> Vec<f32> {
        let count = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        self.snapshot_samples(count)
    }

    /// Copy out the most recent `count` samples (fewer if not yet filled).
    pub fn snapshot_samples(&self, count: usize) -> Vec<f32> {
        self.inner.lock().latest(count)
    }

    /// Snapshot plus the write counter, read under the same lock.
    pub fn snapshot_with_position(&self, count: usize) -> (Vec<f32>, u64) {
        let ring = self.inner.lock();
        (ring.latest(count), ring.total_written)
    }

    /// Drop all buffered audio and reset the write counter.
    pub fn clear(&self) {
        let mut ring = self.inner.lock();
        ring.write_pos = 0;
        ring.len = 0;
        ring.total_written = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples pushed since creation or the last `clear`, including overwritten ones.
    pub fn total_written(&self) -> u64 {
        self.inner.lock().total_written
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.inner.lock();
        f.debug_struct("SampleBuffer")
            .field("len", &ring.len)
            .field("capacity", &ring.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Recording {
    samples: Vec<f32>,
    open: bool,
    discarded: bool,
}

/// Append-only audio of a single recording, shared by clones.
///
/// The capture thread appends while the buffer is open. Closing keeps the
/// audio for transcription; discarding drops it. Both stop further appends.
#[derive(Debug, Clone)]
pub struct RecordingBuffer {
    inner: Arc<Mutex<Recording>>,
    sample_rate: u32,
}

impl RecordingBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Recording {
                samples: Vec::new(),
                open: true,
                discarded: false,
            })),
            sample_rate,
        }
    }

    /// Append captured audio. Ignored once the buffer is closed or discarded.
    pub fn append(&self, samples: &[f32]) {
        let mut recording = self.inner.lock();
        if recording.open {
            recording.samples.extend_from_slice(samples);
        }
    }

    /// Copy of everything recorded after `cursor`.
    pub fn read_from(&self, cursor: usize) -> Vec<f32> {
        let recording = self.inner.lock();
        recording
            .samples
            .get(cursor..)
            .map(<[f32]>::to_vec)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    pub fn is_discarded(&self) -> bool {
        self.inner.lock().discarded
    }

    /// Stop accepting audio and keep what was recorded.
    pub fn close(&self) {
        self.inner.lock().open = false;
    }

    /// Stop accepting audio and drop what was recorded.
    pub fn discard(&self) {
        let mut recording = self.inner.lock();
        recording.open = false;
        recording.discarded = true;
        recording.samples = Vec::new();
    }

    /// Move the recorded audio out, leaving the buffer empty.
    pub fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut self.inner.lock().samples)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.len() as f64 / self.sample_rate as f64)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ramp(start: usize, count: usize) -> Vec<f32> {
        (start..start + count).map(|i| i as f32).collect()
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = SampleBuffer::new(100, 16000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 100);
        assert!(buffer.snapshot_samples(50).is_empty());
    }

    #[test]
    fn test_underfilled_snapshot_returns_what_is_there() {
        let buffer = SampleBuffer::new(100, 16000);
        buffer.push(&ramp(0, 30));
        assert_eq!(buffer.snapshot_samples(50), ramp(0, 30));
    }

    #[test]
    fn test_snapshot_returns_most_recent_samples() {
        let buffer = SampleBuffer::new(100, 16000);
        buffer.push(&ramp(0, 60));
        buffer.push(&ramp(60, 20));
        assert_eq!(buffer.snapshot_samples(10), ramp(70, 10));
    }

    #[test]
    fn test_overflow_keeps_only_latest_capacity_samples() {
        let buffer = SampleBuffer::new(100, 16000);
        for chunk in 0..7 {
            buffer.push(&ramp(chunk * 37, 37));
        }
        // 259 samples pushed; the ring holds 159..259.
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.snapshot_samples(1000), ramp(159, 100));
        assert_eq!(buffer.snapshot_samples(25), ramp(234, 25));
        assert_eq!(buffer.total_written(), 259);
    }

    #[test]
    fn test_oversized_push_keeps_tail() {
        let buffer = SampleBuffer::new(10, 16000);
        buffer.push(&ramp(0, 5));
        buffer.push(&ramp(5, 25));
        assert_eq!(buffer.snapshot_samples(10), ramp(20, 10));
    }

    #[test]
    fn test_snapshot_by_duration() {
        let buffer = SampleBuffer::with_duration_ms(2000, 16000);
        assert_eq!(buffer.capacity(), 32000);
        buffer.push(&vec![0.1; 40000]);
        assert_eq!(buffer.snapshot(Duration::from_millis(500)).len(), 8000);
        assert_eq!(buffer.snapshot(Duration::from_secs(5)).len(), 32000);
    }

    #[test]
    fn test_clear_resets_everything() {
        let buffer = SampleBuffer::new(100, 16000);
        buffer.push(&ramp(0, 80));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_written(), 0);
        buffer.push(&ramp(500, 3));
        assert_eq!(buffer.snapshot_samples(100), ramp(500, 3));
    }

    #[test]
    fn test_zero_capacity_never_panics() {
        let buffer = SampleBuffer::new(0, 16000);
        buffer.push(&[1.0, 2.0]);
        assert!(buffer.snapshot_samples(2).is_empty());
    }

    #[test]
    fn test_concurrent_push_and_snapshot_never_tears() {
        let buffer = SampleBuffer::new(1024, 16000);
        let writer = buffer.clone();

        let handle = thread::spawn(move || {
            for value in 0..2000 {
                writer.push(&[value as f32; 64]);
            }
        });

        for _ in 0..2000 {
            let snapshot = buffer.snapshot_samples(64);
            if let Some(&first) = snapshot.first() {
                assert!(snapshot.iter().all(|&s| s == first), "torn snapshot");
            }
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_recording_buffer_append_and_read_from_cursor() {
        let recording = RecordingBuffer::new(16000);
        recording.append(&ramp(0, 10));
        recording.append(&ramp(10, 5));
        assert_eq!(recording.len(), 15);
        assert_eq!(recording.read_from(12), ramp(12, 3));
        assert!(recording.read_from(40).is_empty());
    }

    #[test]
    fn test_recording_buffer_close_keeps_audio() {
        let recording = RecordingBuffer::new(16000);
        let tap = recording.clone();
        tap.append(&ramp(0, 8));
        recording.close();
        tap.append(&ramp(8, 8));

        assert!(!recording.is_open());
        assert!(!recording.is_discarded());
        assert_eq!(recording.take_samples(), ramp(0, 8));
        assert!(recording.is_empty());
    }

    #[test]
    fn test_recording_buffer_discard_drops_audio() {
        let recording = RecordingBuffer::new(16000);
        recording.append(&ramp(0, 8));
        recording.discard();
        recording.append(&ramp(8, 8));

        assert!(recording.is_discarded());
        assert!(recording.is_empty());
    }

    #[test]
    fn test_recording_duration() {
        let recording = RecordingBuffer::new(16000);
        recording.append(&vec![0.0; 8000]);
        assert_eq!(recording.duration(), Duration::from_millis(500));
    }
}
