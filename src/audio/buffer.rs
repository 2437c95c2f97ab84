//! Thread-safe accumulation buffers shared between capture callbacks and the
//! writer/transcription workers.
//!
//! Each stream (mic, loopback, mixed) owns one [`SampleBuffer`]. Capture
//! callbacks append under a mutex held only for the length of a memory copy;
//! drains are atomic copy-and-reset so no consumer ever observes a partially
//! drained buffer.

use chrono::{DateTime, Duration, Local};
use std::sync::Mutex;

/// A batch of interleaved f32 samples plus the wall-clock instant the first
/// sample arrived. The timestamp is the reference clock for mixing.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub samples: Vec<f32>,
    pub started_at: DateTime<Local>,
}

#[derive(Default)]
struct BufferInner {
    samples: Vec<f32>,
    started_at: Option<DateTime<Local>>,
}

/// Append/drain container for one audio stream.
///
/// The batch-start timestamp is set only when the buffer transitions from
/// empty to non-empty and cleared on drain, so it always names the arrival
/// time of the oldest undrained sample rather than the most recent push.
pub struct SampleBuffer {
    inner: Mutex<BufferInner>,
    sample_rate: u32,
    channels: u16,
}

impl SampleBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            inner: Mutex::new(BufferInner::default()),
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Append samples from a capture callback.
    ///
    /// Must never block the audio thread beyond the copy, and must never
    /// panic: a poisoned lock is recovered rather than propagated.
    pub fn push(&self, samples: &[f32], arrived_at: DateTime<Local>) {
        if samples.is_empty() {
            return;
        }
        let mut inner = self.lock_inner();
        if inner.samples.is_empty() {
            inner.started_at = Some(arrived_at);
        }
        inner.samples.extend_from_slice(samples);
    }

    /// Atomically take everything accumulated since the last drain.
    ///
    /// Returns `None` when nothing is pending. The buffer is empty and the
    /// batch-start timestamp cleared immediately afterwards.
    pub fn drain_all(&self) -> Option<SampleBatch> {
        let mut inner = self.lock_inner();
        if inner.samples.is_empty() {
            return None;
        }
        // push stamps the first sample, so a non-empty buffer always has one
        let started_at = inner.started_at.take()?;
        let samples = std::mem::take(&mut inner.samples);
        Some(SampleBatch {
            samples,
            started_at,
        })
    }

    /// Copy the trailing `seconds` of audio without removing anything.
    ///
    /// The returned timestamp is the batch start advanced by the duration of
    /// any skipped prefix, so it names when the window itself began.
    pub fn peek_tail(&self, seconds: f64) -> Option<SampleBatch> {
        let inner = self.lock_inner();
        if inner.samples.is_empty() {
            return None;
        }
        let started_at = inner.started_at?;
        let window = (seconds * self.sample_rate as f64 * self.channels as f64) as usize;
        let take = window.min(inner.samples.len()).max(1);
        let skipped = inner.samples.len() - take;
        let samples = inner.samples[skipped..].to_vec();
        let skipped_frames = skipped as i64 / i64::from(self.channels);
        let offset_ms = skipped_frames * 1000 / i64::from(self.sample_rate);
        Some(SampleBatch {
            samples,
            started_at: started_at + Duration::milliseconds(offset_ms),
        })
    }

    /// Advisory snapshot; not synchronized with later pushes or drains.
    pub fn is_empty(&self) -> bool {
        self.lock_inner().samples.is_empty()
    }

    /// Advisory snapshot of the pending sample count.
    pub fn len(&self) -> usize {
        self.lock_inner().samples.len()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
