//! Recording orchestrator: owns the per-stream buffers and the output file,
//! schedules periodic flushes, and serializes every file mutation through a
//! single writer thread.
//!
//! Capture callbacks only ever touch the accumulation buffers; the writer
//! thread is the sole owner of the [`WavFile`], which is what keeps the
//! append-then-patch header cycle free of interleaving.

use super::buffer::{SampleBatch, SampleBuffer};
use super::mixer::mix_time_synced;
use super::wav::{timestamped_path, WavFile};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Recorder lifecycle. Draining covers the window between the stop request
/// and the writer thread exiting after its terminal flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    Recording,
    Draining,
}

/// Atomic phase holder so capture callbacks can check the phase without
/// taking a lock and lifecycle methods get compare-and-swap transitions.
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new(phase: RecorderPhase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    fn load(&self) -> RecorderPhase {
        match self.0.load(Ordering::Acquire) {
            0 => RecorderPhase::Idle,
            1 => RecorderPhase::Recording,
            _ => RecorderPhase::Draining,
        }
    }

    fn store(&self, phase: RecorderPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    /// Returns true only for the caller that wins the transition.
    fn transition(&self, from: RecorderPhase, to: RecorderPhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub flush_interval: Duration,
    pub output_dir: PathBuf,
    pub base_name: String,
}

struct Workers {
    flush_tx: Sender<()>,
    stop_tx: Sender<()>,
    scheduler_shutdown: Sender<()>,
    writer: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

/// Continuous dual-stream recorder.
///
/// `start` spawns the writer and scheduler; `add_mic_samples` /
/// `add_speaker_samples` are safe to call from capture callback threads for
/// the whole recording; `stop` requests a terminal flush and joins both
/// workers before reporting the session as finished.
pub struct SessionRecorder {
    config: RecorderConfig,
    output_path: PathBuf,
    mic: Arc<SampleBuffer>,
    speaker: Arc<SampleBuffer>,
    mixed: SampleBuffer,
    phase: PhaseCell,
    started_at: Mutex<Option<DateTime<Local>>>,
    bytes_written: AtomicU64,
    workers: Mutex<Option<Workers>>,
}

impl SessionRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        let output_path = timestamped_path(&config.output_dir, &config.base_name, Local::now());
        let mic = Arc::new(SampleBuffer::new(config.sample_rate, config.channels));
        let speaker = Arc::new(SampleBuffer::new(config.sample_rate, config.channels));
        let mixed = SampleBuffer::new(config.sample_rate, config.channels);
        Self {
            config,
            output_path,
            mic,
            speaker,
            mixed,
            phase: PhaseCell::new(RecorderPhase::Idle),
            started_at: Mutex::new(None),
            bytes_written: AtomicU64::new(0),
            workers: Mutex::new(None),
        }
    }

    /// Begin the session: create the container file and launch the writer
    /// thread plus the periodic flush scheduler.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if !self
            .phase
            .transition(RecorderPhase::Idle, RecorderPhase::Recording)
        {
            bail!("recorder already started");
        }

        std::fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.config.output_dir.display()
            )
        })?;
        let wav = match WavFile::create(
            &self.output_path,
            self.config.sample_rate,
            self.config.channels,
        ) {
            Ok(wav) => wav,
            Err(err) => {
                self.phase.store(RecorderPhase::Idle);
                return Err(err);
            }
        };

        *self.lock_started_at() = Some(Local::now());

        // Single-slot flush channel: bursts of triggers collapse to at most
        // one pending flush.
        let (flush_tx, flush_rx) = bounded::<()>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (scheduler_shutdown, shutdown_rx) = bounded::<()>(0);

        let writer = {
            let recorder = Arc::clone(self);
            thread::Builder::new()
                .name("duorec-writer".into())
                .spawn(move || recorder.run_writer(wav, flush_rx, stop_rx))
                .context("failed to spawn writer thread")?
        };
        let scheduler = {
            let flush_tx = flush_tx.clone();
            let interval = self.config.flush_interval;
            thread::Builder::new()
                .name("duorec-scheduler".into())
                .spawn(move || run_scheduler(interval, flush_tx, shutdown_rx))
                .context("failed to spawn flush scheduler")?
        };

        *self.lock_workers() = Some(Workers {
            flush_tx,
            stop_tx,
            scheduler_shutdown,
            writer,
            scheduler,
        });

        info!(path = %self.output_path.display(), "recording started");
        Ok(())
    }

    /// Stop the session. Idempotent: a second call is an Ok no-op.
    ///
    /// The stop signal makes the writer run exactly one terminal flush;
    /// joining the thread is what guarantees the flush completed before this
    /// returns.
    pub fn stop(&self) -> Result<()> {
        if !self
            .phase
            .transition(RecorderPhase::Recording, RecorderPhase::Draining)
        {
            return Ok(());
        }
        let Some(workers) = self.lock_workers().take() else {
            self.phase.store(RecorderPhase::Idle);
            return Ok(());
        };

        drop(workers.scheduler_shutdown);
        let _ = workers.stop_tx.try_send(());
        if workers.scheduler.join().is_err() {
            warn!("flush scheduler panicked");
        }
        // flush_tx stays open until the writer has exited: a writer that was
        // mid-flush when stop was requested re-enters select! with only the
        // stop message ready, never a flush disconnect racing it.
        if workers.writer.join().is_err() {
            warn!("writer thread panicked");
        }
        drop(workers.flush_tx);

        self.phase.store(RecorderPhase::Idle);
        info!(
            path = %self.output_path.display(),
            bytes = self.bytes_written.load(Ordering::Relaxed),
            "recording stopped"
        );
        Ok(())
    }

    /// Forward mic samples; no-op unless the session is recording.
    pub fn add_mic_samples(&self, samples: &[f32], arrived_at: DateTime<Local>) {
        if self.phase.load() != RecorderPhase::Recording || samples.is_empty() {
            return;
        }
        self.mic.push(samples, arrived_at);
    }

    /// Forward loopback samples; no-op unless the session is recording.
    pub fn add_speaker_samples(&self, samples: &[f32], arrived_at: DateTime<Local>) {
        if self.phase.load() != RecorderPhase::Recording || samples.is_empty() {
            return;
        }
        self.speaker.push(samples, arrived_at);
    }

    pub fn phase(&self) -> RecorderPhase {
        self.phase.load()
    }

    pub fn is_recording(&self) -> bool {
        self.phase.load() == RecorderPhase::Recording
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        *self.lock_started_at()
    }

    pub fn duration(&self) -> Duration {
        self.started_at()
            .map(|start| {
                Local::now()
                    .signed_duration_since(start)
                    .to_std()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Payload bytes committed to the container so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// The mic accumulation buffer, shared with the transcript pipeline.
    pub fn mic_buffer(&self) -> Arc<SampleBuffer> {
        Arc::clone(&self.mic)
    }

    /// The loopback accumulation buffer, shared with the transcript pipeline.
    pub fn speaker_buffer(&self) -> Arc<SampleBuffer> {
        Arc::clone(&self.speaker)
    }

    /// Writer loop: the only code that mutates the output file.
    fn run_writer(&self, mut wav: WavFile, flush_rx: Receiver<()>, stop_rx: Receiver<()>) {
        loop {
            select! {
                recv(flush_rx) -> msg => {
                    if msg.is_err() {
                        // All senders gone without a stop message: drain what
                        // is left before exiting.
                        self.flush_once(&mut wav);
                        break;
                    }
                    self.flush_once(&mut wav);
                }
                recv(stop_rx) -> _ => {
                    // Terminal flush: catches whatever arrived after the
                    // last scheduled one.
                    self.flush_once(&mut wav);
                    break;
                }
            }
        }
    }

    /// Drain both source buffers, mix, and append the result.
    ///
    /// Per-flush failures are logged and skipped so the session keeps
    /// running; a failed append is a permanent gap, never a retry.
    fn flush_once(&self, wav: &mut WavFile) {
        let mic = self.mic.drain_all();
        let speaker = self.speaker.drain_all();
        log_stream_skew(&mic, &speaker);
        if let Some(batch) =
            mix_time_synced(mic, speaker, self.config.sample_rate, self.config.channels)
        {
            self.mixed.push(&batch.samples, batch.started_at);
        }
        let Some(pending) = self.mixed.drain_all() else {
            return;
        };
        match wav.append(&pending.samples) {
            Ok(bytes) => {
                self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
                let seconds = pending.samples.len() as f64
                    / (self.config.sample_rate as f64 * self.config.channels as f64);
                debug!(seconds, total_bytes = wav.data_bytes(), "appended audio");
            }
            Err(err) => warn!(error = %format!("{err:#}"), "flush failed; batch skipped"),
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Option<Workers>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_started_at(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Local>>> {
        self.started_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fire a coalescing flush request at a fixed interval until shutdown.
fn run_scheduler(interval: Duration, flush_tx: Sender<()>, shutdown_rx: Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                // Slot already full means a flush is pending; drop the tick.
                if flush_tx.try_send(()).is_err() {
                    debug!("flush signal dropped; writer busy");
                }
            }
            recv(shutdown_rx) -> _ => break,
        }
    }
}

fn log_stream_skew(mic: &Option<SampleBatch>, speaker: &Option<SampleBatch>) {
    let (Some(mic), Some(speaker)) = (mic, speaker) else {
        return;
    };
    let skew_ms = speaker
        .started_at
        .signed_duration_since(mic.started_at)
        .num_milliseconds();
    debug!(skew_ms, "mixing mic and speaker batches");
}
