//! Per-source polling loops plus the periodic ordered writer.
//!
//! Two worker threads pull rolling windows out of the recorder's source
//! buffers (without disturbing the recording path), feed them to the speech
//! engine, and park the results in a shared accumulator. A third thread
//! drains the accumulator on a write signal or timer, orders the segments,
//! and appends them to the transcript file.

use super::segment::{SegmentSource, TranscriptSegment};
use super::writer::TranscriptWriter;
use crate::audio::SampleBuffer;
use crate::stt::SpeechEngine;
use anyhow::{bail, Context, Result};
use chrono::Local;
use crossbeam_channel::{bounded, select, tick, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Pending segments that force a write signal between timer ticks.
const SEGMENT_FLUSH_THRESHOLD: usize = 10;
/// Fraction of the batch interval each source waits between polls; the two
/// are staggered so both loops do not contend for the engine at once.
const MIC_STAGGER: f64 = 0.5;
const SPEAKER_STAGGER: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct TranscriptConfig {
    /// Rolling window length fed to the engine, in seconds. Also the writer
    /// interval.
    pub batch_seconds: f64,
    /// Windows smaller than this many samples are skipped.
    pub min_window_samples: usize,
    pub output_dir: PathBuf,
    pub base_name: String,
    /// Include the batch-relative `+MM:SS` offset in each line.
    pub annotate_timestamps: bool,
}

type SharedEngine = Arc<Mutex<dyn SpeechEngine>>;

struct PipelineWorkers {
    poll_shutdown: Sender<()>,
    writer_shutdown: Sender<()>,
    write_tx: Sender<()>,
    poll_handles: Vec<JoinHandle<()>>,
    writer_handle: JoinHandle<()>,
}

/// Transcription orchestrator. `start` spawns the two polling loops and the
/// writer; `stop` broadcasts shutdown by dropping channel senders, joining
/// the polling loops before the writer's final drain.
pub struct TranscriptPipeline {
    config: TranscriptConfig,
    segments: Mutex<Vec<TranscriptSegment>>,
    last_write: Mutex<Instant>,
    transcript_path: Mutex<Option<PathBuf>>,
    workers: Mutex<Option<PipelineWorkers>>,
}

impl TranscriptPipeline {
    pub fn new(config: TranscriptConfig) -> Self {
        Self {
            config,
            segments: Mutex::new(Vec::new()),
            last_write: Mutex::new(Instant::now()),
            transcript_path: Mutex::new(None),
            workers: Mutex::new(None),
        }
    }

    /// Create the transcript file and launch the workers.
    pub fn start(
        self: &Arc<Self>,
        engine: SharedEngine,
        mic: Arc<SampleBuffer>,
        speaker: Arc<SampleBuffer>,
    ) -> Result<()> {
        let mut workers_slot = lock(&self.workers);
        if workers_slot.is_some() {
            bail!("transcription already running");
        }

        std::fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.config.output_dir.display()
            )
        })?;
        let started_at = Local::now();
        let path = TranscriptWriter::timestamped_path(
            &self.config.output_dir,
            &self.config.base_name,
            started_at,
        );
        let model_name = lock(&engine).model_name().to_owned();
        let writer = TranscriptWriter::create(
            &path,
            &self.config.base_name,
            started_at,
            &model_name,
            self.config.annotate_timestamps,
        )?;
        *lock(&self.transcript_path) = Some(path.clone());
        *lock(&self.last_write) = Instant::now();

        let (poll_shutdown, poll_shutdown_rx) = bounded::<()>(0);
        let (writer_shutdown, writer_shutdown_rx) = bounded::<()>(0);
        let (write_tx, write_rx) = bounded::<()>(1);

        let writer_handle = {
            let pipeline = Arc::clone(self);
            thread::Builder::new()
                .name("duorec-transcript-writer".into())
                .spawn(move || pipeline.run_writer(writer, write_rx, writer_shutdown_rx))
                .context("failed to spawn transcript writer")?
        };
        let mut poll_handles = Vec::with_capacity(2);
        for (source, buffer, stagger) in [
            (SegmentSource::Mic, mic, MIC_STAGGER),
            (SegmentSource::Speaker, speaker, SPEAKER_STAGGER),
        ] {
            let pipeline = Arc::clone(self);
            let engine = Arc::clone(&engine);
            let write_tx = write_tx.clone();
            let shutdown_rx = poll_shutdown_rx.clone();
            poll_handles.push(
                thread::Builder::new()
                    .name(format!("duorec-transcribe-{}", source.label().to_lowercase()))
                    .spawn(move || {
                        pipeline.run_poll_loop(source, buffer, engine, stagger, write_tx, shutdown_rx)
                    })
                    .context("failed to spawn transcription loop")?,
            );
        }

        *workers_slot = Some(PipelineWorkers {
            poll_shutdown,
            writer_shutdown,
            write_tx,
            poll_handles,
            writer_handle,
        });
        info!(path = %path.display(), model = model_name.as_str(), "transcription started");
        Ok(())
    }

    /// Stop the workers. Idempotent; the writer drains once more on the way
    /// out so nothing recognized before the stop is lost.
    pub fn stop(&self) -> Result<()> {
        let Some(workers) = lock(&self.workers).take() else {
            return Ok(());
        };
        // Poll loops go down first so the writer's final drain sees every
        // segment they produced.
        drop(workers.poll_shutdown);
        for handle in workers.poll_handles {
            if handle.join().is_err() {
                warn!("transcription loop panicked");
            }
        }
        drop(workers.writer_shutdown);
        drop(workers.write_tx);
        if workers.writer_handle.join().is_err() {
            warn!("transcript writer panicked");
        }
        info!("transcription stopped");
        Ok(())
    }

    pub fn transcript_path(&self) -> Option<PathBuf> {
        lock(&self.transcript_path).clone()
    }

    /// Advisory count of segments waiting to be written.
    pub fn pending_segments(&self) -> usize {
        lock(&self.segments).len()
    }

    /// Poll one source: peek the trailing window, run the engine, accumulate
    /// the recognized segments. Engine failures skip that window only.
    fn run_poll_loop(
        &self,
        source: SegmentSource,
        buffer: Arc<SampleBuffer>,
        engine: SharedEngine,
        stagger: f64,
        write_tx: Sender<()>,
        shutdown_rx: Receiver<()>,
    ) {
        let interval = Duration::from_secs_f64(self.config.batch_seconds * stagger);
        let batch_interval = Duration::from_secs_f64(self.config.batch_seconds);
        loop {
            match shutdown_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            let Some(window) = buffer.peek_tail(self.config.batch_seconds) else {
                continue;
            };
            if window.samples.len() < self.config.min_window_samples {
                continue;
            }

            let result = lock(&engine).transcribe(&window.samples, buffer.sample_rate());
            let raw = match result {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(
                        source = source.label(),
                        error = %format!("{err:#}"),
                        "transcription failed; window skipped"
                    );
                    continue;
                }
            };

            let mut tagged: Vec<TranscriptSegment> = raw
                .into_iter()
                .filter(|segment| !segment.text.trim().is_empty())
                .map(|segment| TranscriptSegment {
                    text: segment.text.trim().to_owned(),
                    start_secs: segment.start_cs as f64 / 100.0,
                    end_secs: segment.end_cs as f64 / 100.0,
                    source,
                    captured_at: window.started_at,
                })
                .collect();
            if tagged.is_empty() {
                continue;
            }

            let pending = {
                let mut segments = lock(&self.segments);
                segments.append(&mut tagged);
                segments.len()
            };
            let stale = lock(&self.last_write).elapsed() >= batch_interval;
            if pending > SEGMENT_FLUSH_THRESHOLD || stale {
                // Single-slot signal; a pending write absorbs this one.
                let _ = write_tx.try_send(());
            }
        }
    }

    /// Drain, order, and append on demand or on the timer; one final drain
    /// at shutdown.
    fn run_writer(
        &self,
        mut writer: TranscriptWriter,
        write_rx: Receiver<()>,
        shutdown_rx: Receiver<()>,
    ) {
        let ticker = tick(Duration::from_secs_f64(self.config.batch_seconds));
        loop {
            select! {
                recv(write_rx) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                    self.write_pending(&mut writer);
                }
                recv(ticker) -> _ => self.write_pending(&mut writer),
                recv(shutdown_rx) -> _ => break,
            }
        }
        self.write_pending(&mut writer);
    }

    fn write_pending(&self, writer: &mut TranscriptWriter) {
        let batch = std::mem::take(&mut *lock(&self.segments));
        if batch.is_empty() {
            return;
        }
        writer.append_batch(batch);
        *lock(&self.last_write) = Instant::now();
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
