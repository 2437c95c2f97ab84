//! Transcript file output: header, line formatting, and fsynced batch
//! appends.

use super::segment::{sort_chronologically, TranscriptSegment};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Appends ordered transcript lines to a UTF-8 text file.
pub struct TranscriptWriter {
    path: PathBuf,
    file: File,
    annotate_offsets: bool,
}

impl TranscriptWriter {
    /// Create the file and write the session header.
    pub fn create(
        path: impl Into<PathBuf>,
        session_name: &str,
        started_at: DateTime<Local>,
        model_name: &str,
        annotate_offsets: bool,
    ) -> Result<Self> {
        let path = path.into();
        let mut file = File::create(&path)
            .with_context(|| format!("failed to create transcript file {}", path.display()))?;
        write!(
            file,
            "Transcript: {}\nStarted: {}\nModel: {}\n\n",
            session_name,
            started_at.format("%Y_%m_%d_%H_%M_%S"),
            model_name
        )
        .context("failed to write transcript header")?;
        Ok(Self {
            path,
            file,
            annotate_offsets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sort a drained batch of segments, append them, and flush to stable
    /// storage. A single bad line is logged and skipped.
    pub fn append_batch(&mut self, mut segments: Vec<TranscriptSegment>) {
        if segments.is_empty() {
            return;
        }
        sort_chronologically(&mut segments);
        let count = segments.len();
        for segment in &segments {
            let line = format_line(segment, self.annotate_offsets);
            if let Err(err) = self.file.write_all(line.as_bytes()) {
                warn!(error = %err, "failed to write transcript line");
            }
        }
        if let Err(err) = self.file.sync_data() {
            warn!(error = %err, "failed to flush transcript to disk");
        }
        debug!(count, "wrote transcript segments");
    }

    /// Path for a new session: `<base>_transcript_<YYYY_MM_DD_HH_MM_SS>.txt`.
    pub fn timestamped_path(dir: &Path, base: &str, at: DateTime<Local>) -> PathBuf {
        dir.join(format!(
            "{}_transcript_{}.txt",
            base,
            at.format("%Y_%m_%d_%H_%M_%S")
        ))
    }
}

/// `[HH:MM:SS | SRC | +MM:SS] text` with the batch-relative offset only when
/// annotation is enabled, else `[HH:MM:SS | SRC] text`.
pub fn format_line(segment: &TranscriptSegment, annotate_offsets: bool) -> String {
    let clock = segment.captured_at.format("%H:%M:%S");
    let label = segment.source.label();
    if annotate_offsets {
        let offset = segment.start_secs.max(0.0) as u64;
        format!(
            "[{clock} | {label} | +{:02}:{:02}] {}\n",
            offset / 60,
            offset % 60,
            segment.text
        )
    } else {
        format!("[{clock} | {label}] {}\n", segment.text)
    }
}
