//! Incremental RIFF/WAVE container writer.
//!
//! The output file grows while recording is still in progress: every flush
//! appends freshly mixed PCM at end-of-file and then patches the two size
//! fields in the header. A crash between append and patch leaves a header
//! that under-reports the payload, but the file stays parseable and the true
//! length is recoverable by rescanning the file itself.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fixed 44-byte canonical header: RIFF + fmt (16-byte PCM body) + data.
const HEADER_BYTES: u64 = 44;
/// Offset of the overall RIFF chunk size field.
const RIFF_SIZE_OFFSET: u64 = 4;
/// Offset of the data sub-chunk size field.
const DATA_SIZE_OFFSET: u64 = 40;

const BITS_PER_SAMPLE: u16 = 16;

/// A growing 16-bit PCM WAV file plus the running payload byte count that
/// backs the header size fields.
pub struct WavFile {
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    data_bytes: u64,
}

impl WavFile {
    /// Create the file and write a header declaring an empty data chunk.
    pub fn create(path: impl Into<PathBuf>, sample_rate: u32, channels: u16) -> Result<Self> {
        let path = path.into();
        let mut file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        write_header(&mut file, sample_rate, channels, 0)?;
        file.flush()?;
        Ok(Self {
            path,
            sample_rate,
            channels,
            data_bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload bytes committed so far (excludes the header).
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    /// Append samples as 16-bit LE PCM and patch the header sizes in place.
    ///
    /// Conversion is `round(sample * 32767)` with wrapping overflow for
    /// inputs outside [-1, 1]; out-of-range capture data is not clamped.
    /// Returns the number of payload bytes written.
    pub fn append(&mut self, samples: &[f32]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("failed to reopen {}", self.path.display()))?;
        file.seek(SeekFrom::End(0))?;

        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            let value = (sample * 32767.0).round() as i64 as i16;
            pcm.extend_from_slice(&value.to_le_bytes());
        }
        file.write_all(&pcm)
            .context("failed to append PCM data")?;
        self.data_bytes += pcm.len() as u64;

        // Not transactional: between the append above and the patch below the
        // header under-reports the payload size.
        patch_header_sizes(&mut file, self.data_bytes)?;
        Ok(pcm.len())
    }
}

fn write_header(file: &mut File, sample_rate: u32, channels: u16, data_bytes: u32) -> Result<()> {
    let channels = channels.max(1);
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    let mut header = Vec::with_capacity(HEADER_BYTES as usize);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(36 + data_bytes).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_bytes.to_le_bytes());
    file.write_all(&header).context("failed to write WAV header")
}

fn patch_header_sizes(file: &mut File, data_bytes: u64) -> Result<()> {
    let data_bytes = data_bytes as u32;
    file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
    file.write_all(&(36 + data_bytes).to_le_bytes())
        .context("failed to patch RIFF size")?;
    file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    file.write_all(&data_bytes.to_le_bytes())
        .context("failed to patch data chunk size")?;
    Ok(())
}

/// Session filename: `<base>_<YYYY_MM_DD_HH_MM_SS>.wav`.
pub fn timestamped_path(dir: &Path, base: &str, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.wav", base, at.format("%Y_%m_%d_%H_%M_%S")))
}

/// Segmented-output variant: `<base>_<YYYY_MM_DD_HH_MM_SS>_partNNN.wav`.
pub fn part_path(dir: &Path, base: &str, at: DateTime<Local>, part: u32) -> PathBuf {
    dir.join(format!(
        "{}_{}_part{part:03}.wav",
        base,
        at.format("%Y_%m_%d_%H_%M_%S")
    ))
}
