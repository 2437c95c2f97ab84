//! Command-line parsing and validation helpers.

mod validation;

use crate::audio::RecorderConfig;
use crate::transcript::TranscriptConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_CHANNELS: u16 = 1;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BATCH_SECONDS: f64 = 10.0;
/// Windows below this sample count are too short to transcribe usefully.
pub const DEFAULT_MIN_WINDOW_SAMPLES: usize = 1_000;

/// CLI options for the duorec session recorder.
#[derive(Debug, Parser, Clone)]
#[command(about = "Dual-stream session recorder with live transcription", author, version)]
pub struct AppConfig {
    /// Recording base name; timestamps are appended to it
    #[arg(long, default_value = "recording")]
    pub name: String,

    /// Directory recordings and transcripts are written to
    #[arg(long = "output-dir", env = "DUOREC_OUTPUT_DIR", default_value = "recordings")]
    pub output_dir: PathBuf,

    /// Audio sample rate in Hz
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Number of interleaved audio channels
    #[arg(long, default_value_t = DEFAULT_CHANNELS)]
    pub channels: u16,

    /// Seconds between incremental saves of the output file
    #[arg(long = "flush-interval-secs", default_value_t = DEFAULT_FLUSH_INTERVAL_SECS)]
    pub flush_interval_secs: u64,

    /// Preferred microphone device name
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Preferred loopback/monitor device name
    #[arg(long = "loopback-device")]
    pub loopback_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Path to a Whisper GGML model; transcription is enabled when set
    #[arg(long = "model-path", env = "DUOREC_MODEL_PATH")]
    pub model_path: Option<String>,

    /// Language hint passed to the speech engine ("auto" to detect)
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Seconds of audio per transcription window
    #[arg(long = "batch-seconds", default_value_t = DEFAULT_BATCH_SECONDS)]
    pub batch_seconds: f64,

    /// Disable the batch-relative offset annotation in transcript lines
    #[arg(long = "no-timestamps", default_value_t = false)]
    pub no_timestamps: bool,
}

impl AppConfig {
    /// Settings for the recording orchestrator.
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            output_dir: self.output_dir.clone(),
            base_name: self.name.clone(),
        }
    }

    /// Settings for the transcript pipeline.
    pub fn transcript_config(&self) -> TranscriptConfig {
        TranscriptConfig {
            batch_seconds: self.batch_seconds,
            min_window_samples: DEFAULT_MIN_WINDOW_SAMPLES,
            output_dir: self.output_dir.clone(),
            base_name: self.name.clone(),
            annotate_timestamps: !self.no_timestamps,
        }
    }
}
