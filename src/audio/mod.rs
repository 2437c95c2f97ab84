//! Audio core: accumulation buffers, timestamp-based mixing, the incremental
//! WAV writer, the recording orchestrator, and the CPAL capture adapter.
//!
//! Capture callbacks append into per-stream [`SampleBuffer`]s; a single
//! writer thread owned by [`SessionRecorder`] mixes and persists them.

mod buffer;
mod capture;
mod mixer;
mod recorder;
#[cfg(test)]
mod tests;
mod wav;

pub use buffer::{SampleBatch, SampleBuffer};
pub use capture::{
    decode_f32_frames, list_input_devices, start_capture, CaptureStreams, StreamKind,
};
pub use mixer::{mix_positional, mix_time_synced};
pub use recorder::{RecorderConfig, RecorderPhase, SessionRecorder};
pub use wav::{part_path, timestamped_path, WavFile};
