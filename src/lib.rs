pub mod audio;
pub mod config;
pub mod stt;
pub mod telemetry;
pub mod transcript;

pub use audio::{SampleBatch, SampleBuffer, SessionRecorder};
pub use stt::{EngineSegment, SpeechEngine, WhisperEngine};
pub use transcript::{TranscriptPipeline, TranscriptSegment};
