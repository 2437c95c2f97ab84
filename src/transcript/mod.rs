//! Transcript assembly: segment model, chronological ordering, file output,
//! and the per-source polling pipeline.

mod pipeline;
mod segment;
#[cfg(test)]
mod tests;
mod writer;

pub use pipeline::{TranscriptConfig, TranscriptPipeline};
pub use segment::{sort_chronologically, SegmentSource, TranscriptSegment};
pub use writer::{format_line, TranscriptWriter};
