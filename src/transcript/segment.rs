//! Transcript segments and the two-level chronological ordering.

use chrono::{DateTime, Local};
use std::cmp::Ordering;

/// Which stream a segment was recognized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSource {
    Mic,
    Speaker,
}

impl SegmentSource {
    /// Tag used in transcript lines.
    pub fn label(self) -> &'static str {
        match self {
            SegmentSource::Mic => "MIC",
            SegmentSource::Speaker => "SPK",
        }
    }
}

/// One recognized line of speech waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    /// Offset of the span within its batch, in seconds.
    pub start_secs: f64,
    pub end_secs: f64,
    pub source: SegmentSource,
    /// Wall-clock instant the batch was captured.
    pub captured_at: DateTime<Local>,
}

/// Window inside which two segments count as simultaneous and fall back to
/// batch-relative ordering.
const NEAR_SIMULTANEOUS_MS: i64 = 1000;

/// Sort segments for output: capture timestamp first, but entries captured
/// within a second of each other order by their batch-relative start offset
/// so near-simultaneous mic/speaker lines keep a natural reading order.
pub fn sort_chronologically(segments: &mut [TranscriptSegment]) {
    segments.sort_by(compare_segments);
}

fn compare_segments(a: &TranscriptSegment, b: &TranscriptSegment) -> Ordering {
    let delta_ms = a
        .captured_at
        .signed_duration_since(b.captured_at)
        .num_milliseconds();
    if delta_ms.abs() < NEAR_SIMULTANEOUS_MS {
        a.start_secs
            .partial_cmp(&b.start_secs)
            .unwrap_or(Ordering::Equal)
    } else {
        a.captured_at.cmp(&b.captured_at)
    }
}
