//! Timestamp-based mixing of two independently captured streams.
//!
//! The mic and loopback callbacks run on separate hardware threads, so their
//! batches start at different wall-clock instants. Mixing converts that start
//! delay into a sample-frame offset and overlays the later batch at the right
//! position. Each call corrects one offset from its own two inputs only; no
//! cumulative drift is tracked across a session.

use super::buffer::SampleBatch;

/// Merge two drained batches into one time-aligned batch.
///
/// Returns the surviving input unchanged when the other is absent, otherwise
/// a batch stamped with the earlier of the two start timestamps.
pub fn mix_time_synced(
    a: Option<SampleBatch>,
    b: Option<SampleBatch>,
    sample_rate: u32,
    channels: u16,
) -> Option<SampleBatch> {
    let (a, b) = match (a, b) {
        (None, None) => return None,
        (Some(a), None) => return Some(a),
        (None, Some(b)) => return Some(b),
        (Some(a), Some(b)) => (a, b),
    };

    // The batch that started earlier is copied verbatim as the reference.
    let (reference, later) = if a.started_at <= b.started_at {
        (a, b)
    } else {
        (b, a)
    };

    let delay_ms = later
        .started_at
        .signed_duration_since(reference.started_at)
        .num_milliseconds();
    let offset = delay_ms * i64::from(sample_rate) * i64::from(channels) / 1000;

    // Effectively simultaneous starts (or clock skew): position-aligned mix.
    if offset <= 0 {
        return Some(SampleBatch {
            samples: mix_positional(&reference.samples, &later.samples),
            started_at: reference.started_at,
        });
    }
    let offset = offset as usize;

    let total = reference.samples.len().max(offset + later.samples.len());
    let mut mixed = vec![0.0f32; total];
    mixed[..reference.samples.len()].copy_from_slice(&reference.samples);
    for (i, sample) in later.samples.iter().enumerate() {
        let pos = offset + i;
        if pos < reference.samples.len() {
            mixed[pos] = (mixed[pos] + sample) * 0.5;
        } else {
            mixed[pos] = *sample;
        }
    }

    Some(SampleBatch {
        samples: mixed,
        started_at: reference.started_at,
    })
}

/// Naive 50/50 mix with no offset: average where both streams have a sample,
/// pass through where only one does.
pub fn mix_positional(a: &[f32], b: &[f32]) -> Vec<f32> {
    if a.is_empty() {
        return b.to_vec();
    }
    if b.is_empty() {
        return a.to_vec();
    }
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut mixed = longer.to_vec();
    for (dst, src) in mixed.iter_mut().zip(shorter.iter()) {
        *dst = (*dst + src) * 0.5;
    }
    mixed
}
