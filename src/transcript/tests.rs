use super::pipeline::{TranscriptConfig, TranscriptPipeline};
use super::segment::{sort_chronologically, SegmentSource, TranscriptSegment};
use super::writer::{format_line, TranscriptWriter};
use crate::audio::SampleBuffer;
use crate::stt::{EngineSegment, SpeechEngine};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn at(offset_ms: i64) -> DateTime<Local> {
    let base = Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    base + ChronoDuration::milliseconds(offset_ms)
}

fn segment(
    text: &str,
    start_secs: f64,
    source: SegmentSource,
    offset_ms: i64,
) -> TranscriptSegment {
    TranscriptSegment {
        text: text.to_owned(),
        start_secs,
        end_secs: start_secs + 1.0,
        source,
        captured_at: at(offset_ms),
    }
}

#[test]
fn segments_far_apart_order_by_capture_time() {
    let mut segments = vec![
        segment("second", 0.0, SegmentSource::Mic, 5_000),
        segment("first", 9.0, SegmentSource::Speaker, 0),
    ];
    sort_chronologically(&mut segments);
    assert_eq!(segments[0].text, "first");
    assert_eq!(segments[1].text, "second");
}

#[test]
fn near_simultaneous_segments_order_by_start_offset() {
    // 400ms apart by capture time, but the later-captured entry starts
    // earlier within its batch, so it reads first.
    let mut segments = vec![
        segment("later in batch", 3.5, SegmentSource::Mic, 0),
        segment("earlier in batch", 1.0, SegmentSource::Speaker, 400),
    ];
    sort_chronologically(&mut segments);
    assert_eq!(segments[0].text, "earlier in batch");
    assert_eq!(segments[1].text, "later in batch");
}

#[test]
fn format_line_includes_offset_when_annotated() {
    let entry = segment("hello there", 75.0, SegmentSource::Mic, 0);
    assert_eq!(
        format_line(&entry, true),
        "[09:30:00 | MIC | +01:15] hello there\n"
    );
    assert_eq!(format_line(&entry, false), "[09:30:00 | MIC] hello there\n");
}

#[test]
fn format_line_tags_speaker_source() {
    let entry = segment("playback", 0.0, SegmentSource::Speaker, 1_500);
    assert_eq!(format_line(&entry, false), "[09:30:01 | SPK] playback\n");
}

#[test]
fn writer_emits_header_and_ordered_lines() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.txt");
    let mut writer =
        TranscriptWriter::create(&path, "standup", at(0), "ggml-base.bin", false)
            .expect("create writer");
    writer.append_batch(vec![
        segment("b", 0.0, SegmentSource::Mic, 10_000),
        segment("a", 0.0, SegmentSource::Speaker, 0),
    ]);

    let contents = std::fs::read_to_string(&path).expect("read transcript");
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("Transcript: standup"));
    assert_eq!(lines.next(), Some("Started: 2024_03_01_09_30_00"));
    assert_eq!(lines.next(), Some("Model: ggml-base.bin"));
    assert_eq!(lines.next(), Some(""));
    assert_eq!(lines.next(), Some("[09:30:00 | SPK] a"));
    assert_eq!(lines.next(), Some("[09:30:10 | MIC] b"));
    assert_eq!(lines.next(), None);
}

/// Scripted engine: returns a fixed set of segments on every call.
struct ScriptedEngine {
    segments: Vec<EngineSegment>,
    calls: Arc<Mutex<usize>>,
}

impl SpeechEngine for ScriptedEngine {
    fn transcribe(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<EngineSegment>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.segments.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn pipeline_config(dir: &std::path::Path) -> TranscriptConfig {
    TranscriptConfig {
        batch_seconds: 1.0,
        min_window_samples: 10,
        output_dir: dir.to_path_buf(),
        base_name: "test".into(),
        annotate_timestamps: false,
    }
}

#[test]
fn pipeline_transcribes_pending_audio_and_writes_on_stop() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mic = Arc::new(SampleBuffer::new(16_000, 1));
    let speaker = Arc::new(SampleBuffer::new(16_000, 1));
    mic.push(&vec![0.1f32; 16_000], Local::now());

    let calls = Arc::new(Mutex::new(0));
    let engine: Arc<Mutex<dyn SpeechEngine>> = Arc::new(Mutex::new(ScriptedEngine {
        segments: vec![
            EngineSegment {
                text: "hello from the mic".into(),
                start_cs: 0,
                end_cs: 150,
            },
            // Blank results are discarded before storage.
            EngineSegment {
                text: "   ".into(),
                start_cs: 150,
                end_cs: 200,
            },
        ],
        calls: Arc::clone(&calls),
    }));

    let pipeline = Arc::new(TranscriptPipeline::new(pipeline_config(dir.path())));
    pipeline
        .start(engine, Arc::clone(&mic), Arc::clone(&speaker))
        .expect("start pipeline");
    // Mic polls at half the batch interval; give it time for one pass.
    std::thread::sleep(Duration::from_millis(1_200));
    pipeline.stop().expect("stop pipeline");

    assert!(*calls.lock().unwrap() >= 1);
    // The recording path still owns the audio: peeks must not drain.
    assert_eq!(mic.len(), 16_000);
    // The final drain leaves nothing behind.
    assert_eq!(pipeline.pending_segments(), 0);

    let path = pipeline.transcript_path().expect("transcript path");
    let contents = std::fs::read_to_string(path).expect("read transcript");
    assert!(contents.contains("Model: scripted"));
    assert!(contents.contains("| MIC] hello from the mic"));
    let body: Vec<&str> = contents.lines().skip(4).collect();
    assert!(!body.is_empty());
    assert!(
        body.iter().all(|line| line.contains("hello from the mic")),
        "blank segments must be dropped, got {body:?}"
    );
}

#[test]
fn pipeline_skips_windows_below_minimum() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mic = Arc::new(SampleBuffer::new(16_000, 1));
    let speaker = Arc::new(SampleBuffer::new(16_000, 1));
    // Below the minimum window: the engine must never run.
    mic.push(&[0.1f32; 5], Local::now());

    let calls = Arc::new(Mutex::new(0));
    let engine: Arc<Mutex<dyn SpeechEngine>> = Arc::new(Mutex::new(ScriptedEngine {
        segments: Vec::new(),
        calls: Arc::clone(&calls),
    }));

    let mut config = pipeline_config(dir.path());
    config.min_window_samples = 1_000;
    let pipeline = Arc::new(TranscriptPipeline::new(config));
    pipeline
        .start(engine, mic, speaker)
        .expect("start pipeline");
    std::thread::sleep(Duration::from_millis(1_200));
    pipeline.stop().expect("stop pipeline");

    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn pipeline_stop_is_idempotent() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pipeline = Arc::new(TranscriptPipeline::new(pipeline_config(dir.path())));
    // Never started: stop is an Ok no-op.
    pipeline.stop().expect("stop without start");

    let engine: Arc<Mutex<dyn SpeechEngine>> = Arc::new(Mutex::new(ScriptedEngine {
        segments: Vec::new(),
        calls: Arc::new(Mutex::new(0)),
    }));
    let mic = Arc::new(SampleBuffer::new(16_000, 1));
    let speaker = Arc::new(SampleBuffer::new(16_000, 1));
    pipeline
        .start(engine, mic, speaker)
        .expect("start pipeline");
    pipeline.stop().expect("first stop");
    pipeline.stop().expect("second stop");
}
