use super::buffer::SampleBuffer;
use super::capture::format_supported;
use super::mixer::{mix_positional, mix_time_synced};
use super::recorder::{RecorderConfig, RecorderPhase, SessionRecorder};
use super::wav::{part_path, timestamped_path, WavFile};
use super::{decode_f32_frames, SampleBatch};
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: u32 = 16_000;

fn at(offset_ms: i64) -> DateTime<Local> {
    let base = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    base + ChronoDuration::milliseconds(offset_ms)
}

fn batch(samples: &[f32], offset_ms: i64) -> Option<SampleBatch> {
    Some(SampleBatch {
        samples: samples.to_vec(),
        started_at: at(offset_ms),
    })
}

#[test]
fn buffer_drain_returns_pushes_in_arrival_order() {
    let buffer = SampleBuffer::new(SAMPLE_RATE, 1);
    buffer.push(&[0.1, 0.2], at(0));
    buffer.push(&[0.3], at(5));
    buffer.push(&[0.4, 0.5], at(10));

    let drained = buffer.drain_all().expect("buffer should have samples");
    assert_eq!(drained.samples, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    assert_eq!(drained.started_at, at(0));
    assert!(buffer.is_empty());
    assert_eq!(buffer.len(), 0);
}

#[test]
fn buffer_drain_of_empty_buffer_is_none() {
    let buffer = SampleBuffer::new(SAMPLE_RATE, 1);
    assert!(buffer.drain_all().is_none());
}

#[test]
fn buffer_keeps_batch_start_timestamp_until_drained() {
    let buffer = SampleBuffer::new(SAMPLE_RATE, 1);
    buffer.push(&[0.1], at(0));
    buffer.push(&[0.2], at(500));

    let first = buffer.drain_all().expect("first batch");
    assert_eq!(first.started_at, at(0));

    // After the drain the next push restarts the reference clock.
    buffer.push(&[0.3], at(700));
    let second = buffer.drain_all().expect("second batch");
    assert_eq!(second.started_at, at(700));
}

#[test]
fn buffer_peek_tail_leaves_samples_in_place() {
    let buffer = SampleBuffer::new(SAMPLE_RATE, 1);
    let samples: Vec<f32> = (0..32_000).map(|i| i as f32 / 32_000.0).collect();
    buffer.push(&samples, at(0));

    let window = buffer.peek_tail(1.0).expect("peek window");
    assert_eq!(window.samples.len(), 16_000);
    assert_eq!(window.samples[0], samples[16_000]);
    // One second of the two was skipped, so the window starts 1000ms later.
    assert_eq!(window.started_at, at(1000));
    assert_eq!(buffer.len(), 32_000);
}

#[test]
fn buffer_peek_tail_shorter_than_window_returns_everything() {
    let buffer = SampleBuffer::new(SAMPLE_RATE, 1);
    buffer.push(&[0.1, 0.2, 0.3], at(0));

    let window = buffer.peek_tail(1.0).expect("peek window");
    assert_eq!(window.samples, vec![0.1, 0.2, 0.3]);
    assert_eq!(window.started_at, at(0));
}

#[test]
fn mixer_identity_with_one_empty_input() {
    let b = batch(&[0.5, -0.5], 100);
    assert_eq!(mix_time_synced(None, b.clone(), SAMPLE_RATE, 1), b);
    assert_eq!(mix_time_synced(b.clone(), None, SAMPLE_RATE, 1), b);
    assert_eq!(mix_time_synced(None, None, SAMPLE_RATE, 1), None);
}

#[test]
fn mixer_offset_places_later_batch_correctly() {
    // 250ms at 16kHz mono => 4000 samples of lead-in.
    let reference = vec![0.2f32; 16_000];
    let later = vec![0.6f32; 16_000];
    let mixed = mix_time_synced(
        batch(&reference, 0),
        batch(&later, 250),
        SAMPLE_RATE,
        1,
    )
    .expect("mixed batch");

    assert_eq!(mixed.samples.len(), 20_000);
    assert_eq!(mixed.started_at, at(0));
    // Lead-in is the reference verbatim.
    for &sample in &mixed.samples[..4_000] {
        assert_eq!(sample, 0.2);
    }
    // Overlap region averages 50/50.
    for &sample in &mixed.samples[4_000..16_000] {
        assert!((sample - 0.4).abs() < 1e-6);
    }
    // Tail is the later batch verbatim.
    for &sample in &mixed.samples[16_000..] {
        assert_eq!(sample, 0.6);
    }
}

#[test]
fn mixer_orders_by_timestamp_not_argument_position() {
    let early = vec![0.2f32; 8_000];
    let late = vec![0.6f32; 8_000];
    let forward = mix_time_synced(batch(&early, 0), batch(&late, 100), SAMPLE_RATE, 1)
        .expect("forward mix");
    let swapped = mix_time_synced(batch(&late, 100), batch(&early, 0), SAMPLE_RATE, 1)
        .expect("swapped mix");
    assert_eq!(forward, swapped);
}

#[test]
fn mixer_accounts_for_channel_count_in_offset() {
    let reference = vec![0.0f32; 1_000];
    let later = vec![1.0f32; 100];
    // 10ms at 16kHz stereo => 320 interleaved samples.
    let mixed = mix_time_synced(batch(&reference, 0), batch(&later, 10), SAMPLE_RATE, 2)
        .expect("mixed batch");
    assert_eq!(mixed.samples[319], 0.0);
    assert!((mixed.samples[320] - 0.5).abs() < 1e-6);
}

#[test]
fn mixer_simultaneous_batches_average_in_place() {
    let mixed = mix_time_synced(
        batch(&[0.2, 0.4, 0.6], 0),
        batch(&[0.4, 0.0], 0),
        SAMPLE_RATE,
        1,
    )
    .expect("mixed batch");
    assert!((mixed.samples[0] - 0.3).abs() < 1e-6);
    assert!((mixed.samples[1] - 0.2).abs() < 1e-6);
    // Only the longer input has a third sample; it passes through.
    assert!((mixed.samples[2] - 0.6).abs() < 1e-6);
}

#[test]
fn positional_mix_handles_empty_inputs() {
    assert_eq!(mix_positional(&[], &[0.1, 0.2]), vec![0.1, 0.2]);
    assert_eq!(mix_positional(&[0.1, 0.2], &[]), vec![0.1, 0.2]);
}

#[test]
fn capture_format_requires_exact_channels_and_rate_in_range() {
    assert!(format_supported(16_000, 1, 1, 8_000, 48_000));
    // Endpoints of the advertised range are usable.
    assert!(format_supported(8_000, 1, 1, 8_000, 48_000));
    assert!(format_supported(48_000, 1, 1, 8_000, 48_000));
    // A stereo-only device cannot serve a mono session.
    assert!(!format_supported(16_000, 1, 2, 8_000, 48_000));
    assert!(!format_supported(96_000, 1, 1, 8_000, 48_000));
}

#[test]
fn decode_f32_frames_reads_little_endian() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0.5f32.to_le_bytes());
    bytes.extend_from_slice(&(-0.25f32).to_le_bytes());
    let samples = decode_f32_frames(&bytes, 2, 1);
    assert_eq!(samples, vec![0.5, -0.25]);
}

#[test]
fn decode_f32_frames_respects_frame_count() {
    let mut bytes = Vec::new();
    for value in [0.1f32, 0.2, 0.3, 0.4] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    // One stereo frame wanted: two samples.
    let samples = decode_f32_frames(&bytes, 1, 2);
    assert_eq!(samples.len(), 2);
}

#[test]
fn wav_header_tracks_appended_payload() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("take.wav");
    let mut wav = WavFile::create(&path, SAMPLE_RATE, 1).expect("create wav");

    wav.append(&vec![0.5f32; 1_000]).expect("first append");
    wav.append(&vec![-0.5f32; 500]).expect("second append");
    assert_eq!(wav.data_bytes(), 3_000);

    let bytes = std::fs::read(&path).expect("read wav");
    assert_eq!(bytes.len(), 44 + 3_000);
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    let riff_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let data_size = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
    assert_eq!(riff_size, 36 + 3_000);
    assert_eq!(data_size, 3_000);
}

#[test]
fn wav_output_round_trips_through_hound() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("take.wav");
    let mut wav = WavFile::create(&path, SAMPLE_RATE, 1).expect("create wav");
    wav.append(&[0.0, 0.5, -0.5, 1.0]).expect("append");

    let mut reader = hound::WavReader::open(&path).expect("open with hound");
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, vec![0, 16_384, -16_384, 32_767]);
}

#[test]
fn wav_append_of_nothing_is_a_no_op() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("take.wav");
    let mut wav = WavFile::create(&path, SAMPLE_RATE, 1).expect("create wav");
    assert_eq!(wav.append(&[]).expect("empty append"), 0);
    assert_eq!(std::fs::read(&path).expect("read wav").len(), 44);
}

#[test]
fn filenames_follow_the_session_pattern() {
    let stamp = at(0);
    let dir = std::path::Path::new("/tmp/out");
    assert_eq!(
        timestamped_path(dir, "standup", stamp),
        dir.join("standup_2024_03_01_12_00_00.wav")
    );
    assert_eq!(
        part_path(dir, "standup", stamp, 7),
        dir.join("standup_2024_03_01_12_00_00_part007.wav")
    );
}

fn test_recorder(dir: &std::path::Path) -> Arc<SessionRecorder> {
    Arc::new(SessionRecorder::new(RecorderConfig {
        sample_rate: SAMPLE_RATE,
        channels: 1,
        // Long interval: tests trigger flushes through stop's terminal drain.
        flush_interval: Duration::from_secs(60),
        output_dir: dir.to_path_buf(),
        base_name: "test".into(),
    }))
}

#[test]
fn recorder_session_persists_mixed_audio() {
    let dir = tempfile::tempdir().expect("temp dir");
    let recorder = test_recorder(dir.path());
    recorder.start().expect("start");
    assert!(recorder.is_recording());

    recorder.add_mic_samples(&vec![0.25f32; 2_000], at(0));
    recorder.add_speaker_samples(&vec![0.75f32; 2_000], at(0));
    recorder.stop().expect("stop");

    assert_eq!(recorder.phase(), RecorderPhase::Idle);
    // Simultaneous batches average in place: 2000 samples, 4000 bytes.
    assert_eq!(recorder.bytes_written(), 4_000);
    let bytes = std::fs::read(recorder.output_path()).expect("read wav");
    assert_eq!(bytes.len(), 44 + 4_000);
    let data_size = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
    assert_eq!(data_size, 4_000);
}

#[test]
fn recorder_stop_persists_audio_accepted_during_active_flushes() {
    // Short interval plus steady pushes keeps the writer busy with scheduled
    // flushes, so the stop request regularly lands while one is in flight.
    for _ in 0..20 {
        let dir = tempfile::tempdir().expect("temp dir");
        let recorder = Arc::new(SessionRecorder::new(RecorderConfig {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            flush_interval: Duration::from_millis(5),
            output_dir: dir.path().to_path_buf(),
            base_name: "test".into(),
        }));
        recorder.start().expect("start");

        let mut pushed = 0u64;
        for _ in 0..12 {
            recorder.add_mic_samples(&vec![0.1f32; 16_000], Local::now());
            pushed += 16_000;
            std::thread::sleep(Duration::from_millis(2));
        }
        recorder.add_mic_samples(&vec![0.1f32; 16_000], Local::now());
        pushed += 16_000;
        recorder.stop().expect("stop");

        assert!(
            recorder.mic_buffer().is_empty(),
            "terminal flush left samples behind"
        );
        assert_eq!(recorder.bytes_written(), pushed * 2);
        let bytes = std::fs::read(recorder.output_path()).expect("read wav");
        assert_eq!(bytes.len() as u64, 44 + pushed * 2);
    }
}

#[test]
fn recorder_stop_is_idempotent() {
    let dir = tempfile::tempdir().expect("temp dir");
    let recorder = test_recorder(dir.path());
    recorder.start().expect("start");
    recorder.add_mic_samples(&[0.5; 100], at(0));
    recorder.stop().expect("first stop");
    let bytes_after_first = recorder.bytes_written();
    recorder.stop().expect("second stop");
    assert_eq!(recorder.bytes_written(), bytes_after_first);
    assert_eq!(recorder.phase(), RecorderPhase::Idle);
}

#[test]
fn recorder_ignores_samples_when_not_recording() {
    let dir = tempfile::tempdir().expect("temp dir");
    let recorder = test_recorder(dir.path());
    recorder.add_mic_samples(&[0.5; 100], at(0));
    assert!(recorder.mic_buffer().is_empty());

    recorder.start().expect("start");
    recorder.stop().expect("stop");
    recorder.add_speaker_samples(&[0.5; 100], at(0));
    assert!(recorder.speaker_buffer().is_empty());
}

#[test]
fn recorder_rejects_double_start() {
    let dir = tempfile::tempdir().expect("temp dir");
    let recorder = test_recorder(dir.path());
    recorder.start().expect("first start");
    assert!(recorder.start().is_err());
    recorder.stop().expect("stop");
}

#[test]
fn recorder_records_session_start_instant() {
    let dir = tempfile::tempdir().expect("temp dir");
    let recorder = test_recorder(dir.path());
    assert!(recorder.started_at().is_none());
    assert_eq!(recorder.duration(), Duration::ZERO);
    recorder.start().expect("start");
    assert!(recorder.started_at().is_some());
    assert!(recorder.duration() < Duration::from_secs(5));
    recorder.stop().expect("stop");
}
