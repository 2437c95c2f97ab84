//! Capture-source adapter over CPAL.
//!
//! Builds input streams for the microphone and (where the platform exposes
//! one as an input, e.g. a PulseAudio/PipeWire monitor) the system-output
//! loopback. Every callback converts the native sample format to f32, stamps
//! the batch with its wall-clock arrival time, and hands it straight to the
//! recorder; no work beyond the buffer append happens on the audio thread.

use super::recorder::SessionRecorder;
use anyhow::{anyhow, Context, Result};
use chrono::Local;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which recorder entry point a stream feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Mic,
    Loopback,
}

impl StreamKind {
    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Mic => "mic",
            StreamKind::Loopback => "loopback",
        }
    }
}

/// Live input streams; dropping this stops capture.
pub struct CaptureStreams {
    _mic: cpal::Stream,
    _loopback: Option<cpal::Stream>,
    loopback_active: bool,
}

impl CaptureStreams {
    /// True when the session records both streams rather than mic only.
    pub fn loopback_active(&self) -> bool {
        self.loopback_active
    }
}

/// Decode a raw capture-source byte buffer: interleaved little-endian 32-bit
/// floats, `frame_count` frames of `channels` samples each.
pub fn decode_f32_frames(bytes: &[u8], frame_count: usize, channels: u16) -> Vec<f32> {
    let wanted = frame_count.saturating_mul(usize::from(channels.max(1)));
    bytes
        .chunks_exact(4)
        .take(wanted)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// List input device names so the CLI can expose a selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Open both capture streams and start feeding the recorder.
///
/// A mic failure aborts startup; a loopback failure degrades to mic-only
/// operation so the session still records.
pub fn start_capture(
    recorder: &Arc<SessionRecorder>,
    mic_device: Option<&str>,
    loopback_device: Option<&str>,
) -> Result<CaptureStreams> {
    let sample_rate = recorder.sample_rate();
    let channels = recorder.channels();
    let mic = {
        let device = open_input_device(mic_device).context("failed to open microphone")?;
        let recorder = Arc::clone(recorder);
        let stream = build_input_stream(
            &device,
            StreamKind::Mic,
            sample_rate,
            channels,
            move |samples, arrived_at| {
                recorder.add_mic_samples(samples, arrived_at);
            },
        )?;
        stream.play().context("failed to start microphone stream")?;
        stream
    };

    let loopback = match open_loopback_stream(recorder, loopback_device) {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "loopback unavailable; recording mic only");
            None
        }
    };
    let loopback_active = loopback.is_some();

    Ok(CaptureStreams {
        _mic: mic,
        _loopback: loopback,
        loopback_active,
    })
}

fn open_loopback_stream(
    recorder: &Arc<SessionRecorder>,
    loopback_device: Option<&str>,
) -> Result<cpal::Stream> {
    let device = open_loopback_device(loopback_device)?;
    let sample_rate = recorder.sample_rate();
    let channels = recorder.channels();
    let recorder = Arc::clone(recorder);
    let stream = build_input_stream(
        &device,
        StreamKind::Loopback,
        sample_rate,
        channels,
        move |samples, arrived_at| {
            recorder.add_speaker_samples(samples, arrived_at);
        },
    )?;
    stream.play().context("failed to start loopback stream")?;
    Ok(stream)
}

/// Pick a capture device by name, or the host default.
fn open_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host.input_devices().context("no input devices available")?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{name}' not found"))
        }
        None => host
            .default_input_device()
            .context("no default input device available"),
    }
}

/// Loopback shows up as a regular input on hosts that expose monitor
/// sources; match the given name, or fall back to the first device that
/// looks like a monitor.
fn open_loopback_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    let mut fallback = None;
    for device in devices {
        let Ok(name) = device.name() else { continue };
        match preferred {
            Some(wanted) if name == wanted => return Ok(device),
            Some(_) => {}
            None => {
                if name.to_ascii_lowercase().contains("monitor") && fallback.is_none() {
                    fallback = Some(device);
                }
            }
        }
    }
    match preferred {
        Some(name) => Err(anyhow!("loopback device '{name}' not found")),
        None => fallback.ok_or_else(|| anyhow!("no monitor/loopback input device found")),
    }
}

/// True when a device-reported capture range covers the requested format.
///
/// Channel count must match exactly; the rate only has to fall inside the
/// advertised range.
pub(crate) fn format_supported(
    wanted_rate: u32,
    wanted_channels: u16,
    range_channels: u16,
    min_rate: u32,
    max_rate: u32,
) -> bool {
    range_channels == wanted_channels && (min_rate..=max_rate).contains(&wanted_rate)
}

/// Resolve a stream config at the session's exact rate and channel count.
///
/// The buffers, mixer offset math, and WAV header all assume this format, so
/// a device that cannot deliver it is an error rather than a silent fallback
/// to its native rate.
fn find_input_config(
    device: &cpal::Device,
    kind: StreamKind,
    sample_rate: u32,
    channels: u16,
) -> Result<(SampleFormat, StreamConfig)> {
    let ranges = device
        .supported_input_configs()
        .with_context(|| format!("failed to query {} device capabilities", kind.label()))?;
    for range in ranges {
        if format_supported(
            sample_rate,
            channels,
            range.channels(),
            range.min_sample_rate().0,
            range.max_sample_rate().0,
        ) {
            let config = range.with_sample_rate(SampleRate(sample_rate));
            let format = config.sample_format();
            return Ok((format, config.into()));
        }
    }
    Err(anyhow!(
        "{} device does not support {sample_rate} Hz {channels}-channel capture",
        kind.label()
    ))
}

/// Build an input stream at the session format, normalizing the device's
/// sample type to f32 and stamping each callback with its arrival time.
fn build_input_stream(
    device: &cpal::Device,
    kind: StreamKind,
    sample_rate: u32,
    channels: u16,
    push: impl Fn(&[f32], chrono::DateTime<Local>) + Send + 'static,
) -> Result<cpal::Stream> {
    let (format, stream_config) = find_input_config(device, kind, sample_rate, channels)?;
    debug!(
        kind = kind.label(),
        ?format,
        sample_rate = stream_config.sample_rate.0,
        channels = stream_config.channels,
        "opening capture stream"
    );

    let err_fn = move |err| warn!(kind = kind.label(), error = %err, "audio stream error");

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| push(data, Local::now()),
            err_fn,
            None,
        )?,
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|s| f32::from(*s) / 32_768.0));
                    push(&scratch, Local::now());
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[u16], _| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|s| (f32::from(*s) - 32_768.0) / 32_768.0));
                    push(&scratch, Local::now());
                },
                err_fn,
                None,
            )?
        }
        other => return Err(anyhow!("unsupported sample format: {other:?}")),
    };
    Ok(stream)
}
