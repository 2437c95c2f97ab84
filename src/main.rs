//! CLI entry point: wires the capture streams, the recorder, and (when a
//! model is configured) the transcript pipeline, then records until the user
//! presses Enter.

use anyhow::{Context, Result};
use duorec::audio::{self, SessionRecorder};
use duorec::config::AppConfig;
use duorec::stt::{SpeechEngine, WhisperEngine};
use duorec::transcript::TranscriptPipeline;
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    duorec::telemetry::init_tracing();

    if config.list_input_devices {
        match audio::list_input_devices() {
            Ok(names) if names.is_empty() => println!("No audio input devices found."),
            Ok(names) => {
                println!("Audio input devices:");
                for name in names {
                    println!("  {name}");
                }
            }
            Err(err) => println!("Failed to list audio input devices: {err:#}"),
        }
        return Ok(());
    }

    let recorder = Arc::new(SessionRecorder::new(config.recorder_config()));
    recorder.start()?;

    let streams = match audio::start_capture(
        &recorder,
        config.input_device.as_deref(),
        config.loopback_device.as_deref(),
    ) {
        Ok(streams) => streams,
        Err(err) => {
            // Mic failure is fatal; make sure the file is finalized first.
            let _ = recorder.stop();
            return Err(err);
        }
    };
    if !streams.loopback_active() {
        warn!("no loopback source; only the microphone is being recorded");
    }

    let pipeline = match config.model_path.as_deref() {
        Some(model_path) => match start_transcription(&config, model_path, &recorder) {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                // Finalize the recording before bailing out.
                let _ = recorder.stop();
                return Err(err);
            }
        },
        None => None,
    };

    println!("Recording to {}", recorder.output_path().display());
    if let Some(pipeline) = &pipeline {
        if let Some(path) = pipeline.transcript_path() {
            println!("Transcribing to {}", path.display());
        }
    }
    println!("Press Enter to stop.");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);

    drop(streams);
    if let Some(pipeline) = pipeline {
        pipeline.stop()?;
    }
    recorder.stop()?;

    info!(
        path = %recorder.output_path().display(),
        bytes = recorder.bytes_written(),
        "session finished"
    );
    println!("Saved {}", recorder.output_path().display());
    Ok(())
}

fn start_transcription(
    config: &AppConfig,
    model_path: &str,
    recorder: &Arc<SessionRecorder>,
) -> Result<Arc<TranscriptPipeline>> {
    let engine = WhisperEngine::load(model_path, config.language_hint())
        .context("failed to load speech model")?;
    let engine: Arc<Mutex<dyn SpeechEngine>> = Arc::new(Mutex::new(engine));
    let pipeline = Arc::new(TranscriptPipeline::new(config.transcript_config()));
    pipeline.start(engine, recorder.mic_buffer(), recorder.speaker_buffer())?;
    Ok(pipeline)
}
