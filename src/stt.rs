//! Speech-engine seam and the Whisper implementation.
//!
//! The transcript pipeline talks to [`SpeechEngine`] so tests can substitute
//! a scripted engine. The real engine wraps `whisper_rs`; the model is loaded
//! once and reused for every window.

use anyhow::Result;

/// One recognized span, batch-relative, in hundredths of a second (the unit
/// whisper.cpp reports t0/t1 in).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSegment {
    pub text: String,
    pub start_cs: i64,
    pub end_cs: i64,
}

/// Converts a batch of samples into zero or more timestamped text segments.
pub trait SpeechEngine: Send {
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<EngineSegment>>;

    /// Identifier written into the transcript file header.
    fn model_name(&self) -> &str;
}

#[cfg(unix)]
mod platform {
    use super::EngineSegment;
    use anyhow::{anyhow, Context, Result};
    use std::io;
    use std::os::raw::{c_char, c_uint, c_void};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::sync::Once;
    use tracing::debug;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Whisper model context. Create once at startup and share behind a
    /// mutex; transcription state is created per call.
    pub struct WhisperEngine {
        ctx: WhisperContext,
        language: Option<String>,
        model_name: String,
    }

    impl WhisperEngine {
        /// Loads the GGML model from disk.
        ///
        /// Stderr is redirected to `/dev/null` while the model loads because
        /// whisper.cpp emits verbose initialization messages.
        pub fn load(model_path: &str, language: Option<&str>) -> Result<Self> {
            install_whisper_log_silencer();

            let null = std::fs::OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .context("failed to open /dev/null")?;
            let null_fd = null.as_raw_fd();

            // SAFETY: dup(2) duplicates the stderr file descriptor and we
            // restore it before returning. We hold the only reference.
            let orig_stderr = unsafe { libc::dup(2) };
            if orig_stderr < 0 {
                return Err(anyhow!(
                    "failed to dup stderr: {}",
                    io::Error::last_os_error()
                ));
            }
            let dup_result = unsafe { libc::dup2(null_fd, 2) };
            if dup_result < 0 {
                unsafe {
                    libc::close(orig_stderr);
                }
                return Err(anyhow!(
                    "failed to redirect stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx_result =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default());

            let restore_result = unsafe { libc::dup2(orig_stderr, 2) };
            unsafe {
                libc::close(orig_stderr);
            }
            if restore_result < 0 {
                return Err(anyhow!(
                    "failed to restore stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx = ctx_result.context("failed to load whisper model")?;
            let model_name = Path::new(model_path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| model_path.to_string());
            Ok(Self {
                ctx,
                language: language.map(str::to_owned),
                model_name,
            })
        }
    }

    impl super::SpeechEngine for WhisperEngine {
        fn transcribe(
            &mut self,
            samples: &[f32],
            _sample_rate: u32,
        ) -> Result<Vec<EngineSegment>> {
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            match self.language.as_deref() {
                Some(lang) if !lang.eq_ignore_ascii_case("auto") => {
                    params.set_language(Some(lang));
                    params.set_detect_language(false);
                }
                _ => {
                    params.set_language(None);
                    params.set_detect_language(true);
                }
            }
            // Limit CPU usage so the capture threads are never starved.
            params.set_n_threads(num_cpus::get().min(8) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);
            state.full(params, samples)?;

            let count = match state.full_n_segments() {
                Ok(count) if count >= 0 => count,
                Ok(_) | Err(_) => {
                    debug!("whisper returned no readable segments");
                    return Ok(Vec::new());
                }
            };
            let mut segments = Vec::with_capacity(count as usize);
            for i in 0..count {
                let text = match state.full_get_segment_text_lossy(i) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!(segment = i, error = %err, "failed to read whisper segment");
                        continue;
                    }
                };
                let start_cs = state.full_get_segment_t0(i).unwrap_or(0);
                let end_cs = state.full_get_segment_t1(i).unwrap_or(start_cs);
                segments.push(EngineSegment {
                    text,
                    start_cs,
                    end_cs,
                });
            }
            Ok(segments)
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

    fn install_whisper_log_silencer() {
        static INSTALL_LOG_CALLBACK: Once = Once::new();
        INSTALL_LOG_CALLBACK.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
        });
    }

    unsafe extern "C" fn whisper_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
        // Silence the default whisper.cpp logger.
    }
}

#[cfg(unix)]
pub use platform::WhisperEngine;

#[cfg(not(unix))]
mod platform {
    use super::EngineSegment;
    use anyhow::{anyhow, Result};

    /// Stub for targets without the whisper.cpp bindings.
    pub struct WhisperEngine;

    impl WhisperEngine {
        pub fn load(_: &str, _: Option<&str>) -> Result<Self> {
            Err(anyhow!(
                "whisper transcription is currently supported only on Unix-like platforms"
            ))
        }
    }

    impl super::SpeechEngine for WhisperEngine {
        fn transcribe(&mut self, _: &[f32], _: u32) -> Result<Vec<EngineSegment>> {
            Err(anyhow!(
                "whisper transcription is currently supported only on Unix-like platforms"
            ))
        }

        fn model_name(&self) -> &str {
            "unsupported"
        }
    }
}

#[cfg(not(unix))]
pub use platform::WhisperEngine;
