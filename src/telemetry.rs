//! Tracing subscriber setup for the CLI binary.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once: compact output on stderr, filtered by
/// `DUOREC_LOG` (default `info`). Safe to call repeatedly; later calls are
/// no-ops.
pub fn init_tracing() {
    let _ = TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env("DUOREC_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
