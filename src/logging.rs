//! Diagnostic logging.
//!
//! User-facing progress goes through [`crate::ui::Reporter`]; this module only
//! wires `tracing` for internals (cache decisions, retries, dispatch).

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install the global subscriber once. `RUST_LOG` wins; otherwise `--verbose`
/// turns on debug output for this crate and everything else stays at `warn`.
pub fn init(verbose: bool) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if verbose {
                EnvFilter::new("warn,boardsweep=debug")
            } else {
                EnvFilter::new("warn")
            }
        });

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbose)
                    .with_level(true),
            )
            .with(filter)
            .try_init();
    });
}
