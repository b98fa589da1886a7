//! Tracing setup shared by the server and client entry points.
//!
//! Control the level with `RUST_LOG`, e.g. `RUST_LOG=codepub::server=debug`.
//! Without it, `-v` raises the default from `info` to `debug` and `-vv` to
//! `trace`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
