//! Logging configuration for db-reattach.
//!
//! Logs always go to stderr so stdout carries nothing but result rows.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Picks the default filter directive from the `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "db_reattach=debug,info",
        _ => "trace",
    }
}

/// Initializes logging to stderr.
///
/// `RUST_LOG` overrides the verbosity-derived default.
pub fn init_stderr_logging(verbosity: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity))),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}
