//! Structured logging setup: `tracing_subscriber::fmt` plus `EnvFilter`.

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber reading `RUST_LOG` (defaulting to `info`),
/// writing to stderr so stdout stays free for machine-readable output
/// (`--events-json`, `status --json`, ...).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Whether colored CLI output should be used: respects `NO_COLOR` and
/// whether stdout is a TTY.
pub fn colors_enabled() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    console::Term::stdout().is_term()
}
