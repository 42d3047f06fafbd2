//! Tracing bootstrap for the scraper binaries.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with environment-based filtering.
///
/// Log level defaults to `info` and can be overridden with `RUST_LOG`
/// (e.g. `RUST_LOG=app_scraper=debug,reqwest=warn`). Output goes to
/// stderr so that exported data on stdout stays machine-readable.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
