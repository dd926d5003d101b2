//! Tracing setup for the inspection entrypoint.

/// Filter variable honored before the generic `RUST_LOG`.
const LOG_ENV: &str = "REIMAGE_LOG";

/// Initialize tracing for a pipeline run.
///
/// Progress narration goes to stdout elsewhere; diagnostics go to stderr
/// so wrappers that capture artifacts stay clean. Timestamps are
/// omitted: runs are short and journald adds its own.
pub fn initialize_tracing() {
    let filter = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .event_format(format)
        .with_writer(std::io::stderr)
        .init();
}
