use tracing_subscriber::{EnvFilter, fmt};

/// Default directives: sqlx logs every statement at `info`, which would drown
/// the per-block progress of the scanner.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// Initialise the global tracing subscriber.
///
/// Respects `RUST_LOG`; falls back to [`DEFAULT_DIRECTIVES`].
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    fmt().with_env_filter(filter).with_target(true).init();
}
