use tracing_subscriber::EnvFilter;

use crate::config::Logging;

/// Initializes the global tracing subscriber.
///
/// The configured level acts as the default; a `RUST_LOG` environment
/// variable still takes precedence per directive. Must be called at most once
/// per process, typically by the embedding application's startup code.
pub fn init(config: &Logging) {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
