use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber; `RUST_LOG` wins over the configured level.
/// Calling it twice is harmless.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.level.as_str().into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
