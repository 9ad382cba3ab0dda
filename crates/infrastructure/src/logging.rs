use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LoggingConfig};

/// Initialize structured logging to stdout. Must be called exactly
/// once at startup.
///
/// - `format: json` — flattened JSON for log aggregators.
/// - `format: text` — human-readable colored output.
///
/// `RUST_LOG` overrides the configured level. When logging is disabled
/// (`logging.enabled: false` or `performance.disable_log: true`) the
/// filter is clamped to ERROR so the fast path pays nothing for
/// suppressed events.
pub fn init_logging(config: &LoggingConfig, disable_log: bool) -> Result<(), ConfigError> {
    let level = if disable_log || !config.enabled {
        "error"
    } else {
        config.level.as_str()
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.to_ascii_lowercase().as_str() {
        "json" => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .init(),
        _ => registry
            .with(fmt::layer().with_target(true).with_ansi(true))
            .init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_levels_are_valid_filters() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            assert!(
                EnvFilter::try_new(level).is_ok(),
                "{level} should be a valid filter"
            );
        }
    }
}
