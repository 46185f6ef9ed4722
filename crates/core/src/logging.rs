//! Structured logging bootstrap.
//!
//! Output goes to stderr so command results printed on stdout (for example
//! `status --json`) stay machine readable.

use std::io;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Build the filter directive: `RUST_LOG` wins, then the configured level.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(config.level.to_lowercase()),
    }
}

/// Initialize the global tracing subscriber.
///
/// Fails if a subscriber is already installed or the level is not a valid directive.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = build_filter(config)?;

    match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?,
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).pretty())
            .try_init()?,
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).compact())
            .try_init()?,
    }

    tracing::debug!(
        target: "strata::logging",
        "Structured logging initialized (level: {}, format: {})",
        config.level,
        config.format
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_configured_level() {
        let config = LoggingConfig {
            level: "WARN".to_string(),
            format: "json".to_string(),
        };
        assert!(build_filter(&config).is_ok());
    }
}
