use crate::error::{Result, TelemetryError};
use config_engine::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` wins over the configured level
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] if the configured directive does not parse.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|_| TelemetryError::InvalidFilter(config.level.clone()))
}

/// Install the global tracing subscriber
///
/// # Errors
///
/// Fails if the filter is invalid or a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact().with_target(true)).try_init(),
    };

    result.map_err(|e| TelemetryError::TracingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "trust_engine=notalevel".to_string(),
            format: LogFormat::Compact,
        };
        assert!(matches!(
            build_filter(&config),
            Err(TelemetryError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_directive_level_accepted() {
        let config = LoggingConfig {
            level: "info,trust_engine=debug".to_string(),
            format: LogFormat::Json,
        };
        assert!(build_filter(&config).is_ok());
    }
}
