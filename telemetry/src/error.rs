use error_common::{codes, Classified, ErrorCategory};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Tracing initialization failed: {0}")]
    TracingError(String),

    #[error("Metrics exporter error: {0}")]
    ExporterError(String),
}

impl Classified for TelemetryError {
    fn category(&self) -> ErrorCategory {
        match self {
            TelemetryError::InvalidFilter(_) => ErrorCategory::Configuration,
            TelemetryError::TracingError(_) | TelemetryError::ExporterError(_) => {
                ErrorCategory::Initialization
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            TelemetryError::InvalidFilter(_) => codes::configuration::INVALID_SETTING,
            TelemetryError::TracingError(_) | TelemetryError::ExporterError(_) => {
                codes::initialization::BOOTSTRAP_FAILED
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
