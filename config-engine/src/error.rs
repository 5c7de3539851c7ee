use error_common::{codes, Classified, ErrorCategory};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source not found: {0}")]
    SourceNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    ParseError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl Classified for ConfigError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    fn code(&self) -> &'static str {
        codes::configuration::INVALID_SETTING
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
