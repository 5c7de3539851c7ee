use error_common::{codes, Classified, ErrorCategory};
use thiserror::Error;
use trust_model::ModelError;

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Trust domain not found: {0}")]
    TrustDomainNotFound(String),

    #[error("Trust domain already exists: {0}")]
    TrustDomainAlreadyExists(String),

    #[error("Trust point not found: {0}")]
    TrustPointNotFound(String),

    #[error("Trust point already exists: {0}")]
    TrustPointAlreadyExists(String),

    #[error("Constraint not found in trust domain {domain}: {constraint}")]
    ConstraintNotFound { domain: String, constraint: String },

    #[error("No default trust domain configured")]
    NoDefaultTrustDomain,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config_engine::ConfigError),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("State storage error: {0}")]
    Storage(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl TrustError {
    pub fn invalid_cron(expression: &str, reason: impl ToString) -> Self {
        TrustError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Classified for TrustError {
    fn category(&self) -> ErrorCategory {
        match self {
            TrustError::InvalidCronExpression { .. }
            | TrustError::TrustDomainNotFound(_)
            | TrustError::TrustDomainAlreadyExists(_)
            | TrustError::TrustPointNotFound(_)
            | TrustError::TrustPointAlreadyExists(_)
            | TrustError::ConstraintNotFound { .. }
            | TrustError::NoDefaultTrustDomain
            | TrustError::Configuration(_)
            | TrustError::HttpClient(_) => ErrorCategory::Configuration,
            TrustError::Model(e) => e.category(),
            TrustError::Initialization(_) => ErrorCategory::Initialization,
            TrustError::Storage(_) => ErrorCategory::Storage,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            TrustError::InvalidCronExpression { .. } => codes::configuration::INVALID_CRON_EXPRESSION,
            TrustError::TrustDomainNotFound(_) | TrustError::NoDefaultTrustDomain => {
                codes::configuration::TRUST_DOMAIN_NOT_FOUND
            }
            TrustError::TrustDomainAlreadyExists(_) => codes::configuration::TRUST_DOMAIN_ALREADY_EXISTS,
            TrustError::TrustPointNotFound(_) => codes::configuration::TRUST_POINT_NOT_FOUND,
            TrustError::TrustPointAlreadyExists(_) => codes::configuration::TRUST_POINT_ALREADY_EXISTS,
            TrustError::ConstraintNotFound { .. } => codes::configuration::CONSTRAINT_NOT_FOUND,
            TrustError::Configuration(_) | TrustError::HttpClient(_) => {
                codes::configuration::INVALID_SETTING
            }
            TrustError::Model(e) => e.code(),
            TrustError::Initialization(_) => codes::initialization::BOOTSTRAP_FAILED,
            TrustError::Storage(_) => codes::storage::STATE_IO,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrustError>;
