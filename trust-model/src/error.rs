use error_common::{codes, Classified, ErrorCategory};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("Malformed CRL: {0}")]
    MalformedCrl(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unknown key usage: {0}")]
    UnknownKeyUsage(String),

    #[error("Invalid distinguished name pattern: {0}")]
    InvalidPattern(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),
}

impl Classified for ModelError {
    fn category(&self) -> ErrorCategory {
        match self {
            ModelError::MalformedCertificate(_)
            | ModelError::InvalidNumber(_)
            | ModelError::UnknownKeyUsage(_)
            | ModelError::InvalidPattern(_) => ErrorCategory::Configuration,
            ModelError::MalformedCrl(_) | ModelError::SignatureInvalid(_) => ErrorCategory::Harvest,
            ModelError::RepositoryError(_) => ErrorCategory::Storage,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ModelError::MalformedCertificate(_) => codes::certificate::MALFORMED_CERTIFICATE,
            ModelError::MalformedCrl(_) => codes::certificate::MALFORMED_CRL,
            ModelError::SignatureInvalid(_) => codes::certificate::SIGNATURE_INVALID,
            ModelError::InvalidNumber(_)
            | ModelError::UnknownKeyUsage(_)
            | ModelError::InvalidPattern(_) => codes::configuration::INVALID_SETTING,
            ModelError::RepositoryError(_) => codes::storage::STATE_IO,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
