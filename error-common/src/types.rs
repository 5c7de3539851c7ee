use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of every error the trust service can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid administrative input; nothing was created or changed
    Configuration,

    /// A presented chain was judged untrustworthy
    ChainValidation,

    /// CRL retrieval or verification failed; cached data is retained
    Harvest,

    /// No revocation data has ever been obtained for an issuer
    RevocationUnknown,

    /// Bootstrap could not complete
    Initialization,

    /// Persisted state could not be read or written
    Storage,

    /// Anything else
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::ChainValidation => "chain_validation",
            ErrorCategory::Harvest => "harvest",
            ErrorCategory::RevocationUnknown => "revocation_unknown",
            ErrorCategory::Initialization => "initialization",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Whether the next scheduled run may succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Harvest | ErrorCategory::RevocationUnknown | ErrorCategory::Storage
        )
    }

    /// Whether the error must stop the service from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCategory::Initialization)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every crate-level error enum
pub trait Classified: std::error::Error {
    fn category(&self) -> ErrorCategory;

    /// Stable error code, see [`crate::codes`]
    fn code(&self) -> &'static str;
}

/// Log an error at the level its category calls for
///
/// Harvest failures and unknown revocation are operational gaps and go to
/// `warn`; chain validation failures are expected outcomes and go to `info`.
pub fn log_error<E: Classified + ?Sized>(context: &str, error: &E) {
    let category = error.category();
    let code = error.code();
    match category {
        ErrorCategory::ChainValidation => {
            tracing::info!(context, code, category = %category, error = %error, "Trust error");
        }
        ErrorCategory::Harvest | ErrorCategory::RevocationUnknown => {
            tracing::warn!(context, code, category = %category, error = %error, "Trust error");
        }
        ErrorCategory::Configuration
        | ErrorCategory::Initialization
        | ErrorCategory::Storage
        | ErrorCategory::Internal => {
            tracing::error!(context, code, category = %category, error = %error, "Trust error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[derive(Debug, thiserror::Error)]
    #[error("seed certificate missing")]
    struct SeedMissing;

    impl Classified for SeedMissing {
        fn category(&self) -> ErrorCategory {
            ErrorCategory::Initialization
        }

        fn code(&self) -> &'static str {
            codes::initialization::SEED_CERTIFICATE_UNREADABLE
        }
    }

    #[test]
    fn test_category_flags() {
        assert!(ErrorCategory::Initialization.is_fatal());
        assert!(!ErrorCategory::Harvest.is_fatal());
        assert!(ErrorCategory::Harvest.is_transient());
        assert!(!ErrorCategory::Configuration.is_transient());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::RevocationUnknown).unwrap();
        assert_eq!(json, "\"revocation_unknown\"");
        assert_eq!(ErrorCategory::ChainValidation.to_string(), "chain_validation");
    }

    #[test]
    fn test_log_error_accepts_trait_objects() {
        let error: Box<dyn Classified> = Box::new(SeedMissing);
        log_error("bootstrap", error.as_ref());
        assert_eq!(error.code(), "TRUST_INIT_5001");
    }
}
