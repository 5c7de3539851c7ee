//! Common error handling utilities for the trust service
//!
//! This crate provides the error taxonomy shared by every trust service crate.
//! Each crate keeps its own `thiserror` enum; this crate only standardizes how
//! those errors are classified, coded and logged.
//!
//! # Error Categories
//!
//! - **Configuration**: invalid cron expressions, missing domains, duplicates
//! - **ChainValidation**: a chain was judged untrustworthy (structured reason)
//! - **Harvest**: CRL retrieval or verification failed, cache left untouched
//! - **RevocationUnknown**: no revocation data has ever been obtained
//! - **Initialization**: bootstrap could not complete, start-up is aborted
//! - **Storage**: persisted state could not be read or written
//!
//! # Example
//!
//! ```rust,ignore
//! use error_common::{Classified, ErrorCategory, codes};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("Invalid cron expression: {0}")]
//! struct InvalidCron(String);
//!
//! impl Classified for InvalidCron {
//!     fn category(&self) -> ErrorCategory {
//!         ErrorCategory::Configuration
//!     }
//!
//!     fn code(&self) -> &'static str {
//!         codes::configuration::INVALID_CRON_EXPRESSION
//!     }
//! }
//!
//! error_common::log_error("scheduler", &InvalidCron("* * * *".into()));
//! ```

pub mod codes;
pub mod types;

pub use types::*;
