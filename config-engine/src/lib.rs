//! Configuration management for the trust service
//!
//! This crate loads the service configuration with:
//! - Layered sources (TOML/YAML/JSON file, then `TRUST__` environment variables)
//! - Typed sections with defaults for every field
//! - Consistency validation before anything is started
//!
//! # Sections
//!
//! - **logging** / **metrics**: observability settings
//! - **validation**: fail-closed policies and revocation staleness
//! - **harvester**: CRL download timeout, size cap and outbound proxy
//! - **clock_drift**: reference time source and tolerance
//! - **storage**: location of the persisted state file
//! - **bootstrap**: seed trust points, trust domains and constraints
//!
//! # Example
//!
//! ```rust,ignore
//! use config_engine::{ConfigLoader, ConfigSource};
//!
//! let config = ConfigLoader::new()
//!     .add_source(ConfigSource::optional_file("/etc/trust/trust-service.toml"))
//!     .add_source(ConfigSource::env())
//!     .load()?;
//!
//! println!("CRL fetch timeout: {}s", config.harvester.fetch_timeout_secs);
//! ```

pub mod error;
pub mod providers;
pub mod settings;
pub mod validation;

pub use error::*;
pub use providers::*;
pub use settings::*;
pub use validation::*;
