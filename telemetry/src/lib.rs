//! Observability for the trust service
//!
//! This crate wires up:
//! - Structured logging through `tracing-subscriber` (compact, pretty or JSON)
//! - `RUST_LOG` overrides on top of the configured level
//! - Prometheus metrics export and the metric names used by the engine
//!
//! # Example
//!
//! ```rust,ignore
//! use config_engine::TrustServiceConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TrustServiceConfig::default();
//!     telemetry::init_tracing(&config.logging)?;
//!     telemetry::init_metrics(&config.metrics)?;
//!
//!     tracing::info!("Trust service starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod exporter;

pub use error::*;
pub use logging::*;
pub use exporter::*;
