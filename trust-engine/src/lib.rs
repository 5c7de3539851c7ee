//! Trust validation and revocation engine
//!
//! This crate decides whether X.509 certificate chains are trusted and keeps
//! the revocation data behind those decisions fresh:
//! - Revocation cache with per-issuer atomic CRL replacement
//! - Asynchronous CRL harvesting over HTTP(S) with signature checks
//! - Trust linker validating chains against trust domains
//! - Cron scheduler with one timer per trust point
//! - Clock drift detection against a reference time source
//! - Administrative API, bootstrap from configuration and state persistence
//!
//! # Decision flow
//!
//! ```text
//! chain ─► signatures ─► trust point root ─► clock / validity ─► revocation ─► constraints ─► Trusted
//!                                                                  │
//!                                              unknown or stale ───┴─► harvest queue (non-blocking)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trust_engine::TrustService;
//!
//! let config = config_engine::load_config(Some("trust-service.toml".into()))?;
//! let service = TrustService::builder(config).build()?;
//! service.initialize().await?;
//! service.start().await?;
//!
//! let chain = trust_model::Certificate::parse_any(&std::fs::read("chain.pem")?)?;
//! if service.is_valid(&chain, "authentication").await {
//!     println!("trusted");
//! }
//!
//! service.shutdown().await;
//! ```

pub mod admin;
pub mod bootstrap;
pub mod clock;
pub mod clock_drift;
pub mod error;
pub mod fetch;
pub mod harvester;
pub mod linker;
pub mod queue;
pub mod revocation;
pub mod scheduler;
pub mod service;
pub mod state;

pub use admin::*;
pub use bootstrap::*;
pub use clock::*;
pub use clock_drift::*;
pub use error::*;
pub use fetch::*;
pub use harvester::*;
pub use linker::*;
pub use queue::*;
pub use revocation::*;
pub use scheduler::*;
pub use service::*;
pub use state::*;
