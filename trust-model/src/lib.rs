//! Trust model for X.509 chain validation
//!
//! This crate defines the data the trust service reasons about:
//! - Trust domains: named policies listing accepted roots and leaf constraints
//! - Trust points: roots of trust with a CRL refresh schedule
//! - Certificate authorities, root and subordinate
//! - Certificate constraints as a closed set of variants
//! - Revocation records and clock drift settings
//! - Owned certificate and CRL wrappers built on `x509-parser`
//! - A repository trait with an in-memory implementation
//!
//! # Core Concepts
//!
//! - **Trust Domain**: "chains for purpose X must end in one of these roots and
//!   the leaf must satisfy these constraints"
//! - **Trust Point**: a root CA certificate plus the cron schedule on which its
//!   CRL is refreshed
//! - **Constraint**: key usage, certificate policy, QC statement or subject DN
//!   requirement on the end-entity certificate
//!
//! # Example
//!
//! ```rust,ignore
//! use trust_model::*;
//!
//! let root = Certificate::parse_any(&std::fs::read("root.pem")?)?.remove(0);
//! let trust_point = TrustPoint::new(root, "0 0 3 * * ?");
//!
//! let mut domain = TrustDomain::new("authentication").with_default(true);
//! domain.add_trust_point(&trust_point.name);
//! domain.add_constraint(CertificateConstraint::key_usage(KeyUsageBit::DigitalSignature, true));
//!
//! let repository = InMemoryTrustRepository::new();
//! repository.save_trust_point(trust_point).await?;
//! repository.save_trust_domain(domain).await?;
//! ```

pub mod certificate;
pub mod clock;
pub mod constraint;
pub mod crl;
pub mod domain;
pub mod error;
pub mod numbers;
pub mod repository;
pub mod revocation;

pub use certificate::*;
pub use clock::*;
pub use constraint::*;
pub use crl::*;
pub use domain::*;
pub use error::*;
pub use numbers::*;
pub use repository::*;
pub use revocation::*;
