use crate::certificate::Certificate;
use crate::constraint::CertificateConstraint;
use crate::numbers::CrlNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named trust policy: which roots are accepted and what the leaf must look like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDomain {
    pub name: String,
    /// Ordered, duplicate-free trust point names
    pub trust_points: Vec<String>,
    pub constraints: Vec<CertificateConstraint>,
    #[serde(default)]
    pub default: bool,
}

impl TrustDomain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trust_points: Vec::new(),
            constraints: Vec::new(),
            default: false,
        }
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Returns `false` if the trust point was already referenced
    pub fn add_trust_point(&mut self, name: &str) -> bool {
        if self.trust_points.iter().any(|tp| tp == name) {
            return false;
        }
        self.trust_points.push(name.to_string());
        true
    }

    pub fn remove_trust_point(&mut self, name: &str) -> bool {
        let before = self.trust_points.len();
        self.trust_points.retain(|tp| tp != name);
        before != self.trust_points.len()
    }

    /// Returns `false` if an identical constraint already exists
    pub fn add_constraint(&mut self, constraint: CertificateConstraint) -> bool {
        if self.constraints.contains(&constraint) {
            return false;
        }
        self.constraints.push(constraint);
        true
    }

    pub fn remove_constraint(&mut self, constraint: &CertificateConstraint) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| c != constraint);
        before != self.constraints.len()
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} trust points)", self.name, self.trust_points.len())
    }
}

/// Wraps one CA certificate
///
/// Root CAs belong to exactly one trust point. Subordinate CAs discovered in
/// presented chains are registered under the trust point whose root they
/// chain to, so that scheduled harvests also refresh their CRLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub certificate: Certificate,
    /// Owning trust point name
    pub trust_point: String,
    pub root: bool,
    /// Where this CA publishes its CRL, configured or learned from a
    /// distribution point of a certificate it issued
    #[serde(default)]
    pub crl_url: Option<String>,
}

impl CertificateAuthority {
    pub fn root(certificate: Certificate, crl_url: Option<String>) -> Self {
        let trust_point = certificate.subject().to_string();
        Self {
            certificate,
            trust_point,
            root: true,
            crl_url,
        }
    }

    pub fn subordinate(certificate: Certificate, trust_point: impl Into<String>) -> Self {
        Self {
            certificate,
            trust_point: trust_point.into(),
            root: false,
            crl_url: None,
        }
    }

    pub fn with_crl_url(mut self, crl_url: Option<String>) -> Self {
        self.crl_url = crl_url;
        self
    }

    /// Subject DN, which is also the issuer key of the CRLs it publishes
    pub fn name(&self) -> &str {
        self.certificate.subject()
    }

    /// Known CRL location for this CA
    ///
    /// A distribution point on a CA certificate names the CRL of that
    /// certificate's issuer, so the certificate's own points only count when
    /// it is self-issued.
    pub fn crl_url(&self) -> Option<&str> {
        self.crl_url.as_deref().or_else(|| {
            if self.certificate.is_self_issued() {
                self.certificate.crl_distribution_points().first().map(String::as_str)
            } else {
                None
            }
        })
    }
}

/// Last known harvest results for a trust point
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStatus {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_crl_number: Option<CrlNumber>,
    pub last_failure: Option<String>,
}

impl HarvestStatus {
    pub fn record_success(&mut self, at: DateTime<Utc>, crl_number: CrlNumber) {
        self.last_attempt = Some(at);
        self.last_success = Some(at);
        self.last_crl_number = Some(crl_number);
        self.last_failure = None;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, reason: impl Into<String>) {
        self.last_attempt = Some(at);
        self.last_failure = Some(reason.into());
    }
}

/// A root of trust with its CRL refresh schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPoint {
    /// Subject DN of the root CA
    pub name: String,
    pub certificate_authority: CertificateAuthority,
    pub crl_refresh_cron: String,
    /// Next scheduled harvest
    #[serde(default)]
    pub fire_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub harvest: HarvestStatus,
}

impl TrustPoint {
    pub fn new(certificate: Certificate, crl_refresh_cron: impl Into<String>) -> Self {
        Self::with_crl_url(certificate, crl_refresh_cron, None)
    }

    pub fn with_crl_url(
        certificate: Certificate,
        crl_refresh_cron: impl Into<String>,
        crl_url: Option<String>,
    ) -> Self {
        let authority = CertificateAuthority::root(certificate, crl_url);
        Self {
            name: authority.name().to_string(),
            certificate_authority: authority,
            crl_refresh_cron: crl_refresh_cron.into(),
            fire_date: None,
            harvest: HarvestStatus::default(),
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate_authority.certificate
    }
}

impl fmt::Display for TrustPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.crl_refresh_cron)
    }
}
