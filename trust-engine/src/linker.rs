//! Certificate chain trust linking
//!
//! [`TrustLinker::validate`] decides whether a leaf-first chain is trusted
//! under a trust domain. It reads the trust model and the revocation cache
//! only; when revocation data is missing or old it enqueues a harvest and
//! decides with what it has, without waiting.

use crate::clock_drift::ClockDriftDetector;
use crate::queue::{HarvestQueue, HarvestRequest, HarvestTrigger};
use crate::revocation::RevocationCache;
use chrono::{DateTime, Duration, Utc};
use config_engine::{FailurePolicy, ValidationConfig};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trust_model::{evaluate_constraints, Certificate, RevocationStatus, SerialNumber, TrustDomain, TrustPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub revocation_unknown: FailurePolicy,
    pub clock_untrusted: FailurePolicy,
    /// Revocation data older than this triggers a background refresh; `None` disables the check
    pub max_revocation_age: Option<Duration>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for ValidationPolicy {
    fn from(config: &ValidationConfig) -> Self {
        let max_revocation_age = if config.max_revocation_age_secs == 0 {
            None
        } else {
            Duration::from_std(std::time::Duration::from_secs(config.max_revocation_age_secs)).ok()
        };
        Self {
            revocation_unknown: config.revocation_unknown,
            clock_untrusted: config.clock_untrusted,
            max_revocation_age,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DistrustReason {
    EmptyChain,
    /// Certificate at `index` is not signed by the one after it
    BrokenChain { index: usize, detail: String },
    UntrustedRoot { subject: String },
    ClockUntrusted { offset_millis: i64 },
    Expired { subject: String },
    Revoked { serial: SerialNumber, date: DateTime<Utc> },
    RevocationUnknown { issuer: String },
    ConstraintViolation { constraint: String },
}

impl DistrustReason {
    pub fn kind(&self) -> &'static str {
        match self {
            DistrustReason::EmptyChain => "empty_chain",
            DistrustReason::BrokenChain { .. } => "broken_chain",
            DistrustReason::UntrustedRoot { .. } => "untrusted_root",
            DistrustReason::ClockUntrusted { .. } => "clock_untrusted",
            DistrustReason::Expired { .. } => "expired",
            DistrustReason::Revoked { .. } => "revoked",
            DistrustReason::RevocationUnknown { .. } => "revocation_unknown",
            DistrustReason::ConstraintViolation { .. } => "constraint_violation",
        }
    }
}

impl fmt::Display for DistrustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistrustReason::EmptyChain => f.write_str("empty certificate chain"),
            DistrustReason::BrokenChain { index, detail } => {
                write!(f, "certificate {index} is not issued by its successor: {detail}")
            }
            DistrustReason::UntrustedRoot { subject } => write!(f, "untrusted root {subject}"),
            DistrustReason::ClockUntrusted { offset_millis } => {
                write!(f, "local clock off by {offset_millis}ms")
            }
            DistrustReason::Expired { subject } => write!(f, "{subject} is outside its validity period"),
            DistrustReason::Revoked { serial, date } => {
                write!(f, "serial {serial} revoked on {}", date.to_rfc3339())
            }
            DistrustReason::RevocationUnknown { issuer } => {
                write!(f, "no revocation data for issuer {issuer}")
            }
            DistrustReason::ConstraintViolation { constraint } => {
                write!(f, "constraint not satisfied: {constraint}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TrustDecision {
    Trusted,
    Distrusted(DistrustReason),
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustDecision::Trusted)
    }

    pub fn reason(&self) -> Option<&DistrustReason> {
        match self {
            TrustDecision::Trusted => None,
            TrustDecision::Distrusted(reason) => Some(reason),
        }
    }
}

impl fmt::Display for TrustDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustDecision::Trusted => f.write_str("trusted"),
            TrustDecision::Distrusted(reason) => write!(f, "distrusted: {reason}"),
        }
    }
}

/// A trust domain together with its resolved trust points
#[derive(Debug, Clone)]
pub struct TrustDomainView {
    pub domain: TrustDomain,
    pub trust_points: Vec<TrustPoint>,
}

impl TrustDomainView {
    pub fn new(domain: TrustDomain, trust_points: Vec<TrustPoint>) -> Self {
        Self { domain, trust_points }
    }

    pub fn name(&self) -> &str {
        &self.domain.name
    }

    /// Trust point whose root CA is exactly `certificate`
    fn anchored_at(&self, certificate: &Certificate) -> Option<&TrustPoint> {
        self.trust_points.iter().find(|tp| tp.certificate() == certificate)
    }

    /// Trust point whose root CA signed `certificate`
    fn issuer_of(&self, certificate: &Certificate) -> Option<&TrustPoint> {
        self.trust_points.iter().find(|tp| {
            tp.certificate().subject() == certificate.issuer()
                && certificate.verify_issued_by(tp.certificate()).is_ok()
        })
    }
}

pub struct TrustLinker {
    cache: Arc<RevocationCache>,
    clock_drift: Arc<ClockDriftDetector>,
    queue: Option<HarvestQueue>,
    policy: ValidationPolicy,
}

impl TrustLinker {
    pub fn new(
        cache: Arc<RevocationCache>,
        clock_drift: Arc<ClockDriftDetector>,
        queue: Option<HarvestQueue>,
        policy: ValidationPolicy,
    ) -> Self {
        Self {
            cache,
            clock_drift,
            queue,
            policy,
        }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Validate a leaf-first chain against a trust domain
    ///
    /// The chain may stop short of the root when its last certificate was
    /// issued by one of the domain's trust points.
    pub fn validate(&self, chain: &[Certificate], domain: &TrustDomainView) -> TrustDecision {
        let decision = match self.check(chain, domain) {
            Ok(()) => TrustDecision::Trusted,
            Err(reason) => TrustDecision::Distrusted(reason),
        };

        let reason = decision.reason().map_or("none", DistrustReason::kind);
        metrics::counter!(
            telemetry::VALIDATIONS_TOTAL,
            "decision" => if decision.is_trusted() { "trusted" } else { "distrusted" },
            "reason" => reason
        )
        .increment(1);
        debug!(domain = %domain.name(), decision = %decision, "Chain validated");
        decision
    }

    fn check(&self, chain: &[Certificate], domain: &TrustDomainView) -> Result<(), DistrustReason> {
        let (Some(leaf), Some(terminal)) = (chain.first(), chain.last()) else {
            return Err(DistrustReason::EmptyChain);
        };

        for (index, pair) in chain.windows(2).enumerate() {
            if let [child, parent] = pair {
                child
                    .verify_issued_by(parent)
                    .map_err(|e| DistrustReason::BrokenChain {
                        index,
                        detail: e.to_string(),
                    })?;
            }
        }

        let (trust_point, root_presented) = match domain.anchored_at(terminal) {
            Some(tp) => (tp, true),
            None => match domain.issuer_of(terminal) {
                Some(tp) if !terminal.is_self_issued() => (tp, false),
                _ => {
                    return Err(DistrustReason::UntrustedRoot {
                        subject: terminal.subject().to_string(),
                    })
                }
            },
        };

        if !self.clock_drift.is_within_tolerance() && self.policy.clock_untrusted == FailurePolicy::FailClosed {
            return Err(DistrustReason::ClockUntrusted {
                offset_millis: self.clock_drift.offset_millis(),
            });
        }
        let now = self.clock_drift.corrected_now();

        let root = trust_point.certificate();
        if let Some(expired) = chain.iter().chain(std::iter::once(root)).find(|c| !c.is_valid_at(now)) {
            return Err(DistrustReason::Expired {
                subject: expired.subject().to_string(),
            });
        }

        let checked = if root_presented {
            chain.len().saturating_sub(1)
        } else {
            chain.len()
        };
        for (index, certificate) in chain.iter().enumerate().take(checked) {
            let issuer = chain.get(index.saturating_add(1)).unwrap_or(root);
            self.check_revocation(certificate, issuer, trust_point, now)?;
        }

        evaluate_constraints(&domain.domain.constraints, leaf)
            .map_err(|constraint| DistrustReason::ConstraintViolation { constraint })
    }

    fn check_revocation(
        &self,
        certificate: &Certificate,
        issuer: &Certificate,
        trust_point: &TrustPoint,
        now: DateTime<Utc>,
    ) -> Result<(), DistrustReason> {
        let issuer_name = certificate.issuer();
        match self.cache.is_revoked(issuer_name, certificate.serial(), now) {
            RevocationStatus::Revoked { date } => {
                info!(
                    subject = %certificate.subject(),
                    issuer = %issuer_name,
                    serial = %certificate.serial(),
                    "Certificate is revoked"
                );
                Err(DistrustReason::Revoked {
                    serial: certificate.serial().clone(),
                    date,
                })
            }
            RevocationStatus::Unknown => {
                warn!(
                    issuer = %issuer_name,
                    trust_point = %trust_point.name,
                    "No revocation data for issuer"
                );
                self.request_harvest(trust_point, certificate, issuer, HarvestTrigger::RevocationUnknown);
                match self.policy.revocation_unknown {
                    FailurePolicy::FailClosed => Err(DistrustReason::RevocationUnknown {
                        issuer: issuer_name.to_string(),
                    }),
                    FailurePolicy::FailOpen => Ok(()),
                }
            }
            RevocationStatus::NotRevoked => {
                if self.is_stale(issuer_name, now) {
                    debug!(issuer = %issuer_name, "Revocation data is stale");
                    self.request_harvest(trust_point, certificate, issuer, HarvestTrigger::Stale);
                }
                Ok(())
            }
        }
    }

    fn is_stale(&self, issuer: &str, now: DateTime<Utc>) -> bool {
        match (self.policy.max_revocation_age, self.cache.last_checked(issuer)) {
            (Some(max_age), Some(checked)) => now.signed_duration_since(checked) > max_age,
            _ => false,
        }
    }

    /// The issued certificate's distribution point locates the issuer's CRL
    fn request_harvest(
        &self,
        trust_point: &TrustPoint,
        certificate: &Certificate,
        issuer: &Certificate,
        trigger: HarvestTrigger,
    ) {
        let Some(queue) = &self.queue else {
            return;
        };
        let request = if issuer == trust_point.certificate() {
            HarvestRequest::trust_point(&trust_point.name, trigger)
        } else {
            HarvestRequest::authority(&trust_point.name, issuer.clone(), trigger)
        };
        queue.enqueue(request.with_crl_url(certificate.crl_distribution_points().first().cloned()));
    }
}
