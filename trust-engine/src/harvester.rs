//! CRL harvesting
//!
//! A harvest downloads the CRL of one certificate authority, checks that the
//! CA really issued it and that it is current, and hands the entries to the
//! [`RevocationCache`]. Failures never propagate to validators: they are
//! logged, counted and returned as a [`HarvestOutcome::Failure`] while the
//! cache keeps its previous contents.

use crate::clock_drift::ClockDriftDetector;
use crate::fetch::CrlFetcher;
use crate::revocation::{ReplaceOutcome, RevocationCache};
use dashmap::DashMap;
use error_common::{codes, Classified, ErrorCategory};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use trust_model::{CertificateAuthority, CrlNumber, RevocationList, TrustPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarvestFailureKind {
    NetworkError,
    ParseError,
    SignatureInvalid,
    /// The CRL is outside its `this_update..next_update` window
    SignatureExpired,
}

impl HarvestFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestFailureKind::NetworkError => "network_error",
            HarvestFailureKind::ParseError => "parse_error",
            HarvestFailureKind::SignatureInvalid => "signature_invalid",
            HarvestFailureKind::SignatureExpired => "signature_expired",
        }
    }
}

impl fmt::Display for HarvestFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct HarvestFailure {
    pub kind: HarvestFailureKind,
    pub message: String,
}

impl HarvestFailure {
    fn new(kind: HarvestFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Classified for HarvestFailure {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Harvest
    }

    fn code(&self) -> &'static str {
        match self.kind {
            HarvestFailureKind::NetworkError => codes::harvest::NETWORK_ERROR,
            HarvestFailureKind::ParseError => codes::harvest::PARSE_ERROR,
            HarvestFailureKind::SignatureInvalid => codes::harvest::SIGNATURE_INVALID,
            HarvestFailureKind::SignatureExpired => codes::harvest::SIGNATURE_EXPIRED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    Success {
        crl_number: CrlNumber,
        entry_count: usize,
        /// `false` when the fetched CRL was not newer than the cached one
        applied: bool,
    },
    Failure(HarvestFailure),
    /// Another harvest for the same CA is in flight
    AlreadyRunning,
}

impl HarvestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HarvestOutcome::Success { .. })
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, HarvestOutcome::Success { applied: true, .. })
    }

    fn label(&self) -> &'static str {
        match self {
            HarvestOutcome::Success { applied: true, .. } => "applied",
            HarvestOutcome::Success { applied: false, .. } => "unchanged",
            HarvestOutcome::Failure(failure) => failure.kind.as_str(),
            HarvestOutcome::AlreadyRunning => "already_running",
        }
    }
}

/// Removes the in-flight marker when the harvest finishes or is dropped
struct InFlightGuard {
    in_flight: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

#[derive(Clone)]
pub struct Harvester {
    fetcher: Arc<dyn CrlFetcher>,
    cache: Arc<RevocationCache>,
    clock_drift: Arc<ClockDriftDetector>,
    in_flight: Arc<DashMap<String, ()>>,
}

impl Harvester {
    pub fn new(
        fetcher: Arc<dyn CrlFetcher>,
        cache: Arc<RevocationCache>,
        clock_drift: Arc<ClockDriftDetector>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            clock_drift,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Harvest the CRL of the trust point's root CA
    pub async fn harvest(&self, trust_point: &TrustPoint) -> HarvestOutcome {
        self.harvest_authority(&trust_point.certificate_authority).await
    }

    /// Harvest the CRL published by one CA, root or subordinate
    pub async fn harvest_authority(&self, authority: &CertificateAuthority) -> HarvestOutcome {
        let Some(_guard) = self.try_begin(authority.name()) else {
            debug!(authority = %authority.name(), "Harvest already running");
            return HarvestOutcome::AlreadyRunning;
        };

        let outcome = match self.run(authority).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(
                    authority = %authority.name(),
                    code = failure.code(),
                    "CRL harvest failed: {}",
                    failure
                );
                HarvestOutcome::Failure(failure)
            }
        };

        metrics::counter!(telemetry::HARVESTS_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    pub fn is_running(&self, authority: &str) -> bool {
        self.in_flight.contains_key(authority)
    }

    pub fn cache(&self) -> &Arc<RevocationCache> {
        &self.cache
    }

    pub fn corrected_now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock_drift.corrected_now()
    }

    fn try_begin(&self, key: &str) -> Option<InFlightGuard> {
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key: key.to_string(),
                })
            }
        }
    }

    async fn run(&self, authority: &CertificateAuthority) -> Result<HarvestOutcome, HarvestFailure> {
        let url = authority.crl_url().ok_or_else(|| {
            HarvestFailure::new(
                HarvestFailureKind::NetworkError,
                format!("no CRL distribution point for {}", authority.name()),
            )
        })?;

        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| HarvestFailure::new(HarvestFailureKind::NetworkError, e.to_string()))?;

        let crl = RevocationList::parse_any(&bytes)
            .map_err(|e| HarvestFailure::new(HarvestFailureKind::ParseError, e.to_string()))?;

        crl.verify_signature(&authority.certificate)
            .map_err(|e| HarvestFailure::new(HarvestFailureKind::SignatureInvalid, e.to_string()))?;

        let now = self.clock_drift.corrected_now();
        if !crl.is_current_at(now) {
            return Err(HarvestFailure::new(
                HarvestFailureKind::SignatureExpired,
                format!(
                    "CRL {} valid {} to {}, now {}",
                    crl.crl_number(),
                    crl.this_update().to_rfc3339(),
                    crl.next_update().map_or_else(|| "-".to_string(), |d| d.to_rfc3339()),
                    now.to_rfc3339()
                ),
            ));
        }

        let crl_number = crl.crl_number().clone();
        let entry_count = crl.entries().len();
        let applied = match self.cache.replace_revocation_set(
            authority.name(),
            crl_number.clone(),
            crl.into_entries(),
            now,
        ) {
            ReplaceOutcome::Applied => {
                info!(
                    authority = %authority.name(),
                    crl_number = %crl_number,
                    entries = entry_count,
                    "Harvested CRL"
                );
                true
            }
            ReplaceOutcome::Stale => {
                self.cache.mark_checked(authority.name(), &crl_number, now);
                debug!(
                    authority = %authority.name(),
                    crl_number = %crl_number,
                    "CRL not newer than cached set"
                );
                false
            }
        };

        Ok(HarvestOutcome::Success {
            crl_number,
            entry_count,
            applied,
        })
    }
}
