//! Administrative mutations of the trust model
//!
//! Every operation validates its input before touching the repository, so a
//! rejected call leaves no partial state behind. Schedule changes are pushed
//! to the [`Scheduler`] immediately.

use crate::clock_drift::ClockDriftDetector;
use crate::error::{Result, TrustError};
use crate::revocation::RevocationCache;
use crate::scheduler::{CronSchedule, Scheduler, TimerTarget};
use std::sync::Arc;
use tracing::info;
use trust_model::{
    Certificate, CertificateConstraint, ClockDriftConfig, ModelError, TrustDomain, TrustModelRepository,
    TrustPoint,
};

pub struct TrustDomainAdmin {
    repository: Arc<dyn TrustModelRepository>,
    scheduler: Arc<Scheduler>,
    cache: Arc<RevocationCache>,
    clock_drift: Arc<ClockDriftDetector>,
}

impl TrustDomainAdmin {
    pub fn new(
        repository: Arc<dyn TrustModelRepository>,
        scheduler: Arc<Scheduler>,
        cache: Arc<RevocationCache>,
        clock_drift: Arc<ClockDriftDetector>,
    ) -> Self {
        Self {
            repository,
            scheduler,
            cache,
            clock_drift,
        }
    }

    // =============================================================================
    // Trust domains
    // =============================================================================

    /// # Errors
    ///
    /// Returns [`TrustError::TrustDomainAlreadyExists`] for a taken name.
    pub async fn add_trust_domain(&self, name: &str, default: bool) -> Result<TrustDomain> {
        if self.repository.find_trust_domain(name).await?.is_some() {
            return Err(TrustError::TrustDomainAlreadyExists(name.to_string()));
        }

        let domain = TrustDomain::new(name);
        self.repository.save_trust_domain(domain.clone()).await?;
        info!(domain = %name, "Trust domain added");

        if default {
            self.set_default_domain(name).await?;
            return self.domain(name).await;
        }
        Ok(domain)
    }

    /// Make `name` the only default domain
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::TrustDomainNotFound`] for an unknown domain.
    pub async fn set_default_domain(&self, name: &str) -> Result<()> {
        let mut target = self.domain(name).await?;

        for mut domain in self.repository.list_trust_domains().await? {
            if domain.default && domain.name != name {
                domain.default = false;
                self.repository.save_trust_domain(domain).await?;
            }
        }

        if !target.default {
            target.default = true;
            self.repository.save_trust_domain(target).await?;
            info!(domain = %name, "Default trust domain set");
        }
        Ok(())
    }

    // =============================================================================
    // Trust points
    // =============================================================================

    /// Create a trust point from a PEM or DER root certificate and attach it to `domain`
    ///
    /// The CRL refresh timer starts right away and fires once immediately.
    ///
    /// # Errors
    ///
    /// - [`TrustError::TrustDomainNotFound`] for an unknown domain
    /// - [`TrustError::InvalidCronExpression`] for a bad schedule
    /// - [`TrustError::Model`] for an unparsable certificate
    /// - [`TrustError::TrustPointAlreadyExists`] when the root is already registered
    pub async fn add_trust_point(
        &self,
        domain: &str,
        crl_refresh_cron: &str,
        certificate: &[u8],
        crl_url: Option<String>,
    ) -> Result<TrustPoint> {
        let mut trust_domain = self.domain(domain).await?;
        CronSchedule::parse(crl_refresh_cron)?;

        let certificate = Certificate::parse_any(certificate)?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::MalformedCertificate("no certificate found".to_string()))?;

        let trust_point = TrustPoint::with_crl_url(certificate, crl_refresh_cron, crl_url);
        if self.repository.find_trust_point(&trust_point.name).await?.is_some() {
            return Err(TrustError::TrustPointAlreadyExists(trust_point.name));
        }

        self.repository.save_trust_point(trust_point.clone()).await?;
        trust_domain.add_trust_point(&trust_point.name);
        self.repository.save_trust_domain(trust_domain).await?;

        self.scheduler.start_timer(
            TimerTarget::TrustPoint(trust_point.name.clone()),
            crl_refresh_cron,
            true,
        )?;

        info!(trust_point = %trust_point.name, domain, "Trust point added");
        Ok(trust_point)
    }

    /// Reference an existing trust point from another domain
    ///
    /// # Errors
    ///
    /// Fails when either the domain or the trust point does not exist.
    pub async fn assign_trust_point(&self, domain: &str, trust_point: &str) -> Result<bool> {
        let mut trust_domain = self.domain(domain).await?;
        if self.repository.find_trust_point(trust_point).await?.is_none() {
            return Err(TrustError::TrustPointNotFound(trust_point.to_string()));
        }
        let added = trust_domain.add_trust_point(trust_point);
        if added {
            self.repository.save_trust_domain(trust_domain).await?;
        }
        Ok(added)
    }

    /// Change the refresh schedule of a trust point and restart its timer
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidCronExpression`] or
    /// [`TrustError::TrustPointNotFound`]; nothing changes in either case.
    pub async fn save_trust_point(&self, name: &str, crl_refresh_cron: &str) -> Result<TrustPoint> {
        CronSchedule::parse(crl_refresh_cron)?;
        let mut trust_point = self
            .repository
            .find_trust_point(name)
            .await?
            .ok_or_else(|| TrustError::TrustPointNotFound(name.to_string()))?;

        trust_point.crl_refresh_cron = crl_refresh_cron.to_string();
        self.repository.save_trust_point(trust_point.clone()).await?;
        self.scheduler
            .start_timer(TimerTarget::TrustPoint(name.to_string()), crl_refresh_cron, false)?;

        info!(trust_point = %name, cron = %crl_refresh_cron, "Trust point rescheduled");
        Ok(trust_point)
    }

    /// Remove a trust point, its CAs, its cached CRLs and its timer
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::TrustPointNotFound`] for an unknown name.
    pub async fn remove_trust_point(&self, name: &str) -> Result<TrustPoint> {
        let authorities = self.repository.authorities_of(name).await?;
        let removed = self
            .repository
            .remove_trust_point(name)
            .await?
            .ok_or_else(|| TrustError::TrustPointNotFound(name.to_string()))?;

        self.scheduler.cancel_timer(&TimerTarget::TrustPoint(name.to_string()));

        for authority in &authorities {
            self.cache.remove_issuer(authority.name());
        }

        for mut domain in self.repository.list_trust_domains().await? {
            if domain.remove_trust_point(name) {
                self.repository.save_trust_domain(domain).await?;
            }
        }

        info!(
            trust_point = %name,
            authorities = authorities.len(),
            "Trust point removed"
        );
        Ok(removed)
    }

    // =============================================================================
    // Constraints
    // =============================================================================

    /// Returns `false` when the domain already carries an identical constraint
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::TrustDomainNotFound`] or, for a malformed
    /// distinguished name pattern, [`TrustError::Model`].
    pub async fn add_constraint(&self, domain: &str, constraint: CertificateConstraint) -> Result<bool> {
        if let CertificateConstraint::DistinguishedName { pattern } = &constraint {
            trust_model::dn_matches(pattern, "")?;
        }

        let mut trust_domain = self.domain(domain).await?;
        let added = trust_domain.add_constraint(constraint.clone());
        if added {
            self.repository.save_trust_domain(trust_domain).await?;
            info!(domain, constraint = %constraint, "Constraint added");
        }
        Ok(added)
    }

    /// # Errors
    ///
    /// Returns [`TrustError::ConstraintNotFound`] when the domain does not
    /// carry the constraint.
    pub async fn remove_constraint(&self, domain: &str, constraint: &CertificateConstraint) -> Result<()> {
        let mut trust_domain = self.domain(domain).await?;
        if !trust_domain.remove_constraint(constraint) {
            return Err(TrustError::ConstraintNotFound {
                domain: domain.to_string(),
                constraint: constraint.to_string(),
            });
        }
        self.repository.save_trust_domain(trust_domain).await?;
        info!(domain, constraint = %constraint, "Constraint removed");
        Ok(())
    }

    // =============================================================================
    // Clock drift
    // =============================================================================

    /// Store new drift settings and start or cancel the drift timer
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidCronExpression`] for a bad schedule; the
    /// previous settings stay in effect.
    pub async fn save_clock_drift_config(&self, config: ClockDriftConfig) -> Result<()> {
        CronSchedule::parse(&config.cron)?;

        self.repository.save_clock_drift_config(config.clone()).await?;
        self.clock_drift.update_config(config.clone());

        if config.enabled {
            self.scheduler.start_timer(TimerTarget::ClockDrift, &config.cron, true)?;
        } else {
            self.scheduler.cancel_timer(&TimerTarget::ClockDrift);
        }
        info!(
            enabled = config.enabled,
            protocol = %config.protocol,
            server = %config.server,
            "Clock drift settings saved"
        );
        Ok(())
    }

    async fn domain(&self, name: &str) -> Result<TrustDomain> {
        self.repository
            .find_trust_domain(name)
            .await?
            .ok_or_else(|| TrustError::TrustDomainNotFound(name.to_string()))
    }
}
