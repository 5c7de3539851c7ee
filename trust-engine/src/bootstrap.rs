//! Seeding the trust model from configuration
//!
//! Bootstrap is idempotent: running it against a repository that already
//! holds the configured entities only fills in what is missing. Constraints
//! are added to a domain only while it has none, so administrative edits
//! made after the first start survive later restarts.

use crate::error::{Result, TrustError};
use crate::scheduler::CronSchedule;
use config_engine::{
    BootstrapConfig, ClockDriftSettings, ConstraintSetting, SeedTrustDomain, SeedTrustPoint, TimeProtocolSetting,
};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, error, info};
use trust_model::{
    Certificate, CertificateConstraint, ClockDriftConfig, KeyUsageBit, TimeProtocol, TrustDomain,
    TrustModelRepository, TrustPoint,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub trust_points_created: usize,
    pub trust_points_existing: usize,
    pub domains_created: usize,
    pub constraints_added: usize,
    pub default_domain: Option<String>,
}

pub fn time_protocol(setting: TimeProtocolSetting) -> TimeProtocol {
    match setting {
        TimeProtocolSetting::Ntp => TimeProtocol::Ntp,
        TimeProtocolSetting::Tsp => TimeProtocol::Tsp,
        TimeProtocolSetting::Http => TimeProtocol::Http,
    }
}

pub fn clock_drift_config(settings: &ClockDriftSettings) -> ClockDriftConfig {
    ClockDriftConfig {
        protocol: time_protocol(settings.protocol),
        server: settings.server.clone(),
        timeout_millis: settings.timeout_millis,
        max_clock_offset_millis: settings.max_clock_offset_millis,
        cron: settings.cron.clone(),
        enabled: settings.enabled,
        offset_millis: 0,
    }
}

/// # Errors
///
/// Returns [`TrustError::Model`] for an unknown key usage name.
pub fn constraint_from_setting(setting: &ConstraintSetting) -> Result<CertificateConstraint> {
    Ok(match setting {
        ConstraintSetting::KeyUsage { usage, required } => {
            CertificateConstraint::key_usage(KeyUsageBit::from_str(usage)?, *required)
        }
        ConstraintSetting::CertificatePolicy { oid } => CertificateConstraint::policy(oid.clone()),
        ConstraintSetting::QcStatements {
            require_qc_compliance,
        } => CertificateConstraint::qc_statements(*require_qc_compliance),
        ConstraintSetting::DistinguishedName { pattern } => {
            CertificateConstraint::distinguished_name(pattern.clone())
        }
    })
}

pub struct Bootstrapper<'a> {
    repository: &'a dyn TrustModelRepository,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(repository: &'a dyn TrustModelRepository) -> Self {
        Self { repository }
    }

    /// Seed clock drift settings, trust points and trust domains
    ///
    /// # Errors
    ///
    /// - [`TrustError::Initialization`] for an unreadable seed certificate or
    ///   a domain referencing an unknown alias
    /// - [`TrustError::InvalidCronExpression`] for a bad refresh schedule
    pub async fn run(&self, clock_drift: &ClockDriftSettings, config: &BootstrapConfig) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();

        self.seed_clock_drift(clock_drift).await?;

        let mut aliases = HashMap::with_capacity(config.trust_points.len());
        for seed in &config.trust_points {
            let name = self.seed_trust_point(seed, &config.default_crl_refresh_cron, &mut report).await?;
            aliases.insert(seed.alias.as_str(), name);
        }

        for seed in &config.domains {
            self.seed_domain(seed, &aliases, &mut report).await?;
        }

        report.default_domain = self
            .repository
            .find_default_trust_domain()
            .await?
            .map(|domain| domain.name);

        info!(
            trust_points_created = report.trust_points_created,
            trust_points_existing = report.trust_points_existing,
            domains_created = report.domains_created,
            constraints_added = report.constraints_added,
            default_domain = report.default_domain.as_deref().unwrap_or("-"),
            "Bootstrap complete"
        );
        Ok(report)
    }

    async fn seed_clock_drift(&self, settings: &ClockDriftSettings) -> Result<()> {
        if self.repository.find_clock_drift_config().await?.is_some() {
            return Ok(());
        }
        if settings.enabled {
            CronSchedule::parse(&settings.cron)?;
        }
        self.repository
            .save_clock_drift_config(clock_drift_config(settings))
            .await?;
        Ok(())
    }

    async fn seed_trust_point(
        &self,
        seed: &SeedTrustPoint,
        default_cron: &str,
        report: &mut BootstrapReport,
    ) -> Result<String> {
        let certificate = load_seed_certificate(seed).await?;
        let cron = seed.crl_refresh_cron.as_deref().unwrap_or(default_cron);
        CronSchedule::parse(cron)?;

        let name = certificate.subject().to_string();
        if self.repository.find_trust_point(&name).await?.is_some() {
            debug!(trust_point = %name, alias = %seed.alias, "Trust point already present");
            report.trust_points_existing = report.trust_points_existing.saturating_add(1);
            return Ok(name);
        }

        let trust_point = TrustPoint::with_crl_url(certificate, cron, seed.crl_url.clone());
        self.repository.save_trust_point(trust_point).await?;
        report.trust_points_created = report.trust_points_created.saturating_add(1);
        info!(trust_point = %name, alias = %seed.alias, "Trust point created");
        Ok(name)
    }

    async fn seed_domain(
        &self,
        seed: &SeedTrustDomain,
        aliases: &HashMap<&str, String>,
        report: &mut BootstrapReport,
    ) -> Result<()> {
        let mut domain = match self.repository.find_trust_domain(&seed.name).await? {
            Some(domain) => domain,
            None => {
                report.domains_created = report.domains_created.saturating_add(1);
                info!(domain = %seed.name, "Trust domain created");
                TrustDomain::new(&seed.name)
            }
        };

        for alias in &seed.trust_points {
            let name = aliases.get(alias.as_str()).ok_or_else(|| {
                TrustError::Initialization(format!(
                    "trust domain '{}' references unknown trust point alias '{alias}'",
                    seed.name
                ))
            })?;
            domain.add_trust_point(name);
        }

        if domain.constraints.is_empty() {
            for setting in &seed.constraints {
                if domain.add_constraint(constraint_from_setting(setting)?) {
                    report.constraints_added = report.constraints_added.saturating_add(1);
                }
            }
        }

        if seed.default && !domain.default {
            for mut other in self.repository.list_trust_domains().await? {
                if other.default && other.name != seed.name {
                    other.default = false;
                    self.repository.save_trust_domain(other).await?;
                }
            }
            domain.default = true;
        }

        self.repository.save_trust_domain(domain).await?;
        Ok(())
    }
}

async fn load_seed_certificate(seed: &SeedTrustPoint) -> Result<Certificate> {
    let path = &seed.certificate_path;
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        error!(alias = %seed.alias, "Seed certificate {} unreadable: {}", path.display(), e);
        TrustError::Initialization(format!("seed certificate '{}' ({}): {e}", seed.alias, path.display()))
    })?;

    Certificate::parse_any(&bytes)
        .map_err(|e| {
            error!(alias = %seed.alias, "Seed certificate {} invalid: {}", path.display(), e);
            TrustError::Initialization(format!("seed certificate '{}' ({}): {e}", seed.alias, path.display()))
        })?
        .into_iter()
        .next()
        .ok_or_else(|| TrustError::Initialization(format!("no certificate in {}", path.display())))
}
