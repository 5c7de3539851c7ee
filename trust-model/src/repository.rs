use crate::clock::ClockDriftConfig;
use crate::constraint::CertificateConstraint;
use crate::domain::{CertificateAuthority, HarvestStatus, TrustDomain, TrustPoint};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Entity store for the trust model
///
/// Keys: trust domains by name, trust points by name, certificate
/// authorities by subject DN.
#[async_trait]
pub trait TrustModelRepository: Send + Sync {
    async fn save_trust_domain(&self, domain: TrustDomain) -> Result<()>;

    async fn find_trust_domain(&self, name: &str) -> Result<Option<TrustDomain>>;

    async fn list_trust_domains(&self) -> Result<Vec<TrustDomain>>;

    async fn find_default_trust_domain(&self) -> Result<Option<TrustDomain>> {
        Ok(self
            .list_trust_domains()
            .await?
            .into_iter()
            .find(|domain| domain.default))
    }

    /// Insert or replace; the trust point's root CA is stored alongside it
    async fn save_trust_point(&self, trust_point: TrustPoint) -> Result<()>;

    async fn find_trust_point(&self, name: &str) -> Result<Option<TrustPoint>>;

    async fn list_trust_points(&self) -> Result<Vec<TrustPoint>>;

    /// Remove a trust point together with every CA it owns
    async fn remove_trust_point(&self, name: &str) -> Result<Option<TrustPoint>>;

    async fn set_fire_date(&self, name: &str, fire_date: Option<DateTime<Utc>>) -> Result<()>;

    async fn record_harvest(&self, name: &str, status: HarvestStatus) -> Result<()>;

    async fn save_authority(&self, authority: CertificateAuthority) -> Result<()>;

    async fn find_authority(&self, subject: &str) -> Result<Option<CertificateAuthority>>;

    /// Root first, then subordinates in subject order
    async fn authorities_of(&self, trust_point: &str) -> Result<Vec<CertificateAuthority>>;

    async fn save_clock_drift_config(&self, config: ClockDriftConfig) -> Result<()>;

    async fn find_clock_drift_config(&self) -> Result<Option<ClockDriftConfig>>;

    /// Trust points referenced by a domain, in domain order
    async fn list_trust_points_of(&self, domain: &str) -> Result<Vec<TrustPoint>> {
        let Some(domain) = self.find_trust_domain(domain).await? else {
            return Ok(Vec::new());
        };
        let mut trust_points = Vec::with_capacity(domain.trust_points.len());
        for name in &domain.trust_points {
            if let Some(trust_point) = self.find_trust_point(name).await? {
                trust_points.push(trust_point);
            }
        }
        Ok(trust_points)
    }

    async fn list_constraints_of(&self, domain: &str) -> Result<Vec<CertificateConstraint>> {
        Ok(self
            .find_trust_domain(domain)
            .await?
            .map(|domain| domain.constraints)
            .unwrap_or_default())
    }
}

/// In-memory repository for tests, the CLI and single-node deployments
pub struct InMemoryTrustRepository {
    domains: Arc<DashMap<String, TrustDomain>>,
    trust_points: Arc<DashMap<String, TrustPoint>>,
    authorities: Arc<DashMap<String, CertificateAuthority>>,
    clock_drift: Arc<RwLock<Option<ClockDriftConfig>>>,
}

impl InMemoryTrustRepository {
    pub fn new() -> Self {
        Self {
            domains: Arc::new(DashMap::new()),
            trust_points: Arc::new(DashMap::new()),
            authorities: Arc::new(DashMap::new()),
            clock_drift: Arc::new(RwLock::new(None)),
        }
    }
}

impl Default for InMemoryTrustRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrustModelRepository for InMemoryTrustRepository {
    async fn save_trust_domain(&self, domain: TrustDomain) -> Result<()> {
        debug!("Saving trust domain: {}", domain);
        self.domains.insert(domain.name.clone(), domain);
        Ok(())
    }

    async fn find_trust_domain(&self, name: &str) -> Result<Option<TrustDomain>> {
        Ok(self.domains.get(name).map(|entry| entry.value().clone()))
    }

    async fn list_trust_domains(&self) -> Result<Vec<TrustDomain>> {
        let mut domains: Vec<TrustDomain> =
            self.domains.iter().map(|entry| entry.value().clone()).collect();
        domains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(domains)
    }

    async fn save_trust_point(&self, trust_point: TrustPoint) -> Result<()> {
        debug!("Saving trust point: {}", trust_point);
        self.authorities.insert(
            trust_point.certificate_authority.name().to_string(),
            trust_point.certificate_authority.clone(),
        );
        self.trust_points.insert(trust_point.name.clone(), trust_point);
        Ok(())
    }

    async fn find_trust_point(&self, name: &str) -> Result<Option<TrustPoint>> {
        Ok(self.trust_points.get(name).map(|entry| entry.value().clone()))
    }

    async fn list_trust_points(&self) -> Result<Vec<TrustPoint>> {
        let mut trust_points: Vec<TrustPoint> =
            self.trust_points.iter().map(|entry| entry.value().clone()).collect();
        trust_points.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(trust_points)
    }

    async fn remove_trust_point(&self, name: &str) -> Result<Option<TrustPoint>> {
        let removed = self.trust_points.remove(name).map(|(_, tp)| tp);
        if removed.is_some() {
            self.authorities.retain(|_, authority| authority.trust_point != name);
            debug!("Removed trust point {} and its certificate authorities", name);
        }
        Ok(removed)
    }

    async fn set_fire_date(&self, name: &str, fire_date: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(mut entry) = self.trust_points.get_mut(name) {
            entry.fire_date = fire_date;
        }
        Ok(())
    }

    async fn record_harvest(&self, name: &str, status: HarvestStatus) -> Result<()> {
        if let Some(mut entry) = self.trust_points.get_mut(name) {
            entry.harvest = status;
        }
        Ok(())
    }

    async fn save_authority(&self, authority: CertificateAuthority) -> Result<()> {
        self.authorities.insert(authority.name().to_string(), authority);
        Ok(())
    }

    async fn find_authority(&self, subject: &str) -> Result<Option<CertificateAuthority>> {
        Ok(self.authorities.get(subject).map(|entry| entry.value().clone()))
    }

    async fn authorities_of(&self, trust_point: &str) -> Result<Vec<CertificateAuthority>> {
        let mut authorities: Vec<CertificateAuthority> = self
            .authorities
            .iter()
            .filter(|entry| entry.value().trust_point == trust_point)
            .map(|entry| entry.value().clone())
            .collect();
        authorities.sort_by(|a, b| b.root.cmp(&a.root).then_with(|| a.name().cmp(b.name())));
        Ok(authorities)
    }

    async fn save_clock_drift_config(&self, config: ClockDriftConfig) -> Result<()> {
        *self.clock_drift.write() = Some(config);
        Ok(())
    }

    async fn find_clock_drift_config(&self) -> Result<Option<ClockDriftConfig>> {
        Ok(self.clock_drift.read().clone())
    }
}
