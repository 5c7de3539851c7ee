//! Harvest request queue and worker
//!
//! Validators and timers enqueue [`HarvestRequest`]s; a single
//! [`HarvestWorker`] drains the channel and runs each harvest on its own task.
//! Enqueueing never blocks and never waits for the harvest.

use crate::harvester::{HarvestOutcome, Harvester};
use crate::state::StatePersister;
use dashmap::DashMap;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trust_model::{Certificate, CertificateAuthority, TrustModelRepository};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarvestTrigger {
    Scheduled,
    /// Validation found no CRL for an issuer
    RevocationUnknown,
    /// Validation found revocation data older than the allowed age
    Stale,
    Manual,
}

impl fmt::Display for HarvestTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HarvestTrigger::Scheduled => "scheduled",
            HarvestTrigger::RevocationUnknown => "revocation_unknown",
            HarvestTrigger::Stale => "stale",
            HarvestTrigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct HarvestRequest {
    pub id: Uuid,
    pub trust_point: String,
    /// Harvest only this CA; `None` harvests every CA of the trust point
    pub authority: Option<Certificate>,
    /// Distribution point found on a certificate the CA issued
    pub crl_url: Option<String>,
    pub trigger: HarvestTrigger,
}

impl HarvestRequest {
    pub fn trust_point(trust_point: impl Into<String>, trigger: HarvestTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            trust_point: trust_point.into(),
            authority: None,
            crl_url: None,
            trigger,
        }
    }

    pub fn authority(trust_point: impl Into<String>, authority: Certificate, trigger: HarvestTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            trust_point: trust_point.into(),
            authority: Some(authority),
            crl_url: None,
            trigger,
        }
    }

    pub fn with_crl_url(mut self, crl_url: Option<String>) -> Self {
        self.crl_url = crl_url;
        self
    }

    /// Deduplication key: one pending request per trust point and CA
    pub fn key(&self) -> String {
        match &self.authority {
            Some(authority) => format!("{}|{}", self.trust_point, authority.subject()),
            None => self.trust_point.clone(),
        }
    }
}

/// Sending side of the harvest channel
#[derive(Clone)]
pub struct HarvestQueue {
    sender: mpsc::UnboundedSender<HarvestRequest>,
    pending: Arc<DashMap<String, ()>>,
}

impl HarvestQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HarvestRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                pending: Arc::new(DashMap::new()),
            },
            receiver,
        )
    }

    /// Returns `false` if an identical request is already pending or the
    /// worker has gone away
    pub fn enqueue(&self, request: HarvestRequest) -> bool {
        let key = request.key();
        if self.pending.insert(key.clone(), ()).is_some() {
            debug!(request = %key, "Harvest already pending");
            return false;
        }
        debug!(request = %key, trigger = %request.trigger, id = %request.id, "Enqueued harvest");
        if self.sender.send(request).is_err() {
            self.pending.remove(&key);
            warn!(request = %key, "Harvest worker is not running");
            return false;
        }
        true
    }

    pub fn complete(&self, key: &str) {
        self.pending.remove(key);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Everything a harvest run needs besides the request itself
#[derive(Clone)]
pub struct HarvestContext {
    pub harvester: Harvester,
    pub repository: Arc<dyn TrustModelRepository>,
    pub persister: Option<Arc<StatePersister>>,
}

/// Harvest the CAs a request names and record the outcome on the trust point
///
/// A subordinate CA that is not yet known is registered under the trust
/// point first so that later scheduled harvests include it. A CA without a
/// known CRL location adopts the one the request carries.
pub async fn process_request(context: &HarvestContext, request: &HarvestRequest) -> Vec<HarvestOutcome> {
    let repository = &context.repository;
    let mut trust_point = match repository.find_trust_point(&request.trust_point).await {
        Ok(Some(trust_point)) => trust_point,
        Ok(None) => {
            warn!(trust_point = %request.trust_point, "Harvest requested for unknown trust point");
            return Vec::new();
        }
        Err(e) => {
            warn!(trust_point = %request.trust_point, "Trust point lookup failed: {}", e);
            return Vec::new();
        }
    };

    let authorities = match &request.authority {
        Some(certificate) => match repository.find_authority(certificate.subject()).await {
            Ok(Some(authority)) => vec![learn_crl_url(context, authority, request.crl_url.as_deref()).await],
            Ok(None) => {
                let authority = CertificateAuthority::subordinate(certificate.clone(), &trust_point.name)
                    .with_crl_url(request.crl_url.clone());
                if let Err(e) = repository.save_authority(authority.clone()).await {
                    warn!(authority = %certificate.subject(), "Failed to register subordinate CA: {}", e);
                }
                info!(
                    trust_point = %trust_point.name,
                    authority = %certificate.subject(),
                    crl_url = authority.crl_url().unwrap_or("-"),
                    "Registered subordinate CA"
                );
                vec![authority]
            }
            Err(e) => {
                warn!(authority = %certificate.subject(), "Authority lookup failed: {}", e);
                return Vec::new();
            }
        },
        None => {
            if let Some(url) = request.crl_url.as_ref() {
                if trust_point.certificate_authority.crl_url().is_none() {
                    trust_point.certificate_authority.crl_url = Some(url.clone());
                    info!(trust_point = %trust_point.name, crl_url = %url, "Learned CRL location of root CA");
                    if let Err(e) = repository.save_trust_point(trust_point.clone()).await {
                        warn!(trust_point = %trust_point.name, "Failed to save CRL location: {}", e);
                    }
                }
            }
            match repository.authorities_of(&trust_point.name).await {
                Ok(authorities) if !authorities.is_empty() => authorities,
                Ok(_) => vec![trust_point.certificate_authority.clone()],
                Err(e) => {
                    warn!(trust_point = %trust_point.name, "Authority listing failed: {}", e);
                    return Vec::new();
                }
            }
        }
    };

    let outcomes = join_all(
        authorities
            .iter()
            .map(|authority| context.harvester.harvest_authority(authority)),
    )
    .await;

    drop_removed_issuers(context, &authorities).await;
    record_outcomes(context, &trust_point.name, &authorities, &outcomes).await;
    outcomes
}

async fn learn_crl_url(
    context: &HarvestContext,
    mut authority: CertificateAuthority,
    crl_url: Option<&str>,
) -> CertificateAuthority {
    let Some(url) = crl_url else {
        return authority;
    };
    if authority.crl_url().is_some() {
        return authority;
    }
    authority.crl_url = Some(url.to_string());
    info!(authority = %authority.name(), crl_url = %url, "Learned CRL location");
    if let Err(e) = context.repository.save_authority(authority.clone()).await {
        warn!(authority = %authority.name(), "Failed to save CRL location: {}", e);
    }
    authority
}

/// A trust point removed while its CRLs were in flight must not leave
/// revocation sets behind
async fn drop_removed_issuers(context: &HarvestContext, authorities: &[CertificateAuthority]) {
    for authority in authorities {
        if matches!(context.repository.find_authority(authority.name()).await, Ok(None))
            && context.harvester.cache().remove_issuer(authority.name())
        {
            info!(authority = %authority.name(), "Dropped revocation set of removed CA");
        }
    }
}

async fn record_outcomes(
    context: &HarvestContext,
    trust_point: &str,
    authorities: &[CertificateAuthority],
    outcomes: &[HarvestOutcome],
) {
    let Ok(Some(current)) = context.repository.find_trust_point(trust_point).await else {
        return;
    };
    let now = context.harvester.corrected_now();
    let mut status = current.harvest.clone();
    let mut any_applied = false;

    for (authority, outcome) in authorities.iter().zip(outcomes) {
        match outcome {
            HarvestOutcome::Success {
                crl_number,
                applied,
                ..
            } => {
                any_applied |= *applied;
                if authority.root {
                    status.record_success(now, crl_number.clone());
                }
            }
            HarvestOutcome::Failure(failure) => {
                status.record_failure(now, format!("{}: {}", authority.name(), failure));
            }
            HarvestOutcome::AlreadyRunning => {}
        }
    }

    if status != current.harvest {
        if let Err(e) = context.repository.record_harvest(trust_point, status).await {
            warn!(trust_point, "Failed to record harvest status: {}", e);
        }
    }

    if any_applied {
        if let Some(persister) = &context.persister {
            if let Err(e) = persister.persist().await {
                error_common::log_error("Persisting revocation state", &e);
            }
        }
    }
}

/// Receiving side: one task per request
pub struct HarvestWorker {
    receiver: mpsc::UnboundedReceiver<HarvestRequest>,
    queue: HarvestQueue,
    context: HarvestContext,
}

impl HarvestWorker {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<HarvestRequest>,
        queue: HarvestQueue,
        context: HarvestContext,
    ) -> Self {
        Self {
            receiver,
            queue,
            context,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every sender is dropped
    pub async fn run(mut self) {
        info!("Harvest worker started");
        while let Some(request) = self.receiver.recv().await {
            let context = self.context.clone();
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let key = request.key();
                debug!(request = %key, trigger = %request.trigger, id = %request.id, "Processing harvest");
                process_request(&context, &request).await;
                queue.complete(&key);
            });
        }
        info!("Harvest worker stopped");
    }
}
