//! Trust service facade
//!
//! Wires the repository, revocation cache, harvester, linker, scheduler and
//! clock drift detector together and owns their lifecycle:
//!
//! 1. [`TrustServiceBuilder::build`] constructs every component
//! 2. [`TrustService::initialize`] seeds the model and restores saved state
//! 3. [`TrustService::start`] spawns the harvest worker and the timers
//! 4. [`TrustService::shutdown`] cancels timers and saves state

use crate::admin::TrustDomainAdmin;
use crate::bootstrap::{clock_drift_config, BootstrapReport, Bootstrapper};
use crate::clock::{Clock, SystemClock};
use crate::clock_drift::{ClockDriftDetector, DriftMeasurement, HttpDateTimeSource, ReferenceTimeSource};
use crate::error::{Result, TrustError};
use crate::fetch::{CrlFetcher, HttpCrlFetcher};
use crate::harvester::{HarvestOutcome, Harvester};
use crate::linker::{TrustDecision, TrustDomainView, TrustLinker, ValidationPolicy};
use crate::queue::{process_request, HarvestContext, HarvestQueue, HarvestRequest, HarvestTrigger, HarvestWorker};
use crate::revocation::RevocationCache;
use crate::scheduler::{Scheduler, TimerAction, TimerTarget};
use crate::state::{JsonFileStateStore, StatePersister, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_engine::TrustServiceConfig;
use error_common::log_error;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trust_model::{Certificate, InMemoryTrustRepository, TrustModelRepository};

// =============================================================================
// Timer dispatch
// =============================================================================

/// Turns timer fires into harvest requests and drift probes
struct TimerDispatcher {
    queue: HarvestQueue,
    repository: Arc<dyn TrustModelRepository>,
    clock_drift: Arc<ClockDriftDetector>,
}

#[async_trait]
impl TimerAction for TimerDispatcher {
    async fn fire(&self, target: &TimerTarget) {
        match target {
            TimerTarget::TrustPoint(name) => {
                self.queue
                    .enqueue(HarvestRequest::trust_point(name, HarvestTrigger::Scheduled));
            }
            TimerTarget::ClockDrift => {
                if let DriftMeasurement::Success { .. } = self.clock_drift.measure_offset().await {
                    if let Err(e) = self
                        .repository
                        .save_clock_drift_config(self.clock_drift.config())
                        .await
                    {
                        warn!("Failed to store clock offset: {}", e);
                    }
                }
            }
        }
    }

    async fn scheduled(&self, target: &TimerTarget, next_fire: Option<DateTime<Utc>>) {
        if let TimerTarget::TrustPoint(name) = target {
            if let Err(e) = self.repository.set_fire_date(name, next_fire).await {
                warn!(trust_point = %name, "Failed to store next fire date: {}", e);
            }
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct TrustServiceBuilder {
    config: TrustServiceConfig,
    repository: Option<Arc<dyn TrustModelRepository>>,
    fetcher: Option<Arc<dyn CrlFetcher>>,
    time_source: Option<Arc<dyn ReferenceTimeSource>>,
    clock: Option<Arc<dyn Clock>>,
    state_store: Option<Arc<dyn StateStore>>,
}

impl TrustServiceBuilder {
    pub fn new(config: TrustServiceConfig) -> Self {
        Self {
            config,
            repository: None,
            fetcher: None,
            time_source: None,
            clock: None,
            state_store: None,
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn TrustModelRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn CrlFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn ReferenceTimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_state_store(mut self, state_store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// # Errors
    ///
    /// Returns [`TrustError::HttpClient`] when the default CRL fetcher cannot
    /// be created.
    pub fn build(self) -> Result<TrustService> {
        let config = self.config;

        let repository: Arc<dyn TrustModelRepository> = match self.repository {
            Some(repository) => repository,
            None => Arc::new(InMemoryTrustRepository::new()),
        };
        let fetcher: Arc<dyn CrlFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpCrlFetcher::new(&config.harvester)?),
        };
        let time_source: Arc<dyn ReferenceTimeSource> = self
            .time_source
            .unwrap_or_else(|| Arc::new(HttpDateTimeSource::new()));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let state_store: Option<Arc<dyn StateStore>> = self.state_store.or_else(|| {
            config
                .storage
                .state_path
                .as_ref()
                .map(|path| Arc::new(JsonFileStateStore::new(path)) as Arc<dyn StateStore>)
        });

        let cache = Arc::new(RevocationCache::new());
        let clock_drift = Arc::new(ClockDriftDetector::new(
            time_source,
            Arc::clone(&clock),
            clock_drift_config(&config.clock_drift),
        ));
        let (queue, receiver) = HarvestQueue::channel();
        let harvester = Harvester::new(fetcher, Arc::clone(&cache), Arc::clone(&clock_drift));
        let persister = state_store.map(|store| {
            Arc::new(StatePersister::new(
                store,
                Arc::clone(&cache),
                Arc::clone(&repository),
                Arc::clone(&clock_drift),
            ))
        });

        let linker = TrustLinker::new(
            Arc::clone(&cache),
            Arc::clone(&clock_drift),
            Some(queue.clone()),
            ValidationPolicy::from(&config.validation),
        );
        let dispatcher = TimerDispatcher {
            queue: queue.clone(),
            repository: Arc::clone(&repository),
            clock_drift: Arc::clone(&clock_drift),
        };
        let scheduler = Arc::new(Scheduler::new(Arc::new(dispatcher), clock));
        let admin = TrustDomainAdmin::new(
            Arc::clone(&repository),
            Arc::clone(&scheduler),
            Arc::clone(&cache),
            Arc::clone(&clock_drift),
        );
        let context = HarvestContext {
            harvester,
            repository: Arc::clone(&repository),
            persister: persister.clone(),
        };

        Ok(TrustService {
            config,
            repository,
            cache,
            clock_drift,
            queue,
            linker,
            scheduler,
            admin,
            persister,
            context,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        })
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct TrustService {
    config: TrustServiceConfig,
    repository: Arc<dyn TrustModelRepository>,
    cache: Arc<RevocationCache>,
    clock_drift: Arc<ClockDriftDetector>,
    queue: HarvestQueue,
    linker: TrustLinker,
    scheduler: Arc<Scheduler>,
    admin: TrustDomainAdmin,
    persister: Option<Arc<StatePersister>>,
    context: HarvestContext,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<HarvestRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TrustService {
    pub fn builder(config: TrustServiceConfig) -> TrustServiceBuilder {
        TrustServiceBuilder::new(config)
    }

    /// Seed the model from configuration and restore persisted state
    ///
    /// A corrupt or unreadable state file is logged and ignored; the
    /// revocation cache then refills through harvesting.
    ///
    /// # Errors
    ///
    /// Propagates bootstrap failures: unreadable seed certificates and
    /// invalid cron expressions abort initialisation.
    pub async fn initialize(&self) -> Result<BootstrapReport> {
        let report = Bootstrapper::new(self.repository.as_ref())
            .run(&self.config.clock_drift, &self.config.bootstrap)
            .await?;

        if let Some(config) = self.repository.find_clock_drift_config().await? {
            self.clock_drift.update_config(config);
        }

        if let Some(persister) = &self.persister {
            if let Err(e) = persister.restore().await {
                log_error("Restoring persisted state", &e);
            }
        }
        Ok(report)
    }

    /// Spawn the harvest worker and start every timer
    ///
    /// Trust points without cached revocation data are harvested right away.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidCronExpression`] if a stored schedule no
    /// longer parses.
    pub async fn start(&self) -> Result<()> {
        let receiver = self.receiver.lock().take();
        if let Some(receiver) = receiver {
            let worker = HarvestWorker::new(receiver, self.queue.clone(), self.context.clone());
            *self.worker.lock() = Some(worker.spawn());
        }

        let trust_points = self.repository.list_trust_points().await?;
        for trust_point in &trust_points {
            let run_immediately = self.cache.last_refreshed(&trust_point.name).is_none();
            self.scheduler.start_timer(
                TimerTarget::TrustPoint(trust_point.name.clone()),
                &trust_point.crl_refresh_cron,
                run_immediately,
            )?;
        }

        let drift = self.clock_drift.config();
        if drift.enabled {
            self.scheduler.start_timer(TimerTarget::ClockDrift, &drift.cron, true)?;
        }

        info!(
            trust_points = trust_points.len(),
            clock_drift = drift.enabled,
            "Trust service started"
        );
        Ok(())
    }

    // =============================================================================
    // Validation
    // =============================================================================

    /// # Errors
    ///
    /// Returns [`TrustError::TrustDomainNotFound`] for an unknown domain.
    pub async fn validate(&self, chain: &[Certificate], domain: &str) -> Result<TrustDecision> {
        let view = self.domain_view(domain).await?;
        Ok(self.linker.validate(chain, &view))
    }

    /// # Errors
    ///
    /// Returns [`TrustError::NoDefaultTrustDomain`] when no domain is the default.
    pub async fn validate_default(&self, chain: &[Certificate]) -> Result<TrustDecision> {
        let domain = self
            .repository
            .find_default_trust_domain()
            .await?
            .ok_or(TrustError::NoDefaultTrustDomain)?;
        self.validate(chain, &domain.name).await
    }

    /// `true` only for a trusted chain; configuration errors answer `false`
    pub async fn is_valid(&self, chain: &[Certificate], domain: &str) -> bool {
        match self.validate(chain, domain).await {
            Ok(decision) => decision.is_trusted(),
            Err(e) => {
                log_error("Chain validation", &e);
                false
            }
        }
    }

    pub async fn is_valid_default(&self, chain: &[Certificate]) -> bool {
        match self.validate_default(chain).await {
            Ok(decision) => decision.is_trusted(),
            Err(e) => {
                log_error("Chain validation", &e);
                false
            }
        }
    }

    async fn domain_view(&self, name: &str) -> Result<TrustDomainView> {
        let domain = self
            .repository
            .find_trust_domain(name)
            .await?
            .ok_or_else(|| TrustError::TrustDomainNotFound(name.to_string()))?;
        let trust_points = self.repository.list_trust_points_of(name).await?;
        Ok(TrustDomainView::new(domain, trust_points))
    }

    // =============================================================================
    // Harvesting and state
    // =============================================================================

    /// Harvest every CA of a trust point now and wait for the result
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::TrustPointNotFound`] for an unknown name.
    pub async fn harvest_now(&self, trust_point: &str) -> Result<Vec<HarvestOutcome>> {
        if self.repository.find_trust_point(trust_point).await?.is_none() {
            return Err(TrustError::TrustPointNotFound(trust_point.to_string()));
        }
        let request = HarvestRequest::trust_point(trust_point, HarvestTrigger::Manual);
        Ok(process_request(&self.context, &request).await)
    }

    pub async fn measure_clock_drift(&self) -> DriftMeasurement {
        self.clock_drift.measure_offset().await
    }

    /// # Errors
    ///
    /// Returns [`TrustError::Storage`] when the state file cannot be written.
    pub async fn persist_state(&self) -> Result<()> {
        match &self.persister {
            Some(persister) => persister.persist().await,
            None => Ok(()),
        }
    }

    /// Cancel timers, stop the worker and save state
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.abort();
        }
        if let Err(e) = self.persist_state().await {
            log_error("Persisting state on shutdown", &e);
        }
        debug!("Trust service stopped");
    }

    // =============================================================================
    // Accessors
    // =============================================================================

    pub fn config(&self) -> &TrustServiceConfig {
        &self.config
    }

    pub fn admin(&self) -> &TrustDomainAdmin {
        &self.admin
    }

    pub fn repository(&self) -> &Arc<dyn TrustModelRepository> {
        &self.repository
    }

    pub fn cache(&self) -> &Arc<RevocationCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn clock_drift(&self) -> &Arc<ClockDriftDetector> {
        &self.clock_drift
    }

    pub fn harvest_queue(&self) -> &HarvestQueue {
        &self.queue
    }
}
