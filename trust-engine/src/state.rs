//! Persisted engine state
//!
//! Survives restarts: per-issuer revocation sets, the next fire date of each
//! trust point and the last measured clock offset. The model entities
//! themselves come from bootstrap configuration and are not part of it.

use crate::clock_drift::ClockDriftDetector;
use crate::error::{Result, TrustError};
use crate::revocation::{RevocationCache, RevocationSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use trust_model::TrustModelRepository;

pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub revocation: Vec<RevocationSnapshot>,
    /// Next fire date per trust point name
    #[serde(default)]
    pub fire_dates: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub clock_offset_millis: i64,
}

impl PersistedState {
    pub fn empty(saved_at: DateTime<Utc>) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            saved_at,
            revocation: Vec::new(),
            fire_dates: BTreeMap::new(),
            clock_offset_millis: 0,
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing was saved yet
    async fn load(&self) -> Result<Option<PersistedState>>;

    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Single JSON document replaced atomically on every save
pub struct JsonFileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrustError::Storage(format!("{}: {e}", self.path.display()))),
        };

        let state: PersistedState = serde_json::from_slice(&bytes)
            .map_err(|e| TrustError::Storage(format!("corrupt state file {}: {e}", self.path.display())))?;

        if state.version != STATE_FORMAT_VERSION {
            return Err(TrustError::Storage(format!(
                "unsupported state version {} in {}",
                state.version,
                self.path.display()
            )));
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let json = serde_json::to_vec_pretty(state).map_err(|e| TrustError::Storage(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrustError::Storage(format!("{}: {e}", parent.display())))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| TrustError::Storage(format!("{}: {e}", temp.display())))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| TrustError::Storage(format!("{}: {e}", self.path.display())))?;

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

/// Captures and restores state across the cache, repository and drift detector
pub struct StatePersister {
    store: Arc<dyn StateStore>,
    cache: Arc<RevocationCache>,
    repository: Arc<dyn TrustModelRepository>,
    clock_drift: Arc<ClockDriftDetector>,
    /// Held from capture until the save completes, so saves land in capture order
    persist_lock: Mutex<()>,
}

impl StatePersister {
    pub fn new(
        store: Arc<dyn StateStore>,
        cache: Arc<RevocationCache>,
        repository: Arc<dyn TrustModelRepository>,
        clock_drift: Arc<ClockDriftDetector>,
    ) -> Self {
        Self {
            store,
            cache,
            repository,
            clock_drift,
            persist_lock: Mutex::new(()),
        }
    }

    /// # Errors
    ///
    /// Fails when the repository cannot list trust points.
    pub async fn capture(&self) -> Result<PersistedState> {
        let fire_dates = self
            .repository
            .list_trust_points()
            .await?
            .into_iter()
            .filter_map(|tp| tp.fire_date.map(|date| (tp.name, date)))
            .collect();

        Ok(PersistedState {
            version: STATE_FORMAT_VERSION,
            saved_at: Utc::now(),
            revocation: self.cache.snapshot(),
            fire_dates,
            clock_offset_millis: self.clock_drift.offset_millis(),
        })
    }

    /// # Errors
    ///
    /// Returns [`TrustError::Storage`] when the state cannot be written.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let state = self.capture().await?;
        self.store.save(&state).await
    }

    /// Load saved state into the live components
    ///
    /// Fire dates are applied only to trust points that exist. Returns
    /// `false` when there was nothing to restore.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::Storage`] for an unreadable or corrupt state file.
    pub async fn restore(&self) -> Result<bool> {
        let Some(state) = self.store.load().await? else {
            return Ok(false);
        };

        let issuers = self.cache.restore(state.revocation);
        let mut fire_dates = 0usize;
        for (name, date) in state.fire_dates {
            if self.repository.find_trust_point(&name).await?.is_some() {
                self.repository.set_fire_date(&name, Some(date)).await?;
                fire_dates = fire_dates.saturating_add(1);
            }
        }
        self.clock_drift.set_offset(state.clock_offset_millis);

        info!(
            issuers,
            fire_dates,
            clock_offset_millis = state.clock_offset_millis,
            "Restored state saved at {}",
            state.saved_at.to_rfc3339()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::clock_drift::HttpDateTimeSource;
    use crate::revocation::RevokedEntrySnapshot;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use trust_model::{ClockDriftConfig, CrlNumber, InMemoryTrustRepository, SerialNumber, TimeProtocol};

    /// Keeps the first save waiting until released
    struct GatedStore {
        gate_first: AtomicBool,
        entered: Notify,
        release: Notify,
        saved: parking_lot::Mutex<Option<PersistedState>>,
    }

    #[async_trait]
    impl StateStore for GatedStore {
        async fn load(&self) -> Result<Option<PersistedState>> {
            Ok(self.saved.lock().clone())
        }

        async fn save(&self, state: &PersistedState) -> Result<()> {
            if self.gate_first.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            *self.saved.lock() = Some(state.clone());
            Ok(())
        }
    }

    fn persister(store: Arc<dyn StateStore>, cache: Arc<RevocationCache>) -> StatePersister {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let drift = ClockDriftDetector::new(
            Arc::new(HttpDateTimeSource::new()),
            clock,
            ClockDriftConfig {
                protocol: TimeProtocol::Http,
                server: "time.example".to_string(),
                timeout_millis: 100,
                max_clock_offset_millis: 5000,
                cron: "0 0/5 * * * ?".to_string(),
                enabled: false,
                offset_millis: 0,
            },
        );
        StatePersister::new(store, cache, Arc::new(InMemoryTrustRepository::new()), Arc::new(drift))
    }

    fn sample_state() -> PersistedState {
        let mut state = PersistedState::empty(Utc::now());
        state.revocation.push(RevocationSnapshot {
            issuer: "CN=RootCA".to_string(),
            crl_number: CrlNumber::from(2),
            refreshed_at: Utc::now(),
            checked_at: Utc::now(),
            entries: vec![RevokedEntrySnapshot {
                serial: SerialNumber::from(1),
                revocation_date: Utc::now(),
            }],
        });
        state.fire_dates.insert("CN=RootCA".to_string(), Utc::now());
        state.clock_offset_millis = -42;
        state
    }

    #[tokio::test]
    async fn test_missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("nested").join("state.json"));
        let state = sample_state();

        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let error = JsonFileStateStore::new(&path).load().await.unwrap_err();
        assert!(matches!(error, TrustError::Storage(_)));
    }

    #[tokio::test]
    async fn test_overlapping_persists_keep_the_newest_crl() {
        let store = Arc::new(GatedStore {
            gate_first: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
            saved: parking_lot::Mutex::new(None),
        });
        let cache = Arc::new(RevocationCache::new());
        let persister = Arc::new(persister(store.clone(), Arc::clone(&cache)));

        cache.replace_revocation_set("CN=RootCA", CrlNumber::from(1), vec![], Utc::now());
        let older = tokio::spawn({
            let persister = Arc::clone(&persister);
            async move { persister.persist().await }
        });
        store.entered.notified().await;

        cache.replace_revocation_set("CN=RootCA", CrlNumber::from(2), vec![], Utc::now());
        let newer = tokio::spawn({
            let persister = Arc::clone(&persister);
            async move { persister.persist().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        store.release.notify_one();
        older.await.unwrap().unwrap();
        newer.await.unwrap().unwrap();

        let saved = store.load().await.unwrap().unwrap();
        let numbers: Vec<&CrlNumber> = saved.revocation.iter().map(|set| &set.crl_number).collect();
        assert_eq!(numbers, vec![&CrlNumber::from(2)]);
    }
}
