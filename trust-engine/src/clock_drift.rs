//! Clock drift detection
//!
//! The detector periodically asks a reference time source for the current
//! time and keeps `offset = reference - local`. Everything that compares a
//! certificate or CRL timestamp against "now" goes through
//! [`ClockDriftDetector::corrected_now`].

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use trust_model::{ClockDriftConfig, TimeProtocol};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeSourceError {
    #[error("Time protocol {0} is not supported by this time source")]
    UnsupportedProtocol(TimeProtocol),

    #[error("Time probe timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid time response: {0}")]
    InvalidResponse(String),
}

/// Where the reference time comes from
///
/// NTP and TSP wire clients are not bundled; embedders that need them inject
/// their own implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReferenceTimeSource: Send + Sync {
    async fn reference_time(
        &self,
        protocol: TimeProtocol,
        server: &str,
        timeout: Duration,
    ) -> Result<DateTime<Utc>, TimeSourceError>;
}

/// Reads the `Date` header of a `HEAD` response
#[derive(Debug, Clone, Default)]
pub struct HttpDateTimeSource {
    client: Client,
}

impl HttpDateTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferenceTimeSource for HttpDateTimeSource {
    async fn reference_time(
        &self,
        protocol: TimeProtocol,
        server: &str,
        timeout: Duration,
    ) -> Result<DateTime<Utc>, TimeSourceError> {
        if protocol != TimeProtocol::Http {
            return Err(TimeSourceError::UnsupportedProtocol(protocol));
        }

        let url = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("https://{server}")
        };

        let response = self
            .client
            .head(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TimeSourceError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
                } else {
                    TimeSourceError::Network(e.to_string())
                }
            })?;

        let header = response
            .headers()
            .get(reqwest::header::DATE)
            .ok_or_else(|| TimeSourceError::InvalidResponse(format!("no Date header from {url}")))?
            .to_str()
            .map_err(|e| TimeSourceError::InvalidResponse(e.to_string()))?;

        DateTime::parse_from_rfc2822(header)
            .map(|date| date.with_timezone(&Utc))
            .map_err(|e| TimeSourceError::InvalidResponse(format!("'{header}': {e}")))
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftMeasurement {
    Success { offset_millis: i64 },
    Failure(TimeSourceError),
}

pub struct ClockDriftDetector {
    source: Arc<dyn ReferenceTimeSource>,
    clock: Arc<dyn Clock>,
    config: RwLock<ClockDriftConfig>,
    offset_millis: AtomicI64,
}

impl ClockDriftDetector {
    pub fn new(
        source: Arc<dyn ReferenceTimeSource>,
        clock: Arc<dyn Clock>,
        config: ClockDriftConfig,
    ) -> Self {
        let offset = config.offset_millis;
        Self {
            source,
            clock,
            config: RwLock::new(config),
            offset_millis: AtomicI64::new(offset),
        }
    }

    /// Probe the reference source once
    ///
    /// On failure the previously measured offset stays in effect.
    pub async fn measure_offset(&self) -> DriftMeasurement {
        let config = self.config();
        let timeout = Duration::from_millis(config.timeout_millis);

        let sent = self.clock.now();
        let probe = self.source.reference_time(config.protocol, &config.server, timeout);
        let result = match tokio::time::timeout(timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(TimeSourceError::Timeout(config.timeout_millis)),
        };
        let received = self.clock.now();

        match result {
            Ok(reference) => {
                let round_trip = received.signed_duration_since(sent);
                let midpoint = sent
                    .checked_add_signed(round_trip / 2)
                    .unwrap_or(received);
                let offset = reference.signed_duration_since(midpoint).num_milliseconds();
                self.set_offset(offset);
                info!(
                    server = %config.server,
                    protocol = %config.protocol,
                    offset_millis = offset,
                    "Measured clock offset"
                );
                DriftMeasurement::Success { offset_millis: offset }
            }
            Err(error) => {
                warn!(
                    server = %config.server,
                    protocol = %config.protocol,
                    "Clock drift probe failed, keeping offset {}ms: {}",
                    self.offset_millis(),
                    error
                );
                DriftMeasurement::Failure(error)
            }
        }
    }

    pub fn offset_millis(&self) -> i64 {
        self.offset_millis.load(Ordering::Acquire)
    }

    pub fn set_offset(&self, offset_millis: i64) {
        self.offset_millis.store(offset_millis, Ordering::Release);
        self.config.write().offset_millis = offset_millis;
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(telemetry::CLOCK_OFFSET_MILLIS).set(offset_millis as f64);
    }

    /// Local time shifted by the measured offset while detection is enabled
    pub fn corrected_now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        if !self.config.read().enabled {
            return now;
        }
        now.checked_add_signed(ChronoDuration::milliseconds(self.offset_millis()))
            .unwrap_or(now)
    }

    /// Always true while detection is disabled
    pub fn is_within_tolerance(&self) -> bool {
        let config = self.config.read();
        !config.enabled || self.offset_millis().unsigned_abs() <= config.max_clock_offset_millis.unsigned_abs()
    }

    /// Current settings with the live offset
    pub fn config(&self) -> ClockDriftConfig {
        let mut config = self.config.read().clone();
        config.offset_millis = self.offset_millis();
        config
    }

    /// Replace the settings; the measured offset is kept
    pub fn update_config(&self, mut config: ClockDriftConfig) {
        config.offset_millis = self.offset_millis();
        debug!("Clock drift settings updated: {} {}", config.protocol, config.server);
        *self.config.write() = config;
    }
}
