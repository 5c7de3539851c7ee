//! Typed configuration sections for the trust service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cron expression used when a trust point does not name its own schedule
pub const DEFAULT_CRL_REFRESH_CRON: &str = "0 0 3 * * ?";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustServiceConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub validation: ValidationConfig,
    pub harvester: HarvesterConfig,
    pub clock_drift: ClockDriftSettings,
    pub storage: StorageConfig,
    pub bootstrap: BootstrapConfig,
}

// =============================================================================
// Observability
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Prometheus scrape listener
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "0.0.0.0:9464".to_string(),
        }
    }
}

// =============================================================================
// Validation policy
// =============================================================================

/// How the validator answers when it cannot reach a definite verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    FailClosed,
    FailOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Outcome when no CRL has ever been obtained for an issuer
    pub revocation_unknown: FailurePolicy,

    /// Outcome when the measured clock offset exceeds the tolerance
    pub clock_untrusted: FailurePolicy,

    /// Cached revocation data older than this triggers a background harvest
    pub max_revocation_age_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            revocation_unknown: FailurePolicy::FailClosed,
            clock_untrusted: FailurePolicy::FailClosed,
            max_revocation_age_secs: 24 * 60 * 60,
        }
    }
}

// =============================================================================
// Harvester and network
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    pub fetch_timeout_secs: u64,
    pub max_crl_size_bytes: usize,
    pub proxy: ProxyConfig,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            max_crl_size_bytes: 10 * 1024 * 1024,
            proxy: ProxyConfig::default(),
        }
    }
}

/// Outbound HTTP proxy used for CRL downloads and time probes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// Proxy URL when enabled
    pub fn url(&self) -> Option<String> {
        if self.enabled {
            Some(format!("http://{}:{}", self.host, self.port))
        } else {
            None
        }
    }
}

// =============================================================================
// Clock drift
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeProtocolSetting {
    Ntp,
    Tsp,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockDriftSettings {
    pub enabled: bool,
    pub protocol: TimeProtocolSetting,
    pub server: String,
    pub timeout_millis: u64,
    pub max_clock_offset_millis: i64,
    pub cron: String,
}

impl Default for ClockDriftSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: TimeProtocolSetting::Ntp,
            server: "pool.ntp.org".to_string(),
            timeout_millis: 10_000,
            max_clock_offset_millis: 5_000,
            cron: DEFAULT_CRL_REFRESH_CRON.to_string(),
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON state file; state is kept in memory only when unset
    pub state_path: Option<PathBuf>,
}

// =============================================================================
// Bootstrap
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub default_crl_refresh_cron: String,
    pub trust_points: Vec<SeedTrustPoint>,
    pub domains: Vec<SeedTrustDomain>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            default_crl_refresh_cron: DEFAULT_CRL_REFRESH_CRON.to_string(),
            trust_points: Vec::new(),
            domains: Vec::new(),
        }
    }
}

/// A root certificate shipped with the deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTrustPoint {
    /// Key used by domains to reference this trust point
    pub alias: String,
    /// PEM or DER encoded certificate
    pub certificate_path: PathBuf,
    #[serde(default)]
    pub crl_refresh_cron: Option<String>,
    #[serde(default)]
    pub crl_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTrustDomain {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    /// Aliases of seed trust points
    #[serde(default)]
    pub trust_points: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintSetting {
    KeyUsage { usage: String, required: bool },
    CertificatePolicy { oid: String },
    QcStatements { require_qc_compliance: bool },
    DistinguishedName { pattern: String },
}
