use crate::error::{Result, TelemetryError};
use config_engine::MetricsConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Chain validations, labelled by `decision` and `reason`
pub const VALIDATIONS_TOTAL: &str = "trust_validations_total";
/// CRL harvests, labelled by `outcome`
pub const HARVESTS_TOTAL: &str = "trust_harvests_total";
/// Revocation entries currently cached across all issuers
pub const REVOKED_ENTRIES: &str = "trust_revoked_entries";
/// Last measured offset between the reference clock and the local clock
pub const CLOCK_OFFSET_MILLIS: &str = "trust_clock_offset_millis";

pub fn describe_metrics() {
    metrics::describe_counter!(VALIDATIONS_TOTAL, "Certificate chain validations by decision");
    metrics::describe_counter!(HARVESTS_TOTAL, "CRL harvest attempts by outcome");
    metrics::describe_gauge!(REVOKED_ENTRIES, "Cached revocation entries");
    metrics::describe_gauge!(CLOCK_OFFSET_MILLIS, "Measured clock offset in milliseconds");
}

/// Start the Prometheus scrape endpoint when enabled
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`TelemetryError::ExporterError`] for an unparsable address or a
/// failed listener installation.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let address: SocketAddr = config
        .listen_address
        .parse()
        .map_err(|e| TelemetryError::ExporterError(format!("{}: {e}", config.listen_address)))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| TelemetryError::ExporterError(e.to_string()))?;

    describe_metrics();
    info!("Prometheus exporter listening on {}", address);
    Ok(())
}
