use anyhow::Context;
use chrono::Utc;
use colored::Colorize;
use config_engine::TrustServiceConfig;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use trust_engine::{CronSchedule, DistrustReason, HarvestOutcome, TrustDecision, TrustService};
use trust_model::{Certificate, KeyUsageBit};

/// How long a one-shot validation waits for follow-up harvests
const HARVEST_WAIT: Duration = Duration::from_secs(30);

// =============================================================================
// Offline commands
// =============================================================================

pub fn check_cron(expression: &str, count: usize) -> anyhow::Result<ExitCode> {
    let schedule = CronSchedule::parse(expression)?;
    let upcoming = schedule.upcoming(Utc::now(), count);
    if upcoming.is_empty() {
        println!("{} '{}' never fires", "warning:".yellow().bold(), schedule.expression());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{} {}", "Schedule".bright_cyan(), schedule.expression());
    for fire in upcoming {
        println!("  {}", fire.to_rfc3339());
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn inspect(path: &Path) -> anyhow::Result<ExitCode> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let certificates = Certificate::parse_any(&data)?;

    for (position, certificate) in certificates.iter().enumerate() {
        println!("{} #{}", "Certificate".bright_cyan(), position);
        print_certificate(certificate);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_certificate(certificate: &Certificate) {
    println!("  subject      {}", certificate.subject());
    println!("  issuer       {}", certificate.issuer());
    println!("  serial       {}", certificate.serial());
    println!("  not before   {}", certificate.not_before().to_rfc3339());
    println!("  not after    {}", certificate.not_after().to_rfc3339());
    println!("  sha256       {}", certificate.fingerprint());
    println!("  ca           {}", certificate.is_ca());

    let usages: Vec<&str> = KeyUsageBit::ALL
        .iter()
        .filter(|bit| certificate.has_key_usage(**bit))
        .map(KeyUsageBit::as_str)
        .collect();
    if !usages.is_empty() {
        println!("  key usage    {}", usages.join(", "));
    }
    if !certificate.policies().is_empty() {
        println!("  policies     {}", certificate.policies().join(", "));
    }
    if certificate.is_qc_compliant() {
        println!("  qc statement compliance");
    }
    for url in certificate.crl_distribution_points() {
        println!("  crl          {url}");
    }
}

// =============================================================================
// Service commands
// =============================================================================

pub async fn validate(
    config: TrustServiceConfig,
    chain_path: &Path,
    domain: Option<&str>,
    offline: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let data = tokio::fs::read(chain_path)
        .await
        .with_context(|| format!("reading {}", chain_path.display()))?;
    let chain = Certificate::parse_any(&data)?;

    let service = TrustService::builder(config).build()?;
    service.initialize().await?;

    if !offline {
        for trust_point in service.repository().list_trust_points().await? {
            if service.cache().last_refreshed(&trust_point.name).is_none() {
                report_outcomes(&trust_point.name, &service.harvest_now(&trust_point.name).await?);
            }
        }
    }

    let mut decision = decide(&service, &chain, domain).await?;
    if !offline && matches!(decision.reason(), Some(DistrustReason::RevocationUnknown { .. })) {
        // subordinate CAs are registered and harvested by the worker
        service.start().await?;
        drain_queue(&service).await;
        decision = decide(&service, &chain, domain).await?;
    }
    service.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        match &decision {
            TrustDecision::Trusted => println!("{}", "TRUSTED".bright_green().bold()),
            TrustDecision::Distrusted(reason) => {
                println!("{} {}", "DISTRUSTED".bright_red().bold(), reason);
            }
        }
    }

    Ok(if decision.is_trusted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn decide(service: &TrustService, chain: &[Certificate], domain: Option<&str>) -> anyhow::Result<TrustDecision> {
    Ok(match domain {
        Some(domain) => service.validate(chain, domain).await?,
        None => service.validate_default(chain).await?,
    })
}

async fn drain_queue(service: &TrustService) {
    let started = tokio::time::Instant::now();
    while service.harvest_queue().pending() > 0 && started.elapsed() < HARVEST_WAIT {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

pub async fn harvest(config: TrustServiceConfig, only: Option<&str>) -> anyhow::Result<ExitCode> {
    let service = TrustService::builder(config).build()?;
    service.initialize().await?;

    let names: Vec<String> = match only {
        Some(name) => vec![name.to_string()],
        None => service
            .repository()
            .list_trust_points()
            .await?
            .into_iter()
            .map(|trust_point| trust_point.name)
            .collect(),
    };

    let mut failures = 0_usize;
    for name in &names {
        let outcomes = service.harvest_now(name).await?;
        failures = failures.saturating_add(
            outcomes
                .iter()
                .filter(|outcome| matches!(outcome, HarvestOutcome::Failure(_)))
                .count(),
        );
        report_outcomes(name, &outcomes);
    }
    service.persist_state().await?;

    info!(trust_points = names.len(), failures, "Harvest finished");
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report_outcomes(trust_point: &str, outcomes: &[HarvestOutcome]) {
    println!("{} {}", "Trust point".bright_cyan(), trust_point);
    for outcome in outcomes {
        match outcome {
            HarvestOutcome::Success {
                crl_number,
                entry_count,
                applied,
            } => {
                let state = if *applied { "applied" } else { "unchanged" };
                println!(
                    "  {} CRL {} with {} entries ({})",
                    "ok".bright_green(),
                    crl_number,
                    entry_count,
                    state
                );
            }
            HarvestOutcome::Failure(failure) => println!("  {} {}", "failed".bright_red(), failure),
            HarvestOutcome::AlreadyRunning => println!("  {}", "already running".yellow()),
        }
    }
}

pub async fn serve(config: TrustServiceConfig) -> anyhow::Result<ExitCode> {
    telemetry::init_metrics(&config.metrics)?;

    let service = TrustService::builder(config).build()?;
    let report = service.initialize().await?;
    service.start().await?;

    info!(
        trust_points = report.trust_points_created.saturating_add(report.trust_points_existing),
        default_domain = report.default_domain.as_deref().unwrap_or("-"),
        "Trust service running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown requested");
    service.shutdown().await;
    Ok(ExitCode::SUCCESS)
}
