//! trustctl
//!
//! Operator tool for the trust service.
//!
//! Usage:
//!   trustctl --config trust-service.toml validate --chain chain.pem [--domain authentication]
//!   trustctl --config trust-service.toml harvest [--trust-point "CN=Root CA, C=BE"]
//!   trustctl --config trust-service.toml serve
//!   trustctl check-cron "0 0 3 * * ?" --count 5
//!   trustctl inspect certificate.pem

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "trustctl")]
#[command(about = "Validate certificate chains and manage CRL harvesting", version)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "TRUST_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log filter
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a PEM or DER certificate chain, leaf first
    Validate {
        #[arg(long)]
        chain: PathBuf,

        /// Trust domain; the default domain when omitted
        #[arg(long)]
        domain: Option<String>,

        /// Skip harvesting trust points that have no cached CRL yet
        #[arg(long)]
        offline: bool,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Harvest CRLs now and save the resulting state
    Harvest {
        /// Only this trust point; all trust points when omitted
        #[arg(long)]
        trust_point: Option<String>,
    },

    /// Run the scheduler, harvest worker and metrics exporter until Ctrl-C
    Serve,

    /// Print the next fire times of a cron expression
    CheckCron {
        expression: String,

        #[arg(long, default_value = "5")]
        count: usize,
    },

    /// Show the fields the trust linker looks at
    Inspect { certificate: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".bright_red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    if let Command::CheckCron { expression, count } = &args.command {
        return commands::check_cron(expression, *count);
    }
    if let Command::Inspect { certificate } = &args.command {
        return commands::inspect(certificate).await;
    }

    let mut config = config_engine::load_config(args.config)?;
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    telemetry::init_tracing(&config.logging)?;

    match args.command {
        Command::Validate {
            chain,
            domain,
            offline,
            json,
        } => commands::validate(config, &chain, domain.as_deref(), offline, json).await,
        Command::Harvest { trust_point } => commands::harvest(config, trust_point.as_deref()).await,
        Command::Serve => commands::serve(config).await,
        Command::CheckCron { .. } | Command::Inspect { .. } => Ok(ExitCode::SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_validate_arguments() {
        let args = Args::try_parse_from([
            "trustctl",
            "--config",
            "trust.toml",
            "validate",
            "--chain",
            "chain.pem",
            "--domain",
            "signing",
            "--json",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("trust.toml")));
        assert!(matches!(
            args.command,
            Command::Validate { domain: Some(ref d), json: true, offline: false, .. } if d == "signing"
        ));
    }

    #[test]
    fn test_check_cron_count_defaults_to_five() {
        let args = Args::try_parse_from(["trustctl", "check-cron", "0 0 3 * * ?"]).unwrap();
        assert!(matches!(args.command, Command::CheckCron { count: 5, .. }));
    }
}
