// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Signalpost main entry point - CLI and the greeter demo.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use signalpost::config::{self, CliOptions};
use signalpost::logging::{init_logging, LogConfig};
use signalpost::provider::{ExporterOutcome, ProviderShutdown};
use signalpost::workload::{self, Greeter, RunMode};
use signalpost::{ShutdownReport, Telemetry, VERSION};

/// Signalpost - counters and spans with flush-before-exit shutdown.
#[derive(Parser)]
#[command(name = "signalpost")]
#[command(author, version, about = "Telemetry pipeline demo", long_about = None)]
struct Cli {
    /// Configuration file (replaces the local config file search)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collector base endpoint
    #[arg(short, long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    endpoint: Option<String>,

    /// Service name
    #[arg(long, env = "OTEL_SERVICE_NAME")]
    service_name: Option<String>,

    /// Service version
    #[arg(long, env = "OTEL_SERVICE_VERSION")]
    service_version: Option<String>,

    /// Extra resource attributes (key=value,key=value)
    #[arg(long, env = "OTEL_RESOURCE_ATTRIBUTES")]
    resource_attributes: Option<String>,

    /// Metric export interval in milliseconds
    #[arg(long, env = "OTEL_METRIC_EXPORT_INTERVAL")]
    metric_interval: Option<u64>,

    /// Shutdown flush timeout in milliseconds
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    /// Do not start the forwarding agent
    #[arg(long)]
    no_agent: bool,

    /// Run N workload cycles instead of waiting for 'q'
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Show debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the greeter workload (default)
    Run,

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,
    /// Write an example config file in the current directory
    Init,
}

impl Cli {
    fn options(&self) -> CliOptions {
        CliOptions {
            endpoint: self.endpoint.clone(),
            service_name: self.service_name.clone(),
            service_version: self.service_version.clone(),
            resource_attributes: self.resource_attributes.clone(),
            metric_export_interval_ms: self.metric_interval,
            shutdown_timeout_ms: self.shutdown_timeout,
            no_agent: self.no_agent,
        }
    }

    fn load_config(&self) -> anyhow::Result<config::TelemetryConfig> {
        let workspace_root = std::env::current_dir()?;
        let config = config::load_config_with_file(&workspace_root, self.config.as_deref(), self.options())?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.debug {
        LogConfig::development()
    } else {
        LogConfig::default()
    };
    let _log_guard = init_logging(&log_config)?;

    match &cli.command {
        Some(Commands::Config { action }) => handle_config(&cli, action.as_ref()),
        Some(Commands::Version) => {
            println!("signalpost {}", VERSION);
            Ok(())
        }
        Some(Commands::Run) | None => run(&cli).await,
    }
}

fn handle_config(cli: &Cli, action: Option<&ConfigAction>) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let mut config = cli.load_config()?;
            workload::configure_sources(&mut config);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Some(ConfigAction::Init) => {
            let workspace_root = std::env::current_dir()?;
            let path = config::init_config(&workspace_root)?;
            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut config = cli.load_config()?;
    workload::configure_sources(&mut config);

    let telemetry = Telemetry::start(config)?;
    let greeter = Greeter::new(telemetry.registry())?;

    let mode = match cli.iterations {
        Some(n) => RunMode::Iterations(n),
        None => RunMode::Interactive,
    };
    let outcome = workload::run(&greeter, mode).await;

    // Flush even when the workload failed.
    let report = telemetry.shutdown().await;
    print_report(&report);

    outcome.map(|_| ())
}

fn print_report(report: &ShutdownReport) {
    println!("{}", "Telemetry shutdown".bright_blue().bold());
    print_provider(&report.traces);
    print_provider(&report.metrics);
    if let Some(agent) = &report.agent {
        println!("  agent: {}", agent.to_string().dimmed());
    }
}

fn print_provider(report: &ProviderShutdown) {
    println!(
        "  {} ({} ms)",
        report.signal.bright_white(),
        report.elapsed.as_millis()
    );
    if report.exporters.is_empty() {
        println!("    {}", "no exporters".dimmed());
    }
    for exporter in &report.exporters {
        let outcome = match &exporter.outcome {
            ExporterOutcome::Flushed => "flushed".green(),
            ExporterOutcome::TimedOut => "timed out".yellow(),
            ExporterOutcome::Failed(e) => format!("failed: {}", e).red(),
        };
        println!("    {} {}", exporter.exporter, outcome);
    }
}
