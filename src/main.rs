use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use serde::Serialize;
use strum_macros::Display;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tlstracker::config::{Config, OutputFormat};
use tlstracker::hostname::normalize_input;
use tlstracker::{
    default_handler, CertService, CheckResult, DomainId, ResultHandler, Task, UserId, WorkerPool,
};

mod metrics;

const DEFAULT_CONFIG_FILE: &str = "tlstracker.toml";

#[derive(Parser, Debug)]
#[command(name = "tlstracker", version, author, about = "Concurrent TLS certificate expiry checker")]
struct Args {
    /// Hostname to check (repeatable; https:// URLs are accepted)
    #[arg(short = 'H', long = "host", num_args = 1..)]
    hosts: Vec<String>,

    /// Configuration file (defaults to ./tlstracker.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format: json, text, summary
    #[arg(short, long)]
    output: Option<String>,

    /// Exit code when a check failed or a certificate is expired
    #[arg(long)]
    exit_code: Option<i32>,

    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Per-check timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Verify the certificate chain and hostname
    #[arg(long)]
    verify: bool,

    /// Push results to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address
    #[arg(long)]
    prometheus_address: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
enum Status {
    Valid,
    Warning,
    Expired,
    Error,
}

#[derive(Debug, Serialize)]
struct Report {
    hostname: String,
    status: Status,
    days_remaining: Option<i64>,
    expires_at: Option<DateTime<Utc>>,
    issuer: Option<String>,
    error: Option<String>,
    checked_at: DateTime<Utc>,
}

impl Report {
    fn new(result: &CheckResult, warn_days: i64) -> Self {
        match &result.outcome {
            Ok(cert) => {
                let status = if cert.is_expired() {
                    Status::Expired
                } else if cert.days_remaining <= warn_days {
                    Status::Warning
                } else {
                    Status::Valid
                };
                Report {
                    hostname: result.task.hostname.clone(),
                    status,
                    days_remaining: Some(cert.days_remaining),
                    expires_at: Some(cert.expires_at),
                    issuer: cert.issuer.clone(),
                    error: None,
                    checked_at: result.checked_at,
                }
            }
            Err(e) => Report {
                hostname: result.task.hostname.clone(),
                status: Status::Error,
                days_remaining: None,
                expires_at: None,
                issuer: None,
                error: Some(e.to_string()),
                checked_at: result.checked_at,
            },
        }
    }

    fn failed(&self) -> bool {
        matches!(self.status, Status::Expired | Status::Error)
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::default();
    match &args.config {
        Some(path) => {
            let file = Config::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config = config.merge_with(file);
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            let file = Config::from_file(DEFAULT_CONFIG_FILE)
                .with_context(|| format!("failed to load {}", DEFAULT_CONFIG_FILE))?;
            config = config.merge_with(file);
        }
        None => {}
    }

    let cli = Config::from_cli_args(
        (!args.hosts.is_empty()).then(|| args.hosts.clone()),
        args.output.clone(),
        args.exit_code,
        args.workers,
        args.timeout,
        args.verify.then_some(true),
        args.prometheus.then_some(true),
        args.prometheus_address.clone(),
    );
    let config = config.merge_with(cli);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_summary(reports: &[Report]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Host", "Status", "Days Left", "Expires", "Issuer / Error"]);
    for report in reports {
        let color = match report.status {
            Status::Valid => Color::Green,
            Status::Warning => Color::Yellow,
            Status::Expired | Status::Error => Color::Red,
        };
        table.add_row(vec![
            Cell::new(&report.hostname),
            Cell::new(report.status).fg(color),
            Cell::new(
                report
                    .days_remaining
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(
                report
                    .expires_at
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(
                report
                    .error
                    .as_deref()
                    .or(report.issuer.as_deref())
                    .unwrap_or(""),
            ),
        ]);
    }
    println!("{table}");
}

fn print_text(reports: &[Report]) {
    for report in reports {
        println!("--------------------------------------");
        println!("Hostname: {}", report.hostname);
        println!("Status: {}", report.status);
        if let Some(days) = report.days_remaining {
            println!("Days left: {}", days);
        }
        if let Some(expires_at) = report.expires_at {
            println!("Valid to: {}", expires_at.to_rfc2822());
        }
        if let Some(issuer) = &report.issuer {
            println!("Issuer: {}", issuer);
        }
        if let Some(error) = &report.error {
            println!("Error: {}", error);
        }
        println!("Checked at: {}", report.checked_at.to_rfc3339());
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;
    let hosts = config.hosts.clone().unwrap_or_default();
    if hosts.is_empty() {
        bail!("no hosts to check; pass --host or set `hosts` in {}", DEFAULT_CONFIG_FILE);
    }

    let tasks: Vec<Task> = hosts
        .iter()
        .enumerate()
        .map(|(i, input)| {
            // malformed input is submitted verbatim so it is reported like any other failure
            let hostname = normalize_input(input)
                .map(|h| h.into_inner())
                .unwrap_or_else(|_| input.clone());
            Task::new(hostname, DomainId(i as u64 + 1), UserId(1))
        })
        .collect();

    let service = CertService::with_pool(WorkerPool::with_options(config.pool_options()));
    service.start();
    let handler: ResultHandler = Arc::new(default_handler);
    let mut results = service.check_batch(tasks, handler).await;
    service.stop().await;
    service.join_drain().await;

    results.sort_by_key(|r| r.task.domain_id);
    let warn_days = config.warn_days.unwrap_or(30);
    let reports: Vec<Report> = results.iter().map(|r| Report::new(r, warn_days)).collect();

    match config.output_format()? {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => print_text(&reports),
        OutputFormat::Summary => print_summary(&reports),
    }

    if config.prometheus_enabled() {
        if let Some(address) = config.prometheus_address().map(str::to_string) {
            let failures =
                tokio::task::spawn_blocking(move || metrics::prom::push_results(&results, &address))
                    .await
                    .context("metrics push task failed")?;
            if failures > 0 {
                warn!(failures, "some metrics could not be pushed");
            }
        }
    }

    let failed = reports.iter().filter(|r| r.failed()).count();
    info!(checked = reports.len(), failed, "run complete");
    if failed > 0 {
        let code = config.exit_code.unwrap_or(0);
        return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    if args.generate_config {
        println!("{}", Config::example_toml());
        return Ok(ExitCode::SUCCESS);
    }
    init_logging(&args.log_level, args.log_json);
    run(args).await
}
