use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregator;
mod coverage;
mod dates;
mod error;
mod mapping;
mod models;
mod pagerduty;
mod report;

use aggregator::CoverageGapReport;
use dates::ReportWindow;
use pagerduty::PagerDutyClient;

#[derive(Parser, Debug)]
#[command(name = "coverage-gap-report")]
#[command(about = "Find on-call coverage gaps in PagerDuty schedules and escalation rules", long_about = None)]
struct Cli {
    /// PagerDuty API v2 token with read access
    #[arg(long, env = "PAGERDUTY_TOKEN", hide_env_values = true)]
    token: String,
    /// Number of days to look ahead for gaps
    #[arg(
        long,
        default_value_t = 14,
        value_parser = clap::value_parser!(i64).range(1..=dates::MAX_LOOK_AHEAD_DAYS)
    )]
    look_ahead: i64,
    /// Objects requested per page (1 to 100)
    #[arg(long, default_value_t = pagerduty::MAX_QUERY_LIMIT)]
    max_query_limit: usize,
    #[arg(long, env = "PAGERDUTY_BASE_URL", default_value = pagerduty::DEFAULT_BASE_URL)]
    base_url: String,
    /// Directory the CSV reports are written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let window = ReportWindow::look_ahead(Utc::now(), cli.look_ahead)
        .context("invalid look-ahead window")?;
    info!(since = %window.since_iso(), until = %window.until_iso(), "checking coverage");

    let client = PagerDutyClient::new(&cli.token, &cli.base_url, cli.max_query_limit)
        .context("failed to configure PagerDuty client")?;
    let results = CoverageGapReport::new(client, window)
        .run_reports()
        .await
        .context("coverage gap report failed")?;

    let gapped = results
        .rules
        .iter()
        .filter(|rule| rule.is_fully_covered.as_bool() == Some(false))
        .count();
    let (schedule_path, escalation_path) = report::write_reports(&cli.out_dir, &results)
        .with_context(|| format!("failed to write reports to {}", cli.out_dir.display()))?;

    println!(
        "{} schedules and {} escalation rules checked, {} rules with gaps.",
        results.schedules.len(),
        results.rules.len(),
        gapped
    );
    println!("Schedule report written to {}.", schedule_path.display());
    println!("Escalation rule report written to {}.", escalation_path.display());

    Ok(())
}
