use anyhow::{anyhow, Context, Result};
use cert_probe::TlsProbe;
use certwatch_core::ratelimiter::RateLimiter;
use clap::Parser;
use expiry_aggregate::EndpointAggregator;
use port_range::{PortRangeOptions, PortRangeScanner};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod report;

use config::{Config, Settings};

#[derive(Debug, Parser)]
#[command(name = "certwatch", version, about = "TLS certificate expiry report for registered service endpoints")]
struct Cli {
    /// Directory with service metadata (<service>.json)
    #[arg(env = "CERTWATCH_SRC_DIR")]
    src: Option<PathBuf>,
    /// Refresh metadata from the registry before scanning
    #[arg(short = 'u', long)]
    update: bool,
    /// CSV file to save the report to
    #[arg(short = 'o', long = "csv-output", env = "CERTWATCH_OUTPUT", value_name = "FILE")]
    output: Option<PathBuf>,
    /// Also write the per-service mapping as JSON
    #[arg(long, value_name = "FILE")]
    summary_json: Option<PathBuf>,
    /// Organization whose services are fetched on --update
    #[arg(long)]
    org: Option<String>,
    /// Network selector passed through to the registry
    #[arg(long)]
    network: Option<String>,
    /// Registry base URL used by --update
    #[arg(long)]
    registry_url: Option<String>,
    /// Timeout per certificate probe in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Number of consecutive ports probed from each declared port
    #[arg(long)]
    port_range: Option<u16>,
    /// Also probe port 443 on every endpoint host
    #[arg(long)]
    check_443: bool,
    /// Max probes in flight across the whole run
    #[arg(long)]
    concurrency: Option<usize>,
    /// Probe launches per second; 0 disables pacing
    #[arg(long)]
    qps: Option<u32>,
    /// Optional config file (YAML). If omitted, loads ./certwatch.yaml if present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Config {
        Config {
            src: self.src.clone(),
            output: self.output.clone(),
            summary_json: self.summary_json.clone(),
            update: self.update.then_some(true),
            org: self.org.clone(),
            network: self.network.clone(),
            registry_url: self.registry_url.clone(),
            timeout_secs: self.timeout_secs,
            port_range: self.port_range,
            check_443: self.check_443.then_some(true),
            concurrency: self.concurrency,
            qps: self.qps,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let file_cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    let settings = Settings::from(cli.overrides().or(file_cfg));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(until_interrupted(run(&settings), tokio::signal::ctrl_c()))
}

/// Race `run` against `signal`. A signal future that errors (no handler could
/// be installed) disables interruption instead of aborting the run.
async fn until_interrupted<R, S>(run: R, signal: S) -> Result<()>
where
    R: Future<Output = Result<()>>,
    S: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(run);
    tokio::select! {
        res = &mut run => res,
        sig = signal => match sig {
            Ok(()) => Err(anyhow!("interrupted")),
            Err(e) => {
                warn!("cannot listen for Ctrl-C: {}", e);
                run.await
            }
        },
    }
}

async fn run(settings: &Settings) -> Result<()> {
    let started = Instant::now();
    if settings.update {
        refresh(settings).await?;
    }
    let descriptors = descriptors::load_dir(&settings.src)
        .with_context(|| format!("cannot read metadata directory {}", settings.src.display()))?;
    info!("loaded {} descriptor(s) from {}", descriptors.len(), settings.src.display());

    let probe = Arc::new(TlsProbe::new(settings.timeout)?);
    let opts = PortRangeOptions { check_443: settings.check_443, range_size: settings.port_range };
    let mut scanner = PortRangeScanner::new(probe, opts).with_global_limit(Arc::new(Semaphore::new(settings.concurrency)));
    if settings.qps > 0 {
        scanner = scanner.with_pacing(Arc::new(RateLimiter::new(settings.qps)));
    }
    let result = EndpointAggregator::new(scanner).aggregate(descriptors).await;

    info!("Saving report to {}", settings.output.display());
    report::save_csv(&settings.output, &result.rows)?;
    if let Some(path) = &settings.summary_json {
        report::save_summary_json(path, &result)?;
    }
    info!(
        "{} row(s) from {} service(s), {} skipped ({} ms)",
        result.rows.len(),
        result.services.len(),
        result.skipped.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}

#[cfg(feature = "registry")]
async fn refresh(settings: &Settings) -> Result<()> {
    let url = settings
        .registry_url
        .as_deref()
        .ok_or_else(|| anyhow!("--update requires --registry-url (or registry_url in the config file)"))?;
    let registry = descriptors::registry::HttpRegistry::new(url, settings.network.clone(), std::time::Duration::from_secs(30))?;
    let written = descriptors::refresh_dir(&registry, &settings.org, &settings.src)
        .await
        .with_context(|| format!("registry refresh for {} failed", settings.org))?;
    info!("refreshed {} descriptor(s) into {}", written.len(), settings.src.display());
    Ok(())
}

#[cfg(not(feature = "registry"))]
async fn refresh(_settings: &Settings) -> Result<()> {
    Err(anyhow!("--update needs the `registry` feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from(["certwatch", "./meta", "-u", "--check-443", "--port-range", "3"]);
        let file = Config { port_range: Some(5), timeout_secs: Some(4), ..Config::default() };
        let s = Settings::from(cli.overrides().or(file));
        assert_eq!(s.src, PathBuf::from("./meta"));
        assert!(s.update);
        assert!(s.check_443);
        assert_eq!(s.port_range, 3);
        assert_eq!(s.timeout, std::time::Duration::from_secs(4));
    }

    #[tokio::test]
    async fn failed_signal_handler_lets_run_finish() {
        let run = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(())
        };
        let signal = async { Err(std::io::Error::other("no signal handler")) };
        assert!(until_interrupted(run, signal).await.is_ok());
    }

    #[tokio::test]
    async fn signal_interrupts_run() {
        let run = std::future::pending::<Result<()>>();
        let res = until_interrupted(run, async { Ok(()) }).await;
        assert_eq!(res.unwrap_err().to_string(), "interrupted");
    }

    #[test]
    fn unset_bool_flags_defer_to_config() {
        let cli = Cli::parse_from(["certwatch"]);
        let file = Config { check_443: Some(true), ..Config::default() };
        assert!(Settings::from(cli.overrides().or(file)).check_443);
    }
}
