use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ipcfuzz::config::{Config, DEFAULT_CONFIG_FILE, LivenessStrategy, SendMode};
use ipcfuzz::fuzzer::{FuzzerOptions, RunOutcome};
use ipcfuzz::{quarantine, registry};
use ipcfuzz::transport::Channel;

#[derive(Debug, Parser)]
#[command(
    name = "ipcfuzz",
    about = "Blind fuzzer for QNX Neutrino message-passing endpoints",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Fuzz only this endpoint. Bypasses the blocklist for it.
    #[arg(value_name = "ENDPOINT", value_parser = parse_endpoint_name)]
    target: Option<String>,

    /// Configuration file; missing means built-in defaults.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Endpoint namespace to discover and watch.
    #[arg(long, value_name = "DIR")]
    namespace: Option<PathBuf>,

    /// Where crashing inputs (and adopted core dumps) are written.
    #[arg(long, value_name = "DIR")]
    crash_dir: Option<PathBuf>,

    /// How a crashed target is detected.
    #[arg(long, value_enum)]
    liveness: Option<LivenessStrategy>,

    /// Directory scanned for core dumps in core-file mode.
    #[arg(long, value_name = "DIR")]
    core_dir: Option<PathBuf>,

    /// Keep polling for a core dump this long after each send.
    #[arg(long, value_name = "MS")]
    core_wait_ms: Option<u64>,

    #[arg(long, value_enum)]
    send_mode: Option<SendMode>,

    /// Treat a send that takes longer than this as a hang. Unbounded by default.
    #[arg(
        long,
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    send_timeout_ms: Option<u64>,

    /// Seed for endpoint, size and payload choices.
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many iterations.
    #[arg(
        long,
        value_name = "N",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    max_iterations: Option<u64>,

    /// Enable debug-level logging when RUST_LOG is unset.
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match block_on_detached(run(cli)) {
        Ok(Ok(code)) => code,
        Ok(Err(err)) | Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

/// Drives `future` on a fresh runtime and shuts it down without waiting for
/// the blocking pool. A send abandoned by the bounded wait stays blocked in
/// the kernel until its target replies, which may be never.
fn block_on_detached<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(&cli.config)?;
    let opts = build_options(cli, &config);
    fuzz(opts).await
}

fn build_options(cli: Cli, config: &Config) -> FuzzerOptions {
    let mut opts = FuzzerOptions::from_config(config, cli.target);
    opts.namespace = config.effective_namespace(cli.namespace.as_deref());
    opts.crash_dir = config.effective_crash_dir(cli.crash_dir.as_deref());
    opts.liveness = config.effective_liveness(cli.liveness);
    opts.core_dir = config.effective_core_dir(cli.core_dir.as_deref());
    opts.core_wait = config.effective_core_wait(cli.core_wait_ms);
    opts.send_mode = config.effective_send_mode(cli.send_mode);
    opts.send_timeout = config.effective_send_timeout(cli.send_timeout_ms);
    opts.seed = config.effective_seed(cli.seed);
    opts.max_iterations = cli.max_iterations;
    opts
}

#[cfg(target_os = "nto")]
async fn fuzz(opts: FuzzerOptions) -> Result<ExitCode> {
    use std::sync::Arc;

    use ipcfuzz::fuzzer::run_fuzzer;
    use ipcfuzz::transport::QnxTransport;

    let outcome = run_fuzzer(Arc::new(QnxTransport::new()), opts).await?;
    finish(outcome).await
}

#[cfg(not(target_os = "nto"))]
async fn fuzz(_opts: FuzzerOptions) -> Result<ExitCode> {
    anyhow::bail!("native message passing is only available on QNX Neutrino (target_os = \"nto\")")
}

/// Maps a finished run to an exit code. A quarantined crash never gets here
/// because the squatting thread never ends.
#[cfg_attr(not(target_os = "nto"), allow(dead_code))]
async fn finish<C: Channel + 'static>(outcome: RunOutcome<C>) -> Result<ExitCode> {
    match outcome {
        RunOutcome::Crashed {
            report,
            lease: Some(lease),
        } => {
            info!(
                id = %report.id,
                endpoint = %report.endpoint,
                artifact = %report.artifact.display(),
                "target crashed; holding its name"
            );
            let squatter =
                quarantine::spawn_squatter(lease).context("failed to start quarantine thread")?;
            let joined = tokio::task::spawn_blocking(move || squatter.join())
                .await
                .context("quarantine wait failed")?;
            if joined.is_err() {
                error!(endpoint = %report.endpoint, "quarantine thread panicked");
            }
            anyhow::bail!("quarantine for '{}' ended unexpectedly", report.endpoint)
        }
        RunOutcome::Crashed { report, lease: None } => {
            warn!(
                id = %report.id,
                endpoint = %report.endpoint,
                artifact = %report.artifact.display(),
                "target crashed; name left unquarantined"
            );
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Hung(report) => {
            warn!(
                id = %report.id,
                endpoint = %report.endpoint,
                artifact = %report.artifact.display(),
                "target hung; nothing left to fuzz"
            );
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Delivered { endpoint } => {
            info!(endpoint = %endpoint, "delivered; exiting");
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Stopped { iterations } => {
            info!(iterations, "fuzz run stopped");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_endpoint_name(input: &str) -> std::result::Result<String, String> {
    registry::validate_endpoint_name(input)?;
    Ok(input.to_string())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
