use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifact::{CrashStore, DEFAULT_CRASH_DIR};
use crate::config::{Config, LivenessStrategy, SendMode};
use crate::engine::{CrashReport, Engine, EngineOptions, RunEnd};
use crate::generator::{ByteSource, MessageGenerator, SpecializationTable};
use crate::liveness::{CoreFileMonitor, DEFAULT_CORE_DIR, LivenessMonitor};
use crate::quarantine::QuarantineLease;
use crate::registry::{self, EndpointRegistry, ExclusionPolicy};
use crate::transport::{Channel, DEFAULT_NAMESPACE, Transport};

#[derive(Debug, Clone)]
pub struct FuzzerOptions {
    /// Single fixed target; bypasses the blocklist for that name.
    pub target: Option<String>,
    pub namespace: PathBuf,
    pub crash_dir: PathBuf,
    pub liveness: LivenessStrategy,
    pub core_dir: PathBuf,
    pub core_wait: Duration,
    pub send_mode: SendMode,
    pub send_timeout: Option<Duration>,
    pub policy: ExclusionPolicy,
    pub table: SpecializationTable,
    pub seed: Option<u64>,
    pub max_iterations: Option<u64>,
    pub cancel: Option<CancellationToken>,
}

impl Default for FuzzerOptions {
    fn default() -> Self {
        Self {
            target: None,
            namespace: PathBuf::from(DEFAULT_NAMESPACE),
            crash_dir: PathBuf::from(DEFAULT_CRASH_DIR),
            liveness: LivenessStrategy::default(),
            core_dir: PathBuf::from(DEFAULT_CORE_DIR),
            core_wait: Duration::ZERO,
            send_mode: SendMode::default(),
            send_timeout: None,
            policy: ExclusionPolicy::default(),
            table: SpecializationTable::default(),
            seed: None,
            max_iterations: None,
            cancel: None,
        }
    }
}

impl FuzzerOptions {
    /// File values for everything the command line does not carry.
    pub fn from_config(config: &Config, target: Option<String>) -> Self {
        Self {
            target,
            namespace: config.effective_namespace(None),
            crash_dir: config.effective_crash_dir(None),
            liveness: config.effective_liveness(None),
            core_dir: config.effective_core_dir(None),
            core_wait: config.effective_core_wait(None),
            send_mode: config.effective_send_mode(None),
            send_timeout: config.effective_send_timeout(None),
            policy: config.exclusion_policy(),
            table: config.specialization_table(),
            seed: config.effective_seed(None),
            max_iterations: None,
            cancel: None,
        }
    }
}

/// How a run ended.
pub enum RunOutcome<C: Channel> {
    /// A target died. `lease` holds its name unless the name could not be
    /// attached (e.g. it is still registered in core-file mode).
    Crashed {
        report: CrashReport,
        lease: Option<QuarantineLease<C>>,
    },
    Hung(CrashReport),
    Delivered { endpoint: String },
    Stopped { iterations: u64 },
}

/// Startup plus the fuzz loop. Fails before fuzzing if the namespace cannot
/// be read or nothing could be opened.
pub async fn run_fuzzer<T: Transport>(
    transport: Arc<T>,
    opts: FuzzerOptions,
) -> Result<RunOutcome<T::Channel>> {
    if let Some(target) = &opts.target {
        registry::validate_endpoint_name(target).map_err(anyhow::Error::msg)?;
    }
    let store = CrashStore::open(&opts.crash_dir)?;

    let monitor = match opts.liveness {
        LivenessStrategy::Namespace => LivenessMonitor::namespace(&opts.namespace),
        LivenessStrategy::CoreFile => {
            let cores = CoreFileMonitor::new(&opts.core_dir, opts.core_wait);
            let purged = cores.purge_stale()?;
            info!(dir = %cores.dir().display(), purged, "cleared stale core files");
            LivenessMonitor::CoreFile(cores)
        }
    };

    let candidates = registry::discover(&opts.namespace)?;
    info!(
        namespace = %opts.namespace.display(),
        count = candidates.len(),
        "discovered endpoints"
    );
    let names = registry::apply_exclusions(candidates, &opts.policy, opts.target.as_deref());
    let registry = EndpointRegistry::open_all(&*transport, &opts.namespace, names);
    if let Some(target) = &opts.target {
        if registry.get(target).is_none() {
            anyhow::bail!("target endpoint '{target}' could not be opened");
        }
        info!(endpoint = %target, "single target mode");
    } else if registry.is_empty() {
        anyhow::bail!(
            "no endpoint under {} could be opened; nothing to fuzz",
            opts.namespace.display()
        );
    }

    let seed = opts.seed.unwrap_or_else(rand::random);
    info!(seed, "seeded iteration rng");
    let source = if opts.seed.is_some() {
        ByteSource::Seeded
    } else {
        ByteSource::Os
    };

    let mut engine = Engine::new(
        Arc::clone(&transport),
        registry,
        MessageGenerator::new(opts.table, source),
        monitor,
        store,
        StdRng::seed_from_u64(seed),
        EngineOptions {
            target: opts.target,
            send_mode: opts.send_mode,
            send_timeout: opts.send_timeout,
            max_iterations: opts.max_iterations,
            cancel: opts.cancel,
        },
    );

    Ok(match engine.run().await? {
        RunEnd::Crashed(report) => {
            let lease = match QuarantineLease::acquire(&*transport, &report.endpoint) {
                Ok(lease) => Some(lease),
                Err(err) => {
                    warn!(endpoint = %report.endpoint, error = %err, "could not squat crashed endpoint");
                    None
                }
            };
            RunOutcome::Crashed { report, lease }
        }
        RunEnd::Hung(report) => RunOutcome::Hung(report),
        RunEnd::Delivered { endpoint, .. } => RunOutcome::Delivered { endpoint },
        RunEnd::IterationLimit(iterations) | RunEnd::Cancelled(iterations) => {
            RunOutcome::Stopped { iterations }
        }
    })
}
