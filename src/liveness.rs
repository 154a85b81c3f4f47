//! Deciding whether the last target survived its message.
//!
//! Neither strategy can tell a hung service from a healthy one: a process that
//! stops replying but keeps its namespace entry and dumps no core looks alive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_CORE_DIR: &str = "/var/log";
pub const CORE_EXTENSION: &str = "core";
pub const CORE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Crashed { core: Option<PathBuf> },
    /// The send did not complete within the bounded wait.
    Hung,
}

#[derive(Debug, Clone)]
pub enum LivenessMonitor {
    /// The endpoint's namespace entry vanishing means its process died.
    Namespace { namespace: PathBuf },
    /// A fresh `*.core` in the log directory means something died.
    CoreFile(CoreFileMonitor),
}

impl LivenessMonitor {
    pub fn namespace(namespace: impl Into<PathBuf>) -> Self {
        Self::Namespace {
            namespace: namespace.into(),
        }
    }

    pub fn core_file(dir: impl Into<PathBuf>, wait: Duration) -> Self {
        Self::CoreFile(CoreFileMonitor::new(dir, wait))
    }

    /// True when a failure signal names the endpoint it came from. Core files
    /// are claimed by whichever iteration finds them first.
    pub fn attributes_by_endpoint(&self) -> bool {
        matches!(self, Self::Namespace { .. })
    }

    pub async fn observe(&self, endpoint: &str) -> Outcome {
        match self {
            Self::Namespace { namespace } => {
                if endpoint_registered(namespace, endpoint) {
                    Outcome::Ok
                } else {
                    info!(endpoint, "endpoint seems to have died");
                    Outcome::Crashed { core: None }
                }
            }
            Self::CoreFile(monitor) => match monitor.wait_for_core().await {
                Some(core) => {
                    info!(endpoint, core = %core.display(), "core file has been created");
                    Outcome::Crashed { core: Some(core) }
                }
                None => Outcome::Ok,
            },
        }
    }
}

pub fn endpoint_registered(namespace: &Path, endpoint: &str) -> bool {
    namespace.join(endpoint).exists()
}

#[derive(Debug, Clone)]
pub struct CoreFileMonitor {
    dir: PathBuf,
    wait: Duration,
}

impl CoreFileMonitor {
    pub fn new(dir: impl Into<PathBuf>, wait: Duration) -> Self {
        Self {
            dir: dir.into(),
            wait,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First core file in the directory, by name.
    pub fn scan(&self) -> io::Result<Option<PathBuf>> {
        Ok(self.core_files()?.into_iter().next())
    }

    /// Scans once, then keeps polling until the settle window closes.
    /// Scan errors count as "no core" for this iteration.
    pub async fn wait_for_core(&self) -> Option<PathBuf> {
        let deadline = Instant::now() + self.wait;
        loop {
            match self.scan() {
                Ok(Some(core)) => return Some(core),
                Ok(None) => {}
                Err(err) => {
                    warn!(dir = %self.dir.display(), error = %err, "core file scan failed");
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(CORE_POLL_INTERVAL).await;
        }
    }

    /// Removes core files left over from before this run.
    pub fn purge_stale(&self) -> Result<usize> {
        let cores = match self.core_files() {
            Ok(cores) => cores,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to scan core dir: {}", self.dir.display()));
            }
        };
        for core in &cores {
            fs::remove_file(core)
                .with_context(|| format!("failed to remove stale core: {}", core.display()))?;
            debug!(core = %core.display(), "removed stale core file");
        }
        Ok(cores.len())
    }

    fn core_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut cores = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == CORE_EXTENSION) && path.is_file() {
                cores.push(path);
            }
        }
        cores.sort();
        Ok(cores)
    }
}

#[cfg(test)]
#[path = "liveness_tests.rs"]
mod tests;
