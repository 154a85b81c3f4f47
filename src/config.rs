use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::artifact::DEFAULT_CRASH_DIR;
use crate::generator::{EnvelopeSpec, SpecializationTable, Strategy};
use crate::liveness::DEFAULT_CORE_DIR;
use crate::registry::ExclusionPolicy;
use crate::transport::DEFAULT_NAMESPACE;

pub const DEFAULT_CONFIG_FILE: &str = "ipcfuzz.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessStrategy {
    /// Watch the endpoint's namespace entry (devices).
    #[default]
    Namespace,
    /// Watch the crash log directory for core dumps (simulator).
    CoreFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SendMode {
    /// Blocking send; waits for the server's reply.
    #[default]
    Sync,
    /// Fire-and-forget send; the run ends after the first accepted message.
    Async,
    /// Pulse with random code and value; the run ends after the first accepted pulse.
    Pulse,
}

/// `[[envelopes]]` entry adding a structured generator for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnvelopeConfig {
    pub endpoint: String,
    pub send_len: usize,
    pub field_min: u16,
    pub field_max: u16,
    pub fill: u8,
}

impl EnvelopeConfig {
    pub fn spec(&self) -> EnvelopeSpec {
        EnvelopeSpec {
            send_len: self.send_len,
            field_min: self.field_min,
            field_max: self.field_max,
            fill: self.fill,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub namespace: Option<PathBuf>,
    #[serde(default)]
    pub crash_dir: Option<PathBuf>,
    #[serde(default)]
    pub core_dir: Option<PathBuf>,
    #[serde(default)]
    pub liveness: Option<LivenessStrategy>,
    #[serde(default)]
    pub send_mode: Option<SendMode>,
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
    #[serde(default)]
    pub core_wait_ms: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Names blocked in addition to the built-in blocklist.
    #[serde(default)]
    pub blocklist: Vec<String>,
    #[serde(default)]
    pub envelopes: Vec<EnvelopeConfig>,
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };
        toml::from_str(&raw).with_context(|| format!("failed to parse config: {}", path.display()))
    }

    pub fn effective_namespace(&self, cli_override: Option<&Path>) -> PathBuf {
        pick_path(cli_override, self.namespace.as_deref(), DEFAULT_NAMESPACE)
    }

    pub fn effective_crash_dir(&self, cli_override: Option<&Path>) -> PathBuf {
        pick_path(cli_override, self.crash_dir.as_deref(), DEFAULT_CRASH_DIR)
    }

    pub fn effective_core_dir(&self, cli_override: Option<&Path>) -> PathBuf {
        pick_path(cli_override, self.core_dir.as_deref(), DEFAULT_CORE_DIR)
    }

    pub fn effective_liveness(&self, cli_override: Option<LivenessStrategy>) -> LivenessStrategy {
        cli_override.or(self.liveness).unwrap_or_default()
    }

    pub fn effective_send_mode(&self, cli_override: Option<SendMode>) -> SendMode {
        cli_override.or(self.send_mode).unwrap_or_default()
    }

    /// `None` (or 0 in the file) keeps sends unbounded.
    pub fn effective_send_timeout(&self, cli_override_ms: Option<u64>) -> Option<Duration> {
        cli_override_ms
            .or(self.send_timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn effective_core_wait(&self, cli_override_ms: Option<u64>) -> Duration {
        Duration::from_millis(cli_override_ms.or(self.core_wait_ms).unwrap_or(0))
    }

    pub fn effective_seed(&self, cli_override: Option<u64>) -> Option<u64> {
        cli_override.or(self.seed)
    }

    pub fn exclusion_policy(&self) -> ExclusionPolicy {
        ExclusionPolicy::with_extra(self.blocklist.iter().cloned())
    }

    /// Built-in specialisations, with file entries added or replacing them.
    pub fn specialization_table(&self) -> SpecializationTable {
        let mut table = SpecializationTable::default();
        for envelope in &self.envelopes {
            table.insert(
                envelope.endpoint.clone(),
                Strategy::StructuredEnvelope(envelope.spec()),
            );
        }
        table
    }
}

fn pick_path(cli: Option<&Path>, file: Option<&Path>, default: &str) -> PathBuf {
    cli.or(file)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
