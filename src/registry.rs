use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::transport::{Coid, Transport};

/// Services that block the sender indefinitely, or only exist on the simulator.
pub const DEFAULT_BLOCKLIST: &[&str] = &[
    "battmgr_monitor",
    "battmgr",
    "led_control",
    "VirtualEventServer",
    "svga_ch",
    "slogger2",
    "io-asr-bb10",
    "dsi_server_primary",
    "phone-service",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionPolicy {
    blocked: BTreeSet<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKLIST.iter().copied())
    }
}

impl ExclusionPolicy {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked: names.into_iter().map(Into::into).collect(),
        }
    }

    /// The default blocklist plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = Self::default();
        policy.blocked.extend(extra.into_iter().map(Into::into));
        policy
    }

    pub fn is_blocked(&self, name: &str) -> bool {
        self.blocked.contains(name)
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub coid: Coid,
}

/// An endpoint name is one entry of the namespace directory.
pub fn validate_endpoint_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(format!("'{name}' is not an endpoint name"));
    }
    if name.contains(['/', '\0']) {
        return Err(format!(
            "endpoint name '{}' must not contain '/' or NUL",
            name.escape_debug()
        ));
    }
    Ok(())
}

/// Lists every endpoint name currently registered under `namespace`.
pub fn discover(namespace: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(namespace).with_context(|| {
        format!(
            "failed to read endpoint namespace: {}",
            namespace.display()
        )
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| {
            format!(
                "failed to read endpoint namespace entry: {}",
                namespace.display()
            )
        })?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => warn!(name = ?raw, "skipping endpoint with non UTF-8 name"),
        }
    }
    names.sort();
    Ok(names)
}

/// Drops blocklisted names unless the name was requested explicitly.
///
/// An override that was never discovered is still returned so the caller
/// tries to open it by name.
pub fn apply_exclusions(
    candidates: Vec<String>,
    policy: &ExclusionPolicy,
    override_name: Option<&str>,
) -> Vec<String> {
    let mut kept: Vec<String> = candidates
        .into_iter()
        .filter(|name| {
            let keep = Some(name.as_str()) == override_name || !policy.is_blocked(name);
            if !keep {
                debug!(endpoint = %name, "excluded by blocklist");
            }
            keep
        })
        .collect();

    if let Some(name) = override_name
        && !kept.iter().any(|kept| kept == name)
    {
        kept.push(name.to_string());
    }
    kept
}

/// The selectable set of opened endpoints for the run.
#[derive(Debug)]
pub struct EndpointRegistry {
    namespace: PathBuf,
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// Opens a connection to every name. Names that fail to open are logged
    /// and left out.
    pub fn open_all<T: Transport + ?Sized>(
        transport: &T,
        namespace: impl Into<PathBuf>,
        names: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut endpoints = Vec::new();
        for name in names {
            match transport.open(&name) {
                Ok(coid) => {
                    debug!(endpoint = %name, %coid, "opened endpoint");
                    endpoints.push(Endpoint { name, coid });
                }
                Err(err) => {
                    warn!(endpoint = %name, error = %err, "dropping endpoint that failed to open");
                }
            }
        }
        info!(count = endpoints.len(), "endpoints in rotation");
        Self {
            namespace: namespace.into(),
            endpoints,
        }
    }

    pub fn namespace(&self) -> &Path {
        &self.namespace
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|endpoint| endpoint.name == name)
    }

    /// Uniform pick over whatever is still in rotation.
    pub fn select_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Endpoint> {
        self.endpoints.choose(rng)
    }

    /// Takes `name` out of rotation and closes its connection.
    pub fn remove<T: Transport + ?Sized>(&mut self, transport: &T, name: &str) -> Option<Endpoint> {
        let index = self.endpoints.iter().position(|endpoint| endpoint.name == name)?;
        let endpoint = self.endpoints.swap_remove(index);
        if let Err(err) = transport.close(endpoint.coid) {
            debug!(endpoint = %endpoint.name, error = %err, "closing dead connection failed");
        }
        Some(endpoint)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
