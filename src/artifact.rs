use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use tracing::info;

pub const DEFAULT_CRASH_DIR: &str = "./crashes";
pub const ARTIFACT_EXTENSION: &str = "bin";

/// Iteration ids are 24-bit. Collisions are possible and simply overwrite.
pub const MAX_ITERATION_ID: u32 = 0xff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterationId(u32);

impl IterationId {
    pub fn new(raw: u32) -> Self {
        Self(raw & MAX_ITERATION_ID)
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(0..=MAX_ITERATION_ID))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output directory holding `<id>.bin` inputs and adopted core dumps.
#[derive(Debug, Clone)]
pub struct CrashStore {
    dir: PathBuf,
}

impl CrashStore {
    /// Creates the directory if needed; an existing directory is fine.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create crash dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, id: IterationId) -> PathBuf {
        self.dir.join(format!("{id}.{ARTIFACT_EXTENSION}"))
    }

    /// Writes exactly `payload` under `id`, replacing any earlier artifact.
    pub fn persist(&self, id: IterationId, payload: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_path(id);
        fs::write(&path, payload)
            .with_context(|| format!("failed to write crash artifact: {}", path.display()))?;
        info!(%id, size = payload.len(), path = %path.display(), "saved crashing input");
        Ok(path)
    }

    /// Moves a core dump in next to the input, named `<core file name><id>`.
    pub fn adopt_core(&self, core: &Path, id: IterationId) -> Result<PathBuf> {
        let file_name = core
            .file_name()
            .with_context(|| format!("core path has no file name: {}", core.display()))?;
        let mut target_name = file_name.to_os_string();
        target_name.push(id.to_string());
        let target = self.dir.join(target_name);

        match fs::rename(core, &target) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::CrossesDevices => {
                fs::copy(core, &target).with_context(|| {
                    format!(
                        "failed to copy core {} to {}",
                        core.display(),
                        target.display()
                    )
                })?;
                fs::remove_file(core)
                    .with_context(|| format!("failed to remove core: {}", core.display()))?;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to move core {} to {}",
                        core.display(),
                        target.display()
                    )
                });
            }
        }
        info!(%id, path = %target.display(), "adopted core dump");
        Ok(target)
    }

    /// Saved `.bin` inputs, sorted by path.
    pub fn artifacts(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read crash dir: {}", self.dir.display()))?;
        let mut found = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read crash dir: {}", self.dir.display()))?
                .path();
            if path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
