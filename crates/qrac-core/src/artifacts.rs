//! Generated solver artifacts
//!
//! Solvers and integrators serialize their problem definition next to any
//! generated code so a run can be inspected or reproduced. Each instance
//! owns a private directory `<root>/<name>_<kind>_<pid>_<seq>/` and removes
//! it when dropped. The root itself is only removed by the instance that
//! created it, and only once empty. Cleanup failures are logged, never
//! propagated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use thiserror::Error;

static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Artifact I/O errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize {file}: {source}")]
    Serialize {
        file: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Directory guard for generated artifacts
#[derive(Debug)]
pub struct Artifacts {
    root: PathBuf,
    dir: PathBuf,
    /// `root` did not exist before this instance
    owns_root: bool,
}

impl Artifacts {
    /// Default artifact root: `<tmp>/qrac`
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("qrac")
    }

    /// Create a fresh artifact directory under `root`
    pub fn create(root: &Path, name: &str, kind: &str) -> Result<Self, ArtifactError> {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let dir = root.join(format!("{}_{}_{}_{}", name, kind, std::process::id(), seq));
        let owns_root = !root.exists();

        fs::create_dir_all(&dir).map_err(|source| ArtifactError::Io {
            path: dir.clone(),
            source,
        })?;
        log::debug!("Created artifact directory {}", dir.display());

        Ok(Self {
            root: root.to_path_buf(),
            dir,
            owns_root,
        })
    }

    /// Directory owned by this guard
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize `value` as pretty JSON into `file`
    pub fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<PathBuf, ArtifactError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| ArtifactError::Serialize {
            file: file.to_string(),
            source,
        })?;

        let path = self.dir.join(file);
        fs::write(&path, json).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => log::debug!("Removed artifact directory {}", self.dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", self.dir.display(), e),
        }

        if !self.owns_root {
            return;
        }
        // Other instances may still live under the root
        let empty = fs::read_dir(&self.root)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            match fs::remove_dir(&self.root) {
                Ok(()) => log::debug!("Removed artifact root {}", self.root.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {}: {}", self.root.display(), e),
            }
        }
    }
}
