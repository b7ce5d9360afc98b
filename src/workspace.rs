use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{JudgeError, Result};

/// Hands out one private directory per submission under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Name prefix of every workspace directory of `submission_id`
    pub fn prefix_for(submission_id: i64) -> String {
        format!("submission-{submission_id}-")
    }

    /// Creates a fresh, empty directory for `submission_id`.
    ///
    /// The name carries the submission id plus a random suffix, so judges
    /// sharing a root never step on each other's directories.
    pub fn provision(&self, submission_id: i64) -> Result<Workspace> {
        fs::create_dir_all(&self.root).map_err(|e| JudgeError::workspace(&self.root, e))?;

        let dir = tempfile::Builder::new()
            .prefix(&Self::prefix_for(submission_id))
            .tempdir_in(&self.root)
            .map_err(|e| JudgeError::workspace(&self.root, e))?;
        let path = dir.path().to_path_buf();

        log::debug!("Provisioned workspace {}", path.display());
        Ok(Workspace {
            dir: Some(dir),
            path,
        })
    }
}

/// A submission's scratch directory.
///
/// The directory is removed by [`Workspace::release`] or, failing that, when
/// the guard is dropped; removal happens exactly once either way.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the submitted code verbatim and returns the file's path
    pub fn write_source(&self, file_name: &str, code: &str) -> Result<PathBuf> {
        let path = self.path.join(file_name);
        fs::write(&path, code).map_err(|e| JudgeError::workspace(&path, e))?;
        Ok(path)
    }

    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => log::debug!("Released workspace {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to release workspace {}: {e}", self.path.display()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}
