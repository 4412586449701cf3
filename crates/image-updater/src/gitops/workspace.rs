//! Scratch directory that holds one clone for the lifetime of a run.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

const WORKSPACE_PREFIX: &str = "image-updater-";

/// A uniquely named directory under the scratch root.
///
/// Removed by [`ScratchWorkspace::close`] on the normal path and by `Drop`
/// otherwise (error return, panic, or the owning task being aborted).
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: Option<TempDir>,
    repo_dir: PathBuf,
}

impl ScratchWorkspace {
    /// Creates a fresh workspace under `root`, creating `root` if needed.
    pub fn create(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)?;
        let repo_dir = dir.path().join("repo");
        debug!("Created scratch workspace {}", dir.path().display());
        Ok(Self {
            dir: Some(dir),
            repo_dir,
        })
    }

    /// Root of the workspace.
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or(self.repo_dir.as_path())
    }

    /// Clone destination inside the workspace. Does not exist until cloned.
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Removes the workspace, logging instead of failing on error.
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(
                    "Failed to remove scratch workspace {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
}
