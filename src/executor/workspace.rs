//! Per-run scratch directories.

use super::RunError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `<base>/<run_id>`, owned by exactly one run.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn for_run(base: &Path, run_id: &str) -> Self {
        Self {
            root: base.join(run_id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the repository is cloned.
    pub fn checkout_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    /// Create an empty workspace, clearing leftovers from a crashed process.
    pub async fn create(&self) -> Result<(), RunError> {
        if tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            warn!(path = %self.root.display(), "stale workspace found, removing");
            tokio::fs::remove_dir_all(&self.root)
                .await
                .map_err(|source| RunError::Workspace {
                    path: self.root.clone(),
                    source,
                })?;
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| RunError::Workspace {
                path: self.root.clone(),
                source,
            })?;
        debug!(path = %self.root.display(), "workspace created");
        Ok(())
    }

    /// Best effort; a missing directory is not an error.
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "failed to remove workspace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_clears_and_remove_deletes() {
        let base = TempDir::new().unwrap();
        let ws = Workspace::for_run(base.path(), "run-1");
        assert_eq!(ws.path(), base.path().join("run-1"));

        ws.create().await.unwrap();
        std::fs::write(ws.path().join("leftover.txt"), "x").unwrap();

        ws.create().await.unwrap();
        assert!(ws.path().exists());
        assert!(!ws.path().join("leftover.txt").exists());

        ws.remove().await;
        assert!(!ws.path().exists());
        // Removing twice is quiet.
        ws.remove().await;
    }
}
