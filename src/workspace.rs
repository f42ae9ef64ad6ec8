//! Scratch workspaces
//!
//! Every execution owns exactly one directory under the scratch root,
//! named by a random UUID. The directory is removed by `Workspace::destroy`,
//! or by `Drop` when the owning future panics or is cancelled first.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid source file name: {0:?}")]
    InvalidFileName(String),
    #[error("Failed to scan scratch root {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Allocates workspaces under a dedicated scratch root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, empty workspace
    pub async fn create(&self) -> Result<Workspace, WorkspaceError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: self.root.clone(),
                source,
            })?;

        let id = Uuid::new_v4();
        let path = self.root.join(id.to_string());

        // create_dir (not create_dir_all) so an existing path is an error
        fs::create_dir(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.clone(),
                source,
            })?;

        let workspace = Workspace {
            id,
            path,
            destroyed: false,
        };

        // Other local users must not read or plant files in a workspace
        set_private_permissions(&workspace.path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: workspace.path.clone(),
                source,
            })?;

        debug!("Created workspace {} at {:?}", workspace.id, workspace.path);
        Ok(workspace)
    }

    /// Remove workspaces left behind by a previous process.
    ///
    /// Only directories named by a UUID are touched. Must not run while
    /// executions are in flight on the same root.
    pub async fn sweep_stale(&self) -> Result<usize, WorkspaceError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(WorkspaceError::Scan {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| WorkspaceError::Scan {
                path: self.root.clone(),
                source,
            })?
        {
            let name = entry.file_name();
            let is_workspace = name
                .to_str()
                .map(|name| Uuid::parse_str(name).is_ok())
                .unwrap_or(false);
            if !is_workspace {
                continue;
            }

            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale workspace {:?}: {}", entry.path(), e),
            }
        }

        Ok(removed)
    }
}

/// One execution's scratch directory
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    path: PathBuf,
    destroyed: bool,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the user's source verbatim into the workspace
    pub async fn write_source(&self, file_name: &str, content: &str) -> Result<PathBuf, WorkspaceError> {
        if !is_plain_file_name(file_name) {
            return Err(WorkspaceError::InvalidFileName(file_name.to_string()));
        }

        let path = self.path.join(file_name);
        fs::write(&path, content)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Recursively remove the workspace
    pub async fn destroy(mut self) -> io::Result<()> {
        self.destroyed = true;
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!("Destroyed workspace {}", self.id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Destroyed workspace {} on drop", self.id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {:?} on drop: {}", self.path, e),
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

#[cfg(unix)]
async fn set_private_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await
}

#[cfg(not(unix))]
async fn set_private_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_create_and_destroy() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(scratch.path().join("user_code"));

        let workspace = manager.create().await.unwrap();
        assert!(workspace.path().is_dir());
        assert_eq!(
            workspace.path().file_name().unwrap().to_str().unwrap(),
            workspace.id().to_string()
        );

        let source = workspace.write_source("Main.py", "print('hi')\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(source).unwrap(), "print('hi')\n");

        assert_ok!(workspace.destroy().await);
        assert_eq!(entries(manager.root()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_workspace_is_private_to_worker() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(scratch.path());

        let workspace = manager.create().await.unwrap();
        let mode = std::fs::metadata(workspace.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_workspaces_are_distinct() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(scratch.path());

        let a = manager.create().await.unwrap();
        let b = manager.create().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(scratch.path());

        let workspace = manager.create().await.unwrap();
        workspace.write_source("main.c", "int main(){}").await.unwrap();
        std::fs::create_dir(workspace.path().join("nested")).unwrap();
        drop(workspace);

        assert_eq!(entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_rejects_path_like_file_names() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(scratch.path());
        let workspace = manager.create().await.unwrap();

        for name in ["../escape.py", "/etc/passwd", "", "..", "a/b.py"] {
            assert_err!(workspace.write_source(name, "x").await);
        }
    }

    #[tokio::test]
    async fn test_create_fails_on_unwritable_root() {
        let scratch = tempfile::tempdir().unwrap();
        let blocker = scratch.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let manager = WorkspaceManager::new(blocker.join("user_code"));
        assert!(matches!(
            manager.create().await,
            Err(WorkspaceError::Create { .. })
        ));
    }

    #[tokio::test]
    async fn test_sweep_only_removes_workspaces() {
        let scratch = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(scratch.path());

        let stale = manager.create().await.unwrap();
        let stale_path = stale.path().to_path_buf();
        std::mem::forget(stale);
        std::fs::create_dir(scratch.path().join("keep-me")).unwrap();

        assert_eq!(manager.sweep_stale().await.unwrap(), 1);
        assert!(!stale_path.exists());
        assert!(scratch.path().join("keep-me").exists());
    }
}
