use arbiter_common::{EngineError, EngineResult};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Per-invocation scratch directory, removed when dropped.
///
/// Holds the submitted source file, any compiled artifacts and the stdin
/// files of individual runs. Nothing is shared between invocations.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            EngineError::SandboxFault(format!(
                "Failed to create workspace root {}: {}",
                root.display(),
                e
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix("arbiter-")
            .tempdir_in(root)
            .map_err(|e| EngineError::SandboxFault(format!("Failed to create workspace: {}", e)))?;

        // Container runs use an unprivileged uid that must write artifacts here
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o777))
            .map_err(|e| EngineError::SandboxFault(format!("Failed to set workspace mode: {}", e)))?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn write_file(&self, name: &str, contents: &str) -> EngineResult<PathBuf> {
        let path = self.dir.path().join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| EngineError::SandboxFault(format!("Failed to write {}: {}", name, e)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workspace_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path()).unwrap();
        let path = workspace.path().to_path_buf();

        let file = workspace.write_file("main.py", "print(1)").await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "print(1)");

        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn test_workspaces_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
    }

    #[test]
    fn test_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let workspace = Workspace::create(&nested).unwrap();
        assert!(workspace.path().starts_with(&nested));
    }
}
