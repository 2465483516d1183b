//! Script staging - Writes script text to uniquely named executable files

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::StagingError;

/// Materializes scripts into a dedicated staging directory
#[derive(Debug, Clone)]
pub struct ScriptStager {
    dir: PathBuf,
}

impl ScriptStager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to a fresh executable file and return its path.
    ///
    /// File names are random v4 UUIDs opened with `create_new`, so concurrent
    /// stagings never share or overwrite a file.
    pub async fn stage(&self, content: &str) -> Result<PathBuf, StagingError> {
        self.stage_with(content, mark_executable).await
    }

    /// Stage with a custom step that makes the written file executable.
    /// When it fails the file is deleted before the error is returned.
    async fn stage_with<F, Fut>(&self, content: &str, mark: F) -> Result<PathBuf, StagingError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.dir.join(format!("{}.sh", Uuid::new_v4().simple()));
        if let Err(source) = write_new(&path, content).await {
            // create_new failed or the write broke halfway; only remove what we created
            if source.kind() != ErrorKind::AlreadyExists {
                discard(&path).await;
            }
            return Err(StagingError::Write { path, source });
        }

        if let Err(source) = mark(path.clone()).await {
            discard(&path).await;
            return Err(StagingError::Permissions { path, source });
        }

        debug!("Staged script at {:?}", path);
        Ok(path)
    }
}

/// Delete a staged file. Returns `Ok(false)` when it was already gone.
pub async fn remove_staged(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_staged(path).await {
        warn!("Failed to remove partially staged script {:?}: {}", path, e);
    }
}

async fn write_new(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(unix)]
async fn mark_executable(path: PathBuf) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn mark_executable(_path: PathBuf) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_writes_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ScriptStager::new(dir.path().join("nested").join("staging"));

        let path = stager.stage("echo hello\n").await.unwrap();

        assert!(path.starts_with(stager.dir()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("sh"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo hello\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn test_concurrent_stages_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ScriptStager::new(dir.path());

        let (a, b) = tokio::join!(stager.stage("echo a"), stager.stage("echo b"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a, b);
        assert_eq!(std::fs::read_to_string(a).unwrap(), "echo a");
        assert_eq!(std::fs::read_to_string(b).unwrap(), "echo b");
    }

    #[tokio::test]
    async fn test_stage_fails_when_directory_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("staging");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = ScriptStager::new(&blocker).stage("echo hi").await.unwrap_err();
        assert!(matches!(err, StagingError::CreateDir { .. }));
    }

    #[tokio::test]
    async fn test_failed_executable_mark_deletes_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ScriptStager::new(dir.path().join("staging"));

        let err = stager
            .stage_with("echo hi", |path| async move {
                assert!(path.exists());
                Err::<(), _>(std::io::Error::new(ErrorKind::PermissionDenied, "denied"))
            })
            .await
            .unwrap_err();

        match err {
            StagingError::Permissions { path, source } => {
                assert_eq!(source.kind(), ErrorKind::PermissionDenied);
                assert!(!path.exists());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let left: Vec<_> = std::fs::read_dir(stager.dir()).unwrap().collect();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn test_remove_staged_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = ScriptStager::new(dir.path()).stage("true").await.unwrap();

        assert!(remove_staged(&path).await.unwrap());
        assert!(!remove_staged(&path).await.unwrap());
        assert!(!path.exists());
    }
}
