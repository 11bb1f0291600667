//! File system helpers for container data directories.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::watch;

pub struct FsHandler;

impl FsHandler {
    /// Create a directory to bind-mount into a container, writable by it.
    pub fn create_host_data_directory(path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(path).context("Failed to create docker host data directory")?;

        let mut perms = std::fs::metadata(path)
            .context("Failed to get metadata for docker host data directory")?
            .permissions();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // The container user differs from ours.
            perms.set_mode(0o777);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);

        std::fs::set_permissions(path, perms)
            .context("Failed to set permissions on docker host data directory")?;

        tracing::debug!(path = %path.display(), "Created docker host data directory");

        Ok(())
    }

    /// Wait for a file to be created, watching its parent directory.
    pub async fn wait_for_file(path: &Path, timeout: Duration) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .context("File path must have a parent directory")?;

        let (tx, mut rx) = watch::channel(None);

        let watched: PathBuf = path.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event)
                    if (event.kind.is_create() || event.kind.is_modify())
                        && event.paths.contains(&watched) =>
                {
                    tracing::debug!(path = %watched.display(), "File detected");
                    let _ = tx.send(Some(event));
                }
                Ok(event) => {
                    tracing::trace!(event = ?event, "Ignored file watcher event");
                }
                Err(e) => {
                    tracing::error!(err = ?e, path = %watched.display(), "Failed to watch directory");
                }
            })
            .context("Failed to create file watcher")?;

        watcher
            .watch(parent, RecursiveMode::NonRecursive)
            .context("Failed to watch directory")?;

        // Checked after the watch is armed so a file created in between is not missed.
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "File already exists");
            return Ok(());
        }

        tracing::debug!(path = %path.display(), "Waiting for file");

        tokio::time::timeout(timeout, rx.changed())
            .await
            .with_context(|| format!("Timeout waiting for file: {}", path.display()))?
            .context("File watcher channel closed")?;

        // The writer may not have flushed yet when the create event fires.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_existing_file_returns_immediately() {
        let dir = TempDir::new("dappdev-fs").unwrap();
        let path = dir.path().join("anvil.json");
        std::fs::write(&path, "{}").unwrap();

        FsHandler::wait_for_file(&path, Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_file_creation() {
        let dir = TempDir::new("dappdev-fs").unwrap();
        let path = dir.path().join("anvil.json");

        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                tokio::fs::write(&path, "{}").await.unwrap();
            })
        };

        FsHandler::wait_for_file(&path, Duration::from_secs(5))
            .await
            .unwrap();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_times_out() {
        let dir = TempDir::new("dappdev-fs").unwrap();
        let path = dir.path().join("never.json");

        let error = FsHandler::wait_for_file(&path, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("Timeout waiting for file"));
    }

    #[test]
    fn test_create_host_data_directory() {
        let dir = TempDir::new("dappdev-fs").unwrap();
        let path = dir.path().join("nested").join("data");

        FsHandler::create_host_data_directory(&path).unwrap();
        assert!(path.is_dir());
    }
}
