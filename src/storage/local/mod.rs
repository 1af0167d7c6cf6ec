use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_channel::Sender;
use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::types::SyncStatistics;
use crate::types::error::R2syncError;
use crate::types::token::PipelineCancellationToken;

pub mod fs_util;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Path relative to the walked root, `/` separated.
    pub relative_key: String,
}

pub struct LocalLister {
    root: PathBuf,
    follow_symlinks: bool,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
    has_warning: Arc<AtomicBool>,
}

impl LocalLister {
    pub fn new(
        root: &Path,
        follow_symlinks: bool,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        LocalLister {
            root: root.to_path_buf(),
            follow_symlinks,
            cancellation_token,
            stats_sender,
            has_warning,
        }
    }

    /// Regular files under the root in walk order. Entries that cannot be read
    /// are skipped with a warning.
    pub async fn list_files(&self) -> Result<Vec<LocalFile>> {
        if !self.root.is_dir() {
            return Err(anyhow!(R2syncError::NotADirectory(
                self.root.to_string_lossy().to_string()
            )));
        }

        let mut files = vec![];
        for entry in WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
        {
            if self.cancellation_token.is_cancelled() {
                trace!("list_files() canceled.");
                return Err(anyhow!(R2syncError::Cancelled));
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if e.io_error()
                        .is_some_and(|inner| inner.kind() == io::ErrorKind::NotFound)
                    {
                        continue;
                    }

                    let path = e
                        .path()
                        .unwrap_or_else(|| Path::new(""))
                        .to_string_lossy()
                        .to_string();
                    let error = e.to_string();
                    warn!(path = path, error = error, "failed to list local files.");

                    self.send_warning(path).await;
                    continue;
                }
            };

            if !self.check_dir_entry(&entry).await {
                continue;
            }

            let Some(relative_key) = self.generate_relative_key(entry.path()) else {
                continue;
            };

            files.push(LocalFile {
                path: entry.path().to_path_buf(),
                relative_key,
            });
        }

        Ok(files)
    }

    async fn check_dir_entry(&self, entry: &DirEntry) -> bool {
        if entry.file_type().is_dir() || entry.file_type().is_symlink() {
            return false;
        }

        match fs_util::is_regular_file(entry.path()).await {
            Ok(is_file) => is_file,
            Err(e) => {
                let path = entry.path().to_string_lossy().to_string();
                let error = e.to_string();
                warn!(path = path, error = error, "failed to access file.");

                self.send_warning(path).await;
                false
            }
        }
    }

    fn generate_relative_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().to_string())
            .collect();

        if segments.is_empty() {
            return None;
        }

        Some(segments.join("/"))
    }

    async fn send_warning(&self, path: String) {
        self.has_warning.store(true, Ordering::SeqCst);
        let _ = self
            .stats_sender
            .send(SyncStatistics::SyncWarning { key: path })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use crate::types::token::create_pipeline_cancellation_token;

    use super::*;

    fn create_lister(root: &Path) -> LocalLister {
        let (stats_sender, _) = async_channel::unbounded();
        LocalLister::new(
            root,
            true,
            create_pipeline_cancellation_token(),
            stats_sender,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn list_files_recursively() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("dir1").join("dir2")).unwrap();
        std::fs::create_dir_all(root.path().join("empty")).unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();
        std::fs::write(root.path().join("dir1").join("b.txt"), b"bb").unwrap();
        std::fs::write(root.path().join("dir1").join("dir2").join("c.txt"), b"ccc").unwrap();

        let files = create_lister(root.path()).list_files().await.unwrap();
        let keys: Vec<&str> = files
            .iter()
            .map(|file| file.relative_key.as_str())
            .collect();

        assert_eq!(keys, vec!["a.txt", "dir1/b.txt", "dir1/dir2/c.txt"]);
        assert_eq!(files[1].path, root.path().join("dir1").join("b.txt"));
    }

    #[tokio::test]
    async fn list_files_not_a_directory() {
        init_dummy_tracing_subscriber();

        let file = tempfile::NamedTempFile::new().unwrap();
        let error = create_lister(file.path()).list_files().await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<R2syncError>(),
            Some(R2syncError::NotADirectory(_))
        ));

        let error = create_lister(Path::new("./no_such_directory_for_test"))
            .list_files()
            .await
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<R2syncError>(),
            Some(R2syncError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn list_files_cancelled() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();

        let (stats_sender, _) = async_channel::unbounded();
        let cancellation_token = create_pipeline_cancellation_token();
        cancellation_token.cancel();

        let lister = LocalLister::new(
            root.path(),
            true,
            cancellation_token,
            stats_sender,
            Arc::new(AtomicBool::new(false)),
        );
        let error = lister.list_files().await.unwrap_err();
        assert_eq!(
            error.downcast_ref::<R2syncError>(),
            Some(&R2syncError::Cancelled)
        );
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn list_files_without_following_symlinks() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("linked.txt"), b"linked").unwrap();
        std::fs::write(root.path().join("a.txt"), b"a").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let (stats_sender, _) = async_channel::unbounded();
        let lister = LocalLister::new(
            root.path(),
            false,
            create_pipeline_cancellation_token(),
            stats_sender,
            Arc::new(AtomicBool::new(false)),
        );
        let files = lister.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_key, "a.txt");

        let files = create_lister(root.path()).list_files().await.unwrap();
        let keys: Vec<String> = files.into_iter().map(|file| file.relative_key).collect();
        assert_eq!(keys, vec!["a.txt", "link/linked.txt"]);
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
