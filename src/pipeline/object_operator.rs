use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use tracing::info;

use crate::config::SyncConfig;
use crate::pipeline::lister::ObjectLister;
use crate::pipeline::syncer::download_object;
use crate::storage::Storage;
use crate::storage::upload_manager::{UploadManager, guess_content_type};
use crate::types::error::R2syncError;
use crate::types::location::{KEY_SEPARATOR, Location};
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectRecord, PresignMethod, SyncStatistics};

/// Single-object operations on the same storage the sync engine uses.
pub struct ObjectOperator {
    storage: Storage,
    sync_config: SyncConfig,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
}

impl ObjectOperator {
    pub fn new(
        storage: Storage,
        sync_config: SyncConfig,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
    ) -> Self {
        Self {
            storage,
            sync_config,
            cancellation_token,
            stats_sender,
        }
    }

    pub async fn copy(&self, source: &Location, target: &Location) -> Result<()> {
        match (source, target) {
            (Location::Local { path }, Location::Remote { bucket, key }) => {
                let file_name = local_file_name(path)?;
                let dest_key = resolve_dest_key(key, &file_name);

                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|_| anyhow!(R2syncError::NotFound(path.display().to_string())))?;
                if !metadata.is_file() {
                    return Err(anyhow!(R2syncError::NotFound(path.display().to_string())));
                }

                let content_type = if self.sync_config.guess_mime_type {
                    guess_content_type(&dest_key)
                } else {
                    None
                };
                self.create_upload_manager()
                    .upload_file(path, bucket, &dest_key, content_type)
                    .await?;

                info!(
                    key = dest_key,
                    source_path = path.to_string_lossy().to_string(),
                    "upload completed."
                );
            }
            (Location::Remote { bucket, key }, Location::Local { path }) => {
                check_object_key(source, key)?;
                let local_path = resolve_local_path(path, key).await;

                let size = download_object(
                    &self.storage,
                    bucket,
                    key,
                    &local_path,
                    &self.cancellation_token,
                    &self.stats_sender,
                    self.sync_config.transfer_config.part_size,
                )
                .await?;

                info!(
                    key = key,
                    size = size,
                    target_path = local_path.to_string_lossy().to_string(),
                    "download completed."
                );
            }
            (
                Location::Remote {
                    bucket: source_bucket,
                    key: source_key,
                },
                Location::Remote {
                    bucket: target_bucket,
                    key: target_key,
                },
            ) => {
                check_object_key(source, source_key)?;
                let dest_key = resolve_dest_key(target_key, remote_file_name(source_key));

                self.storage
                    .copy_object(source_bucket, source_key, target_bucket, &dest_key)
                    .await?;

                info!(
                    key = source_key,
                    target_bucket = target_bucket,
                    target_key = dest_key,
                    "copy completed."
                );
            }
            (Location::Local { .. }, Location::Local { .. }) => {
                return Err(anyhow!(R2syncError::InvalidUri(
                    "either source or target must be r2://".to_string()
                )));
            }
        }

        let _ = self
            .stats_sender
            .send(SyncStatistics::SyncComplete {
                key: source.to_string(),
            })
            .await;
        Ok(())
    }

    /// Copies, then removes the source. The source is kept if the copy fails.
    pub async fn move_object(&self, source: &Location, target: &Location) -> Result<()> {
        self.copy(source, target).await?;

        match source {
            Location::Local { path } => {
                tokio::fs::remove_file(path).await.with_context(|| {
                    format!("tokio::fs::remove_file() failed. path={}", path.display())
                })?;
            }
            Location::Remote { .. } => self.remove(source).await?,
        }

        info!(source_uri = source.to_string(), "source removed.");
        Ok(())
    }

    pub async fn remove(&self, target: &Location) -> Result<()> {
        let (bucket, key) = remote_object(target)?;
        self.storage.delete_object(bucket, key).await?;

        info!(key = key, bucket = bucket, "delete completed.");
        Ok(())
    }

    /// Every object whose key starts with the target key.
    pub async fn list(&self, target: &Location) -> Result<Vec<ObjectRecord>> {
        let Location::Remote { bucket, key } = target else {
            return Err(anyhow!(R2syncError::InvalidUri(format!(
                "list target must be r2://: {target}"
            ))));
        };

        ObjectLister::new(
            self.storage.clone(),
            self.cancellation_token.clone(),
            self.stats_sender.clone(),
            self.sync_config.max_keys,
            false,
        )
        .list_records(bucket, key)
        .await
    }

    pub async fn presign(
        &self,
        target: &Location,
        method: PresignMethod,
        expires_in: Duration,
    ) -> Result<String> {
        let (bucket, key) = remote_object(target)?;
        self.storage.presign(bucket, key, method, expires_in).await
    }

    fn create_upload_manager(&self) -> UploadManager {
        UploadManager::new(
            self.storage.clone(),
            self.sync_config.transfer_config,
            self.cancellation_token.clone(),
            self.stats_sender.clone(),
        )
    }
}

fn remote_object(target: &Location) -> Result<(&str, &str)> {
    match target {
        Location::Remote { bucket, key } if !key.is_empty() => Ok((bucket, key)),
        _ => Err(anyhow!(R2syncError::InvalidUri(format!(
            "an object must be specified: {target}"
        )))),
    }
}

fn check_object_key(location: &Location, key: &str) -> Result<()> {
    if key.is_empty() || key.ends_with(KEY_SEPARATOR) {
        return Err(anyhow!(R2syncError::InvalidUri(format!(
            "an object must be specified: {location}"
        ))));
    }
    Ok(())
}

fn local_file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|file_name| file_name.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!(R2syncError::NotFound(path.display().to_string())))
}

fn remote_file_name(key: &str) -> &str {
    key.rsplit(KEY_SEPARATOR).next().unwrap_or(key)
}

/// A bucket root or a key ending with `/` receives the source file name.
fn resolve_dest_key(key: &str, file_name: &str) -> String {
    if key.is_empty() || key.ends_with(KEY_SEPARATOR) {
        format!("{key}{file_name}")
    } else {
        key.to_string()
    }
}

async fn resolve_local_path(path: &Path, key: &str) -> PathBuf {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => path.join(remote_file_name(key)),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::storage::memory::MemoryStorage;
    use crate::types::token::create_pipeline_cancellation_token;

    use super::*;

    const BUCKET: &str = "test-bucket";

    fn create_operator(storage: Arc<MemoryStorage>) -> ObjectOperator {
        let (stats_sender, _) = async_channel::unbounded();
        ObjectOperator::new(
            storage,
            SyncConfig::default(),
            create_pipeline_cancellation_token(),
            stats_sender,
        )
    }

    fn remote(uri: &str) -> Location {
        Location::parse(uri).unwrap()
    }

    fn local(path: &Path) -> Location {
        Location::Local {
            path: path.to_path_buf(),
        }
    }

    #[test]
    fn resolve_dest_key_test() {
        init_dummy_tracing_subscriber();

        assert_eq!(resolve_dest_key("", "a.txt"), "a.txt");
        assert_eq!(resolve_dest_key("dir/", "a.txt"), "dir/a.txt");
        assert_eq!(resolve_dest_key("dir/b.txt", "a.txt"), "dir/b.txt");
        assert_eq!(remote_file_name("dir1/dir2/a.txt"), "a.txt");
        assert_eq!(remote_file_name("a.txt"), "a.txt");
    }

    #[tokio::test]
    async fn copy_local_to_remote_bucket_root() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("a.txt");
        std::fs::write(&path, b"local").unwrap();

        let storage = Arc::new(MemoryStorage::new().with_bucket(BUCKET));
        create_operator(storage.clone())
            .copy(&local(&path), &remote("r2://test-bucket"))
            .await
            .unwrap();

        assert_eq!(
            storage.object_data(BUCKET, "a.txt").unwrap().as_ref(),
            b"local"
        );
    }

    #[tokio::test]
    async fn copy_remote_to_local_directory() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new().with_bucket(BUCKET));
        storage.insert_object(BUCKET, "dir1/b.txt", "remote");

        let operator = create_operator(storage);
        operator
            .copy(&remote("r2://test-bucket/dir1/b.txt"), &local(root.path()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(root.path().join("b.txt")).unwrap(), b"remote");

        operator
            .copy(
                &remote("r2://test-bucket/dir1/b.txt"),
                &local(&root.path().join("renamed.txt")),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(root.path().join("renamed.txt")).unwrap(),
            b"remote"
        );

        let error = operator
            .copy(&remote("r2://test-bucket/dir1/"), &local(root.path()))
            .await
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<R2syncError>(),
            Some(R2syncError::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn move_remote_to_remote() {
        init_dummy_tracing_subscriber();

        let storage = Arc::new(
            MemoryStorage::new()
                .with_bucket(BUCKET)
                .with_bucket("other-bucket"),
        );
        storage.insert_object(BUCKET, "dir1/a.txt", "moved");

        create_operator(storage.clone())
            .move_object(
                &remote("r2://test-bucket/dir1/a.txt"),
                &remote("r2://other-bucket/archive/"),
            )
            .await
            .unwrap();

        assert!(storage.keys(BUCKET).is_empty());
        assert_eq!(
            storage
                .object_data("other-bucket", "archive/a.txt")
                .unwrap()
                .as_ref(),
            b"moved"
        );
    }

    #[tokio::test]
    async fn move_local_to_remote_removes_local_file() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("a.txt");
        std::fs::write(&path, b"local").unwrap();

        let storage = Arc::new(MemoryStorage::new().with_bucket(BUCKET));
        create_operator(storage.clone())
            .move_object(&local(&path), &remote("r2://test-bucket/uploaded.txt"))
            .await
            .unwrap();

        assert!(!path.exists());
        assert_eq!(storage.keys(BUCKET), vec!["uploaded.txt"]);
    }

    #[tokio::test]
    async fn failed_move_keeps_source() {
        init_dummy_tracing_subscriber();

        let storage = Arc::new(MemoryStorage::new().with_bucket(BUCKET));
        storage.insert_object(BUCKET, "a.txt", "data");

        assert!(
            create_operator(storage.clone())
                .move_object(
                    &remote("r2://test-bucket/a.txt"),
                    &remote("r2://no-such-bucket/a.txt"),
                )
                .await
                .is_err()
        );
        assert_eq!(storage.keys(BUCKET), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn remove_and_list() {
        init_dummy_tracing_subscriber();

        let storage = Arc::new(MemoryStorage::new().with_bucket(BUCKET));
        for key in ["dir1/a.txt", "dir1/b.txt", "dir2/c.txt"] {
            storage.insert_object(BUCKET, key, "data");
        }

        let operator = create_operator(storage.clone());
        operator
            .remove(&remote("r2://test-bucket/dir1/a.txt"))
            .await
            .unwrap();

        let records = operator.list(&remote("r2://test-bucket/dir1")).await.unwrap();
        let keys: Vec<&str> = records.iter().map(|record| record.key.as_str()).collect();
        assert_eq!(keys, vec!["dir1/b.txt"]);

        let error = operator
            .remove(&remote("r2://test-bucket"))
            .await
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<R2syncError>(),
            Some(R2syncError::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn presign_requires_supported_storage() {
        init_dummy_tracing_subscriber();

        let storage = Arc::new(MemoryStorage::new().with_bucket(BUCKET));
        let operator = create_operator(storage);

        assert!(
            operator
                .presign(
                    &remote("r2://test-bucket/a.txt"),
                    PresignMethod::Get,
                    Duration::from_secs(60)
                )
                .await
                .is_err()
        );
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
