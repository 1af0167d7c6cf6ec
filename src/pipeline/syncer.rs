use std::path::Path;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, trace, warn};

use crate::config::SyncConfig;
use crate::storage::Storage;
use crate::storage::local::fs_util;
use crate::storage::upload_manager::{UploadManager, guess_content_type};
use crate::types::error::R2syncError;
use crate::types::location::Location;
use crate::types::token::PipelineCancellationToken;
use crate::types::{SyncStatistics, TransferAction, TransferPlan};

/// Runs the actions of a transfer plan, one at a time.
pub struct ObjectSyncer {
    storage: Storage,
    upload_manager: UploadManager,
    sync_config: SyncConfig,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
}

impl ObjectSyncer {
    pub fn new(
        storage: Storage,
        sync_config: SyncConfig,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
    ) -> Self {
        let upload_manager = UploadManager::new(
            storage.clone(),
            sync_config.transfer_config,
            cancellation_token.clone(),
            stats_sender.clone(),
        );

        Self {
            storage,
            upload_manager,
            sync_config,
            cancellation_token,
            stats_sender,
        }
    }

    pub async fn sync_action(&self, plan: &TransferPlan, action: &TransferAction) -> Result<()> {
        match action {
            TransferAction::Upload {
                local_path,
                dest_key,
            } => {
                let bucket = remote_bucket(&plan.target)?;
                let content_type = if self.sync_config.guess_mime_type {
                    guess_content_type(dest_key)
                } else {
                    None
                };

                self.upload_manager
                    .upload_file(local_path, bucket, dest_key, content_type)
                    .await?;

                info!(
                    key = dest_key,
                    source_path = local_path.to_string_lossy().to_string(),
                    "upload completed."
                );
            }
            TransferAction::Download {
                source_key,
                local_path,
            } => {
                let bucket = remote_bucket(&plan.source)?;
                let size = download_object(
                    &self.storage,
                    bucket,
                    source_key,
                    local_path,
                    &self.cancellation_token,
                    &self.stats_sender,
                    self.sync_config.transfer_config.part_size,
                )
                .await?;

                info!(
                    key = source_key,
                    size = size,
                    target_path = local_path.to_string_lossy().to_string(),
                    "download completed."
                );
            }
            TransferAction::RemoteCopy {
                source_key,
                dest_bucket,
                dest_key,
            } => {
                let source_bucket = remote_bucket(&plan.source)?;
                self.storage
                    .copy_object(source_bucket, source_key, dest_bucket, dest_key)
                    .await?;

                info!(
                    key = source_key,
                    target_bucket = dest_bucket,
                    target_key = dest_key,
                    "copy completed."
                );
            }
        }

        Ok(())
    }
}

fn remote_bucket(location: &Location) -> Result<&str> {
    match location {
        Location::Remote { bucket, .. } => Ok(bucket),
        Location::Local { path } => Err(anyhow!(R2syncError::InvalidUri(format!(
            "remote location expected: {}",
            path.display()
        )))),
    }
}

/// Streams one object into `local_path` through a temporary file in the same
/// directory, then sets the local modification time to the remote one. A key
/// ending with `/` creates a directory instead.
///
/// Returns the number of bytes written.
pub async fn download_object(
    storage: &Storage,
    bucket: &str,
    key: &str,
    local_path: &Path,
    cancellation_token: &PipelineCancellationToken,
    stats_sender: &Sender<SyncStatistics>,
    cancellation_check_interval: u64,
) -> Result<u64> {
    if fs_util::is_key_a_directory(key) {
        tokio::fs::create_dir_all(local_path)
            .await
            .context("tokio::fs::create_dir_all() failed.")?;

        trace!(key = key, "directory created.");
        return Ok(0);
    }

    fs_util::create_parent_directories(local_path).await?;

    let object_stream = storage.get_object_stream(bucket, key).await?;
    let modified_at = object_stream.record.modified_at;

    let mut temp_file = fs_util::create_temp_file_beside(local_path)?;
    let mut file = tokio::fs::File::from_std(
        temp_file
            .as_file_mut()
            .try_clone()
            .context("std::fs::File::try_clone() failed.")?,
    );

    let mut buf_reader = BufReader::new(object_stream.body.into_async_read());

    let mut written: u64 = 0;
    let mut chunked_remaining: u64 = 0;
    loop {
        let buffer = buf_reader
            .fill_buf()
            .await
            .context("tokio::io::AsyncBufReadExt::fill_buf() failed.")?;
        if buffer.is_empty() {
            break;
        }

        let buffer_len = buffer.len();
        file.write_all(buffer)
            .await
            .context("tokio::io::AsyncWriteExt::write_all() failed.")?;
        buf_reader.consume(buffer_len);

        written += buffer_len as u64;
        let _ = stats_sender
            .send(SyncStatistics::SyncBytes(buffer_len as u64))
            .await;

        // make it easy to cancel
        chunked_remaining += buffer_len as u64;
        if chunked_remaining > cancellation_check_interval {
            chunked_remaining = 0;

            if cancellation_token.is_cancelled() {
                warn!(key = key, "download cancelled.");
                return Err(anyhow!(R2syncError::Cancelled));
            }
        }
    }

    file.flush()
        .await
        .context("tokio::io::AsyncWriteExt::flush() failed.")?;
    drop(file);

    temp_file
        .persist(local_path)
        .with_context(|| format!("NamedTempFile::persist() failed. path={}", local_path.display()))?;

    fs_util::set_last_modified(local_path, modified_at)
        .context("fs_util::set_last_modified() failed.")?;

    Ok(written)
}
