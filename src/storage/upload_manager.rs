use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::config::TransferConfig;
use crate::storage::Storage;
use crate::types::error::{R2syncError, is_cancelled_error};
use crate::types::location::Location;
use crate::types::token::PipelineCancellationToken;
use crate::types::{CompletedPartTag, SyncStatistics};

/// Where the parts of a multipart upload are read from.
#[derive(Clone)]
enum PartSource {
    Buffer(Bytes),
    File(PathBuf),
}

impl PartSource {
    async fn read_part(&self, offset: u64, length: u64) -> Result<Bytes> {
        match self {
            PartSource::Buffer(data) => {
                Ok(data.slice(offset as usize..(offset + length) as usize))
            }
            PartSource::File(path) => {
                let mut file = File::open(path).await.with_context(|| {
                    format!("tokio::fs::File::open() failed. path={}", path.display())
                })?;
                file.seek(SeekFrom::Start(offset))
                    .await
                    .context("tokio::io::AsyncSeekExt::seek() failed.")?;

                let mut buffer = vec![0u8; length as usize];
                file.read_exact(buffer.as_mut_slice())
                    .await
                    .context("tokio::io::AsyncReadExt::read_exact() failed.")?;

                Ok(Bytes::from(buffer))
            }
        }
    }
}

pub struct UploadManager {
    storage: Storage,
    transfer_config: TransferConfig,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
}

impl UploadManager {
    pub fn new(
        storage: Storage,
        transfer_config: TransferConfig,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
    ) -> Self {
        UploadManager {
            storage,
            transfer_config,
            cancellation_token,
            stats_sender,
        }
    }

    /// Buffers the whole reader in memory, then uploads it with a single put or a
    /// multipart upload depending on the buffered length.
    pub async fn stream_upload<R>(&self, mut reader: R, bucket: &str, key: &str) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .await
            .context("tokio::io::AsyncReadExt::read_to_end() failed.")?;

        debug!(key = key, size = buffer.len(), "input stream buffered.");

        self.upload_bytes(Bytes::from(buffer), bucket, key, None)
            .await
    }

    pub async fn upload_bytes(
        &self,
        data: Bytes,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String> {
        let content_length = data.len() as u64;
        if self
            .transfer_config
            .is_multipart_upload_required(content_length)
        {
            return self
                .multipart_upload(
                    bucket,
                    key,
                    content_type,
                    PartSource::Buffer(data),
                    content_length,
                )
                .await;
        }

        self.singlepart_upload(bucket, key, ByteStream::from(data), content_length, content_type)
            .await
    }

    /// Files at or below the part size are streamed from disk with a single put.
    /// Larger files are uploaded in parts, each read at its own offset.
    pub async fn upload_file(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String> {
        let content_length = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("tokio::fs::metadata() failed. path={}", path.display()))?
            .len();

        if self
            .transfer_config
            .is_multipart_upload_required(content_length)
        {
            return self
                .multipart_upload(
                    bucket,
                    key,
                    content_type,
                    PartSource::File(path.to_path_buf()),
                    content_length,
                )
                .await;
        }

        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("ByteStream::from_path() failed. path={}", path.display()))?;
        self.singlepart_upload(bucket, key, body, content_length, content_type)
            .await
    }

    async fn singlepart_upload(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
        content_type: Option<String>,
    ) -> Result<String> {
        if self.cancellation_token.is_cancelled() {
            return Err(anyhow!(R2syncError::Cancelled));
        }

        let e_tag = self
            .storage
            .put_object(bucket, key, body, content_length, content_type)
            .await?;
        self.send_stats(SyncStatistics::SyncBytes(content_length))
            .await;

        trace!(key = key, e_tag = e_tag, "put_object() completed.");
        Ok(e_tag)
    }

    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        source: PartSource,
        content_length: u64,
    ) -> Result<String> {
        if self.cancellation_token.is_cancelled() {
            return Err(anyhow!(R2syncError::Cancelled));
        }

        let upload_id = self
            .storage
            .initiate_multipart(bucket, key, content_type)
            .await?;
        debug!(key = key, upload_id = upload_id, "multipart upload initiated.");

        let e = match self
            .upload_parts_and_complete(bucket, key, &upload_id, source, content_length)
            .await
        {
            Ok(e_tag) => return Ok(e_tag),
            Err(e) => e,
        };

        if let Err(abort_error) = self.storage.abort_multipart(bucket, key, &upload_id).await {
            let error = format!("{abort_error:#}");
            warn!(
                key = key,
                upload_id = upload_id,
                error = error,
                "abort_multipart() failed."
            );
        }

        if is_cancelled_error(&e) {
            debug!(key = key, upload_id = upload_id, "multipart upload cancelled.");
            return Err(e);
        }

        Err(anyhow!(R2syncError::PartialMultipartFailure(format!(
            "key={key} upload_id={upload_id}: {e:#}"
        ))))
    }

    async fn upload_parts_and_complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        source: PartSource,
        content_length: u64,
    ) -> Result<String> {
        let part_size = self.transfer_config.part_size;
        let parts_count = self.transfer_config.calculate_parts_count(content_length);
        let semaphore = Arc::new(Semaphore::new(self.transfer_config.concurrency));
        let completed_parts = Arc::new(AtomicUsize::new(0));

        let mut join_set: JoinSet<Result<CompletedPartTag>> = JoinSet::new();
        let mut upload_parts = Vec::with_capacity(parts_count as usize);

        for index in 0..parts_count {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.context("tokio::sync::Semaphore::acquire_owned() failed.")?
                }
                _ = self.cancellation_token.cancelled() => {
                    join_set.shutdown().await;
                    return Err(anyhow!(R2syncError::Cancelled));
                }
            };

            // a failed part stops the loop before more parts are started
            while let Some(result) = join_set.try_join_next() {
                match Self::collect_part_result(result) {
                    Ok(part) => upload_parts.push(part),
                    Err(e) => {
                        join_set.shutdown().await;
                        return Err(e);
                    }
                }
            }

            let offset = index * part_size;
            let length = part_size.min(content_length - offset);
            let part_number = (index + 1) as i32;

            let storage = self.storage.clone();
            let source = source.clone();
            let bucket = bucket.to_string();
            let key = key.to_string();
            let upload_id = upload_id.to_string();
            let completed_parts = completed_parts.clone();
            let stats_sender = self.stats_sender.clone();

            join_set.spawn(async move {
                let _permit = permit;

                let body = source.read_part(offset, length).await?;
                let e_tag = storage
                    .upload_part(&bucket, &key, &upload_id, part_number, body)
                    .await?;

                let completed = completed_parts.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = stats_sender.send(SyncStatistics::SyncBytes(length)).await;
                trace!(
                    key = key,
                    part_number = part_number,
                    completed = completed,
                    parts_count = parts_count,
                    "part uploaded."
                );

                Ok::<CompletedPartTag, anyhow::Error>(CompletedPartTag { part_number, e_tag })
            });
        }

        loop {
            tokio::select! {
                result = join_set.join_next() => {
                    let Some(result) = result else {
                        break;
                    };
                    match Self::collect_part_result(result) {
                        Ok(part) => upload_parts.push(part),
                        Err(e) => {
                            join_set.shutdown().await;
                            return Err(e);
                        }
                    }
                }
                _ = self.cancellation_token.cancelled() => {
                    join_set.shutdown().await;
                    return Err(anyhow!(R2syncError::Cancelled));
                }
            }
        }

        let completed = completed_parts.load(Ordering::SeqCst);
        if completed as u64 != parts_count {
            return Err(anyhow!(
                "not all parts were uploaded. completed={completed} parts_count={parts_count}"
            ));
        }

        upload_parts.sort_by_key(|part| part.part_number);
        trace!(key = key, upload_id = upload_id, "{upload_parts:?}");

        self.storage
            .complete_multipart(bucket, key, upload_id, upload_parts)
            .await
    }

    fn collect_part_result(
        result: std::result::Result<Result<CompletedPartTag>, tokio::task::JoinError>,
    ) -> Result<CompletedPartTag> {
        result.context("part upload task failed.")?
    }

    async fn send_stats(&self, stats: SyncStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }
}

/// Buffers `reader` and uploads it to `target`, which must be a remote location
/// naming an object.
pub async fn stream_upload<R>(
    storage: Storage,
    reader: R,
    target: &Location,
    part_size: u64,
    concurrency: usize,
    cancellation_token: PipelineCancellationToken,
) -> Result<String>
where
    R: AsyncRead + Unpin + Send,
{
    let Location::Remote { bucket, key } = target else {
        return Err(anyhow!(R2syncError::InvalidUri(format!(
            "stream target must be r2://: {target}"
        ))));
    };
    if key.is_empty() {
        return Err(anyhow!(R2syncError::InvalidUri(format!(
            "stream target must name an object: {target}"
        ))));
    }

    let transfer_config = TransferConfig::new(part_size, concurrency)?;
    let (stats_sender, _) = async_channel::unbounded();

    UploadManager::new(storage, transfer_config, cancellation_token, stats_sender)
        .stream_upload(reader, bucket, key)
        .await
}

pub fn guess_content_type(key: &str) -> Option<String> {
    mime_guess::from_path(key)
        .first()
        .map(|mime| mime.essence_str().to_string())
}
