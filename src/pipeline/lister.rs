use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use tracing::{debug, trace};

use crate::storage::{Storage, remove_prefix};
use crate::types::error::R2syncError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{Catalog, ObjectRecord, SyncStatistics};

const CHANNEL_CAPACITY: usize = 20000;

pub struct ObjectLister {
    storage: Storage,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
    max_keys: i32,
    skip_directory_markers: bool,
}

impl ObjectLister {
    pub fn new(
        storage: Storage,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
        max_keys: i32,
        skip_directory_markers: bool,
    ) -> Self {
        Self {
            storage,
            cancellation_token,
            stats_sender,
            max_keys,
            skip_directory_markers,
        }
    }

    /// Follows the continuation cursor until the last page and sends every record
    /// as soon as its page arrives. Stops quietly if the receiver goes away.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        sender: &Sender<ObjectRecord>,
    ) -> Result<()> {
        trace!(bucket = bucket, prefix = prefix, "list objects has started.");

        let mut continuation_token = None;
        loop {
            if self.cancellation_token.is_cancelled() {
                trace!("list_objects() canceled.");
                return Err(anyhow!(R2syncError::Cancelled));
            }

            let list_page = self
                .storage
                .list_page(bucket, prefix, continuation_token, self.max_keys)
                .await
                .map_err(convert_listing_error)?;

            for record in list_page.records {
                if let Err(e) = sender
                    .send(record)
                    .await
                    .context("async_channel::Sender::send() failed.")
                {
                    return if !sender.is_closed() { Err(e) } else { Ok(()) };
                }
            }

            let Some(next_continuation_token) = list_page.next_continuation_token else {
                break;
            };
            continuation_token = Some(next_continuation_token);
        }

        trace!(bucket = bucket, prefix = prefix, "list objects has been completed.");
        Ok(())
    }

    /// Drains `list_objects` into a catalog keyed by the key relative to `prefix`.
    /// Any failed page fails the whole catalog.
    pub async fn build_catalog(&self, bucket: &str, prefix: &str) -> Result<Catalog> {
        let (sender, receiver) = async_channel::bounded(CHANNEL_CAPACITY);

        let list = async {
            let result = self.list_objects(bucket, prefix, &sender).await;
            sender.close();
            result
        };

        let collect = async {
            let mut catalog = Catalog::new();
            while let Ok(record) = receiver.recv().await {
                let Some(relative_key) = remove_prefix(&record.key, prefix) else {
                    continue;
                };

                if relative_key.is_empty() {
                    let key = record.key.clone();
                    debug!(key = key, "key that is same as prefix is skipped.");
                    self.send_stats(SyncStatistics::SyncSkip { key }).await;
                    continue;
                }

                if self.skip_directory_markers && record.is_directory_marker() {
                    let key = record.key.clone();
                    debug!(key = key, "directory marker is skipped.");
                    continue;
                }

                catalog.insert(relative_key.to_string(), record);
            }
            catalog
        };

        let (result, catalog) = tokio::join!(list, collect);
        result?;

        trace!(
            bucket = bucket,
            prefix = prefix,
            count = catalog.len(),
            "catalog has been built."
        );
        Ok(catalog)
    }

    /// Every record under `prefix`, in listing order.
    pub async fn list_records(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectRecord>> {
        let (sender, receiver) = async_channel::bounded(CHANNEL_CAPACITY);

        let list = async {
            let result = self.list_objects(bucket, prefix, &sender).await;
            sender.close();
            result
        };

        let collect = async {
            let mut records = vec![];
            while let Ok(record) = receiver.recv().await {
                records.push(record);
            }
            records
        };

        let (result, records) = tokio::join!(list, collect);
        result?;

        Ok(records)
    }

    async fn send_stats(&self, stats: SyncStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }
}

fn convert_listing_error(e: anyhow::Error) -> anyhow::Error {
    if e.downcast_ref::<R2syncError>().is_some() {
        return e;
    }
    anyhow!(R2syncError::StorageUnavailable(format!("{e:#}")))
}
