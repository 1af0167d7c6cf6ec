use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use tracing::{debug, trace, warn};

use crate::config::SyncConfig;
use crate::pipeline::diff_detector::{is_local_file_different, needs_transfer};
use crate::pipeline::lister::ObjectLister;
use crate::storage::local::LocalLister;
use crate::storage::local::fs_util::{is_key_a_directory, resolve_path_within_root};
use crate::storage::{Storage, generate_full_key};
use crate::types::error::R2syncError;
use crate::types::location::{Location, normalize_prefix};
use crate::types::token::PipelineCancellationToken;
use crate::types::{SyncStatistics, TransferAction, TransferPlan};

/// Builds the transfer plan for one of the three sync directions. Nothing is
/// written while planning.
pub struct TransferPlanner {
    storage: Storage,
    sync_config: SyncConfig,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
    has_warning: Arc<AtomicBool>,
}

impl TransferPlanner {
    pub fn new(
        storage: Storage,
        sync_config: SyncConfig,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        Self {
            storage,
            sync_config,
            cancellation_token,
            stats_sender,
            has_warning,
        }
    }

    pub async fn plan(&self, source: &Location, target: &Location) -> Result<TransferPlan> {
        let mut plan = TransferPlan::new(source.clone(), target.clone());

        match (source, target) {
            (Location::Local { path }, Location::Remote { bucket, key }) => {
                self.plan_local_to_remote(path, bucket, key, &mut plan)
                    .await?
            }
            (Location::Remote { bucket, key }, Location::Local { path }) => {
                self.plan_remote_to_local(bucket, key, path, &mut plan)
                    .await?
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
                self.plan_remote_to_remote(
                    source_bucket,
                    source_key,
                    target_bucket,
                    target_key,
                    &mut plan,
                )
                .await?
            }
            (Location::Local { .. }, Location::Local { .. }) => {
                return Err(anyhow!(R2syncError::InvalidUri(
                    "either source or target must be r2://".to_string()
                )));
            }
        }

        debug!(
            source_uri = source.to_string(),
            target_uri = target.to_string(),
            actions = plan.len(),
            rejected = plan.rejected_keys.len(),
            "transfer plan has been built."
        );

        Ok(plan)
    }

    async fn plan_local_to_remote(
        &self,
        root: &Path,
        bucket: &str,
        key: &str,
        plan: &mut TransferPlan,
    ) -> Result<()> {
        check_local_directory(root).await?;

        let prefix = normalize_prefix(key);
        let target_catalog = self.create_object_lister().build_catalog(bucket, &prefix).await?;

        let local_files = LocalLister::new(
            root,
            self.sync_config.follow_symlinks,
            self.cancellation_token.clone(),
            self.stats_sender.clone(),
            self.has_warning.clone(),
        )
        .list_files()
        .await?;

        for local_file in local_files {
            self.check_cancelled()?;

            let dest_key = generate_full_key(&prefix, &local_file.relative_key);
            if let Some(target_record) = target_catalog.get(&local_file.relative_key) {
                match is_local_file_different(
                    &dest_key,
                    &local_file.path,
                    &target_record.content_hash,
                    self.sync_config.transfer_config.part_size,
                )
                .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        self.send_stats(SyncStatistics::SyncSkip { key: dest_key })
                            .await;
                        continue;
                    }
                    Err(e) => {
                        let path = local_file.path.to_string_lossy().to_string();
                        let error = format!("{e:#}");
                        warn!(path = path, error = error, "failed to hash local file.");
                        self.send_warning(path).await;
                        continue;
                    }
                }
            }

            trace!(key = dest_key, "upload planned.");
            plan.actions.push(TransferAction::Upload {
                local_path: local_file.path,
                dest_key,
            });
        }

        Ok(())
    }

    async fn plan_remote_to_local(
        &self,
        bucket: &str,
        key: &str,
        root: &Path,
        plan: &mut TransferPlan,
    ) -> Result<()> {
        check_local_directory(root).await?;
        let canonical_root = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("tokio::fs::canonicalize() failed. path={}", root.display()))?;

        let prefix = normalize_prefix(key);
        let source_catalog = self.create_object_lister().build_catalog(bucket, &prefix).await?;

        let mut claimed_paths: HashSet<PathBuf> = HashSet::new();
        for (relative_key, source_record) in source_catalog {
            self.check_cancelled()?;

            let local_path = match resolve_path_within_root(&canonical_root, &relative_key) {
                Ok(local_path) => local_path,
                Err(e) => {
                    if !matches!(
                        e.downcast_ref::<R2syncError>(),
                        Some(R2syncError::PathTraversalRejected(_))
                    ) {
                        return Err(e);
                    }

                    let key = source_record.key.clone();
                    warn!(
                        key = key,
                        "a object references outside of the destination directory. skipping."
                    );
                    self.send_warning(key.clone()).await;
                    plan.rejected_keys.push(key);
                    continue;
                }
            };

            // keys such as "a//b" and "a/b" land on the same file
            if !claimed_paths.insert(local_path.clone()) {
                let key = source_record.key.clone();
                warn!(
                    key = key,
                    path = local_path.to_string_lossy().to_string(),
                    "another object is already planned for the same local path. skipping."
                );
                self.send_warning(key).await;
                continue;
            }

            if is_key_a_directory(&relative_key) {
                if local_path.is_dir() {
                    self.send_stats(SyncStatistics::SyncSkip {
                        key: source_record.key,
                    })
                    .await;
                    continue;
                }
            } else if local_path.is_file() {
                match is_local_file_different(
                    &source_record.key,
                    &local_path,
                    &source_record.content_hash,
                    self.sync_config.transfer_config.part_size,
                )
                .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        self.send_stats(SyncStatistics::SyncSkip {
                            key: source_record.key,
                        })
                        .await;
                        continue;
                    }
                    Err(e) => {
                        let path = local_path.to_string_lossy().to_string();
                        let error = format!("{e:#}");
                        warn!(path = path, error = error, "failed to hash local file.");
                        self.send_warning(path).await;
                        continue;
                    }
                }
            }

            trace!(key = source_record.key, "download planned.");
            plan.actions.push(TransferAction::Download {
                source_key: source_record.key,
                local_path,
            });
        }

        Ok(())
    }

    async fn plan_remote_to_remote(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
        plan: &mut TransferPlan,
    ) -> Result<()> {
        let source_prefix = normalize_prefix(source_key);
        let target_prefix = normalize_prefix(target_key);

        // both sides are snapshotted before any copy is issued
        let lister = self.create_object_lister();
        let source_catalog = lister.build_catalog(source_bucket, &source_prefix).await?;
        let target_catalog = lister.build_catalog(target_bucket, &target_prefix).await?;

        for (relative_key, source_record) in source_catalog {
            self.check_cancelled()?;

            let dest_key = generate_full_key(&target_prefix, &relative_key);
            let target_fingerprint = target_catalog
                .get(&relative_key)
                .map(|record| record.content_hash.as_str());

            if !needs_transfer(&source_record.content_hash, target_fingerprint) {
                debug!(key = dest_key, "object filtered. fingerprints are equal.");
                self.send_stats(SyncStatistics::SyncSkip { key: dest_key })
                    .await;
                continue;
            }

            trace!(key = dest_key, "copy planned.");
            plan.actions.push(TransferAction::RemoteCopy {
                source_key: source_record.key,
                dest_bucket: target_bucket.to_string(),
                dest_key,
            });
        }

        Ok(())
    }

    fn create_object_lister(&self) -> ObjectLister {
        ObjectLister::new(
            self.storage.clone(),
            self.cancellation_token.clone(),
            self.stats_sender.clone(),
            self.sync_config.max_keys,
            self.sync_config.skip_directory_markers,
        )
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            trace!("planning canceled.");
            return Err(anyhow!(R2syncError::Cancelled));
        }
        Ok(())
    }

    async fn send_warning(&self, key: String) {
        self.has_warning.store(true, Ordering::SeqCst);
        self.send_stats(SyncStatistics::SyncWarning { key }).await;
    }

    async fn send_stats(&self, stats: SyncStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }
}

async fn check_local_directory(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        _ => Err(anyhow!(R2syncError::NotADirectory(
            path.to_string_lossy().to_string()
        ))),
    }
}
