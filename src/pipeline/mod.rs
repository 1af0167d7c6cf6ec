use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Error, Result, anyhow};
use async_channel::{Receiver, Sender};
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::pipeline::planner::TransferPlanner;
use crate::pipeline::syncer::ObjectSyncer;
use crate::storage::Storage;
use crate::types::error::{R2syncError, is_cancelled_error};
use crate::types::location::Location;
use crate::types::token::PipelineCancellationToken;
use crate::types::{SyncStatistics, TransferAction, TransferPlan};

pub mod diff_detector;
pub mod lister;
pub mod object_operator;
pub mod planner;
pub mod syncer;

/// Plans a one-way sync and executes the plan. Per-object failures are
/// collected and the remaining actions still run; planning failures abort.
pub struct Pipeline {
    sync_config: SyncConfig,
    storage: Storage,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
    stats_receiver: Receiver<SyncStatistics>,
    has_error: Arc<AtomicBool>,
    has_warning: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<Error>>>,
}

impl Pipeline {
    pub fn new(
        sync_config: SyncConfig,
        storage: Storage,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        Self {
            sync_config,
            storage,
            cancellation_token,
            stats_sender,
            stats_receiver,
            has_error: Arc::new(AtomicBool::new(false)),
            has_warning: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::<Error>::new())),
        }
    }

    pub async fn plan(&self, source: &Location, target: &Location) -> Result<TransferPlan> {
        let plan = TransferPlanner::new(
            self.storage.clone(),
            self.sync_config,
            self.cancellation_token.clone(),
            self.stats_sender.clone(),
            self.has_warning.clone(),
        )
        .plan(source, target)
        .await?;

        if !plan.rejected_keys.is_empty() {
            self.has_warning.store(true, Ordering::SeqCst);
        }

        info!(
            source_uri = source.to_string(),
            target_uri = target.to_string(),
            actions = plan.len(),
            rejected = plan.rejected_keys.len(),
            "transfer plan has been built."
        );
        Ok(plan)
    }

    /// Runs every action of the plan in order. Returns `Err` only when
    /// cancelled; failed actions are recorded in [`Pipeline::has_error`].
    pub async fn execute(&self, plan: &TransferPlan) -> Result<()> {
        if self.sync_config.dry_run {
            for action in &plan.actions {
                log_dry_run(action);
                self.send_stats(SyncStatistics::SyncComplete {
                    key: action.source_name(),
                })
                .await;
            }
            return Ok(());
        }

        let syncer = ObjectSyncer::new(
            self.storage.clone(),
            self.sync_config,
            self.cancellation_token.clone(),
            self.stats_sender.clone(),
        );

        for action in &plan.actions {
            if self.cancellation_token.is_cancelled() {
                warn!("sync cancelled.");
                return Err(anyhow!(R2syncError::Cancelled));
            }

            let key = action.source_name();
            match syncer.sync_action(plan, action).await {
                Ok(()) => {
                    self.send_stats(SyncStatistics::SyncComplete { key }).await;
                }
                Err(e) => {
                    if is_cancelled_error(&e) {
                        warn!(key = key, "sync cancelled.");
                        return Err(e);
                    }

                    self.send_stats(SyncStatistics::SyncError { key: key.clone() })
                        .await;
                    self.print_and_store_error(e, &key);
                }
            }
        }

        Ok(())
    }

    /// Plans and executes in one call. The statistics channel is closed on
    /// return so that a consumer draining it terminates.
    pub async fn plan_and_execute_sync(
        &self,
        source: &Location,
        target: &Location,
    ) -> Result<TransferPlan> {
        let result = match self.plan(source, target).await {
            Ok(plan) => self.execute(&plan).await.map(|_| plan),
            Err(e) => Err(e),
        };

        self.close_stats_sender();
        result
    }

    fn print_and_store_error(&self, e: Error, key: &str) {
        self.has_error.store(true, Ordering::SeqCst);

        let error = e.to_string();
        let source = e.source();
        error!(key = key, error = error, source = source, "sync object failed.");

        self.errors.lock().unwrap().push_back(e);
    }

    async fn send_stats(&self, stats: SyncStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    pub fn get_stats_receiver(&self) -> Receiver<SyncStatistics> {
        self.stats_receiver.clone()
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    pub fn get_errors_and_consume(&self) -> Option<Vec<Error>> {
        if !self.has_error() {
            return None;
        }

        let mut error_list = self.errors.lock().unwrap();
        Some(error_list.drain(..).collect())
    }

    pub fn close_stats_sender(&self) {
        self.stats_sender.close();
    }
}

fn log_dry_run(action: &TransferAction) {
    match action {
        TransferAction::Upload {
            local_path,
            dest_key,
        } => info!(
            key = dest_key,
            source_path = local_path.to_string_lossy().to_string(),
            "[dry-run] upload."
        ),
        TransferAction::Download {
            source_key,
            local_path,
        } => info!(
            key = source_key,
            target_path = local_path.to_string_lossy().to_string(),
            "[dry-run] download."
        ),
        TransferAction::RemoteCopy {
            source_key,
            dest_bucket,
            dest_key,
        } => info!(
            key = source_key,
            target_bucket = dest_bucket,
            target_key = dest_key,
            "[dry-run] copy."
        ),
    }
}
