use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::time::Instant;
use tracing::{error, info, trace};

use r2sync::config::{Command, SyncConfig};
use r2sync::storage::Storage;
use r2sync::storage::s3::create_storage;
use r2sync::types::error::is_cancelled_error;
use r2sync::types::location::Location;
use r2sync::types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
use r2sync::types::{ObjectRecord, SyncStatistics};
use r2sync::{Config, ObjectOperator, Pipeline, stream_upload};

mod ctrl_c_handler;
mod indicator;
mod ui_config;

#[allow(dead_code)]
const EXIT_CODE_SUCCESS: i32 = 0;
#[allow(dead_code)]
const EXIT_CODE_ERROR: i32 = 1;
#[allow(dead_code)]
const EXIT_CODE_INVALID_ARGS: i32 = 2;
const EXIT_CODE_WARNING: i32 = 3;

pub async fn run(config: Config) -> Result<()> {
    let Some(command) = config.command.clone() else {
        return Ok(());
    };

    let storage = create_storage(&config.client_config).await;
    run_command(config, command, storage).await
}

async fn run_command(config: Config, command: Command, storage: Storage) -> Result<()> {
    let cancellation_token = create_pipeline_cancellation_token();
    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = Instant::now();
    trace!("command start.");

    let result = match command {
        Command::Sync { source, target } => {
            let has_warning =
                run_sync(&config, storage, &source, &target, cancellation_token).await?;
            if has_warning {
                std::process::exit(EXIT_CODE_WARNING);
            }
            Ok(())
        }
        Command::Pipe { target } => {
            let transfer_config = config.sync_config.transfer_config;
            stream_upload(
                storage,
                tokio::io::stdin(),
                &target,
                transfer_config.part_size,
                transfer_config.concurrency,
                cancellation_token,
            )
            .await
            .map(|e_tag| {
                info!(target_uri = target.to_string(), e_tag = e_tag, "pipe completed.");
            })
        }
        Command::Copy { source, target } => {
            create_operator(storage, config.sync_config, cancellation_token)
                .copy(&source, &target)
                .await
        }
        Command::Move { source, target } => {
            create_operator(storage, config.sync_config, cancellation_token)
                .move_object(&source, &target)
                .await
        }
        Command::Remove { targets } => {
            remove_objects(
                &create_operator(storage, config.sync_config, cancellation_token),
                &targets,
            )
            .await
        }
        Command::List { target } => {
            create_operator(storage, config.sync_config, cancellation_token)
                .list(&target)
                .await
                .map(|records| print_records(&records))
        }
        Command::Presign {
            target,
            method,
            expires_in_secs,
        } => create_operator(storage, config.sync_config, cancellation_token)
            .presign(&target, method, Duration::from_secs(expires_in_secs))
            .await
            .map(|url| println!("{url}")),
    };

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
    if let Err(e) = result {
        error!(
            duration_sec = duration_sec,
            error = format!("{e:#}"),
            "r2sync failed."
        );
        return Err(e);
    }

    trace!(duration_sec = duration_sec, "r2sync has been completed.");
    Ok(())
}

/// Returns whether a warning was raised.
async fn run_sync(
    config: &Config,
    storage: Storage,
    source: &Location,
    target: &Location,
    cancellation_token: PipelineCancellationToken,
) -> Result<bool> {
    let pipeline = Pipeline::new(config.sync_config, storage, cancellation_token);
    let indicator_join_handle = indicator::show_indicator(
        pipeline.get_stats_receiver(),
        ui_config::is_progress_indicator_needed(config),
        ui_config::is_show_result_needed(config),
        ui_config::is_log_sync_summary_needed(config),
        config.sync_config.dry_run,
    );

    let result = pipeline.plan_and_execute_sync(source, target).await;
    indicator_join_handle.await?;

    let plan = match result {
        Ok(plan) => plan,
        Err(e) if is_cancelled_error(&e) => {
            return Err(anyhow!("sync cancelled."));
        }
        Err(e) => return Err(e),
    };

    if pipeline.has_error() {
        for e in pipeline.get_errors_and_consume().unwrap_or_default() {
            error!(error = format!("{e:#}"), "object sync failed.");
        }
        return Err(anyhow!("some objects failed to sync."));
    }

    for rejected_key in &plan.rejected_keys {
        info!(key = rejected_key, "rejected key.");
    }

    Ok(pipeline.has_warning())
}

async fn remove_objects(operator: &ObjectOperator, targets: &[Location]) -> Result<()> {
    let mut failed = 0;
    for target in targets {
        if let Err(e) = operator.remove(target).await {
            if is_cancelled_error(&e) {
                return Err(e);
            }

            error!(
                target_uri = target.to_string(),
                error = format!("{e:#}"),
                "remove failed."
            );
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(anyhow!("{failed} of {} objects failed to remove.", targets.len()));
    }
    Ok(())
}

fn create_operator(
    storage: Storage,
    sync_config: SyncConfig,
    cancellation_token: PipelineCancellationToken,
) -> ObjectOperator {
    let (stats_sender, _) = async_channel::unbounded::<SyncStatistics>();
    ObjectOperator::new(storage, sync_config, cancellation_token, stats_sender)
}

fn format_record(record: &ObjectRecord) -> String {
    format!(
        "{} {:>12} {}",
        record.modified_at.format("%Y-%m-%d %H:%M:%S"),
        record.size,
        record.key
    )
}

fn print_records(records: &[ObjectRecord]) {
    for record in records {
        println!("{}", format_record(record));
    }
}
