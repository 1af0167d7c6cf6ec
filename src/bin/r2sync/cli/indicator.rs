use std::io;
use std::io::Write;
use std::time::Duration;

use async_channel::Receiver;
use indicatif::{HumanBytes, HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use r2sync::types::SyncStatistics;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const POLLING_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub transferred_bytes: u64,
    pub transferred_objects: u64,
    pub skipped: u64,
    pub errors: u64,
    pub warnings: u64,
}

impl SyncSummary {
    fn add(&mut self, sync_stats: SyncStatistics) {
        match sync_stats {
            SyncStatistics::SyncBytes(size) => self.transferred_bytes += size,
            SyncStatistics::SyncComplete { .. } => self.transferred_objects += 1,
            SyncStatistics::SyncSkip { .. } => self.skipped += 1,
            SyncStatistics::SyncError { .. } => self.errors += 1,
            SyncStatistics::SyncWarning { .. } => self.warnings += 1,
        }
    }

    fn format(&self, bytes_per_sec: u64, objects_per_sec: u64) -> String {
        format!(
            "{:>3} | {:>3}/sec,  transferred {:>3} objects | {:>3} objects/sec,  skipped {} objects,  error {} objects,  warning {} objects",
            HumanBytes(self.transferred_bytes),
            HumanBytes(bytes_per_sec),
            self.transferred_objects,
            HumanCount(objects_per_sec),
            self.skipped,
            self.errors,
            self.warnings,
        )
    }
}

/// Folds the statistics channel until it is closed and returns the totals.
pub fn show_indicator(
    stats_receiver: Receiver<SyncStatistics>,
    show_progress: bool,
    show_result: bool,
    log_sync_summary: bool,
    dry_run: bool,
) -> JoinHandle<SyncSummary> {
    let progress_text = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::with_template("{wide_msg}") {
        progress_text.set_style(progress_style);
    }

    tokio::spawn(async move {
        let start_time = Instant::now();
        let mut summary = SyncSummary::default();

        let mut period_start = Instant::now();
        let mut period_summary = summary;
        loop {
            while let Ok(sync_stats) = stats_receiver.try_recv() {
                summary.add(sync_stats);
            }

            if stats_receiver.is_closed() {
                while let Ok(sync_stats) = stats_receiver.try_recv() {
                    summary.add(sync_stats);
                }
                break;
            }

            if REFRESH_INTERVAL <= period_start.elapsed() {
                if show_progress {
                    let elapsed_secs = period_start.elapsed().as_secs_f64();
                    let bytes_per_sec = ((summary.transferred_bytes
                        - period_summary.transferred_bytes)
                        as f64
                        / elapsed_secs) as u64;
                    let objects_per_sec = ((summary.transferred_objects
                        - period_summary.transferred_objects)
                        as f64
                        / elapsed_secs) as u64;
                    progress_text.set_message(summary.format(bytes_per_sec, objects_per_sec));
                }

                period_start = Instant::now();
                period_summary = summary;
            }

            tokio::time::sleep(POLLING_INTERVAL).await;
        }

        let elapsed = start_time.elapsed();
        let elapsed_secs_f64 = elapsed.as_secs_f64();

        let (bytes_per_sec, objects_per_sec) = if dry_run {
            (0, 0)
        } else if elapsed < REFRESH_INTERVAL {
            (summary.transferred_bytes, summary.transferred_objects)
        } else {
            (
                (summary.transferred_bytes as f64 / elapsed_secs_f64) as u64,
                (summary.transferred_objects as f64 / elapsed_secs_f64) as u64,
            )
        };

        if log_sync_summary {
            info!(
                message = "sync summary",
                transferred_byte = summary.transferred_bytes,
                transferred_byte_per_sec = bytes_per_sec,
                transferred_object = summary.transferred_objects,
                transferred_object_per_sec = objects_per_sec,
                skipped = summary.skipped,
                error = summary.errors,
                warning = summary.warnings,
                duration_sec = elapsed_secs_f64,
            );
        }

        if show_result {
            if let Ok(progress_style) = ProgressStyle::with_template("{msg}") {
                progress_text.set_style(progress_style);
            }
            progress_text.finish_with_message(format!(
                "{},  duration {}",
                summary.format(bytes_per_sec, objects_per_sec),
                HumanDuration(elapsed),
            ));

            println!();
            let _ = io::stdout().flush();
        } else {
            progress_text.finish_and_clear();
        }

        summary
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_all_kinds(stats_sender: &async_channel::Sender<SyncStatistics>) {
        for sync_stats in [
            SyncStatistics::SyncBytes(1),
            SyncStatistics::SyncBytes(2),
            SyncStatistics::SyncComplete {
                key: "test".to_string(),
            },
            SyncStatistics::SyncSkip {
                key: "test".to_string(),
            },
            SyncStatistics::SyncWarning {
                key: "test".to_string(),
            },
            SyncStatistics::SyncError {
                key: "test".to_string(),
            },
        ] {
            stats_sender.send(sync_stats).await.unwrap();
        }
    }

    #[tokio::test]
    async fn indicator_folds_statistics() {
        init_dummy_tracing_subscriber();

        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let join_handle = show_indicator(stats_receiver, true, true, false, false);

        send_all_kinds(&stats_sender).await;
        stats_sender.close();

        let summary = join_handle.await.unwrap();
        assert_eq!(
            summary,
            SyncSummary {
                transferred_bytes: 3,
                transferred_objects: 1,
                skipped: 1,
                errors: 1,
                warnings: 1,
            }
        );
    }

    #[tokio::test]
    async fn indicator_refreshes_progress() {
        init_dummy_tracing_subscriber();

        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let join_handle = show_indicator(stats_receiver, true, false, true, false);

        send_all_kinds(&stats_sender).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        send_all_kinds(&stats_sender).await;
        stats_sender.close();

        let summary = join_handle.await.unwrap();
        assert_eq!(summary.transferred_objects, 2);
        assert_eq!(summary.transferred_bytes, 6);
    }

    #[tokio::test]
    async fn indicator_dry_run() {
        init_dummy_tracing_subscriber();

        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let join_handle = show_indicator(stats_receiver, false, true, true, true);

        send_all_kinds(&stats_sender).await;
        stats_sender.close();

        assert_eq!(join_handle.await.unwrap().transferred_objects, 1);
    }

    #[test]
    fn format_summary() {
        let summary = SyncSummary {
            transferred_bytes: 1024,
            transferred_objects: 2,
            skipped: 3,
            errors: 4,
            warnings: 5,
        };

        let message = summary.format(0, 0);
        assert!(message.contains("transferred   2 objects"));
        assert!(message.contains("skipped 3 objects"));
        assert!(message.contains("error 4 objects"));
        assert!(message.contains("warning 5 objects"));
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
