#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use async_channel::Receiver;
use filetime::{FileTime, set_file_mtime};
use tempfile::TempDir;
use walkdir::WalkDir;

use r2sync::Config;
use r2sync::Pipeline;
use r2sync::config::args::parse_from_args;
use r2sync::storage::memory::MemoryStorage;
use r2sync::types::SyncStatistics;
use r2sync::types::token::create_pipeline_cancellation_token;

pub const BUCKET1: &str = "r2sync-test-bucket1";
pub const BUCKET2: &str = "r2sync-test-bucket2";

pub const TEST_FILES: [(&str, &str); 5] = [
    ("data1", "data1 content"),
    ("dir1/data1", "dir1 data1 content"),
    ("dir2/data2", "dir2 data2 content"),
    ("dir5/data3", "dir5 data3 content"),
    ("dir21/data1", "dir21 data1 content"),
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsCount {
    pub sync_complete: u64,
    pub sync_skip: u64,
    pub sync_error: u64,
    pub sync_warning: u64,
    pub sync_bytes: u64,
}

pub struct TestHelper {
    pub storage: Arc<MemoryStorage>,
}

impl TestHelper {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(
                MemoryStorage::new()
                    .with_bucket(BUCKET1)
                    .with_bucket(BUCKET2),
            ),
        }
    }

    pub fn with_storage(storage: MemoryStorage) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    pub fn build_config(args: Vec<&str>) -> Config {
        Config::try_from(parse_from_args(args).unwrap()).unwrap()
    }

    /// Runs `r2sync sync` with the given options against the in-memory store.
    pub async fn sync(&self, options: Vec<&str>, source: &str, target: &str) -> SyncResult {
        let mut args = vec!["r2sync", "-qq", "sync"];
        args.extend(options);
        args.push(source);
        args.push(target);

        let config = Self::build_config(args);
        let Some(r2sync::config::Command::Sync { source, target }) = config.command.clone() else {
            panic!("not a sync command");
        };

        let pipeline = Pipeline::new(
            config.sync_config,
            self.storage.clone(),
            create_pipeline_cancellation_token(),
        );
        let result = pipeline.plan_and_execute_sync(&source, &target).await;

        SyncResult {
            is_ok: result.is_ok(),
            rejected_keys: result.map(|plan| plan.rejected_keys).unwrap_or_default(),
            has_error: pipeline.has_error(),
            has_warning: pipeline.has_warning(),
            stats: Self::get_stats_count(pipeline.get_stats_receiver()),
        }
    }

    pub fn put_test_data(&self, bucket: &str, prefix: &str) {
        for (key, content) in TEST_FILES {
            self.storage
                .insert_object(bucket, &format!("{prefix}{key}"), content.as_bytes().to_vec());
        }
    }

    pub fn create_test_tree() -> TempDir {
        let root = tempfile::tempdir().unwrap();
        for (key, content) in TEST_FILES {
            Self::write_file(root.path(), key, content.as_bytes());
        }
        root
    }

    pub fn write_file(root: &Path, relative_path: &str, data: &[u8]) {
        let path = root.join(relative_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    pub fn path_str(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    /// Relative paths of all regular files under `root`, sorted, with `/` separators.
    pub fn list_all_files(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                entry
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/")
            })
            .collect();
        files.sort();
        files
    }

    pub fn md5_digest(data: &[u8]) -> String {
        format!("{:x}", md5::compute(data))
    }

    pub fn get_file_last_modified(path: &Path) -> i64 {
        std::fs::metadata(path)
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    pub fn touch_file(path: &Path, add_sec: i64) {
        set_file_mtime(
            path,
            FileTime::from_unix_time(
                SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap()
                    .as_secs() as i64
                    + add_sec,
                0,
            ),
        )
        .unwrap();
    }

    pub fn get_stats_count(stats_receiver: Receiver<SyncStatistics>) -> StatsCount {
        let mut stats = StatsCount::default();

        while let Ok(sync_stats) = stats_receiver.try_recv() {
            match sync_stats {
                SyncStatistics::SyncComplete { .. } => stats.sync_complete += 1,
                SyncStatistics::SyncSkip { .. } => stats.sync_skip += 1,
                SyncStatistics::SyncError { .. } => stats.sync_error += 1,
                SyncStatistics::SyncWarning { .. } => stats.sync_warning += 1,
                SyncStatistics::SyncBytes(size) => stats.sync_bytes += size,
            }
        }

        stats
    }

    pub fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}

pub struct SyncResult {
    pub is_ok: bool,
    pub rejected_keys: Vec<String>,
    pub has_error: bool,
    pub has_warning: bool,
    pub stats: StatsCount,
}
