/*!
# Overview
r2sync is a synchronization and streaming transfer tool for Cloudflare R2 and other S3-compatible storage.

## Features
- One-way sync
  - Local to R2
  - R2 to Local
  - R2 to R2 (server-side copy, with prefix remapping)

- Content based incremental transfer
  An object is transferred only when the destination does not hold the same relative key with an equal content hash.
  A local file is hashed (MD5) only when the other side holds the same key.
  Nothing is deleted at the destination.

- Safe downloads
  A remote key that would resolve outside the local destination directory (`../`, absolute paths) is rejected and reported as a warning.
  Files are written to a temporary file beside the target and persisted only after the whole body has been received.

- Streaming multipart upload
  Data from any `AsyncRead` (for example, standard input) is uploaded as a single object.
  Above the part size, parts are uploaded concurrently with a bounded number of parts in flight.
  If a part fails, the multipart upload is aborted so that no partial object and no orphan parts remain.

## As a library
The r2sync CLI is a thin wrapper of this library.
Storage is accessed through the [`storage::ObjectStore`] trait, so the sync engine can be driven by the R2 backend or by the in-memory backend used in tests.

Example usage
=============

```Toml
[dependencies]
r2sync = "0.3"
tokio = { version = "1", features = ["full"] }
```

```no_run
use r2sync::config::args::parse_from_args;
use r2sync::config::Command;
use r2sync::pipeline::Pipeline;
use r2sync::storage::s3::create_storage;
use r2sync::types::token::create_pipeline_cancellation_token;
use r2sync::types::SyncStatistics;
use r2sync::Config;

#[tokio::main]
async fn main() {
    let args = vec![
        "program_name",
        "--account-id",
        "0123456789abcdef0123456789abcdef",
        "sync",
        "./src",
        "r2://test-bucket/backup",
    ];

    let config = Config::try_from(parse_from_args(args).unwrap()).unwrap();
    let Some(Command::Sync { source, target }) = config.command.clone() else {
        return;
    };

    let storage = create_storage(&config.client_config).await;
    let pipeline = Pipeline::new(
        config.sync_config,
        storage,
        create_pipeline_cancellation_token(),
    );
    let stats_receiver = pipeline.get_stats_receiver();

    let plan = pipeline.plan_and_execute_sync(&source, &target).await.unwrap();
    println!("planned actions: {}", plan.len());

    let mut total_sync_count = 0;
    while let Ok(sync_stats) = stats_receiver.try_recv() {
        if matches!(sync_stats, SyncStatistics::SyncComplete { .. }) {
            total_sync_count += 1;
        }
    }
    println!("Total sync count: {total_sync_count}");

    if pipeline.has_error() {
        println!("An error has occurred.\n\n");
        println!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }

    if pipeline.has_warning() {
        println!("A warning has occurred.\n\n");
    }
}
```

For more examples,
=============
see the r2sync binary source code (`src/bin/r2sync`) and the integration tests (`tests`).
*/

pub use config::Config;
pub use config::args::CLIArgs;
pub use pipeline::Pipeline;
pub use pipeline::object_operator::ObjectOperator;
pub use storage::upload_manager::stream_upload;

pub mod config;
pub mod pipeline;
pub mod storage;
pub mod types;
