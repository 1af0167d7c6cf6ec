use anyhow::{Result, anyhow};

use crate::types::error::R2syncError;
use crate::types::location::Location;
use crate::types::{ClientConfigLocation, PresignMethod, S3Credentials};

pub mod args;

pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
pub const DEFAULT_PART_SIZE: u64 = MIN_PART_SIZE;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_KEYS: i32 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub command: Option<Command>,
    pub client_config: ClientConfig,
    pub tracing_config: Option<TracingConfig>,
    pub sync_config: SyncConfig,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sync {
        source: Location,
        target: Location,
    },
    Pipe {
        target: Location,
    },
    Copy {
        source: Location,
        target: Location,
    },
    Move {
        source: Location,
        target: Location,
    },
    Remove {
        targets: Vec<Location>,
    },
    List {
        target: Location,
    },
    Presign {
        target: Location,
        method: PresignMethod,
        expires_in_secs: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

#[derive(Debug, Clone)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub part_size: u64,
    pub concurrency: usize,
}

impl TransferConfig {
    /// Part sizes outside 5MiB..=5GiB are rejected rather than adjusted.
    pub fn new(part_size: u64, concurrency: usize) -> Result<Self> {
        if part_size < MIN_PART_SIZE {
            return Err(anyhow!(R2syncError::InvalidTransferConfig(format!(
                "part size {part_size} must be greater than or equal to {MIN_PART_SIZE}."
            ))));
        }
        if part_size > MAX_PART_SIZE {
            return Err(anyhow!(R2syncError::InvalidTransferConfig(format!(
                "part size {part_size} must be smaller than or equal to {MAX_PART_SIZE}."
            ))));
        }
        if concurrency == 0 {
            return Err(anyhow!(R2syncError::InvalidTransferConfig(
                "concurrency must be greater than 0.".to_string()
            )));
        }

        Ok(TransferConfig {
            part_size,
            concurrency,
        })
    }

    pub fn is_multipart_upload_required(&self, content_length: u64) -> bool {
        self.part_size < content_length
    }

    pub fn calculate_parts_count(&self, content_length: u64) -> u64 {
        content_length.div_ceil(self.part_size)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub transfer_config: TransferConfig,
    pub dry_run: bool,
    pub skip_directory_markers: bool,
    pub follow_symlinks: bool,
    pub guess_mime_type: bool,
    pub max_keys: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            transfer_config: TransferConfig::default(),
            dry_run: false,
            skip_directory_markers: false,
            follow_symlinks: true,
            guess_mime_type: true,
            max_keys: DEFAULT_MAX_KEYS,
        }
    }
}
