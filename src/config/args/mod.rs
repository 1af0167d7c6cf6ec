use crate::Config;
use crate::config::args::value_parser::{human_bytes, storage_path, url};
use crate::config::{
    CLITimeoutConfig, ClientConfig, Command, DEFAULT_CONCURRENCY, DEFAULT_MAX_KEYS, RetryConfig,
    SyncConfig, TracingConfig, TransferConfig,
};
use crate::storage::s3::client_builder::generate_r2_endpoint_url;
use crate::types::location::Location;
use crate::types::{AccessKeys, ClientConfigLocation, PresignMethod, S3Credentials};
use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
#[cfg(feature = "version")]
use shadow_rs::shadow;
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

pub mod value_parser;

const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_PART_SIZE: &str = "5MiB";
const DEFAULT_FORCE_PATH_STYLE: bool = true;
const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_SKIP_DIRECTORY_MARKERS: bool = false;
const DEFAULT_NO_FOLLOW_SYMLINKS: bool = false;
const DEFAULT_NO_GUESS_MIME_TYPE: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;
const DEFAULT_PRESIGN_EXPIRES_IN_SECS: u64 = 3600;
const MAX_PRESIGN_EXPIRES_IN_SECS: u64 = 7 * 24 * 60 * 60;

const NO_REMOTE_STORAGE_SPECIFIED: &str = "either SOURCE or TARGET must be r2://\n";
const NO_COMMAND_SPECIFIED: &str = "a subcommand must be specified\n";

#[cfg(feature = "version")]
shadow!(build);

#[derive(Parser, Clone, Debug)]
#[cfg_attr(feature = "version", command(version=format!("{} ({} {}), {}", build::PKG_VERSION, build::SHORT_COMMIT, build::BUILD_TARGET, build::RUST_VERSION)))]
#[command(subcommand_required = false, args_conflicts_with_subcommands = false)]
pub struct CLIArgs {
    #[command(subcommand)]
    command: Option<Commands>,

    /// location of the file that the AWS CLI uses to store configuration profiles
    #[arg(long, env, global = true, value_name = "FILE", help_heading = "Credentials")]
    aws_config_file: Option<PathBuf>,

    /// location of the file that the AWS CLI uses to store access keys
    #[arg(long, env, global = true, value_name = "FILE", help_heading = "Credentials")]
    aws_shared_credentials_file: Option<PathBuf>,

    /// AWS CLI style profile that holds the R2 API token
    #[arg(long, env, global = true, conflicts_with_all = ["access_key", "secret_access_key", "session_token"], help_heading = "Credentials")]
    profile: Option<String>,

    /// R2 access key id
    #[arg(long, env, global = true, conflicts_with_all = ["profile"], requires = "secret_access_key", help_heading = "Credentials")]
    access_key: Option<String>,

    /// R2 secret access key
    #[arg(long, env, global = true, conflicts_with_all = ["profile"], requires = "access_key", help_heading = "Credentials")]
    secret_access_key: Option<String>,

    /// session token
    #[arg(long, env, global = true, conflicts_with_all = ["profile"], requires = "access_key", help_heading = "Credentials")]
    session_token: Option<String>,

    /// Cloudflare account id. The endpoint is https://<ACCOUNT_ID>.r2.cloudflarestorage.com
    #[arg(long, env, global = true, conflicts_with_all = ["endpoint_url"], value_parser = NonEmptyStringValueParser::new(), help_heading = "Endpoint")]
    account_id: Option<String>,

    /// endpoint url. Use this for S3-compatible storage other than R2.
    #[arg(long, env, global = true, value_parser = url::check_scheme, help_heading = "Endpoint")]
    endpoint_url: Option<String>,

    /// region. R2 uses "auto".
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "Endpoint")]
    region: Option<String>,

    /// force path-style addressing
    #[arg(long, env, global = true, default_value_t = DEFAULT_FORCE_PATH_STYLE, action = clap::ArgAction::Set, help_heading = "Endpoint")]
    force_path_style: bool,

    /// part size of multipart upload, Allow suffixes: MB, MiB, GB, GiB
    #[arg(long, env, global = true, default_value = DEFAULT_PART_SIZE, value_parser = human_bytes::check_human_bytes, help_heading = "Transfer")]
    part_size: String,

    /// maximum number of parts uploaded at the same time
    #[arg(long, env, global = true, default_value_t = DEFAULT_CONCURRENCY as u16, value_parser = clap::value_parser!(u16).range(1..), help_heading = "Transfer")]
    concurrency: u16,

    /// maximum number of objects returned in a single list object request
    #[arg(long, env, global = true, default_value_t = DEFAULT_MAX_KEYS, value_parser = clap::value_parser!(i32).range(1..=1000), help_heading = "Transfer")]
    max_keys: i32,

    /// trace verbosity(-v: show info, -vv: show debug, -vvv show trace)
    #[clap(flatten)]
    verbosity: Verbosity<WarnLevel>,

    /// show trace as json format
    #[arg(long, env, global = true, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Tracing/Logging")]
    json_tracing: bool,

    /// enable aws sdk tracing
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Tracing/Logging")]
    aws_sdk_tracing: bool,

    /// show span event tracing
    #[arg(long, env, global = true, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Tracing/Logging")]
    span_events_tracing: bool,

    /// disable ANSI terminal colors
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Tracing/Logging")]
    disable_color_tracing: bool,

    /// maximum retry attempts that the SDK retry handler uses
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, value_name = "max_attempts", help_heading = "Retry Options")]
    aws_max_attempts: u32,

    /// a multiplier value used when calculating backoff times as part of an exponential backoff with jitter strategy.
    #[arg(long, env, global = true, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, value_name = "initial_backoff", help_heading = "Retry Options")]
    initial_backoff_milliseconds: u64,

    /// operation timeout (milliseconds). For details, see the AWS SDK for Rust TimeoutConfig documentation.
    /// The default has no timeout.
    #[arg(
        long,
        env,
        global = true,
        value_name = "operation_timeout",
        help_heading = "Timeout Options"
    )]
    operation_timeout_milliseconds: Option<u64>,

    /// operation attempt timeout (milliseconds). For details, see the AWS SDK for Rust TimeoutConfig documentation.
    /// The default has no timeout.
    #[arg(
        long,
        env,
        global = true,
        value_name = "operation_attempt_timeout",
        help_heading = "Timeout Options"
    )]
    operation_attempt_timeout_milliseconds: Option<u64>,

    /// connect timeout (milliseconds).
    /// The default has AWS SDK default timeout (Currently 3100 milliseconds).
    #[arg(
        long,
        env,
        global = true,
        value_name = "connect_timeout",
        help_heading = "Timeout Options"
    )]
    connect_timeout_milliseconds: Option<u64>,

    /// read timeout (milliseconds).
    /// The default has no timeout.
    #[arg(
        long,
        env,
        global = true,
        value_name = "read_timeout",
        help_heading = "Timeout Options"
    )]
    read_timeout_milliseconds: Option<u64>,

    /// disable stalled stream protection
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "Advanced")]
    disable_stalled_stream_protection: bool,

    /// generate a auto completions script. Valid values: bash, fish, zsh, powershell, elvish.
    #[arg(long, env, value_name = "SHELL", value_parser = clap_complete::shells::Shell::from_str, help_heading = "Advanced")]
    auto_complete_shell: Option<clap_complete::shells::Shell>,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    /// one-way sync between a local directory and r2://, or between two r2:// prefixes.
    /// objects whose content hash matches are skipped. nothing is deleted.
    Sync {
        #[arg(help = "r2://<BUCKET_NAME>[/prefix] or local directory", value_parser = storage_path::check_storage_path)]
        source: String,

        #[arg(help = "r2://<BUCKET_NAME>[/prefix] or local directory", value_parser = storage_path::check_storage_path)]
        target: String,

        /// a simulation mode. no actions will be performed
        #[arg(long, env, default_value_t = DEFAULT_DRY_RUN)]
        dry_run: bool,

        /// do not transfer zero-byte keys ending with '/'
        #[arg(long, env, default_value_t = DEFAULT_SKIP_DIRECTORY_MARKERS)]
        skip_directory_markers: bool,

        /// do not follow symbolic links in the local source
        #[arg(long, env, default_value_t = DEFAULT_NO_FOLLOW_SYMLINKS)]
        no_follow_symlinks: bool,

        /// do not try to guess the mime type of local file
        #[arg(long, env, default_value_t = DEFAULT_NO_GUESS_MIME_TYPE)]
        no_guess_mime_type: bool,
    },

    /// upload standard input to a single object.
    Pipe {
        #[arg(help = "r2://<BUCKET_NAME>/key", value_parser = storage_path::check_object_path)]
        target: String,
    },

    /// copy one object. a target ending with '/' or an existing local directory receives the source file name.
    Cp {
        #[arg(help = "r2://<BUCKET_NAME>/key or local file", value_parser = storage_path::check_object_or_local_path)]
        source: String,

        #[arg(help = "r2://<BUCKET_NAME>[/key] or local path", value_parser = storage_path::check_storage_path)]
        target: String,

        /// do not try to guess the mime type of local file
        #[arg(long, env, default_value_t = DEFAULT_NO_GUESS_MIME_TYPE)]
        no_guess_mime_type: bool,
    },

    /// copy one object, then remove the source.
    Mv {
        #[arg(help = "r2://<BUCKET_NAME>/key or local file", value_parser = storage_path::check_object_or_local_path)]
        source: String,

        #[arg(help = "r2://<BUCKET_NAME>[/key] or local path", value_parser = storage_path::check_storage_path)]
        target: String,

        /// do not try to guess the mime type of local file
        #[arg(long, env, default_value_t = DEFAULT_NO_GUESS_MIME_TYPE)]
        no_guess_mime_type: bool,
    },

    /// remove objects.
    Rm {
        #[arg(help = "r2://<BUCKET_NAME>/key", required = true, value_parser = storage_path::check_object_path)]
        targets: Vec<String>,
    },

    /// list objects whose key starts with the given key.
    Ls {
        #[arg(help = "r2://<BUCKET_NAME>[/prefix]", value_parser = storage_path::check_remote_path)]
        target: String,
    },

    /// generate a presigned url.
    Presign {
        #[arg(help = "r2://<BUCKET_NAME>/key", value_parser = storage_path::check_object_path)]
        target: String,

        /// http method the url is signed for
        #[arg(long, env, default_value = "get", value_parser = ["get", "put"])]
        method: String,

        /// seconds until the url expires
        #[arg(long, env, default_value_t = DEFAULT_PRESIGN_EXPIRES_IN_SECS, value_parser = clap::value_parser!(u64).range(1..=MAX_PRESIGN_EXPIRES_IN_SECS))]
        expires_in_secs: u64,
    },
}

pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let config_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    crate::Config::try_from(config_args)
}

impl CLIArgs {
    fn build_command(&self) -> Result<Option<Command>, String> {
        let Some(command) = self.command.as_ref() else {
            return if self.auto_complete_shell.is_some() {
                Ok(None)
            } else {
                Err(NO_COMMAND_SPECIFIED.to_string())
            };
        };

        let command = match command {
            Commands::Sync { source, target, .. } => {
                let source = storage_path::parse_storage_path(source)?;
                let target = storage_path::parse_storage_path(target)?;
                if storage_path::is_both_storage_local(&source, &target) {
                    return Err(NO_REMOTE_STORAGE_SPECIFIED.to_string());
                }

                Command::Sync { source, target }
            }
            Commands::Pipe { target } => Command::Pipe {
                target: storage_path::parse_storage_path(target)?,
            },
            Commands::Cp { source, target, .. } => {
                let (source, target) = parse_copy_locations(source, target)?;
                Command::Copy { source, target }
            }
            Commands::Mv { source, target, .. } => {
                let (source, target) = parse_copy_locations(source, target)?;
                Command::Move { source, target }
            }
            Commands::Rm { targets } => Command::Remove {
                targets: targets
                    .iter()
                    .map(|target| storage_path::parse_storage_path(target))
                    .collect::<Result<Vec<Location>, String>>()?,
            },
            Commands::Ls { target } => Command::List {
                target: storage_path::parse_storage_path(target)?,
            },
            Commands::Presign {
                target,
                method,
                expires_in_secs,
            } => Command::Presign {
                target: storage_path::parse_storage_path(target)?,
                method: if method == "put" {
                    PresignMethod::Put
                } else {
                    PresignMethod::Get
                },
                expires_in_secs: *expires_in_secs,
            },
        };

        Ok(Some(command))
    }

    fn build_sync_config(&self) -> Result<SyncConfig, String> {
        let part_size = human_bytes::parse_human_bytes(&self.part_size)?;
        let transfer_config =
            TransferConfig::new(part_size, self.concurrency as usize).map_err(|e| e.to_string())?;

        let mut sync_config = SyncConfig {
            transfer_config,
            max_keys: self.max_keys,
            ..SyncConfig::default()
        };

        match self.command.as_ref() {
            Some(Commands::Sync {
                dry_run,
                skip_directory_markers,
                no_follow_symlinks,
                no_guess_mime_type,
                ..
            }) => {
                sync_config.dry_run = *dry_run;
                sync_config.skip_directory_markers = *skip_directory_markers;
                sync_config.follow_symlinks = !*no_follow_symlinks;
                sync_config.guess_mime_type = !*no_guess_mime_type;
            }
            Some(Commands::Cp {
                no_guess_mime_type, ..
            })
            | Some(Commands::Mv {
                no_guess_mime_type, ..
            }) => {
                sync_config.guess_mime_type = !*no_guess_mime_type;
            }
            _ => {}
        }

        Ok(sync_config)
    }

    fn is_dry_run(&self) -> bool {
        matches!(self.command, Some(Commands::Sync { dry_run: true, .. }))
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(profile) = self.profile.clone() {
            S3Credentials::Profile(profile)
        } else if let (Some(access_key), Some(secret_access_key)) =
            (self.access_key.clone(), self.secret_access_key.clone())
        {
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key,
                    secret_access_key,
                    session_token: self.session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        let endpoint_url = self.endpoint_url.clone().or_else(|| {
            self.account_id
                .as_ref()
                .map(|account_id| generate_r2_endpoint_url(account_id))
        });

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.region.clone(),
            endpoint_url,
            force_path_style: self.force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let tracing_config = self
            .verbosity
            .log_level()
            .map(|log_level| TracingConfig {
                tracing_level: log_level,
                json_tracing: self.json_tracing,
                aws_sdk_tracing: self.aws_sdk_tracing,
                span_events_tracing: self.span_events_tracing,
                disable_color_tracing: self.disable_color_tracing,
            });

        if !self.is_dry_run() {
            return tracing_config;
        }

        // dry-run results are reported at info level
        match tracing_config {
            None => Some(TracingConfig {
                tracing_level: log::Level::Info,
                json_tracing: DEFAULT_JSON_TRACING,
                aws_sdk_tracing: DEFAULT_AWS_SDK_TRACING,
                span_events_tracing: DEFAULT_SPAN_EVENTS_TRACING,
                disable_color_tracing: DEFAULT_DISABLE_COLOR_TRACING,
            }),
            Some(tracing_config) if tracing_config.tracing_level < log::Level::Info => {
                Some(TracingConfig {
                    tracing_level: log::Level::Info,
                    ..tracing_config
                })
            }
            tracing_config => tracing_config,
        }
    }
}

fn parse_copy_locations(source: &str, target: &str) -> Result<(Location, Location), String> {
    let source = storage_path::parse_storage_path(source)?;
    let target = storage_path::parse_storage_path(target)?;
    if storage_path::is_both_storage_local(&source, &target) {
        return Err(NO_REMOTE_STORAGE_SPECIFIED.to_string());
    }

    Ok((source, target))
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(value: CLIArgs) -> Result<Self, Self::Error> {
        let command = value.build_command()?;
        let sync_config = value.build_sync_config()?;

        Ok(Config {
            command,
            client_config: value.build_client_config(),
            tracing_config: value.build_tracing_config(),
            sync_config,
            auto_complete_shell: value.auto_complete_shell,
        })
    }
}
