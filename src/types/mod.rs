use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

use crate::types::location::Location;

pub mod error;
pub mod location;
pub mod token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    /// Provider ETag without the surrounding quotes. Compared as an opaque string.
    pub content_hash: String,
    pub size: i64,
    pub modified_at: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn is_directory_marker(&self) -> bool {
        self.size == 0 && self.key.ends_with('/')
    }
}

/// Relative key (listing prefix removed) to record, for one bucket and prefix.
pub type Catalog = BTreeMap<String, ObjectRecord>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub records: Vec<ObjectRecord>,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartTag {
    pub part_number: i32,
    pub e_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferAction {
    Upload {
        local_path: PathBuf,
        dest_key: String,
    },
    Download {
        source_key: String,
        local_path: PathBuf,
    },
    RemoteCopy {
        source_key: String,
        dest_bucket: String,
        dest_key: String,
    },
}

impl TransferAction {
    /// The key or path this action reads from, used in logs and statistics.
    pub fn source_name(&self) -> String {
        match self {
            TransferAction::Upload { local_path, .. } => local_path.to_string_lossy().to_string(),
            TransferAction::Download { source_key, .. } => source_key.clone(),
            TransferAction::RemoteCopy { source_key, .. } => source_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub source: Location,
    pub target: Location,
    pub actions: Vec<TransferAction>,
    /// Remote keys that would have escaped the local destination root.
    pub rejected_keys: Vec<String>,
}

impl TransferPlan {
    pub fn new(source: Location, target: Location) -> Self {
        TransferPlan {
            source,
            target,
            actions: vec![],
            rejected_keys: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatistics {
    SyncBytes(u64),
    SyncComplete { key: String },
    SyncSkip { key: String },
    SyncError { key: String },
    SyncWarning { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

#[derive(Debug, Clone)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
