use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;

use crate::types::error::R2syncError;

pub const REMOTE_SCHEME: &str = "r2://";
pub const KEY_SEPARATOR: char = '/';

// 3 to 63 characters, lowercase alphanumerics and hyphens, no hyphen at either end.
static BUCKET_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local { path: PathBuf },
    Remote { bucket: String, key: String },
}

impl Location {
    /// Remote URIs are parsed leniently; anything else is taken as a local path.
    pub fn parse(value: &str) -> Result<Self> {
        if is_remote_uri(value) {
            return parse_uri(value);
        }

        if value.is_empty() {
            return Err(anyhow!(R2syncError::InvalidUri(
                "path must be specified.".to_string()
            )));
        }

        Ok(Location::Local {
            path: PathBuf::from(value),
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local { path } => write!(f, "{}", path.display()),
            Location::Remote { bucket, key } => write!(f, "{REMOTE_SCHEME}{bucket}/{key}"),
        }
    }
}

pub fn is_remote_uri(value: &str) -> bool {
    value.starts_with(REMOTE_SCHEME)
}

/// Accepts `r2://bucket`, `r2://bucket/` and `r2://bucket/key`.
pub fn parse_uri(value: &str) -> Result<Location> {
    let (bucket, key) = split_uri(value)?;
    Ok(Location::Remote { bucket, key })
}

/// Like [`parse_uri`], but the URI must name an object.
pub fn parse_object_uri(value: &str) -> Result<Location> {
    let (bucket, key) = split_uri(value)?;
    if key.is_empty() {
        return Err(anyhow!(R2syncError::InvalidUri(format!(
            "{value}: object key must be specified."
        ))));
    }

    Ok(Location::Remote { bucket, key })
}

pub fn is_valid_bucket_name(bucket: &str) -> bool {
    BUCKET_NAME_REGEX.is_match(bucket)
}

pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches(KEY_SEPARATOR);
    if trimmed.is_empty() {
        return String::new();
    }

    format!("{trimmed}{KEY_SEPARATOR}")
}

fn split_uri(value: &str) -> Result<(String, String)> {
    let without_scheme = value.strip_prefix(REMOTE_SCHEME).ok_or_else(|| {
        anyhow!(R2syncError::InvalidUri(format!(
            "{value}: scheme must be {REMOTE_SCHEME}"
        )))
    })?;

    let (bucket, key) = without_scheme
        .split_once(KEY_SEPARATOR)
        .unwrap_or((without_scheme, ""));

    if !is_valid_bucket_name(bucket) {
        return Err(anyhow!(R2syncError::InvalidUri(format!(
            "{value}: invalid bucket name `{bucket}`."
        ))));
    }

    Ok((bucket.to_string(), key.to_string()))
}
