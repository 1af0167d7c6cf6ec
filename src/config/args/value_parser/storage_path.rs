use crate::types::location::{Location, is_remote_uri, parse_object_uri};

const NO_PATH_SPECIFIED: &str = "path must be specified.";
const REMOTE_PATH_REQUIRED: &str = "path must be r2://<BUCKET_NAME>[/key] .";

/// `r2://bucket[/key]` or a local path.
pub fn check_storage_path(path: &str) -> Result<String, String> {
    if path.is_empty() {
        return Err(NO_PATH_SPECIFIED.to_string());
    }

    Location::parse(path).map_err(|e| e.to_string())?;
    Ok(path.to_string())
}

/// `r2://bucket[/prefix]` only.
pub fn check_remote_path(path: &str) -> Result<String, String> {
    if !is_remote_uri(path) {
        return Err(REMOTE_PATH_REQUIRED.to_string());
    }

    check_storage_path(path)
}

/// `r2://bucket/key` with a non-empty key.
pub fn check_object_path(path: &str) -> Result<String, String> {
    if !is_remote_uri(path) {
        return Err(REMOTE_PATH_REQUIRED.to_string());
    }

    parse_object_uri(path).map_err(|e| e.to_string())?;
    Ok(path.to_string())
}

/// An object URI, or a local file for commands that accept either.
pub fn check_object_or_local_path(path: &str) -> Result<String, String> {
    if is_remote_uri(path) {
        return check_object_path(path);
    }

    check_storage_path(path)
}

pub fn parse_storage_path(path: &str) -> Result<Location, String> {
    Location::parse(path).map_err(|e| e.to_string())
}

pub fn is_both_storage_local(source: &Location, target: &Location) -> bool {
    !matches!(source, Location::Remote { .. }) && !matches!(target, Location::Remote { .. })
}
