use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use filetime::{FileTime, set_file_mtime};
use regex::Regex;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tracing::trace;

use crate::types::error::R2syncError;

static ROOT_SLASH_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/+").unwrap());

pub fn remove_root_slash(key: &str) -> String {
    ROOT_SLASH_REGEX.replace(key, "").to_string()
}

pub fn is_key_a_directory(key: &str) -> bool {
    key.ends_with('/')
}

pub async fn is_regular_file(path: &Path) -> Result<bool> {
    Ok(File::open(path).await?.metadata().await?.is_file())
}

/// Resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(normalized.components().next_back(), Some(Component::Normal(_)))
                    && normalized.pop();
                // ".." above the root stays at the root
                if !popped && !normalized.has_root() {
                    normalized.push(component);
                }
            }
            _ => normalized.push(component),
        }
    }
    normalized
}

/// Joins a remote relative key onto `root` and fails with `PathTraversalRejected`
/// unless the result stays strictly inside `root`.
///
/// `root` must exist; it is canonicalized so the containment check is done on
/// absolute paths. The deepest part of the result that already exists is
/// canonicalized as well, so a symlink under `root` cannot lead outside of it.
pub fn resolve_path_within_root(root: &Path, relative_key: &str) -> Result<PathBuf> {
    let canonical_root = std::fs::canonicalize(root)
        .with_context(|| format!("std::fs::canonicalize() failed. path={}", root.display()))?;

    let relative_path = key_to_relative_path(&remove_root_slash(relative_key));
    let resolved = normalize_path(&canonical_root.join(relative_path));

    if resolved == canonical_root || !resolved.starts_with(&canonical_root) {
        return Err(anyhow!(R2syncError::PathTraversalRejected(
            relative_key.to_string()
        )));
    }

    let existing_ancestor = resolved
        .ancestors()
        .find(|ancestor| ancestor.symlink_metadata().is_ok())
        .unwrap_or(canonical_root.as_path());

    // a dangling symlink cannot be canonicalized and is rejected too
    let is_inside_root = std::fs::canonicalize(existing_ancestor)
        .is_ok_and(|canonical_ancestor| canonical_ancestor.starts_with(&canonical_root));
    if !is_inside_root {
        trace!(
            key = relative_key,
            path = existing_ancestor.to_string_lossy().to_string(),
            "existing path resolves outside of the root."
        );
        return Err(anyhow!(R2syncError::PathTraversalRejected(
            relative_key.to_string()
        )));
    }

    Ok(resolved)
}

pub fn key_to_relative_path(key: &str) -> PathBuf {
    key.split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

pub async fn create_parent_directories(path: &Path) -> Result<bool> {
    let Some(directory_path) = path.parent() else {
        return Ok(false);
    };

    if directory_path.try_exists().unwrap_or(false) {
        return Ok(false);
    }

    tokio::fs::create_dir_all(directory_path)
        .await
        .context("tokio::fs::create_dir_all() failed.")?;

    let directory = directory_path.to_string_lossy().to_string();
    trace!(directory = directory, "directory created.");

    Ok(true)
}

pub fn create_temp_file_beside(path: &Path) -> Result<NamedTempFile> {
    let directory = path
        .parent()
        .ok_or_else(|| anyhow!("no parent directory. path={}", path.display()))?;
    NamedTempFile::new_in(directory).context("NamedTempFile::new_in failed.")
}

pub fn set_last_modified(path: &Path, last_modified: DateTime<Utc>) -> std::io::Result<()> {
    set_file_mtime(
        path,
        FileTime::from_unix_time(
            last_modified.timestamp(),
            last_modified.timestamp_subsec_nanos(),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_root_slash_test() {
        init_dummy_tracing_subscriber();

        assert_eq!(remove_root_slash("/dir/file"), "dir/file");
        assert_eq!(remove_root_slash("//dir/file"), "dir/file");
        assert_eq!(remove_root_slash("dir/file"), "dir/file");
    }

    #[test]
    fn is_key_directory_test() {
        init_dummy_tracing_subscriber();

        assert!(is_key_a_directory("dir/"));
        assert!(is_key_a_directory("/dir1/dir2/"));

        assert!(!is_key_a_directory("dir"));
        assert!(!is_key_a_directory("/dir1/dir2"));
    }

    #[test]
    fn normalize_path_test() {
        init_dummy_tracing_subscriber();

        assert_eq!(
            normalize_path(Path::new("/root/dir/../file")),
            PathBuf::from("/root/file")
        );
        assert_eq!(
            normalize_path(Path::new("/root/./dir/./file")),
            PathBuf::from("/root/dir/file")
        );
        assert_eq!(
            normalize_path(Path::new("/root/../../etc")),
            PathBuf::from("/etc")
        );
    }

    #[test]
    fn resolve_path_within_root_test() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let canonical_root = std::fs::canonicalize(root.path()).unwrap();

        assert_eq!(
            resolve_path_within_root(root.path(), "dir1/file1").unwrap(),
            canonical_root.join("dir1").join("file1")
        );
        assert_eq!(
            resolve_path_within_root(root.path(), "/dir1//file1").unwrap(),
            canonical_root.join("dir1").join("file1")
        );
        assert_eq!(
            resolve_path_within_root(root.path(), "dir1/../file1").unwrap(),
            canonical_root.join("file1")
        );
    }

    #[test]
    fn resolve_path_within_root_rejects_escape() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();

        for key in ["../evil", "dir1/../../evil", "..", "dir1/..", ""] {
            let error = resolve_path_within_root(root.path(), key).unwrap_err();
            assert_eq!(
                error.downcast_ref::<R2syncError>(),
                Some(&R2syncError::PathTraversalRejected(key.to_string()))
            );
        }
    }

    #[test]
    #[cfg(target_family = "unix")]
    fn resolve_path_within_root_rejects_symlink_escape() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("missing"),
            root.path().join("dangling"),
        )
        .unwrap();

        for key in ["link/pwned.txt", "link/dir1/pwned.txt", "link", "dangling/pwned.txt"] {
            let error = resolve_path_within_root(root.path(), key).unwrap_err();
            assert_eq!(
                error.downcast_ref::<R2syncError>(),
                Some(&R2syncError::PathTraversalRejected(key.to_string()))
            );
        }
    }

    #[test]
    #[cfg(target_family = "unix")]
    fn resolve_path_within_root_accepts_symlink_inside_root() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let canonical_root = std::fs::canonicalize(root.path()).unwrap();
        std::fs::create_dir(root.path().join("real")).unwrap();
        std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias")).unwrap();

        assert_eq!(
            resolve_path_within_root(root.path(), "alias/file1").unwrap(),
            canonical_root.join("alias").join("file1")
        );
    }

    #[tokio::test]
    async fn create_parent_directories_test() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("dir1").join("dir2").join("file");

        assert!(create_parent_directories(&path).await.unwrap());
        assert!(root.path().join("dir1").join("dir2").is_dir());
        assert!(!create_parent_directories(&path).await.unwrap());
    }

    #[tokio::test]
    async fn set_last_modified_test() {
        init_dummy_tracing_subscriber();

        let file = tempfile::NamedTempFile::new().unwrap();
        let last_modified = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        set_last_modified(file.path(), last_modified).unwrap();

        let modified: DateTime<Utc> = std::fs::metadata(file.path())
            .unwrap()
            .modified()
            .unwrap()
            .into();
        assert_eq!(modified, last_modified);
        assert!(is_regular_file(file.path()).await.unwrap());
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
