use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::storage::e_tag::{
    generate_e_tag_hash_from_path, generate_md5_hash_from_path, is_multipart_upload_e_tag,
};

const DETECTOR_NAME: &str = "FingerprintDiffDetector";

/// True unless the destination holds the same fingerprint byte for byte.
pub fn needs_transfer(source_fingerprint: &str, dest_fingerprint: Option<&str>) -> bool {
    match dest_fingerprint {
        None => true,
        Some(dest_fingerprint) => source_fingerprint != dest_fingerprint,
    }
}

/// Hashes the local file in the form of the remote fingerprint and compares the two.
/// A multipart ETag is matched by splitting the file at `part_size`.
pub async fn is_local_file_different(
    key: &str,
    local_path: &Path,
    remote_fingerprint: &str,
    part_size: u64,
) -> Result<bool> {
    let local_fingerprint = if is_multipart_upload_e_tag(remote_fingerprint) {
        generate_e_tag_hash_from_path(local_path, part_size).await?
    } else {
        generate_md5_hash_from_path(local_path).await?
    };
    let different = needs_transfer(&local_fingerprint, Some(remote_fingerprint));

    if !different {
        debug!(
            name = DETECTOR_NAME,
            key = key,
            fingerprint = local_fingerprint,
            "object filtered. fingerprints are equal."
        );
    }

    Ok(different)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn needs_transfer_test() {
        init_dummy_tracing_subscriber();

        assert!(needs_transfer("d41d8cd98f00b204e9800998ecf8427e", None));
        assert!(!needs_transfer(
            "d41d8cd98f00b204e9800998ecf8427e",
            Some("d41d8cd98f00b204e9800998ecf8427e")
        ));
        assert!(needs_transfer(
            "d41d8cd98f00b204e9800998ecf8427e",
            Some("D41D8CD98F00B204E9800998ECF8427E")
        ));
        assert!(needs_transfer(
            "d41d8cd98f00b204e9800998ecf8427e",
            Some("9be3303e9a8d67a0f1e609fb7a29030a-2")
        ));
    }

    #[tokio::test]
    async fn is_local_file_different_test() {
        init_dummy_tracing_subscriber();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        file.flush().unwrap();

        assert!(
            !is_local_file_different("key", file.path(), "5d41402abc4b2a76b9719d911017c592", 2)
                .await
                .unwrap()
        );
        assert!(
            is_local_file_different("key", file.path(), "d41d8cd98f00b204e9800998ecf8427e", 2)
                .await
                .unwrap()
        );
        assert!(
            is_local_file_different("key", Path::new("./no_such_file_for_test"), "", 2)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn is_local_file_different_multipart_e_tag() {
        init_dummy_tracing_subscriber();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        file.flush().unwrap();

        let mut concatenated_md5_hash = Vec::new();
        for part in [&b"he"[..], b"ll", b"o"] {
            concatenated_md5_hash.extend_from_slice(md5::compute(part).as_slice());
        }
        let multipart_e_tag = format!("{:x}-3", md5::compute(&concatenated_md5_hash));

        assert!(
            !is_local_file_different("key", file.path(), &multipart_e_tag, 2)
                .await
                .unwrap()
        );
        // same content split at another part size
        assert!(
            is_local_file_different("key", file.path(), &multipart_e_tag, 3)
                .await
                .unwrap()
        );
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
