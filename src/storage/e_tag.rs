use std::path::Path;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const HASH_BUFFER_SIZE: usize = 256 * 1024;

pub fn normalize_e_tag(e_tag: &str) -> String {
    e_tag.replace('"', "")
}

pub fn is_multipart_upload_e_tag(e_tag: &str) -> bool {
    e_tag.contains('-')
}

/// Quoted ETag as S3 reports it. `parts_count == 0` means a single put.
pub fn generate_e_tag_hash(concatenated_md5_hash: &[u8], parts_count: i64) -> String {
    if parts_count == 0 {
        format!("{:?}", hex::encode(concatenated_md5_hash))
    } else {
        format!(
            "\"{:x}-{}\"",
            md5::compute(concatenated_md5_hash),
            parts_count
        )
    }
}

pub fn generate_e_tag_hash_from_bytes(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

pub fn generate_content_md5(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(md5::compute(data).as_slice())
}

/// Fingerprint of a local file as this engine's own upload would leave it: a hex
/// MD5 at or below `part_size`, otherwise the MD5 of the per-part MD5s with a
/// `-N` suffix.
pub async fn generate_e_tag_hash_from_path(path: &Path, part_size: u64) -> Result<String> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("tokio::fs::File::open() failed. path={}", path.display()))?;
    let mut remaining_bytes = file
        .metadata()
        .await
        .with_context(|| format!("tokio::fs::File::metadata() failed. path={}", path.display()))?
        .len();

    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    if remaining_bytes <= part_size {
        let digest = hash_file_range(&mut file, remaining_bytes, &mut buffer).await?;
        return Ok(format!("{digest:x}"));
    }

    let mut parts_count = 0;
    let mut concatenated_md5_hash = Vec::new();
    while 0 < remaining_bytes {
        let real_part_size = part_size.min(remaining_bytes);
        let digest = hash_file_range(&mut file, real_part_size, &mut buffer).await?;

        concatenated_md5_hash.extend_from_slice(digest.as_slice());
        remaining_bytes -= real_part_size;
        parts_count += 1;
    }

    Ok(normalize_e_tag(&generate_e_tag_hash(
        &concatenated_md5_hash,
        parts_count,
    )))
}

/// Hex MD5 of the whole file, whatever its size.
pub async fn generate_md5_hash_from_path(path: &Path) -> Result<String> {
    generate_e_tag_hash_from_path(path, u64::MAX).await
}

async fn hash_file_range(file: &mut File, length: u64, buffer: &mut [u8]) -> Result<md5::Digest> {
    let mut context = md5::Context::new();
    let mut remaining_bytes = length;
    while 0 < remaining_bytes {
        let read_size = remaining_bytes.min(buffer.len() as u64) as usize;
        file.read_exact(&mut buffer[..read_size])
            .await
            .context("tokio::io::AsyncReadExt::read_exact() failed.")?;

        context.consume(&buffer[..read_size]);
        remaining_bytes -= read_size as u64;
    }

    Ok(context.finalize())
}
