use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::types::{CompletedPartTag, ListPage, ObjectRecord, PresignMethod};

pub mod e_tag;
pub mod local;
pub mod memory;
pub mod s3;
pub mod upload_manager;

pub type Storage = Arc<dyn ObjectStore + Send + Sync>;

#[derive(Debug)]
pub struct ObjectStream {
    pub body: ByteStream,
    pub record: ObjectRecord,
}

/// The remote operations the sync engine is built on.
///
/// Implementations report every failed remote call as an error; the engine never
/// retries on its own, so any retry policy belongs to the implementation.
#[async_trait]
pub trait ObjectStore {
    /// One page of a prefix-scoped listing. `next_continuation_token` is `None`
    /// on the last page.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage>;

    /// Fails with `R2syncError::NotFound` when the key does not exist.
    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ObjectStream>;

    /// Single-shot put. Returns the new object's fingerprint.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
        content_type: Option<String>,
    ) -> Result<String>;

    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String>;

    /// Returns the part tag to pass to `complete_multipart`.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String>;

    /// Returns the finalized object's fingerprint.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartTag>,
    ) -> Result<String>;

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        _method: PresignMethod,
        _expires_in: Duration,
    ) -> Result<String> {
        Err(anyhow!(
            "presigned urls are not supported by this storage. r2://{bucket}/{key}"
        ))
    }
}

pub fn remove_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

pub fn generate_full_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}
