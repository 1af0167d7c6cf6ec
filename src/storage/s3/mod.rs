use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Object};
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::storage::e_tag::{generate_content_md5, normalize_e_tag};
use crate::storage::{ObjectStore, ObjectStream, Storage};
use crate::types::error::R2syncError;
use crate::types::{CompletedPartTag, ListPage, ObjectRecord, PresignMethod};

pub mod client_builder;

const NO_SUCH_KEY_ERROR_CODE: &str = "NoSuchKey";

/// `ObjectStore` backed by `aws-sdk-s3`, pointed at an R2 (or any S3-compatible)
/// endpoint.
pub struct R2Storage {
    client: Arc<Client>,
}

impl R2Storage {
    pub fn new(client: Arc<Client>) -> Self {
        R2Storage { client }
    }
}

pub async fn create_storage(client_config: &ClientConfig) -> Storage {
    Arc::new(R2Storage::new(Arc::new(
        client_config.create_client().await,
    )))
}

fn convert_sdk_error<E, R>(operation: &str, target: String, e: SdkError<E, R>) -> anyhow::Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    if e.as_service_error()
        .and_then(|service_error| service_error.code())
        == Some(NO_SUCH_KEY_ERROR_CODE)
    {
        return anyhow!(R2syncError::NotFound(target));
    }

    anyhow!(R2syncError::StorageUnavailable(format!(
        "aws_sdk_s3::client::{operation}() failed. {target}: {}",
        DisplayErrorContext(&e)
    )))
}

fn format_target(bucket: &str, key: &str) -> String {
    format!("r2://{bucket}/{key}")
}

fn convert_last_modified(last_modified: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    last_modified
        .and_then(|last_modified| last_modified.to_chrono_utc().ok())
        .unwrap_or_default()
}

fn convert_object(object: &Object) -> Option<ObjectRecord> {
    Some(ObjectRecord {
        key: object.key()?.to_string(),
        content_hash: normalize_e_tag(object.e_tag().unwrap_or_default()),
        size: object.size().unwrap_or_default(),
        modified_at: convert_last_modified(object.last_modified()),
    })
}

/// `x-amz-copy-source` value with every key segment percent-encoded.
fn generate_copy_source(bucket: &str, key: &str) -> String {
    let encoded_key = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{bucket}/{encoded_key}")
}

#[async_trait]
impl ObjectStore for R2Storage {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let list_objects_output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| convert_sdk_error("list_objects_v2", format_target(bucket, prefix), e))?;

        let records = list_objects_output
            .contents()
            .iter()
            .filter_map(convert_object)
            .collect();

        let next_continuation_token = if list_objects_output.is_truncated().unwrap_or(false) {
            list_objects_output
                .next_continuation_token()
                .map(|token| token.to_string())
        } else {
            None
        };

        Ok(ListPage {
            records,
            next_continuation_token,
        })
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ObjectStream> {
        let get_object_output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| convert_sdk_error("get_object", format_target(bucket, key), e))?;

        let record = ObjectRecord {
            key: key.to_string(),
            content_hash: normalize_e_tag(get_object_output.e_tag().unwrap_or_default()),
            size: get_object_output.content_length().unwrap_or_default(),
            modified_at: convert_last_modified(get_object_output.last_modified()),
        };

        Ok(ObjectStream {
            body: get_object_output.body,
            record,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
        content_type: Option<String>,
    ) -> Result<String> {
        // only in-memory bodies can be hashed without reading the stream twice
        let content_md5 = body.bytes().map(generate_content_md5);

        let put_object_output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(content_length as i64)
            .set_content_type(content_type)
            .set_content_md5(content_md5)
            .body(body)
            .send()
            .await
            .map_err(|e| convert_sdk_error("put_object", format_target(bucket, key), e))?;

        trace!(key = key, "{put_object_output:?}");

        Ok(normalize_e_tag(
            put_object_output.e_tag().unwrap_or_default(),
        ))
    }

    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String> {
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                convert_sdk_error("create_multipart_upload", format_target(bucket, key), e)
            })?;

        create_multipart_upload_output
            .upload_id()
            .map(|upload_id| upload_id.to_string())
            .ok_or_else(|| {
                anyhow!(R2syncError::StorageUnavailable(format!(
                    "create_multipart_upload() returned no upload id. {}",
                    format_target(bucket, key)
                )))
            })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        let content_md5 = generate_content_md5(&body);
        let content_length = body.len() as i64;

        let upload_part_output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(content_md5)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| convert_sdk_error("upload_part", format_target(bucket, key), e))?;

        trace!(key = key, part_number = part_number, "{upload_part_output:?}");

        upload_part_output
            .e_tag()
            .map(|e_tag| e_tag.to_string())
            .ok_or_else(|| {
                anyhow!(R2syncError::StorageUnavailable(format!(
                    "upload_part() returned no ETag. {} part_number={part_number}",
                    format_target(bucket, key)
                )))
            })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartTag>,
    ) -> Result<String> {
        let completed_parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.e_tag)
                    .build()
            })
            .collect();

        let complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                convert_sdk_error("complete_multipart_upload", format_target(bucket, key), e)
            })?;

        Ok(normalize_e_tag(
            complete_multipart_upload_output
                .e_tag()
                .unwrap_or_default(),
        ))
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                convert_sdk_error("abort_multipart_upload", format_target(bucket, key), e)
            })?;

        debug!(key = key, upload_id = upload_id, "multipart upload aborted.");
        Ok(())
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(generate_copy_source(source_bucket, source_key))
            .bucket(dest_bucket)
            .key(dest_key)
            .send()
            .await
            .map_err(|e| {
                convert_sdk_error("copy_object", format_target(source_bucket, source_key), e)
            })?;

        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| convert_sdk_error("delete_object", format_target(bucket, key), e))?;

        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        expires_in: Duration,
    ) -> Result<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .context("aws_sdk_s3::presigning::PresigningConfig::expires_in() failed.")?;

        let presigned_request = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning_config)
                .await
                .map_err(|e| convert_sdk_error("get_object", format_target(bucket, key), e))?,
            PresignMethod::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning_config)
                .await
                .map_err(|e| convert_sdk_error("put_object", format_target(bucket, key), e))?,
        };

        Ok(presigned_request.uri().to_string())
    }
}
