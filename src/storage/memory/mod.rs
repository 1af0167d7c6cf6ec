use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::trace;
use uuid::Uuid;

use crate::storage::e_tag::{generate_e_tag_hash, normalize_e_tag};
use crate::storage::{ObjectStore, ObjectStream};
use crate::types::error::R2syncError;
use crate::types::{CompletedPartTag, ListPage, ObjectRecord};

/// Number of calls made to each remote operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub list_page: usize,
    pub get_object: usize,
    pub put_object: usize,
    pub initiate_multipart: usize,
    pub upload_part: usize,
    pub complete_multipart: usize,
    pub abort_multipart: usize,
    pub copy_object: usize,
    pub delete_object: usize,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    e_tag: String,
    modified_at: DateTime<Utc>,
    // empty unless the object was assembled from a multipart upload
    part_sizes: Vec<usize>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Debug, Default)]
struct Faults {
    // 1-based index of the list_page call that fails.
    list_page_call: Option<usize>,
    part_number: Option<i32>,
    keys: HashSet<String>,
}

struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn new(in_flight: &'a AtomicUsize, max_in_flight: &AtomicUsize) -> Self {
        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(current, Ordering::SeqCst);
        InFlightGuard { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process object store with S3-like ETags.
///
/// Used to run the sync engine without network access. It counts calls, records the
/// highest number of concurrently running part uploads and can be told to fail
/// specific calls.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    call_counts: Mutex<CallCounts>,
    faults: Mutex<Faults>,
    page_size: Option<i32>,
    part_upload_delay: Option<Duration>,
    in_flight_parts: AtomicUsize,
    max_in_flight_parts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps every listing page regardless of the requested `max_keys`.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_part_upload_delay(mut self, delay: Duration) -> Self {
        self.part_upload_delay = Some(delay);
        self
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.create_bucket(bucket);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default();
    }

    /// Stores an object directly, without counting a call.
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let e_tag = generate_e_tag_hash(md5::compute(&data).as_slice(), 0);
        self.insert_object_with_e_tag(bucket, key, data, &e_tag);
    }

    pub fn insert_object_with_e_tag(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        e_tag: &str,
    ) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data: data.into(),
                    e_tag: e_tag.to_string(),
                    modified_at: Utc::now(),
                    part_sizes: vec![],
                },
            );
    }

    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
    }

    /// Part lengths in part number order. Empty for an object stored with a single put.
    pub fn object_part_sizes(&self, bucket: &str, key: &str) -> Option<Vec<usize>> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.part_sizes.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn call_counts(&self) -> CallCounts {
        *self.call_counts.lock().unwrap()
    }

    pub fn reset_call_counts(&self) {
        *self.call_counts.lock().unwrap() = CallCounts::default();
    }

    pub fn max_in_flight_parts(&self) -> usize {
        self.max_in_flight_parts.load(Ordering::SeqCst)
    }

    pub fn pending_upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn fail_list_page_call(&self, call: usize) {
        self.faults.lock().unwrap().list_page_call = Some(call);
    }

    pub fn fail_upload_part(&self, part_number: i32) {
        self.faults.lock().unwrap().part_number = Some(part_number);
    }

    /// Every put, upload, copy or get of `key` fails.
    pub fn fail_key(&self, key: &str) {
        self.faults.lock().unwrap().keys.insert(key.to_string());
    }

    fn count(&self, update: impl FnOnce(&mut CallCounts) -> usize) -> usize {
        update(&mut self.call_counts.lock().unwrap())
    }

    fn check_key_fault(&self, operation: &str, key: &str) -> Result<()> {
        if self.faults.lock().unwrap().keys.contains(key) {
            return Err(anyhow!(R2syncError::StorageUnavailable(format!(
                "{operation}() failed. key={key}"
            ))));
        }
        Ok(())
    }

    fn check_bucket_exists(&self, bucket: &str) -> Result<()> {
        if !self.buckets.lock().unwrap().contains_key(bucket) {
            return Err(anyhow!(R2syncError::StorageUnavailable(format!(
                "no such bucket: {bucket}"
            ))));
        }
        Ok(())
    }

    fn store(&self, bucket: &str, key: &str, object: StoredObject) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets.get_mut(bucket).ok_or_else(|| {
            anyhow!(R2syncError::StorageUnavailable(format!(
                "no such bucket: {bucket}"
            )))
        })?;
        objects.insert(key.to_string(), object);
        Ok(())
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        self.check_bucket_exists(bucket)?;
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| anyhow!(R2syncError::NotFound(format!("r2://{bucket}/{key}"))))
    }
}

fn to_record(key: &str, object: &StoredObject) -> ObjectRecord {
    ObjectRecord {
        key: key.to_string(),
        content_hash: normalize_e_tag(&object.e_tag),
        size: object.data.len() as i64,
        modified_at: object.modified_at,
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let call = self.count(|counts| {
            counts.list_page += 1;
            counts.list_page
        });
        if self.faults.lock().unwrap().list_page_call == Some(call) {
            return Err(anyhow!(R2syncError::StorageUnavailable(format!(
                "list_page() failed. bucket={bucket} prefix={prefix}"
            ))));
        }
        self.check_bucket_exists(bucket)?;

        let page_size = self
            .page_size
            .map_or(max_keys, |page_size| page_size.min(max_keys))
            .max(1) as usize;

        let buckets = self.buckets.lock().unwrap();
        let mut records: Vec<ObjectRecord> = buckets
            .get(bucket)
            .into_iter()
            .flat_map(|objects| objects.iter())
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| {
                continuation_token
                    .as_ref()
                    .is_none_or(|token| key.as_str() > token.as_str())
            })
            .take(page_size + 1)
            .map(|(key, object)| to_record(key, object))
            .collect();

        let next_continuation_token = if page_size < records.len() {
            records.pop();
            records.last().map(|record| record.key.clone())
        } else {
            None
        };

        trace!(
            bucket = bucket,
            prefix = prefix,
            count = records.len(),
            "list_page() returned."
        );

        Ok(ListPage {
            records,
            next_continuation_token,
        })
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ObjectStream> {
        self.count(|counts| {
            counts.get_object += 1;
            counts.get_object
        });
        self.check_key_fault("get_object_stream", key)?;

        let object = self.lookup(bucket, key)?;
        Ok(ObjectStream {
            record: to_record(key, &object),
            body: ByteStream::from(object.data),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        _content_length: u64,
        _content_type: Option<String>,
    ) -> Result<String> {
        self.count(|counts| {
            counts.put_object += 1;
            counts.put_object
        });
        self.check_key_fault("put_object", key)?;
        self.check_bucket_exists(bucket)?;

        let data = body
            .collect()
            .await
            .context("ByteStream::collect() failed.")?
            .into_bytes();
        let e_tag = generate_e_tag_hash(md5::compute(&data).as_slice(), 0);

        self.store(
            bucket,
            key,
            StoredObject {
                data,
                e_tag: e_tag.clone(),
                modified_at: Utc::now(),
                part_sizes: vec![],
            },
        )?;

        Ok(normalize_e_tag(&e_tag))
    }

    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        _content_type: Option<String>,
    ) -> Result<String> {
        self.count(|counts| {
            counts.initiate_multipart += 1;
            counts.initiate_multipart
        });
        self.check_key_fault("initiate_multipart", key)?;
        self.check_bucket_exists(bucket)?;

        let upload_id = Uuid::new_v4().to_string();
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        self.count(|counts| {
            counts.upload_part += 1;
            counts.upload_part
        });
        let _guard = InFlightGuard::new(&self.in_flight_parts, &self.max_in_flight_parts);

        if let Some(delay) = self.part_upload_delay {
            tokio::time::sleep(delay).await;
        }

        if self.faults.lock().unwrap().part_number == Some(part_number) {
            return Err(anyhow!(R2syncError::StorageUnavailable(format!(
                "upload_part() failed. key={key} part_number={part_number}"
            ))));
        }

        let e_tag = generate_e_tag_hash(md5::compute(&body).as_slice(), 0);
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads.get_mut(upload_id).ok_or_else(|| {
            anyhow!(R2syncError::StorageUnavailable(format!(
                "no such upload: {upload_id}"
            )))
        })?;
        upload.parts.insert(part_number, body);

        Ok(e_tag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartTag>,
    ) -> Result<String> {
        self.count(|counts| {
            counts.complete_multipart += 1;
            counts.complete_multipart
        });

        let upload = self.uploads.lock().unwrap().remove(upload_id).ok_or_else(|| {
            anyhow!(R2syncError::StorageUnavailable(format!(
                "no such upload: {upload_id}"
            )))
        })?;
        if upload.bucket != bucket || upload.key != key || parts.is_empty() {
            return Err(anyhow!(R2syncError::StorageUnavailable(format!(
                "invalid complete_multipart() request. key={key} upload_id={upload_id}"
            ))));
        }

        let mut data = Vec::new();
        let mut part_sizes = Vec::with_capacity(parts.len());
        let mut concatenated_md5_hash = Vec::new();
        for part in &parts {
            let body = upload.parts.get(&part.part_number).ok_or_else(|| {
                anyhow!(R2syncError::StorageUnavailable(format!(
                    "invalid part: {}",
                    part.part_number
                )))
            })?;
            data.extend_from_slice(body);
            part_sizes.push(body.len());
            concatenated_md5_hash.extend_from_slice(md5::compute(body).as_slice());
        }

        let e_tag = generate_e_tag_hash(&concatenated_md5_hash, parts.len() as i64);
        self.store(
            bucket,
            key,
            StoredObject {
                data: Bytes::from(data),
                e_tag: e_tag.clone(),
                modified_at: Utc::now(),
                part_sizes,
            },
        )?;

        Ok(normalize_e_tag(&e_tag))
    }

    async fn abort_multipart(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        self.count(|counts| {
            counts.abort_multipart += 1;
            counts.abort_multipart
        });

        self.uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| {
                anyhow!(R2syncError::StorageUnavailable(format!(
                    "no such upload: {upload_id}"
                )))
            })
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()> {
        self.count(|counts| {
            counts.copy_object += 1;
            counts.copy_object
        });
        self.check_key_fault("copy_object", source_key)?;

        let object = self.lookup(source_bucket, source_key)?;
        self.store(
            dest_bucket,
            dest_key,
            StoredObject {
                modified_at: Utc::now(),
                ..object
            },
        )
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.count(|counts| {
            counts.delete_object += 1;
            counts.delete_object
        });
        self.check_bucket_exists(bucket)?;

        if let Some(objects) = self.buckets.lock().unwrap().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}
