//! In-memory [`ObjectStorage`] for tests and local experiments.
//!
//! Objects are plain byte vectors. Range reads are cut into fixed-size
//! segments so callers see the same multi-segment streams a network read
//! would produce.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{
    ByteRange, ByteStream, MAX_TAGS_PER_OBJECT, ObjectStorage, StorageError, StorageResult,
    etag_matches,
};
use crate::models::{
    object::{ArchiveClass, ObjectHead, STORAGE_CLASS_STANDARD, Tag},
    state::RestoreTier,
};

const DEFAULT_SEGMENT_LEN: usize = 3;

/// A single stored object and the knobs tests turn on it.
#[derive(Clone, Debug)]
pub struct MemoryObject {
    pub data: Vec<u8>,
    pub etag: String,
    pub storage_class: String,
    pub restore: Option<String>,
    pub server_side_encryption: Option<String>,
    pub metadata: HashMap<String, String>,
    pub tags: Vec<Tag>,
    /// Length reported by HEAD when it should disagree with the payload.
    pub reported_size: Option<u64>,
}

impl MemoryObject {
    /// STANDARD object whose etag is the quoted MD5 of `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let etag = format!("\"{:x}\"", md5::compute(&data));
        Self {
            data,
            etag,
            storage_class: STORAGE_CLASS_STANDARD.to_string(),
            restore: None,
            server_side_encryption: None,
            metadata: HashMap::new(),
            tags: Vec::new(),
            reported_size: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = etag.into();
        self
    }

    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = class.into();
        self
    }

    pub fn with_restore(mut self, marker: impl Into<String>) -> Self {
        self.restore = Some(marker.into());
        self
    }

    pub fn with_sse(mut self, sse: impl Into<String>) -> Self {
        self.server_side_encryption = Some(sse.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn with_reported_size(mut self, size: u64) -> Self {
        self.reported_size = Some(size);
        self
    }

    fn readable(&self) -> bool {
        ArchiveClass::from_storage_class(&self.storage_class).is_none()
            || self
                .restore
                .as_deref()
                .is_some_and(|marker| marker.contains(r#"ongoing-request="false""#))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreCall {
    pub bucket: String,
    pub key: String,
    pub days: u32,
    pub tier: RestoreTier,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<(String, String), MemoryObject>,
    restores: Vec<RestoreCall>,
    fail_tagging: bool,
    deny_reads: bool,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    segment_len: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            segment_len: DEFAULT_SEGMENT_LEN,
        }
    }

    /// Size of the segments range reads are split into.
    pub fn with_segment_len(mut self, len: usize) -> Self {
        self.segment_len = len.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, bucket: &str, key: &str, object: MemoryObject) {
        self.lock()
            .objects
            .insert((bucket.to_string(), key.to_string()), object);
    }

    /// Replace the payload of an existing object, keeping or changing its etag.
    pub fn replace_data(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>, etag: &str) {
        if let Some(object) = self
            .lock()
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            object.data = data.into();
            object.etag = etag.to_string();
        }
    }

    /// Mark a pending restore as finished.
    pub fn complete_restore(&self, bucket: &str, key: &str, expiry_date: &str) {
        if let Some(object) = self
            .lock()
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            object.restore = Some(format!(
                r#"ongoing-request="false", expiry-date="{expiry_date}""#
            ));
        }
    }

    pub fn restore_calls(&self) -> Vec<RestoreCall> {
        self.lock().restores.clone()
    }

    pub fn tags(&self, bucket: &str, key: &str) -> Vec<Tag> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.tags.clone())
            .unwrap_or_default()
    }

    /// Make every tagging call fail.
    pub fn fail_tagging(&self, fail: bool) {
        self.lock().fail_tagging = fail;
    }

    /// Make range reads fail with access denied.
    pub fn deny_reads(&self, deny: bool) {
        self.lock().deny_reads = deny;
    }

    fn with_object<T>(
        &self,
        bucket: &str,
        key: &str,
        f: impl FnOnce(&mut Inner, (String, String)) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut inner = self.lock();
        let id = (bucket.to_string(), key.to_string());
        if !inner.objects.contains_key(&id) {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        f(&mut inner, id)
    }
}

fn tagging_unavailable() -> StorageError {
    StorageError::Io(std::io::Error::other("tagging service unavailable"))
}

#[async_trait]
impl ObjectStorage for MemoryStore {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        self.with_object(bucket, key, |inner, id| {
            let object = &inner.objects[&id];
            Ok(ObjectHead {
                content_length: object
                    .reported_size
                    .unwrap_or(object.data.len() as u64),
                etag: object.etag.clone(),
                storage_class: object.storage_class.clone(),
                restore: object.restore.clone(),
                server_side_encryption: object.server_side_encryption.clone(),
                metadata: object.metadata.clone(),
                last_modified: Utc::now(),
            })
        })
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        if_match: Option<&str>,
    ) -> StorageResult<ByteStream> {
        let payload = self.with_object(bucket, key, |inner, id| {
            if inner.deny_reads {
                return Err(StorageError::AccessDenied(format!("{bucket}/{key}")));
            }
            let object = &inner.objects[&id];
            if let Some(expected) = if_match {
                if !etag_matches(expected, &object.etag) {
                    return Err(StorageError::PreconditionFailed {
                        expected: expected.to_string(),
                        actual: object.etag.clone(),
                    });
                }
            }
            if !object.readable() {
                return Err(StorageError::InvalidObjectState(format!(
                    "{} object has not been restored",
                    object.storage_class
                )));
            }
            let size = object.data.len() as u64;
            let (offset, len) = match range {
                Some(range) => range.resolve(size)?,
                None => (0, size),
            };
            let start = offset as usize;
            Ok(Bytes::copy_from_slice(
                &object.data[start..start + len as usize],
            ))
        })?;

        let mut segments = Vec::new();
        let mut rest = payload;
        while !rest.is_empty() {
            let take = rest.len().min(self.segment_len);
            segments.push(Ok(rest.split_to(take)));
        }
        Ok(stream::iter(segments).boxed())
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RestoreTier,
    ) -> StorageResult<()> {
        self.with_object(bucket, key, |inner, id| {
            inner.restores.push(RestoreCall {
                bucket: bucket.to_string(),
                key: key.to_string(),
                days,
                tier,
            });
            if let Some(object) = inner.objects.get_mut(&id) {
                object.restore = Some(r#"ongoing-request="true""#.to_string());
            }
            Ok(())
        })
    }

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StorageResult<Vec<Tag>> {
        self.with_object(bucket, key, |inner, id| {
            if inner.fail_tagging {
                return Err(tagging_unavailable());
            }
            Ok(inner.objects[&id].tags.clone())
        })
    }

    async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        tags: Vec<Tag>,
    ) -> StorageResult<()> {
        if tags.len() > MAX_TAGS_PER_OBJECT {
            return Err(StorageError::TooManyTags(tags.len()));
        }
        self.with_object(bucket, key, |inner, id| {
            if inner.fail_tagging {
                return Err(tagging_unavailable());
            }
            if let Some(object) = inner.objects.get_mut(&id) {
                object.tags = tags;
            }
            Ok(())
        })
    }
}
