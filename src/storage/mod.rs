//! Object-storage seam used by the fixity steps.
//!
//! The steps only need a narrow slice of an object store: HEAD, ranged
//! reads guarded by an etag precondition, restore requests for archived
//! objects, and the tag set. [`ObjectStorage`] captures exactly that.

pub mod local;
#[cfg(any(test, feature = "memory-store"))]
pub mod memory;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{fmt, io};
use thiserror::Error;

use crate::models::{
    object::{ObjectHead, Tag},
    state::RestoreTier,
};

/// Tag limit enforced by the object-tagging API.
pub const MAX_TAGS_PER_OBJECT: usize = 10;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("storage class `{0}` is not supported")]
    InvalidStorageClass(String),
    #[error("precondition failed: expected etag {expected}, object has {actual}")]
    PreconditionFailed { expected: String, actual: String },
    #[error("range start {start} not satisfiable for object of {size} bytes")]
    InvalidRange { start: u64, size: u64 },
    #[error("invalid object state: {0}")]
    InvalidObjectState(String),
    #[error("object restore already in progress")]
    RestoreAlreadyInProgress,
    #[error("too many tags: {0} (limit {MAX_TAGS_PER_OBJECT})")]
    TooManyTags(usize),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::BucketNotFound(_) => "NoSuchBucket",
            StorageError::BucketAlreadyExists(_) => "BucketAlreadyExists",
            StorageError::InvalidBucketName { .. } => "InvalidBucketName",
            StorageError::ObjectNotFound { .. } => "NoSuchKey",
            StorageError::InvalidObjectKey => "InvalidObjectKey",
            StorageError::InvalidStorageClass(_) => "InvalidStorageClass",
            StorageError::PreconditionFailed { .. } => "PreconditionFailed",
            StorageError::InvalidRange { .. } => "InvalidRange",
            StorageError::InvalidObjectState(_) => "InvalidObjectState",
            StorageError::RestoreAlreadyInProgress => "RestoreAlreadyInProgress",
            StorageError::TooManyTags(_) => "InvalidTag",
            StorageError::AccessDenied(_) => "AccessDenied",
            StorageError::Sqlx(_) | StorageError::Io(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::BucketNotFound(_) | StorageError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            StorageError::BucketAlreadyExists(_) | StorageError::RestoreAlreadyInProgress => {
                StatusCode::CONFLICT
            }
            StorageError::InvalidBucketName { .. }
            | StorageError::InvalidObjectKey
            | StorageError::InvalidStorageClass(_)
            | StorageError::TooManyTags(_) => StatusCode::BAD_REQUEST,
            StorageError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            StorageError::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            StorageError::InvalidObjectState(_) | StorageError::AccessDenied(_) => {
                StatusCode::FORBIDDEN
            }
            StorageError::Sqlx(_) | StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failures that may clear up on their own (I/O, database, restore timing).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Sqlx(_)
                | StorageError::Io(_)
                | StorageError::InvalidObjectState(_)
                | StorageError::RestoreAlreadyInProgress
        )
    }
}

/// Stream of payload segments as they arrive from storage.
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// Inclusive byte range, `bytes=<start>-<end>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Clamp to an object of `size` bytes, returning `(offset, len)`.
    pub fn resolve(&self, size: u64) -> StorageResult<(u64, u64)> {
        if self.start >= size || self.end < self.start {
            return Err(StorageError::InvalidRange {
                start: self.start,
                size,
            });
        }
        let end = self.end.min(size - 1);
        Ok((self.start, end - self.start + 1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// Etags compare equal regardless of surrounding quotes.
pub fn etag_matches(a: &str, b: &str) -> bool {
    a.trim_matches('"') == b.trim_matches('"')
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead>;

    /// Read `range` (or the whole object when `None`).
    ///
    /// When `if_match` is given and the object's etag differs, fails with
    /// [`StorageError::PreconditionFailed`] before any byte is returned.
    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        if_match: Option<&str>,
    ) -> StorageResult<ByteStream>;

    /// Ask for a temporary readable copy of an archived object.
    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RestoreTier,
    ) -> StorageResult<()>;

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StorageResult<Vec<Tag>>;

    /// Replace the whole tag set.
    async fn put_object_tagging(&self, bucket: &str, key: &str, tags: Vec<Tag>)
    -> StorageResult<()>;
}
