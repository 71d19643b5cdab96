//! Object-level views returned by the storage seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

pub const STORAGE_CLASS_STANDARD: &str = "STANDARD";
pub const STORAGE_CLASS_GLACIER: &str = "GLACIER";
pub const STORAGE_CLASS_DEEP_ARCHIVE: &str = "DEEP_ARCHIVE";

/// Storage classes whose bytes need a restore before they can be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveClass {
    Glacier,
    DeepArchive,
}

impl ArchiveClass {
    /// `None` for classes that are directly readable.
    pub fn from_storage_class(class: &str) -> Option<Self> {
        match class {
            STORAGE_CLASS_GLACIER => Some(ArchiveClass::Glacier),
            STORAGE_CLASS_DEEP_ARCHIVE => Some(ArchiveClass::DeepArchive),
            _ => None,
        }
    }
}

/// What a HEAD request tells us about an object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectHead {
    pub content_length: u64,
    /// Identity fingerprint, quoted the way the storage service reports it.
    pub etag: String,
    pub storage_class: String,
    /// Raw restore marker, e.g. `ongoing-request="true"`.
    pub restore: Option<String>,
    pub server_side_encryption: Option<String>,
    /// User metadata with the `x-amz-meta-` prefix stripped.
    pub metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

impl ObjectHead {
    pub fn new(content_length: u64, etag: impl Into<String>) -> Self {
        Self {
            content_length,
            etag: etag.into(),
            storage_class: STORAGE_CLASS_STANDARD.to_string(),
            restore: None,
            server_side_encryption: None,
            metadata: HashMap::new(),
            last_modified: Utc::now(),
        }
    }

    /// Case-insensitive user metadata lookup.
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Row of the `objects` table backing the local store.
///
/// Payload bytes live on disk; this row carries identity, tiering and
/// restore bookkeeping.
#[derive(Clone, Debug, FromRow)]
pub struct StoredObject {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub key: String,
    pub size_bytes: i64,
    /// Unquoted MD5 hex of the payload.
    pub etag: String,
    pub storage_class: String,
    pub server_side_encryption: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub restore_tier: Option<String>,
    pub restore_requested_at: Option<DateTime<Utc>>,
    pub restore_ready_at: Option<DateTime<Utc>>,
    pub restore_expires_at: Option<DateTime<Utc>>,
}
