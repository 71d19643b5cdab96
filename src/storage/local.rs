//! LocalObjectStore: SQLite for object metadata, restore bookkeeping and tags,
//! local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.
//!
//! Archive storage classes are emulated. An object stored as GLACIER or
//! DEEP_ARCHIVE refuses range reads until a restore has been requested and
//! the configured restore delay has passed; the restored copy then stays
//! readable for the requested number of days.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ByteRange, ByteStream, MAX_TAGS_PER_OBJECT, ObjectStorage, StorageError, StorageResult,
    etag_matches,
};
use crate::models::{
    bucket::{Bucket, validate_bucket_name},
    object::{ArchiveClass, ObjectHead, STORAGE_CLASS_STANDARD, StoredObject, Tag},
    state::RestoreTier,
};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const READ_BUFFER_LEN: usize = 64 * 1024;
const RESTORE_EXPIRY_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const SUPPORTED_STORAGE_CLASSES: [&str; 7] = [
    "STANDARD",
    "STANDARD_IA",
    "ONEZONE_IA",
    "INTELLIGENT_TIERING",
    "GLACIER_IR",
    "GLACIER",
    "DEEP_ARCHIVE",
];

const OBJECT_COLUMNS: &str = "id, bucket_id, key, size_bytes, etag, storage_class, \
     server_side_encryption, last_modified, restore_tier, restore_requested_at, \
     restore_ready_at, restore_expires_at";

/// Attributes recorded alongside an uploaded payload.
#[derive(Clone, Debug, Default)]
pub struct PutObjectOptions {
    pub storage_class: Option<String>,
    pub server_side_encryption: Option<String>,
    /// User metadata without the `x-amz-meta-` prefix.
    pub metadata: HashMap<String, String>,
}

/// Where an archived object stands with respect to restores at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RestorePhase {
    NotRestored,
    Pending,
    Restored { expires_at: DateTime<Utc> },
}

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    restore_delay: TimeDelta,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            restore_delay: TimeDelta::zero(),
        }
    }

    /// How long an emulated restore stays pending before the copy is readable.
    pub fn with_restore_delay(mut self, delay: Duration) -> Self {
        self.restore_delay = TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::days(365));
        self
    }

    /// Create the metadata tables if they do not exist yet.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("running {} migration statements", statements.len());
        for stmt in statements {
            debug!("executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Rejects keys that are empty, too long, absolute, contain `..` or
    /// carry control characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        validate_bucket_name(name).map_err(|reason| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason,
        })
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Two-level shard directories taken from MD5(bucket/key).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE key = ? AND bucket_id = ?"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    async fn locate(&self, bucket: &str, key: &str) -> StorageResult<(Bucket, StoredObject)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;
        Ok((bucket_rec, object))
    }

    /// Create a bucket and its directory.
    pub async fn create_bucket(&self, name: &str, region: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        let bucket_root = self.bucket_root(name);
        fs::create_dir_all(&bucket_root).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            region: region.to_ascii_lowercase(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(&bucket.region)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// Stream an object to disk and record its metadata.
    ///
    /// The MD5 etag and size are computed while streaming into a temporary
    /// file, which is fsynced and renamed into place. Overwriting an object
    /// replaces its metadata, drops its tags and forgets any restore.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        options: PutObjectOptions,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;
        let storage_class = match options.storage_class.as_deref() {
            Some(class) => {
                let class = class.to_ascii_uppercase();
                if !SUPPORTED_STORAGE_CLASSES.contains(&class.as_str()) {
                    return Err(StorageError::InvalidStorageClass(class));
                }
                class
            }
            None => STORAGE_CLASS_STANDARD.to_string(),
        };
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let etag = format!("{:x}", digest.compute());
        match self
            .record_object(&bucket_rec, key, size_bytes, &etag, &storage_class, &options)
            .await
        {
            Ok(object) => {
                debug!(
                    "stored {}/{} ({} bytes, {}, etag {})",
                    bucket, key, size_bytes, storage_class, etag
                );
                Ok(object)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    async fn record_object(
        &self,
        bucket: &Bucket,
        key: &str,
        size_bytes: i64,
        etag: &str,
        storage_class: &str,
        options: &PutObjectOptions,
    ) -> StorageResult<StoredObject> {
        let mut tx = self.db.begin().await?;

        let object = sqlx::query_as::<_, StoredObject>(&format!(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, size_bytes, etag, storage_class,
                server_side_encryption, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                storage_class = excluded.storage_class,
                server_side_encryption = excluded.server_side_encryption,
                last_modified = excluded.last_modified,
                restore_tier = NULL,
                restore_requested_at = NULL,
                restore_ready_at = NULL,
                restore_expires_at = NULL
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(size_bytes)
        .bind(etag)
        .bind(storage_class)
        .bind(options.server_side_encryption.as_deref())
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (name, value) in &options.metadata {
            sqlx::query("INSERT INTO object_metadata (object_id, name, value) VALUES (?, ?, ?)")
                .bind(object.id)
                .bind(name.to_ascii_lowercase())
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(object)
    }

    async fn fetch_metadata(&self, object: &StoredObject) -> StorageResult<HashMap<String, String>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT name, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        let (_, object) = self.locate(bucket, key).await?;
        let metadata = self.fetch_metadata(&object).await?;

        Ok(ObjectHead {
            content_length: u64::try_from(object.size_bytes).unwrap_or_default(),
            etag: format!("\"{}\"", object.etag),
            restore: restore_marker(&object, Utc::now()),
            storage_class: object.storage_class,
            server_side_encryption: object.server_side_encryption,
            metadata,
            last_modified: object.last_modified,
        })
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        if_match: Option<&str>,
    ) -> StorageResult<ByteStream> {
        let (bucket_rec, object) = self.locate(bucket, key).await?;

        if let Some(expected) = if_match {
            if !etag_matches(expected, &object.etag) {
                return Err(StorageError::PreconditionFailed {
                    expected: expected.to_string(),
                    actual: format!("\"{}\"", object.etag),
                });
            }
        }

        if ArchiveClass::from_storage_class(&object.storage_class).is_some()
            && !matches!(
                restore_phase(&object, Utc::now()),
                RestorePhase::Restored { .. }
            )
        {
            return Err(StorageError::InvalidObjectState(format!(
                "object is in the {} storage class and has no restored copy",
                object.storage_class
            )));
        }

        let size = u64::try_from(object.size_bytes).unwrap_or_default();
        let (offset, len) = match range {
            Some(range) => range.resolve(size)?,
            None => (0, size),
        };

        let file_path = self.object_path(&bucket_rec.name, key);
        let mut file = File::open(&file_path)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                ErrorKind::PermissionDenied => {
                    StorageError::AccessDenied(format!("{}/{}", bucket, key))
                }
                _ => StorageError::Io(err),
            })?;
        file.seek(SeekFrom::Start(offset)).await?;

        debug!("reading {}/{} offset {} length {}", bucket, key, offset, len);
        let stream = ReaderStream::with_capacity(file.take(len), READ_BUFFER_LEN)
            .map(|segment| segment.map_err(StorageError::from));
        Ok(stream.boxed())
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RestoreTier,
    ) -> StorageResult<()> {
        let (_, object) = self.locate(bucket, key).await?;
        if ArchiveClass::from_storage_class(&object.storage_class).is_none() {
            return Err(StorageError::InvalidObjectState(format!(
                "restore is not allowed for the {} storage class",
                object.storage_class
            )));
        }

        let now = Utc::now();
        let lifetime = TimeDelta::days(i64::from(days));
        match restore_phase(&object, now) {
            RestorePhase::Pending => Err(StorageError::RestoreAlreadyInProgress),
            RestorePhase::Restored { .. } => {
                sqlx::query("UPDATE objects SET restore_expires_at = ? WHERE id = ?")
                    .bind(now + lifetime)
                    .bind(object.id)
                    .execute(&*self.db)
                    .await?;
                info!("extended restored copy of {}/{} by {} days", bucket, key, days);
                Ok(())
            }
            RestorePhase::NotRestored => {
                let ready_at = now + self.restore_delay;
                sqlx::query(
                    "UPDATE objects SET restore_tier = ?, restore_requested_at = ?,
                            restore_ready_at = ?, restore_expires_at = ?
                     WHERE id = ?",
                )
                .bind(tier.as_str())
                .bind(now)
                .bind(ready_at)
                .bind(ready_at + lifetime)
                .bind(object.id)
                .execute(&*self.db)
                .await?;
                info!(
                    "restore of {}/{} requested ({}, {} days), ready at {}",
                    bucket, key, tier, days, ready_at
                );
                Ok(())
            }
        }
    }

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StorageResult<Vec<Tag>> {
        let (_, object) = self.locate(bucket, key).await?;
        let tags = sqlx::query_as::<_, Tag>(
            "SELECT key, value FROM object_tags WHERE object_id = ? ORDER BY position",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(tags)
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
        let (_, object) = self.locate(bucket, key).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (position, tag) in tags.iter().enumerate() {
            sqlx::query(
                "INSERT INTO object_tags (object_id, position, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(object.id)
            .bind(position as i64)
            .bind(&tag.key)
            .bind(&tag.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("stored {} tags on {}/{}", tags.len(), bucket, key);
        Ok(())
    }
}

fn restore_phase(object: &StoredObject, now: DateTime<Utc>) -> RestorePhase {
    match (object.restore_ready_at, object.restore_expires_at) {
        (Some(ready_at), _) if now < ready_at => RestorePhase::Pending,
        (Some(_), Some(expires_at)) if now < expires_at => RestorePhase::Restored { expires_at },
        _ => RestorePhase::NotRestored,
    }
}

/// Restore marker in the form the cloud service reports it on HEAD.
fn restore_marker(object: &StoredObject, now: DateTime<Utc>) -> Option<String> {
    ArchiveClass::from_storage_class(&object.storage_class)?;
    match restore_phase(object, now) {
        RestorePhase::NotRestored => None,
        RestorePhase::Pending => Some(r#"ongoing-request="true""#.to_string()),
        RestorePhase::Restored { expires_at } => Some(format!(
            r#"ongoing-request="false", expiry-date="{}""#,
            expires_at.format(RESTORE_EXPIRY_FORMAT)
        )),
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
