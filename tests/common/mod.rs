#![allow(dead_code)]

use bytes::Bytes;
use fixity_checker::storage::local::{LocalObjectStore, PutObjectOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io, sync::Arc, time::Duration};
use tempfile::TempDir;

pub const BUCKET: &str = "media-bucket";

/// Migrated store rooted in a fresh temp directory. Keep the `TempDir`
/// alive for as long as the store is used.
pub async fn local_store(restore_delay: Duration) -> (TempDir, LocalObjectStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("fixity.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("sqlite pool");

    let store = LocalObjectStore::new(Arc::new(pool), dir.path().join("objects"))
        .with_restore_delay(restore_delay);
    store.migrate().await.expect("migrate");
    store
        .create_bucket(BUCKET, "local")
        .await
        .expect("create bucket");
    (dir, store)
}

pub async fn put(store: &LocalObjectStore, key: &str, data: &[u8], options: PutObjectOptions) {
    let halves = data.split_at(data.len() / 2);
    let stream = futures::stream::iter(vec![
        Ok::<_, io::Error>(Bytes::copy_from_slice(halves.0)),
        Ok(Bytes::copy_from_slice(halves.1)),
    ]);
    store
        .put_object_stream(BUCKET, key, options, stream)
        .await
        .expect("put object");
}

pub fn archived(class: &str) -> PutObjectOptions {
    PutObjectOptions {
        storage_class: Some(class.to_string()),
        ..PutObjectOptions::default()
    }
}
