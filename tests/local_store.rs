mod common;

use common::{BUCKET, archived, local_store, put};
use fixity_checker::{
    config::FixityConfig,
    digest::Algorithm,
    models::{
        object::Tag,
        state::{ComparedResult, ComparedWith, RestoreStatus, RestoreTier, StateRecord, Status},
    },
    services::fixity::FixityService,
    storage::{ByteRange, ObjectStorage, StorageError, local::PutObjectOptions},
};
use futures::TryStreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};

async fn read_all(
    store: &impl ObjectStorage,
    key: &str,
    range: Option<ByteRange>,
    if_match: Option<&str>,
) -> Result<Vec<u8>, StorageError> {
    let segments: Vec<_> = store
        .get_object_range(BUCKET, key, range, if_match)
        .await?
        .try_collect()
        .await?;
    Ok(segments.concat())
}

#[tokio::test]
async fn head_reports_identity_and_metadata() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    let options = PutObjectOptions {
        server_side_encryption: Some("AES256".into()),
        metadata: HashMap::from([("MD5".to_string(), "abc".to_string())]),
        ..PutObjectOptions::default()
    };
    put(&store, "docs/a.txt", b"abc", options).await;

    let head = store.head_object(BUCKET, "docs/a.txt").await.unwrap();
    assert_eq!(head.content_length, 3);
    assert_eq!(head.etag, "\"900150983cd24fb0d6963f7d28e17f72\"");
    assert_eq!(head.storage_class, "STANDARD");
    assert_eq!(head.server_side_encryption.as_deref(), Some("AES256"));
    assert_eq!(head.metadata_value("md5"), Some("abc"));
    assert_eq!(head.restore, None);
}

#[tokio::test]
async fn range_reads_honour_bounds_and_preconditions() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    put(&store, "ten.bin", b"0123456789", PutObjectOptions::default()).await;
    let etag = store.head_object(BUCKET, "ten.bin").await.unwrap().etag;

    assert_eq!(
        read_all(&store, "ten.bin", Some(ByteRange::new(8, 11)), Some(etag.as_str()))
            .await
            .unwrap(),
        b"89"
    );
    assert_eq!(
        read_all(&store, "ten.bin", None, None).await.unwrap(),
        b"0123456789"
    );
    assert!(matches!(
        read_all(&store, "ten.bin", Some(ByteRange::new(10, 12)), None).await,
        Err(StorageError::InvalidRange { start: 10, size: 10 })
    ));
    assert!(matches!(
        read_all(&store, "ten.bin", None, Some("\"0000\"")).await,
        Err(StorageError::PreconditionFailed { .. })
    ));
    assert!(matches!(
        store.head_object(BUCKET, "missing").await,
        Err(StorageError::ObjectNotFound { .. })
    ));
}

#[tokio::test]
async fn archived_objects_follow_the_restore_lifecycle() {
    let (_dir, store) = local_store(Duration::from_secs(3600)).await;
    put(&store, "cold.bin", b"frozen", archived("GLACIER")).await;

    assert!(matches!(
        read_all(&store, "cold.bin", None, None).await,
        Err(StorageError::InvalidObjectState(_))
    ));

    store
        .restore_object(BUCKET, "cold.bin", 1, RestoreTier::Bulk)
        .await
        .unwrap();
    let head = store.head_object(BUCKET, "cold.bin").await.unwrap();
    assert_eq!(head.restore.as_deref(), Some(r#"ongoing-request="true""#));
    assert!(matches!(
        store
            .restore_object(BUCKET, "cold.bin", 1, RestoreTier::Bulk)
            .await,
        Err(StorageError::RestoreAlreadyInProgress)
    ));
    assert!(read_all(&store, "cold.bin", None, None).await.is_err());
}

#[tokio::test]
async fn immediate_restores_become_readable() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    put(&store, "cold.bin", b"frozen", archived("DEEP_ARCHIVE")).await;

    store
        .restore_object(BUCKET, "cold.bin", 2, RestoreTier::Standard)
        .await
        .unwrap();
    let marker = store
        .head_object(BUCKET, "cold.bin")
        .await
        .unwrap()
        .restore
        .unwrap();
    assert!(marker.starts_with(r#"ongoing-request="false", expiry-date=""#));
    assert!(marker.ends_with(" GMT\""));
    assert_eq!(read_all(&store, "cold.bin", None, None).await.unwrap(), b"frozen");
}

#[tokio::test]
async fn standard_objects_cannot_be_restored() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    put(&store, "a", b"abc", PutObjectOptions::default()).await;
    assert!(matches!(
        store.restore_object(BUCKET, "a", 1, RestoreTier::Bulk).await,
        Err(StorageError::InvalidObjectState(_))
    ));
}

#[tokio::test]
async fn tagging_keeps_order_and_enforces_the_cap() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    put(&store, "a", b"abc", PutObjectOptions::default()).await;

    let tags = vec![Tag::new("b", "2"), Tag::new("a", "1")];
    store.put_object_tagging(BUCKET, "a", tags.clone()).await.unwrap();
    assert_eq!(store.get_object_tagging(BUCKET, "a").await.unwrap(), tags);

    let eleven = (0..11).map(|i| Tag::new(format!("t{i}"), "v")).collect();
    assert!(matches!(
        store.put_object_tagging(BUCKET, "a", eleven).await,
        Err(StorageError::TooManyTags(11))
    ));

    put(&store, "a", b"abcd", PutObjectOptions::default()).await;
    assert!(store.get_object_tagging(BUCKET, "a").await.unwrap().is_empty());
}

#[tokio::test]
async fn rejects_bad_names_and_storage_classes() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    assert!(matches!(
        store.create_bucket(BUCKET, "local").await,
        Err(StorageError::BucketAlreadyExists(_))
    ));
    assert!(matches!(
        store.create_bucket("Not_Valid", "local").await,
        Err(StorageError::InvalidBucketName { .. })
    ));

    let stream = futures::stream::iter(Vec::<std::io::Result<bytes::Bytes>>::new());
    assert!(matches!(
        store
            .put_object_stream(BUCKET, "../escape", PutObjectOptions::default(), stream)
            .await,
        Err(StorageError::InvalidObjectKey)
    ));

    let stream = futures::stream::iter(Vec::<std::io::Result<bytes::Bytes>>::new());
    assert!(matches!(
        store
            .put_object_stream(BUCKET, "a", archived("ICEBERG"), stream)
            .await,
        Err(StorageError::InvalidStorageClass(_))
    ));
}

#[tokio::test]
async fn archived_object_end_to_end() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    put(&store, "cold/archive.tar", &data, archived("GLACIER")).await;

    let config = FixityConfig {
        chunk_size: 256,
        ..FixityConfig::default()
    };
    let service = FixityService::with_defaults(Arc::new(store.clone()), config);

    let mut record = StateRecord::new(BUCKET, "cold/archive.tar").with_algorithm(Algorithm::Sha256);
    record = service.check_restore_status(record).await.unwrap();
    assert_eq!(record.restore_status, Some(RestoreStatus::InProgress));
    record = service.check_restore_status(record).await.unwrap();
    assert_eq!(record.restore_status, Some(RestoreStatus::Completed));
    assert!(record.restore_expired_at.is_some());

    let mut starts = Vec::new();
    while record.computed.is_none() {
        starts.push(record.byte_start);
        record = service.compute_checksum(record).await.unwrap();
    }
    assert_eq!(starts, vec![0, 256, 512, 768]);
    assert_eq!(record.byte_start, 1000);

    let expected = {
        use sha2::Digest;
        format!("{:x}", sha2::Sha256::digest(&data))
    };
    assert_eq!(record.computed.as_deref(), Some(expected.as_str()));

    let record = service.final_validation(record).await.unwrap();
    assert_eq!(record.compared_with, Some(ComparedWith::None));
    assert_eq!(record.compared_result, Some(ComparedResult::Skipped));
    assert_eq!(record.status, Some(Status::Completed));
    assert!(record.tag_updated);

    let tags = store
        .get_object_tagging(BUCKET, "cold/archive.tar")
        .await
        .unwrap();
    assert_eq!(tags[0], Tag::new("computed-sha256", expected.clone()));
    assert_eq!(tags[1].key, "computed-sha256-last-modified");

    // A second run now finds the stored tag.
    let rerun = StateRecord::new(BUCKET, "cold/archive.tar").with_algorithm(Algorithm::Sha256);
    let mut rerun = service.check_restore_status(rerun).await.unwrap();
    while rerun.computed.is_none() {
        rerun = service.compute_checksum(rerun).await.unwrap();
    }
    let rerun = service.final_validation(rerun).await.unwrap();
    assert_eq!(rerun.compared_with, Some(ComparedWith::ObjectTagging));
    assert_eq!(rerun.compared_result, Some(ComparedResult::Matched));
}

#[tokio::test]
async fn overwritten_object_fails_the_next_chunk() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    put(&store, "a", b"0123456789", PutObjectOptions::default()).await;
    let service = FixityService::with_defaults(Arc::new(store.clone()), FixityConfig::default());

    let record = service
        .compute_checksum(StateRecord::new(BUCKET, "a").with_chunk_size(4))
        .await
        .unwrap();
    put(&store, "a", b"9876543210", PutObjectOptions::default()).await;

    let err = service.compute_checksum(record).await.unwrap_err();
    assert_eq!(err.kind(), "IdentityMismatch");
    assert!(!err.is_retryable());
}
