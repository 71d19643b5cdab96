//! ChunkedHashEngine: hashes one byte range per invocation.
//!
//! Objects far larger than a single invocation can read are hashed in
//! `chunk_size` slices. Between slices the digest lives in the state record
//! as a serialized continuation, so any invocation can pick up where the
//! previous one stopped.

use futures::StreamExt;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info};

use crate::{
    digest::{Algorithm, Md5, ResumableDigest, Sha1, Sha256},
    errors::{FixityError, FixityResult},
    models::state::{StateRecord, Status, Step},
    storage::{ByteRange, ObjectStorage},
};

/// 20 GiB per invocation.
pub const DEFAULT_CHUNK_SIZE: u64 = 20 * 1024 * 1024 * 1024;

/// Range of the next chunk, or `None` once `byte_start` has reached the end.
pub fn chunk_range(byte_start: u64, chunk_size: u64, file_size: u64) -> Option<ByteRange> {
    (byte_start < file_size).then(|| {
        ByteRange::new(
            byte_start,
            byte_start.saturating_add(chunk_size.saturating_sub(1)),
        )
    })
}

#[derive(Clone)]
pub struct ChunkedHashEngine {
    storage: Arc<dyn ObjectStorage>,
    default_chunk_size: u64,
}

impl ChunkedHashEngine {
    pub fn new(storage: Arc<dyn ObjectStorage>, default_chunk_size: u64) -> Self {
        Self {
            storage,
            default_chunk_size,
        }
    }

    /// Fold the next chunk of the object into the record's digest.
    pub async fn compute_chunk(&self, record: StateRecord) -> FixityResult<StateRecord> {
        match record.algorithm {
            Algorithm::Md5 => self.run::<Md5>(record).await,
            Algorithm::Sha1 => self.run::<Sha1>(record).await,
            Algorithm::Sha256 => self.run::<Sha256>(record).await,
        }
    }

    async fn run<D>(&self, mut record: StateRecord) -> FixityResult<StateRecord>
    where
        D: ResumableDigest + Send,
    {
        let started = Instant::now();
        if record.computed.is_some() {
            return Err(FixityError::AlreadyComputed(record.algorithm));
        }
        record.validate()?;
        record.enter(Step::ComputeChecksum);
        record.bytes_read = 0;

        let head = self.storage.head_object(&record.bucket, &record.key).await?;
        record.verify_identity(&head)?;
        let file_size = head.content_length;
        if record.byte_start > file_size {
            return Err(FixityError::SizeMismatch(format!(
                "byte start {} is beyond the {} byte object",
                record.byte_start, file_size
            )));
        }

        let mut digest = match record.intermediate_hash_state.as_deref() {
            Some(state) => D::deserialize(state)?,
            None => D::init(),
        };
        if digest.bytes_consumed() != record.byte_start {
            return Err(FixityError::InvalidState(format!(
                "continuation covers {} bytes but byte start is {}",
                digest.bytes_consumed(),
                record.byte_start
            )));
        }

        let chunk_size = record.chunk_size.unwrap_or(self.default_chunk_size);
        let range = chunk_range(record.byte_start, chunk_size, file_size);
        if range.is_some() || file_size == 0 {
            debug!(
                "{} {}/{}: reading {}",
                record.algorithm,
                record.bucket,
                record.key,
                range.map_or_else(|| "whole object".to_string(), |r| r.to_string())
            );
            let etag = record.etag.clone();
            let mut segments = self
                .storage
                .get_object_range(&record.bucket, &record.key, range, etag.as_deref())
                .await?;

            while let Some(segment) = segments.next().await {
                let segment = segment?;
                let len = segment.len() as u64;
                let processed = record.byte_start + record.bytes_read + len;
                if processed > file_size {
                    return Err(FixityError::SizeMismatch(format!(
                        "read {} bytes of a {} byte object",
                        processed, file_size
                    )));
                }
                digest.update(&segment);
                record.bytes_read += len;
            }
        }

        let processed = record.byte_start + record.bytes_read;
        if processed == file_size {
            let computed = digest.finalize();
            info!(
                "{} of {}/{} computed over {} bytes: {}",
                record.algorithm, record.bucket, record.key, file_size, computed
            );
            record.computed = Some(computed);
            record.intermediate_hash_state = None;
            record.status = Some(Status::Completed);
        } else if record.bytes_read == 0 {
            return Err(FixityError::SizeMismatch(format!(
                "no bytes returned at offset {} of a {} byte object",
                record.byte_start, file_size
            )));
        } else {
            debug!(
                "{} {}/{}: {} of {} bytes hashed",
                record.algorithm, record.bucket, record.key, processed, file_size
            );
            record.intermediate_hash_state = Some(digest.serialize());
        }

        record.byte_start = processed;
        record.add_elapsed(started);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryObject, MemoryStore};

    const BUCKET: &str = "media-bucket";

    fn engine(store: &Arc<MemoryStore>) -> ChunkedHashEngine {
        ChunkedHashEngine::new(store.clone(), DEFAULT_CHUNK_SIZE)
    }

    async fn run_to_completion(engine: &ChunkedHashEngine, mut record: StateRecord) -> StateRecord {
        for _ in 0..1000 {
            record = engine.compute_chunk(record).await.unwrap();
            if record.computed.is_some() {
                return record;
            }
        }
        panic!("hashing did not finish");
    }

    #[test]
    fn chunk_ranges_are_inclusive() {
        assert_eq!(chunk_range(0, 4, 10), Some(ByteRange::new(0, 3)));
        assert_eq!(chunk_range(8, 4, 10), Some(ByteRange::new(8, 11)));
        assert_eq!(chunk_range(10, 4, 10), None);
        assert_eq!(chunk_range(0, 4, 0), None);
        assert_eq!(
            chunk_range(0, u64::MAX, 10),
            Some(ByteRange::new(0, u64::MAX - 1))
        );
    }

    #[tokio::test]
    async fn ten_bytes_in_chunks_of_four() {
        let data = b"0123456789".to_vec();
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "ten.bin", MemoryObject::new(data.clone()));
        let engine = engine(&store);

        let mut record = StateRecord::new(BUCKET, "ten.bin").with_chunk_size(4);
        let mut starts = Vec::new();
        let mut statuses = Vec::new();
        loop {
            starts.push(record.byte_start);
            record = engine.compute_chunk(record).await.unwrap();
            statuses.push(record.status);
            if record.computed.is_some() {
                break;
            }
            assert!(record.intermediate_hash_state.is_some());
        }

        assert_eq!(starts, vec![0, 4, 8]);
        assert_eq!(
            statuses,
            vec![
                Some(Status::Started),
                Some(Status::InProgress),
                Some(Status::Completed)
            ]
        );
        assert_eq!(record.byte_start, 10);
        assert_eq!(record.bytes_read, 2);
        assert_eq!(record.status, Some(Status::Completed));
        assert!(record.intermediate_hash_state.is_none());
        assert_eq!(
            record.computed.as_deref(),
            Some(format!("{:x}", md5::compute(&data)).as_str())
        );
    }

    #[tokio::test]
    async fn every_algorithm_matches_single_pass() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
        let store = Arc::new(MemoryStore::new().with_segment_len(17));
        store.insert(BUCKET, "obj", MemoryObject::new(data.clone()));
        let engine = engine(&store);

        let cases = [
            (Algorithm::Md5, format!("{:x}", md5::compute(&data))),
            (Algorithm::Sha1, {
                use sha1::Digest;
                format!("{:x}", sha1::Sha1::digest(&data))
            }),
            (Algorithm::Sha256, {
                use sha2::Digest;
                format!("{:x}", sha2::Sha256::digest(&data))
            }),
        ];
        for (algorithm, expected) in cases {
            let record = StateRecord::new(BUCKET, "obj")
                .with_algorithm(algorithm)
                .with_chunk_size(130);
            let record = run_to_completion(&engine, record).await;
            assert_eq!(record.computed, Some(expected), "{algorithm}");
        }
    }

    #[tokio::test]
    async fn empty_object_hashes_in_one_call() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "empty", MemoryObject::new(Vec::new()));

        let record = engine(&store)
            .compute_chunk(StateRecord::new(BUCKET, "empty"))
            .await
            .unwrap();
        assert_eq!(
            record.computed.as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
        assert_eq!(record.byte_start, 0);
        assert_eq!(record.file_size, Some(0));
    }

    #[tokio::test]
    async fn completed_record_is_refused() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "a", MemoryObject::new(b"abc".to_vec()));
        let engine = engine(&store);

        let record = engine
            .compute_chunk(StateRecord::new(BUCKET, "a"))
            .await
            .unwrap();
        let err = engine.compute_chunk(record).await.unwrap_err();
        assert!(matches!(err, FixityError::AlreadyComputed(Algorithm::Md5)));
    }

    #[tokio::test]
    async fn object_replaced_mid_run_is_detected() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "a", MemoryObject::new(b"0123456789".to_vec()));
        let engine = engine(&store);

        let record = engine
            .compute_chunk(StateRecord::new(BUCKET, "a").with_chunk_size(4))
            .await
            .unwrap();
        store.replace_data(BUCKET, "a", b"abcdefghij".to_vec(), "\"ffff\"");

        let err = engine.compute_chunk(record).await.unwrap_err();
        assert!(matches!(err, FixityError::IdentityMismatch { .. }));
        assert_eq!(err.code(), 1007);
    }

    #[tokio::test]
    async fn overlong_payload_is_rejected_before_hashing() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            BUCKET,
            "a",
            MemoryObject::new(b"0123456789".to_vec()).with_reported_size(6),
        );

        let err = engine(&store)
            .compute_chunk(StateRecord::new(BUCKET, "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, FixityError::SizeMismatch(_)));
    }

    #[tokio::test]
    async fn continuation_must_agree_with_byte_start() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "a", MemoryObject::new(b"0123456789".to_vec()));
        let engine = engine(&store);

        let mut record = engine
            .compute_chunk(StateRecord::new(BUCKET, "a").with_chunk_size(4))
            .await
            .unwrap();
        record.byte_start = 6;

        let err = engine.compute_chunk(record).await.unwrap_err();
        assert!(matches!(err, FixityError::InvalidState(_)));
    }

    #[tokio::test]
    async fn access_denied_is_distinct() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "a", MemoryObject::new(b"abc".to_vec()));
        store.deny_reads(true);

        let err = engine(&store)
            .compute_chunk(StateRecord::new(BUCKET, "a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AccessDenied");
        assert!(!err.is_retryable());
    }
}
