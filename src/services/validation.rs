//! ChecksumReconciler: compares the computed digest with a reference value
//! and records the outcome on the object.

use chrono::{DateTime, Utc};
use std::{path::Path, sync::Arc, time::Instant};
use tracing::{info, warn};

use crate::{
    config::FixityConfig,
    digest::Algorithm,
    errors::{FixityError, FixityResult},
    models::{
        object::{ObjectHead, Tag},
        state::{ComparedResult, ComparedWith, StateRecord, Status, Step},
    },
    services::notify::{MetricsReporter, Notifier, metrics_data},
    storage::{MAX_TAGS_PER_OBJECT, ObjectStorage},
};

const CHECKSUM_TAG_PREFIX: &str = "computed-";
const MAX_SUBJECT_LEN: usize = 100;

pub fn checksum_tag_name(algorithm: Algorithm) -> String {
    format!("{CHECKSUM_TAG_PREFIX}{algorithm}")
}

pub fn last_modified_tag_name(algorithm: Algorithm) -> String {
    format!("{CHECKSUM_TAG_PREFIX}{algorithm}-last-modified")
}

/// A previously stored checksum tag, if it looks like a digest.
pub fn guess_from_tags(tags: &[Tag], algorithm: Algorithm) -> Option<String> {
    let name = checksum_tag_name(algorithm);
    tags.iter()
        .find(|tag| tag.key == name)
        .filter(|tag| algorithm.is_hex_digest(&tag.value))
        .map(|tag| tag.value.clone())
}

/// Reference from user metadata, or for md5 a single-part etag.
pub fn guess_from_head(head: &ObjectHead, algorithm: Algorithm) -> Option<(String, ComparedWith)> {
    if let Some(value) = head
        .metadata_value(algorithm.as_str())
        .filter(|value| !value.is_empty())
    {
        return Some((value.to_string(), ComparedWith::ObjectMetadata));
    }

    if algorithm != Algorithm::Md5 {
        return None;
    }
    // KMS-encrypted and multipart etags are not content digests.
    let plain = head
        .server_side_encryption
        .as_deref()
        .is_none_or(|sse| sse.eq_ignore_ascii_case("aes256"));
    let inner = head.etag.strip_prefix('"')?.strip_suffix('"')?;
    (plain && Algorithm::Md5.is_hex_digest(inner))
        .then(|| (inner.to_string(), ComparedWith::ObjectEtag))
}

pub fn notification_subject(algorithm: Algorithm, key: &str) -> String {
    let base = Path::new(key)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(key);
    truncate_subject(&format!(
        "{} status on {}",
        algorithm.as_str().to_ascii_uppercase(),
        base
    ))
}

/// Subjects are capped at 100 characters, the cut marked with `...`.
pub fn truncate_subject(subject: &str) -> String {
    if subject.chars().count() <= MAX_SUBJECT_LEN {
        return subject.to_string();
    }
    let mut cut: String = subject.chars().take(MAX_SUBJECT_LEN - 3).collect();
    cut.push_str("...");
    cut
}

#[derive(Clone)]
pub struct ChecksumReconciler {
    storage: Arc<dyn ObjectStorage>,
    config: Arc<FixityConfig>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn MetricsReporter>,
}

impl ChecksumReconciler {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        config: Arc<FixityConfig>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            storage,
            config,
            notifier,
            metrics,
        }
    }

    pub async fn validate(&self, record: StateRecord) -> FixityResult<StateRecord> {
        self.validate_at(record, Utc::now()).await
    }

    /// Same as [`Self::validate`] with an explicit clock for the tag timestamp.
    pub async fn validate_at(
        &self,
        mut record: StateRecord,
        now: DateTime<Utc>,
    ) -> FixityResult<StateRecord> {
        let started = Instant::now();
        record.validate()?;
        let computed = record
            .computed
            .clone()
            .ok_or_else(|| FixityError::InvalidArgument("missing computed checksum".into()))?;
        record.enter(Step::FinalValidation);

        let tags = match self
            .storage
            .get_object_tagging(&record.bucket, &record.key)
            .await
        {
            Ok(tags) => tags,
            Err(err) => {
                warn!(
                    "tag lookup on {}/{} failed, continuing without tags: {}",
                    record.bucket, record.key, err
                );
                Vec::new()
            }
        };

        let reference = match record.expected.clone() {
            Some(expected) => Some((expected, ComparedWith::Api)),
            None => self.best_guess(&record, &tags).await?,
        };

        let result = match &reference {
            Some((value, _)) if value.eq_ignore_ascii_case(&computed) => ComparedResult::Matched,
            Some((value, _)) => {
                warn!(
                    "{}/{}: {}",
                    record.bucket,
                    record.key,
                    FixityError::ValidationMismatch {
                        reference: value.clone(),
                        computed: computed.clone(),
                    }
                );
                ComparedResult::NotMatched
            }
            None => ComparedResult::Skipped,
        };
        record.compared_with = Some(reference.map_or(ComparedWith::None, |(_, source)| source));
        record.compared_result = Some(result);

        let store = record
            .store_checksum_on_tagging
            .unwrap_or(self.config.store_checksum_on_tagging);
        record.store_checksum_on_tagging = Some(store);
        record.tag_updated = false;
        if store && result != ComparedResult::NotMatched {
            record.tag_updated = self.create_tags(&record, &computed, now).await?;
        }

        record.status = Some(Status::Completed);
        record.add_elapsed(started);
        info!(
            "{} of {}/{}: {} ({:?})",
            record.algorithm,
            record.bucket,
            record.key,
            result.as_str(),
            record.compared_with
        );

        self.publish(&record).await;
        Ok(record)
    }

    /// Tag first, then metadata and etag from HEAD.
    async fn best_guess(
        &self,
        record: &StateRecord,
        tags: &[Tag],
    ) -> FixityResult<Option<(String, ComparedWith)>> {
        if let Some(value) = guess_from_tags(tags, record.algorithm) {
            return Ok(Some((value, ComparedWith::ObjectTagging)));
        }
        let head = self.storage.head_object(&record.bucket, &record.key).await?;
        Ok(guess_from_head(&head, record.algorithm))
    }

    /// Replace the checksum tags, keeping every other tag. Skipped when the
    /// object has no room left for both.
    async fn create_tags(
        &self,
        record: &StateRecord,
        computed: &str,
        now: DateTime<Utc>,
    ) -> FixityResult<bool> {
        let checksum_tag = checksum_tag_name(record.algorithm);
        let modified_tag = last_modified_tag_name(record.algorithm);

        let mut tags = self
            .storage
            .get_object_tagging(&record.bucket, &record.key)
            .await?;
        tags.retain(|tag| tag.key != checksum_tag && tag.key != modified_tag);

        if tags.len() > MAX_TAGS_PER_OBJECT - 2 {
            info!(
                "{}/{} already carries {} tags, not storing the checksum",
                record.bucket,
                record.key,
                tags.len()
            );
            return Ok(false);
        }

        tags.push(Tag::new(checksum_tag, computed));
        tags.push(Tag::new(modified_tag, now.timestamp_millis().to_string()));
        self.storage
            .put_object_tagging(&record.bucket, &record.key, tags)
            .await?;
        Ok(true)
    }

    async fn publish(&self, record: &StateRecord) {
        let subject = notification_subject(record.algorithm, &record.key);
        let message = match serde_json::to_value(record) {
            Ok(message) => message,
            Err(err) => {
                warn!("failed to serialize the state record: {}", err);
                return;
            }
        };
        let (sent, ()) = tokio::join!(
            self.notifier.send(&subject, &message),
            self.metrics.report(metrics_data(record)),
        );
        if !sent {
            info!("no notification sent for {}/{}", record.bucket, record.key);
        }
    }
}
