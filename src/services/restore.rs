//! RestoreCoordinator: gets archived objects into a readable tier.
//!
//! One invocation inspects the object, asks storage for a restore when none
//! has been requested yet, and estimates how long the orchestrator should
//! wait before asking again.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tracing::{debug, info};

use crate::{
    config::FixityConfig,
    errors::FixityResult,
    models::{
        object::ArchiveClass,
        state::{RestoreRequest, RestoreStatus, RestoreTier, StateRecord, Step},
    },
    storage::{ObjectStorage, StorageError},
};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const EXPIRY_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Split a restore marker such as
/// `ongoing-request="false", expiry-date="Tue, 01 Jan 2030 00:00:00 GMT"`
/// into its key/value pairs.
///
/// The scan runs right to left so values may contain commas and spaces.
/// Scanning stops at the first token it cannot make sense of; whatever was
/// parsed up to that point is returned.
pub fn parse_restore_status(marker: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let mut rest = marker.trim();

    loop {
        rest = rest.trim_end().trim_end_matches(',').trim_end();
        if rest.is_empty() {
            break;
        }
        let Some(eq) = rest.rfind('=') else {
            break;
        };
        let value = rest[eq + 1..].trim().trim_matches('"');
        let head = rest[..eq].trim_end();
        let key_start = head.rfind([' ', ',']).map_or(0, |idx| idx + 1);
        let key = &head[key_start..];
        if key.is_empty() {
            break;
        }
        pairs.insert(key.to_string(), value.to_string());
        rest = &head[..key_start];
    }

    pairs
}

/// Epoch millis of an `expiry-date` value.
pub fn parse_expiry_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .map(|date| date.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(value, EXPIRY_DATE_FORMAT).map(|n| n.and_utc()))
        .ok()
        .map(|date| date.timestamp_millis())
}

/// Expected restore duration as `(min, max)` seconds.
pub fn restore_wait_window(class: ArchiveClass, tier: RestoreTier) -> (u64, u64) {
    match (class, tier) {
        (ArchiveClass::Glacier, RestoreTier::Expedited) => (MINUTE, 5 * MINUTE),
        (ArchiveClass::Glacier, RestoreTier::Standard) => (3 * HOUR, 5 * HOUR),
        (ArchiveClass::Glacier, RestoreTier::Bulk) => (5 * HOUR, 12 * HOUR),
        (ArchiveClass::DeepArchive, RestoreTier::Expedited | RestoreTier::Standard) => {
            (9 * HOUR, 12 * HOUR)
        }
        (ArchiveClass::DeepArchive, RestoreTier::Bulk) => (24 * HOUR, 48 * HOUR),
    }
}

/// Deep archive has no expedited retrieval.
pub fn effective_restore_request(class: ArchiveClass, request: RestoreRequest) -> RestoreRequest {
    match (class, request.tier) {
        (ArchiveClass::DeepArchive, RestoreTier::Expedited) => RestoreRequest {
            tier: RestoreTier::Standard,
            ..request
        },
        _ => request,
    }
}

#[derive(Clone)]
pub struct RestoreCoordinator {
    storage: Arc<dyn ObjectStorage>,
    config: Arc<FixityConfig>,
}

impl RestoreCoordinator {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: Arc<FixityConfig>) -> Self {
        Self { storage, config }
    }

    pub async fn check_and_advance_restore(&self, record: StateRecord) -> FixityResult<StateRecord> {
        self.check_and_advance_restore_at(record, Utc::now()).await
    }

    /// Same as [`Self::check_and_advance_restore`] with an explicit clock.
    pub async fn check_and_advance_restore_at(
        &self,
        mut record: StateRecord,
        now: DateTime<Utc>,
    ) -> FixityResult<StateRecord> {
        let started = Instant::now();
        record.validate()?;
        record.enter(Step::CheckRestoreStatus);

        let head = self.storage.head_object(&record.bucket, &record.key).await?;
        record.verify_identity(&head)?;
        record.storage_class = Some(head.storage_class.clone());

        let marker = head
            .restore
            .as_deref()
            .map(parse_restore_status)
            .unwrap_or_default();
        if let Some(expiry) = marker.get("expiry-date").and_then(|v| parse_expiry_date(v)) {
            record.restore_expired_at = Some(expiry);
        }
        let ongoing = marker
            .get("ongoing-request")
            .map(|v| v.eq_ignore_ascii_case("true"));

        let Some(class) = ArchiveClass::from_storage_class(&head.storage_class) else {
            debug!(
                "{}/{} is in {}, no restore needed",
                record.bucket, record.key, head.storage_class
            );
            record.restore_status = Some(RestoreStatus::Completed);
            record.wait_in_seconds = Some(0);
            record.add_elapsed(started);
            return Ok(record);
        };

        let request = effective_restore_request(
            class,
            record
                .restore_request
                .unwrap_or_else(|| self.config.restore_request()),
        );
        record.restore_request = Some(request);

        if ongoing == Some(false) || record.restore_status == Some(RestoreStatus::Completed) {
            info!(
                "restore of {}/{} completed, expires at {:?}",
                record.bucket, record.key, record.restore_expired_at
            );
            record.restore_status = Some(RestoreStatus::Completed);
            record.wait_in_seconds = Some(0);
            record.add_elapsed(started);
            return Ok(record);
        }

        if ongoing.is_none() {
            match self
                .storage
                .restore_object(&record.bucket, &record.key, request.days, request.tier)
                .await
            {
                Ok(()) => info!(
                    "requested {} restore of {}/{} for {} days",
                    request.tier, record.bucket, record.key, request.days
                ),
                Err(StorageError::RestoreAlreadyInProgress) => {
                    debug!("restore of {}/{} already in progress", record.bucket, record.key)
                }
                Err(err) => return Err(err.into()),
            }
        }

        let now_millis = now.timestamp_millis();
        let start = *record.restore_start_at.get_or_insert(now_millis);
        let waited = u64::try_from((now_millis - start) / 1000).unwrap_or_default();
        let (min, max) = restore_wait_window(class, request.tier);

        record.restore_status = Some(RestoreStatus::InProgress);
        record.wait_in_seconds = Some(min.max(max.saturating_sub(waited)));
        record.add_elapsed(started);
        Ok(record)
    }
}
