//! The state record threaded through every fixity step.
//!
//! The orchestrator hands a record to a step, the step returns an updated
//! copy, and that copy becomes the input of the next step. Nothing else
//! carries progress between invocations.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Instant};

use crate::{
    digest::Algorithm,
    errors::{FixityError, FixityResult},
    models::{bucket::validate_bucket_name, object::ObjectHead},
};

/// Logical phases of a fixity run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    CheckRestoreStatus,
    ComputeChecksum,
    FinalValidation,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::CheckRestoreStatus => "CheckRestoreStatus",
            Step::ComputeChecksum => "ComputeChecksum",
            Step::FinalValidation => "FinalValidation",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Started,
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestoreStatus {
    InProgress,
    Completed,
}

/// Where the reference checksum came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparedWith {
    Api,
    ObjectTagging,
    ObjectMetadata,
    ObjectEtag,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComparedResult {
    Matched,
    NotMatched,
    Skipped,
}

impl ComparedResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparedResult::Matched => "MATCHED",
            ComparedResult::NotMatched => "NOTMATCHED",
            ComparedResult::Skipped => "SKIPPED",
        }
    }
}

/// Archive retrieval speed, fastest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestoreTier {
    Expedited,
    Standard,
    Bulk,
}

impl RestoreTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RestoreTier::Expedited => "Expedited",
            RestoreTier::Standard => "Standard",
            RestoreTier::Bulk => "Bulk",
        }
    }
}

impl fmt::Display for RestoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestoreTier {
    type Err = FixityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "expedited" => Ok(RestoreTier::Expedited),
            "standard" => Ok(RestoreTier::Standard),
            "bulk" => Ok(RestoreTier::Bulk),
            _ => Err(FixityError::InvalidArgument(format!(
                "unknown restore tier `{s}`"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub days: u32,
    pub tier: RestoreTier,
}

/// Serializable progress of a single fixity run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateRecord {
    pub bucket: String,
    pub key: String,
    /// Identity fingerprint as reported by storage, quotes included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    pub elapsed_millis: u64,

    pub algorithm: Algorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    /// Offset of the next byte to hash.
    pub byte_start: u64,
    /// Bytes consumed by the most recent hashing invocation.
    pub bytes_read: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate_hash_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compared_with: Option<ComparedWith>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compared_result: Option<ComparedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_checksum_on_tagging: Option<bool>,
    pub tag_updated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_status: Option<RestoreStatus>,
    /// Epoch millis at which the restored copy expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_expired_at: Option<i64>,
    /// Epoch millis of the first observation of an in-progress restore.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_start_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_in_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_request: Option<RestoreRequest>,
}

impl StateRecord {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Reject malformed caller input before any storage call.
    pub fn validate(&self) -> FixityResult<()> {
        let mut missing = Vec::new();
        if self.bucket.is_empty() {
            missing.push("bucket");
        }
        if self.key.is_empty() {
            missing.push("key");
        }
        if !missing.is_empty() {
            return Err(FixityError::InvalidArgument(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        validate_bucket_name(&self.bucket)
            .map_err(|reason| FixityError::InvalidArgument(format!("invalid bucket name: {reason}")))?;

        if let Some(expected) = self.expected.as_deref() {
            if !self.algorithm.is_hex_digest(expected) {
                return Err(FixityError::InvalidArgument(format!(
                    "invalid expected parameter for {}: need {} hex characters",
                    self.algorithm,
                    self.algorithm.hex_len()
                )));
            }
        }

        if self.chunk_size == Some(0) {
            return Err(FixityError::InvalidArgument(
                "invalid chunkSize parameter".into(),
            ));
        }

        if let Some(request) = self.restore_request {
            if request.days == 0 {
                return Err(FixityError::InvalidArgument(
                    "invalid restoreRequest parameter: days must be positive".into(),
                ));
            }
        }

        Ok(())
    }

    /// Move the record into `step`: a new phase starts over, a repeated
    /// invocation of the same phase is in progress.
    pub fn enter(&mut self, step: Step) {
        if self.state != Some(step) {
            self.state = Some(step);
            self.status = Some(Status::Started);
        } else if self.status == Some(Status::Started) {
            self.status = Some(Status::InProgress);
        }
    }

    pub fn add_elapsed(&mut self, started: Instant) {
        let millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.elapsed_millis = self.elapsed_millis.saturating_add(millis);
    }

    /// Establish the object identity on first sight and insist on it afterwards.
    pub fn verify_identity(&mut self, head: &ObjectHead) -> FixityResult<()> {
        match self.file_size {
            None => self.file_size = Some(head.content_length),
            Some(recorded) if recorded != head.content_length => {
                return Err(FixityError::SizeMismatch(format!(
                    "recorded file size {recorded} but storage reports {}",
                    head.content_length
                )));
            }
            Some(_) => {}
        }

        match self.etag.as_deref() {
            None => self.etag = Some(head.etag.clone()),
            Some(recorded) if recorded != head.etag => {
                return Err(FixityError::IdentityMismatch {
                    recorded: recorded.to_string(),
                    observed: head.etag.clone(),
                });
            }
            Some(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::ObjectHead;

    #[test]
    fn serializes_with_wire_names() {
        let mut record = StateRecord::new("media-bucket", "clips/a.mov").with_chunk_size(4);
        record.status = Some(Status::InProgress);
        record.compared_with = Some(ComparedWith::ObjectTagging);
        record.compared_result = Some(ComparedResult::NotMatched);
        record.restore_status = Some(RestoreStatus::Completed);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["bucket"], "media-bucket");
        assert_eq!(json["chunkSize"], 4);
        assert_eq!(json["status"], "IN_PROGRESS");
        assert_eq!(json["comparedWith"], "object-tagging");
        assert_eq!(json["comparedResult"], "NOTMATCHED");
        assert_eq!(json["restoreStatus"], "COMPLETED");
        assert_eq!(json["algorithm"], "md5");
        assert!(json.get("computed").is_none());
        assert!(json.get("intermediateHashState").is_none());
    }

    #[test]
    fn deserializes_sparse_input() {
        let record: StateRecord = serde_json::from_str(
            r#"{"bucket":"media-bucket","key":"a.bin","algorithm":"SHA256","restoreRequest":{"days":2,"tier":"Expedited"}}"#,
        )
        .unwrap();
        assert_eq!(record.algorithm, Algorithm::Sha256);
        assert_eq!(record.byte_start, 0);
        assert_eq!(
            record.restore_request,
            Some(RestoreRequest { days: 2, tier: RestoreTier::Expedited })
        );
    }

    #[test]
    fn validate_rejects_bad_input() {
        let err = StateRecord::default().validate().unwrap_err();
        assert!(err.to_string().contains("missing bucket, key"));

        let bad_bucket = StateRecord::new("Bad_Bucket", "k");
        assert!(matches!(bad_bucket.validate(), Err(FixityError::InvalidArgument(_))));

        let short_expected = StateRecord::new("media-bucket", "k")
            .with_algorithm(Algorithm::Sha1)
            .with_expected("900150983cd24fb0d6963f7d28e17f72");
        assert!(matches!(short_expected.validate(), Err(FixityError::InvalidArgument(_))));

        let zero_chunk = StateRecord::new("media-bucket", "k").with_chunk_size(0);
        assert!(zero_chunk.validate().is_err());

        let ok = StateRecord::new("media-bucket", "k")
            .with_expected("900150983CD24FB0D6963F7D28E17F72");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn enter_tracks_phase_changes() {
        let mut record = StateRecord::new("media-bucket", "k");
        record.enter(Step::ComputeChecksum);
        assert_eq!(record.status, Some(Status::Started));
        record.enter(Step::ComputeChecksum);
        assert_eq!(record.status, Some(Status::InProgress));
        record.enter(Step::ComputeChecksum);
        assert_eq!(record.status, Some(Status::InProgress));
        record.enter(Step::FinalValidation);
        assert_eq!(record.status, Some(Status::Started));
    }

    #[test]
    fn identity_is_established_then_enforced() {
        let head = ObjectHead::new(10, "\"aaaa\"");
        let mut record = StateRecord::new("media-bucket", "k");
        record.verify_identity(&head).unwrap();
        assert_eq!(record.file_size, Some(10));
        assert_eq!(record.etag.as_deref(), Some("\"aaaa\""));

        let changed = ObjectHead::new(10, "\"bbbb\"");
        assert!(matches!(
            record.verify_identity(&changed),
            Err(FixityError::IdentityMismatch { .. })
        ));

        let resized = ObjectHead::new(11, "\"aaaa\"");
        assert!(matches!(
            record.verify_identity(&resized),
            Err(FixityError::SizeMismatch(_))
        ));
    }
}
