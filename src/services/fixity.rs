//! FixityService: the task functions the workflow orchestrator invokes.

use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    config::FixityConfig,
    errors::FixityResult,
    models::state::StateRecord,
    services::{
        checksum::ChunkedHashEngine,
        notify::{AnonymousMetrics, MetricsReporter, Notifier, TopicNotifier},
        restore::RestoreCoordinator,
        validation::ChecksumReconciler,
    },
    storage::ObjectStorage,
};

pub const ERROR_SUBJECT: &str = "ERROR: checksum state machine failed";

/// Failure report forwarded by the orchestrator's catch clause.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StepFailure {
    pub error: Option<String>,
    pub cause: Option<String>,
}

impl StepFailure {
    /// The cause is usually a JSON error object; fall back to the raw text.
    pub fn message(&self) -> String {
        let cause = self.cause.as_deref().unwrap_or_default();
        match serde_json::from_str::<Value>(cause) {
            Ok(parsed) => match parsed.get("errorMessage").and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => cause.to_string(),
            },
            Err(_) if cause.is_empty() => self.error.clone().unwrap_or_default(),
            Err(_) => cause.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct FixityService {
    restore: RestoreCoordinator,
    checksum: ChunkedHashEngine,
    validation: ChecksumReconciler,
    notifier: Arc<dyn Notifier>,
}

impl FixityService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        config: Arc<FixityConfig>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            restore: RestoreCoordinator::new(storage.clone(), config.clone()),
            checksum: ChunkedHashEngine::new(storage.clone(), config.chunk_size),
            validation: ChecksumReconciler::new(storage, config, notifier.clone(), metrics),
            notifier,
        }
    }

    /// Service wired with the tracing-backed notifier and metrics reporter.
    pub fn with_defaults(storage: Arc<dyn ObjectStorage>, config: FixityConfig) -> Self {
        let config = Arc::new(config);
        Self::new(
            storage,
            config.clone(),
            Arc::new(TopicNotifier::new(config.notification_topic.clone())),
            Arc::new(AnonymousMetrics::new(config)),
        )
    }

    pub async fn check_restore_status(&self, record: StateRecord) -> FixityResult<StateRecord> {
        self.restore.check_and_advance_restore(record).await
    }

    pub async fn compute_checksum(&self, record: StateRecord) -> FixityResult<StateRecord> {
        self.checksum.compute_chunk(record).await
    }

    pub async fn final_validation(&self, record: StateRecord) -> FixityResult<StateRecord> {
        self.validation.validate(record).await
    }

    /// Report a failed execution. Returns whether a notification went out.
    pub async fn on_checksum_error(&self, failure: StepFailure) -> bool {
        let message = failure.message();
        error!("checksum state machine failed: {}", message);
        let sent = self
            .notifier
            .send(ERROR_SUBJECT, &json!({ "ErrorMessage": message }))
            .await;
        if !sent {
            info!("error notification not sent");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryObject, MemoryStore};

    #[test]
    fn failure_message_prefers_the_json_cause() {
        let failure = StepFailure {
            error: Some("States.TaskFailed".into()),
            cause: Some(r#"{"errorMessage":"etag mismatch","errorType":"IdentityMismatch"}"#.into()),
        };
        assert_eq!(failure.message(), "etag mismatch");

        let raw = StepFailure {
            error: None,
            cause: Some("lambda timed out".into()),
        };
        assert_eq!(raw.message(), "lambda timed out");

        let bare = StepFailure {
            error: Some("States.Timeout".into()),
            cause: None,
        };
        assert_eq!(bare.message(), "States.Timeout");
    }

    #[tokio::test]
    async fn full_run_over_a_standard_object() {
        let store = Arc::new(MemoryStore::new());
        store.insert("media-bucket", "a.bin", MemoryObject::new(b"abc".to_vec()));
        let service = FixityService::with_defaults(store.clone(), FixityConfig::default());

        let record = service
            .check_restore_status(StateRecord::new("media-bucket", "a.bin"))
            .await
            .unwrap();
        let record = service.compute_checksum(record).await.unwrap();
        let record = service.final_validation(record).await.unwrap();

        assert_eq!(
            record.computed.as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
        assert!(record.tag_updated);
        assert!(!service.on_checksum_error(StepFailure::default()).await);
    }
}
