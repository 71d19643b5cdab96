//! Outbound notification and usage-metrics seams.
//!
//! Delivery is someone else's job. The shipped implementations hand the
//! message to the tracing pipeline, where a log shipper can pick it up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{config::FixityConfig, models::state::StateRecord};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` under `subject`. Returns whether anything was sent;
    /// failures are reported as `false`, never raised.
    async fn send(&self, subject: &str, message: &Value) -> bool;
}

#[async_trait]
pub trait MetricsReporter: Send + Sync {
    /// Fire and forget.
    async fn report(&self, payload: Value);
}

/// Publishes to the configured topic, or does nothing without one.
pub struct TopicNotifier {
    topic: Option<String>,
}

impl TopicNotifier {
    pub fn new(topic: Option<String>) -> Self {
        Self { topic }
    }
}

#[async_trait]
impl Notifier for TopicNotifier {
    async fn send(&self, subject: &str, message: &Value) -> bool {
        let Some(topic) = self.topic.as_deref() else {
            return false;
        };
        match serde_json::to_string_pretty(message) {
            Ok(body) => {
                info!(target: "fixity::notify", topic, subject, "{}", body);
                true
            }
            Err(err) => {
                warn!("failed to render notification `{}`: {}", subject, err);
                false
            }
        }
    }
}

/// Anonymous usage metrics, sent only when the operator opted in.
pub struct AnonymousMetrics {
    config: Arc<FixityConfig>,
}

impl AnonymousMetrics {
    pub fn new(config: Arc<FixityConfig>) -> Self {
        Self { config }
    }

    /// Envelope around the per-run data, `None` when metrics are disabled.
    pub fn envelope(&self, data: Value, now: DateTime<Utc>) -> Option<Value> {
        if !self.config.metrics_enabled() {
            return None;
        }
        Some(json!({
            "Solution": self.config.solution_id,
            "UUID": self.config.metrics_uuid,
            "TimeStamp": now.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            "Data": data,
        }))
    }
}

#[async_trait]
impl MetricsReporter for AnonymousMetrics {
    async fn report(&self, payload: Value) {
        if let Some(envelope) = self.envelope(payload, Utc::now()) {
            info!(target: "fixity::metrics", "{}", envelope);
        }
    }
}

/// Per-run data carried by the metrics envelope.
pub fn metrics_data(record: &StateRecord) -> Value {
    json!({
        "Algorithm": record.algorithm,
        "ComparedResult": record.compared_result,
        "FileSize": record.file_size,
        "Elapsed": record.elapsed_millis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::state::ComparedResult;
    use chrono::TimeZone;

    #[tokio::test]
    async fn notifier_without_topic_sends_nothing() {
        assert!(!TopicNotifier::new(None).send("s", &json!({})).await);
        assert!(TopicNotifier::new(Some("alerts".into())).send("s", &json!({})).await);
    }

    #[test]
    fn metrics_envelope_requires_opt_in() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let disabled = AnonymousMetrics::new(Arc::new(FixityConfig::default()));
        assert!(disabled.envelope(json!({}), now).is_none());

        let enabled = AnonymousMetrics::new(Arc::new(FixityConfig {
            anonymous_usage: true,
            solution_id: Some("SO0000".into()),
            metrics_uuid: Some("abcd".into()),
            ..FixityConfig::default()
        }));
        let mut record = StateRecord::new("media-bucket", "a");
        record.file_size = Some(10);
        record.compared_result = Some(ComparedResult::Matched);
        let envelope = enabled.envelope(metrics_data(&record), now).unwrap();
        assert_eq!(envelope["Solution"], "SO0000");
        assert_eq!(envelope["TimeStamp"], "2030-01-01 00:00:00.000");
        assert_eq!(envelope["Data"]["Algorithm"], "md5");
        assert_eq!(envelope["Data"]["ComparedResult"], "MATCHED");
        assert_eq!(envelope["Data"]["FileSize"], 10);
    }
}
