use crate::config::ModerationConfig;
use crate::content_analysis::{ContentAnalyzer, ModerationFinding};
use crate::error::Result;
use crate::notification::decode_notification;
use crate::object_store::{ObjectRef, ObjectStore};
use crate::queue::QueueMessage;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of applying the retention policy to one object
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    /// Nothing above the deletion threshold; the object stays
    Retained,
    /// The object must be removed because of these findings
    Deleted { findings: Vec<ModerationFinding> },
}

/// Maps analysis findings to a retention decision
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    deletion_threshold: f32,
}

impl RetentionPolicy {
    pub fn new(deletion_threshold: f32) -> Self {
        Self { deletion_threshold }
    }

    /// Delete when any finding is strictly above the threshold
    pub fn evaluate(&self, findings: &[ModerationFinding]) -> ModerationOutcome {
        let flagged: Vec<ModerationFinding> = findings
            .iter()
            .filter(|f| f.confidence > self.deletion_threshold)
            .cloned()
            .collect();

        if flagged.is_empty() {
            ModerationOutcome::Retained
        } else {
            ModerationOutcome::Deleted { findings: flagged }
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(80.0)
    }
}

/// Counts for one processed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub messages: usize,
    pub objects: usize,
    pub retained: usize,
    pub deleted: usize,
}

/// Moderates objects referenced by queue notifications
///
/// A batch is one unit of work: if any notification in it cannot be decoded,
/// analysed, or acted upon, the whole batch fails and is left for redelivery.
pub struct ModerationWorker {
    store: Arc<dyn ObjectStore>,
    analyzer: Arc<dyn ContentAnalyzer>,
    policy: RetentionPolicy,
    min_confidence: f32,
    concurrency: usize,
}

impl ModerationWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        analyzer: Arc<dyn ContentAnalyzer>,
        config: &ModerationConfig,
    ) -> Self {
        Self {
            store,
            analyzer,
            policy: RetentionPolicy::new(config.deletion_threshold),
            min_confidence: config.min_confidence,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Process every notification in a delivered batch
    #[instrument(skip(self, batch), fields(batch_size = batch.len()))]
    pub async fn process_batch(&self, batch: &[QueueMessage]) -> Result<BatchReport> {
        let mut objects = Vec::new();
        for message in batch {
            let decoded = decode_notification(&message.body).inspect_err(|e| {
                warn!(message_id = %message.message_id, error = %e, "Undecodable notification");
            })?;
            debug!(
                message_id = %message.message_id,
                objects = decoded.len(),
                "Notification decoded"
            );
            objects.extend(decoded);
        }

        let outcomes: Vec<ModerationOutcome> = stream::iter(objects)
            .map(|object| async move { self.moderate(&object).await })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut report = BatchReport {
            messages: batch.len(),
            objects: outcomes.len(),
            ..BatchReport::default()
        };
        for outcome in &outcomes {
            match outcome {
                ModerationOutcome::Retained => report.retained += 1,
                ModerationOutcome::Deleted { .. } => report.deleted += 1,
            }
        }

        metrics::counter!("gallery.moderation.retained").increment(report.retained as u64);
        metrics::counter!("gallery.moderation.deleted").increment(report.deleted as u64);

        info!(
            messages = report.messages,
            objects = report.objects,
            retained = report.retained,
            deleted = report.deleted,
            "Batch moderated"
        );

        Ok(report)
    }

    /// Inspect, decide, and act on one object
    #[instrument(skip(self, object), fields(object = %object))]
    async fn moderate(&self, object: &ObjectRef) -> Result<ModerationOutcome> {
        let findings = self.inspect(object).await?;

        let outcome = self.policy.evaluate(&findings);

        match &outcome {
            ModerationOutcome::Deleted { findings } => {
                let labels: Vec<String> = findings
                    .iter()
                    .map(|f| format!("{}({:.1})", f.label, f.confidence))
                    .collect();
                info!(labels = %labels.join(", "), "Inappropriate content detected");

                self.store.delete_object(&object.bucket, &object.key).await?;
                info!("Deleted flagged object");
            }
            ModerationOutcome::Retained => {
                debug!(findings = findings.len(), "Object passed moderation");
            }
        }

        Ok(outcome)
    }

    /// Run content analysis, dropping anything under the intake floor
    async fn inspect(&self, object: &ObjectRef) -> Result<Vec<ModerationFinding>> {
        let mut findings = self.analyzer.analyze(object, self.min_confidence).await?;
        findings.retain(|f| f.confidence >= self.min_confidence);
        Ok(findings)
    }
}
