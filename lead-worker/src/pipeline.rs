//! Per-message processing: archive raw, transform, deliver, archive processed.
use std::time::Instant;

use lead_common::archive::{ArchiveClient, ArchiveReceipt};
use lead_common::outbound::map_outbound;
use lead_common::transform::transform;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::error::PipelineError;

/// One queued lead. `body` is the JSON text of the CRM record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
}

/// A batch of queued leads as handed over by the queue trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Partial batch response: only the listed messages are redelivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMessage {
    pub raw: ArchiveReceipt,
    pub outcome: DeliveryOutcome,
    pub processed: ArchiveReceipt,
}

#[derive(Clone)]
pub struct LeadPipeline {
    archive: ArchiveClient,
    delivery: DeliveryClient,
    raw_bucket: String,
    processed_bucket: String,
}

impl LeadPipeline {
    pub fn new(
        archive: ArchiveClient,
        delivery: DeliveryClient,
        raw_bucket: &str,
        processed_bucket: &str,
    ) -> Self {
        Self {
            archive,
            delivery,
            raw_bucket: raw_bucket.to_owned(),
            processed_bucket: processed_bucket.to_owned(),
        }
    }

    /// Run every step for one message. Steps run strictly in order and the first failure aborts
    /// the rest. Nothing is rolled back: a failed send leaves the raw archive entry in place and a
    /// redelivery appends it again.
    #[instrument(skip_all, fields(message_id = %message.message_id))]
    pub async fn process(&self, message: &QueueMessage) -> Result<ProcessedMessage, PipelineError> {
        let body: Value =
            serde_json::from_str(&message.body).map_err(PipelineError::MalformedMessage)?;
        debug!(body = %body, "processing message");

        let raw = self
            .archive
            .append(&self.raw_bucket, &message.message_id, &body)
            .await?;
        info!(location = %raw.location, "raw lead archived");

        let record = transform(&body);
        debug!(
            properties_visited = record.properties_visited(),
            "lead transformed"
        );

        let outcome = self.delivery.send(map_outbound(&record)).await?;
        info!(outcome = outcome.label(), response = %outcome.body(), "lead sent");

        let processed = self
            .archive
            .append(
                &self.processed_bucket,
                &message.message_id,
                &record.into_value(),
            )
            .await?;
        info!(location = %processed.location, "processed lead archived");

        Ok(ProcessedMessage {
            raw,
            outcome,
            processed,
        })
    }

    /// Process a batch in delivery order. A failed message does not stop the ones after it; its
    /// id is reported back so the queue redelivers it.
    pub async fn process_batch(&self, messages: &[QueueMessage]) -> BatchResponse {
        info!(records = messages.len(), "processing queue batch");

        let mut response = BatchResponse::default();
        for message in messages {
            let start = Instant::now();
            metrics::counter!("lead_messages_total").increment(1);

            if let Err(err) = self.process(message).await {
                error!(message_id = %message.message_id, error = %err, "failed processing message");
                metrics::counter!("lead_messages_failed").increment(1);
                response.batch_item_failures.push(BatchItemFailure {
                    item_identifier: message.message_id.clone(),
                });
            }

            metrics::histogram!("lead_message_processing_duration_seconds")
                .record(start.elapsed().as_secs_f64());
        }

        response
    }
}
