//! Bulk send JetStream processor
//!
//! Queued campaigns are published as jobs on a work-queue stream and sent one
//! at a time by the worker's durable consumer.
//!
//! ## Streams
//! - `SMSTRIGGER_BULK_JOBS` - one job per campaign send or retry

use std::sync::Arc;

use anyhow::Result;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::bulk_sms::BulkSmsProcessor;
use super::error::ServiceError;
use crate::types::{BulkJobStatus, BulkJobStatusUpdate, BulkJobSubmitResponse, QueuedBulkJob};

// Stream and consumer names
const STREAM_NAME: &str = "SMSTRIGGER_BULK_JOBS";
const CONSUMER_NAME: &str = "bulk_sms_workers";
const SUBJECT: &str = "smstrigger.jobs.bulk";
const STATUS_PREFIX: &str = "smstrigger.job.bulk.status";

pub struct BulkJobQueue {
    client: Client,
    js: JsContext,
    processor: Arc<BulkSmsProcessor>,
}

impl BulkJobQueue {
    /// Create the queue, initializing the JetStream stream
    pub async fn new(client: Client, processor: Arc<BulkSmsProcessor>) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![format!("{}.*", SUBJECT)],
            max_messages: 10_000,
            max_bytes: 10 * 1024 * 1024,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream bulk SMS stream '{}' ready", STREAM_NAME);

        Ok(Self { client, js, processor })
    }

    /// Queue a send for a campaign that is already Queued
    pub async fn submit(&self, bulk_sms: Uuid, user_id: Option<String>) -> Result<BulkJobSubmitResponse> {
        let job = QueuedBulkJob::new(bulk_sms, user_id);
        let subject = format!("{}.send", SUBJECT);

        let payload = serde_json::to_vec(&job)?;
        self.js.publish(subject, payload.into()).await?.await?;

        info!(job_id = %job.id, bulk_sms = %bulk_sms, "Bulk SMS job submitted");
        self.publish_status(&job, BulkJobStatus::Queued).await?;

        Ok(BulkJobSubmitResponse {
            job_id: job.id,
            bulk_sms,
            message: "Bulk SMS queued for sending".to_string(),
        })
    }

    pub async fn publish_status(&self, job: &QueuedBulkJob, status: BulkJobStatus) -> Result<()> {
        let update = BulkJobStatusUpdate::new(job, status);
        let subject = format!("{}.{}", STATUS_PREFIX, job.id);
        let payload = serde_json::to_vec(&update)?;

        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    /// Consume bulk jobs until the stream closes
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            // Retries go through retry_failed, never redelivery
            max_deliver: 1,
            filter_subject: format!("{}.>", SUBJECT),
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!("JetStream bulk SMS consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    if let Err(e) = self.process_job(msg).await {
                        error!("Failed to process bulk SMS job: {}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving bulk SMS job: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        // Ack before sending; a long send must not be redelivered
        if let Err(e) = msg.ack().await {
            error!("Failed to ack bulk SMS job: {:?}", e);
        }

        let job: QueuedBulkJob = serde_json::from_slice(&msg.payload)?;
        info!(job_id = %job.id, bulk_sms = %job.bulk_sms, "Processing bulk SMS job");
        self.publish_status(&job, BulkJobStatus::Sending).await?;

        let status = match self.processor.send(job.bulk_sms).await {
            Ok(counts) => BulkJobStatus::Finished {
                success: counts.success,
                failed: counts.failed,
            },
            Err(ServiceError::Conflict(reason)) | Err(ServiceError::NotFound(reason)) => {
                warn!(job_id = %job.id, bulk_sms = %job.bulk_sms, %reason, "Bulk SMS job skipped");
                BulkJobStatus::Rejected { error: reason }
            }
            Err(e) => {
                error!(job_id = %job.id, bulk_sms = %job.bulk_sms, error = %e, "Bulk SMS job failed");
                BulkJobStatus::Rejected { error: e.to_string() }
            }
        };

        self.publish_status(&job, status).await
    }
}

// ==========================================================================
// Tests
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(STREAM_NAME, "SMSTRIGGER_BULK_JOBS");
        assert!(SUBJECT.starts_with("smstrigger.jobs.bulk"));
        assert!(STATUS_PREFIX.starts_with("smstrigger."));
    }
}
