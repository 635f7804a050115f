//! Bulk send job types (JetStream)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bulk_sms::BulkSms;

/// Status of a bulk send job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BulkJobStatus {
    /// Waiting in the work queue
    Queued,
    /// Worker is delivering
    Sending,
    #[serde(rename_all = "camelCase")]
    Finished { success: i32, failed: i32 },
    #[serde(rename_all = "camelCase")]
    Rejected { error: String },
}

/// A queued bulk send in JetStream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedBulkJob {
    pub id: Uuid,
    pub bulk_sms: Uuid,
    pub user_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl QueuedBulkJob {
    pub fn new(bulk_sms: Uuid, user_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bulk_sms,
            user_id,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobStatusUpdate {
    pub job_id: Uuid,
    pub bulk_sms: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: BulkJobStatus,
}

impl BulkJobStatusUpdate {
    pub fn new(job: &QueuedBulkJob, status: BulkJobStatus) -> Self {
        Self {
            job_id: job.id,
            bulk_sms: job.bulk_sms,
            timestamp: Utc::now(),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobSubmitResponse {
    pub job_id: Uuid,
    pub bulk_sms: Uuid,
    pub message: String,
}

/// Reply to `bulk.submit`: the campaign and, when it went straight to the
/// queue, the job carrying it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSubmitResult {
    pub campaign: BulkSms,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<BulkJobSubmitResponse>,
}

/// Reply to `bulk.retry`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRetryResult {
    pub reset: u64,
    /// `None` when the job could not be published; the campaign sweep requeues it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<BulkJobSubmitResponse>,
}
