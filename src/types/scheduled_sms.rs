//! Scheduled SMS types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::rule::TriggerType;

/// Maximum stored length of a failure description
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Scheduled SMS status
///
/// `Sending` is held only while a dispatcher owns the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sms_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Draft,
    Sending,
    Sent,
    Failed,
}

impl SmsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsStatus::Draft => "draft",
            SmsStatus::Sending => "sending",
            SmsStatus::Sent => "sent",
            SmsStatus::Failed => "failed",
        }
    }
}

/// Scheduled SMS entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSms {
    pub id: Uuid,
    pub customer: String,
    pub mobile_no: String,
    pub message: String,
    pub trigger_type: TriggerType,
    pub reference_doctype: Option<String>,
    pub reference_name: Option<String>,
    pub status: SmsStatus,
    pub scheduled_datetime: DateTime<Utc>,
    pub sent_datetime: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Values needed to insert a scheduled SMS (always created as Draft)
#[derive(Debug, Clone)]
pub struct NewScheduledSms {
    pub customer: String,
    pub mobile_no: String,
    pub message: String,
    pub trigger_type: TriggerType,
    pub reference: Option<SmsReference>,
    pub scheduled_datetime: DateTime<Utc>,
}

/// Back-link to the business record that caused a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsReference {
    pub doctype: String,
    pub name: String,
}

impl SmsReference {
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            name: name.into(),
        }
    }
}

/// Existence check used to avoid notifying a customer twice for one event
#[derive(Debug, Clone)]
pub struct DedupQuery {
    pub customer: String,
    pub trigger_type: TriggerType,
    pub reference: Option<SmsReference>,
    /// Only messages scheduled at or after this instant count
    pub since: Option<DateTime<Utc>>,
}

impl DedupQuery {
    pub fn matches(&self, sms: &ScheduledSms) -> bool {
        if sms.customer != self.customer || sms.trigger_type != self.trigger_type {
            return false;
        }
        if let Some(reference) = &self.reference {
            if sms.reference_doctype.as_deref() != Some(reference.doctype.as_str())
                || sms.reference_name.as_deref() != Some(reference.name.as_str())
            {
                return false;
            }
        }
        match self.since {
            Some(since) => sms.scheduled_datetime >= since,
            None => true,
        }
    }
}

/// Terminal outcome written when a claimed message finishes
#[derive(Debug, Clone)]
pub enum SmsOutcome {
    Sent { at: DateTime<Utc> },
    Failed { error: String },
}

impl SmsOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        SmsOutcome::Failed {
            error: truncate_error(&error.into()),
        }
    }

    pub fn status(&self) -> SmsStatus {
        match self {
            SmsOutcome::Sent { .. } => SmsStatus::Sent,
            SmsOutcome::Failed { .. } => SmsStatus::Failed,
        }
    }
}

/// Clip an error description to what the store keeps
pub fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

/// Request to schedule a message for a customer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSmsRequest {
    pub customer: String,
    pub message: String,
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub scheduled_datetime: Option<DateTime<Utc>>,
}

/// Request to send a message right away
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendImmediateRequest {
    pub customer: String,
    pub message: String,
}

/// Request addressing one scheduled SMS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsIdRequest {
    pub id: Uuid,
}

/// Request for statistics over a scheduling window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsStatsRequest {
    #[serde(default)]
    pub from_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to_date: Option<DateTime<Utc>>,
}

/// Per-status counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsStats {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub pending: i64,
    pub success_rate: f64,
}

impl SmsStats {
    /// Fold `(status, count)` rows into totals. Claimed messages count as pending.
    pub fn from_counts(counts: &[(SmsStatus, i64)]) -> Self {
        let mut stats = SmsStats::default();
        for (status, count) in counts {
            stats.total += count;
            match status {
                SmsStatus::Sent => stats.sent += count,
                SmsStatus::Failed => stats.failed += count,
                SmsStatus::Draft | SmsStatus::Sending => stats.pending += count,
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.sent as f64 / stats.total as f64 * 100.0;
        }
        stats
    }
}

/// Outcome of a single delivery as reported to RPC callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sms(customer: &str, trigger_type: TriggerType, reference: Option<(&str, &str)>) -> ScheduledSms {
        ScheduledSms {
            id: Uuid::new_v4(),
            customer: customer.into(),
            mobile_no: "8801712345678".into(),
            message: "hello".into(),
            trigger_type,
            reference_doctype: reference.map(|r| r.0.to_string()),
            reference_name: reference.map(|r| r.1.to_string()),
            status: SmsStatus::Draft,
            scheduled_datetime: Utc::now() - Duration::days(3),
            sent_datetime: None,
            claimed_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn dedup_by_reference_ignores_age() {
        let existing = sms("CUST-1", TriggerType::InvoiceDue, Some(("Sales Invoice", "SINV-1")));
        let query = DedupQuery {
            customer: "CUST-1".into(),
            trigger_type: TriggerType::InvoiceDue,
            reference: Some(SmsReference::new("Sales Invoice", "SINV-1")),
            since: None,
        };
        assert!(query.matches(&existing));

        let other_invoice = DedupQuery {
            reference: Some(SmsReference::new("Sales Invoice", "SINV-2")),
            ..query
        };
        assert!(!other_invoice.matches(&existing));
    }

    #[test]
    fn dedup_since_excludes_older_messages() {
        let existing = sms("CUST-1", TriggerType::RepurchasePromotion, None);
        let recent = DedupQuery {
            customer: "CUST-1".into(),
            trigger_type: TriggerType::RepurchasePromotion,
            reference: None,
            since: Some(Utc::now() - Duration::days(1)),
        };
        assert!(!recent.matches(&existing));

        let week = DedupQuery {
            since: Some(Utc::now() - Duration::days(7)),
            ..recent
        };
        assert!(week.matches(&existing));
    }

    #[test]
    fn stats_fold_claimed_into_pending() {
        let stats = SmsStats::from_counts(&[
            (SmsStatus::Sent, 6),
            (SmsStatus::Failed, 2),
            (SmsStatus::Draft, 1),
            (SmsStatus::Sending, 1),
        ]);
        assert_eq!(stats.total, 10);
        assert_eq!(stats.pending, 2);
        assert!((stats.success_rate - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_stats_have_zero_rate() {
        assert_eq!(SmsStats::from_counts(&[]), SmsStats::default());
    }

    #[test]
    fn failure_text_is_clipped() {
        let long = "x".repeat(900);
        match SmsOutcome::failed(long) {
            SmsOutcome::Failed { error } => assert_eq!(error.len(), MAX_ERROR_MESSAGE_LEN),
            SmsOutcome::Sent { .. } => unreachable!(),
        }
    }
}
