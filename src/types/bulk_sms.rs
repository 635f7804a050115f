//! Bulk SMS campaign types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::conditions::{ConditionsError, CustomerPredicate, Filter, Operator};
use super::customer::{Customer, CustomerField};

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bulk_sms_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BulkSmsStatus {
    Draft,
    Scheduled,
    Queued,
    Sending,
    Completed,
    Failed,
}

impl BulkSmsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Per-recipient delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "recipient_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
    Invalid,
}

/// How a campaign's audience is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bulk_filter_by", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FilterBy {
    All,
    CustomerGroup,
    Territory,
    Gender,
    Religion,
    Profession,
    CustomFilter,
    Manual,
}

impl FilterBy {
    /// Customer column matched against `filter_value`
    fn field(&self) -> Option<CustomerField> {
        match self {
            Self::CustomerGroup => Some(CustomerField::CustomerGroup),
            Self::Territory => Some(CustomerField::Territory),
            Self::Gender => Some(CustomerField::Gender),
            Self::Religion => Some(CustomerField::Religion),
            Self::Profession => Some(CustomerField::Profession),
            Self::All | Self::CustomFilter | Self::Manual => None,
        }
    }
}

/// Campaign entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BulkSms {
    pub id: Uuid,
    pub campaign_name: String,
    pub message: String,
    pub filter_by: FilterBy,
    pub filter_value: Option<String>,
    pub custom_filter: Option<serde_json::Value>,
    pub send_immediately: bool,
    pub scheduled_datetime: Option<DateTime<Utc>>,
    pub status: BulkSmsStatus,
    pub recipients_edited: bool,
    pub total_recipients: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub success_rate: Option<f64>,
    pub owner: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub recipients: Vec<BulkSmsRecipient>,
}

impl BulkSms {
    /// Customer predicates selecting this campaign's audience.
    /// Every audience requires a non-empty mobile number.
    pub fn audience_predicates(&self) -> Result<Vec<CustomerPredicate>, ConditionsError> {
        let mut predicates = vec![CustomerPredicate::new(CustomerField::MobileNo, Operator::Ne, "")];

        match self.filter_by {
            FilterBy::CustomFilter => {
                let filter = Filter::from_optional(self.custom_filter.as_ref())?;
                let (custom, _) = filter.customer_predicates(&[]);
                predicates.extend(custom);
            }
            other => {
                let value = self
                    .filter_value
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty());
                if let (Some(field), Some(value)) = (other.field(), value) {
                    predicates.push(CustomerPredicate::eq(field, value));
                }
            }
        }

        Ok(predicates)
    }

    /// Tally recipients into the campaign counters
    pub fn counts(&self) -> CampaignCounts {
        CampaignCounts::from_recipients(&self.recipients)
    }
}

/// One campaign recipient
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BulkSmsRecipient {
    pub position: i32,
    pub customer: String,
    pub customer_name: String,
    pub mobile_no: String,
    pub status: RecipientStatus,
    pub sent_datetime: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl BulkSmsRecipient {
    pub fn pending(position: i32, customer: &Customer) -> Self {
        Self {
            position,
            customer: customer.id.clone(),
            customer_name: customer.customer_name.clone(),
            mobile_no: customer.mobile().unwrap_or_default().to_string(),
            status: RecipientStatus::Pending,
            sent_datetime: None,
            error_message: None,
        }
    }
}

/// Terminal update written to a Pending recipient
#[derive(Debug, Clone)]
pub struct RecipientUpdate {
    pub status: RecipientStatus,
    pub sent_datetime: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RecipientUpdate {
    pub fn sent(at: DateTime<Utc>) -> Self {
        Self {
            status: RecipientStatus::Sent,
            sent_datetime: Some(at),
            error_message: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RecipientStatus::Failed,
            sent_datetime: None,
            error_message: Some(super::scheduled_sms::truncate_error(&error.into())),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            status: RecipientStatus::Invalid,
            ..Self::failed(error)
        }
    }
}

/// Recipient tallies. Invalid recipients count as failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignCounts {
    pub total: i32,
    pub success: i32,
    pub failed: i32,
}

impl CampaignCounts {
    pub fn from_recipients(recipients: &[BulkSmsRecipient]) -> Self {
        let mut counts = CampaignCounts {
            total: recipients.len() as i32,
            ..Default::default()
        };
        for r in recipients {
            match r.status {
                RecipientStatus::Sent => counts.success += 1,
                RecipientStatus::Failed | RecipientStatus::Invalid => counts.failed += 1,
                RecipientStatus::Pending => {}
            }
        }
        counts
    }

    /// Percentage of finished recipients that were delivered
    pub fn success_rate(&self) -> f64 {
        let finished = self.success + self.failed;
        if finished == 0 {
            return 0.0;
        }
        self.success as f64 / finished as f64 * 100.0
    }
}

/// Audit entry, one per recipient attempt
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BulkSmsLog {
    pub id: Uuid,
    pub bulk_sms: Uuid,
    pub customer: String,
    pub customer_name: String,
    pub mobile_no: String,
    pub message: String,
    pub status: RecipientStatus,
    pub sent_datetime: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Campaign values supplied at creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBulkSmsRequest {
    pub campaign_name: String,
    pub message: String,
    #[serde(default = "default_filter_by")]
    pub filter_by: FilterBy,
    #[serde(default)]
    pub filter_value: Option<String>,
    /// Raw JSON text of a custom filter
    #[serde(default)]
    pub custom_filter: Option<String>,
    #[serde(default)]
    pub send_immediately: bool,
    #[serde(default)]
    pub scheduled_datetime: Option<DateTime<Utc>>,
}

fn default_filter_by() -> FilterBy {
    FilterBy::All
}

/// Validated campaign ready to insert
#[derive(Debug, Clone)]
pub struct NewBulkSms {
    pub campaign_name: String,
    pub message: String,
    pub filter_by: FilterBy,
    pub filter_value: Option<String>,
    pub custom_filter: Option<serde_json::Value>,
    pub send_immediately: bool,
    pub scheduled_datetime: Option<DateTime<Utc>>,
    pub owner: Option<String>,
}

/// Request addressing one campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSmsIdRequest {
    pub id: Uuid,
}

/// Request to rebuild recipients from the campaign filter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRecipientsRequest {
    pub id: Uuid,
    #[serde(default)]
    pub force: bool,
}

/// Manually chosen recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualRecipient {
    pub customer: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub mobile_no: String,
}

/// Request to replace recipients by hand
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRecipientsRequest {
    pub id: Uuid,
    pub recipients: Vec<ManualRecipient>,
}

/// Realtime payload published after each recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSmsProgress {
    pub bulk_sms: Uuid,
    pub processed: i32,
    pub total: i32,
    pub success: i32,
    pub failed: i32,
}
