//! Storage seams
//!
//! Every status change goes through a conditional update ("transition only if the
//! row still holds the expected status"); the `bool` results report whether the
//! transition won.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::types::{
    BulkSms, BulkSmsLog, BulkSmsRecipient, BulkSmsStatus, CampaignCounts, Customer,
    CustomerPredicate, DedupQuery, NewBulkSms, NewScheduledSms, NewTriggerRule, OverdueInvoice,
    RecipientUpdate, ScheduledSms, SmsOutcome, SmsStatus, TriggerRule,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Trigger rule definitions and execution bookkeeping
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create_rule(&self, rule: NewTriggerRule) -> Result<TriggerRule>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<TriggerRule>>;

    async fn get_rule_by_name(&self, rule_name: &str) -> Result<Option<TriggerRule>>;

    /// Rules ordered by creation time
    async fn list_rules(&self, active_only: bool) -> Result<Vec<TriggerRule>>;

    async fn set_rule_active(&self, id: Uuid, is_active: bool) -> Result<Option<TriggerRule>>;

    /// Set `last_execution`, bump `execution_count`, clear `error_count`
    async fn mark_rule_executed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Bump `error_count`; deactivate the rule once it reaches `disable_at`.
    /// Returns the updated rule.
    async fn record_rule_error(&self, id: Uuid, disable_at: i32) -> Result<Option<TriggerRule>>;
}

/// Scheduled SMS queue
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a Draft message
    async fn insert_message(&self, sms: NewScheduledSms) -> Result<ScheduledSms>;

    async fn get_message(&self, id: Uuid) -> Result<Option<ScheduledSms>>;

    async fn message_exists(&self, query: &DedupQuery) -> Result<bool>;

    /// Draft messages due at `now`, oldest first
    async fn list_due_messages(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledSms>>;

    /// Draft → Sending
    async fn claim_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Sending → Sent | Failed
    async fn complete_message(&self, id: Uuid, outcome: &SmsOutcome) -> Result<bool>;

    /// Sending claims taken before `claimed_before` → Failed with `error`
    async fn fail_stale_claims(&self, claimed_before: DateTime<Utc>, error: &str) -> Result<u64>;

    /// Failed → Draft, rescheduled at `at` with the error cleared
    async fn reset_failed_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// `(status, count)` for messages scheduled within the optional window
    async fn message_status_counts(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<(SmsStatus, i64)>>;

    /// Failed messages created at or after `since`
    async fn count_failed_since(&self, since: DateTime<Utc>) -> Result<i64>;
}

/// Bulk campaigns, their recipients and the audit log
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: NewBulkSms) -> Result<BulkSms>;

    /// Campaign with recipients in list order
    async fn get_campaign(&self, id: Uuid) -> Result<Option<BulkSms>>;

    /// Replace the recipient list of a Draft campaign. `edited` marks a manual edit.
    async fn replace_recipients(
        &self,
        id: Uuid,
        recipients: Vec<BulkSmsRecipient>,
        edited: bool,
    ) -> Result<bool>;

    /// Move to `to` if the current status is one of `from`; stamps the queue log
    async fn transition_campaign(
        &self,
        id: Uuid,
        from: &[BulkSmsStatus],
        to: BulkSmsStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Pending → terminal for the recipient at `position`
    async fn update_recipient(&self, id: Uuid, position: i32, update: &RecipientUpdate) -> Result<bool>;

    async fn update_campaign_counts(&self, id: Uuid, counts: CampaignCounts) -> Result<()>;

    /// Failed recipients → Pending; returns how many were reset
    async fn reset_failed_recipients(&self, id: Uuid) -> Result<u64>;

    /// Scheduled campaigns whose time has come
    async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Campaigns in `status` whose row was last touched before `before`
    async fn list_stalled_campaigns(&self, status: BulkSmsStatus, before: DateTime<Utc>) -> Result<Vec<Uuid>>;

    async fn append_log(&self, log: &BulkSmsLog) -> Result<()>;

    async fn list_logs(&self, id: Uuid) -> Result<Vec<BulkSmsLog>>;
}

/// Read-only view of the platform's customers and invoices
#[async_trait]
pub trait BusinessData: Send + Sync {
    async fn get_customer(&self, id: &str) -> Result<Option<Customer>>;

    /// Customers matching every predicate, ordered by id
    async fn find_customers(&self, predicates: &[CustomerPredicate]) -> Result<Vec<Customer>>;

    async fn first_customer_with_mobile(&self) -> Result<Option<Customer>>;

    /// Submitted invoices with an outstanding balance due on or before the date,
    /// for customers with a mobile number
    async fn overdue_invoices(&self, due_on_or_before: NaiveDate) -> Result<Vec<OverdueInvoice>>;

    /// Customers with a mobile number born on the given month and day
    async fn birthday_customers(&self, month: u32, day: u32) -> Result<Vec<Customer>>;

    /// Customers with a mobile number and no submitted invoice posted on or after `cutoff`
    async fn inactive_customers(&self, cutoff: NaiveDate) -> Result<Vec<Customer>>;

    /// Customers with a mobile number who bought `item_code` on or after `since`
    async fn recent_item_buyers(&self, item_code: &str, since: NaiveDate) -> Result<Vec<Customer>>;
}

/// Shared handles to every store, as wired at startup
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub messages: Arc<dyn MessageStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub business: Arc<dyn BusinessData>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            rules: store.clone(),
            messages: store.clone(),
            campaigns: store.clone(),
            business: store,
        }
    }

    pub fn postgres(store: Arc<PgStore>) -> Self {
        Self {
            rules: store.clone(),
            messages: store.clone(),
            campaigns: store.clone(),
            business: store,
        }
    }
}
