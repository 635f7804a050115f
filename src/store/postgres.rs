//! Postgres-backed store

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{BusinessData, CampaignStore, MessageStore, RuleStore};
use crate::db::queries;
use crate::types::{
    BulkSms, BulkSmsLog, BulkSmsRecipient, BulkSmsStatus, CampaignCounts, Customer,
    CustomerPredicate, DedupQuery, NewBulkSms, NewScheduledSms, NewTriggerRule, OverdueInvoice,
    RecipientUpdate, ScheduledSms, SmsOutcome, SmsStatus, TriggerRule,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for PgStore {
    async fn create_rule(&self, rule: NewTriggerRule) -> Result<TriggerRule> {
        queries::rule::create_rule(&self.pool, &rule).await
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<TriggerRule>> {
        queries::rule::get_rule(&self.pool, id).await
    }

    async fn get_rule_by_name(&self, rule_name: &str) -> Result<Option<TriggerRule>> {
        queries::rule::get_rule_by_name(&self.pool, rule_name).await
    }

    async fn list_rules(&self, active_only: bool) -> Result<Vec<TriggerRule>> {
        queries::rule::list_rules(&self.pool, active_only).await
    }

    async fn set_rule_active(&self, id: Uuid, is_active: bool) -> Result<Option<TriggerRule>> {
        queries::rule::set_rule_active(&self.pool, id, is_active).await
    }

    async fn mark_rule_executed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        queries::rule::mark_rule_executed(&self.pool, id, at).await
    }

    async fn record_rule_error(&self, id: Uuid, disable_at: i32) -> Result<Option<TriggerRule>> {
        queries::rule::record_rule_error(&self.pool, id, disable_at).await
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(&self, sms: NewScheduledSms) -> Result<ScheduledSms> {
        queries::scheduled_sms::insert_message(&self.pool, &sms).await
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<ScheduledSms>> {
        queries::scheduled_sms::get_message(&self.pool, id).await
    }

    async fn message_exists(&self, query: &DedupQuery) -> Result<bool> {
        queries::scheduled_sms::message_exists(&self.pool, query).await
    }

    async fn list_due_messages(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledSms>> {
        queries::scheduled_sms::list_due_messages(&self.pool, now, limit).await
    }

    async fn claim_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        queries::scheduled_sms::claim_message(&self.pool, id, at).await
    }

    async fn complete_message(&self, id: Uuid, outcome: &SmsOutcome) -> Result<bool> {
        queries::scheduled_sms::complete_message(&self.pool, id, outcome).await
    }

    async fn fail_stale_claims(&self, claimed_before: DateTime<Utc>, error: &str) -> Result<u64> {
        queries::scheduled_sms::fail_stale_claims(&self.pool, claimed_before, error).await
    }

    async fn reset_failed_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        queries::scheduled_sms::reset_failed_message(&self.pool, id, at).await
    }

    async fn message_status_counts(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<(SmsStatus, i64)>> {
        queries::scheduled_sms::message_status_counts(&self.pool, from, to).await
    }

    async fn count_failed_since(&self, since: DateTime<Utc>) -> Result<i64> {
        queries::scheduled_sms::count_failed_since(&self.pool, since).await
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    async fn insert_campaign(&self, campaign: NewBulkSms) -> Result<BulkSms> {
        queries::bulk_sms::insert_campaign(&self.pool, &campaign).await
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<BulkSms>> {
        queries::bulk_sms::get_campaign(&self.pool, id).await
    }

    async fn replace_recipients(
        &self,
        id: Uuid,
        recipients: Vec<BulkSmsRecipient>,
        edited: bool,
    ) -> Result<bool> {
        queries::bulk_sms::replace_recipients(&self.pool, id, &recipients, edited).await
    }

    async fn transition_campaign(
        &self,
        id: Uuid,
        from: &[BulkSmsStatus],
        to: BulkSmsStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        queries::bulk_sms::transition_campaign(&self.pool, id, from, to, at).await
    }

    async fn update_recipient(&self, id: Uuid, position: i32, update: &RecipientUpdate) -> Result<bool> {
        queries::bulk_sms::update_recipient(&self.pool, id, position, update).await
    }

    async fn update_campaign_counts(&self, id: Uuid, counts: CampaignCounts) -> Result<()> {
        queries::bulk_sms::update_campaign_counts(&self.pool, id, counts).await
    }

    async fn reset_failed_recipients(&self, id: Uuid) -> Result<u64> {
        queries::bulk_sms::reset_failed_recipients(&self.pool, id).await
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        queries::bulk_sms::list_due_scheduled(&self.pool, now).await
    }

    async fn list_stalled_campaigns(&self, status: BulkSmsStatus, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        queries::bulk_sms::list_stalled_campaigns(&self.pool, status, before).await
    }

    async fn append_log(&self, log: &BulkSmsLog) -> Result<()> {
        queries::bulk_sms::append_log(&self.pool, log).await
    }

    async fn list_logs(&self, id: Uuid) -> Result<Vec<BulkSmsLog>> {
        queries::bulk_sms::list_logs(&self.pool, id).await
    }
}

#[async_trait]
impl BusinessData for PgStore {
    async fn get_customer(&self, id: &str) -> Result<Option<Customer>> {
        queries::customer::get_customer(&self.pool, id).await
    }

    async fn find_customers(&self, predicates: &[CustomerPredicate]) -> Result<Vec<Customer>> {
        queries::customer::find_customers(&self.pool, predicates).await
    }

    async fn first_customer_with_mobile(&self) -> Result<Option<Customer>> {
        queries::customer::first_customer_with_mobile(&self.pool).await
    }

    async fn overdue_invoices(&self, due_on_or_before: NaiveDate) -> Result<Vec<OverdueInvoice>> {
        queries::customer::overdue_invoices(&self.pool, due_on_or_before).await
    }

    async fn birthday_customers(&self, month: u32, day: u32) -> Result<Vec<Customer>> {
        queries::customer::birthday_customers(&self.pool, month, day).await
    }

    async fn inactive_customers(&self, cutoff: NaiveDate) -> Result<Vec<Customer>> {
        queries::customer::inactive_customers(&self.pool, cutoff).await
    }

    async fn recent_item_buyers(&self, item_code: &str, since: NaiveDate) -> Result<Vec<Customer>> {
        queries::customer::recent_item_buyers(&self.pool, item_code, since).await
    }
}
