//! In-memory store for development and tests

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use uuid::Uuid;

use super::{BusinessData, CampaignStore, MessageStore, RuleStore};
use crate::types::{
    BulkSms, BulkSmsLog, BulkSmsRecipient, BulkSmsStatus, CampaignCounts, Customer,
    CustomerPredicate, DedupQuery, NewBulkSms, NewScheduledSms, NewTriggerRule, OverdueInvoice,
    RecipientStatus, RecipientUpdate, SalesInvoice, ScheduledSms, SmsOutcome, SmsStatus,
    TriggerRule,
};

#[derive(Default)]
struct State {
    rules: Vec<TriggerRule>,
    messages: Vec<ScheduledSms>,
    campaigns: HashMap<Uuid, BulkSms>,
    logs: Vec<BulkSmsLog>,
    customers: BTreeMap<String, Customer>,
    invoices: Vec<SalesInvoice>,
}

/// Business data loaded into the memory backend at startup
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub invoices: Vec<SalesInvoice>,
}

/// Single-process store holding everything behind one lock
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-filled from a JSON seed file
    pub fn from_seed_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let seed: SeedData = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))?;

        let store = Self::new();
        for customer in seed.customers {
            store.add_customer(customer);
        }
        for invoice in seed.invoices {
            store.add_invoice(invoice);
        }
        Ok(store)
    }

    pub fn add_customer(&self, customer: Customer) {
        self.state.lock().customers.insert(customer.id.clone(), customer);
    }

    pub fn add_invoice(&self, invoice: SalesInvoice) {
        self.state.lock().invoices.push(invoice);
    }

    /// Overwrite a stored message. Lets tests stage states the public API never produces.
    #[cfg(test)]
    pub fn put_message(&self, sms: ScheduledSms) {
        let mut state = self.state.lock();
        match state.messages.iter_mut().find(|m| m.id == sms.id) {
            Some(existing) => *existing = sms,
            None => state.messages.push(sms),
        }
    }

    /// Overwrite a stored rule
    #[cfg(test)]
    pub fn put_rule(&self, rule: TriggerRule) {
        let mut state = self.state.lock();
        match state.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
    }

    #[cfg(test)]
    pub fn messages(&self) -> Vec<ScheduledSms> {
        self.state.lock().messages.clone()
    }
}

fn customers_with_mobile(state: &State) -> impl Iterator<Item = &Customer> + '_ {
    state.customers.values().filter(|c| c.mobile().is_some())
}

// =============================================================================
// Rules
// =============================================================================

#[async_trait]
impl RuleStore for MemoryStore {
    async fn create_rule(&self, rule: NewTriggerRule) -> Result<TriggerRule> {
        let mut state = self.state.lock();
        if state.rules.iter().any(|r| r.rule_name == rule.rule_name) {
            anyhow::bail!("Rule '{}' already exists", rule.rule_name);
        }

        let now = Utc::now();
        let created = TriggerRule {
            id: Uuid::new_v4(),
            rule_name: rule.rule_name,
            trigger_type: rule.trigger_type,
            message_template: rule.message_template,
            conditions: rule.conditions,
            frequency: rule.frequency,
            days_interval: rule.days_interval,
            is_active: rule.is_active,
            last_execution: None,
            execution_count: 0,
            error_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.rules.push(created.clone());
        Ok(created)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<TriggerRule>> {
        Ok(self.state.lock().rules.iter().find(|r| r.id == id).cloned())
    }

    async fn get_rule_by_name(&self, rule_name: &str) -> Result<Option<TriggerRule>> {
        Ok(self
            .state
            .lock()
            .rules
            .iter()
            .find(|r| r.rule_name == rule_name)
            .cloned())
    }

    async fn list_rules(&self, active_only: bool) -> Result<Vec<TriggerRule>> {
        let mut rules: Vec<TriggerRule> = self
            .state
            .lock()
            .rules
            .iter()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn set_rule_active(&self, id: Uuid, is_active: bool) -> Result<Option<TriggerRule>> {
        let mut state = self.state.lock();
        Ok(state.rules.iter_mut().find(|r| r.id == id).map(|rule| {
            rule.is_active = is_active;
            rule.updated_at = Utc::now();
            rule.clone()
        }))
    }

    async fn mark_rule_executed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(rule) = state.rules.iter_mut().find(|r| r.id == id) {
            rule.last_execution = Some(at);
            rule.execution_count += 1;
            rule.error_count = 0;
            rule.updated_at = at;
        }
        Ok(())
    }

    async fn record_rule_error(&self, id: Uuid, disable_at: i32) -> Result<Option<TriggerRule>> {
        let mut state = self.state.lock();
        Ok(state.rules.iter_mut().find(|r| r.id == id).map(|rule| {
            rule.error_count += 1;
            if rule.error_count >= disable_at {
                rule.is_active = false;
            }
            rule.updated_at = Utc::now();
            rule.clone()
        }))
    }
}

// =============================================================================
// Scheduled messages
// =============================================================================

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, sms: NewScheduledSms) -> Result<ScheduledSms> {
        let (reference_doctype, reference_name) = match sms.reference {
            Some(r) => (Some(r.doctype), Some(r.name)),
            None => (None, None),
        };
        let created = ScheduledSms {
            id: Uuid::new_v4(),
            customer: sms.customer,
            mobile_no: sms.mobile_no,
            message: sms.message,
            trigger_type: sms.trigger_type,
            reference_doctype,
            reference_name,
            status: SmsStatus::Draft,
            scheduled_datetime: sms.scheduled_datetime,
            sent_datetime: None,
            claimed_at: None,
            error_message: None,
            created_at: Utc::now(),
        };
        self.state.lock().messages.push(created.clone());
        Ok(created)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<ScheduledSms>> {
        Ok(self.state.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn message_exists(&self, query: &DedupQuery) -> Result<bool> {
        Ok(self.state.lock().messages.iter().any(|m| query.matches(m)))
    }

    async fn list_due_messages(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledSms>> {
        let mut due: Vec<ScheduledSms> = self
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| m.status == SmsStatus::Draft && m.scheduled_datetime <= now)
            .cloned()
            .collect();
        due.sort_by_key(|m| (m.scheduled_datetime, m.created_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn claim_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        match state
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.status == SmsStatus::Draft)
        {
            Some(sms) => {
                sms.status = SmsStatus::Sending;
                sms.claimed_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_message(&self, id: Uuid, outcome: &SmsOutcome) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(sms) = state
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.status == SmsStatus::Sending)
        else {
            return Ok(false);
        };

        sms.status = outcome.status();
        match outcome {
            SmsOutcome::Sent { at } => {
                sms.sent_datetime = Some(*at);
                sms.error_message = None;
            }
            SmsOutcome::Failed { error } => sms.error_message = Some(error.clone()),
        }
        Ok(true)
    }

    async fn fail_stale_claims(&self, claimed_before: DateTime<Utc>, error: &str) -> Result<u64> {
        let mut state = self.state.lock();
        let mut failed = 0;
        for sms in state.messages.iter_mut().filter(|m| {
            m.status == SmsStatus::Sending && m.claimed_at.map_or(true, |at| at < claimed_before)
        }) {
            sms.status = SmsStatus::Failed;
            sms.error_message = Some(error.to_string());
            failed += 1;
        }
        Ok(failed)
    }

    async fn reset_failed_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        match state
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.status == SmsStatus::Failed)
        {
            Some(sms) => {
                sms.status = SmsStatus::Draft;
                sms.scheduled_datetime = at;
                sms.claimed_at = None;
                sms.error_message = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn message_status_counts(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<(SmsStatus, i64)>> {
        let mut counts: HashMap<SmsStatus, i64> = HashMap::new();
        for sms in self.state.lock().messages.iter().filter(|m| {
            from.map_or(true, |f| m.scheduled_datetime >= f) && to.map_or(true, |t| m.scheduled_datetime <= t)
        }) {
            *counts.entry(sms.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn count_failed_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| m.status == SmsStatus::Failed && m.created_at >= since)
            .count() as i64)
    }
}

// =============================================================================
// Bulk campaigns
// =============================================================================

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn insert_campaign(&self, campaign: NewBulkSms) -> Result<BulkSms> {
        let now = Utc::now();
        let created = BulkSms {
            id: Uuid::new_v4(),
            campaign_name: campaign.campaign_name,
            message: campaign.message,
            filter_by: campaign.filter_by,
            filter_value: campaign.filter_value,
            custom_filter: campaign.custom_filter,
            send_immediately: campaign.send_immediately,
            scheduled_datetime: campaign.scheduled_datetime,
            status: BulkSmsStatus::Draft,
            recipients_edited: false,
            total_recipients: 0,
            success_count: 0,
            failed_count: 0,
            success_rate: None,
            owner: campaign.owner,
            queued_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            recipients: Vec::new(),
        };
        self.state.lock().campaigns.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<BulkSms>> {
        Ok(self.state.lock().campaigns.get(&id).cloned().map(|mut c| {
            c.recipients.sort_by_key(|r| r.position);
            c
        }))
    }

    async fn replace_recipients(
        &self,
        id: Uuid,
        recipients: Vec<BulkSmsRecipient>,
        edited: bool,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(campaign) = state
            .campaigns
            .get_mut(&id)
            .filter(|c| c.status == BulkSmsStatus::Draft)
        else {
            return Ok(false);
        };

        let counts = CampaignCounts::from_recipients(&recipients);
        campaign.recipients = recipients;
        campaign.total_recipients = counts.total;
        campaign.success_count = counts.success;
        campaign.failed_count = counts.failed;
        if edited {
            campaign.recipients_edited = true;
        }
        campaign.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_campaign(
        &self,
        id: Uuid,
        from: &[BulkSmsStatus],
        to: BulkSmsStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(campaign) = state
            .campaigns
            .get_mut(&id)
            .filter(|c| from.contains(&c.status))
        else {
            return Ok(false);
        };

        campaign.status = to;
        match to {
            BulkSmsStatus::Queued => campaign.queued_at = Some(at),
            BulkSmsStatus::Sending => campaign.started_at = Some(at),
            BulkSmsStatus::Completed | BulkSmsStatus::Failed => campaign.completed_at = Some(at),
            BulkSmsStatus::Draft | BulkSmsStatus::Scheduled => {}
        }
        campaign.updated_at = at;
        Ok(true)
    }

    async fn update_recipient(&self, id: Uuid, position: i32, update: &RecipientUpdate) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(recipient) = state.campaigns.get_mut(&id).and_then(|c| {
            c.recipients
                .iter_mut()
                .find(|r| r.position == position && r.status == RecipientStatus::Pending)
        }) else {
            return Ok(false);
        };

        recipient.status = update.status;
        recipient.sent_datetime = update.sent_datetime;
        recipient.error_message = update.error_message.clone();
        Ok(true)
    }

    async fn update_campaign_counts(&self, id: Uuid, counts: CampaignCounts) -> Result<()> {
        if let Some(campaign) = self.state.lock().campaigns.get_mut(&id) {
            campaign.total_recipients = counts.total;
            campaign.success_count = counts.success;
            campaign.failed_count = counts.failed;
            campaign.success_rate = Some(counts.success_rate());
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reset_failed_recipients(&self, id: Uuid) -> Result<u64> {
        let mut state = self.state.lock();
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(0);
        };

        let mut reset = 0;
        for recipient in campaign
            .recipients
            .iter_mut()
            .filter(|r| r.status == RecipientStatus::Failed)
        {
            recipient.status = RecipientStatus::Pending;
            recipient.error_message = None;
            reset += 1;
        }
        Ok(reset)
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let state = self.state.lock();
        let mut due: Vec<&BulkSms> = state
            .campaigns
            .values()
            .filter(|c| {
                c.status == BulkSmsStatus::Scheduled
                    && c.scheduled_datetime.map_or(false, |at| at <= now)
            })
            .collect();
        due.sort_by_key(|c| c.scheduled_datetime);
        let ids = due.into_iter().map(|c| c.id).collect();
        Ok(ids)
    }

    async fn list_stalled_campaigns(&self, status: BulkSmsStatus, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let state = self.state.lock();
        let mut stalled: Vec<&BulkSms> = state
            .campaigns
            .values()
            .filter(|c| c.status == status && c.updated_at < before)
            .collect();
        stalled.sort_by_key(|c| c.updated_at);
        Ok(stalled.into_iter().map(|c| c.id).collect())
    }

    async fn append_log(&self, log: &BulkSmsLog) -> Result<()> {
        self.state.lock().logs.push(log.clone());
        Ok(())
    }

    async fn list_logs(&self, id: Uuid) -> Result<Vec<BulkSmsLog>> {
        Ok(self
            .state
            .lock()
            .logs
            .iter()
            .filter(|l| l.bulk_sms == id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Business data
// =============================================================================

#[async_trait]
impl BusinessData for MemoryStore {
    async fn get_customer(&self, id: &str) -> Result<Option<Customer>> {
        Ok(self.state.lock().customers.get(id).cloned())
    }

    async fn find_customers(&self, predicates: &[CustomerPredicate]) -> Result<Vec<Customer>> {
        Ok(self
            .state
            .lock()
            .customers
            .values()
            .filter(|c| predicates.iter().all(|p| p.matches(c)))
            .cloned()
            .collect())
    }

    async fn first_customer_with_mobile(&self) -> Result<Option<Customer>> {
        let state = self.state.lock();
        let first = customers_with_mobile(&state).next().cloned();
        Ok(first)
    }

    async fn overdue_invoices(&self, due_on_or_before: NaiveDate) -> Result<Vec<OverdueInvoice>> {
        let state = self.state.lock();
        let mut overdue: Vec<OverdueInvoice> = state
            .invoices
            .iter()
            .filter(|i| i.submitted && i.outstanding_amount > 0.0 && i.due_date <= due_on_or_before)
            .filter_map(|i| {
                let customer = state.customers.get(&i.customer)?;
                let mobile = customer.mobile()?;
                Some(OverdueInvoice {
                    invoice_no: i.name.clone(),
                    customer: customer.id.clone(),
                    customer_name: customer.customer_name.clone(),
                    mobile_no: mobile.to_string(),
                    due_date: i.due_date,
                    outstanding_amount: i.outstanding_amount,
                })
            })
            .collect();
        overdue.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.invoice_no.cmp(&b.invoice_no)));
        Ok(overdue)
    }

    async fn birthday_customers(&self, month: u32, day: u32) -> Result<Vec<Customer>> {
        let state = self.state.lock();
        let customers = customers_with_mobile(&state)
            .filter(|c| {
                c.date_of_birth
                    .map_or(false, |dob| dob.month() == month && dob.day() == day)
            })
            .cloned()
            .collect();
        Ok(customers)
    }

    async fn inactive_customers(&self, cutoff: NaiveDate) -> Result<Vec<Customer>> {
        let state = self.state.lock();
        let customers = customers_with_mobile(&state)
            .filter(|c| {
                !state
                    .invoices
                    .iter()
                    .any(|i| i.submitted && i.customer == c.id && i.posting_date >= cutoff)
            })
            .cloned()
            .collect();
        Ok(customers)
    }

    async fn recent_item_buyers(&self, item_code: &str, since: NaiveDate) -> Result<Vec<Customer>> {
        let state = self.state.lock();
        let customers = customers_with_mobile(&state)
            .filter(|c| {
                state.invoices.iter().any(|i| {
                    i.submitted
                        && i.customer == c.id
                        && i.posting_date >= since
                        && i.item_codes.iter().any(|code| code == item_code)
                })
            })
            .cloned()
            .collect();
        Ok(customers)
    }
}
