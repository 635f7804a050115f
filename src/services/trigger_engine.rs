//! Trigger engine
//!
//! A cycle walks every active rule whose cadence has elapsed, asks the rule's
//! selector for candidates, drops candidates that were already messaged within
//! the trigger type's dedup window, renders the template and queues a Draft
//! message per remaining candidate. Rules are isolated from each other: a
//! failing rule goes through the failure policy and the cycle moves on.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::delivery::DeliveryChannel;
use super::error::{ServiceError, ServiceResult};
use super::error_handler::record_rule_failure;
use super::template::{format_amount, MessageRenderer, RenderContext};
use crate::store::Stores;
use crate::types::{
    CreateRuleRequest, Customer, CustomerField, CustomerPredicate, DedupQuery, DedupWindow, Filter,
    NewScheduledSms, NewTriggerRule, Operator, OverdueInvoice, RuleToggleResponse, SmsReference,
    TestRuleRequest, TestRuleResponse, TriggerRule, TriggerType,
};

const INVOICE_DOCTYPE: &str = "Sales Invoice";

/// Tallies of one trigger cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub rules_evaluated: usize,
    pub rules_executed: usize,
    pub rules_failed: usize,
    pub messages_created: usize,
    pub candidates_skipped: usize,
}

/// What processing one rule produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub created: usize,
    /// Deduplicated or failed to render
    pub skipped: usize,
}

/// A customer a rule wants to message
#[derive(Debug, Clone)]
struct Candidate {
    customer: String,
    mobile_no: String,
    reference: Option<SmsReference>,
    context: RenderContext,
}

impl Candidate {
    fn for_customer(customer: &Customer, mobile: &str, today: NaiveDate) -> Self {
        Self {
            customer: customer.id.clone(),
            mobile_no: mobile.to_string(),
            reference: None,
            context: base_context(&customer.customer_name, &customer.id, mobile, today),
        }
    }

    fn for_invoice(invoice: &OverdueInvoice, today: NaiveDate) -> Self {
        let context = base_context(&invoice.customer_name, &invoice.customer, &invoice.mobile_no, today)
            .with("invoice_no", invoice.invoice_no.as_str())
            .with("amount", format_amount(invoice.outstanding_amount))
            .with("due_date", invoice.due_date.to_string());
        Self {
            customer: invoice.customer.clone(),
            mobile_no: invoice.mobile_no.clone(),
            reference: Some(SmsReference::new(INVOICE_DOCTYPE, invoice.invoice_no.as_str())),
            context,
        }
    }
}

fn base_context(customer_name: &str, customer: &str, mobile: &str, today: NaiveDate) -> RenderContext {
    RenderContext::new()
        .with("customer_name", customer_name)
        .with("customer", customer)
        .with("mobile_no", mobile)
        .with("today", today.to_string())
}

pub struct TriggerEngine {
    stores: Stores,
    renderer: Arc<MessageRenderer>,
    channel: Arc<DeliveryChannel>,
}

impl TriggerEngine {
    pub fn new(stores: Stores, renderer: Arc<MessageRenderer>, channel: Arc<DeliveryChannel>) -> Self {
        Self {
            stores,
            renderer,
            channel,
        }
    }

    // =========================================================================
    // Rule management
    // =========================================================================

    /// Validate and store a new active rule
    pub async fn create_rule(&self, request: CreateRuleRequest) -> ServiceResult<TriggerRule> {
        let rule_name = request.rule_name.trim().to_string();
        if rule_name.is_empty() {
            return Err(ServiceError::validation("Rule name is required"));
        }

        let message_template = request
            .message_template
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| request.trigger_type.default_template().map(String::from))
            .ok_or_else(|| ServiceError::validation("Message template is required"))?;

        let conditions = match request.conditions.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Filter::parse(raw)?;
                Some(serde_json::from_str(raw).context("Failed to decode conditions")?)
            }
            _ => None,
        };

        if let Some(days) = request.days_interval {
            if days <= 0 {
                return Err(ServiceError::validation("Days interval must be a positive number"));
            }
        }
        if request.frequency.requires_days_interval() && request.days_interval.is_none() {
            return Err(ServiceError::validation(
                "Days interval is required for weekly and monthly rules",
            ));
        }

        if self.stores.rules.get_rule_by_name(&rule_name).await?.is_some() {
            return Err(ServiceError::conflict(format!("Rule '{}' already exists", rule_name)));
        }

        let rule = self
            .stores
            .rules
            .create_rule(NewTriggerRule {
                rule_name,
                trigger_type: request.trigger_type,
                message_template,
                conditions,
                frequency: request.frequency,
                days_interval: request.days_interval,
                is_active: true,
            })
            .await?;

        info!(rule = %rule.rule_name, rule_id = %rule.id, trigger_type = rule.trigger_type.as_str(), "Trigger rule created");
        Ok(rule)
    }

    /// Enable (`Some(true)`), disable (`Some(false)`) or toggle (`None`) a rule
    pub async fn set_rule_active(&self, rule_name: &str, active: Option<bool>) -> ServiceResult<RuleToggleResponse> {
        let rule = self
            .stores
            .rules
            .get_rule_by_name(rule_name)
            .await?
            .ok_or_else(|| ServiceError::not_found("Rule", rule_name))?;

        let is_active = active.unwrap_or(!rule.is_active);
        let updated = self
            .stores
            .rules
            .set_rule_active(rule.id, is_active)
            .await?
            .ok_or_else(|| ServiceError::not_found("Rule", rule_name))?;

        let state = if updated.is_active { "enabled" } else { "disabled" };
        info!(rule = %rule_name, state, "Trigger rule state changed");
        Ok(RuleToggleResponse {
            success: true,
            is_active: updated.is_active,
            message: format!("Rule '{}' {}", rule_name, state),
        })
    }

    /// Render a rule with sample values for one customer and send it right away
    pub async fn test_rule(&self, request: TestRuleRequest) -> ServiceResult<TestRuleResponse> {
        let rule = self
            .stores
            .rules
            .get_rule_by_name(&request.rule_name)
            .await?
            .ok_or_else(|| ServiceError::not_found("Rule", &request.rule_name))?;

        let customer = match request.customer.as_deref() {
            Some(id) => self
                .stores
                .business
                .get_customer(id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Customer", id))?,
            None => self
                .stores
                .business
                .first_customer_with_mobile()
                .await?
                .ok_or_else(|| ServiceError::validation("No customer with a mobile number to test with"))?,
        };
        let mobile = customer
            .mobile()
            .ok_or_else(|| ServiceError::validation(format!("Customer '{}' has no mobile number", customer.id)))?
            .to_string();

        let today = Utc::now().date_naive();
        let item_code = rule
            .filter()
            .ok()
            .and_then(|f| f.param("item_code"))
            .unwrap_or_else(|| "TEST-ITEM".to_string());
        let context = base_context(&customer.customer_name, &customer.id, &mobile, today)
            .with("invoice_no", "TEST-INV-0001")
            .with("amount", format_amount(1000.0))
            .with("due_date", today.to_string())
            .with("item_code", item_code);

        let message = self
            .renderer
            .render(&rule.message_template, &context)
            .map_err(|e| ServiceError::validation(e.to_string()))?;

        let delivery = self.channel.send(&mobile, &message).await;
        if let Err(e) = &delivery {
            warn!(rule = %rule.rule_name, customer = %customer.id, error = %e, "Test SMS failed");
        }
        Ok(TestRuleResponse {
            success: delivery.is_ok(),
            customer: Some(customer.id),
            mobile_no: Some(mobile),
            message: Some(message),
            error: delivery.err().map(|e| e.to_string()),
        })
    }

    // =========================================================================
    // Cycle
    // =========================================================================

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Evaluate every active rule as of `now`
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let today = now.date_naive();
        let rules = self.stores.rules.list_rules(true).await?;
        let mut report = CycleReport::default();

        for rule in rules {
            report.rules_evaluated += 1;
            if !rule.can_execute(today) {
                debug!(rule = %rule.rule_name, "Rule not due");
                continue;
            }

            match self.process_rule(&rule, now).await {
                Ok(outcome) => {
                    if let Err(e) = self.stores.rules.mark_rule_executed(rule.id, now).await {
                        warn!(rule = %rule.rule_name, rule_id = %rule.id, error = %e, "Failed to mark rule executed");
                    }
                    report.rules_executed += 1;
                    report.messages_created += outcome.created;
                    report.candidates_skipped += outcome.skipped;
                    info!(
                        rule = %rule.rule_name,
                        created = outcome.created,
                        skipped = outcome.skipped,
                        "Trigger rule executed"
                    );
                }
                Err(e) => {
                    report.rules_failed += 1;
                    if let Err(policy_err) = record_rule_failure(self.stores.rules.as_ref(), &rule, &e).await {
                        warn!(rule = %rule.rule_name, error = %policy_err, "Failed to record rule error");
                    }
                }
            }
        }

        info!(
            evaluated = report.rules_evaluated,
            executed = report.rules_executed,
            failed = report.rules_failed,
            created = report.messages_created,
            "Trigger cycle finished"
        );
        Ok(report)
    }

    /// Select, dedup, render and queue for one rule
    pub async fn process_rule(&self, rule: &TriggerRule, now: DateTime<Utc>) -> Result<RuleOutcome> {
        let filter = rule
            .filter()
            .with_context(|| format!("Rule '{}' has malformed conditions", rule.rule_name))?;
        let today = now.date_naive();
        let candidates = self.candidates(rule, &filter, today).await?;
        let mut outcome = RuleOutcome::default();

        for candidate in candidates {
            let query = dedup_query(rule.trigger_type, &candidate, now);
            if self.stores.messages.message_exists(&query).await? {
                outcome.skipped += 1;
                continue;
            }

            let message = match self.renderer.render(&rule.message_template, &candidate.context) {
                Ok(message) => message,
                Err(e) => {
                    warn!(rule = %rule.rule_name, customer = %candidate.customer, error = %e, "Skipping candidate");
                    outcome.skipped += 1;
                    continue;
                }
            };

            self.stores
                .messages
                .insert_message(NewScheduledSms {
                    customer: candidate.customer,
                    mobile_no: candidate.mobile_no,
                    message,
                    trigger_type: rule.trigger_type,
                    reference: candidate.reference,
                    scheduled_datetime: now,
                })
                .await?;
            outcome.created += 1;
        }

        Ok(outcome)
    }

    async fn candidates(&self, rule: &TriggerRule, filter: &Filter, today: NaiveDate) -> Result<Vec<Candidate>> {
        let business = &self.stores.business;
        let lookback = |default: i64| today - Duration::days(rule.effective_days_interval().unwrap_or(default));

        let candidates: Vec<Candidate> = match rule.trigger_type {
            TriggerType::InvoiceDue => business
                .overdue_invoices(lookback(7))
                .await?
                .iter()
                .map(|invoice| Candidate::for_invoice(invoice, today))
                .collect(),
            TriggerType::Birthday => customer_candidates(
                business.birthday_customers(today.month(), today.day()).await?,
                today,
            ),
            TriggerType::InactiveCustomer => {
                customer_candidates(business.inactive_customers(lookback(90)).await?, today)
            }
            TriggerType::RepurchasePromotion => {
                let Some(item_code) = filter.param("item_code") else {
                    warn!(rule = %rule.rule_name, "Repurchase rule has no item_code condition");
                    return Ok(Vec::new());
                };
                let buyers = business.recent_item_buyers(&item_code, lookback(30)).await?;
                customer_candidates(buyers, today)
                    .into_iter()
                    .map(|mut c| {
                        c.context.insert("item_code", item_code.as_str());
                        c
                    })
                    .collect()
            }
            TriggerType::CustomerType => {
                self.segment_candidates(rule, filter, CustomerField::CustomerType, today).await?
            }
            TriggerType::CustomerGroup => {
                self.segment_candidates(rule, filter, CustomerField::CustomerGroup, today).await?
            }
            TriggerType::PosInvoice | TriggerType::Custom => Vec::new(),
        };
        Ok(candidates)
    }

    /// Customers whose `field` equals the rule's condition value, narrowed by any
    /// other allow-listed condition fields
    async fn segment_candidates(
        &self,
        rule: &TriggerRule,
        filter: &Filter,
        field: CustomerField,
        today: NaiveDate,
    ) -> Result<Vec<Candidate>> {
        let Some(value) = filter.param(field.as_str()) else {
            warn!(rule = %rule.rule_name, field = field.as_str(), "Segment rule has no value for its field");
            return Ok(Vec::new());
        };

        let (mut predicates, ignored) = filter.customer_predicates(&[field]);
        if !ignored.is_empty() {
            debug!(rule = %rule.rule_name, ?ignored, "Ignoring non-customer condition fields");
        }
        predicates.push(CustomerPredicate::eq(field, value));
        predicates.push(CustomerPredicate::new(CustomerField::MobileNo, Operator::Ne, ""));

        let customers = self.stores.business.find_customers(&predicates).await?;
        Ok(customer_candidates(customers, today))
    }
}

fn customer_candidates(customers: Vec<Customer>, today: NaiveDate) -> Vec<Candidate> {
    customers
        .iter()
        .filter_map(|c| c.mobile().map(|mobile| Candidate::for_customer(c, mobile, today)))
        .collect()
}

fn dedup_query(trigger_type: TriggerType, candidate: &Candidate, now: DateTime<Utc>) -> DedupQuery {
    let today = now.date_naive();
    let (reference, since) = match trigger_type.dedup_window() {
        DedupWindow::Reference => (candidate.reference.clone(), None),
        DedupWindow::Today => (None, Some(start_of(today))),
        DedupWindow::Days(days) => (None, Some(start_of(today - Duration::days(days)))),
    };
    DedupQuery {
        customer: candidate.customer.clone(),
        trigger_type,
        reference,
        since,
    }
}

fn start_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::services::delivery::RetryPolicy;
    use crate::services::rate_limiter::InMemorySendLimiter;
    use crate::services::sms_transport::FakeSmsTransport;
    use crate::store::{MemoryStore, RuleStore};
    use crate::types::{Frequency, SalesInvoice, SmsStatus};

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<FakeSmsTransport>,
        engine: TriggerEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(FakeSmsTransport::new());
        let channel = DeliveryChannel::new(
            transport.clone(),
            Arc::new(InMemorySendLimiter::new(5, StdDuration::from_secs(3600))),
            RetryPolicy {
                max_attempts: 3,
                base_delay: StdDuration::ZERO,
            },
        );
        let engine = TriggerEngine::new(
            Stores::memory(store.clone()),
            Arc::new(MessageRenderer::new()),
            Arc::new(channel),
        );
        Fixture {
            store,
            transport,
            engine,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 8, 0, 0).unwrap()
    }

    fn customer(id: &str, mobile: Option<&str>) -> Customer {
        Customer {
            id: id.into(),
            customer_name: format!("Name {}", id),
            mobile_no: mobile.map(String::from),
            customer_type: Some("Company".into()),
            customer_group: Some("Retail".into()),
            territory: Some("Dhaka".into()),
            gender: None,
            religion: None,
            profession: None,
            date_of_birth: NaiveDate::from_ymd_opt(1988, 3, 20),
            sms_enabled: true,
        }
    }

    fn overdue_invoice(name: &str, customer: &str) -> SalesInvoice {
        SalesInvoice {
            name: name.into(),
            customer: customer.into(),
            posting_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            outstanding_amount: 1250.5,
            submitted: true,
            item_codes: vec!["SOAP-01".into()],
        }
    }

    fn request(name: &str, trigger_type: TriggerType, template: &str, conditions: Option<&str>) -> CreateRuleRequest {
        CreateRuleRequest {
            rule_name: name.into(),
            trigger_type,
            message_template: Some(template.into()),
            conditions: conditions.map(String::from),
            frequency: Frequency::Daily,
            days_interval: None,
        }
    }

    #[tokio::test]
    async fn invoice_due_creates_exactly_one_message_across_runs() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        f.store.add_invoice(overdue_invoice("SINV-1", "CUST-1"));
        let rule = f
            .engine
            .create_rule(request(
                "Overdue",
                TriggerType::InvoiceDue,
                "Dear {customer_name}, invoice {invoice_no} of {amount} was due {due_date}.",
                None,
            ))
            .await
            .unwrap();

        let first = f.engine.process_rule(&rule, now()).await.unwrap();
        let second = f.engine.process_rule(&rule, now()).await.unwrap();

        assert_eq!(first, RuleOutcome { created: 1, skipped: 0 });
        assert_eq!(second, RuleOutcome { created: 0, skipped: 1 });

        let messages = f.store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, SmsStatus::Draft);
        assert_eq!(messages[0].reference_name.as_deref(), Some("SINV-1"));
        assert_eq!(
            messages[0].message,
            "Dear Name CUST-1, invoice SINV-1 of 1250.50 was due 2026-03-01."
        );
    }

    #[tokio::test]
    async fn invoice_not_yet_past_interval_is_ignored() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        let mut invoice = overdue_invoice("SINV-2", "CUST-1");
        invoice.due_date = NaiveDate::from_ymd_opt(2026, 3, 18).unwrap();
        f.store.add_invoice(invoice);
        let rule = f
            .engine
            .create_rule(request("Overdue", TriggerType::InvoiceDue, "Pay {invoice_no}", None))
            .await
            .unwrap();

        let outcome = f.engine.process_rule(&rule, now()).await.unwrap();
        assert_eq!(outcome.created, 0);
    }

    #[tokio::test]
    async fn cycle_marks_daily_rule_and_blocks_same_day_rerun() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        f.engine
            .create_rule(request("Birthdays", TriggerType::Birthday, "Happy birthday {customer_name}!", None))
            .await
            .unwrap();

        let report = f.engine.run_cycle_at(now()).await.unwrap();
        assert_eq!(report.rules_executed, 1);
        assert_eq!(report.messages_created, 1);

        let rule = f.store.get_rule_by_name("Birthdays").await.unwrap().unwrap();
        assert_eq!(rule.execution_count, 1);
        assert!(!rule.can_execute(now().date_naive()));

        let again = f.engine.run_cycle_at(now() + Duration::hours(2)).await.unwrap();
        assert_eq!(again.rules_executed, 0);
        assert_eq!(f.store.messages().len(), 1);
    }

    #[tokio::test]
    async fn missing_item_code_yields_no_candidates() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        f.store.add_invoice(overdue_invoice("SINV-1", "CUST-1"));
        let rule = f
            .engine
            .create_rule(request(
                "Reorder",
                TriggerType::RepurchasePromotion,
                "Reorder {item_code}",
                Some(r#"{"customer_group": "Retail"}"#),
            ))
            .await
            .unwrap();

        let outcome = f.engine.process_rule(&rule, now()).await.unwrap();
        assert_eq!(outcome, RuleOutcome::default());
    }

    #[tokio::test]
    async fn repurchase_uses_item_code_in_context() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        let mut invoice = overdue_invoice("SINV-1", "CUST-1");
        invoice.posting_date = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        f.store.add_invoice(invoice);
        let rule = f
            .engine
            .create_rule(request(
                "Reorder",
                TriggerType::RepurchasePromotion,
                "Hi {customer_name}, time to reorder {item_code}!",
                Some(r#"{"item_code": "SOAP-01"}"#),
            ))
            .await
            .unwrap();

        f.engine.process_rule(&rule, now()).await.unwrap();
        assert_eq!(f.store.messages()[0].message, "Hi Name CUST-1, time to reorder SOAP-01!");
    }

    #[tokio::test]
    async fn segment_rule_applies_extra_conditions() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        let mut other_territory = customer("CUST-2", Some("01812345678"));
        other_territory.territory = Some("Khulna".into());
        f.store.add_customer(other_territory);
        f.store.add_customer(customer("CUST-3", None));

        let rule = f
            .engine
            .create_rule(request(
                "Retail Dhaka",
                TriggerType::CustomerGroup,
                "Deals for {customer_name}",
                Some(r#"{"customer_group": "Retail", "territory": "Dhaka", "campaign": "spring"}"#),
            ))
            .await
            .unwrap();

        let outcome = f.engine.process_rule(&rule, now()).await.unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(f.store.messages()[0].customer, "CUST-1");
    }

    #[tokio::test]
    async fn render_failure_skips_only_that_candidate() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        let rule = f
            .engine
            .create_rule(request("Birthdays", TriggerType::Birthday, "Hi {nickname}", None))
            .await
            .unwrap();

        let outcome = f.engine.process_rule(&rule, now()).await.unwrap();
        assert_eq!(outcome, RuleOutcome { created: 0, skipped: 1 });
    }

    #[tokio::test]
    async fn malformed_stored_conditions_fail_the_rule_and_count_errors() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        let mut rule = f
            .engine
            .create_rule(request("Broken", TriggerType::CustomerType, "Hi", None))
            .await
            .unwrap();
        rule.conditions = Some(serde_json::json!(42));
        f.store.put_rule(rule.clone());

        for run in 1..=5 {
            let report = f.engine.run_cycle_at(now()).await.unwrap();
            assert_eq!(report.rules_failed, 1, "run {}", run);
            let stored = f.store.get_rule(rule.id).await.unwrap().unwrap();
            assert_eq!(stored.error_count, run);
            assert_eq!(stored.is_active, run < 5);
        }

        let report = f.engine.run_cycle_at(now()).await.unwrap();
        assert_eq!(report.rules_evaluated, 0);
    }

    #[tokio::test]
    async fn one_failing_rule_does_not_block_others() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        let mut broken = f
            .engine
            .create_rule(request("Broken", TriggerType::CustomerType, "Hi", None))
            .await
            .unwrap();
        broken.conditions = Some(serde_json::json!("not a filter"));
        f.store.put_rule(broken);
        f.engine
            .create_rule(request("Birthdays", TriggerType::Birthday, "Happy birthday!", None))
            .await
            .unwrap();

        let report = f.engine.run_cycle_at(now()).await.unwrap();
        assert_eq!(report.rules_failed, 1);
        assert_eq!(report.rules_executed, 1);
        assert_eq!(report.messages_created, 1);
    }

    /// Rule store that cannot record executions of one rule
    struct UnmarkableRule {
        inner: Arc<MemoryStore>,
        rule_name: &'static str,
    }

    #[async_trait]
    impl RuleStore for UnmarkableRule {
        async fn create_rule(&self, rule: NewTriggerRule) -> Result<TriggerRule> {
            self.inner.create_rule(rule).await
        }

        async fn get_rule(&self, id: uuid::Uuid) -> Result<Option<TriggerRule>> {
            self.inner.get_rule(id).await
        }

        async fn get_rule_by_name(&self, rule_name: &str) -> Result<Option<TriggerRule>> {
            self.inner.get_rule_by_name(rule_name).await
        }

        async fn list_rules(&self, active_only: bool) -> Result<Vec<TriggerRule>> {
            self.inner.list_rules(active_only).await
        }

        async fn set_rule_active(&self, id: uuid::Uuid, is_active: bool) -> Result<Option<TriggerRule>> {
            self.inner.set_rule_active(id, is_active).await
        }

        async fn mark_rule_executed(&self, id: uuid::Uuid, at: DateTime<Utc>) -> Result<()> {
            let rule = self.inner.get_rule(id).await?;
            if rule.map_or(false, |r| r.rule_name == self.rule_name) {
                anyhow::bail!("connection reset");
            }
            self.inner.mark_rule_executed(id, at).await
        }

        async fn record_rule_error(&self, id: uuid::Uuid, disable_at: i32) -> Result<Option<TriggerRule>> {
            self.inner.record_rule_error(id, disable_at).await
        }
    }

    #[tokio::test]
    async fn failed_execution_bookkeeping_does_not_stop_the_cycle() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("01712345678")));
        let mut stores = Stores::memory(f.store.clone());
        stores.rules = Arc::new(UnmarkableRule {
            inner: f.store.clone(),
            rule_name: "Birthdays A",
        });
        let engine = TriggerEngine::new(
            stores,
            Arc::new(MessageRenderer::new()),
            Arc::new(DeliveryChannel::new(
                f.transport.clone(),
                Arc::new(InMemorySendLimiter::new(5, StdDuration::from_secs(3600))),
                RetryPolicy {
                    max_attempts: 1,
                    base_delay: StdDuration::ZERO,
                },
            )),
        );
        engine
            .create_rule(request("Birthdays A", TriggerType::Birthday, "Happy birthday!", None))
            .await
            .unwrap();
        engine
            .create_rule(request("Inactive B", TriggerType::InactiveCustomer, "We miss you!", None))
            .await
            .unwrap();

        let report = engine.run_cycle_at(now()).await.unwrap();
        assert_eq!(report.rules_executed, 2);
        assert_eq!(report.messages_created, 2);

        let a = f.store.get_rule_by_name("Birthdays A").await.unwrap().unwrap();
        assert_eq!(a.execution_count, 0);
        let b = f.store.get_rule_by_name("Inactive B").await.unwrap().unwrap();
        assert_eq!(b.execution_count, 1);
        assert_eq!(b.last_execution, Some(now()));
    }

    #[tokio::test]
    async fn create_rule_validates_input() {
        let f = fixture();
        let bad_json = request("Bad", TriggerType::CustomerType, "Hi", Some("{not json"));
        assert!(matches!(f.engine.create_rule(bad_json).await, Err(ServiceError::Validation(_))));

        let mut weekly = request("Weekly", TriggerType::InactiveCustomer, "Hi", None);
        weekly.frequency = Frequency::Weekly;
        assert!(matches!(f.engine.create_rule(weekly).await, Err(ServiceError::Validation(_))));

        let mut defaulted = request("Default", TriggerType::Birthday, "", None);
        defaulted.message_template = None;
        let rule = f.engine.create_rule(defaulted).await.unwrap();
        assert!(rule.message_template.starts_with("Happy Birthday"));

        let duplicate = request("Default", TriggerType::Birthday, "Hi", None);
        assert!(matches!(f.engine.create_rule(duplicate).await, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn toggle_flips_active_state() {
        let f = fixture();
        f.engine
            .create_rule(request("Birthdays", TriggerType::Birthday, "Hi", None))
            .await
            .unwrap();

        assert!(!f.engine.set_rule_active("Birthdays", None).await.unwrap().is_active);
        assert!(f.engine.set_rule_active("Birthdays", None).await.unwrap().is_active);
        assert!(!f.engine.set_rule_active("Birthdays", Some(false)).await.unwrap().is_active);
        assert!(matches!(
            f.engine.set_rule_active("Missing", Some(true)).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rule_renders_sample_and_sends() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", Some("+880 1712-345678")));
        f.engine
            .create_rule(request(
                "Overdue",
                TriggerType::InvoiceDue,
                "Dear {customer_name}, invoice {invoice_no} of {amount}",
                None,
            ))
            .await
            .unwrap();

        let response = f
            .engine
            .test_rule(TestRuleRequest {
                rule_name: "Overdue".into(),
                customer: None,
            })
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.customer.as_deref(), Some("CUST-1"));
        assert_eq!(
            response.message.as_deref(),
            Some("Dear Name CUST-1, invoice TEST-INV-0001 of 1000.00")
        );
        assert_eq!(f.transport.calls()[0].0, "8801712345678");
        assert!(f.store.messages().is_empty());
    }

    #[test]
    fn dedup_windows_translate_to_queries() {
        let candidate = Candidate {
            customer: "CUST-1".into(),
            mobile_no: "01712345678".into(),
            reference: Some(SmsReference::new(INVOICE_DOCTYPE, "SINV-1")),
            context: RenderContext::new(),
        };

        let invoice = dedup_query(TriggerType::InvoiceDue, &candidate, now());
        assert!(invoice.since.is_none());
        assert_eq!(invoice.reference, candidate.reference);

        let birthday = dedup_query(TriggerType::Birthday, &candidate, now());
        assert_eq!(birthday.since, Some(Utc.with_ymd_and_hms(2026, 3, 20, 0, 0, 0).unwrap()));
        assert!(birthday.reference.is_none());

        let promo = dedup_query(TriggerType::RepurchasePromotion, &candidate, now());
        assert_eq!(promo.since, Some(Utc.with_ymd_and_hms(2026, 3, 13, 0, 0, 0).unwrap()));
    }
}
