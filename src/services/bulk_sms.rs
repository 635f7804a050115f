//! Bulk SMS campaigns
//!
//! Campaigns hold an explicit recipient list built from a customer filter (or
//! set by hand). Sending walks the list in order and persists each recipient
//! before moving on, so an interrupted or retried send only touches recipients
//! that are still Pending.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::delivery::{normalize_number, DeliveryChannel};
use super::error::{ServiceError, ServiceResult};
use super::notifier::Notifier;
use super::template::{MessageRenderer, RenderContext};
use crate::store::{BusinessData, CampaignStore};
use crate::types::{
    BulkSms, BulkSmsLog, BulkSmsProgress, BulkSmsRecipient, BulkSmsStatus, CampaignCounts,
    CreateBulkSmsRequest, Filter, FilterBy, ManualRecipient, NewBulkSms, RecipientStatus,
    RecipientUpdate,
};

/// Pause between two delivery attempts of one campaign
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_secs(3);

pub const PROGRESS_EVENT: &str = "bulk_sms_progress";
pub const COMPLETED_EVENT: &str = "bulk_sms_completed";

pub struct BulkSmsProcessor {
    campaigns: Arc<dyn CampaignStore>,
    business: Arc<dyn BusinessData>,
    channel: Arc<DeliveryChannel>,
    renderer: Arc<MessageRenderer>,
    notifier: Arc<dyn Notifier>,
    send_delay: Duration,
}

impl BulkSmsProcessor {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        business: Arc<dyn BusinessData>,
        channel: Arc<DeliveryChannel>,
        renderer: Arc<MessageRenderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            campaigns,
            business,
            channel,
            renderer,
            notifier,
            send_delay: DEFAULT_SEND_DELAY,
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    async fn load(&self, id: Uuid) -> ServiceResult<BulkSms> {
        self.campaigns
            .get_campaign(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Bulk SMS", id))
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<BulkSms> {
        self.load(id).await
    }

    pub async fn logs(&self, id: Uuid) -> ServiceResult<Vec<BulkSmsLog>> {
        self.load(id).await?;
        Ok(self.campaigns.list_logs(id).await?)
    }

    // =========================================================================
    // Draft editing
    // =========================================================================

    /// Validate and store a Draft campaign, then load its recipients
    pub async fn create_campaign(&self, request: CreateBulkSmsRequest, owner: Option<String>) -> ServiceResult<BulkSms> {
        let campaign_name = request.campaign_name.trim().to_string();
        if campaign_name.is_empty() {
            return Err(ServiceError::validation("Campaign name is required"));
        }
        if request.message.trim().is_empty() {
            return Err(ServiceError::validation("Message is required"));
        }
        if !request.send_immediately && request.scheduled_datetime.is_none() {
            return Err(ServiceError::validation(
                "Please set scheduled date time or check send immediately",
            ));
        }

        let custom_filter = match request.custom_filter.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Filter::parse(raw)?;
                Some(serde_json::from_str(raw).map_err(|e| ServiceError::validation(e.to_string()))?)
            }
            _ => None,
        };
        if request.filter_by == FilterBy::CustomFilter && custom_filter.is_none() {
            return Err(ServiceError::validation("Custom filter is required"));
        }

        let campaign = self
            .campaigns
            .insert_campaign(NewBulkSms {
                campaign_name,
                message: request.message,
                filter_by: request.filter_by,
                filter_value: request.filter_value,
                custom_filter,
                send_immediately: request.send_immediately,
                scheduled_datetime: request.scheduled_datetime,
                owner,
            })
            .await?;
        info!(bulk_sms = %campaign.id, name = %campaign.campaign_name, "Bulk SMS created");

        if campaign.filter_by == FilterBy::Manual {
            return Ok(campaign);
        }
        self.load_recipients(campaign.id, false).await
    }

    /// Rebuild the recipient list from the campaign filter. A manually edited
    /// list is kept unless `force` is set.
    pub async fn load_recipients(&self, id: Uuid, force: bool) -> ServiceResult<BulkSms> {
        let campaign = self.load(id).await?;
        ensure_draft(&campaign)?;

        if campaign.filter_by == FilterBy::Manual || (campaign.recipients_edited && !force) {
            info!(bulk_sms = %id, "Keeping manually edited recipients");
            return Ok(campaign);
        }

        let predicates = campaign.audience_predicates()?;
        let customers = self.business.find_customers(&predicates).await?;
        let recipients: Vec<BulkSmsRecipient> = customers
            .iter()
            .filter(|c| c.mobile().is_some())
            .enumerate()
            .map(|(position, c)| BulkSmsRecipient::pending(position as i32, c))
            .collect();

        let count = recipients.len();
        if !self.campaigns.replace_recipients(id, recipients, false).await? {
            return Err(ServiceError::conflict("Campaign left draft while loading recipients"));
        }
        info!(bulk_sms = %id, recipients = count, "Recipients loaded");
        self.load(id).await
    }

    /// Replace recipients by hand; later filter loads leave them alone
    pub async fn set_recipients(&self, id: Uuid, manual: Vec<ManualRecipient>) -> ServiceResult<BulkSms> {
        let campaign = self.load(id).await?;
        ensure_draft(&campaign)?;

        let mut recipients = Vec::with_capacity(manual.len());
        for (position, entry) in manual.into_iter().enumerate() {
            if entry.customer.trim().is_empty() {
                return Err(ServiceError::validation(format!("Recipient #{} has no customer", position + 1)));
            }
            let customer_name = match entry.customer_name.filter(|n| !n.trim().is_empty()) {
                Some(name) => name,
                None => self
                    .business
                    .get_customer(&entry.customer)
                    .await?
                    .map(|c| c.customer_name)
                    .unwrap_or_else(|| entry.customer.clone()),
            };
            recipients.push(BulkSmsRecipient {
                position: position as i32,
                customer: entry.customer,
                customer_name,
                mobile_no: entry.mobile_no.trim().to_string(),
                status: RecipientStatus::Pending,
                sent_datetime: None,
                error_message: None,
            });
        }

        if !self.campaigns.replace_recipients(id, recipients, true).await? {
            return Err(ServiceError::conflict("Campaign left draft while editing recipients"));
        }
        self.load(id).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Draft → Queued (send now) or Scheduled
    pub async fn submit(&self, id: Uuid) -> ServiceResult<BulkSms> {
        let campaign = self.load(id).await?;
        ensure_draft(&campaign)?;
        if campaign.recipients.is_empty() {
            return Err(ServiceError::validation("Campaign has no recipients"));
        }

        let target = if campaign.send_immediately {
            BulkSmsStatus::Queued
        } else {
            BulkSmsStatus::Scheduled
        };
        if !self
            .campaigns
            .transition_campaign(id, &[BulkSmsStatus::Draft], target, Utc::now())
            .await?
        {
            return Err(ServiceError::conflict("Campaign was submitted concurrently"));
        }

        info!(bulk_sms = %id, status = target.as_str(), "Bulk SMS submitted");
        self.load(id).await
    }

    /// Failed recipients back to Pending and the campaign back to Queued.
    /// Returns how many recipients will be retried.
    pub async fn retry_failed(&self, id: Uuid) -> ServiceResult<u64> {
        let campaign = self.load(id).await?;
        if campaign.status != BulkSmsStatus::Failed {
            return Err(ServiceError::validation("Can only retry a failed campaign"));
        }
        if !campaign
            .recipients
            .iter()
            .any(|r| matches!(r.status, RecipientStatus::Failed | RecipientStatus::Pending))
        {
            return Err(ServiceError::validation("No failed SMS to retry"));
        }

        if !self
            .campaigns
            .transition_campaign(id, &[BulkSmsStatus::Failed], BulkSmsStatus::Queued, Utc::now())
            .await?
        {
            return Err(ServiceError::conflict("Campaign changed state before retry"));
        }
        let reset = self.campaigns.reset_failed_recipients(id).await?;

        info!(bulk_sms = %id, recipients = reset, "Retrying failed SMS");
        Ok(reset)
    }

    /// Scheduled campaigns due at `now` → Queued. Returns the promoted ids.
    pub async fn promote_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut promoted = Vec::new();
        for id in self.campaigns.list_due_scheduled(now).await? {
            if self
                .campaigns
                .transition_campaign(id, &[BulkSmsStatus::Scheduled], BulkSmsStatus::Queued, now)
                .await?
            {
                info!(bulk_sms = %id, "Scheduled campaign queued");
                promoted.push(id);
            }
        }
        Ok(promoted)
    }

    /// Campaigns whose send job is lost: Sending or Queued ones untouched since
    /// `now - stale_after` are (re)stamped Queued at `now`, so the next send
    /// resumes their Pending recipients. Every returned id needs a fresh job.
    pub async fn recover_stalled(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> Result<Vec<Uuid>> {
        let before = now - stale_after;
        let mut requeue = Vec::new();

        for status in [BulkSmsStatus::Sending, BulkSmsStatus::Queued] {
            for id in self.campaigns.list_stalled_campaigns(status, before).await? {
                if self
                    .campaigns
                    .transition_campaign(id, &[status], BulkSmsStatus::Queued, now)
                    .await?
                {
                    warn!(bulk_sms = %id, was = status.as_str(), "Stalled campaign requeued");
                    requeue.push(id);
                }
            }
        }
        Ok(requeue)
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Deliver to every Pending recipient of a Queued campaign
    pub async fn send(&self, id: Uuid) -> ServiceResult<CampaignCounts> {
        let campaign = self.load(id).await?;
        if campaign.status != BulkSmsStatus::Queued {
            return Err(ServiceError::conflict(format!(
                "Campaign is {}, not queued",
                campaign.status.as_str()
            )));
        }
        if !self
            .campaigns
            .transition_campaign(id, &[BulkSmsStatus::Queued], BulkSmsStatus::Sending, Utc::now())
            .await?
        {
            return Err(ServiceError::conflict("Campaign is already being sent"));
        }
        info!(bulk_sms = %id, recipients = campaign.recipients.len(), "Bulk SMS sending started");

        let mut counts = CampaignCounts::from_recipients(&campaign.recipients);
        let mut remaining = campaign
            .recipients
            .iter()
            .filter(|r| r.status == RecipientStatus::Pending)
            .count();

        for recipient in campaign.recipients.iter().filter(|r| r.status == RecipientStatus::Pending) {
            remaining -= 1;
            let (update, message, attempted) = self.deliver(&campaign, recipient).await;

            match self.campaigns.update_recipient(id, recipient.position, &update).await {
                Ok(true) => match update.status {
                    RecipientStatus::Sent => counts.success += 1,
                    _ => counts.failed += 1,
                },
                Ok(false) => warn!(bulk_sms = %id, position = recipient.position, "Recipient no longer pending"),
                Err(e) => {
                    // Stays Pending in storage; counted so the campaign can end as Failed
                    error!(bulk_sms = %id, position = recipient.position, error = %e, "Failed to record recipient outcome");
                    counts.failed += 1;
                }
            }

            let log = BulkSmsLog {
                id: Uuid::new_v4(),
                bulk_sms: id,
                customer: recipient.customer.clone(),
                customer_name: recipient.customer_name.clone(),
                mobile_no: recipient.mobile_no.clone(),
                message,
                status: update.status,
                sent_datetime: update.sent_datetime,
                error_message: update.error_message.clone(),
                created_at: Utc::now(),
            };
            if let Err(e) = self.campaigns.append_log(&log).await {
                error!(bulk_sms = %id, customer = %recipient.customer, error = %e, "Failed to append campaign log");
            }
            if let Err(e) = self.campaigns.update_campaign_counts(id, counts).await {
                error!(bulk_sms = %id, error = %e, "Failed to update campaign counts");
            }

            let progress = BulkSmsProgress {
                bulk_sms: id,
                processed: counts.success + counts.failed,
                total: counts.total,
                success: counts.success,
                failed: counts.failed,
            };
            self.notify(&campaign, PROGRESS_EVENT, serde_json::to_value(&progress).unwrap_or_default())
                .await;

            if attempted && remaining > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
        }

        let status = if counts.failed == 0 {
            BulkSmsStatus::Completed
        } else {
            BulkSmsStatus::Failed
        };
        if let Err(e) = self.campaigns.update_campaign_counts(id, counts).await {
            error!(bulk_sms = %id, error = %e, "Failed to update campaign counts");
        }
        // On error the campaign stays Sending until recover_stalled requeues it
        self.campaigns
            .transition_campaign(id, &[BulkSmsStatus::Sending], status, Utc::now())
            .await?;

        info!(
            bulk_sms = %id,
            status = status.as_str(),
            success = counts.success,
            failed = counts.failed,
            "Bulk SMS finished"
        );
        self.notify(
            &campaign,
            COMPLETED_EVENT,
            json!({ "success": counts.success, "failed": counts.failed }),
        )
        .await;
        Ok(counts)
    }

    /// Outcome for one Pending recipient, the text logged for it, and whether
    /// the transport was involved
    async fn deliver(&self, campaign: &BulkSms, recipient: &BulkSmsRecipient) -> (RecipientUpdate, String, bool) {
        if let Err(e) = normalize_number(&recipient.mobile_no) {
            return (RecipientUpdate::invalid(e.to_string()), campaign.message.clone(), false);
        }

        let context = RenderContext::new()
            .with("customer_name", recipient.customer_name.as_str())
            .with("customer", recipient.customer.as_str())
            .with("mobile_no", recipient.mobile_no.as_str())
            .with("campaign_name", campaign.campaign_name.as_str())
            .with("today", Utc::now().date_naive().to_string());
        let text = match self.renderer.render(&campaign.message, &context) {
            Ok(text) => text,
            Err(e) => {
                warn!(bulk_sms = %campaign.id, customer = %recipient.customer, error = %e, "Campaign message render failed");
                return (RecipientUpdate::failed(e.to_string()), campaign.message.clone(), false);
            }
        };

        let update = match self.channel.send(&recipient.mobile_no, &text).await {
            Ok(_) => RecipientUpdate::sent(Utc::now()),
            Err(e) => {
                warn!(bulk_sms = %campaign.id, customer = %recipient.customer, error = %e, "Campaign SMS failed");
                RecipientUpdate::failed(e.to_string())
            }
        };
        (update, text, true)
    }

    async fn notify(&self, campaign: &BulkSms, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.notifier.publish(event, payload, campaign.owner.as_deref()).await {
            warn!(bulk_sms = %campaign.id, event, error = %e, "Failed to publish realtime event");
        }
    }
}

fn ensure_draft(campaign: &BulkSms) -> ServiceResult<()> {
    if campaign.status != BulkSmsStatus::Draft {
        return Err(ServiceError::conflict(format!(
            "Campaign is {}, recipients can only change while draft",
            campaign.status.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::services::delivery::RetryPolicy;
    use crate::services::notifier::FakeNotifier;
    use crate::services::rate_limiter::InMemorySendLimiter;
    use crate::services::sms_transport::{FakeSmsTransport, TransportError};
    use crate::store::MemoryStore;
    use crate::types::Customer;

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<FakeSmsTransport>,
        notifier: Arc<FakeNotifier>,
        processor: BulkSmsProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(FakeSmsTransport::new());
        let notifier = Arc::new(FakeNotifier::new());
        let channel = DeliveryChannel::new(
            transport.clone(),
            Arc::new(InMemorySendLimiter::new(5, Duration::from_secs(3600))),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
            },
        );
        let processor = BulkSmsProcessor::new(
            store.clone(),
            store.clone(),
            Arc::new(channel),
            Arc::new(MessageRenderer::new()),
            notifier.clone(),
        )
        .with_send_delay(Duration::ZERO);
        Fixture {
            store,
            transport,
            notifier,
            processor,
        }
    }

    fn customer(id: &str, mobile: &str, group: &str) -> Customer {
        Customer {
            id: id.into(),
            customer_name: format!("Name {}", id),
            mobile_no: Some(mobile.into()),
            customer_type: None,
            customer_group: Some(group.into()),
            territory: None,
            gender: None,
            religion: None,
            profession: None,
            date_of_birth: None,
            sms_enabled: true,
        }
    }

    fn create_request(filter_by: FilterBy, filter_value: Option<&str>) -> CreateBulkSmsRequest {
        CreateBulkSmsRequest {
            campaign_name: "Eid Sale".into(),
            message: "Hi {customer_name}, {campaign_name} starts today!".into(),
            filter_by,
            filter_value: filter_value.map(String::from),
            custom_filter: None,
            send_immediately: true,
            scheduled_datetime: None,
        }
    }

    async fn queued_campaign(f: &Fixture) -> BulkSms {
        f.store.add_customer(customer("CUST-1", "01711111111", "Retail"));
        f.store.add_customer(customer("CUST-2", "01722222222", "Retail"));
        f.store.add_customer(customer("CUST-3", "01733333333", "Retail"));
        let campaign = f
            .processor
            .create_campaign(create_request(FilterBy::CustomerGroup, Some("Retail")), Some("manager@shop".into()))
            .await
            .unwrap();
        f.processor.submit(campaign.id).await.unwrap()
    }

    #[tokio::test]
    async fn partial_failure_then_retry_touches_only_failed() {
        let f = fixture();
        let campaign = queued_campaign(&f).await;
        assert_eq!(campaign.status, BulkSmsStatus::Queued);
        f.transport.fail_number("01722222222", TransportError::Rejected("DND".into()));

        let counts = f.processor.send(campaign.id).await.unwrap();
        assert_eq!((counts.total, counts.success, counts.failed), (3, 2, 1));

        let stored = f.processor.get(campaign.id).await.unwrap();
        assert_eq!(stored.status, BulkSmsStatus::Failed);
        assert_eq!((stored.success_count, stored.failed_count), (2, 1));
        assert!(stored.started_at.is_some() && stored.completed_at.is_some());
        assert_eq!(f.processor.logs(campaign.id).await.unwrap().len(), 3);
        assert_eq!(f.notifier.events(PROGRESS_EVENT).len(), 3);

        let completed = f.notifier.events(COMPLETED_EVENT);
        assert_eq!(completed[0].payload, json!({ "success": 2, "failed": 1 }));
        assert_eq!(completed[0].target_user.as_deref(), Some("manager@shop"));

        assert_eq!(f.processor.retry_failed(campaign.id).await.unwrap(), 1);
        let calls_before = f.transport.call_count();
        let counts = f.processor.send(campaign.id).await.unwrap();

        assert_eq!(f.transport.call_count(), calls_before + 1);
        assert_eq!(f.transport.calls().last().unwrap().0, "01722222222");
        assert_eq!((counts.success, counts.failed), (2, 1));
        assert_eq!(f.processor.logs(campaign.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn stalled_send_is_requeued_and_resumes_pending_only() {
        let f = fixture();
        let campaign = queued_campaign(&f).await;
        let crashed_at = Utc::now() - ChronoDuration::hours(2);
        f.store
            .transition_campaign(campaign.id, &[BulkSmsStatus::Queued], BulkSmsStatus::Sending, crashed_at)
            .await
            .unwrap();
        f.store
            .update_recipient(campaign.id, 0, &RecipientUpdate::sent(crashed_at))
            .await
            .unwrap();

        assert!(matches!(f.processor.send(campaign.id).await, Err(ServiceError::Conflict(_))));

        let requeued = f
            .processor
            .recover_stalled(Utc::now(), ChronoDuration::minutes(30))
            .await
            .unwrap();
        assert_eq!(requeued, vec![campaign.id]);
        assert_eq!(f.processor.get(campaign.id).await.unwrap().status, BulkSmsStatus::Queued);

        let counts = f.processor.send(campaign.id).await.unwrap();
        assert_eq!((counts.total, counts.success, counts.failed), (3, 3, 0));
        assert_eq!(f.transport.call_count(), 2);
        assert!(f.transport.calls().iter().all(|(to, _)| to != "01711111111"));
        assert_eq!(f.processor.get(campaign.id).await.unwrap().status, BulkSmsStatus::Completed);
    }

    #[tokio::test]
    async fn only_campaigns_idle_past_threshold_are_recovered() {
        let f = fixture();
        let queued = queued_campaign(&f).await;
        let sending = f
            .processor
            .create_campaign(create_request(FilterBy::All, None), None)
            .await
            .unwrap();
        f.processor.submit(sending.id).await.unwrap();
        f.store
            .transition_campaign(sending.id, &[BulkSmsStatus::Queued], BulkSmsStatus::Sending, Utc::now())
            .await
            .unwrap();

        let now = Utc::now();
        assert!(f.processor.recover_stalled(now, ChronoDuration::minutes(30)).await.unwrap().is_empty());

        // A Queued campaign whose job never arrived is requeued too
        let later = now + ChronoDuration::hours(1);
        let requeued = f.processor.recover_stalled(later, ChronoDuration::minutes(30)).await.unwrap();
        assert_eq!(requeued.len(), 2);
        assert!(requeued.contains(&queued.id) && requeued.contains(&sending.id));
        assert_eq!(f.processor.get(sending.id).await.unwrap().status, BulkSmsStatus::Queued);

        // Requeueing restamps the campaigns, so the next tick leaves them alone
        assert!(f.processor.recover_stalled(later, ChronoDuration::minutes(30)).await.unwrap().is_empty());
    }

    /// Campaign store whose audit log and counters are unavailable
    struct BrokenBookkeeping(Arc<MemoryStore>);

    #[async_trait]
    impl CampaignStore for BrokenBookkeeping {
        async fn insert_campaign(&self, campaign: NewBulkSms) -> Result<BulkSms> {
            self.0.insert_campaign(campaign).await
        }

        async fn get_campaign(&self, id: Uuid) -> Result<Option<BulkSms>> {
            self.0.get_campaign(id).await
        }

        async fn replace_recipients(&self, id: Uuid, recipients: Vec<BulkSmsRecipient>, edited: bool) -> Result<bool> {
            self.0.replace_recipients(id, recipients, edited).await
        }

        async fn transition_campaign(
            &self,
            id: Uuid,
            from: &[BulkSmsStatus],
            to: BulkSmsStatus,
            at: DateTime<Utc>,
        ) -> Result<bool> {
            self.0.transition_campaign(id, from, to, at).await
        }

        async fn update_recipient(&self, id: Uuid, position: i32, update: &RecipientUpdate) -> Result<bool> {
            if position == 1 {
                anyhow::bail!("connection reset");
            }
            self.0.update_recipient(id, position, update).await
        }

        async fn update_campaign_counts(&self, _id: Uuid, _counts: CampaignCounts) -> Result<()> {
            anyhow::bail!("connection reset")
        }

        async fn reset_failed_recipients(&self, id: Uuid) -> Result<u64> {
            self.0.reset_failed_recipients(id).await
        }

        async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
            self.0.list_due_scheduled(now).await
        }

        async fn list_stalled_campaigns(&self, status: BulkSmsStatus, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
            self.0.list_stalled_campaigns(status, before).await
        }

        async fn append_log(&self, _log: &BulkSmsLog) -> Result<()> {
            anyhow::bail!("connection reset")
        }

        async fn list_logs(&self, id: Uuid) -> Result<Vec<BulkSmsLog>> {
            self.0.list_logs(id).await
        }
    }

    #[tokio::test]
    async fn bookkeeping_errors_still_finish_the_campaign() {
        let f = fixture();
        let campaign = queued_campaign(&f).await;
        let processor = BulkSmsProcessor::new(
            Arc::new(BrokenBookkeeping(f.store.clone())),
            f.store.clone(),
            Arc::new(DeliveryChannel::new(
                f.transport.clone(),
                Arc::new(InMemorySendLimiter::new(5, Duration::from_secs(3600))),
                RetryPolicy {
                    max_attempts: 1,
                    base_delay: Duration::ZERO,
                },
            )),
            Arc::new(MessageRenderer::new()),
            f.notifier.clone(),
        )
        .with_send_delay(Duration::ZERO);

        let counts = processor.send(campaign.id).await.unwrap();
        assert_eq!(f.transport.call_count(), 3);
        assert_eq!((counts.success, counts.failed), (2, 1));

        // The unrecorded recipient stays Pending and is picked up by a retry
        let stored = f.processor.get(campaign.id).await.unwrap();
        assert_eq!(stored.status, BulkSmsStatus::Failed);
        assert_eq!(stored.recipients[1].status, RecipientStatus::Pending);
        assert_eq!(f.processor.retry_failed(campaign.id).await.unwrap(), 0);
        f.processor.send(campaign.id).await.unwrap();
        assert_eq!(f.processor.get(campaign.id).await.unwrap().status, BulkSmsStatus::Completed);
    }

    #[tokio::test]
    async fn retry_after_fix_completes_campaign() {
        let f = fixture();
        let campaign = queued_campaign(&f).await;
        f.transport.fail_next([TransportError::Rejected("blocked".into())]);

        f.processor.send(campaign.id).await.unwrap();
        f.processor.retry_failed(campaign.id).await.unwrap();
        let counts = f.processor.send(campaign.id).await.unwrap();

        assert_eq!((counts.success, counts.failed), (3, 0));
        let stored = f.processor.get(campaign.id).await.unwrap();
        assert_eq!(stored.status, BulkSmsStatus::Completed);
        assert_eq!(stored.success_rate, Some(100.0));
    }

    #[tokio::test]
    async fn invalid_numbers_are_marked_and_never_sent() {
        let f = fixture();
        let campaign = f
            .processor
            .create_campaign(create_request(FilterBy::Manual, None), None)
            .await
            .unwrap();
        f.processor
            .set_recipients(
                campaign.id,
                vec![
                    ManualRecipient {
                        customer: "CUST-1".into(),
                        customer_name: Some("Karim".into()),
                        mobile_no: "01711111111".into(),
                    },
                    ManualRecipient {
                        customer: "CUST-9".into(),
                        customer_name: None,
                        mobile_no: "12345".into(),
                    },
                ],
            )
            .await
            .unwrap();
        f.processor.submit(campaign.id).await.unwrap();

        let counts = f.processor.send(campaign.id).await.unwrap();
        assert_eq!((counts.success, counts.failed), (1, 1));
        assert_eq!(f.transport.call_count(), 1);

        let stored = f.processor.get(campaign.id).await.unwrap();
        assert_eq!(stored.recipients[1].status, RecipientStatus::Invalid);
        assert_eq!(stored.recipients[1].customer_name, "CUST-9");
        assert_eq!(stored.recipients[0].status, RecipientStatus::Sent);

        // Invalid recipients are not retried
        assert!(matches!(
            f.processor.retry_failed(campaign.id).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn edited_recipients_survive_filter_reload() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", "01711111111", "Retail"));
        f.store.add_customer(customer("CUST-2", "01722222222", "Retail"));
        let campaign = f
            .processor
            .create_campaign(create_request(FilterBy::CustomerGroup, Some("Retail")), None)
            .await
            .unwrap();
        assert_eq!(campaign.total_recipients, 2);

        f.processor
            .set_recipients(
                campaign.id,
                vec![ManualRecipient {
                    customer: "CUST-2".into(),
                    customer_name: None,
                    mobile_no: "01722222222".into(),
                }],
            )
            .await
            .unwrap();

        let reloaded = f.processor.load_recipients(campaign.id, false).await.unwrap();
        assert_eq!(reloaded.recipients.len(), 1);
        assert_eq!(reloaded.recipients[0].customer_name, "Name CUST-2");

        let forced = f.processor.load_recipients(campaign.id, true).await.unwrap();
        assert_eq!(forced.recipients.len(), 2);
    }

    #[tokio::test]
    async fn message_renders_per_recipient() {
        let f = fixture();
        let campaign = queued_campaign(&f).await;
        f.processor.send(campaign.id).await.unwrap();

        assert_eq!(f.transport.calls()[0].1, "Hi Name CUST-1, Eid Sale starts today!");
        let logs = f.processor.logs(campaign.id).await.unwrap();
        assert_eq!(logs[0].message, "Hi Name CUST-1, Eid Sale starts today!");
    }

    #[tokio::test]
    async fn send_requires_queued_status() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", "01711111111", "Retail"));
        let campaign = f
            .processor
            .create_campaign(create_request(FilterBy::All, None), None)
            .await
            .unwrap();

        assert!(matches!(f.processor.send(campaign.id).await, Err(ServiceError::Conflict(_))));
        assert_eq!(f.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn scheduled_campaign_is_promoted_once_due() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", "01711111111", "Retail"));
        let at = Utc::now() + ChronoDuration::hours(2);
        let mut request = create_request(FilterBy::All, None);
        request.send_immediately = false;
        request.scheduled_datetime = Some(at);
        let campaign = f.processor.create_campaign(request, None).await.unwrap();

        let submitted = f.processor.submit(campaign.id).await.unwrap();
        assert_eq!(submitted.status, BulkSmsStatus::Scheduled);

        assert!(f.processor.promote_scheduled(Utc::now()).await.unwrap().is_empty());
        let promoted = f.processor.promote_scheduled(at).await.unwrap();
        assert_eq!(promoted, vec![campaign.id]);
        assert!(f.processor.promote_scheduled(at).await.unwrap().is_empty());

        let stored = f.processor.get(campaign.id).await.unwrap();
        assert_eq!(stored.status, BulkSmsStatus::Queued);
        assert!(stored.queued_at.is_some());
    }

    #[tokio::test]
    async fn create_validates_request() {
        let f = fixture();

        let mut unscheduled = create_request(FilterBy::All, None);
        unscheduled.send_immediately = false;
        assert!(matches!(
            f.processor.create_campaign(unscheduled, None).await,
            Err(ServiceError::Validation(_))
        ));

        let mut bad_filter = create_request(FilterBy::CustomFilter, None);
        bad_filter.custom_filter = Some("{oops".into());
        assert!(matches!(
            f.processor.create_campaign(bad_filter, None).await,
            Err(ServiceError::Validation(_))
        ));

        let mut empty = create_request(FilterBy::All, None);
        empty.message = "  ".into();
        assert!(matches!(
            f.processor.create_campaign(empty, None).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn custom_filter_selects_audience() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", "01711111111", "Retail"));
        f.store.add_customer(customer("CUST-2", "01722222222", "Wholesale"));
        let mut request = create_request(FilterBy::CustomFilter, None);
        request.custom_filter = Some(r#"[["customer_group", "in", ["Wholesale", "Corporate"]]]"#.into());

        let campaign = f.processor.create_campaign(request, None).await.unwrap();
        assert_eq!(campaign.recipients.len(), 1);
        assert_eq!(campaign.recipients[0].customer, "CUST-2");
    }

    #[tokio::test]
    async fn submit_without_recipients_is_rejected() {
        let f = fixture();
        let campaign = f
            .processor
            .create_campaign(create_request(FilterBy::All, None), None)
            .await
            .unwrap();
        assert!(matches!(f.processor.submit(campaign.id).await, Err(ServiceError::Validation(_))));
    }
}
