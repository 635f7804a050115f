//! Dispatcher: sends due Draft messages through the delivery channel

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::delivery::DeliveryChannel;
use super::error::{ServiceError, ServiceResult};
use crate::store::{BusinessData, MessageStore};
use crate::types::{
    DeliveryResult, NewScheduledSms, ScheduleSmsRequest, ScheduledSms, SmsOutcome, SmsStats,
    SmsStatsRequest, SmsStatus, TriggerType,
};

pub const DEFAULT_BATCH_LIMIT: i64 = 100;

/// Claims older than this are considered abandoned
const STALE_CLAIM_MINUTES: i64 = 15;
const STALE_CLAIM_ERROR: &str = "Dispatch interrupted before completion";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sent: usize,
    pub failed: usize,
    /// Claimed elsewhere first
    pub skipped: usize,
    pub stale_failed: u64,
}

pub struct Dispatcher {
    messages: Arc<dyn MessageStore>,
    business: Arc<dyn BusinessData>,
    channel: Arc<DeliveryChannel>,
}

impl Dispatcher {
    pub fn new(messages: Arc<dyn MessageStore>, business: Arc<dyn BusinessData>, channel: Arc<DeliveryChannel>) -> Self {
        Self {
            messages,
            business,
            channel,
        }
    }

    pub async fn sweep_pending(&self, limit: i64) -> Result<SweepReport> {
        self.sweep_pending_at(Utc::now(), limit).await
    }

    /// Send every Draft message due at `now`, oldest first
    pub async fn sweep_pending_at(&self, now: DateTime<Utc>, limit: i64) -> Result<SweepReport> {
        let mut report = SweepReport {
            stale_failed: self
                .messages
                .fail_stale_claims(now - Duration::minutes(STALE_CLAIM_MINUTES), STALE_CLAIM_ERROR)
                .await?,
            ..Default::default()
        };
        if report.stale_failed > 0 {
            warn!(count = report.stale_failed, "Failed stale dispatch claims");
        }

        let due = self.messages.list_due_messages(now, limit).await?;
        for sms in due {
            match self.dispatch(&sms, now).await {
                Ok(Some(SmsStatus::Sent)) => report.sent += 1,
                Ok(Some(_)) => report.failed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(sms_id = %sms.id, error = %e, "Dispatch bookkeeping failed");
                    report.failed += 1;
                }
            }
        }

        if report.sent + report.failed > 0 {
            info!(sent = report.sent, failed = report.failed, skipped = report.skipped, "Dispatch sweep finished");
        }
        Ok(report)
    }

    /// Claim, send and complete one message. `None` when another dispatcher
    /// already owns it.
    async fn dispatch(&self, sms: &ScheduledSms, now: DateTime<Utc>) -> Result<Option<SmsStatus>> {
        if !self.messages.claim_message(sms.id, now).await? {
            debug!(sms_id = %sms.id, "Message already claimed");
            return Ok(None);
        }

        let outcome = match self.channel.send(&sms.mobile_no, &sms.message).await {
            Ok(_) => SmsOutcome::Sent { at: Utc::now() },
            Err(e) => {
                warn!(sms_id = %sms.id, customer = %sms.customer, error = %e, "SMS delivery failed");
                SmsOutcome::failed(e.to_string())
            }
        };

        if !self.messages.complete_message(sms.id, &outcome).await? {
            warn!(sms_id = %sms.id, "Message left Sending before completion");
        }
        Ok(Some(outcome.status()))
    }

    // =========================================================================
    // Single-message operations
    // =========================================================================

    /// Queue a message for a customer, copying the customer's mobile number
    pub async fn schedule(&self, request: ScheduleSmsRequest) -> ServiceResult<ScheduledSms> {
        if request.message.trim().is_empty() {
            return Err(ServiceError::validation("Message is required"));
        }
        let customer = self
            .business
            .get_customer(&request.customer)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", &request.customer))?;
        let mobile_no = customer
            .mobile()
            .ok_or_else(|| ServiceError::validation(format!("Customer '{}' has no mobile number", customer.id)))?
            .to_string();

        let sms = self
            .messages
            .insert_message(NewScheduledSms {
                customer: customer.id,
                mobile_no,
                message: request.message,
                trigger_type: request.trigger_type.unwrap_or(TriggerType::Custom),
                reference: None,
                scheduled_datetime: request.scheduled_datetime.unwrap_or_else(Utc::now),
            })
            .await?;

        info!(sms_id = %sms.id, customer = %sms.customer, at = %sms.scheduled_datetime, "SMS scheduled");
        Ok(sms)
    }

    /// Schedule for now and dispatch right away
    pub async fn send_immediate(&self, customer: String, message: String) -> ServiceResult<DeliveryResult> {
        let sms = self
            .schedule(ScheduleSmsRequest {
                customer,
                message,
                trigger_type: Some(TriggerType::Custom),
                scheduled_datetime: None,
            })
            .await?;
        self.send_one(sms.id).await
    }

    /// Dispatch one Draft message now and report the stored outcome
    pub async fn send_one(&self, id: Uuid) -> ServiceResult<DeliveryResult> {
        let sms = self
            .messages
            .get_message(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Scheduled SMS", id))?;
        if sms.status != SmsStatus::Draft {
            return Err(ServiceError::conflict(format!(
                "Scheduled SMS '{}' is {}, not draft",
                id,
                sms.status.as_str()
            )));
        }

        match self.dispatch(&sms, Utc::now()).await? {
            None => Err(ServiceError::conflict(format!("Scheduled SMS '{}' is already being sent", id))),
            Some(_) => {
                let stored = self
                    .messages
                    .get_message(id)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Scheduled SMS", id))?;
                Ok(DeliveryResult {
                    success: stored.status == SmsStatus::Sent,
                    sms_id: Some(id),
                    error: stored.error_message,
                })
            }
        }
    }

    /// Failed → Draft, due immediately
    pub async fn retry(&self, id: Uuid) -> ServiceResult<ScheduledSms> {
        let sms = self
            .messages
            .get_message(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Scheduled SMS", id))?;
        if sms.status != SmsStatus::Failed {
            return Err(ServiceError::validation("Only failed messages can be retried"));
        }
        if !self.messages.reset_failed_message(id, Utc::now()).await? {
            return Err(ServiceError::conflict(format!("Scheduled SMS '{}' changed state", id)));
        }

        info!(sms_id = %id, "Failed SMS reset for retry");
        self.messages
            .get_message(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Scheduled SMS", id))
    }

    /// Status counts over messages scheduled within the window
    pub async fn stats(&self, request: SmsStatsRequest) -> Result<SmsStats> {
        let counts = self
            .messages
            .message_status_counts(request.from_date, request.to_date)
            .await?;
        Ok(SmsStats::from_counts(&counts))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::services::delivery::RetryPolicy;
    use crate::services::rate_limiter::InMemorySendLimiter;
    use crate::services::sms_transport::{FakeSmsTransport, TransportError};
    use crate::store::MemoryStore;
    use crate::types::Customer;

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<FakeSmsTransport>,
        dispatcher: Dispatcher,
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
        let dispatcher = Dispatcher::new(store.clone(), store.clone(), Arc::new(channel));
        Fixture {
            store,
            transport,
            dispatcher,
        }
    }

    fn customer(id: &str, mobile: &str) -> Customer {
        Customer {
            id: id.into(),
            customer_name: format!("Name {}", id),
            mobile_no: Some(mobile.into()),
            customer_type: None,
            customer_group: None,
            territory: None,
            gender: None,
            religion: None,
            profession: None,
            date_of_birth: None,
            sms_enabled: true,
        }
    }

    async fn queue(f: &Fixture, customer_id: &str, mobile: &str, at: DateTime<Utc>) -> ScheduledSms {
        f.store.add_customer(customer(customer_id, mobile));
        f.dispatcher
            .schedule(ScheduleSmsRequest {
                customer: customer_id.into(),
                message: "Your order is ready".into(),
                trigger_type: None,
                scheduled_datetime: Some(at),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweep_sends_due_and_leaves_future_drafts() {
        let f = fixture();
        let now = Utc::now();
        let due = queue(&f, "CUST-1", "01712345678", now - Duration::minutes(5)).await;
        let future = queue(&f, "CUST-2", "01812345678", now + Duration::hours(1)).await;

        let report = f.dispatcher.sweep_pending_at(now, DEFAULT_BATCH_LIMIT).await.unwrap();
        assert_eq!(report.sent, 1);

        let due = f.store.get_message(due.id).await.unwrap().unwrap();
        assert_eq!(due.status, SmsStatus::Sent);
        assert!(due.sent_datetime.is_some());
        let future = f.store.get_message(future.id).await.unwrap().unwrap();
        assert_eq!(future.status, SmsStatus::Draft);
    }

    #[tokio::test]
    async fn invalid_number_fails_without_transport_call() {
        let f = fixture();
        let sms = queue(&f, "CUST-1", "12345", Utc::now() - Duration::minutes(1)).await;

        let report = f.dispatcher.sweep_pending(DEFAULT_BATCH_LIMIT).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(f.transport.call_count(), 0);

        let stored = f.store.get_message(sms.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SmsStatus::Failed);
        assert!(stored.error_message.unwrap().contains("Invalid mobile number"));
    }

    #[tokio::test]
    async fn sent_messages_are_never_resent() {
        let f = fixture();
        queue(&f, "CUST-1", "01712345678", Utc::now() - Duration::minutes(1)).await;

        f.dispatcher.sweep_pending(DEFAULT_BATCH_LIMIT).await.unwrap();
        let second = f.dispatcher.sweep_pending(DEFAULT_BATCH_LIMIT).await.unwrap();

        assert_eq!(second, SweepReport::default());
        assert_eq!(f.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn message_claimed_elsewhere_is_skipped() {
        let f = fixture();
        let now = Utc::now();
        let sms = queue(&f, "CUST-1", "01712345678", now - Duration::minutes(1)).await;

        let report = {
            let due = f.store.list_due_messages(now, 10).await.unwrap();
            assert!(f.store.claim_message(sms.id, now).await.unwrap());
            let mut report = SweepReport::default();
            for sms in due {
                match f.dispatcher.dispatch(&sms, now).await.unwrap() {
                    None => report.skipped += 1,
                    Some(_) => report.sent += 1,
                }
            }
            report
        };

        assert_eq!(report.skipped, 1);
        assert_eq!(f.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn stale_claims_are_failed_not_resent() {
        let f = fixture();
        let now = Utc::now();
        let sms = queue(&f, "CUST-1", "01712345678", now - Duration::hours(1)).await;
        assert!(f.store.claim_message(sms.id, now - Duration::minutes(30)).await.unwrap());

        let report = f.dispatcher.sweep_pending_at(now, DEFAULT_BATCH_LIMIT).await.unwrap();
        assert_eq!(report.stale_failed, 1);
        assert_eq!(f.transport.call_count(), 0);

        let stored = f.store.get_message(sms.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SmsStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some(STALE_CLAIM_ERROR));
    }

    #[tokio::test]
    async fn retry_only_from_failed() {
        let f = fixture();
        f.transport.fail_next([TransportError::Rejected("blocked".into())]);
        let sms = queue(&f, "CUST-1", "01712345678", Utc::now() - Duration::minutes(1)).await;

        assert!(matches!(f.dispatcher.retry(sms.id).await, Err(ServiceError::Validation(_))));

        f.dispatcher.sweep_pending(DEFAULT_BATCH_LIMIT).await.unwrap();
        let reset = f.dispatcher.retry(sms.id).await.unwrap();
        assert_eq!(reset.status, SmsStatus::Draft);
        assert!(reset.error_message.is_none());

        let report = f.dispatcher.sweep_pending(DEFAULT_BATCH_LIMIT).await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn send_immediate_reports_delivery() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", "01712345678"));

        let result = f
            .dispatcher
            .send_immediate("CUST-1".into(), "Thanks for shopping".into())
            .await
            .unwrap();
        assert!(result.success);

        f.transport.fail_number("01712345678", TransportError::Rejected("DND".into()));
        let result = f
            .dispatcher
            .send_immediate("CUST-1".into(), "Thanks again".into())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("DND"));
    }

    #[tokio::test]
    async fn schedule_rejects_customer_without_mobile() {
        let f = fixture();
        f.store.add_customer(customer("CUST-1", " "));

        let result = f
            .dispatcher
            .schedule(ScheduleSmsRequest {
                customer: "CUST-1".into(),
                message: "Hi".into(),
                trigger_type: None,
                scheduled_datetime: None,
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert!(matches!(
            f.dispatcher.send_immediate("CUST-404".into(), "Hi".into()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stats_cover_window() {
        let f = fixture();
        let now = Utc::now();
        queue(&f, "CUST-1", "01712345678", now - Duration::days(10)).await;
        queue(&f, "CUST-2", "12345", now - Duration::minutes(2)).await;
        queue(&f, "CUST-3", "01912345678", now - Duration::minutes(1)).await;
        f.dispatcher.sweep_pending_at(now, DEFAULT_BATCH_LIMIT).await.unwrap();
        queue(&f, "CUST-4", "01612345678", now + Duration::hours(1)).await;

        let stats = f
            .dispatcher
            .stats(SmsStatsRequest {
                from_date: Some(now - Duration::days(1)),
                to_date: None,
            })
            .await
            .unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
    }
}
