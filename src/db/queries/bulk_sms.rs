//! Bulk SMS campaign queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{
    BulkSms, BulkSmsLog, BulkSmsRecipient, BulkSmsStatus, CampaignCounts, NewBulkSms,
    RecipientUpdate,
};

const CAMPAIGN_COLUMNS: &str = r#"
    id, campaign_name, message, filter_by, filter_value, custom_filter, send_immediately,
    scheduled_datetime, status, recipients_edited, total_recipients, success_count,
    failed_count, success_rate, owner, queued_at, started_at, completed_at, created_at, updated_at
"#;

const RECIPIENT_COLUMNS: &str =
    "position, customer, customer_name, mobile_no, status, sent_datetime, error_message";

pub async fn insert_campaign(pool: &PgPool, campaign: &NewBulkSms) -> Result<BulkSms> {
    let created = sqlx::query_as::<_, BulkSms>(&format!(
        r#"
        INSERT INTO bulk_sms (
            id, campaign_name, message, filter_by, filter_value, custom_filter,
            send_immediately, scheduled_datetime, status, owner, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'draft', $9, NOW(), NOW())
        RETURNING {}
        "#,
        CAMPAIGN_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&campaign.campaign_name)
    .bind(&campaign.message)
    .bind(campaign.filter_by)
    .bind(&campaign.filter_value)
    .bind(&campaign.custom_filter)
    .bind(campaign.send_immediately)
    .bind(campaign.scheduled_datetime)
    .bind(&campaign.owner)
    .fetch_one(pool)
    .await?;

    Ok(created)
}

/// Load a campaign together with its recipients
pub async fn get_campaign(pool: &PgPool, id: Uuid) -> Result<Option<BulkSms>> {
    let campaign = sqlx::query_as::<_, BulkSms>(&format!(
        "SELECT {} FROM bulk_sms WHERE id = $1",
        CAMPAIGN_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(mut campaign) = campaign else {
        return Ok(None);
    };

    campaign.recipients = sqlx::query_as::<_, BulkSmsRecipient>(&format!(
        "SELECT {} FROM bulk_sms_recipients WHERE bulk_sms = $1 ORDER BY position",
        RECIPIENT_COLUMNS
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Some(campaign))
}

/// Swap the recipient list of a Draft campaign in one transaction
pub async fn replace_recipients(
    pool: &PgPool,
    id: Uuid,
    recipients: &[BulkSmsRecipient],
    edited: bool,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let locked: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM bulk_sms WHERE id = $1 AND status = 'draft' FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    if locked.is_none() {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("DELETE FROM bulk_sms_recipients WHERE bulk_sms = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for r in recipients {
        sqlx::query(
            r#"
            INSERT INTO bulk_sms_recipients (
                bulk_sms, position, customer, customer_name, mobile_no, status, sent_datetime, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(r.position)
        .bind(&r.customer)
        .bind(&r.customer_name)
        .bind(&r.mobile_no)
        .bind(r.status)
        .bind(r.sent_datetime)
        .bind(&r.error_message)
        .execute(&mut *tx)
        .await?;
    }

    let counts = CampaignCounts::from_recipients(recipients);
    sqlx::query(
        r#"
        UPDATE bulk_sms
        SET total_recipients = $2, success_count = $3, failed_count = $4,
            recipients_edited = recipients_edited OR $5, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(counts.total)
    .bind(counts.success)
    .bind(counts.failed)
    .bind(edited)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Conditional status change with queue-log timestamps
pub async fn transition_campaign(
    pool: &PgPool,
    id: Uuid,
    from: &[BulkSmsStatus],
    to: BulkSmsStatus,
    at: DateTime<Utc>,
) -> Result<bool> {
    let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();

    let result = sqlx::query(
        r#"
        UPDATE bulk_sms
        SET status = $3,
            queued_at = CASE WHEN $3 = 'queued' THEN $4 ELSE queued_at END,
            started_at = CASE WHEN $3 = 'sending' THEN $4 ELSE started_at END,
            completed_at = CASE WHEN $3 IN ('completed', 'failed') THEN $4 ELSE completed_at END,
            updated_at = $4
        WHERE id = $1 AND status::text = ANY($2)
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Pending → terminal
pub async fn update_recipient(pool: &PgPool, id: Uuid, position: i32, update: &RecipientUpdate) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE bulk_sms_recipients
        SET status = $3, sent_datetime = $4, error_message = $5
        WHERE bulk_sms = $1 AND position = $2 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(position)
    .bind(update.status)
    .bind(update.sent_datetime)
    .bind(&update.error_message)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn update_campaign_counts(pool: &PgPool, id: Uuid, counts: CampaignCounts) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE bulk_sms
        SET total_recipients = $2, success_count = $3, failed_count = $4,
            success_rate = $5, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(counts.total)
    .bind(counts.success)
    .bind(counts.failed)
    .bind(counts.success_rate())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn reset_failed_recipients(pool: &PgPool, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE bulk_sms_recipients
        SET status = 'pending', error_message = NULL
        WHERE bulk_sms = $1 AND status = 'failed'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn list_due_scheduled(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM bulk_sms
        WHERE status = 'scheduled' AND scheduled_datetime <= $1
        ORDER BY scheduled_datetime
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Campaigns left in `status` with no update since `before`
pub async fn list_stalled_campaigns(pool: &PgPool, status: BulkSmsStatus, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM bulk_sms
        WHERE status = $1 AND updated_at < $2
        ORDER BY updated_at
        "#,
    )
    .bind(status)
    .bind(before)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

pub async fn append_log(pool: &PgPool, log: &BulkSmsLog) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bulk_sms_logs (
            id, bulk_sms, customer, customer_name, mobile_no, message,
            status, sent_datetime, error_message, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(log.id)
    .bind(log.bulk_sms)
    .bind(&log.customer)
    .bind(&log.customer_name)
    .bind(&log.mobile_no)
    .bind(&log.message)
    .bind(log.status)
    .bind(log.sent_datetime)
    .bind(&log.error_message)
    .bind(log.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_logs(pool: &PgPool, id: Uuid) -> Result<Vec<BulkSmsLog>> {
    let logs = sqlx::query_as::<_, BulkSmsLog>(
        r#"
        SELECT id, bulk_sms, customer, customer_name, mobile_no, message,
               status, sent_datetime, error_message, created_at
        FROM bulk_sms_logs
        WHERE bulk_sms = $1
        ORDER BY created_at
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(logs)
}
