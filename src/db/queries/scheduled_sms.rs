//! Scheduled SMS queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{DedupQuery, NewScheduledSms, ScheduledSms, SmsOutcome, SmsStatus};

const SMS_COLUMNS: &str = r#"
    id, customer, mobile_no, message, trigger_type, reference_doctype, reference_name,
    status, scheduled_datetime, sent_datetime, claimed_at, error_message, created_at
"#;

/// Insert a Draft message
pub async fn insert_message(pool: &PgPool, sms: &NewScheduledSms) -> Result<ScheduledSms> {
    let (doctype, name) = match &sms.reference {
        Some(r) => (Some(r.doctype.as_str()), Some(r.name.as_str())),
        None => (None, None),
    };

    let created = sqlx::query_as::<_, ScheduledSms>(&format!(
        r#"
        INSERT INTO scheduled_sms (
            id, customer, mobile_no, message, trigger_type,
            reference_doctype, reference_name, status, scheduled_datetime, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'draft', $8, NOW())
        RETURNING {}
        "#,
        SMS_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&sms.customer)
    .bind(&sms.mobile_no)
    .bind(&sms.message)
    .bind(sms.trigger_type)
    .bind(doctype)
    .bind(name)
    .bind(sms.scheduled_datetime)
    .fetch_one(pool)
    .await?;

    Ok(created)
}

pub async fn get_message(pool: &PgPool, id: Uuid) -> Result<Option<ScheduledSms>> {
    let sms = sqlx::query_as::<_, ScheduledSms>(&format!(
        "SELECT {} FROM scheduled_sms WHERE id = $1",
        SMS_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(sms)
}

pub async fn message_exists(pool: &PgPool, query: &DedupQuery) -> Result<bool> {
    let (doctype, name) = match &query.reference {
        Some(r) => (Some(r.doctype.as_str()), Some(r.name.as_str())),
        None => (None, None),
    };

    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM scheduled_sms
            WHERE customer = $1
              AND trigger_type = $2
              AND ($3::text IS NULL OR (reference_doctype = $3 AND reference_name = $4))
              AND ($5::timestamptz IS NULL OR scheduled_datetime >= $5)
        )
        "#,
    )
    .bind(&query.customer)
    .bind(query.trigger_type)
    .bind(doctype)
    .bind(name)
    .bind(query.since)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// Draft messages due at `now`, oldest first
pub async fn list_due_messages(pool: &PgPool, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledSms>> {
    let due = sqlx::query_as::<_, ScheduledSms>(&format!(
        r#"
        SELECT {} FROM scheduled_sms
        WHERE status = 'draft' AND scheduled_datetime <= $1
        ORDER BY scheduled_datetime, created_at
        LIMIT $2
        "#,
        SMS_COLUMNS
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(due)
}

/// Draft → Sending
pub async fn claim_message(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scheduled_sms SET status = 'sending', claimed_at = $2 WHERE id = $1 AND status = 'draft'",
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Sending → Sent | Failed
pub async fn complete_message(pool: &PgPool, id: Uuid, outcome: &SmsOutcome) -> Result<bool> {
    let (sent_at, error) = match outcome {
        SmsOutcome::Sent { at } => (Some(*at), None),
        SmsOutcome::Failed { error } => (None, Some(error.as_str())),
    };

    let result = sqlx::query(
        r#"
        UPDATE scheduled_sms
        SET status = $2, sent_datetime = $3, error_message = $4
        WHERE id = $1 AND status = 'sending'
        "#,
    )
    .bind(id)
    .bind(outcome.status())
    .bind(sent_at)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn fail_stale_claims(pool: &PgPool, claimed_before: DateTime<Utc>, error: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE scheduled_sms
        SET status = 'failed', error_message = $2
        WHERE status = 'sending' AND (claimed_at IS NULL OR claimed_at < $1)
        "#,
    )
    .bind(claimed_before)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Failed → Draft
pub async fn reset_failed_message(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scheduled_sms
        SET status = 'draft', scheduled_datetime = $2, claimed_at = NULL, error_message = NULL
        WHERE id = $1 AND status = 'failed'
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn message_status_counts(
    pool: &PgPool,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<(SmsStatus, i64)>> {
    let counts: Vec<(SmsStatus, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*)
        FROM scheduled_sms
        WHERE ($1::timestamptz IS NULL OR scheduled_datetime >= $1)
          AND ($2::timestamptz IS NULL OR scheduled_datetime <= $2)
        GROUP BY status
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(counts)
}

pub async fn count_failed_since(pool: &PgPool, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM scheduled_sms WHERE status = 'failed' AND created_at >= $1",
    )
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
