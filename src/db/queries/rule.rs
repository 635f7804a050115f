//! Trigger rule queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{NewTriggerRule, TriggerRule};

const RULE_COLUMNS: &str = r#"
    id, rule_name, trigger_type, message_template, conditions, frequency, days_interval,
    is_active, last_execution, execution_count, error_count, created_at, updated_at
"#;

/// Insert a rule
pub async fn create_rule(pool: &PgPool, rule: &NewTriggerRule) -> Result<TriggerRule> {
    let created = sqlx::query_as::<_, TriggerRule>(&format!(
        r#"
        INSERT INTO trigger_rules (
            id, rule_name, trigger_type, message_template, conditions,
            frequency, days_interval, is_active, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
        RETURNING {}
        "#,
        RULE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&rule.rule_name)
    .bind(rule.trigger_type)
    .bind(&rule.message_template)
    .bind(&rule.conditions)
    .bind(rule.frequency)
    .bind(rule.days_interval)
    .bind(rule.is_active)
    .fetch_one(pool)
    .await?;

    Ok(created)
}

pub async fn get_rule(pool: &PgPool, id: Uuid) -> Result<Option<TriggerRule>> {
    let rule = sqlx::query_as::<_, TriggerRule>(&format!(
        "SELECT {} FROM trigger_rules WHERE id = $1",
        RULE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(rule)
}

pub async fn get_rule_by_name(pool: &PgPool, rule_name: &str) -> Result<Option<TriggerRule>> {
    let rule = sqlx::query_as::<_, TriggerRule>(&format!(
        "SELECT {} FROM trigger_rules WHERE rule_name = $1",
        RULE_COLUMNS
    ))
    .bind(rule_name)
    .fetch_optional(pool)
    .await?;

    Ok(rule)
}

pub async fn list_rules(pool: &PgPool, active_only: bool) -> Result<Vec<TriggerRule>> {
    let rules = sqlx::query_as::<_, TriggerRule>(&format!(
        "SELECT {} FROM trigger_rules WHERE ($1 = FALSE OR is_active) ORDER BY created_at",
        RULE_COLUMNS
    ))
    .bind(active_only)
    .fetch_all(pool)
    .await?;

    Ok(rules)
}

pub async fn set_rule_active(pool: &PgPool, id: Uuid, is_active: bool) -> Result<Option<TriggerRule>> {
    let rule = sqlx::query_as::<_, TriggerRule>(&format!(
        "UPDATE trigger_rules SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        RULE_COLUMNS
    ))
    .bind(id)
    .bind(is_active)
    .fetch_optional(pool)
    .await?;

    Ok(rule)
}

/// Record a successful execution
pub async fn mark_rule_executed(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE trigger_rules
        SET last_execution = $2,
            execution_count = execution_count + 1,
            error_count = 0,
            updated_at = $2
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Increment `error_count`, deactivating the rule once it reaches `disable_at`
pub async fn record_rule_error(pool: &PgPool, id: Uuid, disable_at: i32) -> Result<Option<TriggerRule>> {
    let rule = sqlx::query_as::<_, TriggerRule>(&format!(
        r#"
        UPDATE trigger_rules
        SET error_count = error_count + 1,
            is_active = CASE WHEN error_count + 1 >= $2 THEN FALSE ELSE is_active END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        RULE_COLUMNS
    ))
    .bind(id)
    .bind(disable_at)
    .fetch_optional(pool)
    .await?;

    Ok(rule)
}
