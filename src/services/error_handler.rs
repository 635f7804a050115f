//! Rule failure policy and system health check

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, warn};

use crate::store::{RuleStore, Stores};
use crate::types::{CheckStatus, HealthCheck, HealthReport, SmsStatus, TriggerRule};

/// Consecutive failures after which a rule is switched off
pub const MAX_RULE_ERRORS: i32 = 5;

const PENDING_WARN_THRESHOLD: i64 = 100;
const RECENT_FAILURES_WARN_THRESHOLD: i64 = 10;

/// Count a processing failure against `rule`. Returns true when this failure
/// disabled the rule.
pub async fn record_rule_failure(
    rules: &dyn RuleStore,
    rule: &TriggerRule,
    cause: &anyhow::Error,
) -> Result<bool> {
    warn!(rule = %rule.rule_name, rule_id = %rule.id, error = %cause, "Trigger rule failed");

    let Some(updated) = rules.record_rule_error(rule.id, MAX_RULE_ERRORS).await? else {
        return Ok(false);
    };

    let disabled = rule.is_active && !updated.is_active;
    if disabled {
        error!(
            rule = %rule.rule_name,
            rule_id = %rule.id,
            error_count = updated.error_count,
            "Trigger rule disabled after repeated errors, needs operator attention"
        );
    }
    Ok(disabled)
}

/// Gateway, rules and queue checks rolled into one report
pub async fn health_check(stores: &Stores, gateway_configured: bool, now: DateTime<Utc>) -> Result<HealthReport> {
    let mut checks = Vec::with_capacity(4);

    checks.push(if gateway_configured {
        check("SMS Gateway", CheckStatus::Pass, "SMS gateway configured properly")
    } else {
        check("SMS Gateway", CheckStatus::Fail, "SMS gateway URL not configured")
    });

    let active_rules = stores.rules.list_rules(true).await?.len();
    checks.push(check(
        "Active Rules",
        if active_rules > 0 { CheckStatus::Pass } else { CheckStatus::Warning },
        format!("{} active SMS trigger rules", active_rules),
    ));

    let pending: i64 = stores
        .messages
        .message_status_counts(None, None)
        .await?
        .into_iter()
        .filter(|(status, _)| *status == SmsStatus::Draft)
        .map(|(_, count)| count)
        .sum();
    checks.push(check(
        "Pending SMS",
        if pending > PENDING_WARN_THRESHOLD { CheckStatus::Warning } else { CheckStatus::Pass },
        format!("{} pending SMS messages", pending),
    ));

    let recent_failures = stores.messages.count_failed_since(now - Duration::hours(24)).await?;
    checks.push(check(
        "Recent Failures",
        if recent_failures > RECENT_FAILURES_WARN_THRESHOLD { CheckStatus::Warning } else { CheckStatus::Pass },
        format!("{} failed SMS in last 24 hours", recent_failures),
    ));

    Ok(HealthReport::from_checks(checks))
}

fn check(name: &str, status: CheckStatus, message: impl Into<String>) -> HealthCheck {
    HealthCheck {
        check: name.to_string(),
        status,
        message: message.into(),
    }
}
