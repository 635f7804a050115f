//! SMS trigger rule types

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::conditions::{ConditionsError, Filter};

/// Business event a rule reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "trigger_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    InvoiceDue,
    Birthday,
    InactiveCustomer,
    RepurchasePromotion,
    CustomerType,
    CustomerGroup,
    PosInvoice,
    Custom,
}

/// How far back a selector looks for an earlier message to the same customer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupWindow {
    /// Same customer and same referenced record, regardless of age
    Reference,
    /// Anything since the start of today
    Today,
    /// Anything in the trailing number of days
    Days(i64),
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceDue => "invoice_due",
            Self::Birthday => "birthday",
            Self::InactiveCustomer => "inactive_customer",
            Self::RepurchasePromotion => "repurchase_promotion",
            Self::CustomerType => "customer_type",
            Self::CustomerGroup => "customer_group",
            Self::PosInvoice => "pos_invoice",
            Self::Custom => "custom",
        }
    }

    pub fn dedup_window(&self) -> DedupWindow {
        match self {
            Self::InvoiceDue | Self::PosInvoice => DedupWindow::Reference,
            Self::Birthday => DedupWindow::Today,
            Self::RepurchasePromotion => DedupWindow::Days(7),
            Self::InactiveCustomer | Self::CustomerType | Self::CustomerGroup | Self::Custom => {
                DedupWindow::Days(30)
            }
        }
    }

    /// Look-back used when the rule leaves `days_interval` empty
    pub fn default_days_interval(&self) -> Option<i32> {
        match self {
            Self::InvoiceDue => Some(7),
            Self::InactiveCustomer => Some(90),
            Self::RepurchasePromotion => Some(30),
            _ => None,
        }
    }

    /// Template offered when a rule is created without one
    pub fn default_template(&self) -> Option<&'static str> {
        match self {
            Self::InvoiceDue => Some("Dear {customer_name}, your invoice {invoice_no} of amount {amount} is overdue. Please make payment at your earliest convenience."),
            Self::Birthday => Some("Happy Birthday {customer_name}! Wishing you a wonderful day filled with joy and happiness."),
            Self::InactiveCustomer => Some("Hi {customer_name}, we miss you! Come back and explore our latest offers."),
            Self::RepurchasePromotion => Some("Hi {customer_name}, time to reorder {item_code}! Special discount available."),
            Self::CustomerType => Some("Dear {customer_name}, we have special offers just for you!"),
            Self::CustomerGroup => Some("Hello {customer_name}, exclusive deals for our valued customers!"),
            Self::PosInvoice | Self::Custom => None,
        }
    }
}

/// Execution cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_frequency", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    OneTime,
}

impl Frequency {
    pub fn requires_days_interval(&self) -> bool {
        matches!(self, Frequency::Weekly | Frequency::Monthly)
    }
}

/// Trigger rule entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    pub id: Uuid,
    pub rule_name: String,
    pub trigger_type: TriggerType,
    pub message_template: String,
    pub conditions: Option<serde_json::Value>,
    pub frequency: Frequency,
    pub days_interval: Option<i32>,
    pub is_active: bool,
    pub last_execution: Option<DateTime<Utc>>,
    pub execution_count: i32,
    pub error_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TriggerRule {
    /// Whether the rule's cadence has elapsed as of `today`
    pub fn can_execute(&self, today: NaiveDate) -> bool {
        if !self.is_active {
            return false;
        }
        let Some(last) = self.last_execution else {
            return true;
        };
        let last = last.date_naive();

        match self.frequency {
            Frequency::OneTime => false,
            Frequency::Daily => last < today,
            Frequency::Weekly => (today - last).num_days() >= 7,
            Frequency::Monthly => (last.year(), last.month()) != (today.year(), today.month()),
        }
    }

    pub fn filter(&self) -> Result<Filter, ConditionsError> {
        Filter::from_optional(self.conditions.as_ref())
    }

    /// `days_interval` with the trigger type's default applied
    pub fn effective_days_interval(&self) -> Option<i64> {
        self.days_interval
            .filter(|d| *d > 0)
            .or_else(|| self.trigger_type.default_days_interval())
            .map(i64::from)
    }
}

/// Values needed to insert a rule
#[derive(Debug, Clone)]
pub struct NewTriggerRule {
    pub rule_name: String,
    pub trigger_type: TriggerType,
    pub message_template: String,
    pub conditions: Option<serde_json::Value>,
    pub frequency: Frequency,
    pub days_interval: Option<i32>,
    pub is_active: bool,
}

/// Request to create a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    pub rule_name: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub message_template: Option<String>,
    /// Raw JSON text, as typed by the operator
    #[serde(default)]
    pub conditions: Option<String>,
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,
    #[serde(default)]
    pub days_interval: Option<i32>,
}

fn default_frequency() -> Frequency {
    Frequency::Daily
}

/// Request addressing a rule by name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleNameRequest {
    pub rule_name: String,
}

/// Request to validate raw conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateConditionsRequest {
    pub conditions: String,
}

/// Request to test a rule against one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRuleRequest {
    pub rule_name: String,
    #[serde(default)]
    pub customer: Option<String>,
}

/// Result of enable / disable / toggle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleToggleResponse {
    pub success: bool,
    pub is_active: bool,
    pub message: String,
}

/// Result of a rule test send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRuleResponse {
    pub success: bool,
    pub customer: Option<String>,
    pub mobile_no: Option<String>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn rule(frequency: Frequency, last: Option<DateTime<Utc>>) -> TriggerRule {
        TriggerRule {
            id: Uuid::new_v4(),
            rule_name: "test".into(),
            trigger_type: TriggerType::Birthday,
            message_template: "Hi {customer_name}".into(),
            conditions: None,
            frequency,
            days_interval: None,
            is_active: true,
            last_execution: last,
            execution_count: 0,
            error_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn never_executed_rule_can_execute() {
        for f in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly, Frequency::OneTime] {
            assert!(rule(f, None).can_execute(day(2026, 3, 4)));
        }
    }

    #[test]
    fn inactive_rule_never_executes() {
        let mut r = rule(Frequency::Daily, None);
        r.is_active = false;
        assert!(!r.can_execute(day(2026, 3, 4)));
    }

    #[test]
    fn daily_rule_runs_once_per_day() {
        let today = day(2026, 3, 4);
        assert!(!rule(Frequency::Daily, Some(at(2026, 3, 4))).can_execute(today));
        assert!(rule(Frequency::Daily, Some(at(2026, 3, 3))).can_execute(today));
    }

    #[test]
    fn weekly_rule_needs_seven_elapsed_days() {
        // Wednesday 2026-03-11; six days earlier is Thursday of the previous ISO week
        let today = day(2026, 3, 11);
        assert!(!rule(Frequency::Weekly, Some(at(2026, 3, 5))).can_execute(today));
        assert!(rule(Frequency::Weekly, Some(at(2026, 3, 3))).can_execute(today));
        assert!(rule(Frequency::Weekly, Some(at(2026, 3, 4))).can_execute(today));
    }

    #[test]
    fn weekly_rule_six_days_in_same_iso_week_is_blocked() {
        // Sunday 2026-03-15 vs Monday 2026-03-09: same ISO week, 6 days apart
        let today = day(2026, 3, 15);
        let last = at(2026, 3, 9);
        assert_eq!(last.iso_week(), today.iso_week());
        assert!(!rule(Frequency::Weekly, Some(last)).can_execute(today));
        assert!(rule(Frequency::Weekly, Some(last - Duration::days(2))).can_execute(today));
    }

    #[test]
    fn weekly_rule_across_year_boundary() {
        let today = day(2027, 1, 2);
        assert!(!rule(Frequency::Weekly, Some(at(2026, 12, 30))).can_execute(today));
        assert!(rule(Frequency::Weekly, Some(at(2026, 12, 26))).can_execute(today));
    }

    #[test]
    fn monthly_rule_runs_once_per_calendar_month() {
        assert!(!rule(Frequency::Monthly, Some(at(2026, 3, 1))).can_execute(day(2026, 3, 31)));
        assert!(rule(Frequency::Monthly, Some(at(2026, 3, 31))).can_execute(day(2026, 4, 1)));
        assert!(rule(Frequency::Monthly, Some(at(2025, 4, 15))).can_execute(day(2026, 4, 15)));
    }

    #[test]
    fn one_time_rule_runs_once() {
        assert!(!rule(Frequency::OneTime, Some(at(2020, 1, 1))).can_execute(day(2026, 3, 4)));
    }

    #[test]
    fn effective_days_interval_falls_back_to_type_default() {
        let mut r = rule(Frequency::Daily, None);
        r.trigger_type = TriggerType::InactiveCustomer;
        assert_eq!(r.effective_days_interval(), Some(90));
        r.days_interval = Some(45);
        assert_eq!(r.effective_days_interval(), Some(45));
    }

    #[test]
    fn dedup_windows_per_type() {
        assert_eq!(TriggerType::InvoiceDue.dedup_window(), DedupWindow::Reference);
        assert_eq!(TriggerType::Birthday.dedup_window(), DedupWindow::Today);
        assert_eq!(TriggerType::RepurchasePromotion.dedup_window(), DedupWindow::Days(7));
        assert_eq!(TriggerType::CustomerGroup.dedup_window(), DedupWindow::Days(30));
    }
}
