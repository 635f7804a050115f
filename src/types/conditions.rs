//! Rule conditions and campaign filters
//!
//! Conditions arrive as free-form JSON in one of two shapes:
//!
//! - an equality map: `{"customer_group": "Retail", "territory": "Dhaka"}`;
//!   a value may also be an `[operator, value]` pair, e.g. `{"mobile_no": ["!=", ""]}`
//! - a predicate list: `[{"field": "gender", "operator": "=", "value": "Female"}]`
//!   or `[["gender", "=", "Female"]]`
//!
//! Both are normalized to a flat `Vec<Predicate>` before any query is built.
//! Only fields from the static [`CustomerField`] allow-list reach the customer
//! query; anything else is treated as a selector parameter (e.g. `item_code`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::customer::{Customer, CustomerField};

/// Reasons a conditions document is rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionsError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("conditions must be a JSON object or a list of predicates, got {0}")]
    NotAFilter(&'static str),
    #[error("predicate #{index} is malformed: {reason}")]
    InvalidPredicate { index: usize, reason: String },
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
}

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
    Like,
    Gt,
    Ge,
    Lt,
    Le,
    IsSet,
    IsNotSet,
}

impl Operator {
    /// Parse an operator token. `is` needs the value (`set` / `not set`) to resolve.
    pub fn parse(op: &str, value: &Value) -> Result<Self, ConditionsError> {
        let token = op.trim().to_lowercase();
        let parsed = match token.as_str() {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "like" => Self::Like,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "<" => Self::Lt,
            "<=" => Self::Le,
            "is" => match value.as_str().map(|v| v.trim().to_lowercase()).as_deref() {
                Some("set") => Self::IsSet,
                Some("not set") => Self::IsNotSet,
                _ => return Err(ConditionsError::UnknownOperator(format!("is {}", value))),
            },
            _ => return Err(ConditionsError::UnknownOperator(op.to_string())),
        };
        Ok(parsed)
    }

    /// SQL operator used by the Postgres query builder
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::In => "= ANY",
            Self::NotIn => "<> ALL",
            Self::Like => "LIKE",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::IsSet => "IS SET",
            Self::IsNotSet => "IS NOT SET",
        }
    }
}

/// A single `field op value` condition, field not yet checked against the allow-list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

/// A predicate over an allow-listed customer attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerPredicate {
    pub field: CustomerField,
    pub op: Operator,
    pub value: Value,
}

impl CustomerPredicate {
    pub fn new(field: CustomerField, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: CustomerField, value: impl Into<String>) -> Self {
        Self::new(field, Operator::Eq, Value::String(value.into()))
    }

    /// Values of an `in` / `not in` predicate as text
    pub fn value_list(&self) -> Vec<String> {
        match &self.value {
            Value::Array(items) => items.iter().map(value_text).collect(),
            other => vec![value_text(other)],
        }
    }

    /// Evaluate against a customer. Comparisons operate on the text form of the
    /// attribute, missing attributes compare as the empty string.
    pub fn matches(&self, customer: &Customer) -> bool {
        let actual = customer.field_text(self.field).unwrap_or_default();
        let expected = value_text(&self.value);

        match self.op {
            Operator::Eq => actual == expected,
            Operator::Ne => actual != expected,
            Operator::In => self.value_list().contains(&actual),
            Operator::NotIn => !self.value_list().contains(&actual),
            Operator::Like => like_match(&actual, &expected),
            Operator::Gt => actual > expected,
            Operator::Ge => actual >= expected,
            Operator::Lt => actual < expected,
            Operator::Le => actual <= expected,
            Operator::IsSet => !actual.is_empty(),
            Operator::IsNotSet => actual.is_empty(),
        }
    }
}

/// Parsed conditions document
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    EqualityMap(Map<String, Value>),
    PredicateList(Vec<Predicate>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::EqualityMap(Map::new())
    }
}

impl Filter {
    /// Parse a raw JSON string
    pub fn parse(raw: &str) -> Result<Self, ConditionsError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ConditionsError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Interpret an already-decoded JSON value. `null` is an empty filter.
    pub fn from_value(value: &Value) -> Result<Self, ConditionsError> {
        match value {
            Value::Null => Ok(Filter::default()),
            Value::Object(map) => {
                // Validate operator pairs eagerly so bad maps fail at save time
                for (field, v) in map {
                    map_entry_predicate(field, v)?;
                }
                Ok(Filter::EqualityMap(map.clone()))
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| list_predicate(index, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Filter::PredicateList),
            Value::Bool(_) => Err(ConditionsError::NotAFilter("a boolean")),
            Value::Number(_) => Err(ConditionsError::NotAFilter("a number")),
            Value::String(_) => Err(ConditionsError::NotAFilter("a string")),
        }
    }

    /// Optional conditions column to filter; `None` is an empty filter
    pub fn from_optional(value: Option<&Value>) -> Result<Self, ConditionsError> {
        value.map(Self::from_value).unwrap_or_else(|| Ok(Filter::default()))
    }

    /// Normalized predicate list
    pub fn predicates(&self) -> Vec<Predicate> {
        match self {
            Filter::EqualityMap(map) => map
                .iter()
                .filter_map(|(field, v)| map_entry_predicate(field, v).ok())
                .collect(),
            Filter::PredicateList(list) => list.clone(),
        }
    }

    /// First equality value for `name`, used for selector parameters like `item_code`
    pub fn param(&self, name: &str) -> Option<String> {
        self.predicates()
            .into_iter()
            .find(|p| p.field == name && p.op == Operator::Eq)
            .map(|p| value_text(&p.value))
            .filter(|v| !v.is_empty())
    }

    /// Predicates over allow-listed customer fields, minus the `skip` fields.
    /// Returns the names of non-customer fields alongside.
    pub fn customer_predicates(&self, skip: &[CustomerField]) -> (Vec<CustomerPredicate>, Vec<String>) {
        let mut predicates = Vec::new();
        let mut ignored = Vec::new();

        for p in self.predicates() {
            match CustomerField::from_str(&p.field) {
                Some(field) if skip.contains(&field) => {}
                Some(field) => predicates.push(CustomerPredicate {
                    field,
                    op: p.op,
                    value: p.value,
                }),
                None => ignored.push(p.field),
            }
        }

        (predicates, ignored)
    }
}

/// Result of `validate_conditions`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionsValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Check a raw conditions string without touching any state
pub fn validate_conditions(raw: &str) -> ConditionsValidation {
    let parsed = serde_json::from_str::<Value>(raw)
        .map_err(|e| ConditionsError::InvalidJson(e.to_string()))
        .and_then(|value| Filter::from_value(&value).map(|_| value));

    match parsed {
        Ok(value) => ConditionsValidation {
            valid: true,
            parsed: Some(value),
            error: None,
        },
        Err(e) => ConditionsValidation {
            valid: false,
            parsed: None,
            error: Some(e.to_string()),
        },
    }
}

/// Text form of a JSON scalar as it is compared against a column
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn map_entry_predicate(field: &str, value: &Value) -> Result<Predicate, ConditionsError> {
    if let Value::Array(pair) = value {
        if let [Value::String(op), operand] = pair.as_slice() {
            return Ok(Predicate {
                field: field.to_string(),
                op: Operator::parse(op, operand)?,
                value: operand.clone(),
            });
        }
    }
    Ok(Predicate {
        field: field.to_string(),
        op: Operator::Eq,
        value: value.clone(),
    })
}

fn list_predicate(index: usize, item: &Value) -> Result<Predicate, ConditionsError> {
    let invalid = |reason: &str| ConditionsError::InvalidPredicate {
        index,
        reason: reason.to_string(),
    };

    let (field, op, value) = match item {
        Value::Object(obj) => {
            let field = obj
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("missing 'field'"))?;
            let op = obj
                .get("operator")
                .or_else(|| obj.get("op"))
                .and_then(Value::as_str)
                .unwrap_or("=");
            let value = obj.get("value").cloned().unwrap_or(Value::Null);
            (field.to_string(), op.to_string(), value)
        }
        Value::Array(triple) => match triple.as_slice() {
            [Value::String(field), Value::String(op), value] => {
                (field.clone(), op.clone(), value.clone())
            }
            _ => return Err(invalid("expected [field, operator, value]")),
        },
        _ => return Err(invalid("expected an object or a [field, operator, value] triple")),
    };

    if field.trim().is_empty() {
        return Err(invalid("empty field name"));
    }

    Ok(Predicate {
        op: Operator::parse(&op, &value)?,
        field,
        value,
    })
}

/// SQL `LIKE` semantics: `%` matches any run, `_` one character
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer(group: &str, mobile: &str) -> Customer {
        Customer {
            id: "CUST-1".into(),
            customer_name: "Karim Traders".into(),
            mobile_no: Some(mobile.into()),
            customer_type: Some("Company".into()),
            customer_group: Some(group.into()),
            territory: Some("Dhaka".into()),
            gender: None,
            religion: None,
            profession: None,
            date_of_birth: None,
            sms_enabled: true,
        }
    }

    #[test]
    fn validate_accepts_object() {
        let result = validate_conditions(r#"{"a":1}"#);
        assert!(result.valid);
        assert_eq!(result.parsed, Some(json!({"a": 1})));
        assert!(result.error.is_none());
    }

    #[test]
    fn validate_rejects_garbage() {
        let result = validate_conditions("not json");
        assert!(!result.valid);
        assert!(result.parsed.is_none());
        assert!(!result.error.unwrap_or_default().is_empty());
    }

    #[test]
    fn validate_rejects_scalar_json() {
        let result = validate_conditions(r#""customer_group""#);
        assert!(!result.valid);
    }

    #[test]
    fn validate_rejects_unknown_operator() {
        let result = validate_conditions(r#"[["gender", "~=", "Male"]]"#);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("~="));
    }

    #[test]
    fn equality_map_normalizes_operator_pairs() {
        let filter = Filter::from_value(&json!({
            "customer_group": "Retail",
            "mobile_no": ["!=", ""]
        }))
        .unwrap();

        let predicates = filter.predicates();
        assert_eq!(predicates.len(), 2);
        assert!(predicates
            .iter()
            .any(|p| p.field == "mobile_no" && p.op == Operator::Ne));
    }

    #[test]
    fn predicate_list_accepts_objects_and_triples() {
        let filter = Filter::from_value(&json!([
            {"field": "gender", "operator": "=", "value": "Female"},
            ["territory", "in", ["Dhaka", "Khulna"]],
            ["profession", "is", "set"]
        ]))
        .unwrap();

        let ops: Vec<Operator> = filter.predicates().iter().map(|p| p.op).collect();
        assert_eq!(ops, vec![Operator::Eq, Operator::In, Operator::IsSet]);
    }

    #[test]
    fn customer_predicates_skip_non_customer_fields() {
        let filter = Filter::from_value(&json!({
            "customer_type": "Company",
            "territory": "Dhaka",
            "item_code": "ITEM-001"
        }))
        .unwrap();

        let (predicates, ignored) = filter.customer_predicates(&[CustomerField::CustomerType]);
        assert_eq!(predicates, vec![CustomerPredicate::eq(CustomerField::Territory, "Dhaka")]);
        assert_eq!(ignored, vec!["item_code".to_string()]);
        assert_eq!(filter.param("item_code").as_deref(), Some("ITEM-001"));
    }

    #[test]
    fn predicates_match_customers() {
        let c = customer("Retail", "01712345678");

        assert!(CustomerPredicate::eq(CustomerField::CustomerGroup, "Retail").matches(&c));
        assert!(!CustomerPredicate::eq(CustomerField::CustomerGroup, "Wholesale").matches(&c));
        assert!(CustomerPredicate::new(CustomerField::MobileNo, Operator::Ne, "").matches(&c));
        assert!(CustomerPredicate::new(CustomerField::Territory, Operator::In, json!(["Dhaka", "Sylhet"])).matches(&c));
        assert!(CustomerPredicate::new(CustomerField::CustomerName, Operator::Like, "Karim%").matches(&c));
        assert!(CustomerPredicate::new(CustomerField::Gender, Operator::IsNotSet, Value::Null).matches(&c));
        assert!(CustomerPredicate::new(CustomerField::SmsEnabled, Operator::Eq, true).matches(&c));
    }

    #[test]
    fn like_handles_wildcards() {
        assert!(like_match("Dhaka North", "%North"));
        assert!(like_match("Dhaka North", "Dh_ka%"));
        assert!(!like_match("Dhaka", "%North%"));
        assert!(like_match("", "%"));
    }
}
