//! Customer and sales types read from the business platform

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Customer entity as mirrored from the platform.
///
/// `id` is the platform's own customer key (e.g. `CUST-00042`), not a UUID.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub customer_name: String,
    pub mobile_no: Option<String>,
    pub customer_type: Option<String>,
    pub customer_group: Option<String>,
    pub territory: Option<String>,
    pub gender: Option<String>,
    pub religion: Option<String>,
    pub profession: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub sms_enabled: bool,
}

impl Customer {
    /// Mobile number if present and not blank
    pub fn mobile(&self) -> Option<&str> {
        self.mobile_no
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// Text value of an allow-listed field, used for filter evaluation.
    pub fn field_text(&self, field: CustomerField) -> Option<String> {
        match field {
            CustomerField::CustomerName => Some(self.customer_name.clone()),
            CustomerField::MobileNo => self.mobile_no.clone(),
            CustomerField::CustomerType => self.customer_type.clone(),
            CustomerField::CustomerGroup => self.customer_group.clone(),
            CustomerField::Territory => self.territory.clone(),
            CustomerField::Gender => self.gender.clone(),
            CustomerField::Religion => self.religion.clone(),
            CustomerField::Profession => self.profession.clone(),
            CustomerField::SmsEnabled => Some(self.sms_enabled.to_string()),
        }
    }
}

/// Customer attributes that rule conditions and campaign filters may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerField {
    CustomerName,
    MobileNo,
    CustomerType,
    CustomerGroup,
    Territory,
    Gender,
    Religion,
    Profession,
    SmsEnabled,
}

impl CustomerField {
    pub const ALL: [CustomerField; 9] = [
        CustomerField::CustomerName,
        CustomerField::MobileNo,
        CustomerField::CustomerType,
        CustomerField::CustomerGroup,
        CustomerField::Territory,
        CustomerField::Gender,
        CustomerField::Religion,
        CustomerField::Profession,
        CustomerField::SmsEnabled,
    ];

    /// Column name in the `customers` table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerName => "customer_name",
            Self::MobileNo => "mobile_no",
            Self::CustomerType => "customer_type",
            Self::CustomerGroup => "customer_group",
            Self::Territory => "territory",
            Self::Gender => "gender",
            Self::Religion => "religion",
            Self::Profession => "profession",
            Self::SmsEnabled => "sms_enabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

/// Submitted invoice with an outstanding balance, joined with its customer
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OverdueInvoice {
    pub invoice_no: String,
    pub customer: String,
    pub customer_name: String,
    pub mobile_no: String,
    pub due_date: NaiveDate,
    pub outstanding_amount: f64,
}

/// Sales invoice as held by the in-memory business data store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesInvoice {
    pub name: String,
    pub customer: String,
    pub posting_date: NaiveDate,
    pub due_date: NaiveDate,
    pub outstanding_amount: f64,
    pub submitted: bool,
    #[serde(default)]
    pub item_codes: Vec<String>,
}

/// POS invoice line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosInvoiceItem {
    pub item_name: String,
    pub qty: f64,
}

/// POS invoice payload received when a point-of-sale invoice is submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosInvoice {
    pub name: String,
    pub customer: Option<String>,
    pub grand_total: f64,
    pub posting_date: NaiveDate,
    pub company: String,
    #[serde(default)]
    pub items: Vec<PosInvoiceItem>,
    #[serde(default)]
    pub payment_modes: Vec<String>,
}
