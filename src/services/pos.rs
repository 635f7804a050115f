//! Point-of-sale confirmations and checkout OTPs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use super::delivery::DeliveryChannel;
use super::dispatcher::Dispatcher;
use super::error::{ServiceError, ServiceResult};
use super::template::{format_amount, MessageRenderer, RenderContext};
use crate::store::{BusinessData, MessageStore};
use crate::types::{
    Customer, DedupQuery, DeliveryResult, NewScheduledSms, OtpRequirementRequest, OtpRequirementResponse,
    OtpResponse, PosInvoice, PosPreviewRequest, SmsReference, TriggerType,
};

const POS_DOCTYPE: &str = "POS Invoice";
const WALK_IN_CUSTOMER: &str = "Walking Customer";
const ITEMS_SHOWN: usize = 3;

pub const DEFAULT_POS_TEMPLATE: &str =
    "Dear {customer_name}, thank you for shopping with {company}. Invoice {invoice_no}, amount {amount}.";
pub const DEFAULT_OTP_TEMPLATE: &str = "Your OTP is {otp}. It is valid for {minutes} minutes.";

/// POS SMS and OTP settings
#[derive(Debug, Clone)]
pub struct PosSettings {
    pub enable_pos_sms: bool,
    pub min_amount: f64,
    /// Customer types eligible for POS SMS and OTP; empty means no restriction
    /// for SMS and walk-in customers only for OTP
    pub customer_types: Vec<String>,
    pub sms_template: String,
    pub enable_otp: bool,
    pub otp_expiry_minutes: i64,
    pub otp_template: String,
    pub otp_on_discount_only: bool,
}

impl Default for PosSettings {
    fn default() -> Self {
        Self {
            enable_pos_sms: false,
            min_amount: 0.0,
            customer_types: Vec::new(),
            sms_template: DEFAULT_POS_TEMPLATE.to_string(),
            enable_otp: false,
            otp_expiry_minutes: 5,
            otp_template: DEFAULT_OTP_TEMPLATE.to_string(),
            otp_on_discount_only: false,
        }
    }
}

impl PosSettings {
    fn type_allowed(&self, customer: &Customer) -> bool {
        let customer_type = customer.customer_type.as_deref().unwrap_or_default();
        self.customer_types.iter().any(|t| t == customer_type)
    }
}

/// "Soap (2), Rice (1.5), Oil (1), and 2 more items"
fn item_list(invoice: &PosInvoice) -> String {
    let mut parts: Vec<String> = invoice
        .items
        .iter()
        .take(ITEMS_SHOWN)
        .map(|item| format!("{} ({})", item.item_name, item.qty))
        .collect();
    if invoice.items.len() > ITEMS_SHOWN {
        parts.push(format!("and {} more items", invoice.items.len() - ITEMS_SHOWN));
    }
    parts.join(", ")
}

fn payment_mode(invoice: &PosInvoice) -> String {
    invoice
        .payment_modes
        .first()
        .cloned()
        .unwrap_or_else(|| "Cash".to_string())
}

// =============================================================================
// POS invoice SMS
// =============================================================================

pub struct PosSmsService {
    settings: Arc<PosSettings>,
    business: Arc<dyn BusinessData>,
    messages: Arc<dyn MessageStore>,
    dispatcher: Arc<Dispatcher>,
    renderer: Arc<MessageRenderer>,
}

impl PosSmsService {
    pub fn new(
        settings: Arc<PosSettings>,
        business: Arc<dyn BusinessData>,
        messages: Arc<dyn MessageStore>,
        dispatcher: Arc<Dispatcher>,
        renderer: Arc<MessageRenderer>,
    ) -> Self {
        Self {
            settings,
            business,
            messages,
            dispatcher,
            renderer,
        }
    }

    /// Send the purchase confirmation for a submitted POS invoice.
    /// `None` when the invoice or customer does not qualify.
    pub async fn invoice_submitted(&self, invoice: &PosInvoice) -> ServiceResult<Option<DeliveryResult>> {
        if !self.settings.enable_pos_sms {
            return Ok(None);
        }
        if invoice.grand_total < self.settings.min_amount {
            debug!(invoice = %invoice.name, "POS invoice below SMS minimum");
            return Ok(None);
        }
        let Some(customer_id) = invoice.customer.as_deref().filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        let Some(customer) = self.business.get_customer(customer_id).await? else {
            warn!(invoice = %invoice.name, customer = %customer_id, "POS invoice customer not found");
            return Ok(None);
        };
        let Some(mobile) = customer.mobile().filter(|_| customer.sms_enabled) else {
            return Ok(None);
        };
        if !self.settings.customer_types.is_empty() && !self.settings.type_allowed(&customer) {
            return Ok(None);
        }

        let reference = SmsReference::new(POS_DOCTYPE, invoice.name.as_str());
        let already_sent = self
            .messages
            .message_exists(&DedupQuery {
                customer: customer.id.clone(),
                trigger_type: TriggerType::PosInvoice,
                reference: Some(reference.clone()),
                since: None,
            })
            .await?;
        if already_sent {
            debug!(invoice = %invoice.name, "POS invoice SMS already recorded");
            return Ok(None);
        }

        let context = RenderContext::new()
            .with("customer_name", customer.customer_name.as_str())
            .with("invoice_no", invoice.name.as_str())
            .with("amount", format_amount(invoice.grand_total))
            .with("date", invoice.posting_date.to_string())
            .with("company", invoice.company.as_str())
            .with("items", item_list(invoice))
            .with("payment_mode", payment_mode(invoice));
        let message = self
            .renderer
            .render(&self.settings.sms_template, &context)
            .map_err(|e| ServiceError::validation(e.to_string()))?;

        let sms = self
            .messages
            .insert_message(NewScheduledSms {
                customer: customer.id.clone(),
                mobile_no: mobile.to_string(),
                message,
                trigger_type: TriggerType::PosInvoice,
                reference: Some(reference),
                scheduled_datetime: Utc::now(),
            })
            .await?;

        let result = self.dispatcher.send_one(sms.id).await?;
        info!(invoice = %invoice.name, sms_id = %sms.id, success = result.success, "POS invoice SMS sent");
        Ok(Some(result))
    }

    /// Render a POS template with sample invoice values
    pub async fn preview(&self, request: PosPreviewRequest) -> ServiceResult<String> {
        let customer = match request.customer.as_deref() {
            Some(id) => self.business.get_customer(id).await?,
            None => self.business.first_customer_with_mobile().await?,
        };
        let customer_name = customer
            .map(|c| c.customer_name)
            .unwrap_or_else(|| "John Doe".to_string());

        let context = RenderContext::new()
            .with("customer_name", customer_name)
            .with("invoice_no", "POS-INV-001")
            .with("amount", format_amount(1500.0))
            .with("date", Utc::now().date_naive().to_string())
            .with("company", "Your Company")
            .with("items", "Item 1 (2), Item 2 (1)")
            .with("payment_mode", "Cash");
        self.renderer
            .render(&request.template, &context)
            .map_err(|e| ServiceError::validation(e.to_string()))
    }
}

// =============================================================================
// OTP
// =============================================================================

/// Wrong guesses allowed before a code is discarded
pub const MAX_OTP_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
struct OtpEntry {
    code: String,
    expires_at: DateTime<Utc>,
    failed_attempts: u32,
}

pub struct OtpService {
    settings: Arc<PosSettings>,
    business: Arc<dyn BusinessData>,
    channel: Arc<DeliveryChannel>,
    renderer: Arc<MessageRenderer>,
    codes: Mutex<HashMap<String, OtpEntry>>,
}

impl OtpService {
    pub fn new(
        settings: Arc<PosSettings>,
        business: Arc<dyn BusinessData>,
        channel: Arc<DeliveryChannel>,
        renderer: Arc<MessageRenderer>,
    ) -> Self {
        Self {
            settings,
            business,
            channel,
            renderer,
            codes: Mutex::new(HashMap::new()),
        }
    }

    fn generate_code() -> String {
        format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
    }

    /// Generate, remember and text a fresh code to the customer
    pub async fn send_otp(&self, customer_id: &str) -> ServiceResult<OtpResponse> {
        if !self.settings.enable_otp {
            return Ok(OtpResponse::error("OTP verification is disabled"));
        }
        if customer_id.trim().is_empty() {
            return Ok(OtpResponse::error("Customer is required"));
        }
        let customer = self
            .business
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", customer_id))?;
        let Some(mobile) = customer.mobile() else {
            return Ok(OtpResponse::error("Customer has no mobile number"));
        };

        let minutes = self.settings.otp_expiry_minutes.max(1);
        let code = Self::generate_code();
        let context = RenderContext::new()
            .with("otp", code.as_str())
            .with("minutes", minutes);
        let message = self
            .renderer
            .render(&self.settings.otp_template, &context)
            .map_err(|e| ServiceError::validation(e.to_string()))?;

        self.codes.lock().insert(
            customer_id.to_string(),
            OtpEntry {
                code,
                expires_at: Utc::now() + Duration::minutes(minutes),
                failed_attempts: 0,
            },
        );

        match self.channel.send(mobile, &message).await {
            Ok(_) => {
                info!(customer = %customer_id, "OTP sent");
                Ok(OtpResponse {
                    expiry_minutes: Some(minutes),
                    ..OtpResponse::ok(format!("OTP sent to {}", mobile))
                })
            }
            Err(e) => {
                self.codes.lock().remove(customer_id);
                warn!(customer = %customer_id, error = %e, "OTP delivery failed");
                Ok(OtpResponse::error(e.to_string()))
            }
        }
    }

    pub fn validate_otp(&self, customer_id: &str, otp: &str) -> OtpResponse {
        self.validate_otp_at(customer_id, otp, Utc::now())
    }

    /// Check a code; a matching code is consumed, and so is one guessed wrong
    /// `MAX_OTP_ATTEMPTS` times
    pub fn validate_otp_at(&self, customer_id: &str, otp: &str, now: DateTime<Utc>) -> OtpResponse {
        if customer_id.trim().is_empty() || otp.trim().is_empty() {
            return OtpResponse::error("Customer and OTP are required");
        }

        let mut codes = self.codes.lock();
        let Some(entry) = codes.get_mut(customer_id).filter(|entry| entry.expires_at > now) else {
            codes.remove(customer_id);
            return OtpResponse::error("OTP expired or not found. Please request a new one.");
        };

        if entry.code == otp.trim() {
            codes.remove(customer_id);
            return OtpResponse::ok("OTP Verified");
        }

        entry.failed_attempts += 1;
        if entry.failed_attempts >= MAX_OTP_ATTEMPTS {
            codes.remove(customer_id);
            warn!(customer = %customer_id, "OTP discarded after too many invalid attempts");
            return OtpResponse::error("Too many invalid attempts. Please request a new OTP.");
        }
        OtpResponse::error("Invalid OTP")
    }

    /// Whether checkout for this customer must be confirmed by OTP
    pub async fn check_requirement(&self, request: &OtpRequirementRequest) -> ServiceResult<OtpRequirementResponse> {
        if !self.settings.enable_otp {
            return Ok(OtpRequirementResponse { required: false });
        }

        let customer = self.business.get_customer(&request.customer).await?;
        let required = if self.settings.customer_types.is_empty() {
            request.customer == WALK_IN_CUSTOMER
                || customer
                    .as_ref()
                    .and_then(|c| c.customer_group.as_deref())
                    .map_or(false, |g| g == WALK_IN_CUSTOMER)
        } else {
            customer.as_ref().map_or(false, |c| self.settings.type_allowed(c))
        };

        let required = required && (!self.settings.otp_on_discount_only || request.discount_amount > 0.0);
        Ok(OtpRequirementResponse { required })
    }

    /// Drop codes that can no longer be used
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        self.codes.lock().retain(|_, entry| entry.expires_at > now);
    }
}
