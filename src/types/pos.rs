//! POS confirmation and OTP request types

use serde::{Deserialize, Serialize};

use super::customer::PosInvoice;

/// Request raised when a POS invoice is submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosInvoiceSubmittedRequest {
    pub invoice: PosInvoice,
}

/// Request to send an OTP to a customer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    pub customer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOtpRequest {
    pub customer: String,
    pub otp: String,
}

/// Request asking whether checkout needs an OTP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequirementRequest {
    pub customer: String,
    #[serde(default)]
    pub grand_total: f64,
    #[serde(default)]
    pub discount_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequirementResponse {
    pub required: bool,
}

/// Result of an OTP operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OtpResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            expiry_minutes: None,
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            expiry_minutes: None,
            error: Some(error.into()),
        }
    }
}

/// Request to render a POS template with sample invoice values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosPreviewRequest {
    pub template: String,
    #[serde(default)]
    pub customer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosPreviewResponse {
    pub message: String,
}
