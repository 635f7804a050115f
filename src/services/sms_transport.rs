//! SMS transport abstraction.
//!
//! `SmsTransport` sends one text to one normalized number. `HttpSmsTransport`
//! talks to the configured HTTP gateway, `LogSmsTransport` only logs (dev),
//! `FakeSmsTransport` records calls and replays scripted failures (tests).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

// =============================================================================
// Core trait
// =============================================================================

/// Failure reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("gateway timed out")]
    Timeout,
    #[error("gateway rejected message: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Network and timeout failures may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout)
    }
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError>;

    /// Whether a real gateway is behind this transport
    fn is_configured(&self) -> bool {
        true
    }
}

// =============================================================================
// HttpSmsTransport
// =============================================================================

/// HTTP gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub receiver_param: String,
    pub message_param: String,
    pub sender: Option<String>,
    pub timeout: Duration,
}

pub struct HttpSmsTransport {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpSmsTransport {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn form<'a>(&'a self, to: &'a str, body: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut params = vec![
            (self.config.receiver_param.as_str(), to),
            (self.config.message_param.as_str(), body),
        ];
        if let Some(sender) = &self.config.sender {
            params.push(("sender", sender.as_str()));
        }
        params
    }
}

#[async_trait]
impl SmsTransport for HttpSmsTransport {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.config.url).form(&self.form(to, body));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 5xx is retried like a network failure
            if status.is_server_error() {
                return Err(TransportError::Network(format!("gateway error {}: {}", status, body)));
            }
            return Err(TransportError::Rejected(format!("{}: {}", status, body)));
        }

        debug!(to = %to, "SMS accepted by gateway");
        Ok(())
    }
}

// =============================================================================
// LogSmsTransport
// =============================================================================

/// Writes messages to the log instead of sending them
pub struct LogSmsTransport;

#[async_trait]
impl SmsTransport for LogSmsTransport {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        info!(to = %to, chars = body.chars().count(), "[LogSmsTransport] Would send SMS: {}", body);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

// =============================================================================
// FakeSmsTransport
// =============================================================================

#[cfg(test)]
pub use fake::FakeSmsTransport;
