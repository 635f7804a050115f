//! Delivery channel: number normalization, rate limiting and bounded retries
//! in front of an `SmsTransport`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::rate_limiter::SendLimiter;
use super::sms_transport::SmsTransport;

/// Longest text handed to the transport, in characters
pub const MAX_MESSAGE_CHARS: usize = 1600;

const MIN_NUMBER_DIGITS: usize = 10;
const MAX_NUMBER_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Invalid mobile number: '{0}'")]
    InvalidNumber(String),
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),
    #[error("{0}")]
    Rejected(String),
    #[error("Delivery failed after {attempts} attempts: {message}")]
    TransportExhausted { attempts: u32, message: String },
}

/// Successful delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub number: String,
    pub attempts: u32,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt `attempt` (1-based): base, 2×base, 4×base, …
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Strip everything but digits and check the length
pub fn normalize_number(raw: &str) -> Result<String, DeliveryError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if (MIN_NUMBER_DIGITS..=MAX_NUMBER_DIGITS).contains(&digits.len()) {
        Ok(digits)
    } else {
        Err(DeliveryError::InvalidNumber(raw.to_string()))
    }
}

pub struct DeliveryChannel {
    transport: Arc<dyn SmsTransport>,
    limiter: Arc<dyn SendLimiter>,
    policy: RetryPolicy,
}

impl DeliveryChannel {
    pub fn new(transport: Arc<dyn SmsTransport>, limiter: Arc<dyn SendLimiter>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiter,
            policy,
        }
    }

    pub fn gateway_configured(&self) -> bool {
        self.transport.is_configured()
    }

    pub fn limiter(&self) -> &Arc<dyn SendLimiter> {
        &self.limiter
    }

    /// Deliver `text` to `number`.
    ///
    /// Invalid numbers, empty text and rate-limited destinations fail without
    /// touching the transport. Only successful sends count against the limit.
    pub async fn send(&self, number: &str, text: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let number = normalize_number(number)?;

        if text.trim().is_empty() {
            return Err(DeliveryError::EmptyMessage);
        }
        let truncated = text.chars().count() > MAX_MESSAGE_CHARS;
        let body: String = if truncated {
            text.chars().take(MAX_MESSAGE_CHARS).collect()
        } else {
            text.to_string()
        };

        if !self.limiter.permits(&number) {
            warn!(number = %number, "SMS rate limit reached");
            return Err(DeliveryError::RateLimited(number));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.send_text(&number, &body).await {
                Ok(()) => {
                    self.limiter.record(&number);
                    debug!(number = %number, attempt, "SMS delivered");
                    return Ok(DeliveryReceipt {
                        number,
                        attempts: attempt,
                        truncated,
                    });
                }
                Err(e) if !e.is_retryable() => {
                    warn!(number = %number, attempt, error = %e, "SMS rejected");
                    return Err(DeliveryError::Rejected(e.to_string()));
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(number = %number, attempts = attempt, error = %e, "SMS delivery gave up");
                    return Err(DeliveryError::TransportExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(number = %number, attempt, error = %e, ?delay, "SMS attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
