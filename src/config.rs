//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::defaults::*;
use crate::services::delivery::RetryPolicy;
use crate::services::pos::{PosSettings, DEFAULT_OTP_TEMPLATE, DEFAULT_POS_TEMPLATE};
use crate::services::sms_transport::GatewayConfig;

/// Where rules, messages, campaigns and business data live
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Postgres,
    /// In-process store, optionally seeded from a JSON file
    Memory { seed_file: Option<PathBuf> },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string (required for the postgres backend)
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub store_backend: StoreBackend,

    /// HTTP SMS gateway; messages are only logged when unset
    pub gateway: Option<GatewayConfig>,

    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub retry: RetryPolicy,
    pub bulk_send_delay: Duration,

    pub trigger_interval: Duration,
    pub dispatch_interval: Duration,
    pub dispatch_batch_limit: i64,
    pub campaign_interval: Duration,
    pub campaign_stale_after: Duration,

    pub pos: PosSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let nats_url = var("NATS_URL").unwrap_or_else(|| DEFAULT_NATS_URL.to_string());
        let database_url = var("DATABASE_URL");

        let store_backend = match var("STORE_BACKEND").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory {
                seed_file: var("SEED_FILE").map(PathBuf::from),
            },
            Some(other) => anyhow::bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        };
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set for the postgres store backend");
        }

        let gateway = match var("SMS_GATEWAY_URL") {
            Some(url) => Some(GatewayConfig {
                url,
                api_key: var("SMS_GATEWAY_API_KEY"),
                receiver_param: var("SMS_GATEWAY_RECEIVER_PARAM")
                    .unwrap_or_else(|| DEFAULT_GATEWAY_RECEIVER_PARAM.to_string()),
                message_param: var("SMS_GATEWAY_MESSAGE_PARAM")
                    .unwrap_or_else(|| DEFAULT_GATEWAY_MESSAGE_PARAM.to_string()),
                sender: var("SMS_GATEWAY_SENDER"),
                timeout: Duration::from_secs(parse_or(&var, "SMS_GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS)?),
            }),
            None => None,
        };

        let pos = PosSettings {
            enable_pos_sms: parse_or(&var, "ENABLE_POS_SMS", false)?,
            min_amount: parse_or(&var, "POS_MIN_AMOUNT", 0.0)?,
            customer_types: var("POS_CUSTOMER_TYPES")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            sms_template: var("POS_SMS_TEMPLATE").unwrap_or_else(|| DEFAULT_POS_TEMPLATE.to_string()),
            enable_otp: parse_or(&var, "ENABLE_POS_OTP", false)?,
            otp_expiry_minutes: parse_or(&var, "OTP_EXPIRY_MINUTES", DEFAULT_OTP_EXPIRY_MINUTES)?,
            otp_template: var("OTP_MESSAGE_TEMPLATE").unwrap_or_else(|| DEFAULT_OTP_TEMPLATE.to_string()),
            otp_on_discount_only: parse_or(&var, "OTP_ON_DISCOUNT_ONLY", false)?,
        };
        if pos.otp_expiry_minutes < 1 {
            anyhow::bail!("OTP_EXPIRY_MINUTES must be at least 1");
        }

        Ok(Self {
            nats_url,
            database_url,
            db_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            store_backend,
            gateway,
            rate_limit_max: parse_or(&var, "SMS_RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX)?,
            rate_limit_window: Duration::from_secs(parse_or(
                &var,
                "SMS_RATE_LIMIT_WINDOW_SECS",
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            )?),
            retry: RetryPolicy {
                max_attempts: parse_or(&var, "SMS_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)?,
                base_delay: Duration::from_millis(parse_or(&var, "SMS_RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)?),
            },
            bulk_send_delay: Duration::from_millis(parse_or(&var, "BULK_SEND_DELAY_MS", DEFAULT_BULK_SEND_DELAY_MS)?),
            trigger_interval: Duration::from_secs(parse_or(&var, "TRIGGER_INTERVAL_SECS", DEFAULT_TRIGGER_INTERVAL_SECS)?),
            dispatch_interval: Duration::from_secs(parse_or(&var, "DISPATCH_INTERVAL_SECS", DEFAULT_DISPATCH_INTERVAL_SECS)?),
            dispatch_batch_limit: parse_or(&var, "DISPATCH_BATCH_LIMIT", DEFAULT_DISPATCH_BATCH_LIMIT)?,
            campaign_interval: Duration::from_secs(parse_or(&var, "CAMPAIGN_INTERVAL_SECS", DEFAULT_CAMPAIGN_INTERVAL_SECS)?),
            campaign_stale_after: Duration::from_secs(parse_or(&var, "CAMPAIGN_STALE_SECS", DEFAULT_CAMPAIGN_STALE_SECS)?),
            pos,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
