//! Built-in defaults for settings that can be overridden from the environment

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

pub const DEFAULT_GATEWAY_RECEIVER_PARAM: &str = "to";
pub const DEFAULT_GATEWAY_MESSAGE_PARAM: &str = "message";
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Successful sends allowed per number within the window
pub const DEFAULT_RATE_LIMIT_MAX: usize = 5;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 3600;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Pause between campaign recipients
pub const DEFAULT_BULK_SEND_DELAY_MS: u64 = 3000;

pub const DEFAULT_TRIGGER_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_DISPATCH_BATCH_LIMIT: i64 = 100;
pub const DEFAULT_CAMPAIGN_INTERVAL_SECS: u64 = 60;

/// A Sending or Queued campaign untouched this long has lost its send job
pub const DEFAULT_CAMPAIGN_STALE_SECS: u64 = 1800;

pub const DEFAULT_OTP_EXPIRY_MINUTES: i64 = 5;
