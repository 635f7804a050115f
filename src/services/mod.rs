//! Business logic services

pub mod bulk_job_queue;
pub mod bulk_sms;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod error_handler;
pub mod notifier;
pub mod pos;
pub mod rate_limiter;
pub mod sms_transport;
pub mod template;
pub mod trigger_engine;
