//! Database queries

pub mod bulk_sms;
pub mod customer;
pub mod rule;
pub mod scheduled_sms;
