//! Type definitions

pub mod bulk_job;
pub mod bulk_sms;
pub mod conditions;
pub mod customer;
pub mod health;
pub mod messages;
pub mod pos;
pub mod rule;
pub mod scheduled_sms;

pub use bulk_job::*;
pub use bulk_sms::*;
pub use conditions::*;
pub use customer::*;
pub use health::*;
pub use messages::*;
pub use pos::*;
pub use rule::*;
pub use scheduled_sms::*;
