//! Realtime event publishing (campaign progress and completion)

use async_nats::Client;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

const REALTIME_PREFIX: &str = "smstrigger.realtime";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish `event` with `payload`, optionally addressed to one user
    async fn publish(&self, event: &str, payload: Value, target_user: Option<&str>) -> anyhow::Result<()>;
}

/// Publishes on `smstrigger.realtime.<event>`
pub struct NatsNotifier {
    client: Client,
}

impl NatsNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(&self, event: &str, payload: Value, target_user: Option<&str>) -> anyhow::Result<()> {
        let subject = format!("{}.{}", REALTIME_PREFIX, event);
        let envelope = json!({ "event": event, "user": target_user, "payload": payload });
        self.client
            .publish(subject.clone(), serde_json::to_vec(&envelope)?.into())
            .await?;
        debug!(subject = %subject, "Realtime event published");
        Ok(())
    }
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, event: &str, payload: Value, target_user: Option<&str>) -> anyhow::Result<()> {
        info!(event, user = ?target_user, %payload, "[LogNotifier] realtime event");
        Ok(())
    }
}

#[cfg(test)]
pub use fake::FakeNotifier;

#[cfg(test)]
mod fake {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct PublishedEvent {
        pub event: String,
        pub payload: Value,
        pub target_user: Option<String>,
    }

    #[derive(Default)]
    pub struct FakeNotifier {
        events: Mutex<Vec<PublishedEvent>>,
    }

    impl FakeNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self, event: &str) -> Vec<PublishedEvent> {
            self.events
                .lock()
                .iter()
                .filter(|e| e.event == event)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn publish(&self, event: &str, payload: Value, target_user: Option<&str>) -> anyhow::Result<()> {
            self.events.lock().push(PublishedEvent {
                event: event.to_string(),
                payload,
                target_user: target_user.map(String::from),
            });
            Ok(())
        }
    }
}
