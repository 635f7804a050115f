//! Ping handler for liveness checks

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct PingRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PongResponse {
    message: String,
    worker_version: &'static str,
    timestamp: String,
}

impl PongResponse {
    fn answer(request: PingRequest) -> Self {
        Self {
            message: request
                .message
                .map(|m| format!("Pong: {}", m))
                .unwrap_or_else(|| "Pong".to_string()),
            worker_version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Handle ping messages. Unparseable payloads are answered as a bare ping.
pub async fn handle_ping(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = msg.reply.clone() else {
            warn!("Ping message without reply subject");
            continue;
        };

        let request: PingRequest = serde_json::from_slice(&msg.payload).unwrap_or_default();
        let response = PongResponse::answer(request);

        client.publish(reply, serde_json::to_vec(&response)?.into()).await?;
        debug!("Sent pong response");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_echoes_message() {
        let request: PingRequest = serde_json::from_str(r#"{"message":"hello"}"#).unwrap();
        let response = PongResponse::answer(request);
        assert_eq!(response.message, "Pong: hello");
        assert_eq!(response.worker_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn bare_ping_gets_plain_pong() {
        assert_eq!(PongResponse::answer(PingRequest::default()).message, "Pong");
    }
}
