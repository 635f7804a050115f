//! NATS message handlers

pub mod bulk_sms;
pub mod ping;
pub mod pos;
pub mod rule;
pub mod sms;
pub mod system;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::App;
use crate::services::bulk_job_queue::BulkJobQueue;
use crate::services::error::{ServiceError, ServiceResult};
use crate::types::{ErrorResponse, Request, SuccessResponse};

pub type HandlerHandle = JoinHandle<Result<()>>;

/// Answer requests on `subject` with `handler` until the subscription closes.
///
/// Unparseable payloads get `INVALID_REQUEST`; service errors are mapped to
/// their code.
pub async fn serve<T, R, F, Fut>(client: Client, subject: &'static str, handler: F) -> Result<()>
where
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(Request<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServiceResult<R>> + Send + 'static,
{
    let mut subscriber = client.subscribe(subject).await?;

    while let Some(msg) = subscriber.next().await {
        debug!(subject, "Received message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!(subject, "Message without reply subject");
                continue;
            }
        };

        let request: Request<T> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!(subject, "Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let request_id = request.id;
        let bytes = match handler(request).await {
            Ok(payload) => serde_json::to_vec(&SuccessResponse::new(request_id, payload))?,
            Err(e) => {
                match &e {
                    ServiceError::Internal(cause) => error!(subject, error = %cause, "Request failed"),
                    other => debug!(subject, code = other.code(), error = %other, "Request rejected"),
                }
                serde_json::to_vec(&ErrorResponse::new(request_id, e.code(), e.to_string()))?
            }
        };
        let _ = client.publish(reply, bytes.into()).await;
    }

    Ok(())
}

/// Start all message handlers and wait until one of them stops
pub async fn start_handlers(client: Client, app: Arc<App>, queue: Arc<BulkJobQueue>) -> Result<()> {
    info!("Starting message handlers...");

    let mut handles: Vec<HandlerHandle> = Vec::new();

    let client_ping = client.clone();
    handles.push(tokio::spawn(async move {
        let subscriber = client_ping.subscribe("smstrigger.ping").await?;
        ping::handle_ping(client_ping, subscriber).await
    }));

    rule::spawn_handlers(&client, &app, &mut handles);
    sms::spawn_handlers(&client, &app, &mut handles);
    bulk_sms::spawn_handlers(&client, &app, &queue, &mut handles);
    pos::spawn_handlers(&client, &app, &mut handles);
    system::spawn_handlers(&client, &app, &mut handles);

    let queue_processor = queue.clone();
    handles.push(tokio::spawn(async move { queue_processor.start_processing().await }));

    info!(count = handles.len(), "Message handlers started");

    let (result, index, _) = futures::future::select_all(handles).await;
    match result {
        Ok(Ok(())) => warn!(index, "Handler finished"),
        Ok(Err(e)) => error!(index, "Handler error: {}", e),
        Err(e) => error!(index, "Handler panicked: {}", e),
    }

    Ok(())
}
