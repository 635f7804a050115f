//! Bulk SMS campaign handlers for NATS messages

use std::sync::Arc;

use async_nats::Client;
use tracing::{info, warn};
use uuid::Uuid;

use super::{serve, HandlerHandle};
use crate::app::App;
use crate::services::bulk_job_queue::BulkJobQueue;
use crate::services::error::ServiceResult;
use crate::types::{
    BulkJobSubmitResponse, BulkRetryResult, BulkSmsIdRequest, BulkSmsStatus, BulkSubmitResult, CreateBulkSmsRequest,
    LoadRecipientsRequest, Request, SetRecipientsRequest,
};

/// Publish a send job for a campaign already committed to Queued. A failed
/// publish leaves the campaign Queued for the campaign sweep to requeue.
async fn enqueue(queue: &BulkJobQueue, id: Uuid, user_id: Option<String>) -> Option<BulkJobSubmitResponse> {
    match queue.submit(id, user_id).await {
        Ok(job) => Some(job),
        Err(e) => {
            warn!(bulk_sms = %id, error = %e, "Failed to publish bulk SMS job, leaving it to the campaign sweep");
            None
        }
    }
}

/// Subscribe the `smstrigger.bulk.*` subjects
pub fn spawn_handlers(
    client: &Client,
    app: &Arc<App>,
    queue: &Arc<BulkJobQueue>,
    handles: &mut Vec<HandlerHandle>,
) {
    let app_create = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.bulk.create",
        move |request: Request<CreateBulkSmsRequest>| {
            let app = app_create.clone();
            async move { app.bulk.create_campaign(request.payload, request.user_id).await }
        },
    )));

    let app_load = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.bulk.load_recipients",
        move |request: Request<LoadRecipientsRequest>| {
            let app = app_load.clone();
            async move { app.bulk.load_recipients(request.payload.id, request.payload.force).await }
        },
    )));

    let app_set = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.bulk.set_recipients",
        move |request: Request<SetRecipientsRequest>| {
            let app = app_set.clone();
            async move {
                let SetRecipientsRequest { id, recipients } = request.payload;
                app.bulk.set_recipients(id, recipients).await
            }
        },
    )));

    let (app_submit, queue_submit) = (app.clone(), queue.clone());
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.bulk.submit",
        move |request: Request<BulkSmsIdRequest>| {
            let (app, queue) = (app_submit.clone(), queue_submit.clone());
            async move {
                let campaign = app.bulk.submit(request.payload.id).await?;
                let job = if campaign.status == BulkSmsStatus::Queued {
                    enqueue(&queue, campaign.id, request.user_id).await
                } else {
                    info!(bulk_sms = %campaign.id, scheduled = ?campaign.scheduled_datetime, "Bulk SMS scheduled");
                    None
                };
                ServiceResult::Ok(BulkSubmitResult { campaign, job })
            }
        },
    )));

    let (app_retry, queue_retry) = (app.clone(), queue.clone());
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.bulk.retry",
        move |request: Request<BulkSmsIdRequest>| {
            let (app, queue) = (app_retry.clone(), queue_retry.clone());
            async move {
                let id = request.payload.id;
                let reset = app.bulk.retry_failed(id).await?;
                let job = enqueue(&queue, id, request.user_id).await;
                ServiceResult::Ok(BulkRetryResult { reset, job })
            }
        },
    )));

    let app_get = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.bulk.get",
        move |request: Request<BulkSmsIdRequest>| {
            let app = app_get.clone();
            async move { app.bulk.get(request.payload.id).await }
        },
    )));

    let app_logs = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.bulk.logs",
        move |request: Request<BulkSmsIdRequest>| {
            let app = app_logs.clone();
            async move { app.bulk.logs(request.payload.id).await }
        },
    )));
}
