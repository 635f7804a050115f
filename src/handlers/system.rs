//! Health check and on-demand sweep handlers for NATS messages

use std::sync::Arc;

use async_nats::Client;
use chrono::Utc;

use super::{serve, HandlerHandle};
use crate::app::App;
use crate::defaults::DEFAULT_DISPATCH_BATCH_LIMIT;
use crate::services::error::ServiceResult;
use crate::services::error_handler::health_check;
use crate::types::{DispatchRunRequest, EmptyPayload, Request};

pub fn spawn_handlers(client: &Client, app: &Arc<App>, handles: &mut Vec<HandlerHandle>) {
    let app_health = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.health",
        move |_request: Request<Option<EmptyPayload>>| {
            let app = app_health.clone();
            async move {
                let report = health_check(&app.stores, app.channel.gateway_configured(), Utc::now()).await?;
                ServiceResult::Ok(report)
            }
        },
    )));

    let app_cycle = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.cycle.run",
        move |_request: Request<Option<EmptyPayload>>| {
            let app = app_cycle.clone();
            async move { ServiceResult::Ok(app.engine.run_cycle().await?) }
        },
    )));

    let app_dispatch = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.dispatch.run",
        move |request: Request<Option<DispatchRunRequest>>| {
            let app = app_dispatch.clone();
            async move {
                let limit = request
                    .payload
                    .and_then(|p| p.limit)
                    .unwrap_or(DEFAULT_DISPATCH_BATCH_LIMIT);
                ServiceResult::Ok(app.dispatcher.sweep_pending(limit).await?)
            }
        },
    )));
}
