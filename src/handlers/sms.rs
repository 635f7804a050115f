//! Scheduled SMS handlers for NATS messages

use std::sync::Arc;

use async_nats::Client;

use super::{serve, HandlerHandle};
use crate::app::App;
use crate::services::error::ServiceResult;
use crate::types::{
    Request, ScheduleSmsRequest, SendImmediateRequest, SmsIdRequest, SmsStatsRequest,
};

/// Subscribe the `smstrigger.sms.*` subjects
pub fn spawn_handlers(client: &Client, app: &Arc<App>, handles: &mut Vec<HandlerHandle>) {
    let app_schedule = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.sms.schedule",
        move |request: Request<ScheduleSmsRequest>| {
            let app = app_schedule.clone();
            async move { app.dispatcher.schedule(request.payload).await }
        },
    )));

    let app_send = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.sms.send_immediate",
        move |request: Request<SendImmediateRequest>| {
            let app = app_send.clone();
            async move {
                let SendImmediateRequest { customer, message } = request.payload;
                app.dispatcher.send_immediate(customer, message).await
            }
        },
    )));

    let app_stats = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.sms.stats",
        move |request: Request<SmsStatsRequest>| {
            let app = app_stats.clone();
            async move { ServiceResult::Ok(app.dispatcher.stats(request.payload).await?) }
        },
    )));

    let app_retry = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.sms.retry",
        move |request: Request<SmsIdRequest>| {
            let app = app_retry.clone();
            async move { app.dispatcher.retry(request.payload.id).await }
        },
    )));
}
