//! POS invoice SMS and checkout OTP handlers for NATS messages

use std::sync::Arc;

use async_nats::Client;

use super::{serve, HandlerHandle};
use crate::app::App;
use crate::services::error::ServiceResult;
use crate::types::{
    OtpRequirementRequest, PosInvoiceSubmittedRequest, PosPreviewRequest, PosPreviewResponse,
    Request, SendOtpRequest, ValidateOtpRequest,
};

/// Subscribe the `smstrigger.pos.*` subjects
pub fn spawn_handlers(client: &Client, app: &Arc<App>, handles: &mut Vec<HandlerHandle>) {
    let app_invoice = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.pos.invoice_submitted",
        move |request: Request<PosInvoiceSubmittedRequest>| {
            let app = app_invoice.clone();
            async move { app.pos_sms.invoice_submitted(&request.payload.invoice).await }
        },
    )));

    let app_preview = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.pos.preview",
        move |request: Request<PosPreviewRequest>| {
            let app = app_preview.clone();
            async move {
                let message = app.pos_sms.preview(request.payload).await?;
                ServiceResult::Ok(PosPreviewResponse { message })
            }
        },
    )));

    let app_send = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.pos.otp.send",
        move |request: Request<SendOtpRequest>| {
            let app = app_send.clone();
            async move { app.otp.send_otp(&request.payload.customer).await }
        },
    )));

    let app_validate = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.pos.otp.validate",
        move |request: Request<ValidateOtpRequest>| {
            let app = app_validate.clone();
            async move {
                let ValidateOtpRequest { customer, otp } = request.payload;
                ServiceResult::Ok(app.otp.validate_otp(&customer, &otp))
            }
        },
    )));

    let app_required = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.pos.otp.required",
        move |request: Request<OtpRequirementRequest>| {
            let app = app_required.clone();
            async move { app.otp.check_requirement(&request.payload).await }
        },
    )));
}
