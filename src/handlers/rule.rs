//! Trigger rule handlers for NATS messages

use std::sync::Arc;

use async_nats::Client;

use super::{serve, HandlerHandle};
use crate::app::App;
use crate::services::error::ServiceResult;
use crate::types::{
    validate_conditions, CreateRuleRequest, ListRulesRequest, Request, RuleNameRequest,
    TestRuleRequest, ValidateConditionsRequest,
};

/// Subscribe the `smstrigger.rule.*` subjects
pub fn spawn_handlers(client: &Client, app: &Arc<App>, handles: &mut Vec<HandlerHandle>) {
    let app_create = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.rule.create",
        move |request: Request<CreateRuleRequest>| {
            let app = app_create.clone();
            async move { app.engine.create_rule(request.payload).await }
        },
    )));

    let app_list = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.rule.list",
        move |request: Request<ListRulesRequest>| {
            let app = app_list.clone();
            async move { ServiceResult::Ok(app.stores.rules.list_rules(request.payload.active_only).await?) }
        },
    )));

    for (subject, active) in [
        ("smstrigger.rule.enable", Some(true)),
        ("smstrigger.rule.disable", Some(false)),
        ("smstrigger.rule.toggle", None),
    ] {
        let app_toggle = app.clone();
        handles.push(tokio::spawn(serve(
            client.clone(),
            subject,
            move |request: Request<RuleNameRequest>| {
                let app = app_toggle.clone();
                async move { app.engine.set_rule_active(&request.payload.rule_name, active).await }
            },
        )));
    }

    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.rule.validate_conditions",
        |request: Request<ValidateConditionsRequest>| async move {
            ServiceResult::Ok(validate_conditions(&request.payload.conditions))
        },
    )));

    let app_test = app.clone();
    handles.push(tokio::spawn(serve(
        client.clone(),
        "smstrigger.rule.test",
        move |request: Request<TestRuleRequest>| {
            let app = app_test.clone();
            async move { app.engine.test_rule(request.payload).await }
        },
    )));
}
