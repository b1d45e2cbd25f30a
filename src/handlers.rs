use axum::Json;
use axum::extract::{RawQuery, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use deployhook_core::{
    AuditLogEntry, AuditSink, AuditStatus, DispatchError, Dispatched, ManualTrigger,
    WebhookRequest,
};
use deployhook_origin::secure_eq;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::{AppState, validator};

pub async fn webhook_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = validator::read_body(body).await;
    tracing::debug!("Webhook delivery with query {query:?}");

    // Snapshot so a reload never waits on a running deployment.
    let config = state.config.read().await.clone();
    let branches = validator::allowed_refs(query.as_deref());
    let remote_addr = validator::remote_addr(&parts.extensions);
    let headers = parts.headers;

    let task = tokio::spawn(async move {
        let request = WebhookRequest {
            headers: &headers,
            raw_body: validator::raw_json_body(&headers, body.as_ref()),
            branches,
            remote_addr,
        };
        state.dispatcher.dispatch_webhook(&config, request).await
    });

    settle(task).await
}

pub async fn execute_script_handler(State(state): State<AppState>, request: Request) -> Response {
    let (_, body) = request.into_parts();
    let Some(body) = validator::read_body(body).await else {
        return reject_manual(&state, "Request body could not be read").await;
    };

    let Ok(trigger) = serde_json::from_slice::<ManualTrigger>(&body) else {
        return reject_manual(&state, "Request body must be a JSON object").await;
    };

    let config = state.config.read().await.clone();
    let task =
        tokio::spawn(async move { state.dispatcher.dispatch_manual(&config, trigger).await });

    settle(task).await
}

/// Awaits a dispatch running on its own task.
///
/// The task outlives this handler, so a sender that hangs up mid-deployment
/// leaves the remote script and its audit trail running to completion.
async fn settle(task: JoinHandle<Result<Dispatched, DispatchError>>) -> Response {
    match task.await {
        Ok(result) => result.into_response(),
        Err(error) => {
            tracing::error!("Dispatch task failed: {error}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response()
        }
    }
}

async fn reject_manual(state: &AppState, reason: &'static str) -> Response {
    tracing::warn!("Manual execution rejected: {reason}");
    state
        .audit
        .append(AuditLogEntry::new(
            AuditStatus::ValidationError,
            format!("Manual execution rejected: {reason}."),
        ))
        .await;
    DispatchError::InvalidRequest(reason).into_response()
}

/// Returns the audit log, oldest entry first, to holders of the shared secret.
pub async fn logs_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let provided = match validator::read_body(body).await {
        Some(body) => validator::extract_secret(&parts.headers, &body),
        None => None,
    };

    let secret = state.config.read().await.secret().map(ToString::to_string);
    let Some(secret) = secret else {
        tracing::error!("GIT_SECRET is not configured on the server for log access");
        return DispatchError::ServerMisconfigured("Secret not set.").into_response();
    };

    match provided {
        Some(provided) if secure_eq(&provided, &secret) => {
            Json(state.audit.chronological().await).into_response()
        }
        provided => {
            tracing::warn!(
                "Failed attempt to access logs with incorrect secret: {}",
                if provided.is_some() { "provided" } else { "not provided" }
            );
            DispatchError::Forbidden.into_response()
        }
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
