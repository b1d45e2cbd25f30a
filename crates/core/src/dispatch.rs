//! End-to-end handling of webhook deliveries and manual executions.
//!
//! Webhook flow: raw body → shared secret → signature → payload → branch
//! filter → script → remote execution. Each rejection appends exactly one
//! audit entry before the error is returned; an execution appends an attempt
//! entry followed by a success or failure entry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use deployhook_config::Config;
use deployhook_origin::{EventKind, NormalizedEvent, WebhookOrigin, payload, secure_eq};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::audit::{AuditLogEntry, AuditSink, AuditStatus};
use crate::cmd::{ExecutionOutcome, Invocation, RemoteExecutor, RemoteTarget};
use crate::filter::BranchFilter;
use crate::scripts::{Lookup, ScriptError, resolve_script};
use crate::DispatchError;

/// An inbound webhook delivery, as captured by the HTTP layer.
#[derive(Debug)]
pub struct WebhookRequest<'a> {
    pub headers: &'a HeaderMap,
    /// Exact request body, `None` when it could not be captured as JSON.
    pub raw_body: Option<&'a [u8]>,
    pub branches: BranchFilter,
    pub remote_addr: Option<String>,
}

/// Body of a manual execution request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualTrigger {
    pub project_name: Option<String>,
    pub branch_name: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub message: String,
    pub project: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_kind: Option<EventKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub output: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct IgnoredReport {
    pub message: String,
    pub project: String,
    pub branch: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Dispatched {
    Executed(ExecutionReport),
    Ignored(IgnoredReport),
}

impl IntoResponse for Dispatched {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// What every audit entry of one execution is stamped with.
struct RunContext<'a> {
    project: &'a str,
    branch: &'a str,
    event: Option<&'a NormalizedEvent>,
    forced: bool,
}

impl RunContext<'_> {
    fn entry(&self, status: AuditStatus, message: impl Into<String>) -> AuditLogEntry {
        let entry = AuditLogEntry::new(status, message);
        match self.event {
            Some(event) => entry.with_event(event),
            None => entry.with_project(self.project).with_branch(self.branch),
        }
    }

    fn commit_message(&self) -> Value {
        self.event
            .map_or(Value::Null, |event| json!(event.commit_message))
    }

    fn trigger(&self) -> &'static str {
        if self.forced { "manual" } else { "webhook" }
    }
}

/// Keeps at most one execution per script in flight.
#[derive(Default)]
struct ExecutionLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ExecutionLocks {
    async fn acquire(&self, script: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(script.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Dispatcher {
    audit: Arc<dyn AuditSink>,
    executor: Arc<dyn RemoteExecutor>,
    locks: ExecutionLocks,
}

impl Dispatcher {
    pub fn new(audit: Arc<dyn AuditSink>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            audit,
            executor,
            locks: ExecutionLocks::default(),
        }
    }

    pub async fn dispatch_webhook(
        &self,
        config: &Config,
        request: WebhookRequest<'_>,
    ) -> Result<Dispatched, DispatchError> {
        let remote_addr = request.remote_addr.as_deref();

        let Some(body) = request.raw_body.filter(|body| !body.is_empty()) else {
            tracing::warn!("Request received without a JSON body, check the webhook content type");
            self.audit
                .append(
                    AuditLogEntry::new(
                        AuditStatus::ValidationError,
                        DispatchError::MissingRawBody.to_string(),
                    )
                    .with_details(json!({ "remoteAddress": remote_addr })),
                )
                .await;
            return Err(DispatchError::MissingRawBody);
        };

        // Parsed leniently up front so rejections can name the project.
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let project_hint = parsed
            .as_ref()
            .and_then(payload::project_name)
            .unwrap_or("N/A")
            .to_string();

        let Some(secret) = config.secret() else {
            tracing::error!("GIT_SECRET is not configured on the server");
            self.audit
                .append(
                    AuditLogEntry::new(AuditStatus::ConfigurationError, "GIT_SECRET is not configured.")
                        .with_details(json!({ "project": project_hint })),
                )
                .await;
            return Err(DispatchError::ServerMisconfigured("Secret not set."));
        };

        let verification = deployhook_origin::verify(request.headers, secret, Some(body));
        let source = verification.provider();
        let origin = verification.origin;
        if !verification.is_authentic {
            let failure = verification
                .failure
                .unwrap_or(deployhook_origin::Error::InvalidSignature);
            let message = match failure {
                deployhook_origin::Error::NoSignatureHeader => {
                    "Request received without signature header."
                }
                deployhook_origin::Error::InvalidToken => "Invalid GitLab token.",
                deployhook_origin::Error::MissingRawBody => "Request body is missing.",
                deployhook_origin::Error::InvalidSignature => "Invalid webhook signature.",
            };
            tracing::warn!("Rejected webhook from {source} for project {project_hint}: {failure}");
            self.audit
                .append(
                    AuditLogEntry::new(AuditStatus::ValidationError, message).with_details(json!({
                        "project": project_hint,
                        "remoteAddress": remote_addr,
                        "source": source,
                    })),
                )
                .await;
            return Err(DispatchError::Verification(failure));
        }

        let event_type = origin.and_then(|origin| origin.extract_event_type(request.headers));

        let Some(parsed) = parsed else {
            self.audit
                .append(
                    AuditLogEntry::new(
                        AuditStatus::ValidationError,
                        DispatchError::InvalidPayload.to_string(),
                    )
                    .with_details(json!({ "remoteAddress": remote_addr, "source": source })),
                )
                .await;
            return Err(DispatchError::InvalidPayload);
        };

        let event = match NormalizedEvent::from_payload(&parsed) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!("Rejected webhook payload for project {project_hint}: {error}");
                self.audit
                    .append(
                        AuditLogEntry::new(AuditStatus::ValidationError, format!("{error}."))
                            .with_project(project_hint)
                            .with_details(json!({ "source": source, "event": event_type })),
                    )
                    .await;
                return Err(error.into());
            }
        };

        if !request.branches.allows(&event.branch_name) {
            let message = format!(
                "Push to branch '{}' for project '{}' (commit: {}, by: {}, type: {:?}) ignored. Not in allowed list: [{}].",
                event.branch_name,
                event.project_name,
                event.short_hash(),
                event.committer_name,
                event.event_kind,
                request.branches.allowed().join(", ")
            );
            tracing::info!("{message}");
            self.audit
                .append(
                    AuditLogEntry::new(AuditStatus::Ignored, message)
                        .with_event(&event)
                        .with_details(json!({ "allowedBranches": request.branches.allowed() })),
                )
                .await;
            return Ok(Dispatched::Ignored(IgnoredReport {
                message: format!(
                    "Push to branch '{}' ignored. Not in allowed list.",
                    event.branch_name
                ),
                project: event.project_name,
                branch: event.branch_name,
            }));
        }

        tracing::info!(
            "Processing {:?} to branch '{}' for project '{}' (commit: {}, by: {}, source: {})",
            event.event_kind,
            event.branch_name,
            event.project_name,
            event.short_hash(),
            event.committer_name,
            source,
        );

        let context = RunContext {
            project: &event.project_name,
            branch: &event.branch_name,
            event: Some(&event),
            forced: false,
        };
        let (script, outcome) = self.run(config, &context, Lookup::Prefix).await?;

        Ok(Dispatched::Executed(ExecutionReport {
            message: format!("Script {script} executed successfully"),
            project: event.project_name.clone(),
            branch: event.branch_name.clone(),
            event_kind: Some(event.event_kind),
            committer: Some(event.committer_name.clone()),
            commit_hash: Some(event.commit_hash.clone()),
            output: outcome.stdout,
        }))
    }

    /// Runs `<project>.sh` for a caller holding the shared secret, bypassing
    /// signature checks and the branch filter.
    pub async fn dispatch_manual(
        &self,
        config: &Config,
        trigger: ManualTrigger,
    ) -> Result<Dispatched, DispatchError> {
        let Some(secret) = config.secret() else {
            tracing::error!("GIT_SECRET is not configured on the server");
            self.audit
                .append(AuditLogEntry::new(
                    AuditStatus::ConfigurationError,
                    "GIT_SECRET is not configured.",
                ))
                .await;
            return Err(DispatchError::ServerMisconfigured("Secret not set."));
        };

        let provided = trigger.secret.as_deref().unwrap_or_default();
        if provided.is_empty() || !secure_eq(provided, secret) {
            tracing::warn!(
                "Manual execution rejected, secret {}",
                if provided.is_empty() { "not provided" } else { "incorrect" }
            );
            let mut entry = AuditLogEntry::new(
                AuditStatus::ValidationError,
                "Manual execution rejected: incorrect or missing secret.",
            );
            if let Some(project) = trigger.project_name.as_deref() {
                entry = entry.with_project(project);
            }
            self.audit.append(entry).await;
            return Err(DispatchError::Forbidden);
        }

        let project = trigger.project_name.as_deref().filter(|s| !s.is_empty());
        let branch = trigger.branch_name.as_deref().filter(|s| !s.is_empty());
        let (Some(project), Some(branch)) = (project, branch) else {
            self.audit
                .append(AuditLogEntry::new(
                    AuditStatus::ValidationError,
                    "Manual execution requires projectName and branchName.",
                ))
                .await;
            return Err(DispatchError::InvalidRequest(
                "projectName and branchName are required",
            ));
        };

        tracing::info!("Manual execution requested for project '{project}' on branch '{branch}'");

        let context = RunContext {
            project,
            branch,
            event: None,
            forced: true,
        };
        let (script, outcome) = self.run(config, &context, Lookup::Exact).await?;

        Ok(Dispatched::Executed(ExecutionReport {
            message: format!("Script {script} executed successfully"),
            project: project.to_string(),
            branch: branch.to_string(),
            event_kind: None,
            committer: None,
            commit_hash: None,
            output: outcome.stdout,
        }))
    }

    async fn run(
        &self,
        config: &Config,
        context: &RunContext<'_>,
        lookup: Lookup,
    ) -> Result<(String, ExecutionOutcome), DispatchError> {
        let script = match resolve_script(&config.scripts_dir, context.project, lookup).await {
            Ok(script) => script,
            Err(ScriptError::NotFound) => {
                tracing::warn!(
                    "No script for project '{}' in {}",
                    context.project,
                    config.scripts_dir.display()
                );
                self.audit
                    .append(context.entry(AuditStatus::NotFound, "Script not found for project."))
                    .await;
                return Err(DispatchError::ScriptNotFound);
            }
            Err(ScriptError::Io(error)) => {
                tracing::error!("Error reading scripts folder: {error}");
                self.audit
                    .append(
                        context
                            .entry(AuditStatus::ServerError, "Error reading scripts folder.")
                            .with_details(json!({ "error": error.to_string() })),
                    )
                    .await;
                return Err(DispatchError::ScriptLookup(error));
            }
        };

        let target = match RemoteTarget::from_config(config) {
            Ok(target) => target,
            Err(error) => {
                tracing::error!("HOST_USER or SCRIPTS_PATH are not configured");
                self.audit
                    .append(context.entry(
                        AuditStatus::ConfigurationError,
                        "HOST_USER or SCRIPTS_PATH are not configured.",
                    ))
                    .await;
                return Err(error);
            }
        };

        let invocation = Invocation {
            script: script.clone(),
            branch: context.branch.to_string(),
            forced: context.forced,
        };

        let _guard = if config.serialize_executions {
            Some(self.locks.acquire(&script).await)
        } else {
            None
        };

        let command = invocation.remote_command(&target);
        tracing::info!(
            "Attempting to execute {script} on {} for branch {}",
            target.destination(),
            context.branch
        );
        self.audit
            .append(
                context
                    .entry(
                        AuditStatus::ExecutionAttempt,
                        format!("Attempting to execute {script} on host."),
                    )
                    .with_details(json!({
                        "command": command,
                        "trigger": context.trigger(),
                    })),
            )
            .await;

        let outcome = self.executor.execute(&target, &invocation).await;

        if outcome.succeeded {
            tracing::info!(
                "Script {script} executed successfully for branch '{}' in {:?}",
                context.branch,
                outcome.duration
            );
            self.audit
                .append(
                    context
                        .entry(
                            AuditStatus::ExecutionSuccess,
                            format!("Script {script} executed successfully on host."),
                        )
                        .with_details(json!({
                            "stdout": outcome.stdout,
                            "commitMessage": context.commit_message(),
                            "durationMs": outcome.duration.as_millis() as u64,
                        })),
                )
                .await;
            return Ok((script, outcome));
        }

        let detail = outcome
            .failure_detail
            .clone()
            .unwrap_or_else(|| "Remote execution failed".to_string());
        tracing::error!(
            "Error executing {script} for branch {}: {detail}\nSTDERR: {}\nSTDOUT: {}",
            context.branch,
            outcome.stderr,
            outcome.stdout
        );
        self.audit
            .append(
                context
                    .entry(
                        AuditStatus::ExecutionFailure,
                        format!("Error executing script {script} on host."),
                    )
                    .with_details(json!({
                        "error": detail,
                        "exitCode": outcome.exit_code,
                        "stderr": outcome.stderr,
                        "stdout": outcome.stdout,
                        "commitMessage": context.commit_message(),
                    })),
            )
            .await;

        let details = if outcome.stderr.is_empty() {
            detail
        } else {
            outcome.stderr
        };
        Err(DispatchError::Execution {
            details,
            stdout: outcome.stdout,
        })
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
