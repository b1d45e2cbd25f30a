use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use deployhook_config::Config;
use deployhook_core::{
    AuditLog, AuditSink, AuditStatus, Dispatcher, ExecutionOutcome, Invocation, RemoteExecutor,
    RemoteTarget, SshExecutor,
};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tower::ServiceExt; // For `oneshot`

use crate::{AppState, app};

const SECRET: &str = "s3cr3t";

struct EchoExecutor;

#[async_trait]
impl RemoteExecutor for EchoExecutor {
    async fn execute(&self, _target: &RemoteTarget, invocation: &Invocation) -> ExecutionOutcome {
        ExecutionOutcome {
            succeeded: true,
            stdout: format!("deployed {}", invocation.branch),
            stderr: String::new(),
            failure_detail: None,
            exit_code: Some(0),
            duration: Duration::from_millis(1),
        }
    }
}

struct TestApp {
    _dir: tempfile::TempDir,
    audit: Arc<AuditLog>,
    router: Router,
}

fn test_app() -> TestApp {
    test_app_with(Arc::new(EchoExecutor))
}

fn test_app_with(executor: Arc<dyn RemoteExecutor>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(scripts.join("site.sh"), "#!/bin/bash\n").unwrap();

    let config = Config {
        secret: Some(SECRET.to_string()),
        host_user: Some("deploy".to_string()),
        scripts_path: Some("/home/deploy/scripts".to_string()),
        scripts_dir: scripts,
        ..Config::default()
    };

    let audit = Arc::new(AuditLog::in_memory());
    let dispatcher = Arc::new(Dispatcher::new(audit.clone(), executor));
    let state = AppState {
        config: Arc::new(RwLock::new(config)),
        dispatcher,
        audit: audit.clone(),
    };

    TestApp {
        _dir: dir,
        audit,
        router: app(state),
    }
}

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn push(branch: &str) -> String {
    json!({
        "ref": format!("refs/heads/{branch}"),
        "repository": { "name": "site" },
        "commits": [ { "id": "abcdef0123456789", "message": "ship it", "author": { "name": "alice" } } ]
    })
    .to_string()
}

fn webhook(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Hub-Signature-256", sign(&body))
        .header("X-GitHub-Event", "push")
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn signed_webhook_runs_script() {
    let app = test_app();

    let response = app.router.oneshot(webhook("/", push("main"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["project"], "site");
    assert_eq!(body["branch"], "main");
    assert_eq!(body["eventKind"], "Commit");
    assert_eq!(body["committer"], "alice");
    assert_eq!(body["output"], "deployed main");
}

#[tokio::test]
async fn form_encoded_webhook_is_rejected_before_verification() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("payload=%7B%7D"))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Request body is missing or not in expected format."
    );
    let entries = app.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::ValidationError);
}

#[tokio::test]
async fn wrong_signature_is_unauthorized() {
    let app = test_app();
    let body = push("main");
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Hub-Signature-256", sign("something else"))
        .body(Body::from(body))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await["error"],
        "Invalid signature. Access denied."
    );
}

#[tokio::test]
async fn refs_query_filters_branches() {
    let app = test_app();

    let response = app
        .router
        .oneshot(webhook("/?refs=main&refs=develop", push("feature/x")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(
        body["message"],
        "Push to branch 'feature/x' ignored. Not in allowed list."
    );
    assert_eq!(app.audit.entries().await[0].status, AuditStatus::Ignored);
}

#[tokio::test]
async fn empty_refs_value_rejects_every_branch() {
    let app = test_app();

    let response = app.router.oneshot(webhook("/?refs=", push("main"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["message"],
        "Push to branch 'main' ignored. Not in allowed list."
    );
    assert_eq!(app.audit.entries().await[0].status, AuditStatus::Ignored);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let app = test_app();
    let body = json!({ "ref": "refs/heads/main", "repository": { "name": "api" } }).to_string();

    let response = app.router.oneshot(webhook("/", body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "Script not found");
}

fn manual(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/execute-script")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn manual_execution() {
    let app = test_app();

    let ok = app
        .router
        .clone()
        .oneshot(manual(json!({ "projectName": "site", "branchName": "release", "secret": SECRET })))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(json_body(ok).await["output"], "deployed release");

    let forbidden = app
        .router
        .clone()
        .oneshot(manual(json!({ "projectName": "site", "branchName": "main", "secret": "nope" })))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let incomplete = app
        .router
        .clone()
        .oneshot(manual(json!({ "projectName": "site", "secret": SECRET })))
        .await
        .unwrap();
    assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);

    let missing = app
        .router
        .oneshot(manual(json!({ "projectName": "api", "branchName": "main", "secret": SECRET })))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_execution_rejects_non_json_body() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/execute-script")
        .body(Body::from("projectName=site"))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let entries = app.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::ValidationError);
    assert_eq!(
        entries[0].message,
        "Manual execution rejected: Request body must be a JSON object."
    );
}

fn logs(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/logs")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn logs_are_gated_by_secret_and_chronological() {
    let app = test_app();
    app.audit
        .append(deployhook_core::AuditLogEntry::new(AuditStatus::Ignored, "older"))
        .await;
    app.audit
        .append(deployhook_core::AuditLogEntry::new(AuditStatus::NotFound, "newer"))
        .await;

    let denied = app.router.clone().oneshot(logs("secret=wrong")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let missing = app.router.clone().oneshot(logs("")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);

    let allowed = app.router.oneshot(logs("secret=s3cr3t")).await.unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let body = json_body(allowed).await;
    assert_eq!(body[0]["message"], "older");
    assert_eq!(body[1]["message"], "newer");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deployment_survives_sender_disconnect() {
    use std::os::unix::fs::PermissionsExt;

    let bin = tempfile::tempdir().unwrap();
    let marker = bin.path().join("deployed");
    let fake_ssh = bin.path().join("fake-ssh");
    std::fs::write(
        &fake_ssh,
        format!("#!/bin/sh\nsleep 1\ntouch '{}'\necho done\n", marker.display()),
    )
    .unwrap();
    std::fs::set_permissions(&fake_ssh, std::fs::Permissions::from_mode(0o755)).unwrap();

    let app = test_app_with(Arc::new(SshExecutor::with_program(fake_ssh.clone())));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let body = push("main");
    let request = format!(
        "POST / HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\n\
         X-Hub-Signature-256: {}\r\nContent-Length: {}\r\n\r\n{body}",
        sign(&body),
        body.len()
    );
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    drop(stream);

    let finished = async {
        loop {
            let statuses: Vec<AuditStatus> = app
                .audit
                .entries()
                .await
                .iter()
                .map(|entry| entry.status)
                .collect();
            if statuses.contains(&AuditStatus::ExecutionSuccess) {
                return statuses;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    let statuses = tokio::time::timeout(Duration::from_secs(5), finished)
        .await
        .expect("deployment did not finish after the sender disconnected");

    assert_eq!(
        statuses,
        [AuditStatus::ExecutionSuccess, AuditStatus::ExecutionAttempt]
    );
    assert!(marker.exists());
}
