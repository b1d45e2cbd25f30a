use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::post};
use deployhook_config::Config;
use deployhook_core::{AuditLog, Dispatcher, SshExecutor};
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

mod handlers;
mod validator;
mod watcher;

pub(crate) type GlobalConfig = Arc<RwLock<Config>>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub config: GlobalConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub audit: Arc<AuditLog>,
}

pub(crate) fn app(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::webhook_handler))
        .route("/execute-script", post(handlers::execute_script_handler))
        .route("/logs", post(handlers::logs_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = deployhook_config::command().get_matches();
    let config = deployhook_config::from_matches(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new(deployhook_config::DEFAULT_LOG_LEVEL));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .init();

    if config.secret().is_none() {
        tracing::warn!("GIT_SECRET is not set, every webhook will be rejected");
    }

    let audit = Arc::new(AuditLog::open(&config.log_file).await);
    let dispatcher = Arc::new(Dispatcher::new(audit.clone(), Arc::new(SshExecutor::default())));

    let port = config.port;
    let manifest = config.manifest.clone();
    let config = Arc::new(RwLock::new(config));

    let _watcher = match manifest {
        Some(manifest) => Some(watcher::watch_manifest(manifest, args, config.clone())?),
        None => None,
    };

    let state = AppState {
        config,
        dispatcher,
        audit,
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
