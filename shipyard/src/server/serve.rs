//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ShipyardError;
use crate::server::handlers::{
    clone_handler, delete_project_handler, deploy_handler, disable_polling_handler,
    disable_webhook_handler, enable_polling_handler, enable_webhook_handler,
    get_autodeploy_handler, get_project_handler, health_handler, history_handler,
    import_handler, put_project_handler, regenerate_secret_handler, service_address_handler,
    update_interval_handler,
    version_handler, webhook_handler,
};
use crate::server::state::ServerState;

/// Largest accepted request body; push payloads stay well below it
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Routes of the HTTP API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Projects
        .route(
            "/projects/{owner}/{project}",
            put(put_project_handler)
                .get(get_project_handler)
                .delete(delete_project_handler),
        )
        .route("/projects/{owner}/{project}/import", post(import_handler))
        .route(
            "/projects/{owner}/{project}/services/{service}/address",
            get(service_address_handler),
        )
        // Deployments
        .route("/projects/{owner}/{project}/deploy", post(deploy_handler))
        .route("/projects/{owner}/{project}/clone", post(clone_handler))
        .route("/projects/{owner}/{project}/deployments", get(history_handler))
        // Auto-deploy configuration
        .route("/projects/{owner}/{project}/autodeploy", get(get_autodeploy_handler))
        .route(
            "/projects/{owner}/{project}/autodeploy/polling",
            post(enable_polling_handler).delete(disable_polling_handler),
        )
        .route(
            "/projects/{owner}/{project}/autodeploy/interval",
            put(update_interval_handler),
        )
        .route(
            "/projects/{owner}/{project}/autodeploy/webhook",
            post(enable_webhook_handler).delete(disable_webhook_handler),
        )
        .route(
            "/projects/{owner}/{project}/autodeploy/webhook/secret",
            post(regenerate_secret_handler),
        )
        // Webhook deliveries
        .route("/webhooks/{id}", post(webhook_handler))
        // State and middleware
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ShipyardError>>, ShipyardError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ShipyardError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ShipyardError::ServerError(e.to_string()))
    });

    Ok(handle)
}
