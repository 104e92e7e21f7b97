//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    AutoDeployConfigResponse, CloneRequest, DeployResponse, DeploymentHistoryResponse,
    DeploymentResponse, EnablePollingRequest, EnableWebhookRequest, ErrorResponse,
    HealthResponse, ImportResponse, PortMappingResponse, ProjectRequest, ProjectResponse,
    ServiceAddressResponse, UpdateIntervalRequest, VersionResponse, WebhookResponse,
    WebhookSecretResponse,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};

use crate::deploy::executor::DeployOutcome;
use crate::errors::ShipyardError;
use crate::models::autodeploy::{AutoDeployConfig, PollInterval};
use crate::models::deployment::{DeploymentLogEntry, TriggerKind};
use crate::models::project::{validate_name, Project, ProjectKind};
use crate::server::state::ServerState;
use crate::storage::autodeploy::DEFAULT_BRANCH;
use crate::utils::version_info;
use crate::webhook::gateway::{WebhookDecision, SIGNATURE_HEADER};

/// Page size of the deployment history when none is requested
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

type ProjectPath = Path<(String, String)>;

// ================================= ERRORS ===================================== //

/// Handler error, rendered as an `ErrorResponse`
#[derive(Debug)]
pub struct ApiError(ShipyardError);

impl From<ShipyardError> for ApiError {
    fn from(err: ShipyardError) -> Self {
        Self(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP status of an error
pub fn status_for(err: &ShipyardError) -> StatusCode {
    match err {
        ShipyardError::NotFound(_) => StatusCode::NOT_FOUND,
        ShipyardError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ShipyardError::InvalidRequest(_) | ShipyardError::ParseError(_) => {
            StatusCode::BAD_REQUEST
        }
        ShipyardError::YamlError(_) => StatusCode::BAD_REQUEST,
        ShipyardError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ShipyardError::PortExhausted(_) => StatusCode::CONFLICT,
        ShipyardError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let details = match &self.0 {
            ShipyardError::ValidationError(errors) => errors.clone(),
            _ => Vec::new(),
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

// =============================== CONVERSIONS ================================== //

fn project_response(project: &Project) -> ProjectResponse {
    let (kind, template) = match &project.kind {
        ProjectKind::Templated { template } => ("templated", Some(template.clone())),
        ProjectKind::CustomComposition => ("custom_composition", None),
    };
    ProjectResponse {
        owner: project.owner.clone(),
        name: project.name.clone(),
        kind: kind.to_string(),
        template,
    }
}

fn config_response(config: &AutoDeployConfig) -> AutoDeployConfigResponse {
    AutoDeployConfigResponse {
        owner: config.owner.clone(),
        project: config.project.clone(),
        branch: config.branch.clone(),
        polling_enabled: config.enabled,
        webhook_enabled: config.webhook_enabled,
        webhook_id: config.id,
        interval_minutes: config.interval.minutes(),
        last_check: config.last_check,
        last_commit: config.last_commit.clone(),
    }
}

fn deployment_response(entry: DeploymentLogEntry) -> DeploymentResponse {
    DeploymentResponse {
        id: entry.id,
        trigger: entry.trigger.as_str().to_string(),
        status: entry.status.as_str().to_string(),
        old_commit: entry.old_commit,
        new_commit: entry.new_commit,
        commit_message: entry.commit_message,
        error_message: entry.error_message,
        duration_ms: entry.duration_ms,
        created_at: entry.created_at,
    }
}

fn deploy_response(outcome: DeployOutcome) -> DeployResponse {
    match outcome {
        DeployOutcome::Skipped => DeployResponse {
            result: "skipped".to_string(),
            log_id: None,
            has_changes: None,
            error: None,
        },
        DeployOutcome::Completed {
            log_id,
            has_changes,
        } => DeployResponse {
            result: "completed".to_string(),
            log_id: Some(log_id),
            has_changes: Some(has_changes),
            error: None,
        },
        DeployOutcome::Failed { log_id, error } => DeployResponse {
            result: "failed".to_string(),
            log_id,
            has_changes: None,
            error: Some(error),
        },
    }
}

fn secret_response(webhook_id: i64, secret: &SecretString) -> WebhookSecretResponse {
    WebhookSecretResponse {
        webhook_id,
        webhook_path: format!("/webhooks/{}", webhook_id),
        secret: secret.expose_secret().to_string(),
    }
}

fn require_project(state: &ServerState, owner: &str, name: &str) -> Result<Project, ShipyardError> {
    state
        .projects
        .get(owner, name)?
        .ok_or_else(|| ShipyardError::NotFound(format!("project {}/{}", owner, name)))
}

fn require_config(
    state: &ServerState,
    owner: &str,
    name: &str,
) -> Result<AutoDeployConfig, ShipyardError> {
    state.autodeploy.get(owner, name)?.ok_or_else(|| {
        ShipyardError::NotFound(format!("auto-deploy configuration of {}/{}", owner, name))
    })
}

// ================================ SERVICE ===================================== //

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipyard".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================ PROJECTS ==================================== //

/// Register or update a project
pub async fn put_project_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
    Json(request): Json<ProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_name(&owner)?;
    validate_name(&name)?;

    let kind = match request.kind.as_str() {
        "templated" => {
            let template = request
                .template
                .filter(|template| !template.is_empty())
                .ok_or_else(|| {
                    ShipyardError::InvalidRequest("templated projects need a template".into())
                })?;
            ProjectKind::Templated { template }
        }
        "custom_composition" => ProjectKind::CustomComposition,
        other => {
            return Err(ShipyardError::InvalidRequest(format!("unknown project kind: {}", other)).into())
        }
    };

    let project = Project { owner, name, kind };
    state.projects.upsert(&project)?;
    Ok(Json(project_response(&project)))
}

pub async fn get_project_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
) -> ApiResult<impl IntoResponse> {
    let project = require_project(&state, &owner, &name)?;
    Ok(Json(project_response(&project)))
}

/// Forget a project: its ports, auto-deploy configuration and history
pub async fn delete_project_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
) -> ApiResult<StatusCode> {
    require_project(&state, &owner, &name)?;
    let released = state.ports.release_ports(&owner, &name)?;
    state.autodeploy.delete(&owner, &name)?;
    state.projects.delete(&owner, &name)?;
    info!(owner = %owner, project = %name, released, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Validate and transform the project's composition document
pub async fn import_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
) -> ApiResult<impl IntoResponse> {
    let project = require_project(&state, &owner, &name)?;
    if !project.kind.is_custom() {
        return Err(ShipyardError::InvalidRequest(
            "only custom-composition projects are imported".into(),
        )
        .into());
    }

    let outcome = state.importer.process_document(&owner, &name).await?;
    let ports = outcome
        .mappings
        .iter()
        .map(|mapping| PortMappingResponse {
            service: mapping.service.clone(),
            internal: mapping.internal,
            external: mapping.external,
            protocol: mapping.protocol.as_str().to_string(),
        })
        .collect();
    Ok(Json(ImportResponse {
        subdir: outcome.subdir,
        base_port: outcome.base_port,
        ports,
    }))
}

/// Address of a project service on the shared network
pub async fn service_address_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name, service)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let project = require_project(&state, &owner, &name)?;
    let container = format!("{}-{}", project.prefix(), service);
    let ip = state.executor.runtime().container_ip(&container).await?;
    Ok(Json(ServiceAddressResponse { container, ip }))
}

// =============================== DEPLOYMENTS ================================== //

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    /// `manual` (default) or `pull`
    pub trigger: Option<String>,
}

/// Deploy now; a concurrent attempt makes this one a no-op
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
    Query(query): Query<DeployQuery>,
) -> ApiResult<impl IntoResponse> {
    let trigger = match query.trigger.as_deref() {
        None | Some("manual") => TriggerKind::Manual,
        Some("pull") => TriggerKind::Pull,
        Some(other) => {
            return Err(ShipyardError::InvalidRequest(format!("unsupported trigger: {}", other)).into())
        }
    };
    require_project(&state, &owner, &name)?;

    let outcome = state.executor.execute_deploy(&owner, &name, trigger).await;
    Ok(Json(deploy_response(outcome)))
}

/// Clone the project's repository and start it
pub async fn clone_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
    Json(request): Json<CloneRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.repo_url.trim().is_empty() {
        return Err(ShipyardError::InvalidRequest("repo_url is required".into()).into());
    }
    require_project(&state, &owner, &name)?;

    let branch = request.branch.unwrap_or_default();
    let outcome = state
        .executor
        .execute_clone(&owner, &name, request.repo_url.trim(), &branch)
        .await;
    Ok(Json(deploy_response(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Deployment history, newest first
pub async fn history_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let deployments: Vec<DeploymentResponse> = state
        .logs
        .recent(&owner, &name, limit)?
        .into_iter()
        .map(deployment_response)
        .collect();
    let total = deployments.len();
    Ok(Json(DeploymentHistoryResponse { deployments, total }))
}

// =============================== AUTO-DEPLOY ================================== //

pub async fn get_autodeploy_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
) -> ApiResult<impl IntoResponse> {
    let config = require_config(&state, &owner, &name)?;
    Ok(Json(config_response(&config)))
}

/// Enable polling; unset fields keep their current values
pub async fn enable_polling_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
    Json(request): Json<EnablePollingRequest>,
) -> ApiResult<impl IntoResponse> {
    require_project(&state, &owner, &name)?;
    let current = state.autodeploy.get(&owner, &name)?;

    let branch = request
        .branch
        .or_else(|| current.as_ref().map(|config| config.branch.clone()))
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
    let minutes = request
        .interval_minutes
        .or_else(|| current.as_ref().map(|config| config.interval.minutes()))
        .unwrap_or_else(|| PollInterval::default().minutes());

    let config = state
        .autodeploy
        .enable_polling(&owner, &name, &branch, minutes)?;
    Ok(Json(config_response(&config)))
}

pub async fn disable_polling_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
) -> ApiResult<StatusCode> {
    state.autodeploy.disable_polling(&owner, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Enable webhook delivery and reveal the secret
pub async fn enable_webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
    Json(request): Json<EnableWebhookRequest>,
) -> ApiResult<impl IntoResponse> {
    require_project(&state, &owner, &name)?;
    let branch = match request.branch {
        Some(branch) => branch,
        None => state
            .autodeploy
            .get(&owner, &name)?
            .map(|config| config.branch)
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
    };

    let (config, secret) = state.autodeploy.enable_webhook(&owner, &name, &branch)?;
    Ok(Json(secret_response(config.id, &secret)))
}

pub async fn disable_webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
) -> ApiResult<StatusCode> {
    state.autodeploy.disable_webhook(&owner, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn regenerate_secret_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
) -> ApiResult<impl IntoResponse> {
    let secret = state.autodeploy.regenerate_webhook_secret(&owner, &name)?;
    let config = require_config(&state, &owner, &name)?;
    Ok(Json(secret_response(config.id, &secret)))
}

pub async fn update_interval_handler(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): ProjectPath,
    Json(request): Json<UpdateIntervalRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .autodeploy
        .update_interval(&owner, &name, request.interval_minutes)?;
    let config = require_config(&state, &owner, &name)?;
    Ok(Json(config_response(&config)))
}

// ================================ WEBHOOKS ==================================== //

/// Push notification endpoint
///
/// Authentication happens before the response; the deployment itself runs in
/// the background.
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(webhook_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let response = match state.gateway.authorize(webhook_id, signature, &body)? {
        WebhookDecision::Deploy { owner, project } => {
            drop(state.gateway.dispatch(owner, project));
            (
                StatusCode::ACCEPTED,
                Json(WebhookResponse {
                    accepted: true,
                    message: "Deployment started".to_string(),
                }),
            )
        }
        WebhookDecision::Ignored { reason } => (
            StatusCode::OK,
            Json(WebhookResponse {
                accepted: false,
                message: reason,
            }),
        ),
    };
    Ok(response)
}
