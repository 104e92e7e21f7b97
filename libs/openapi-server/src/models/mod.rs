//! Shipyard API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with every non-2xx status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    /// Every violation, for rejected composition documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Project registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRequest {
    /// `templated` or `custom_composition`
    pub kind: String,

    /// Template name, required for templated projects
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub owner: String,
    pub name: String,
    pub kind: String,
    pub template: Option<String>,
}

/// One published port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMappingResponse {
    pub service: String,
    pub internal: u16,
    pub external: u16,
    pub protocol: String,
}

/// Result of importing a custom composition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub subdir: Option<String>,
    pub base_port: u16,
    pub ports: Vec<PortMappingResponse>,
}

/// Container address of a project service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAddressResponse {
    pub container: String,

    /// `None` while the container is not attached to the shared network
    pub ip: Option<String>,
}

/// Clone request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneRequest {
    pub repo_url: String,
    pub branch: Option<String>,
}

/// Result of a deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    /// `skipped`, `completed` or `failed`
    pub result: String,
    pub log_id: Option<i64>,
    pub has_changes: Option<bool>,
    pub error: Option<String>,
}

/// Enable polling request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnablePollingRequest {
    pub branch: Option<String>,
    pub interval_minutes: Option<u32>,
}

/// Enable webhook request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnableWebhookRequest {
    pub branch: Option<String>,
}

/// Interval update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIntervalRequest {
    pub interval_minutes: u32,
}

/// Auto-deploy configuration of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoDeployConfigResponse {
    pub owner: String,
    pub project: String,
    pub branch: String,
    pub polling_enabled: bool,
    pub webhook_enabled: bool,
    pub webhook_id: i64,
    pub interval_minutes: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_commit: Option<String>,
}

/// Webhook secret, shown only when generated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSecretResponse {
    pub webhook_id: i64,
    pub webhook_path: String,
    pub secret: String,
}

/// Webhook delivery acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub accepted: bool,
    pub message: String,
}

/// One deployment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: i64,
    pub trigger: String,
    pub status: String,
    pub old_commit: Option<String>,
    pub new_commit: Option<String>,
    pub commit_message: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Deployment history, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryResponse {
    pub deployments: Vec<DeploymentResponse>,
    pub total: usize,
}
