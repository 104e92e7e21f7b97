//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What started a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Clone,
    Pull,
    Manual,
    Auto,
    Webhook,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Clone => "clone",
            TriggerKind::Pull => "pull",
            TriggerKind::Manual => "manual",
            TriggerKind::Auto => "auto",
            TriggerKind::Webhook => "webhook",
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clone" => Ok(TriggerKind::Clone),
            "pull" => Ok(TriggerKind::Pull),
            "manual" => Ok(TriggerKind::Manual),
            "auto" => Ok(TriggerKind::Auto),
            "webhook" => Ok(TriggerKind::Webhook),
            _ => Err(format!("Invalid trigger kind: {}", s)),
        }
    }
}

/// Persisted status of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Pulling,
    Restarting,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Pulling => "pulling",
            DeploymentStatus::Restarting => "restarting",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// Whether the attempt has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "pulling" => Ok(DeploymentStatus::Pulling),
            "restarting" => Ok(DeploymentStatus::Restarting),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// One row of the deployment audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    pub id: i64,
    pub owner: String,
    pub project: String,
    pub trigger: TriggerKind,
    pub old_commit: Option<String>,
    pub new_commit: Option<String>,
    pub commit_message: Option<String>,
    pub status: DeploymentStatus,
    pub error_message: Option<String>,

    /// Elapsed wall time in milliseconds, set once the attempt finishes
    pub duration_ms: Option<i64>,

    pub created_at: DateTime<Utc>,
}

/// Fields written when an attempt moves to a new status
#[derive(Debug, Clone, Default)]
pub struct DeploymentLogUpdate {
    pub new_commit: Option<String>,
    pub commit_message: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}
