//! Server state

use std::sync::Arc;

use crate::compose::importer::ComposeImporter;
use crate::deploy::executor::DeploymentExecutor;
use crate::storage::autodeploy::AutoDeployStore;
use crate::storage::deployment_log::DeploymentLogStore;
use crate::storage::ports::PortRegistry;
use crate::storage::projects::ProjectStore;
use crate::webhook::gateway::WebhookGateway;

/// Server state shared across handlers
pub struct ServerState {
    pub projects: Arc<ProjectStore>,
    pub ports: Arc<PortRegistry>,
    pub autodeploy: Arc<AutoDeployStore>,
    pub logs: Arc<DeploymentLogStore>,
    pub importer: Arc<ComposeImporter>,
    pub executor: Arc<DeploymentExecutor>,
    pub gateway: Arc<WebhookGateway>,
}
