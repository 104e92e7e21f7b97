//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::compose::classifier::{ImagePatternClassifier, ServiceClassifier};
use crate::compose::importer::ComposeImporter;
use crate::compose::transformer::ComposeTransformer;
use crate::deploy::executor::{DeploymentExecutor, ExecutorDeps};
use crate::deploy::git::{GitCli, GitClient};
use crate::deploy::runtime::{ContainerRuntime, DockerCompose};
use crate::errors::ShipyardError;
use crate::server::state::ServerState;
use crate::storage::autodeploy::AutoDeployStore;
use crate::storage::db::Database;
use crate::storage::deployment_log::DeploymentLogStore;
use crate::storage::layout::StorageLayout;
use crate::storage::ports::PortRegistry;
use crate::storage::projects::ProjectStore;
use crate::webhook::gateway::WebhookGateway;
use crate::workers::scheduler::DeploymentScheduler;

/// Main application state
pub struct AppState {
    pub layout: StorageLayout,
    pub projects: Arc<ProjectStore>,
    pub ports: Arc<PortRegistry>,
    pub autodeploy: Arc<AutoDeployStore>,
    pub logs: Arc<DeploymentLogStore>,
    pub importer: Arc<ComposeImporter>,
    pub executor: Arc<DeploymentExecutor>,
    pub gateway: Arc<WebhookGateway>,
    pub scheduler: Arc<DeploymentScheduler>,
}

impl AppState {
    /// Initialize application state on disk, with the real Git and Docker
    /// collaborators
    pub async fn init(options: &AppOptions) -> Result<Self, ShipyardError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        let db = Arc::new(Database::open(options.layout.database_file().path())?);
        let git: Arc<dyn GitClient> = Arc::new(GitCli::new(options.git.clone()));
        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(DockerCompose::new(options.runtime.clone()));

        Ok(Self::assemble(options, db, git, runtime))
    }

    /// Wire the stores and services around an open database
    pub fn assemble(
        options: &AppOptions,
        db: Arc<Database>,
        git: Arc<dyn GitClient>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let layout = options.layout.clone();
        let projects = Arc::new(ProjectStore::new(db.clone()));
        let ports = Arc::new(PortRegistry::new(db.clone(), layout.projects_dir().path()));
        let autodeploy = Arc::new(AutoDeployStore::new(db.clone()));
        let logs = Arc::new(DeploymentLogStore::new(db));

        let classifier: Arc<dyn ServiceClassifier> = if options.stateful_image_patterns.is_empty() {
            Arc::new(ImagePatternClassifier::default())
        } else {
            Arc::new(ImagePatternClassifier::new(
                options.stateful_image_patterns.iter().cloned(),
            ))
        };
        let importer = Arc::new(ComposeImporter::new(
            layout.clone(),
            ports.clone(),
            ComposeTransformer::new(classifier),
            options.import.clone(),
        ));

        let executor = Arc::new(DeploymentExecutor::new(ExecutorDeps {
            layout: layout.clone(),
            projects: projects.clone(),
            logs: logs.clone(),
            autodeploy: autodeploy.clone(),
            importer: importer.clone(),
            git,
            runtime,
        }));
        let gateway = Arc::new(WebhookGateway::new(autodeploy.clone(), executor.clone()));
        let scheduler = Arc::new(DeploymentScheduler::new(
            layout.clone(),
            autodeploy.clone(),
            executor.clone(),
            options.scheduler.clone(),
        ));

        Self {
            layout,
            projects,
            ports,
            autodeploy,
            logs,
            importer,
            executor,
            gateway,
            scheduler,
        }
    }

    pub fn server_state(&self) -> ServerState {
        ServerState {
            projects: self.projects.clone(),
            ports: self.ports.clone(),
            autodeploy: self.autodeploy.clone(),
            logs: self.logs.clone(),
            importer: self.importer.clone(),
            executor: self.executor.clone(),
            gateway: self.gateway.clone(),
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), ShipyardError> {
        info!("Shutting down application state...");
        // In-flight deployments are not cancelled; their locks die with the process
        Ok(())
    }
}
