//! Deployment executor
//!
//! Runs one attempt (pull and restart, or clone) under the project's
//! single-flight lock. Every state change is written to the attempt's log row
//! as it happens, and pipeline errors end up in that row instead of
//! propagating to the trigger.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::compose::importer::ComposeImporter;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::git::GitClient;
use crate::deploy::lock::DeployLocks;
use crate::deploy::runtime::ContainerRuntime;
use crate::errors::ShipyardError;
use crate::models::deployment::{DeploymentLogUpdate, TriggerKind};
use crate::models::project::Project;
use crate::storage::autodeploy::AutoDeployStore;
use crate::storage::deployment_log::DeploymentLogStore;
use crate::storage::layout::StorageLayout;
use crate::storage::projects::ProjectStore;
use crate::utils::redact_credentials;

/// Commit message recorded when a pull brought nothing new
pub const NO_CHANGES_MESSAGE: &str = "No changes";

/// Result of a deployment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeployOutcome {
    /// Another attempt for the project was in flight; nothing was done
    Skipped,

    Completed { log_id: i64, has_changes: bool },

    /// `log_id` is absent when the attempt failed before its row was written
    Failed { log_id: Option<i64>, error: String },
}

/// Collaborators of the executor
pub struct ExecutorDeps {
    pub layout: StorageLayout,
    pub projects: Arc<ProjectStore>,
    pub logs: Arc<DeploymentLogStore>,
    pub autodeploy: Arc<AutoDeployStore>,
    pub importer: Arc<ComposeImporter>,
    pub git: Arc<dyn GitClient>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

pub struct DeploymentExecutor {
    deps: ExecutorDeps,
    locks: DeployLocks,
}

impl DeploymentExecutor {
    pub fn new(deps: ExecutorDeps) -> Self {
        Self {
            deps,
            locks: DeployLocks::new(),
        }
    }

    pub fn git(&self) -> &Arc<dyn GitClient> {
        &self.deps.git
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.deps.runtime
    }

    pub fn is_deploying(&self, owner: &str, project: &str) -> bool {
        self.locks.is_locked(owner, project)
    }

    /// Pull the project's checkout and restart its containers
    pub async fn execute_deploy(
        &self,
        owner: &str,
        project: &str,
        trigger: TriggerKind,
    ) -> DeployOutcome {
        let Some(_guard) = self.locks.try_acquire(owner, project) else {
            info!(owner, project, trigger = trigger.as_str(), "Deployment already in progress, skipping");
            return DeployOutcome::Skipped;
        };
        let started = Instant::now();

        let record = match self.project(owner, project) {
            Ok(record) => record,
            Err(e) => return failed_early(owner, project, e),
        };
        let checkout = self.deps.layout.checkout_dir(owner, project);
        let old_commit = self.deps.git.current_commit(checkout.path()).await.ok();
        let mut attempt = match Attempt::open(&self.deps.logs, owner, project, trigger, old_commit.as_deref()) {
            Ok(attempt) => attempt,
            Err(e) => return failed_early(owner, project, e),
        };

        info!(owner, project, trigger = trigger.as_str(), log_id = attempt.log_id, "Starting deployment");
        let result = self.run_deploy(&record, checkout.path(), &mut attempt, started).await;
        attempt.finish(result, started)
    }

    /// Clone a repository into the project's checkout, then import and start it
    pub async fn execute_clone(
        &self,
        owner: &str,
        project: &str,
        repo_url: &str,
        branch: &str,
    ) -> DeployOutcome {
        let Some(_guard) = self.locks.try_acquire(owner, project) else {
            info!(owner, project, "Deployment already in progress, skipping clone");
            return DeployOutcome::Skipped;
        };
        let started = Instant::now();

        let record = match self.project(owner, project) {
            Ok(record) => record,
            Err(e) => return failed_early(owner, project, e),
        };
        let mut attempt = match Attempt::open(&self.deps.logs, owner, project, TriggerKind::Clone, None) {
            Ok(attempt) => attempt,
            Err(e) => return failed_early(owner, project, e),
        };

        info!(owner, project, log_id = attempt.log_id, "Starting clone");
        let result = self
            .run_clone(&record, repo_url, branch, &mut attempt, started)
            .await;
        attempt.finish(result, started)
    }

    async fn run_deploy(
        &self,
        project: &Project,
        checkout: &Path,
        attempt: &mut Attempt<'_>,
        started: Instant,
    ) -> Result<bool, ShipyardError> {
        attempt.advance(DeploymentEvent::Fetch, DeploymentLogUpdate::default())?;
        let pull = self.deps.git.pull(checkout).await?;

        if !pull.has_changes {
            attempt.advance(
                DeploymentEvent::NoChanges,
                DeploymentLogUpdate {
                    new_commit: Some(pull.new_commit),
                    commit_message: Some(NO_CHANGES_MESSAGE.to_string()),
                    duration_ms: Some(elapsed_ms(started)),
                    ..Default::default()
                },
            )?;
            return Ok(false);
        }

        self.restart(project, checkout, &pull.new_commit, attempt, started)
            .await?;
        Ok(true)
    }

    async fn run_clone(
        &self,
        project: &Project,
        repo_url: &str,
        branch: &str,
        attempt: &mut Attempt<'_>,
        started: Instant,
    ) -> Result<bool, ShipyardError> {
        let checkout = self.deps.layout.checkout_dir(&project.owner, &project.name);
        attempt.advance(DeploymentEvent::Fetch, DeploymentLogUpdate::default())?;
        if self.deps.git.has_git_repository(checkout.path()).await {
            return Err(ShipyardError::DeployError(format!(
                "{} already holds a repository",
                checkout.path().display()
            )));
        }
        self.deps
            .git
            .clone_repository(repo_url, branch, checkout.path())
            .await?;
        let commit = self.deps.git.current_commit(checkout.path()).await?;

        self.restart(project, checkout.path(), &commit, attempt, started)
            .await?;
        Ok(true)
    }

    /// Shared tail of a deploy and a clone: re-import custom compositions,
    /// restart, remember the commit
    async fn restart(
        &self,
        project: &Project,
        checkout: &Path,
        commit: &str,
        attempt: &mut Attempt<'_>,
        started: Instant,
    ) -> Result<(), ShipyardError> {
        let (owner, name) = (project.owner.as_str(), project.name.as_str());

        // Composition edits take effect on every pull
        if project.kind.is_custom() {
            self.deps.importer.process_document(owner, name).await?;
        }

        attempt.advance(
            DeploymentEvent::Fetched,
            DeploymentLogUpdate {
                new_commit: Some(commit.to_string()),
                ..Default::default()
            },
        )?;
        let project_dir = self.deps.layout.project_dir(owner, name);
        self.deps.runtime.restart(project_dir.path()).await?;

        self.deps.autodeploy.update_last_commit(owner, name, commit)?;

        let message = match self.deps.git.commit_message(checkout, commit).await {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(owner, project = name, "Failed to read commit message: {}", e);
                None
            }
        };
        attempt.advance(
            DeploymentEvent::Restarted,
            DeploymentLogUpdate {
                commit_message: message,
                duration_ms: Some(elapsed_ms(started)),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    fn project(&self, owner: &str, project: &str) -> Result<Project, ShipyardError> {
        self.deps
            .projects
            .get(owner, project)?
            .ok_or_else(|| ShipyardError::NotFound(format!("project {}/{}", owner, project)))
    }
}

/// One attempt's state machine and its log row
struct Attempt<'a> {
    logs: &'a DeploymentLogStore,
    log_id: i64,
    fsm: DeploymentFsm,
    owner: String,
    project: String,
}

impl<'a> Attempt<'a> {
    fn open(
        logs: &'a DeploymentLogStore,
        owner: &str,
        project: &str,
        trigger: TriggerKind,
        old_commit: Option<&str>,
    ) -> Result<Self, ShipyardError> {
        let log_id = logs.insert_pending(owner, project, trigger, old_commit)?;
        Ok(Self {
            logs,
            log_id,
            fsm: DeploymentFsm::new(),
            owner: owner.to_string(),
            project: project.to_string(),
        })
    }

    fn advance(
        &mut self,
        event: DeploymentEvent,
        update: DeploymentLogUpdate,
    ) -> Result<(), ShipyardError> {
        let state = self.fsm.process(event).map_err(ShipyardError::DeployError)?;
        self.logs.update_status(self.log_id, state, &update)
    }

    fn finish(mut self, result: Result<bool, ShipyardError>, started: Instant) -> DeployOutcome {
        match result {
            Ok(has_changes) => {
                info!(
                    owner = %self.owner,
                    project = %self.project,
                    log_id = self.log_id,
                    has_changes,
                    "Deployment succeeded"
                );
                DeployOutcome::Completed {
                    log_id: self.log_id,
                    has_changes,
                }
            }
            Err(e) => {
                let message = redact_credentials(&e.to_string());
                error!(
                    owner = %self.owner,
                    project = %self.project,
                    log_id = self.log_id,
                    "Deployment failed: {}",
                    message
                );
                let update = DeploymentLogUpdate {
                    error_message: Some(message.clone()),
                    duration_ms: Some(elapsed_ms(started)),
                    ..Default::default()
                };
                if let Err(log_err) = self.advance(DeploymentEvent::Fail(message.clone()), update) {
                    error!("Failed to record deployment failure: {}", log_err);
                }
                DeployOutcome::Failed {
                    log_id: Some(self.log_id),
                    error: message,
                }
            }
        }
    }
}

fn failed_early(owner: &str, project: &str, err: ShipyardError) -> DeployOutcome {
    let message = redact_credentials(&err.to_string());
    error!(owner, project, "Deployment could not start: {}", message);
    DeployOutcome::Failed {
        log_id: None,
        error: message,
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
