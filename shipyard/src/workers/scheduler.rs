//! Polling scheduler for continuous deployment
//!
//! Each tick walks every configuration with polling enabled and deploys the
//! projects whose upstream moved. One project's failure never stops the tick
//! or the loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::deploy::executor::{DeployOutcome, DeploymentExecutor};
use crate::errors::ShipyardError;
use crate::models::autodeploy::AutoDeployConfig;
use crate::models::deployment::TriggerKind;
use crate::storage::autodeploy::AutoDeployStore;
use crate::storage::layout::StorageLayout;

/// Scheduler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between ticks
    pub tick_interval: Duration,

    /// Delay before the first tick
    pub initial_delay: Duration,

    /// Projects checked at the same time within one tick
    pub max_concurrent_checks: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
            max_concurrent_checks: 4,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Rows whose upstream was fetched and compared
    pub checked: usize,

    /// Rows whose interval had not elapsed
    pub not_due: usize,

    pub deployed: usize,

    /// Rows skipped because a deployment was already in flight
    pub busy: usize,

    /// Rows whose project directory is gone; polling was switched off
    pub disabled: usize,

    pub failed: usize,
}

enum CheckResult {
    NotDue,
    Disabled,
    UpToDate,
    Deployed,
    Busy,
}

pub struct DeploymentScheduler {
    layout: StorageLayout,
    autodeploy: Arc<AutoDeployStore>,
    executor: Arc<DeploymentExecutor>,
    options: Options,
}

impl DeploymentScheduler {
    pub fn new(
        layout: StorageLayout,
        autodeploy: Arc<AutoDeployStore>,
        executor: Arc<DeploymentExecutor>,
        options: Options,
    ) -> Self {
        Self {
            layout,
            autodeploy,
            executor,
            options,
        }
    }

    /// Run one polling cycle as of `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, ShipyardError> {
        let configs = self.autodeploy.list_polling_enabled()?;
        let results: Vec<_> = stream::iter(configs)
            .map(|config| async move {
                let result = self.check(&config, now).await;
                (config, result)
            })
            .buffer_unordered(self.options.max_concurrent_checks.max(1))
            .collect()
            .await;

        let mut report = TickReport::default();
        for (config, result) in results {
            match result {
                Ok(CheckResult::NotDue) => report.not_due += 1,
                Ok(CheckResult::Disabled) => report.disabled += 1,
                Ok(CheckResult::UpToDate) => report.checked += 1,
                Ok(CheckResult::Deployed) => {
                    report.checked += 1;
                    report.deployed += 1;
                }
                Ok(CheckResult::Busy) => {
                    report.checked += 1;
                    report.busy += 1;
                }
                Err(e) => {
                    error!(
                        owner = %config.owner,
                        project = %config.project,
                        "Auto-deploy check failed: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(?report, "Scheduler tick finished");
        Ok(report)
    }

    async fn check(
        &self,
        config: &AutoDeployConfig,
        now: DateTime<Utc>,
    ) -> Result<CheckResult, ShipyardError> {
        let (owner, project) = (config.owner.as_str(), config.project.as_str());

        if !self.layout.project_dir(owner, project).exists().await {
            warn!(owner, project, "Project directory is gone, disabling polling");
            self.autodeploy.disable_polling(owner, project)?;
            return Ok(CheckResult::Disabled);
        }

        if !config.is_due(now) {
            return Ok(CheckResult::NotDue);
        }

        let checkout = self.layout.checkout_dir(owner, project);
        let heads = self
            .executor
            .git()
            .current_and_remote_head(checkout.path(), &config.branch)
            .await;
        // Recorded even when the fetch failed, so a broken remote waits a full interval
        self.autodeploy.mark_checked(config.id, now)?;
        let heads = heads?;

        if !heads.has_upstream_changes() {
            return Ok(CheckResult::UpToDate);
        }

        info!(
            owner,
            project,
            local = %heads.local,
            remote = %heads.remote,
            "Upstream has new commits, deploying"
        );
        match self
            .executor
            .execute_deploy(owner, project, TriggerKind::Auto)
            .await
        {
            DeployOutcome::Completed { .. } => Ok(CheckResult::Deployed),
            DeployOutcome::Skipped => Ok(CheckResult::Busy),
            DeployOutcome::Failed { error, .. } => Err(ShipyardError::DeployError(error)),
        }
    }

    /// Tick on a fixed cadence until the shutdown signal fires
    pub async fn run<S, F>(
        &self,
        sleep_fn: S,
        mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        info!("Deployment scheduler starting...");

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployment scheduler shutting down...");
                return;
            }
            _ = sleep_fn(self.options.initial_delay) => {}
        }

        loop {
            match self.tick(Utc::now()).await {
                Ok(report) if report.deployed > 0 || report.failed > 0 => {
                    info!(
                        deployed = report.deployed,
                        failed = report.failed,
                        "Scheduler tick completed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Scheduler tick failed: {}", e),
            }

            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Deployment scheduler shutting down...");
                    return;
                }
                _ = sleep_fn(self.options.tick_interval) => {}
            }
        }
    }
}
