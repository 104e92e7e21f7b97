//! Container runtime collaborator (Docker Compose)

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::errors::ShipyardError;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// (Re)create the containers of the project rooted at `project_dir`
    async fn restart(&self, project_dir: &Path) -> Result<(), ShipyardError>;

    /// Address of a container on the shared network, if it has one
    async fn container_ip(&self, container: &str) -> Result<Option<String>, ShipyardError>;
}

/// Docker Compose runtime options
#[derive(Debug, Clone)]
pub struct Options {
    /// Network whose address `container_ip` reports
    pub shared_network: String,

    /// Bound on `compose up`, which may build images
    pub restart_timeout: Duration,

    pub inspect_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            shared_network: "shipyard_network".to_string(),
            restart_timeout: Duration::from_secs(300),
            inspect_timeout: Duration::from_secs(10),
        }
    }
}

/// `ContainerRuntime` driving the `docker compose` CLI
#[derive(Debug, Clone, Default)]
pub struct DockerCompose {
    options: Options,
}

impl DockerCompose {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    async fn compose_up(&self, program: &str, prefix: &[&str], dir: &Path) -> Result<bool, ShipyardError> {
        let mut command = Command::new(program);
        command
            .current_dir(dir)
            .args(prefix)
            .args(["up", "-d", "--build", "--remove-orphans"])
            .kill_on_drop(true);

        let status = timeout(self.options.restart_timeout, command.status())
            .await
            .map_err(|_| {
                ShipyardError::UpstreamError(format!(
                    "{} up timed out after {}s",
                    program,
                    self.options.restart_timeout.as_secs()
                ))
            })?
            .map_err(|e| ShipyardError::UpstreamError(format!("Failed to run {}: {}", program, e)))?;
        Ok(status.success())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    async fn restart(&self, project_dir: &Path) -> Result<(), ShipyardError> {
        info!("Restarting containers in {}", project_dir.display());
        if !tokio::fs::try_exists(project_dir).await.unwrap_or(false) {
            return Err(ShipyardError::NotFound(format!(
                "project directory {}",
                project_dir.display()
            )));
        }

        if self.compose_up("docker", &["compose"], project_dir).await? {
            return Ok(());
        }

        // Standalone v1 binary on older hosts
        debug!("'docker compose' failed, trying docker-compose...");
        if self.compose_up("docker-compose", &[], project_dir).await? {
            return Ok(());
        }
        Err(ShipyardError::UpstreamError("Docker Compose failed".to_string()))
    }

    async fn container_ip(&self, container: &str) -> Result<Option<String>, ShipyardError> {
        let format = format!(
            "{{{{with index .NetworkSettings.Networks \"{}\"}}}}{{{{.IPAddress}}}}{{{{end}}}}",
            self.options.shared_network
        );
        let mut command = Command::new("docker");
        command
            .args(["inspect", "--format", &format, container])
            .kill_on_drop(true);

        let output = timeout(self.options.inspect_timeout, command.output())
            .await
            .map_err(|_| ShipyardError::UpstreamError("docker inspect timed out".to_string()))?
            .map_err(|e| ShipyardError::UpstreamError(format!("Failed to run docker: {}", e)))?;
        if !output.status.success() {
            return Err(ShipyardError::UpstreamError(format!(
                "docker inspect failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!ip.is_empty()).then_some(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_restart_missing_directory() {
        let runtime = DockerCompose::default();
        let result = runtime.restart(Path::new("/nonexistent/shipyard/project")).await;
        assert!(matches!(result, Err(ShipyardError::NotFound(_))));
    }
}
