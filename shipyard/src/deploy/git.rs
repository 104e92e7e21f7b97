//! Git collaborator
//!
//! Every subprocess call is bounded by a timeout so one stalled remote cannot
//! hold up the scheduler cycle.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::errors::ShipyardError;
use crate::utils::{redact_credentials, redact_url};

/// Result of a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    pub has_changes: bool,
    pub old_commit: String,
    pub new_commit: String,
}

/// Local and remote head of a checkout after a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadComparison {
    pub local: String,
    pub remote: String,

    /// Commits on the remote head that are not in the local one
    pub behind: usize,
}

impl HeadComparison {
    pub fn has_upstream_changes(&self) -> bool {
        self.behind > 0
    }
}

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn has_git_repository(&self, path: &Path) -> bool;

    /// Fast-forward the checkout to its upstream
    async fn pull(&self, path: &Path) -> Result<PullOutcome, ShipyardError>;

    /// Fetch, then compare HEAD with `origin/<branch>`, falling back to the
    /// current branch's upstream when the remote has no such branch
    async fn current_and_remote_head(
        &self,
        path: &Path,
        branch: &str,
    ) -> Result<HeadComparison, ShipyardError>;

    async fn current_commit(&self, path: &Path) -> Result<String, ShipyardError>;

    /// Subject line of a commit
    async fn commit_message(&self, path: &Path, commit: &str) -> Result<String, ShipyardError>;

    async fn clone_repository(
        &self,
        url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<(), ShipyardError>;
}

/// Timeouts of the Git subprocesses
#[derive(Debug, Clone)]
pub struct GitTimeouts {
    /// `git fetch` and `git pull`
    pub network: Duration,

    /// Local inspection (`rev-parse`, `log`, `rev-list`)
    pub inspect: Duration,

    pub clone: Duration,
}

impl Default for GitTimeouts {
    fn default() -> Self {
        Self {
            network: Duration::from_secs(60),
            inspect: Duration::from_secs(10),
            clone: Duration::from_secs(120),
        }
    }
}

/// `GitClient` backed by the `git` executable
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    timeouts: GitTimeouts,
}

impl GitCli {
    pub fn new(timeouts: GitTimeouts) -> Self {
        Self { timeouts }
    }

    async fn run(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        limit: Duration,
    ) -> Result<String, ShipyardError> {
        let subcommand = args.first().copied().unwrap_or_default();
        let mut command = Command::new("git");
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let output = timeout(limit, command.output())
            .await
            .map_err(|_| {
                ShipyardError::UpstreamError(format!(
                    "git {} timed out after {}s",
                    subcommand,
                    limit.as_secs()
                ))
            })?
            .map_err(|e| ShipyardError::UpstreamError(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ShipyardError::UpstreamError(redact_credentials(&format!(
                "git {} failed: {}",
                subcommand,
                stderr.trim()
            ))));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn rev_parse(&self, path: &Path, rev: &str) -> Result<String, ShipyardError> {
        self.run(Some(path), &["rev-parse", "--verify", "--quiet", rev], self.timeouts.inspect)
            .await
    }
}

#[async_trait]
impl GitClient for GitCli {
    async fn has_git_repository(&self, path: &Path) -> bool {
        tokio::fs::metadata(path.join(".git")).await.is_ok()
    }

    async fn pull(&self, path: &Path) -> Result<PullOutcome, ShipyardError> {
        let old_commit = self.current_commit(path).await?;
        debug!("Pulling {}", path.display());
        self.run(Some(path), &["pull", "--ff-only"], self.timeouts.network)
            .await?;
        let new_commit = self.current_commit(path).await?;
        Ok(PullOutcome {
            has_changes: old_commit != new_commit,
            old_commit,
            new_commit,
        })
    }

    async fn current_and_remote_head(
        &self,
        path: &Path,
        branch: &str,
    ) -> Result<HeadComparison, ShipyardError> {
        self.run(Some(path), &["fetch", "origin"], self.timeouts.network)
            .await?;
        let local = self.current_commit(path).await?;
        let remote = match self.rev_parse(path, &format!("origin/{}", branch)).await {
            Ok(remote) => remote,
            Err(_) => {
                debug!("origin/{} not found, using upstream of current branch", branch);
                self.rev_parse(path, "@{u}").await?
            }
        };

        let range = format!("{}..{}", local, remote);
        let behind = self
            .run(Some(path), &["rev-list", "--count", &range], self.timeouts.inspect)
            .await?
            .parse::<usize>()
            .map_err(|e| ShipyardError::UpstreamError(format!("Unexpected rev-list output: {}", e)))?;

        Ok(HeadComparison {
            local,
            remote,
            behind,
        })
    }

    async fn current_commit(&self, path: &Path) -> Result<String, ShipyardError> {
        self.rev_parse(path, "HEAD").await
    }

    async fn commit_message(&self, path: &Path, commit: &str) -> Result<String, ShipyardError> {
        self.run(Some(path), &["log", "-1", "--format=%s", commit], self.timeouts.inspect)
            .await
    }

    async fn clone_repository(
        &self,
        url: &str,
        branch: &str,
        target: &Path,
    ) -> Result<(), ShipyardError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = target.to_string_lossy();
        info!("Cloning {} (branch: {}) into {}", redact_url(url), branch, target);

        let mut args = vec!["clone", "--single-branch"];
        if !branch.is_empty() {
            args.extend(["--branch", branch]);
        }
        args.extend([url, &*target]);
        self.run(None, &args, self.timeouts.clone).await?;
        Ok(())
    }
}
