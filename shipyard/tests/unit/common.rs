//! Fake collaborators and a wired application state

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shipyard::app::options::AppOptions;
use shipyard::app::state::AppState;
use shipyard::deploy::git::{GitClient, HeadComparison, PullOutcome};
use shipyard::deploy::runtime::ContainerRuntime;
use shipyard::errors::ShipyardError;
use shipyard::models::project::{Project, ProjectKind};
use shipyard::storage::db::Database;
use shipyard::storage::layout::StorageLayout;
use tempfile::TempDir;

pub const INITIAL_COMMIT: &str = "c0ffee0";

#[derive(Debug)]
struct GitState {
    head: String,
    upstream: String,
    pull_delay: Duration,
    pull_error: Option<String>,
}

/// Git double: `upstream` is what a pull or fetch would see
pub struct FakeGit {
    state: Mutex<GitState>,
    pub pulls: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl Default for FakeGit {
    fn default() -> Self {
        Self {
            state: Mutex::new(GitState {
                head: INITIAL_COMMIT.to_string(),
                upstream: INITIAL_COMMIT.to_string(),
                pull_delay: Duration::ZERO,
                pull_error: None,
            }),
            pulls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl FakeGit {
    pub fn push_upstream(&self, commit: &str) {
        self.state.lock().unwrap().upstream = commit.to_string();
    }

    pub fn set_pull_delay(&self, delay: Duration) {
        self.state.lock().unwrap().pull_delay = delay;
    }

    pub fn fail_pulls(&self, message: &str) {
        self.state.lock().unwrap().pull_error = Some(message.to_string());
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitClient for FakeGit {
    async fn has_git_repository(&self, path: &Path) -> bool {
        path.join(".git").exists()
    }

    async fn pull(&self, _path: &Path) -> Result<PullOutcome, ShipyardError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().pull_delay;
        tokio::time::sleep(delay).await;

        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.pull_error {
            return Err(ShipyardError::UpstreamError(message.clone()));
        }
        let old_commit = state.head.clone();
        state.head = state.upstream.clone();
        Ok(PullOutcome {
            has_changes: old_commit != state.head,
            old_commit,
            new_commit: state.head.clone(),
        })
    }

    async fn current_and_remote_head(
        &self,
        _path: &Path,
        _branch: &str,
    ) -> Result<HeadComparison, ShipyardError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(HeadComparison {
            local: state.head.clone(),
            remote: state.upstream.clone(),
            behind: usize::from(state.head != state.upstream),
        })
    }

    async fn current_commit(&self, _path: &Path) -> Result<String, ShipyardError> {
        Ok(self.state.lock().unwrap().head.clone())
    }

    async fn commit_message(&self, _path: &Path, commit: &str) -> Result<String, ShipyardError> {
        Ok(format!("Release {}", commit))
    }

    async fn clone_repository(
        &self,
        _url: &str,
        _branch: &str,
        target: &Path,
    ) -> Result<(), ShipyardError> {
        std::fs::create_dir_all(target.join(".git"))?;
        Ok(())
    }
}

/// Container runtime double recording every restart
#[derive(Default)]
pub struct FakeRuntime {
    restarts: Mutex<Vec<PathBuf>>,
}

impl FakeRuntime {
    pub fn restarts(&self) -> Vec<PathBuf> {
        self.restarts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn restart(&self, project_dir: &Path) -> Result<(), ShipyardError> {
        self.restarts.lock().unwrap().push(project_dir.to_path_buf());
        Ok(())
    }

    async fn container_ip(&self, _container: &str) -> Result<Option<String>, ShipyardError> {
        Ok(None)
    }
}

pub struct Harness {
    _tmp: TempDir,
    pub app: AppState,
    pub git: Arc<FakeGit>,
    pub runtime: Arc<FakeRuntime>,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let options = AppOptions {
            layout: StorageLayout::new(tmp.path()),
            ..Default::default()
        };
        let db = Arc::new(Database::open_in_memory().unwrap());
        let git = Arc::new(FakeGit::default());
        let runtime = Arc::new(FakeRuntime::default());
        let app = AppState::assemble(&options, db, git.clone(), runtime.clone());
        Self {
            _tmp: tmp,
            app,
            git,
            runtime,
        }
    }

    /// Register a project and create its checkout directory
    pub fn add_project(&self, owner: &str, name: &str, kind: ProjectKind) {
        self.app
            .projects
            .upsert(&Project {
                owner: owner.to_string(),
                name: name.to_string(),
                kind,
            })
            .unwrap();
        std::fs::create_dir_all(self.app.layout.checkout_dir(owner, name).path()).unwrap();
    }

    pub fn write_checkout_file(&self, owner: &str, name: &str, rel: &str, contents: &str) {
        let path = self.app.layout.checkout_dir(owner, name).path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

pub fn templated() -> ProjectKind {
    ProjectKind::Templated {
        template: "static-site".to_string(),
    }
}
