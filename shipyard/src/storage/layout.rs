//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::ShipyardError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Name of the generated composition document inside a project directory
pub const GENERATED_COMPOSE_FILE: &str = "docker-compose.yml";

/// Storage layout for the daemon
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the database file path
    pub fn database_file(&self) -> File {
        File::new(self.base_dir.join("shipyard.db"))
    }

    /// Root of every deployed project, `<base>/projects/<owner>/<project>`
    pub fn projects_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("projects"))
    }

    /// Directory of one project
    pub fn project_dir(&self, owner: &str, project: &str) -> Dir {
        self.projects_dir().subdir(owner).subdir(project)
    }

    /// Git checkout of one project
    pub fn checkout_dir(&self, owner: &str, project: &str) -> Dir {
        self.project_dir(owner, project).subdir("html")
    }

    /// Generated composition document of one project
    pub fn compose_file(&self, owner: &str, project: &str) -> File {
        self.project_dir(owner, project).file(GENERATED_COMPOSE_FILE)
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), ShipyardError> {
        self.projects_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(PathBuf::from("/var/lib/shipyard"))
    }
}
