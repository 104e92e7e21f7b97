//! SQLite database handle and schema

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::errors::ShipyardError;

const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared SQLite connection
///
/// Every store borrows the same connection; statements are short so a single
/// mutex is enough to serialize writers.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date
    pub fn open(path: &Path) -> Result<Self, ShipyardError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(&mut conn)?;
        info!("Opened database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, ShipyardError> {
        let mut conn = Connection::open_in_memory()?;
        Self::init(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T, F>(&self, f: F) -> Result<T, ShipyardError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ShipyardError>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut conn)
    }

    fn init(conn: &mut Connection) -> Result<(), ShipyardError> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        initialize_schema(conn)
    }
}

fn initialize_schema(conn: &mut Connection) -> Result<(), ShipyardError> {
    let tx = conn.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM schema_meta LIMIT 1", params![], |row| {
            row.get(0)
        })
        .optional()?;

    match version {
        None => {
            debug!("Creating schema version {}", SCHEMA_VERSION);
            tx.execute(
                "INSERT INTO schema_meta (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS projects (
                    owner TEXT NOT NULL,
                    name TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    template TEXT,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (owner, name)
                );
                CREATE TABLE IF NOT EXISTS project_ports (
                    owner TEXT NOT NULL,
                    project TEXT NOT NULL,
                    service TEXT NOT NULL,
                    internal_port INTEGER NOT NULL,
                    external_port INTEGER NOT NULL UNIQUE,
                    protocol TEXT NOT NULL,
                    FOREIGN KEY (owner, project)
                        REFERENCES projects(owner, name) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_project_ports_project
                    ON project_ports (owner, project);
                CREATE TABLE IF NOT EXISTS auto_deploy_configs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    project TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    enabled INTEGER NOT NULL DEFAULT 0,
                    webhook_enabled INTEGER NOT NULL DEFAULT 0,
                    webhook_secret TEXT,
                    interval_minutes INTEGER NOT NULL DEFAULT 5,
                    last_check TEXT,
                    last_commit TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (owner, project),
                    FOREIGN KEY (owner, project)
                        REFERENCES projects(owner, name) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS deployment_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    project TEXT NOT NULL,
                    trigger_kind TEXT NOT NULL,
                    old_commit TEXT,
                    new_commit TEXT,
                    commit_message TEXT,
                    status TEXT NOT NULL,
                    error_message TEXT,
                    duration_ms INTEGER,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (owner, project)
                        REFERENCES projects(owner, name) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_deployment_logs_project
                    ON deployment_logs (owner, project, id);",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(ShipyardError::ConfigError(format!(
                "unsupported database schema version: {}",
                value
            )));
        }
    }

    tx.commit()?;
    Ok(())
}
