//! Deployment audit trail

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::errors::ShipyardError;
use crate::models::deployment::{
    DeploymentLogEntry, DeploymentLogUpdate, DeploymentStatus, TriggerKind,
};
use crate::storage::db::Database;

/// Upper bound on rows returned by a history query
pub const MAX_HISTORY_LIMIT: usize = 100;

pub struct DeploymentLogStore {
    db: Arc<Database>,
}

impl DeploymentLogStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a new attempt in `pending` state and return its id
    pub fn insert_pending(
        &self,
        owner: &str,
        project: &str,
        trigger: TriggerKind,
        old_commit: Option<&str>,
    ) -> Result<i64, ShipyardError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO deployment_logs (owner, project, trigger_kind, old_commit, status, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    owner,
                    project,
                    trigger.as_str(),
                    old_commit,
                    DeploymentStatus::Pending.as_str(),
                    Utc::now()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Move an attempt to `status`; fields left `None` in `update` keep their value
    pub fn update_status(
        &self,
        id: i64,
        status: DeploymentStatus,
        update: &DeploymentLogUpdate,
    ) -> Result<(), ShipyardError> {
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE deployment_logs SET status = ?2, \
                 new_commit = COALESCE(?3, new_commit), \
                 commit_message = COALESCE(?4, commit_message), \
                 error_message = COALESCE(?5, error_message), \
                 duration_ms = COALESCE(?6, duration_ms) \
                 WHERE id = ?1",
                params![
                    id,
                    status.as_str(),
                    update.new_commit,
                    update.commit_message,
                    update.error_message,
                    update.duration_ms
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(ShipyardError::NotFound(format!("deployment log {}", id)));
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<DeploymentLogEntry>, ShipyardError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, owner, project, trigger_kind, old_commit, new_commit, \
                     commit_message, status, error_message, duration_ms, created_at \
                     FROM deployment_logs WHERE id = ?1",
                    params![id],
                    read_entry,
                )
                .optional()?)
        })
    }

    /// Most recent attempts of a project, newest first
    pub fn recent(
        &self,
        owner: &str,
        project: &str,
        limit: usize,
    ) -> Result<Vec<DeploymentLogEntry>, ShipyardError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT) as i64;
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner, project, trigger_kind, old_commit, new_commit, commit_message, \
                 status, error_message, duration_ms, created_at FROM deployment_logs \
                 WHERE owner = ?1 AND project = ?2 ORDER BY id DESC LIMIT ?3",
            )?;
            let entries = stmt
                .query_map(params![owner, project, limit], read_entry)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<DeploymentLogEntry> {
    let trigger: String = row.get(3)?;
    let status: String = row.get(7)?;
    Ok(DeploymentLogEntry {
        id: row.get(0)?,
        owner: row.get(1)?,
        project: row.get(2)?,
        trigger: trigger.parse().map_err(|e| invalid_column(3, e))?,
        old_commit: row.get(4)?,
        new_commit: row.get(5)?,
        commit_message: row.get(6)?,
        status: status.parse().map_err(|e| invalid_column(7, e))?,
        error_message: row.get(8)?,
        duration_ms: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(ShipyardError::Internal(message)),
    )
}
