//! Project records

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::errors::ShipyardError;
use crate::models::project::{Project, ProjectKind};
use crate::storage::db::Database;

const KIND_TEMPLATED: &str = "templated";
const KIND_CUSTOM: &str = "custom_composition";

pub struct ProjectStore {
    db: Arc<Database>,
}

impl ProjectStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a project or update its kind
    pub fn upsert(&self, project: &Project) -> Result<(), ShipyardError> {
        let (kind, template) = match &project.kind {
            ProjectKind::Templated { template } => (KIND_TEMPLATED, Some(template.as_str())),
            ProjectKind::CustomComposition => (KIND_CUSTOM, None),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (owner, name, kind, template, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (owner, name) DO UPDATE SET kind = excluded.kind, \
                 template = excluded.template",
                params![project.owner, project.name, kind, template, Utc::now()],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, owner: &str, name: &str) -> Result<Option<Project>, ShipyardError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT owner, name, kind, template FROM projects WHERE owner = ?1 AND name = ?2",
                    params![owner, name],
                    read_row,
                )
                .optional()?;
            row.map(into_project).transpose()
        })
    }

    pub fn list(&self) -> Result<Vec<Project>, ShipyardError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT owner, name, kind, template FROM projects ORDER BY owner, name")?;
            let rows = stmt
                .query_map(params![], read_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(into_project).collect()
        })
    }

    /// Delete a project; its ports, auto-deploy config and deployment history
    /// go with it
    pub fn delete(&self, owner: &str, name: &str) -> Result<bool, ShipyardError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM projects WHERE owner = ?1 AND name = ?2",
                params![owner, name],
            )?;
            Ok(deleted > 0)
        })
    }
}

type ProjectRow = (String, String, String, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_project((owner, name, kind, template): ProjectRow) -> Result<Project, ShipyardError> {
    let kind = match (kind.as_str(), template) {
        (KIND_CUSTOM, _) => ProjectKind::CustomComposition,
        (KIND_TEMPLATED, Some(template)) => ProjectKind::Templated { template },
        (other, _) => {
            return Err(ShipyardError::Internal(format!(
                "project {}/{} has invalid kind `{}`",
                owner, name, other
            )))
        }
    };
    Ok(Project { owner, name, kind })
}
