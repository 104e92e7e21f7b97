//! Continuous deployment settings per project
//!
//! Polling and webhook delivery are independent switches on the same row. The
//! row is created the first time either one is enabled.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension, Row};
use secrecy::SecretString;
use tracing::info;

use crate::errors::ShipyardError;
use crate::models::autodeploy::{AutoDeployConfig, PollInterval};
use crate::storage::db::Database;

pub const DEFAULT_BRANCH: &str = "main";

const WEBHOOK_SECRET_BYTES: usize = 32;

const SELECT_COLUMNS: &str = "SELECT id, owner, project, branch, enabled, webhook_enabled, \
     webhook_secret, interval_minutes, last_check, last_commit, created_at, updated_at \
     FROM auto_deploy_configs";

pub struct AutoDeployStore {
    db: Arc<Database>,
}

impl AutoDeployStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Turn polling on, creating the row if needed
    pub fn enable_polling(
        &self,
        owner: &str,
        project: &str,
        branch: &str,
        interval_minutes: u32,
    ) -> Result<AutoDeployConfig, ShipyardError> {
        let interval = PollInterval::from_minutes(interval_minutes);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auto_deploy_configs (owner, project, branch, enabled, \
                 interval_minutes, created_at, updated_at) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5) \
                 ON CONFLICT (owner, project) DO UPDATE SET branch = excluded.branch, \
                 enabled = 1, interval_minutes = excluded.interval_minutes, \
                 updated_at = excluded.updated_at",
                params![owner, project, branch, interval.minutes(), Utc::now()],
            )?;
            Ok(())
        })?;
        info!(owner, project, branch, interval = interval.minutes(), "Enabled polling");
        self.require(owner, project)
    }

    pub fn disable_polling(&self, owner: &str, project: &str) -> Result<(), ShipyardError> {
        self.set_flag(owner, project, "enabled", false)
    }

    /// Turn webhook delivery on and return the secret
    ///
    /// A secret is generated only when the row has none yet; an existing secret
    /// keeps working so re-enabling does not break the remote hook.
    pub fn enable_webhook(
        &self,
        owner: &str,
        project: &str,
        branch: &str,
    ) -> Result<(AutoDeployConfig, SecretString), ShipyardError> {
        let candidate = generate_secret();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auto_deploy_configs (owner, project, branch, webhook_enabled, \
                 webhook_secret, created_at, updated_at) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5) \
                 ON CONFLICT (owner, project) DO UPDATE SET webhook_enabled = 1, \
                 webhook_secret = COALESCE(webhook_secret, excluded.webhook_secret), \
                 updated_at = excluded.updated_at",
                params![owner, project, branch, candidate, Utc::now()],
            )?;
            Ok(())
        })?;
        info!(owner, project, "Enabled webhook");

        let config = self.require(owner, project)?;
        let secret = config
            .webhook_secret
            .clone()
            .ok_or_else(|| ShipyardError::Internal("webhook secret missing after enable".into()))?;
        Ok((config, SecretString::from(secret)))
    }

    pub fn disable_webhook(&self, owner: &str, project: &str) -> Result<(), ShipyardError> {
        self.set_flag(owner, project, "webhook_enabled", false)
    }

    /// Replace the webhook secret; the old one stops verifying immediately
    pub fn regenerate_webhook_secret(
        &self,
        owner: &str,
        project: &str,
    ) -> Result<SecretString, ShipyardError> {
        let secret = generate_secret();
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE auto_deploy_configs SET webhook_secret = ?3, updated_at = ?4 \
                 WHERE owner = ?1 AND project = ?2",
                params![owner, project, secret, Utc::now()],
            )?)
        })?;
        if updated == 0 {
            return Err(not_found(owner, project));
        }
        info!(owner, project, "Regenerated webhook secret");
        Ok(SecretString::from(secret))
    }

    /// Set the polling interval; unsupported values fall back to 5 minutes
    pub fn update_interval(
        &self,
        owner: &str,
        project: &str,
        minutes: u32,
    ) -> Result<PollInterval, ShipyardError> {
        let interval = PollInterval::from_minutes(minutes);
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE auto_deploy_configs SET interval_minutes = ?3, updated_at = ?4 \
                 WHERE owner = ?1 AND project = ?2",
                params![owner, project, interval.minutes(), Utc::now()],
            )?)
        })?;
        if updated == 0 {
            return Err(not_found(owner, project));
        }
        Ok(interval)
    }

    pub fn get(&self, owner: &str, project: &str) -> Result<Option<AutoDeployConfig>, ShipyardError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("{} WHERE owner = ?1 AND project = ?2", SELECT_COLUMNS),
                    params![owner, project],
                    read_config,
                )
                .optional()?)
        })
    }

    pub fn find_by_webhook_id(&self, id: i64) -> Result<Option<AutoDeployConfig>, ShipyardError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    params![id],
                    read_config,
                )
                .optional()?)
        })
    }

    pub fn list_polling_enabled(&self) -> Result<Vec<AutoDeployConfig>, ShipyardError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} WHERE enabled = 1 ORDER BY id", SELECT_COLUMNS))?;
            let configs = stmt
                .query_map(params![], read_config)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(configs)
        })
    }

    /// Record that a polling check was attempted
    pub fn mark_checked(&self, id: i64, at: DateTime<Utc>) -> Result<(), ShipyardError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE auto_deploy_configs SET last_check = ?2 WHERE id = ?1",
                params![id, at],
            )?;
            Ok(())
        })
    }

    /// Remember the last deployed commit; a project without a row is left alone
    pub fn update_last_commit(
        &self,
        owner: &str,
        project: &str,
        commit: &str,
    ) -> Result<(), ShipyardError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE auto_deploy_configs SET last_commit = ?3, updated_at = ?4 \
                 WHERE owner = ?1 AND project = ?2",
                params![owner, project, commit, Utc::now()],
            )?;
            Ok(())
        })
    }

    /// Remove the row together with the project's deployment history
    pub fn delete(&self, owner: &str, project: &str) -> Result<bool, ShipyardError> {
        let deleted = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM deployment_logs WHERE owner = ?1 AND project = ?2",
                params![owner, project],
            )?;
            let deleted = tx.execute(
                "DELETE FROM auto_deploy_configs WHERE owner = ?1 AND project = ?2",
                params![owner, project],
            )?;
            tx.commit()?;
            Ok(deleted > 0)
        })?;
        if deleted {
            info!(owner, project, "Removed auto-deploy configuration");
        }
        Ok(deleted)
    }

    fn set_flag(&self, owner: &str, project: &str, column: &str, value: bool) -> Result<(), ShipyardError> {
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                &format!(
                    "UPDATE auto_deploy_configs SET {} = ?3, updated_at = ?4 \
                     WHERE owner = ?1 AND project = ?2",
                    column
                ),
                params![owner, project, value, Utc::now()],
            )?)
        })?;
        if updated == 0 {
            return Err(not_found(owner, project));
        }
        info!(owner, project, column, value, "Updated auto-deploy flag");
        Ok(())
    }

    fn require(&self, owner: &str, project: &str) -> Result<AutoDeployConfig, ShipyardError> {
        self.get(owner, project)?
            .ok_or_else(|| not_found(owner, project))
    }
}

fn not_found(owner: &str, project: &str) -> ShipyardError {
    ShipyardError::NotFound(format!("auto-deploy configuration for {}/{}", owner, project))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; WEBHOOK_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn read_config(row: &Row<'_>) -> rusqlite::Result<AutoDeployConfig> {
    Ok(AutoDeployConfig {
        id: row.get(0)?,
        owner: row.get(1)?,
        project: row.get(2)?,
        branch: row.get(3)?,
        enabled: row.get(4)?,
        webhook_enabled: row.get(5)?,
        webhook_secret: row.get(6)?,
        interval: PollInterval::from_minutes(row.get(7)?),
        last_check: row.get(8)?,
        last_commit: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{Project, ProjectKind};
    use crate::storage::projects::ProjectStore;
    use secrecy::ExposeSecret;

    fn store() -> AutoDeployStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        ProjectStore::new(db.clone())
            .upsert(&Project {
                owner: "alice".to_string(),
                name: "blog".to_string(),
                kind: ProjectKind::CustomComposition,
            })
            .unwrap();
        AutoDeployStore::new(db)
    }

    #[test]
    fn test_polling_and_webhook_are_independent() {
        let store = store();
        let config = store.enable_polling("alice", "blog", "main", 10).unwrap();
        assert!(config.enabled);
        assert!(!config.webhook_enabled);
        assert_eq!(config.interval, PollInterval::TenMinutes);

        let (with_hook, _) = store.enable_webhook("alice", "blog", "main").unwrap();
        assert_eq!(with_hook.id, config.id);
        assert!(with_hook.enabled);
        assert!(with_hook.webhook_enabled);

        store.disable_polling("alice", "blog").unwrap();
        let config = store.get("alice", "blog").unwrap().unwrap();
        assert!(!config.enabled);
        assert!(config.webhook_enabled);
        assert!(store.list_polling_enabled().unwrap().is_empty());
    }

    #[test]
    fn test_webhook_secret_lifecycle() {
        let store = store();
        let (config, first) = store.enable_webhook("alice", "blog", "main").unwrap();
        assert_eq!(first.expose_secret().len(), WEBHOOK_SECRET_BYTES * 2);

        let (_, again) = store.enable_webhook("alice", "blog", "main").unwrap();
        assert_eq!(again.expose_secret(), first.expose_secret());

        let rotated = store.regenerate_webhook_secret("alice", "blog").unwrap();
        assert_ne!(rotated.expose_secret(), first.expose_secret());
        let found = store.find_by_webhook_id(config.id).unwrap().unwrap();
        assert_eq!(found.webhook_secret.as_deref(), Some(rotated.expose_secret()));
    }

    #[test]
    fn test_update_interval_coerces() {
        let store = store();
        store.enable_polling("alice", "blog", "main", 30).unwrap();
        assert_eq!(
            store.update_interval("alice", "blog", 7).unwrap(),
            PollInterval::FiveMinutes
        );
        let config = store.get("alice", "blog").unwrap().unwrap();
        assert_eq!(config.interval.minutes(), 5);

        assert!(matches!(
            store.update_interval("alice", "missing", 10),
            Err(ShipyardError::NotFound(_))
        ));
    }

    #[test]
    fn test_mark_checked_and_last_commit() {
        let store = store();
        let config = store.enable_polling("alice", "blog", "main", 5).unwrap();
        let now = Utc::now();
        store.mark_checked(config.id, now).unwrap();
        store.update_last_commit("alice", "blog", "abc123").unwrap();

        let config = store.get("alice", "blog").unwrap().unwrap();
        assert_eq!(config.last_check, Some(now));
        assert_eq!(config.last_commit.as_deref(), Some("abc123"));

        assert!(store.delete("alice", "blog").unwrap());
        assert!(store.get("alice", "blog").unwrap().is_none());
    }
}
