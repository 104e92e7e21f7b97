//! Durable ledger of published host ports
//!
//! Every external port handed out by the transformer is recorded here, keyed by
//! project. The `external_port` column is UNIQUE, so two projects can never hold
//! the same port at the same time.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::params;
use tracing::{debug, warn};

use crate::compose::document::Protocol;
use crate::compose::transformer::PortMapping;
use crate::errors::ShipyardError;
use crate::filesys::dir::Dir;
use crate::storage::db::Database;

/// Lowest port handed out to projects
pub const FIRST_PROJECT_PORT: u16 = 8001;

/// Legacy per-project marker holding the port of single-container projects
pub const PORT_MARKER_FILE: &str = ".port";

/// Port ledger backed by the `project_ports` table
pub struct PortRegistry {
    db: Arc<Database>,
    projects_dir: PathBuf,
}

impl PortRegistry {
    pub fn new(db: Arc<Database>, projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            projects_dir: projects_dir.into(),
        }
    }

    /// Replace every port row of a project in one transaction
    pub fn register_ports(
        &self,
        owner: &str,
        project: &str,
        mappings: &[PortMapping],
    ) -> Result<(), ShipyardError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM project_ports WHERE owner = ?1 AND project = ?2",
                params![owner, project],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO project_ports (owner, project, service, internal_port, \
                     external_port, protocol) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for mapping in mappings {
                    stmt.execute(params![
                        owner,
                        project,
                        mapping.service,
                        mapping.internal,
                        mapping.external,
                        mapping.protocol.as_str(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;
        debug!(owner, project, count = mappings.len(), "Registered ports");
        Ok(())
    }

    /// Drop every port row of a project
    pub fn release_ports(&self, owner: &str, project: &str) -> Result<usize, ShipyardError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM project_ports WHERE owner = ?1 AND project = ?2",
                params![owner, project],
            )?)
        })
    }

    /// Every external port in the ledger
    pub fn all_used_ports(&self) -> Result<BTreeSet<u16>, ShipyardError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT external_port FROM project_ports")?;
            let ports = stmt
                .query_map(params![], |row| row.get::<_, u16>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(ports)
        })
    }

    /// External ports held by every project except the given one
    pub fn used_ports_excluding(
        &self,
        owner: &str,
        project: &str,
    ) -> Result<BTreeSet<u16>, ShipyardError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT external_port FROM project_ports WHERE NOT (owner = ?1 AND project = ?2)",
            )?;
            let ports = stmt
                .query_map(params![owner, project], |row| row.get::<_, u16>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(ports)
        })
    }

    /// Port rows of one project, lowest external port first
    pub fn ports_for_project(
        &self,
        owner: &str,
        project: &str,
    ) -> Result<Vec<PortMapping>, ShipyardError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT service, internal_port, external_port, protocol FROM project_ports \
                 WHERE owner = ?1 AND project = ?2 ORDER BY external_port",
            )?;
            let rows = stmt
                .query_map(params![owner, project], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u16>(1)?,
                        row.get::<_, u16>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(service, internal, external, protocol)| {
                    let protocol = protocol
                        .parse::<Protocol>()
                        .map_err(ShipyardError::Internal)?;
                    Ok(PortMapping {
                        service,
                        internal,
                        external,
                        protocol,
                    })
                })
                .collect()
        })
    }

    /// First port >= 8001 that starts `count` contiguous free ports
    ///
    /// The ledger is merged with the legacy `.port` markers found on disk, so a
    /// port recorded only by an older deployment is still treated as taken.
    pub async fn find_next_available_port(&self, count: usize) -> Result<u16, ShipyardError> {
        let mut used = self.all_used_ports()?;
        used.extend(self.scan_port_markers().await);
        first_free_block(&used, count)
    }

    /// Ports recorded in `<projects>/<owner>/<project>/.port`
    async fn scan_port_markers(&self) -> BTreeSet<u16> {
        let mut ports = BTreeSet::new();
        let root = Dir::new(&self.projects_dir);
        if !root.exists().await {
            return ports;
        }

        let owners = match root.list_dirs().await {
            Ok(owners) => owners,
            Err(e) => {
                warn!("Failed to scan {}: {}", self.projects_dir.display(), e);
                return ports;
            }
        };
        for owner_dir in owners {
            let Ok(projects) = Dir::new(owner_dir).list_dirs().await else {
                continue;
            };
            for project_dir in projects {
                let marker = Dir::new(project_dir).file(PORT_MARKER_FILE);
                if !marker.exists().await {
                    continue;
                }
                match marker.read_string().await {
                    Ok(contents) => match contents.trim().parse::<u16>() {
                        Ok(port) => {
                            ports.insert(port);
                        }
                        Err(_) => warn!("Ignoring malformed port marker {}", marker.path().display()),
                    },
                    Err(e) => warn!("Failed to read {}: {}", marker.path().display(), e),
                }
            }
        }
        ports
    }
}

/// Lowest start of a run of `count` ports absent from `used`
fn first_free_block(used: &BTreeSet<u16>, count: usize) -> Result<u16, ShipyardError> {
    let count = count.max(1);
    let mut start = u32::from(FIRST_PROJECT_PORT);

    'search: while start + count as u32 - 1 <= u32::from(u16::MAX) {
        let end = start + count as u32 - 1;
        // Jump past the highest occupied port inside the candidate block
        if let Some(taken) = used.range(start as u16..=end as u16).next_back() {
            start = u32::from(*taken) + 1;
            continue 'search;
        }
        return Ok(start as u16);
    }

    Err(ShipyardError::PortExhausted(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{Project, ProjectKind};
    use crate::storage::projects::ProjectStore;

    fn mapping(service: &str, internal: u16, external: u16) -> PortMapping {
        PortMapping {
            service: service.to_string(),
            internal,
            external,
            protocol: Protocol::Tcp,
        }
    }

    fn setup(projects_dir: &std::path::Path) -> PortRegistry {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let projects = ProjectStore::new(db.clone());
        for (owner, name) in [("alice", "blog"), ("bob", "shop")] {
            projects
                .upsert(&Project {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    kind: ProjectKind::CustomComposition,
                })
                .unwrap();
        }
        PortRegistry::new(db, projects_dir)
    }

    #[test]
    fn test_register_replaces_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path());

        registry
            .register_ports("alice", "blog", &[mapping("web", 80, 8001), mapping("db", 5432, 8002)])
            .unwrap();
        registry.register_ports("alice", "blog", &[mapping("web", 80, 8005)]).unwrap();

        let ports = registry.ports_for_project("alice", "blog").unwrap();
        assert_eq!(ports, vec![mapping("web", 80, 8005)]);
        assert_eq!(registry.all_used_ports().unwrap(), BTreeSet::from([8005]));
    }

    #[test]
    fn test_conflicting_registration_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path());

        registry.register_ports("alice", "blog", &[mapping("web", 80, 8001)]).unwrap();
        registry.register_ports("bob", "shop", &[mapping("web", 80, 8002)]).unwrap();

        let result = registry.register_ports("bob", "shop", &[mapping("web", 80, 8001)]);
        assert!(matches!(result, Err(ShipyardError::DatabaseError(_))));
        // The delete half of the failed replace must not be visible
        assert_eq!(
            registry.ports_for_project("bob", "shop").unwrap(),
            vec![mapping("web", 80, 8002)]
        );
    }

    #[test]
    fn test_used_ports_excluding_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path());
        registry.register_ports("alice", "blog", &[mapping("web", 80, 9000)]).unwrap();
        registry.register_ports("bob", "shop", &[mapping("web", 80, 9001)]).unwrap();

        assert_eq!(
            registry.used_ports_excluding("alice", "blog").unwrap(),
            BTreeSet::from([9001])
        );
        assert_eq!(registry.release_ports("bob", "shop").unwrap(), 1);
        assert_eq!(registry.all_used_ports().unwrap(), BTreeSet::from([9000]));
    }

    #[tokio::test]
    async fn test_find_next_available_port_merges_markers() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path());
        registry
            .register_ports("alice", "blog", &[mapping("web", 80, 8001), mapping("api", 81, 8003)])
            .unwrap();

        let legacy = dir.path().join("carol").join("site");
        std::fs::create_dir_all(&legacy).unwrap();
        std::fs::write(legacy.join(PORT_MARKER_FILE), "8004\n").unwrap();

        assert_eq!(registry.find_next_available_port(1).await.unwrap(), 8002);
        assert_eq!(registry.find_next_available_port(2).await.unwrap(), 8005);
    }

    #[test]
    fn test_first_free_block_exhaustion() {
        let used: BTreeSet<u16> = [65534].into_iter().collect();
        assert_eq!(first_free_block(&used, 1).unwrap(), FIRST_PROJECT_PORT);
        assert!(matches!(
            first_free_block(&used, 60000),
            Err(ShipyardError::PortExhausted(60000))
        ));

        let crowded: BTreeSet<u16> = (FIRST_PROJECT_PORT..=65534).collect();
        assert_eq!(first_free_block(&crowded, 1).unwrap(), 65535);
        assert!(first_free_block(&crowded, 2).is_err());
    }
}
