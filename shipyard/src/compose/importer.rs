//! Import of a project's composition document
//!
//! Discovers the user's document in the project checkout, validates it,
//! transforms it with ports reserved for the project and writes the generated
//! document next to the checkout. Nothing is written or registered unless the
//! document parses and validates.
//!
//! Imports are serialized: port selection, registration and the write form
//! one critical section, so two projects never pick the same free block.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::compose::document::ComposeDocument;
use crate::compose::transformer::{ComposeTransformer, PortMapping, TransformContext};
use crate::compose::validator;
use crate::errors::ShipyardError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::project::project_prefix;
use crate::storage::layout::StorageLayout;
use crate::storage::ports::{PortRegistry, FIRST_PROJECT_PORT};

/// File names recognized as a composition document, in priority order
pub const COMPOSE_FILE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Options shared by every import
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub shared_network: String,
    pub timezone: String,
}

/// Result of a successful import
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    /// Where the generated document was written
    pub compose_file: PathBuf,

    /// Checkout subdirectory the source document was found in
    pub subdir: Option<String>,

    pub base_port: u16,
    pub mappings: Vec<PortMapping>,
}

/// A source document located in a checkout
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub file: File,
    pub subdir: Option<String>,
}

pub struct ComposeImporter {
    layout: StorageLayout,
    ports: Arc<PortRegistry>,
    transformer: ComposeTransformer,
    options: ImportOptions,
    import_lock: Mutex<()>,
}

impl ComposeImporter {
    pub fn new(
        layout: StorageLayout,
        ports: Arc<PortRegistry>,
        transformer: ComposeTransformer,
        options: ImportOptions,
    ) -> Self {
        Self {
            layout,
            ports,
            transformer,
            options,
            import_lock: Mutex::new(()),
        }
    }

    /// Re-import the project's composition document from its checkout
    pub async fn process_document(
        &self,
        owner: &str,
        project: &str,
    ) -> Result<ImportOutcome, ShipyardError> {
        let checkout = self.layout.checkout_dir(owner, project);
        let source = discover(&checkout).await?;
        debug!(
            owner,
            project,
            "Found composition document at {}",
            source.file.path().display()
        );
        let contents = source.file.read_string().await?;
        self.process_source(owner, project, &contents, source.subdir)
            .await
    }

    /// Validate, transform, write and register a document given as text
    pub async fn process_source(
        &self,
        owner: &str,
        project: &str,
        contents: &str,
        subdir: Option<String>,
    ) -> Result<ImportOutcome, ShipyardError> {
        let document = ComposeDocument::parse(contents)?;
        validator::validate(&document, &self.options.shared_network).into_result()?;

        let _guard = self.import_lock.lock().await;
        let base_port = self.base_port(owner, project, &document).await?;
        let ctx = TransformContext {
            prefix: project_prefix(owner, project),
            base_port,
            used_ports: self.ports.used_ports_excluding(owner, project)?,
            subdir: subdir.clone(),
            shared_network: self.options.shared_network.clone(),
            timezone: self.options.timezone.clone(),
            generated_at: Utc::now(),
        };
        let output = self.transformer.transform(&document, &ctx)?;

        let yaml = output.document.to_yaml()?;

        // The ledger is claimed first; a failed write hands the old rows back
        let previous = self.ports.ports_for_project(owner, project)?;
        self.ports.register_ports(owner, project, &output.mappings)?;
        let compose_file = self.layout.compose_file(owner, project);
        if let Err(e) = compose_file.write_atomic(yaml.as_bytes()).await {
            if let Err(restore_err) = self.ports.register_ports(owner, project, &previous) {
                error!(owner, project, "Failed to restore port rows: {}", restore_err);
            }
            return Err(e);
        }

        info!(
            owner,
            project,
            base_port,
            ports = output.mappings.len(),
            "Imported composition document"
        );
        Ok(ImportOutcome {
            compose_file: compose_file.path().to_path_buf(),
            subdir,
            base_port,
            mappings: output.mappings,
        })
    }

    /// The project's lowest registered port, so a re-import keeps its ports;
    /// otherwise the start of a fresh free block
    async fn base_port(
        &self,
        owner: &str,
        project: &str,
        document: &ComposeDocument,
    ) -> Result<u16, ShipyardError> {
        if let Some(existing) = self
            .ports
            .ports_for_project(owner, project)?
            .iter()
            .map(|m| m.external)
            .min()
        {
            return Ok(existing);
        }
        match document.port_binding_count() {
            0 => Ok(FIRST_PROJECT_PORT),
            count => self.ports.find_next_available_port(count).await,
        }
    }
}

/// Locate the composition document at the checkout root or one level below
pub async fn discover(checkout: &Dir) -> Result<SourceDocument, ShipyardError> {
    if let Some(file) = find_compose_file(checkout).await {
        return Ok(SourceDocument { file, subdir: None });
    }

    if checkout.exists().await {
        for path in checkout.list_dirs().await? {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(file) = find_compose_file(&Dir::new(&path)).await {
                return Ok(SourceDocument {
                    file,
                    subdir: Some(name),
                });
            }
        }
    }

    Err(ShipyardError::NotFound(format!(
        "no composition document in {}",
        checkout.path().display()
    )))
}

async fn find_compose_file(dir: &Dir) -> Option<File> {
    for name in COMPOSE_FILE_NAMES {
        let file = dir.file(name);
        if file.exists().await {
            return Some(file);
        }
    }
    None
}
