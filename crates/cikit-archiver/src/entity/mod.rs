//! Archivable warehouse objects
//!
//! [`ArchiveEntity`] is a closed set of variants tagged by `entity_type`.
//! Every variant can be fetched from a live warehouse, archived to storage,
//! loaded back from its document and restored. Views and materialized views
//! also report the tables they read, which orders their restore.

mod dataset;
mod external;
mod header;
mod routine;
mod table;
mod view;

use std::collections::HashSet;
use std::sync::Arc;

use cikit_cloud::{ArchiveStorage, Warehouse};
use cikit_core::{decode_document, ArchiveConfig, RestoreConfig};
use cikit_dag::DagNode;
use cikit_sql::ReferenceMapping;
use serde::{Deserialize, Serialize};

pub use dataset::{DatasetEntity, ListingItem, DATASET_DOCUMENT};
pub use external::{ExternalConfigBlob, ExternalTableEntity, BLOB_ENCODING};
pub use header::{
    EntityHeader, ARCHIVER_VERSION, ARCHIVE_TS_FORMAT, ARCHIVE_TS_LABEL, SUPPORTED_METADATA_VERSION,
};
pub use routine::{RoutineEntity, RoutineType};
pub use table::TableEntity;
pub use view::{MaterializedViewEntity, ViewEntity};

use crate::error::EntityError;

/// Warehouse and storage handles shared by every task of a run
#[derive(Clone)]
pub struct Backends {
    pub warehouse: Arc<dyn Warehouse>,
    pub storage: ArchiveStorage,
}

impl Backends {
    pub fn new(warehouse: Arc<dyn Warehouse>, storage: ArchiveStorage) -> Self {
        Self { warehouse, storage }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("warehouse", &self.warehouse.name())
            .field("storage", &self.storage.root())
            .finish()
    }
}

/// What `restore_self` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Restored,

    /// Listed in `skip_restore`; the warehouse was not contacted
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum ArchiveEntity {
    Dataset(Box<DatasetEntity>),
    Table(TableEntity),
    View(ViewEntity),
    MaterializedView(MaterializedViewEntity),
    UserDefinedFunction(RoutineEntity),
    StoredProcedure(RoutineEntity),
    ExternalTable(ExternalTableEntity),
}

impl From<DatasetEntity> for ArchiveEntity {
    fn from(dataset: DatasetEntity) -> Self {
        Self::Dataset(Box::new(dataset))
    }
}

impl ArchiveEntity {
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::Dataset(_) => "dataset",
            Self::Table(_) => "table",
            Self::View(_) => "view",
            Self::MaterializedView(_) => "materialized_view",
            Self::UserDefinedFunction(_) => "user_defined_function",
            Self::StoredProcedure(_) => "stored_procedure",
            Self::ExternalTable(_) => "external_table",
        }
    }

    pub fn header(&self) -> &EntityHeader {
        match self {
            Self::Dataset(e) => &e.header,
            Self::Table(e) => &e.header,
            Self::View(e) => &e.header,
            Self::MaterializedView(e) => &e.header,
            Self::UserDefinedFunction(e) | Self::StoredProcedure(e) => &e.header,
            Self::ExternalTable(e) => &e.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut EntityHeader {
        match self {
            Self::Dataset(e) => &mut e.header,
            Self::Table(e) => &mut e.header,
            Self::View(e) => &mut e.header,
            Self::MaterializedView(e) => &mut e.header,
            Self::UserDefinedFunction(e) | Self::StoredProcedure(e) => &mut e.header,
            Self::ExternalTable(e) => &mut e.header,
        }
    }

    pub fn identity(&self) -> String {
        self.header().identity().to_string()
    }

    /// `project.dataset.identity` (`project.dataset` for datasets), destination aware
    pub fn fully_qualified_identity(&self) -> String {
        match self {
            Self::Dataset(dataset) => dataset.fully_qualified_identity(),
            other => other.header().fully_qualified_identity(),
        }
    }

    /// Where this entity's own document is stored
    pub fn metadata_path(&self) -> String {
        let header = self.header();
        match self {
            Self::Dataset(dataset) => dataset.document_path(),
            Self::Table(_) => header.document_path(table::TAG),
            Self::View(_) => header.document_path(view::VIEW_TAG),
            Self::MaterializedView(_) => header.document_path(view::MATERIALIZED_VIEW_TAG),
            Self::UserDefinedFunction(_) => header.document_path(routine::FUNCTION_TAG),
            Self::StoredProcedure(_) => header.document_path(routine::PROCEDURE_TAG),
            Self::ExternalTable(_) => header.document_path(external::TAG),
        }
    }

    /// Views and materialized views wait for the tables their SQL reads
    pub fn is_dependency_ordered(&self) -> bool {
        matches!(self, Self::View(_) | Self::MaterializedView(_))
    }

    /// Populate fields from the live warehouse
    pub async fn fetch_self(&mut self, warehouse: &dyn Warehouse) -> Result<(), EntityError> {
        match self {
            Self::Dataset(e) => e.fetch(warehouse).await,
            Self::Table(e) => e.fetch(warehouse).await,
            Self::View(e) => e.fetch(warehouse).await,
            Self::MaterializedView(e) => e.fetch(warehouse).await,
            Self::UserDefinedFunction(e) | Self::StoredProcedure(e) => e.fetch(warehouse).await,
            Self::ExternalTable(e) => e.fetch(warehouse).await,
        }
    }

    /// Export table data (tables only), then write this entity's document.
    ///
    /// Rerunning overwrites the document and reruns the export.
    pub async fn archive_self(
        &mut self,
        backends: &Backends,
        config: &ArchiveConfig,
    ) -> Result<(), EntityError> {
        if let Self::Table(table) = self {
            table.export(backends.warehouse.as_ref(), config).await?;
        }

        let path = self.metadata_path();
        let header = self.header_mut();
        header.is_archived = true;
        header.actual_archive_metadata_path = Some(path.clone());

        backends.storage.write_json(&path, self).await?;
        tracing::debug!(entity_type = self.entity_type(), path = %path, "Wrote metadata document");
        Ok(())
    }

    /// Re-read this entity's document, keeping only the fields its variant declares.
    ///
    /// Destination overrides set in memory survive the reload.
    pub async fn load_self(&mut self, storage: &ArchiveStorage) -> Result<(), EntityError> {
        let bytes = storage.read_bytes(&self.metadata_path()).await?;
        let mut loaded: ArchiveEntity = decode_document(&bytes, self.entity_type())?;
        if loaded.entity_type() != self.entity_type() {
            return Err(EntityError::invalid_metadata(
                self.fully_qualified_identity(),
                format!("document holds a {}", loaded.entity_type()),
            ));
        }

        let current = self.header();
        if loaded.header().destination().is_none() {
            let (project, dataset) = (
                current.destination_project_id.clone(),
                current.destination_dataset.clone(),
            );
            loaded.header_mut().set_destination(project, dataset);
        }
        *self = loaded;
        Ok(())
    }

    /// Recreate the object at its destination.
    ///
    /// The metadata version is checked before anything else, and entities
    /// listed in `skip_restore` return without contacting the warehouse.
    pub async fn restore_self(
        &self,
        warehouse: &dyn Warehouse,
        config: &RestoreConfig,
    ) -> Result<RestoreStatus, EntityError> {
        self.header().check_version()?;
        if config.should_skip(self.header().identity()) {
            tracing::info!(
                entity_type = self.entity_type(),
                identity = %self.fully_qualified_identity(),
                "Skipping restore"
            );
            return Ok(RestoreStatus::Skipped);
        }

        match self {
            Self::Dataset(e) => e.restore(warehouse, config).await?,
            Self::Table(e) => e.restore(warehouse, config).await?,
            Self::View(e) => e.restore(warehouse, config).await?,
            Self::MaterializedView(e) => e.restore(warehouse, config).await?,
            Self::UserDefinedFunction(e) => e.restore(warehouse, config, RoutineType::Function).await?,
            Self::StoredProcedure(e) => e.restore(warehouse, config, RoutineType::Procedure).await?,
            Self::ExternalTable(e) => e.restore(warehouse, config).await?,
        }
        Ok(RestoreStatus::Restored)
    }

    /// Substitute table and dataset references in embedded SQL
    pub fn modify_self_query(&mut self, mapping: &ReferenceMapping) {
        match self {
            Self::View(e) => e.modify_query(mapping),
            Self::MaterializedView(e) => e.modify_query(mapping),
            Self::UserDefinedFunction(e) | Self::StoredProcedure(e) => e.modify_body(mapping),
            Self::Dataset(e) => e.modify_sub_entity_queries(mapping),
            Self::Table(_) | Self::ExternalTable(_) => {}
        }
    }

    /// Qualified identities the entity's SQL reads from
    pub fn sql_dependencies(&self) -> Result<HashSet<String>, EntityError> {
        match self {
            Self::View(e) => e.dependencies(),
            Self::MaterializedView(e) => e.dependencies(),
            _ => Ok(HashSet::new()),
        }
    }
}

impl DagNode for ArchiveEntity {
    fn dag_key(&self) -> String {
        self.fully_qualified_identity()
    }

    /// Unparseable SQL yields no dependencies here; callers that need the
    /// error use [`ArchiveEntity::sql_dependencies`].
    fn dag_dependencies(&self) -> HashSet<String> {
        self.sql_dependencies().unwrap_or_else(|e| {
            tracing::warn!(identity = %self.fully_qualified_identity(), error = %e, "Ignoring unparseable SQL");
            HashSet::new()
        })
    }
}
