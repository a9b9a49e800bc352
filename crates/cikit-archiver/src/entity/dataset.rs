//! Dataset entity: the container that owns every archived child object

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cikit_cloud::{
    DatasetIdentifier, DatasetResource, RoutineKind, RoutineListItem, TableKind, TableListItem,
    UpdateField, Warehouse,
};
use cikit_core::{decode_document, BaseMetadata, RestoreConfig};
use cikit_sql::ReferenceMapping;
use serde::{Deserialize, Serialize};

use super::external::{self, ExternalTableEntity};
use super::header::EntityHeader;
use super::routine::{self, RoutineEntity};
use super::table::{self, TableEntity};
use super::view::{self, MaterializedViewEntity, ViewEntity};
use super::ArchiveEntity;
use crate::error::EntityError;

/// Name of the dataset document inside an archive prefix
pub const DATASET_DOCUMENT: &str = "dataset.json";

/// One item of a live dataset listing
#[derive(Debug, Clone, PartialEq)]
pub enum ListingItem {
    Table(TableListItem),
    Routine(RoutineListItem),
}

impl ListingItem {
    pub fn name(&self) -> &str {
        match self {
            Self::Table(item) => &item.reference.name,
            Self::Routine(item) => &item.reference.name,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Table(item) => item.kind.as_str(),
            Self::Routine(item) => item.kind.as_str(),
        }
    }
}

/// Storage sub-prefix for a child type tag
fn sub_prefix(tag: &str) -> &'static str {
    match tag {
        table::TAG => "tables",
        view::VIEW_TAG => "views",
        view::MATERIALIZED_VIEW_TAG => "materialized_views",
        routine::FUNCTION_TAG => "functions",
        routine::PROCEDURE_TAG => "stored_procedures",
        external::TAG => "external_tables",
        _ => "entities",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntity {
    /// `gcs_prefix` is the archive root; the run's own prefix is [`Self::archive_prefix`]
    #[serde(flatten)]
    pub header: EntityHeader,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub tables: Vec<TableEntity>,

    #[serde(default)]
    pub views: Vec<ViewEntity>,

    #[serde(default)]
    pub materialized_views: Vec<MaterializedViewEntity>,

    #[serde(default)]
    pub user_defined_functions: Vec<RoutineEntity>,

    #[serde(default)]
    pub stored_procedures: Vec<RoutineEntity>,

    #[serde(default)]
    pub external_tables: Vec<ExternalTableEntity>,
}

impl DatasetEntity {
    pub fn new(
        project_id: impl Into<String>,
        dataset: impl Into<String>,
        gcs_prefix: impl Into<String>,
        archived_datetime: DateTime<Utc>,
    ) -> Self {
        let gcs_prefix: String = gcs_prefix.into();
        Self {
            header: EntityHeader::new(
                BaseMetadata::for_dataset(project_id, dataset),
                gcs_prefix.trim_end_matches('/'),
                archived_datetime,
            ),
            location: None,
            tables: Vec::new(),
            views: Vec::new(),
            materialized_views: Vec::new(),
            user_defined_functions: Vec::new(),
            stored_procedures: Vec::new(),
            external_tables: Vec::new(),
        }
    }

    /// Parse a dataset document written by an archive run
    pub fn from_document(bytes: &[u8]) -> Result<Self, EntityError> {
        decode_document::<ArchiveEntity>(bytes, "dataset")?.try_into()
    }

    pub fn with_destination(mut self, project_id: impl Into<String>, dataset: impl Into<String>) -> Self {
        self.header
            .set_destination(Some(project_id.into()), Some(dataset.into()));
        self
    }

    /// `project.dataset`, at the destination when one is set
    pub fn fully_qualified_identity(&self) -> String {
        self.target().fqn()
    }

    pub fn source(&self) -> DatasetIdentifier {
        DatasetIdentifier::new(&self.header.metadata.project_id, &self.header.metadata.dataset)
    }

    pub fn target(&self) -> DatasetIdentifier {
        self.header.target_dataset()
    }

    /// `{gcs_prefix}/dataset={dataset}/archive_ts={ts}`
    pub fn archive_prefix(&self) -> String {
        format!(
            "{}/dataset={}/archive_ts={}",
            self.header.gcs_prefix,
            self.header.identity(),
            self.header.archive_ts()
        )
    }

    pub fn document_path(&self) -> String {
        format!("{}/{DATASET_DOCUMENT}", self.archive_prefix())
    }

    pub fn child_prefix(&self, tag: &str) -> String {
        format!("{}/{}", self.archive_prefix(), sub_prefix(tag))
    }

    fn child_header(&self, identity: &str, labels: BTreeMap<String, String>, tag: &str) -> EntityHeader {
        let mut metadata = BaseMetadata::new(
            &self.header.metadata.project_id,
            &self.header.metadata.dataset,
            identity,
        );
        metadata.labels = labels;
        metadata.tags = self.header.metadata.tags.clone();

        let mut header = EntityHeader::new(metadata, self.child_prefix(tag), self.header.archived_datetime);
        header.metadata_version = self.header.metadata_version.clone();
        header.set_destination(
            self.header.destination_project_id.clone(),
            self.header.destination_dataset.clone(),
        );
        header
    }

    /// Classify a listing item into an entity stamped with this dataset's metadata.
    ///
    /// Returns `None` for object kinds that are not archived.
    pub fn generate_archived_entity_from_listing(&self, item: &ListingItem) -> Option<ArchiveEntity> {
        let entity = match item {
            ListingItem::Table(listed) => {
                let identity = listed.reference.name.as_str();
                let labels = listed.labels.clone();
                match listed.kind {
                    TableKind::Table => ArchiveEntity::Table(TableEntity::new(
                        self.child_header(identity, labels, table::TAG),
                    )),
                    TableKind::View => ArchiveEntity::View(ViewEntity::new(
                        self.child_header(identity, labels, view::VIEW_TAG),
                        "",
                    )),
                    TableKind::MaterializedView => {
                        ArchiveEntity::MaterializedView(MaterializedViewEntity::new(
                            self.child_header(identity, labels, view::MATERIALIZED_VIEW_TAG),
                            "",
                        ))
                    }
                    TableKind::External => ArchiveEntity::ExternalTable(ExternalTableEntity::new(
                        self.child_header(identity, labels, external::TAG),
                    )),
                    _ => {
                        tracing::warn!(identity, kind = item.kind(), "Skipping unsupported table kind");
                        return None;
                    }
                }
            }
            ListingItem::Routine(listed) => {
                let identity = listed.reference.name.as_str();
                match listed.kind {
                    RoutineKind::ScalarFunction => ArchiveEntity::UserDefinedFunction(
                        RoutineEntity::new(self.child_header(identity, BTreeMap::new(), routine::FUNCTION_TAG)),
                    ),
                    RoutineKind::Procedure => ArchiveEntity::StoredProcedure(RoutineEntity::new(
                        self.child_header(identity, BTreeMap::new(), routine::PROCEDURE_TAG),
                    )),
                    _ => {
                        tracing::warn!(identity, kind = item.kind(), "Skipping unsupported routine kind");
                        return None;
                    }
                }
            }
        };
        Some(entity)
    }

    /// File a child entity under its collection
    pub fn add_child(&mut self, entity: ArchiveEntity) {
        match entity {
            ArchiveEntity::Table(e) => self.tables.push(e),
            ArchiveEntity::View(e) => self.views.push(e),
            ArchiveEntity::MaterializedView(e) => self.materialized_views.push(e),
            ArchiveEntity::UserDefinedFunction(e) => self.user_defined_functions.push(e),
            ArchiveEntity::StoredProcedure(e) => self.stored_procedures.push(e),
            ArchiveEntity::ExternalTable(e) => self.external_tables.push(e),
            ArchiveEntity::Dataset(nested) => {
                tracing::warn!(dataset = %nested.header.identity(), "Ignoring nested dataset");
            }
        }
    }

    /// Move every child out, tables first
    pub fn take_children(&mut self) -> Vec<ArchiveEntity> {
        let mut children = Vec::with_capacity(self.child_count());
        children.extend(std::mem::take(&mut self.tables).into_iter().map(ArchiveEntity::Table));
        children.extend(
            std::mem::take(&mut self.external_tables)
                .into_iter()
                .map(ArchiveEntity::ExternalTable),
        );
        children.extend(std::mem::take(&mut self.views).into_iter().map(ArchiveEntity::View));
        children.extend(
            std::mem::take(&mut self.materialized_views)
                .into_iter()
                .map(ArchiveEntity::MaterializedView),
        );
        children.extend(
            std::mem::take(&mut self.user_defined_functions)
                .into_iter()
                .map(ArchiveEntity::UserDefinedFunction),
        );
        children.extend(
            std::mem::take(&mut self.stored_procedures)
                .into_iter()
                .map(ArchiveEntity::StoredProcedure),
        );
        children
    }

    pub fn child_count(&self) -> usize {
        self.tables.len()
            + self.views.len()
            + self.materialized_views.len()
            + self.user_defined_functions.len()
            + self.stored_procedures.len()
            + self.external_tables.len()
    }

    /// Order children by identity so documents are stable across runs
    pub fn sort_children(&mut self) {
        self.tables.sort_by(|a, b| a.header.identity().cmp(b.header.identity()));
        self.views.sort_by(|a, b| a.header.identity().cmp(b.header.identity()));
        self.materialized_views
            .sort_by(|a, b| a.header.identity().cmp(b.header.identity()));
        self.user_defined_functions
            .sort_by(|a, b| a.header.identity().cmp(b.header.identity()));
        self.stored_procedures
            .sort_by(|a, b| a.header.identity().cmp(b.header.identity()));
        self.external_tables
            .sort_by(|a, b| a.header.identity().cmp(b.header.identity()));
    }

    fn child_headers_mut(&mut self) -> impl Iterator<Item = &mut EntityHeader> {
        self.tables
            .iter_mut()
            .map(|e| &mut e.header)
            .chain(self.views.iter_mut().map(|e| &mut e.header))
            .chain(self.materialized_views.iter_mut().map(|e| &mut e.header))
            .chain(self.user_defined_functions.iter_mut().map(|e| &mut e.header))
            .chain(self.stored_procedures.iter_mut().map(|e| &mut e.header))
            .chain(self.external_tables.iter_mut().map(|e| &mut e.header))
    }

    /// Whether restoring targets a different project or dataset than the archive source
    pub fn is_relocated(&self) -> bool {
        match self.header.destination() {
            Some((project, dataset)) => {
                project != self.header.metadata.project_id || dataset != self.header.metadata.dataset
            }
            None => false,
        }
    }

    /// Push destination overrides down to every child and rewrite SQL bodies.
    ///
    /// `extra` holds additional source-to-destination reference substitutions.
    pub fn populate_sub_restore_info(&mut self, extra: &BTreeMap<String, String>) {
        let project = self.header.destination_project_id.clone();
        let dataset = self.header.destination_dataset.clone();
        for header in self.child_headers_mut() {
            header.set_destination(project.clone(), dataset.clone());
        }

        let mut mapping = match self.header.destination() {
            Some((dst_project, dst_dataset)) if self.is_relocated() => ReferenceMapping::for_dataset(
                &self.header.metadata.project_id,
                &self.header.metadata.dataset,
                dst_project,
                dst_dataset,
            ),
            _ => ReferenceMapping::new(),
        };
        mapping.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        if !mapping.is_empty() {
            self.modify_sub_entity_queries(&mapping);
        }
    }

    /// Rewrite the SQL of every view, materialized view and routine
    pub fn modify_sub_entity_queries(&mut self, mapping: &ReferenceMapping) {
        tracing::debug!(
            dataset = %self.header.identity(),
            entries = mapping.len(),
            "Rewriting child queries"
        );
        for view in &mut self.views {
            view.modify_query(mapping);
        }
        for mview in &mut self.materialized_views {
            mview.modify_query(mapping);
        }
        for routine in self
            .user_defined_functions
            .iter_mut()
            .chain(self.stored_procedures.iter_mut())
        {
            routine.modify_body(mapping);
        }
    }

    pub(crate) async fn fetch(&mut self, warehouse: &dyn Warehouse) -> Result<(), EntityError> {
        let dataset = warehouse.get_dataset(&self.source()).await?;
        self.header.metadata.description = dataset.description;
        self.header.metadata.labels = dataset.labels;
        self.location = dataset.location;
        Ok(())
    }

    /// Create the dataset container and apply its metadata.
    ///
    /// The container is never dropped; replacing existing objects is left to
    /// each child's own overwrite handling so skipped objects survive.
    pub(crate) async fn restore(
        &self,
        warehouse: &dyn Warehouse,
        config: &RestoreConfig,
    ) -> Result<(), EntityError> {
        let mut resource = DatasetResource::new(self.target());
        resource.location = self.location.clone();

        let mut dataset = warehouse.create_dataset(&resource, true).await?;
        dataset.description = self.header.metadata.description.clone();
        dataset.labels = self.header.restored_labels(config.attach_archive_ts_to_label);
        warehouse
            .update_dataset(&dataset, &[UpdateField::Description, UpdateField::Labels])
            .await?;
        Ok(())
    }
}

impl TryFrom<ArchiveEntity> for DatasetEntity {
    type Error = EntityError;

    fn try_from(entity: ArchiveEntity) -> Result<Self, Self::Error> {
        match entity {
            ArchiveEntity::Dataset(dataset) => Ok(*dataset),
            other => Err(EntityError::invalid_metadata(
                other.identity(),
                format!("expected a dataset document, found {}", other.entity_type()),
            )),
        }
    }
}
