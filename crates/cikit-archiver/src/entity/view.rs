//! Views and materialized views
//!
//! Both carry a SELECT statement whose table references decide restore
//! order, and both are rewritten when a dataset is restored under a new name.

use std::collections::HashSet;

use cikit_cloud::{QueryRequest, TableResource, UpdateField, Warehouse};
use cikit_core::{PartitionConfig, RestoreConfig, SchemaField};
use cikit_sql::{
    extract_dependencies, qualify_dependencies, rewrite_query_references, rewrite_text_references,
    ReferenceMapping,
};
use serde::{Deserialize, Serialize};

use super::header::EntityHeader;
use crate::error::EntityError;

pub(crate) const VIEW_TAG: &str = "view";
pub(crate) const MATERIALIZED_VIEW_TAG: &str = "materialized_view";

const DEFAULT_REFRESH_INTERVAL_SECONDS: i64 = 1800;

fn default_refresh_interval() -> i64 {
    DEFAULT_REFRESH_INTERVAL_SECONDS
}

/// Fully qualified tables read by `sql`, resolved against the header's effective dataset
fn query_dependencies(header: &EntityHeader, sql: &str) -> Result<HashSet<String>, EntityError> {
    let names = extract_dependencies(sql, &mut HashSet::new()).map_err(|source| {
        EntityError::Parse {
            entity: header.fully_qualified_identity(),
            source,
        }
    })?;
    Ok(qualify_dependencies(
        names,
        header.effective_project(),
        header.effective_dataset(),
    ))
}

/// Rewrite on the AST; fall back to text substitution when the dialect parser gives up
fn rewrite_query(header: &EntityHeader, sql: &str, mapping: &ReferenceMapping) -> String {
    match rewrite_query_references(sql, mapping) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            tracing::warn!(
                identity = %header.identity(),
                error = %e,
                "Query rewrite fell back to text substitution"
            );
            rewrite_text_references(sql, mapping)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEntity {
    #[serde(flatten)]
    pub header: EntityHeader,

    #[serde(default)]
    pub defining_query: String,

    #[serde(default)]
    pub schema_fields: Vec<SchemaField>,
}

impl ViewEntity {
    pub fn new(header: EntityHeader, defining_query: impl Into<String>) -> Self {
        Self {
            header,
            defining_query: defining_query.into(),
            schema_fields: Vec::new(),
        }
    }

    pub fn dependencies(&self) -> Result<HashSet<String>, EntityError> {
        query_dependencies(&self.header, &self.defining_query)
    }

    pub fn modify_query(&mut self, mapping: &ReferenceMapping) {
        self.defining_query = rewrite_query(&self.header, &self.defining_query, mapping);
    }

    pub(crate) async fn fetch(&mut self, warehouse: &dyn Warehouse) -> Result<(), EntityError> {
        let table = warehouse.get_table(&self.header.source()).await?;
        self.defining_query = table.view_query.ok_or_else(|| {
            EntityError::invalid_metadata(self.header.fully_qualified_identity(), "view has no query")
        })?;
        self.schema_fields = table.schema;
        self.header.metadata.description = table.description;
        self.header.metadata.labels = table.labels;
        Ok(())
    }

    pub(crate) async fn restore(
        &self,
        warehouse: &dyn Warehouse,
        config: &RestoreConfig,
    ) -> Result<(), EntityError> {
        let target = self.header.target();
        if config.overwrite_existing {
            warehouse.delete_table(&target, true).await?;
        }

        let mut view = warehouse
            .create_table(&TableResource::view(target, &self.defining_query), true)
            .await?;
        view.description = self.header.metadata.description.clone();
        view.labels = self.header.restored_labels(config.attach_archive_ts_to_label);

        let mut fields = vec![UpdateField::Description, UpdateField::Labels];
        if !self.schema_fields.is_empty() {
            view.schema = self.schema_fields.clone();
            fields.push(UpdateField::Schema);
        }
        warehouse.update_table(&view, &fields).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedViewEntity {
    #[serde(flatten)]
    pub header: EntityHeader,

    #[serde(default)]
    pub enable_refresh: bool,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: i64,

    #[serde(default)]
    pub mview_query: String,

    #[serde(default)]
    pub partition_config: Option<PartitionConfig>,

    #[serde(default)]
    pub schema_fields: Vec<SchemaField>,
}

impl MaterializedViewEntity {
    pub fn new(header: EntityHeader, mview_query: impl Into<String>) -> Self {
        Self {
            header,
            enable_refresh: false,
            refresh_interval_seconds: DEFAULT_REFRESH_INTERVAL_SECONDS,
            mview_query: mview_query.into(),
            partition_config: None,
            schema_fields: Vec::new(),
        }
    }

    pub fn dependencies(&self) -> Result<HashSet<String>, EntityError> {
        query_dependencies(&self.header, &self.mview_query)
    }

    pub fn modify_query(&mut self, mapping: &ReferenceMapping) {
        self.mview_query = rewrite_query(&self.header, &self.mview_query, mapping);
    }

    pub fn create_statement(&self) -> String {
        format!(
            "CREATE MATERIALIZED VIEW `{}` OPTIONS (enable_refresh = {}, refresh_interval_minutes = {}) AS ({})",
            self.header.fully_qualified_identity(),
            self.enable_refresh,
            self.refresh_interval_seconds / 60,
            self.mview_query
        )
    }

    pub(crate) async fn fetch(&mut self, warehouse: &dyn Warehouse) -> Result<(), EntityError> {
        let table = warehouse.get_table(&self.header.source()).await?;
        let definition = table.materialized_view.ok_or_else(|| {
            EntityError::invalid_metadata(
                self.header.fully_qualified_identity(),
                "materialized view has no definition",
            )
        })?;
        self.mview_query = definition.query;
        self.enable_refresh = definition.enable_refresh;
        self.refresh_interval_seconds = definition.refresh_interval_ms / 1000;
        self.partition_config = table.partition;
        self.schema_fields = table.schema;
        self.header.metadata.description = table.description;
        self.header.metadata.labels = table.labels;
        Ok(())
    }

    pub(crate) async fn restore(
        &self,
        warehouse: &dyn Warehouse,
        config: &RestoreConfig,
    ) -> Result<(), EntityError> {
        let target = self.header.target();
        if config.overwrite_existing {
            warehouse.delete_table(&target, true).await?;
        }

        let statement = QueryRequest::new(self.create_statement())
            .with_job_id_prefix(self.header.job_id_prefix("restore"));
        warehouse.query(&statement).await?;

        let mut view = warehouse.get_table(&target).await?;
        view.description = self.header.metadata.description.clone();
        view.labels = self.header.restored_labels(config.attach_archive_ts_to_label);
        warehouse
            .update_table(&view, &[UpdateField::Description, UpdateField::Labels])
            .await?;
        Ok(())
    }
}
