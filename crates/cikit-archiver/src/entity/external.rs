//! External tables
//!
//! The connector configuration is never interpreted. It is stored as an
//! encoded blob and handed back to the warehouse unchanged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cikit_cloud::{TableKind, TableResource, Warehouse};
use cikit_core::{PartitionConfig, RestoreConfig, SchemaField};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::header::EntityHeader;
use crate::error::EntityError;

pub(crate) const TAG: &str = "external_table";

/// Base64 of the JSON connector configuration
pub const BLOB_ENCODING: &str = "base64/json";

/// Opaque connector configuration with its declared encoding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConfigBlob {
    pub encoding: String,
    pub data: String,
}

impl ExternalConfigBlob {
    pub fn encode(config: &Value) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(config)?;
        Ok(Self {
            encoding: BLOB_ENCODING.to_string(),
            data: STANDARD.encode(json),
        })
    }

    pub fn decode(&self) -> Result<Value, String> {
        if self.encoding != BLOB_ENCODING {
            return Err(format!("unsupported encoding '{}'", self.encoding));
        }
        let bytes = STANDARD.decode(&self.data).map_err(|e| e.to_string())?;
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTableEntity {
    #[serde(flatten)]
    pub header: EntityHeader,

    #[serde(default)]
    pub schema_fields: Vec<SchemaField>,

    #[serde(default)]
    pub partition_config: Option<PartitionConfig>,

    #[serde(default)]
    pub external_data_configuration: ExternalConfigBlob,
}

impl ExternalTableEntity {
    pub fn new(header: EntityHeader) -> Self {
        Self {
            header,
            schema_fields: Vec::new(),
            partition_config: None,
            external_data_configuration: ExternalConfigBlob::default(),
        }
    }

    pub(crate) async fn fetch(&mut self, warehouse: &dyn Warehouse) -> Result<(), EntityError> {
        let table = warehouse.get_table(&self.header.source()).await?;
        let config = table.external_data_configuration.ok_or_else(|| {
            EntityError::invalid_metadata(
                self.header.fully_qualified_identity(),
                "external table has no connector configuration",
            )
        })?;
        self.external_data_configuration = ExternalConfigBlob::encode(&config).map_err(|e| {
            EntityError::invalid_metadata(self.header.fully_qualified_identity(), e.to_string())
        })?;
        self.schema_fields = table.schema;
        self.partition_config = table.partition;
        self.header.metadata.description = table.description;
        self.header.metadata.labels = table.labels;
        Ok(())
    }

    pub(crate) async fn restore(
        &self,
        warehouse: &dyn Warehouse,
        config: &RestoreConfig,
    ) -> Result<(), EntityError> {
        let connector = self.external_data_configuration.decode().map_err(|message| {
            EntityError::invalid_metadata(self.header.fully_qualified_identity(), message)
        })?;

        let target = self.header.target();
        if config.overwrite_existing {
            warehouse.delete_table(&target, true).await?;
        }

        let table = TableResource {
            reference: target,
            kind: TableKind::External,
            description: self.header.metadata.description.clone(),
            labels: self.header.restored_labels(config.attach_archive_ts_to_label),
            schema: self.schema_fields.clone(),
            partition: self.partition_config.clone(),
            external_data_configuration: Some(connector),
            ..Default::default()
        };
        warehouse.create_table(&table, false).await?;
        Ok(())
    }
}
