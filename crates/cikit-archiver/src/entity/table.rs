//! Managed tables: metadata plus a data export

use cikit_cloud::{
    ExtractRequest, LoadRequest, QueryRequest, TableIdentifier, UpdateField, Warehouse,
};
use cikit_core::{ArchiveConfig, Compression, DataFormat, PartitionConfig, RestoreConfig, SchemaField};
use serde::{Deserialize, Serialize};

use super::header::EntityHeader;
use crate::error::EntityError;

pub(crate) const TAG: &str = "table";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntity {
    #[serde(flatten)]
    pub header: EntityHeader,

    #[serde(default)]
    pub schema_fields: Vec<SchemaField>,

    #[serde(default)]
    pub data_archive_format: DataFormat,

    #[serde(default)]
    pub data_compression: Compression,

    #[serde(default)]
    pub partition_config: Option<PartitionConfig>,
}

impl TableEntity {
    pub fn new(header: EntityHeader) -> Self {
        Self {
            header,
            schema_fields: Vec::new(),
            data_archive_format: DataFormat::default(),
            data_compression: Compression::default(),
            partition_config: None,
        }
    }

    /// `{gcs_prefix}/table={identity}/data`
    pub fn data_path(&self) -> String {
        format!("{}/data", self.header.object_prefix(TAG))
    }

    /// Data path recorded at archive time, falling back to the computed one
    fn archived_data_path(&self) -> String {
        self.header
            .actual_archive_data_path
            .clone()
            .unwrap_or_else(|| self.data_path())
    }

    fn datetime_columns(&self) -> Vec<&str> {
        self.schema_fields
            .iter()
            .filter(|f| f.is_datetime())
            .map(|f| f.name.as_str())
            .collect()
    }

    /// AVRO exports carry DATETIME as strings, so such tables load through a stage
    pub fn needs_staging(&self) -> bool {
        self.data_archive_format == DataFormat::Avro && !self.datetime_columns().is_empty()
    }

    pub fn staging_table(&self) -> TableIdentifier {
        let target = self.header.target();
        TableIdentifier::new(
            target.project_id,
            target.dataset,
            format!(
                "temp_stg_load_{}_{}",
                self.header.identity(),
                self.header.archive_ts()
            ),
        )
    }

    /// Schema of the staging table: DATETIME columns become STRING
    fn staging_schema(&self) -> Vec<SchemaField> {
        self.schema_fields
            .iter()
            .cloned()
            .map(|mut field| {
                if field.is_datetime() {
                    field.field_type = "STRING".to_string();
                }
                field
            })
            .collect()
    }

    /// `CREATE OR REPLACE TABLE ... AS SELECT` casting staged strings back to DATETIME
    pub fn cast_statement(&self) -> String {
        let target = self.header.fully_qualified_identity();
        let stage = self.staging_table().fqn();
        let columns = self.datetime_columns();
        let casts = columns
            .iter()
            .map(|c| format!("CAST({c} AS DATETIME) AS {c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let partition = self
            .partition_config
            .as_ref()
            .and_then(|p| p.to_ddl_clause(&self.schema_fields))
            .map(|clause| format!(" {clause}"))
            .unwrap_or_default();

        format!(
            "CREATE OR REPLACE TABLE `{target}`{partition} AS SELECT * except({}), {casts} FROM `{stage}`",
            columns.join(",")
        )
    }

    pub(crate) async fn fetch(&mut self, warehouse: &dyn Warehouse) -> Result<(), EntityError> {
        let table = warehouse.get_table(&self.header.source()).await?;
        self.schema_fields = table.schema;
        self.partition_config = table.partition;
        self.header.metadata.description = table.description;
        self.header.metadata.labels = table.labels;
        Ok(())
    }

    /// Export the table data; runs to completion before the document is written
    pub(crate) async fn export(
        &mut self,
        warehouse: &dyn Warehouse,
        config: &ArchiveConfig,
    ) -> Result<(), EntityError> {
        let identity = self.header.identity().to_string();
        self.data_archive_format = config.format_for(&identity);
        self.data_compression = config.compression_for(&identity);

        let data_path = self.data_path();
        let request = ExtractRequest {
            job_id_prefix: self.header.job_id_prefix("archive"),
            source: self.header.source(),
            destination_uris: vec![format!("{data_path}/*")],
            format: self.data_archive_format,
            compression: self.data_compression,
            print_header: self.data_archive_format == DataFormat::Csv,
        };
        let job = warehouse.extract_table(&request).await?;
        tracing::debug!(table = %request.source, job_id = %job.job_id, "Table data exported");

        self.header.actual_archive_data_path = Some(data_path);
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

        let staged = self.needs_staging();
        let (destination, schema, partition) = if staged {
            (self.staging_table(), self.staging_schema(), None)
        } else {
            (
                target.clone(),
                self.schema_fields.clone(),
                self.partition_config.clone(),
            )
        };

        let request = LoadRequest {
            job_id_prefix: self.header.job_id_prefix("restore"),
            source_uris: vec![format!("{}/*", self.archived_data_path())],
            destination: destination.clone(),
            format: self.data_archive_format,
            schema,
            partition,
            description: self.header.metadata.description.clone(),
            skip_leading_rows: u32::from(self.data_archive_format == DataFormat::Csv),
        };
        warehouse.load_table_from_uri(&request).await?;

        if staged {
            tracing::debug!(stage = %destination, "Casting staged DATETIME columns");
            let statement = QueryRequest::new(self.cast_statement())
                .with_job_id_prefix(self.header.job_id_prefix("restore_cast"));
            warehouse.query(&statement).await?;
            warehouse.delete_table(&destination, true).await?;
        }

        let mut table = warehouse.get_table(&target).await?;
        table.labels = self.header.restored_labels(config.attach_archive_ts_to_label);
        table.description = self.header.metadata.description.clone();
        warehouse
            .update_table(&table, &[UpdateField::Labels, UpdateField::Description])
            .await?;
        Ok(())
    }
}
