//! Warehouse resources exchanged through [`crate::Warehouse`]
//!
//! Shapes follow the BigQuery REST resources, trimmed to what archiving and
//! restoring need.

use cikit_core::{Compression, DataFormat, PartitionConfig, SchemaField};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::adapter::{DatasetIdentifier, TableIdentifier};

/// Fields an update call may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateField {
    Description,
    Labels,
    Schema,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetResource {
    pub reference: DatasetIdentifier,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub location: Option<String>,
}

impl DatasetResource {
    pub fn new(reference: DatasetIdentifier) -> Self {
        Self {
            reference,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// The `type` of a table resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TableKind {
    #[default]
    Table,
    View,
    MaterializedView,
    External,
    Snapshot,
    Other(String),
}

impl TableKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::MaterializedView => "MATERIALIZED_VIEW",
            Self::External => "EXTERNAL",
            Self::Snapshot => "SNAPSHOT",
            Self::Other(other) => other,
        }
    }

    pub fn from_api(value: &str) -> Self {
        match value {
            "TABLE" => Self::Table,
            "VIEW" => Self::View,
            "MATERIALIZED_VIEW" => Self::MaterializedView,
            "EXTERNAL" => Self::External,
            "SNAPSHOT" => Self::Snapshot,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Materialized view definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedViewDefinition {
    pub query: String,
    pub enable_refresh: bool,
    pub refresh_interval_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableResource {
    pub reference: TableIdentifier,
    pub kind: TableKind,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub schema: Vec<SchemaField>,
    pub partition: Option<PartitionConfig>,

    /// Standard SQL query of a view
    pub view_query: Option<String>,

    pub materialized_view: Option<MaterializedViewDefinition>,

    /// REST `externalDataConfiguration`, passed through as-is
    pub external_data_configuration: Option<Value>,
}

impl TableResource {
    /// A native table
    pub fn table(reference: TableIdentifier) -> Self {
        Self {
            reference,
            ..Default::default()
        }
    }

    /// A logical view over `query`
    pub fn view(reference: TableIdentifier, query: impl Into<String>) -> Self {
        Self {
            reference,
            kind: TableKind::View,
            view_query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: Vec<SchemaField>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_partition(mut self, partition: PartitionConfig) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// One entry of a table listing
#[derive(Debug, Clone, PartialEq)]
pub struct TableListItem {
    pub reference: TableIdentifier,
    pub kind: TableKind,
    pub labels: BTreeMap<String, String>,
}

/// The `routineType` of a routine resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RoutineKind {
    #[default]
    ScalarFunction,
    Procedure,
    TableValuedFunction,
    AggregateFunction,
    Other(String),
}

impl RoutineKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ScalarFunction => "SCALAR_FUNCTION",
            Self::Procedure => "PROCEDURE",
            Self::TableValuedFunction => "TABLE_VALUED_FUNCTION",
            Self::AggregateFunction => "AGGREGATE_FUNCTION",
            Self::Other(other) => other,
        }
    }

    pub fn from_api(value: &str) -> Self {
        match value {
            "SCALAR_FUNCTION" => Self::ScalarFunction,
            "PROCEDURE" => Self::Procedure,
            "TABLE_VALUED_FUNCTION" => Self::TableValuedFunction,
            "AGGREGATE_FUNCTION" => Self::AggregateFunction,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A routine argument with its SQL type spelled out (`INT64`, `ARRAY<STRING>`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineArgument {
    pub name: String,
    pub data_type: String,
}

impl RoutineArgument {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoutineResource {
    pub reference: TableIdentifier,
    pub kind: RoutineKind,

    /// SQL, JAVASCRIPT or PYTHON
    pub language: String,

    pub body: String,
    pub arguments: Vec<RoutineArgument>,
    pub return_type: Option<String>,
    pub imported_libraries: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutineListItem {
    pub reference: TableIdentifier,
    pub kind: RoutineKind,
}

/// Export of one table to object storage
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub job_id_prefix: String,
    pub source: TableIdentifier,
    pub destination_uris: Vec<String>,
    pub format: DataFormat,
    pub compression: Compression,

    /// Write a header row (CSV only)
    pub print_header: bool,
}

/// Import of object storage files into one table
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub job_id_prefix: String,
    pub source_uris: Vec<String>,
    pub destination: TableIdentifier,
    pub format: DataFormat,

    /// Explicit schema; empty lets the warehouse take it from the files
    pub schema: Vec<SchemaField>,

    pub partition: Option<PartitionConfig>,
    pub description: Option<String>,

    /// Header rows to skip (CSV only)
    pub skip_leading_rows: u32,
}

/// A statement run as a query job
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub job_id_prefix: Option<String>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            job_id_prefix: None,
        }
    }

    pub fn with_job_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_id_prefix = Some(prefix.into());
        self
    }
}

/// A finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: String,
    pub state: String,
}

impl JobResult {
    pub fn done(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: "DONE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_kind_roundtrip() {
        for kind in ["TABLE", "VIEW", "MATERIALIZED_VIEW", "EXTERNAL", "SNAPSHOT", "CLONE"] {
            assert_eq!(TableKind::from_api(kind).as_str(), kind);
        }
        assert_eq!(TableKind::from_api("CLONE"), TableKind::Other("CLONE".into()));
    }

    #[test]
    fn routine_kind_roundtrip() {
        assert_eq!(RoutineKind::from_api("PROCEDURE"), RoutineKind::Procedure);
        assert_eq!(RoutineKind::from_api("SCALAR_FUNCTION").as_str(), "SCALAR_FUNCTION");
    }

    #[test]
    fn view_builder() {
        let view = TableResource::view(TableIdentifier::new("p", "d", "v"), "SELECT 1");
        assert_eq!(view.kind, TableKind::View);
        assert_eq!(view.view_query.as_deref(), Some("SELECT 1"));
    }
}
