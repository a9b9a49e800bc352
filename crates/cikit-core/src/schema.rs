//! Column schema and partitioning types
//!
//! These mirror the warehouse's own table description closely enough to
//! recreate a table from an archived document without consulting the source.

use serde::{Deserialize, Serialize};

/// SQL type name of naive (zone-less) datetime columns
pub const DATETIME_TYPE: &str = "DATETIME";

/// A single column in a table or view schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Column name
    pub name: String,

    /// Warehouse type name (INT64, STRING, DATETIME, RECORD, ...)
    #[serde(rename = "type")]
    pub field_type: String,

    /// NULLABLE, REQUIRED or REPEATED
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Column description
    #[serde(default)]
    pub description: Option<String>,

    /// Default value expression, if the column declares one
    #[serde(default)]
    pub default_value_expression: Option<String>,

    /// Nested fields for RECORD/STRUCT columns
    #[serde(default)]
    pub fields: Vec<SchemaField>,

    /// Whether the column accepts NULL
    #[serde(default = "default_true")]
    pub is_nullable: bool,
}

fn default_mode() -> String {
    "NULLABLE".to_string()
}

fn default_true() -> bool {
    true
}

impl SchemaField {
    /// Create a nullable column
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: default_mode(),
            description: None,
            default_value_expression: None,
            fields: Vec::new(),
            is_nullable: true,
        }
    }

    /// Set the column mode
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self.is_nullable = self.mode.eq_ignore_ascii_case("NULLABLE");
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach nested fields (for RECORD columns)
    pub fn with_fields(mut self, fields: Vec<SchemaField>) -> Self {
        self.fields = fields;
        self
    }

    /// Case-insensitive type comparison
    pub fn is_type(&self, type_name: &str) -> bool {
        self.field_type.eq_ignore_ascii_case(type_name)
    }

    pub fn is_datetime(&self) -> bool {
        self.is_type(DATETIME_TYPE)
    }
}

/// Which partitioning scheme a table uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionCategory {
    /// Partitioned by a date/time column or by ingestion time
    Time,

    /// Partitioned into integer ranges
    Range,
}

impl Default for PartitionCategory {
    fn default() -> Self {
        Self::Time
    }
}

/// Table partitioning
///
/// A time partition keeps `partition_type` (DAY, HOUR, MONTH, YEAR) and an
/// optional expiration. A range partition keeps `partition_range` as
/// `[start, end, interval]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default)]
    pub partition_category: PartitionCategory,

    #[serde(default)]
    pub partition_type: String,

    /// Partitioning column; `None` means ingestion-time partitioning
    #[serde(default)]
    pub partition_field: Option<String>,

    #[serde(default)]
    pub partition_expiration_ms: i64,

    #[serde(default)]
    pub partition_require_filter: bool,

    #[serde(default)]
    pub partition_range: Vec<i64>,
}

impl PartitionConfig {
    /// Time partitioning on `field` (or ingestion time when `None`)
    pub fn time(partition_type: impl Into<String>, field: Option<String>) -> Self {
        Self {
            partition_category: PartitionCategory::Time,
            partition_type: partition_type.into(),
            partition_field: field,
            partition_expiration_ms: 0,
            partition_require_filter: false,
            partition_range: Vec::new(),
        }
    }

    /// Integer range partitioning on `field`
    pub fn range(field: impl Into<String>, start: i64, end: i64, interval: i64) -> Self {
        Self {
            partition_category: PartitionCategory::Range,
            partition_type: String::new(),
            partition_field: Some(field.into()),
            partition_expiration_ms: 0,
            partition_require_filter: false,
            partition_range: vec![start, end, interval],
        }
    }

    pub fn with_expiration_ms(mut self, expiration_ms: i64) -> Self {
        self.partition_expiration_ms = expiration_ms;
        self
    }

    pub fn with_require_filter(mut self, require: bool) -> Self {
        self.partition_require_filter = require;
        self
    }

    /// `(start, end, interval)` of a well-formed range partition
    pub fn range_bounds(&self) -> Option<(i64, i64, i64)> {
        match (self.partition_category, self.partition_range.as_slice()) {
            (PartitionCategory::Range, [start, end, interval]) => Some((*start, *end, *interval)),
            _ => None,
        }
    }

    /// Expiration in milliseconds, when one is configured
    pub fn expiration(&self) -> Option<i64> {
        (self.partition_expiration_ms > 0).then_some(self.partition_expiration_ms)
    }

    /// Render the DDL `PARTITION BY` clause for this partitioning.
    ///
    /// `schema` is used to pick the truncation function matching the column
    /// type. Ingestion-time partitioning has no DDL form and yields `None`.
    pub fn to_ddl_clause(&self, schema: &[SchemaField]) -> Option<String> {
        let field = self.partition_field.as_deref()?;
        match self.partition_category {
            PartitionCategory::Range => {
                let (start, end, interval) = self.range_bounds()?;
                Some(format!(
                    "PARTITION BY RANGE_BUCKET({field}, GENERATE_ARRAY({start}, {end}, {interval}))"
                ))
            }
            PartitionCategory::Time => {
                let unit = if self.partition_type.is_empty() {
                    "DAY".to_string()
                } else {
                    self.partition_type.to_ascii_uppercase()
                };
                let column_type = schema
                    .iter()
                    .find(|f| f.name == field)
                    .map(|f| f.field_type.to_ascii_uppercase())
                    .unwrap_or_else(|| "DATE".to_string());
                let clause = match (column_type.as_str(), unit.as_str()) {
                    ("DATE", "DAY") => format!("PARTITION BY {field}"),
                    ("DATE", _) => format!("PARTITION BY DATE_TRUNC({field}, {unit})"),
                    ("TIMESTAMP", "DAY") => format!("PARTITION BY DATE({field})"),
                    ("TIMESTAMP", _) => format!("PARTITION BY TIMESTAMP_TRUNC({field}, {unit})"),
                    ("DATETIME", "DAY") => format!("PARTITION BY DATE({field})"),
                    _ => format!("PARTITION BY DATETIME_TRUNC({field}, {unit})"),
                };
                Some(clause)
            }
        }
    }
}
