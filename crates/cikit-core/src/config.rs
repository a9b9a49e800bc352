//! Archive, restore and task-file configuration (cikit.toml)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Export/import file format for table data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataFormat {
    Avro,
    Parquet,
    Csv,
}

impl Default for DataFormat {
    fn default() -> Self {
        Self::Avro
    }
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avro => "AVRO",
            Self::Parquet => "PARQUET",
            Self::Csv => "CSV",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avro" => Ok(Self::Avro),
            "parquet" => Ok(Self::Parquet),
            "csv" => Ok(Self::Csv),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown data format '{other}' (expected avro, parquet or csv)"
            ))),
        }
    }
}

impl TryFrom<String> for DataFormat {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataFormat> for String {
    fn from(value: DataFormat) -> Self {
        value.as_str().to_string()
    }
}

/// Compression codec for exported table data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compression {
    Snappy,
    Deflate,
    Gzip,
    Zstd,
    None,
}

impl Default for Compression {
    fn default() -> Self {
        Self::Deflate
    }
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snappy => "SNAPPY",
            Self::Deflate => "DEFLATE",
            Self::Gzip => "GZIP",
            Self::Zstd => "ZSTD",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snappy" => Ok(Self::Snappy),
            "deflate" => Ok(Self::Deflate),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            "none" => Ok(Self::None),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown compression '{other}' (expected snappy, deflate, gzip, zstd or none)"
            ))),
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Compression> for String {
    fn from(value: Compression) -> Self {
        value.as_str().to_string()
    }
}

/// Settings for archiving one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Number of concurrent per-entity workers
    pub concurrency: usize,

    /// Record failed entities and keep going instead of stopping
    pub continue_on_failure: bool,

    pub table_data_archive_format: DataFormat,

    /// Per-table format overrides, keyed by table identity
    pub table_data_archive_format_mapping: BTreeMap<String, DataFormat>,

    pub table_data_archive_compression: Compression,

    /// Per-table compression overrides, keyed by table identity
    pub table_data_archive_compression_mapping: BTreeMap<String, Compression>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            continue_on_failure: false,
            table_data_archive_format: DataFormat::default(),
            table_data_archive_format_mapping: BTreeMap::new(),
            table_data_archive_compression: Compression::default(),
            table_data_archive_compression_mapping: BTreeMap::new(),
        }
    }
}

impl ArchiveConfig {
    /// Worker count, never less than one
    pub fn worker_count(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Data format for a table, honouring per-table overrides
    pub fn format_for(&self, identity: &str) -> DataFormat {
        self.table_data_archive_format_mapping
            .get(identity)
            .copied()
            .unwrap_or(self.table_data_archive_format)
    }

    /// Compression for a table, honouring per-table overrides
    pub fn compression_for(&self, identity: &str) -> Compression {
        self.table_data_archive_compression_mapping
            .get(identity)
            .copied()
            .unwrap_or(self.table_data_archive_compression)
    }
}

/// Settings for restoring one archived dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub concurrency: usize,

    pub continue_on_failure: bool,

    /// Drop destination objects before recreating them
    pub overwrite_existing: bool,

    /// Identities to leave untouched
    pub skip_restore: BTreeMap<String, bool>,

    /// Stamp restored objects with an `archive_ts` label
    pub attach_archive_ts_to_label: bool,

    /// Extra reference substitutions applied to SQL bodies
    pub replacement_mapping: BTreeMap<String, String>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            continue_on_failure: false,
            overwrite_existing: false,
            skip_restore: BTreeMap::new(),
            attach_archive_ts_to_label: true,
            replacement_mapping: BTreeMap::new(),
        }
    }
}

impl RestoreConfig {
    pub fn worker_count(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Whether `identity` is marked to be skipped
    pub fn should_skip(&self, identity: &str) -> bool {
        self.skip_restore.get(identity).copied().unwrap_or(false)
    }
}

/// Archive one dataset to object storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTask {
    #[serde(default)]
    pub name: Option<String>,

    pub source_project_id: String,

    pub source_dataset: String,

    /// Storage root, e.g. `gs://bucket/archives`
    pub destination_gcs_prefix: String,

    #[serde(flatten)]
    pub config: ArchiveConfig,
}

impl ArchiveTask {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("source_project_id", &self.source_project_id)?;
        require("source_dataset", &self.source_dataset)?;
        require("destination_gcs_prefix", &self.destination_gcs_prefix)
    }
}

/// Restore one archived dataset into a warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreTask {
    #[serde(default)]
    pub name: Option<String>,

    /// Dataset archive prefix, e.g. `gs://bucket/archives/dataset=d/archive_ts=20250101000000`
    pub source_archive: String,

    #[serde(default)]
    pub destination_project_id: Option<String>,

    #[serde(default)]
    pub destination_dataset: Option<String>,

    #[serde(flatten)]
    pub config: RestoreConfig,
}

impl RestoreTask {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("source_archive", &self.source_archive)?;
        match (&self.destination_project_id, &self.destination_dataset) {
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::InvalidValue(
                "destination_project_id and destination_dataset must be set together".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::InvalidValue(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// One entry of a task file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "lowercase")]
pub enum TaskConfig {
    Archive(ArchiveTask),
    Restore(RestoreTask),

    /// Task types this build does not handle
    #[serde(other)]
    Unsupported,
}

/// A list of archive/restore tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl TaskFile {
    /// Load tasks from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Load tasks from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let file: TaskFile =
            toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        for task in &file.tasks {
            match task {
                TaskConfig::Archive(task) => task.validate()?,
                TaskConfig::Restore(task) => task.validate()?,
                TaskConfig::Unsupported => {}
            }
        }
        Ok(file)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn archive_tasks(&self) -> impl Iterator<Item = &ArchiveTask> {
        self.tasks.iter().filter_map(|task| match task {
            TaskConfig::Archive(task) => Some(task),
            _ => None,
        })
    }

    pub fn restore_tasks(&self) -> impl Iterator<Item = &RestoreTask> {
        self.tasks.iter().filter_map(|task| match task {
            TaskConfig::Restore(task) => Some(task),
            _ => None,
        })
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
