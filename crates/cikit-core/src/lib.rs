//! cikit Core
//!
//! Shared data model for the CI toolkit: warehouse object metadata,
//! column schemas, partitioning, and the archive/restore task documents.
//! Field names here are persisted in archived documents - never rename them.

pub mod config;
pub mod document;
pub mod metadata;
pub mod schema;

pub use config::{
    ArchiveConfig, ArchiveTask, Compression, ConfigError, DataFormat, RestoreConfig, RestoreTask,
    TaskConfig, TaskFile,
};
pub use document::{decode_document, decode_value, DocumentError};
pub use metadata::BaseMetadata;
pub use schema::{PartitionCategory, PartitionConfig, SchemaField, DATETIME_TYPE};
