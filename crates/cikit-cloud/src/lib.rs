//! Cloud collaborators for the archiver
//!
//! This crate provides:
//! - The [`Warehouse`] trait covering dataset, table, routine and job calls
//! - REST-shaped resources exchanged through that trait
//! - [`BigQueryWarehouse`], backed by `gcp-bigquery-client`
//! - [`MockWarehouse`], an in-memory warehouse for tests and dry runs
//! - [`ArchiveStorage`], object storage for archived documents and data
//!
//! ## Features
//!
//! - `bigquery` - Google BigQuery support
//!
//! ## Example
//!
//! ```rust,ignore
//! use cikit_cloud::{BigQueryWarehouse, TableIdentifier, Warehouse};
//!
//! let warehouse = BigQueryWarehouse::with_adc("my-project").await?;
//! let table = warehouse.get_table(&TableIdentifier::new("my-project", "sales", "orders")).await?;
//! ```

pub mod adapter;
pub mod bigquery;
pub mod mock;
pub mod resources;
pub mod rest;
pub mod storage;

pub use adapter::{DatasetIdentifier, TableIdentifier, Warehouse, WarehouseError};
pub use bigquery::BigQueryWarehouse;
pub use mock::{MockWarehouse, Operation};
pub use resources::{
    DatasetResource, ExtractRequest, JobResult, LoadRequest, MaterializedViewDefinition,
    QueryRequest, RoutineArgument, RoutineKind, RoutineListItem, RoutineResource, TableKind,
    TableListItem, TableResource, UpdateField,
};
pub use storage::{ArchiveStorage, StorageError};
