//! cikit archiver - dataset archive and restore
//!
//! This crate implements the archive/restore engine:
//! - Entity model for every archivable warehouse object
//! - Fetch executor (enumerate a live dataset)
//! - Archive executor (metadata documents plus table data exports)
//! - Restore executor (independent objects first, then views in dependency order)

pub mod entity;
pub mod error;
pub mod executor;

pub use entity::{
    ArchiveEntity, Backends, DatasetEntity, EntityHeader, ExternalConfigBlob,
    ExternalTableEntity, ListingItem, MaterializedViewEntity, RestoreStatus, RoutineEntity,
    TableEntity, ViewEntity, ARCHIVER_VERSION, ARCHIVE_TS_LABEL, SUPPORTED_METADATA_VERSION,
};
pub use error::{EntityError, ExecutorError};
pub use executor::{
    load_archived_dataset, ArchiveExecutor, FetchExecutor, RestoreExecutor, TaskLabel,
    TaskOutcome, TaskPool, TaskReport,
};
