//! Shared set-up for archive/restore integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use cikit_archiver::{ArchiveExecutor, Backends, DatasetEntity, FetchExecutor};
use cikit_cloud::{
    ArchiveStorage, DatasetIdentifier, DatasetResource, MockWarehouse, TableIdentifier,
    TableResource,
};
use cikit_core::{ArchiveConfig, PartitionConfig, RestoreConfig, SchemaField};

pub const ROOT: &str = "memory://archive";
pub const SOURCE_PROJECT: &str = "src";
pub const SOURCE_DATASET: &str = "sales";
pub const DEST_PROJECT: &str = "dst";
pub const DEST_DATASET: &str = "sales_copy";

pub fn archived_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 5).unwrap()
}

pub fn source(name: &str) -> TableIdentifier {
    TableIdentifier::new(SOURCE_PROJECT, SOURCE_DATASET, name)
}

pub fn dest(name: &str) -> TableIdentifier {
    TableIdentifier::new(DEST_PROJECT, DEST_DATASET, name)
}

pub fn dest_key(name: &str) -> String {
    dest(name).fqn()
}

/// Source dataset with `t1 (id INT64, ts DATETIME)` partitioned by day on `ts`
pub async fn source_warehouse() -> MockWarehouse {
    let warehouse = MockWarehouse::new();
    warehouse
        .add_dataset(
            DatasetResource::new(DatasetIdentifier::new(SOURCE_PROJECT, SOURCE_DATASET))
                .with_description("Sales data"),
        )
        .await;
    warehouse
        .add_table(
            TableResource::table(source("t1"))
                .with_schema(vec![
                    SchemaField::new("id", "INT64"),
                    SchemaField::new("ts", "DATETIME"),
                ])
                .with_partition(PartitionConfig::time("DAY", Some("ts".to_string())))
                .with_description("Events")
                .with_label("tier", "gold"),
        )
        .await;
    warehouse
}

pub async fn add_plain_table(warehouse: &MockWarehouse, name: &str) {
    warehouse
        .add_table(
            TableResource::table(source(name)).with_schema(vec![SchemaField::new("id", "INT64")]),
        )
        .await;
}

pub async fn add_view(warehouse: &MockWarehouse, name: &str, query: &str) {
    warehouse.add_table(TableResource::view(source(name), query)).await;
}

pub fn backends(warehouse: &MockWarehouse, storage: &ArchiveStorage) -> Backends {
    Backends::new(Arc::new(warehouse.clone()), storage.clone())
}

pub fn empty_dataset() -> DatasetEntity {
    DatasetEntity::new(SOURCE_PROJECT, SOURCE_DATASET, ROOT, archived_at())
}

/// Fetch the source dataset and archive it
pub async fn archive(
    warehouse: &MockWarehouse,
    storage: &ArchiveStorage,
    config: ArchiveConfig,
) -> DatasetEntity {
    let fetched = FetchExecutor::new(Arc::new(warehouse.clone()), &config)
        .execute(empty_dataset())
        .await
        .expect("fetch failed");
    ArchiveExecutor::new(backends(warehouse, storage), config)
        .execute(fetched)
        .await
        .expect("archive failed")
}

pub fn relocated(dataset: DatasetEntity) -> DatasetEntity {
    dataset.with_destination(DEST_PROJECT, DEST_DATASET)
}

pub fn restore_config(concurrency: usize, continue_on_failure: bool) -> RestoreConfig {
    RestoreConfig {
        concurrency,
        continue_on_failure,
        ..Default::default()
    }
}

/// Position of the first operation matching `method` and `target`
pub fn position(operations: &[cikit_cloud::Operation], method: &str, target: &str) -> Option<usize> {
    operations
        .iter()
        .position(|op| op.method == method && op.target == target)
}

/// Position of the last operation on `target`
pub fn last_touch(operations: &[cikit_cloud::Operation], target: &str) -> Option<usize> {
    operations.iter().rposition(|op| op.target == target)
}

/// Position of the first operation on `target`
pub fn first_touch(operations: &[cikit_cloud::Operation], target: &str) -> Option<usize> {
    operations.iter().position(|op| op.target == target)
}
