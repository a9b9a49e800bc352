//! End-to-end archive and restore runs against the in-memory warehouse
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p cikit-archiver --test integration_tests
//! ```

mod fixtures;

use std::collections::BTreeMap;
use std::sync::Arc;

use cikit_archiver::{
    load_archived_dataset, ArchiveEntity, DatasetEntity, EntityError, ExecutorError,
    FetchExecutor, ListingItem, RestoreExecutor,
};
use cikit_cloud::{
    ArchiveStorage, MaterializedViewDefinition, MockWarehouse, RoutineArgument, RoutineKind, RoutineResource,
    TableKind, TableListItem, TableResource, WarehouseError,
};
use cikit_core::{ArchiveConfig, Compression, DataFormat, RestoreConfig};
use cikit_dag::DagError;
use fixtures::*;
use pretty_assertions::assert_eq;
use serde_json::json;

// =============================================================================
// Archive
// =============================================================================

#[tokio::test]
async fn test_archive_writes_documents_and_exports_table_data() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT * FROM t1").await;
    let storage = ArchiveStorage::in_memory(ROOT);

    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;

    let prefix = archived.archive_prefix();
    assert_eq!(
        prefix,
        "memory://archive/dataset=sales/archive_ts=20250301083005"
    );
    assert_eq!(
        storage.list(&prefix).await.unwrap(),
        vec![
            format!("{prefix}/dataset.json"),
            format!("{prefix}/tables/table=t1/table.json"),
            format!("{prefix}/views/view=v1/view.json"),
        ]
    );
    assert_eq!(
        warehouse.exported_uris().await,
        vec![format!("{prefix}/tables/table=t1/data/*")]
    );
    assert_eq!(warehouse.calls("extract_table").await, vec!["src.sales.t1"]);

    let table = &archived.tables[0];
    assert!(table.header.is_archived);
    assert_eq!(table.data_archive_format, DataFormat::Avro);
    assert_eq!(table.data_compression, Compression::Deflate);
    assert!(archived.header.is_archived);
    assert_eq!(archived.views[0].defining_query, "SELECT * FROM t1");
}

#[tokio::test]
async fn test_archive_then_load_round_trips_dataset() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT id FROM t1 WHERE id > 10").await;
    let storage = ArchiveStorage::in_memory(ROOT);

    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    let loaded = load_archived_dataset(&storage, &archived.archive_prefix())
        .await
        .unwrap();

    assert_eq!(loaded, archived);
    assert_eq!(loaded.tables[0].schema_fields.len(), 2);
    assert_eq!(loaded.tables[0].header.metadata.labels.get("tier").map(String::as_str), Some("gold"));
    assert_eq!(loaded.header.metadata.description.as_deref(), Some("Sales data"));
}

#[tokio::test]
async fn test_per_table_format_override() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let config = ArchiveConfig {
        table_data_archive_format_mapping: BTreeMap::from([("t2".to_string(), DataFormat::Csv)]),
        table_data_archive_compression_mapping: BTreeMap::from([(
            "t2".to_string(),
            Compression::Gzip,
        )]),
        ..Default::default()
    };

    let archived = archive(&warehouse, &storage, config).await;

    let formats: Vec<(String, DataFormat, Compression)> = archived
        .tables
        .iter()
        .map(|t| (t.header.identity().to_string(), t.data_archive_format, t.data_compression))
        .collect();
    assert_eq!(
        formats,
        vec![
            ("t1".to_string(), DataFormat::Avro, Compression::Deflate),
            ("t2".to_string(), DataFormat::Csv, Compression::Gzip),
        ]
    );
}

#[tokio::test]
async fn test_archive_concurrency_is_bounded() {
    let warehouse = MockWarehouse::new().with_latency(5);
    warehouse
        .add_dataset(cikit_cloud::DatasetResource::new(cikit_cloud::DatasetIdentifier::new(
            SOURCE_PROJECT,
            SOURCE_DATASET,
        )))
        .await;
    for i in 0..8 {
        add_plain_table(&warehouse, &format!("t{i}")).await;
    }
    let storage = ArchiveStorage::in_memory(ROOT);
    let config = ArchiveConfig {
        concurrency: 2,
        ..Default::default()
    };

    let archived = archive(&warehouse, &storage, config).await;

    assert_eq!(archived.tables.len(), 8);
    assert!(warehouse.peak_concurrency() <= 2);
    assert!(warehouse.peak_concurrency() >= 1);
}

#[tokio::test]
async fn test_archive_fail_fast_writes_no_dataset_document() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    warehouse
        .add_error_for(
            "extract_table",
            "src.sales.t2",
            WarehouseError::JobFailed {
                job_id: "archive_sales_t2".into(),
                message: "quota exceeded".into(),
            },
        )
        .await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let config = ArchiveConfig::default();

    let fetched = FetchExecutor::new(Arc::new(warehouse.clone()), &config)
        .execute(empty_dataset())
        .await
        .unwrap();
    let prefix = fetched.archive_prefix();
    let err = cikit_archiver::ArchiveExecutor::new(backends(&warehouse, &storage), config)
        .execute(fetched)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Stopped { ref entity, .. } if entity == "src.sales.t2"));
    assert!(!storage.exists(&format!("{prefix}/dataset.json")).await.unwrap());
}

#[tokio::test]
async fn test_archive_continue_on_failure_reports_all_failures() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    add_plain_table(&warehouse, "t3").await;
    for name in ["src.sales.t2", "src.sales.t3"] {
        warehouse
            .add_error_for("extract_table", name, WarehouseError::QueryError("boom".into()))
            .await;
    }
    let storage = ArchiveStorage::in_memory(ROOT);
    let config = ArchiveConfig {
        continue_on_failure: true,
        ..Default::default()
    };

    let fetched = FetchExecutor::new(Arc::new(warehouse.clone()), &config)
        .execute(empty_dataset())
        .await
        .unwrap();
    let err = cikit_archiver::ArchiveExecutor::new(backends(&warehouse, &storage), config)
        .execute(fetched)
        .await
        .unwrap_err();

    match err {
        ExecutorError::Failures(keys) => assert_eq!(keys, vec!["src.sales.t2", "src.sales.t3"]),
        other => panic!("unexpected error: {other}"),
    }
    // t1 was still archived
    assert_eq!(warehouse.calls("extract_table").await.len(), 3);
}

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn test_fetch_classifies_every_object_kind() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT * FROM t1").await;
    warehouse
        .add_table(TableResource {
            reference: source("mv1"),
            kind: TableKind::MaterializedView,
            materialized_view: Some(MaterializedViewDefinition {
                query: "SELECT id FROM src.sales.t1".into(),
                enable_refresh: true,
                refresh_interval_ms: 3_600_000,
            }),
            ..Default::default()
        })
        .await;
    warehouse
        .add_table(TableResource {
            reference: source("ext1"),
            kind: TableKind::External,
            external_data_configuration: Some(json!({
                "sourceFormat": "CSV",
                "sourceUris": ["gs://landing/ext1/*.csv"]
            })),
            ..Default::default()
        })
        .await;
    warehouse
        .add_table(TableResource {
            reference: source("snap1"),
            kind: TableKind::Snapshot,
            ..Default::default()
        })
        .await;
    warehouse
        .add_routine(RoutineResource {
            reference: source("double_it"),
            kind: RoutineKind::ScalarFunction,
            language: "SQL".into(),
            body: "x * 2".into(),
            arguments: vec![RoutineArgument::new("x", "INT64")],
            return_type: Some("INT64".into()),
            ..Default::default()
        })
        .await;
    warehouse
        .add_routine(RoutineResource {
            reference: source("refresh"),
            kind: RoutineKind::Procedure,
            language: "SQL".into(),
            body: "BEGIN SELECT * FROM src.sales.t1; END".into(),
            ..Default::default()
        })
        .await;

    let fetched = FetchExecutor::new(Arc::new(warehouse.clone()), &ArchiveConfig::default())
        .execute(empty_dataset())
        .await
        .unwrap();

    assert_eq!(fetched.tables.len(), 1);
    assert_eq!(fetched.views.len(), 1);
    assert_eq!(fetched.materialized_views.len(), 1);
    assert_eq!(fetched.materialized_views[0].refresh_interval_seconds, 3600);
    assert_eq!(fetched.external_tables.len(), 1);
    assert_eq!(fetched.user_defined_functions.len(), 1);
    assert_eq!(fetched.stored_procedures.len(), 1);
    // The snapshot is not archived
    assert_eq!(fetched.child_count(), 6);
}

#[tokio::test]
async fn test_fetch_drops_objects_that_vanish_after_listing() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    warehouse
        .add_error_for("get_table", "src.sales.t2", WarehouseError::NotFound("Table src.sales.t2".into()))
        .await;

    let fetched = FetchExecutor::new(Arc::new(warehouse.clone()), &ArchiveConfig::default())
        .execute(empty_dataset())
        .await
        .unwrap();

    let names: Vec<&str> = fetched.tables.iter().map(|t| t.header.identity()).collect();
    assert_eq!(names, vec!["t1"]);
}

#[tokio::test]
async fn test_fetch_aborts_on_permission_error() {
    let warehouse = source_warehouse().await;
    warehouse
        .add_error_for(
            "get_table",
            "src.sales.t1",
            WarehouseError::PermissionDenied("Access Denied: Table src:sales.t1".into()),
        )
        .await;

    let err = FetchExecutor::new(Arc::new(warehouse.clone()), &ArchiveConfig::default())
        .execute(empty_dataset())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutorError::Stopped {
            source: EntityError::PermissionDenied(_),
            ..
        }
    ));
}

// =============================================================================
// Restore
// =============================================================================

#[tokio::test]
async fn test_restore_into_new_project_casts_datetime_through_stage() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT * FROM t1").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    warehouse.clear_operations().await;

    let loaded = load_archived_dataset(&storage, &archived.archive_prefix())
        .await
        .unwrap();
    let restored = RestoreExecutor::new(backends(&warehouse, &storage), RestoreConfig::default())
        .execute(relocated(loaded))
        .await
        .unwrap();
    assert_eq!(restored.child_count(), 2);

    let table = warehouse.table(&dest("t1")).await.expect("t1 restored");
    let types: Vec<&str> = table.schema.iter().map(|f| f.field_type.as_str()).collect();
    assert_eq!(types, vec!["INT64", "DATETIME"]);
    assert_eq!(table.labels.get("archive_ts").map(String::as_str), Some("20250301083005"));
    assert_eq!(table.labels.get("tier").map(String::as_str), Some("gold"));
    assert_eq!(table.description.as_deref(), Some("Events"));

    let queries = warehouse.calls("query").await;
    assert_eq!(queries.len(), 1);
    assert!(queries[0].starts_with("CREATE OR REPLACE TABLE `dst.sales_copy.t1` PARTITION BY DATE(ts)"));
    assert!(queries[0].contains("CAST(ts AS DATETIME) AS ts"));
    assert!(queries[0].ends_with("FROM `dst.sales_copy.temp_stg_load_t1_20250301083005`"));
    assert!(!warehouse
        .table_names()
        .await
        .iter()
        .any(|name| name.contains("temp_stg_load")));

    // v1 is created only after t1 has been fully restored
    let operations = warehouse.operations().await;
    let t1_done = last_touch(&operations, &dest_key("t1")).unwrap();
    let v1_start = first_touch(&operations, &dest_key("v1")).unwrap();
    assert!(t1_done < v1_start);
    assert!(position(&operations, "create_dataset", "dst.sales_copy").unwrap() < t1_done);
}

#[tokio::test]
async fn test_restore_without_datetime_skips_stage() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    warehouse.clear_operations().await;

    let config = RestoreConfig {
        skip_restore: BTreeMap::from([("t1".to_string(), true)]),
        ..Default::default()
    };
    RestoreExecutor::new(backends(&warehouse, &storage), config)
        .execute(relocated(archived))
        .await
        .unwrap();

    assert!(warehouse.calls("query").await.is_empty());
    assert_eq!(warehouse.calls("load_table_from_uri").await, vec![dest_key("t2")]);
}

#[tokio::test]
async fn test_skip_restore_never_contacts_warehouse_for_entity() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    warehouse.clear_operations().await;

    let config = RestoreConfig {
        skip_restore: BTreeMap::from([("t2".to_string(), true)]),
        ..Default::default()
    };
    RestoreExecutor::new(backends(&warehouse, &storage), config)
        .execute(relocated(archived))
        .await
        .unwrap();

    let operations = warehouse.operations().await;
    assert!(operations.iter().all(|op| !op.target.ends_with(".t2")));
    assert!(warehouse.has_table(&dest("t1")).await);
    assert!(!warehouse.has_table(&dest("t2")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_view_chain_restores_in_dependency_order() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT * FROM t1").await;
    add_view(&warehouse, "v2", "SELECT id FROM v1").await;
    add_view(&warehouse, "v3", "SELECT a.id FROM v2 a JOIN v1 b ON a.id = b.id").await;
    add_view(&warehouse, "v_other", "SELECT 1 AS one FROM t1").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;

    let warehouse = warehouse.with_latency(5);
    warehouse.clear_operations().await;
    RestoreExecutor::new(backends(&warehouse, &storage), restore_config(4, false))
        .execute(relocated(archived))
        .await
        .unwrap();

    let operations = warehouse.operations().await;
    let done = |name: &str| last_touch(&operations, &dest_key(name)).unwrap();
    let start = |name: &str| first_touch(&operations, &dest_key(name)).unwrap();
    assert!(done("t1") < start("v1"));
    assert!(done("v1") < start("v2"));
    assert!(done("v2") < start("v3"));
    assert!(done("t1") < start("v_other"));
    assert!(warehouse.peak_concurrency() <= 4);
}

#[tokio::test]
async fn test_restore_fail_fast_stops_before_views() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    add_view(&warehouse, "v1", "SELECT * FROM t2").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    warehouse
        .add_error_for(
            "load_table_from_uri",
            &dest_key("t2"),
            WarehouseError::QueryError("boom".into()),
        )
        .await;

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(1, false))
        .execute(relocated(archived))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Stopped { ref entity, .. } if *entity == dest_key("t2")));
    assert!(!warehouse.has_table(&dest("v1")).await);
}

#[tokio::test]
async fn test_restore_continue_on_failure_finishes_remaining_work() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    add_view(&warehouse, "v1", "SELECT * FROM t1").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    warehouse
        .add_error_for(
            "load_table_from_uri",
            &dest_key("t2"),
            WarehouseError::QueryError("boom".into()),
        )
        .await;

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(2, true))
        .execute(relocated(archived))
        .await
        .unwrap_err();

    match err {
        ExecutorError::Failures(keys) => assert_eq!(keys, vec![dest_key("t2")]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(warehouse.has_table(&dest("t1")).await);
    assert!(warehouse.has_table(&dest("v1")).await);
}

#[tokio::test]
async fn test_views_behind_a_failed_view_are_reported_blocked() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT * FROM t1").await;
    add_view(&warehouse, "v2", "SELECT * FROM v1").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    warehouse
        .add_error_for(
            "create_table",
            &dest_key("v1"),
            WarehouseError::QueryError("boom".into()),
        )
        .await;
    warehouse.clear_operations().await;

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(2, true))
        .execute(relocated(archived))
        .await
        .unwrap_err();

    match err {
        ExecutorError::Failures(keys) => assert_eq!(keys, vec![dest_key("v1"), dest_key("v2")]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(warehouse.calls("create_table").await.iter().all(|t| *t != dest_key("v2")));
}

#[tokio::test]
async fn test_entity_version_mismatch_fails_only_that_entity() {
    let warehouse = source_warehouse().await;
    add_plain_table(&warehouse, "t2").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let mut archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    archived.tables[1].header.metadata_version = "v0".into();
    warehouse.clear_operations().await;

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(1, true))
        .execute(relocated(archived))
        .await
        .unwrap_err();

    match err {
        ExecutorError::Failures(keys) => assert_eq!(keys, vec![dest_key("t2")]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(warehouse.has_table(&dest("t1")).await);
    assert!(warehouse.operations().await.iter().all(|op| !op.target.ends_with(".t2")));
}

#[tokio::test]
async fn test_dataset_version_mismatch_is_fatal() {
    let warehouse = source_warehouse().await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let mut archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    archived.header.metadata_version = "v2".into();
    warehouse.clear_operations().await;

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(1, true))
        .execute(relocated(archived))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutorError::Entity(EntityError::VersionIncompatible { .. })
    ));
    assert_eq!(warehouse.operation_count().await, 0);
}

#[tokio::test]
async fn test_restore_with_overwrite_is_idempotent() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT * FROM t1").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    let config = RestoreConfig {
        overwrite_existing: true,
        ..Default::default()
    };
    let executor = RestoreExecutor::new(backends(&warehouse, &storage), config);

    executor.execute(relocated(archived.clone())).await.unwrap();
    let first = (
        warehouse.table(&dest("t1")).await,
        warehouse.table(&dest("v1")).await,
    );
    executor.execute(relocated(archived)).await.unwrap();
    let second = (
        warehouse.table(&dest("t1")).await,
        warehouse.table(&dest("v1")).await,
    );

    assert!(first.0.is_some() && first.1.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cyclic_views_are_fatal() {
    let warehouse = MockWarehouse::new();
    let storage = ArchiveStorage::in_memory(ROOT);
    let mut dataset = empty_dataset();
    for (name, query) in [("va", "SELECT * FROM vb"), ("vb", "SELECT * FROM va")] {
        let item = ListingItem::Table(TableListItem {
            reference: source(name),
            kind: TableKind::View,
            labels: BTreeMap::new(),
        });
        let mut entity = dataset.generate_archived_entity_from_listing(&item).unwrap();
        if let ArchiveEntity::View(view) = &mut entity {
            view.defining_query = query.to_string();
        }
        dataset.add_child(entity);
    }

    let err = RestoreExecutor::new(backends(&warehouse, &storage), RestoreConfig::default())
        .execute(relocated(dataset))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Dag(DagError::CycleDetected { .. })));
    assert!(warehouse.calls("create_table").await.is_empty());
}

#[tokio::test]
async fn test_unparseable_view_is_a_controlled_failure() {
    let warehouse = source_warehouse().await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let mut dataset = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    let item = ListingItem::Table(TableListItem {
        reference: source("broken"),
        kind: TableKind::View,
        labels: BTreeMap::new(),
    });
    let mut entity = dataset.generate_archived_entity_from_listing(&item).unwrap();
    if let ArchiveEntity::View(view) = &mut entity {
        view.defining_query = "SELEC * FORM".into();
    }
    dataset.add_child(entity);

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(1, true))
        .execute(relocated(dataset))
        .await
        .unwrap_err();

    match err {
        ExecutorError::Failures(keys) => assert_eq!(keys, vec![dest_key("broken")]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(warehouse.has_table(&dest("t1")).await);
}

/// Archive `broken <- child <- grandchild`, then corrupt `broken`'s SQL
async fn archive_with_unparseable_root(warehouse: &MockWarehouse, storage: &ArchiveStorage) -> DatasetEntity {
    add_view(warehouse, "broken", "SELECT * FROM t1").await;
    add_view(warehouse, "child", "SELECT * FROM broken").await;
    add_view(warehouse, "grandchild", "SELECT id FROM child").await;
    let mut dataset = archive(warehouse, storage, ArchiveConfig::default()).await;
    for mut entity in dataset.take_children() {
        if let ArchiveEntity::View(view) = &mut entity {
            if view.header.identity() == "broken" {
                view.defining_query = "SELEC * FORM".into();
            }
        }
        dataset.add_child(entity);
    }
    warehouse.clear_operations().await;
    dataset
}

#[tokio::test]
async fn test_views_behind_an_unparseable_view_are_blocked() {
    let warehouse = source_warehouse().await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let dataset = archive_with_unparseable_root(&warehouse, &storage).await;

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(2, true))
        .execute(relocated(dataset))
        .await
        .unwrap_err();

    match err {
        ExecutorError::Failures(keys) => assert_eq!(
            keys,
            vec![dest_key("broken"), dest_key("child"), dest_key("grandchild")]
        ),
        other => panic!("unexpected error: {other}"),
    }
    assert!(warehouse.has_table(&dest("t1")).await);
    assert!(!warehouse.has_table(&dest("child")).await);
    assert!(!warehouse.has_table(&dest("grandchild")).await);
    let created = warehouse.calls("create_table").await;
    assert!(created.iter().all(|t| *t != dest_key("child") && *t != dest_key("grandchild")));
}

#[tokio::test]
async fn test_unparseable_view_stops_fail_fast_restore() {
    let warehouse = source_warehouse().await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let dataset = archive_with_unparseable_root(&warehouse, &storage).await;

    let err = RestoreExecutor::new(backends(&warehouse, &storage), restore_config(2, false))
        .execute(relocated(dataset))
        .await
        .unwrap_err();

    assert!(
        matches!(err, ExecutorError::Stopped { ref entity, source: EntityError::Parse { .. } } if *entity == dest_key("broken")),
        "unexpected error: {err}"
    );
    assert!(!warehouse.has_table(&dest("child")).await);
}

#[tokio::test]
async fn test_relocated_restore_rewrites_sql_bodies() {
    let warehouse = source_warehouse().await;
    warehouse
        .add_table(TableResource {
            reference: source("mv1"),
            kind: TableKind::MaterializedView,
            materialized_view: Some(MaterializedViewDefinition {
                query: "SELECT id FROM src.sales.t1".into(),
                enable_refresh: true,
                refresh_interval_ms: 1_800_000,
            }),
            ..Default::default()
        })
        .await;
    warehouse
        .add_table(TableResource {
            reference: source("ext1"),
            kind: TableKind::External,
            external_data_configuration: Some(json!({
                "sourceFormat": "CSV",
                "sourceUris": ["gs://landing/ext1/*.csv"]
            })),
            ..Default::default()
        })
        .await;
    warehouse
        .add_routine(RoutineResource {
            reference: source("double_it"),
            kind: RoutineKind::ScalarFunction,
            language: "SQL".into(),
            body: "x * 2".into(),
            arguments: vec![RoutineArgument::new("x", "INT64")],
            return_type: Some("INT64".into()),
            description: Some("Doubles".into()),
            ..Default::default()
        })
        .await;
    warehouse
        .add_routine(RoutineResource {
            reference: source("refresh"),
            kind: RoutineKind::Procedure,
            language: "SQL".into(),
            body: "BEGIN SELECT * FROM src.sales.t1; END".into(),
            ..Default::default()
        })
        .await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;

    RestoreExecutor::new(backends(&warehouse, &storage), restore_config(2, false))
        .execute(relocated(archived))
        .await
        .unwrap();

    let procedure = warehouse.routine(&dest("refresh")).await.unwrap();
    assert_eq!(procedure.body, "BEGIN SELECT * FROM dst.sales_copy.t1; END");

    let function = warehouse.routine(&dest("double_it")).await.unwrap();
    assert_eq!(function.body, "x * 2");
    assert_eq!(function.return_type.as_deref(), Some("INT64"));
    assert_eq!(function.description.as_deref(), Some("Doubles"));

    let mview = warehouse.table(&dest("mv1")).await.unwrap();
    let definition = mview.materialized_view.unwrap();
    assert!(definition.query.contains("dst.sales_copy.t1"));
    assert!(definition.enable_refresh);
    assert_eq!(definition.refresh_interval_ms, 1_800_000);

    let external = warehouse.table(&dest("ext1")).await.unwrap();
    assert_eq!(external.kind, TableKind::External);
    assert_eq!(
        external.external_data_configuration,
        Some(json!({"sourceFormat": "CSV", "sourceUris": ["gs://landing/ext1/*.csv"]}))
    );
}

#[tokio::test]
async fn test_restore_in_place_keeps_queries() {
    let warehouse = source_warehouse().await;
    add_view(&warehouse, "v1", "SELECT * FROM src.sales.t1").await;
    let storage = ArchiveStorage::in_memory(ROOT);
    let archived = archive(&warehouse, &storage, ArchiveConfig::default()).await;
    let config = RestoreConfig {
        overwrite_existing: true,
        attach_archive_ts_to_label: false,
        ..Default::default()
    };

    let restored: DatasetEntity = RestoreExecutor::new(backends(&warehouse, &storage), config)
        .execute(archived)
        .await
        .unwrap();

    assert_eq!(restored.views[0].defining_query, "SELECT * FROM src.sales.t1");
    let table = warehouse.table(&source("t1")).await.unwrap();
    assert!(!table.labels.contains_key("archive_ts"));
}
