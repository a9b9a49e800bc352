//! Integration tests for warehouse and storage collaborators
//!
//! Tests requiring actual BigQuery credentials are marked with `#[ignore]`
//! and can be run with `cargo test -- --ignored`.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all non-ignored tests (no credentials required)
//! cargo test -p cikit-cloud --test integration_tests
//!
//! # Run BigQuery integration tests
//! GOOGLE_APPLICATION_CREDENTIALS=/path/to/key.json \
//! CIKIT_BIGQUERY_PROJECT=my-project \
//! CIKIT_BIGQUERY_DATASET=my_dataset \
//! cargo test -p cikit-cloud --features bigquery --test integration_tests -- --ignored
//! ```

mod fixtures;

use cikit_cloud::{
    ArchiveStorage, DatasetResource, ExtractRequest, LoadRequest, MockWarehouse, QueryRequest,
    StorageError, TableKind, TableResource, UpdateField, Warehouse, WarehouseError,
};
use cikit_core::{Compression, DataFormat};
use fixtures::*;
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

/// Check if BigQuery credentials are available
fn has_bigquery_credentials() -> bool {
    std::env::var("GOOGLE_APPLICATION_CREDENTIALS").is_ok()
        || std::env::var("CIKIT_BIGQUERY_PROJECT").is_ok()
}

fn extract_request(table: &str, uri: &str) -> ExtractRequest {
    ExtractRequest {
        job_id_prefix: format!("archive_{DATASET}_{table}_20250101000000"),
        source: object_id(table),
        destination_uris: vec![uri.to_string()],
        format: DataFormat::Avro,
        compression: Compression::Deflate,
        print_header: false,
    }
}

// =============================================================================
// Mock Warehouse Tests (No credentials required)
// =============================================================================

#[tokio::test]
async fn test_mock_listing_workflow() {
    let warehouse = seeded_warehouse().await;

    let tables = warehouse.list_tables(&dataset_id()).await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.reference.name.as_str()).collect();
    assert_eq!(names, vec!["customers", "daily_revenue", "orders"]);
    assert_eq!(tables[1].kind, TableKind::View);
    assert_eq!(tables[0].labels.get("domain").map(String::as_str), Some("crm"));

    let routines = warehouse.list_routines(&dataset_id()).await.unwrap();
    assert_eq!(routines.len(), 1);
    assert_eq!(routines[0].reference.name, "normalize_email");

    let orders = warehouse.get_table(&object_id("orders")).await.unwrap();
    assert_eq!(orders, orders_table());
}

#[tokio::test]
async fn test_mock_listing_unknown_dataset() {
    let warehouse = MockWarehouse::new();
    let result = warehouse.list_tables(&dataset_id()).await;
    assert!(matches!(result, Err(WarehouseError::NotFound(_))));
}

#[tokio::test]
async fn test_mock_dataset_recreate() {
    let warehouse = seeded_warehouse().await;

    warehouse.delete_dataset(&dataset_id(), true, false).await.unwrap();
    assert!(warehouse.table_names().await.is_empty());
    assert!(warehouse.routine(&object_id("normalize_email")).await.is_none());

    let dataset = DatasetResource::new(dataset_id()).with_description("restored");
    warehouse.create_dataset(&dataset, false).await.unwrap();
    let again = warehouse.create_dataset(&dataset, false).await;
    assert!(matches!(again, Err(WarehouseError::AlreadyExists(_))));
    assert!(warehouse.create_dataset(&dataset, true).await.is_ok());
}

#[tokio::test]
async fn test_mock_update_dataset_fields() {
    let warehouse = seeded_warehouse().await;

    let mut labels = std::collections::BTreeMap::new();
    labels.insert("archive_ts".to_string(), "20250101000000".to_string());
    let update = DatasetResource::new(dataset_id())
        .with_description("Restored sales mart")
        .with_labels(labels);
    let updated = warehouse
        .update_dataset(&update, &[UpdateField::Description, UpdateField::Labels])
        .await
        .unwrap();

    assert_eq!(updated.description.as_deref(), Some("Restored sales mart"));
    assert_eq!(
        updated.labels.get("archive_ts").map(String::as_str),
        Some("20250101000000")
    );
}

#[tokio::test]
async fn test_mock_export_and_reload() {
    let warehouse = seeded_warehouse().await;
    let uri = "gs://archive/sales/tables/table=orders/data/*";

    warehouse
        .extract_table(&extract_request("orders", uri))
        .await
        .unwrap();
    assert_eq!(warehouse.exported_uris().await, vec![uri.to_string()]);

    let load = LoadRequest {
        job_id_prefix: "restore_sales_orders".into(),
        source_uris: vec![uri.to_string()],
        destination: object_id("orders_copy"),
        format: DataFormat::Avro,
        schema: Vec::new(),
        partition: None,
        description: Some("copy".into()),
        skip_leading_rows: 0,
    };
    let job = warehouse.load_table_from_uri(&load).await.unwrap();
    assert!(job.job_id.starts_with("restore_sales_orders"));

    let copy = warehouse.table(&object_id("orders_copy")).await.unwrap();
    assert_eq!(copy.schema, orders_schema());
    assert_eq!(copy.description.as_deref(), Some("copy"));
}

#[tokio::test]
async fn test_mock_query_unrecognised_statement() {
    let warehouse = seeded_warehouse().await;
    let job = warehouse
        .query(&QueryRequest::new("SELECT 1").with_job_id_prefix("probe"))
        .await
        .unwrap();
    assert_eq!(job.state, "DONE");
    assert_eq!(warehouse.calls("query").await, vec!["SELECT 1".to_string()]);
}

#[tokio::test]
async fn test_mock_custom_error() {
    let warehouse = seeded_warehouse().await;
    warehouse
        .add_error(
            object_id("orders").fqn(),
            WarehouseError::PermissionDenied("Access denied to orders".to_string()),
        )
        .await;

    let result = warehouse.get_table(&object_id("orders")).await;
    assert!(matches!(result, Err(WarehouseError::PermissionDenied(_))));

    warehouse.clear_errors().await;
    assert!(warehouse.get_table(&object_id("orders")).await.is_ok());
}

#[tokio::test]
async fn test_mock_latency_simulation() {
    let warehouse = MockWarehouse::new().with_latency(50);
    warehouse.add_dataset(DatasetResource::new(dataset_id())).await;

    let start = std::time::Instant::now();
    let _ = warehouse.get_dataset(&dataset_id()).await;
    let elapsed = start.elapsed();

    assert!(elapsed.as_millis() >= 50, "Expected at least 50ms latency");
}

#[tokio::test]
async fn test_mock_clone_shares_state() {
    let warehouse = seeded_warehouse().await;
    let cloned = warehouse.clone();

    cloned
        .create_table(&TableResource::table(object_id("events")), false)
        .await
        .unwrap();

    assert!(warehouse.has_table(&object_id("events")).await);
    assert_eq!(warehouse.calls("create_table").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_access() {
    let warehouse: Arc<dyn Warehouse> = Arc::new(seeded_warehouse().await);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let warehouse = Arc::clone(&warehouse);
        handles.push(tokio::spawn(async move {
            warehouse.get_table(&object_id("orders")).await
        }));
    }

    for handle in handles {
        let table = handle.await.unwrap().unwrap();
        assert_eq!(table.schema.len(), 5);
    }
}

// =============================================================================
// Archive Storage Tests
// =============================================================================

#[tokio::test]
async fn test_storage_documents() {
    let storage = ArchiveStorage::in_memory("gs://archive");
    let prefix = "gs://archive/dataset=sales/archive_ts=20250101000000";

    storage
        .write_json(&format!("{prefix}/dataset.json"), &serde_json::json!({"identity": "sales"}))
        .await
        .unwrap();
    storage
        .write_json(
            &format!("{prefix}/tables/table=orders/table.json"),
            &serde_json::json!({"identity": "orders"}),
        )
        .await
        .unwrap();

    let listed = storage.list(prefix).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].ends_with("dataset.json"));

    let doc: serde_json::Value = storage
        .read_json(&format!("{prefix}/tables/table=orders/table.json"))
        .await
        .unwrap();
    assert_eq!(doc["identity"], "orders");
}

#[tokio::test]
async fn test_storage_rejects_foreign_bucket() {
    let storage = ArchiveStorage::in_memory("gs://archive");
    let result = storage.write_bytes("gs://elsewhere/doc.json", Vec::new()).await;
    assert!(matches!(result, Err(StorageError::OutsideRoot { .. })));
}

#[tokio::test]
async fn test_storage_malformed_json() {
    let storage = ArchiveStorage::in_memory("gs://archive");
    storage
        .write_bytes("gs://archive/broken.json", b"{not json".to_vec())
        .await
        .unwrap();
    let result: Result<serde_json::Value, _> = storage.read_json("gs://archive/broken.json").await;
    assert!(matches!(result, Err(StorageError::Serialization { .. })));
}

// =============================================================================
// BigQuery Integration Tests (require credentials)
// =============================================================================

#[tokio::test]
#[ignore] // Run with: cargo test --features bigquery -- --ignored
async fn test_bigquery_list_dataset() {
    if !has_bigquery_credentials() {
        eprintln!("Skipping BigQuery test: no credentials available");
        eprintln!("Set GOOGLE_APPLICATION_CREDENTIALS or CIKIT_BIGQUERY_PROJECT");
        return;
    }

    #[cfg(feature = "bigquery")]
    {
        use cikit_cloud::{BigQueryWarehouse, DatasetIdentifier};

        let project_id = std::env::var("CIKIT_BIGQUERY_PROJECT")
            .or_else(|_| std::env::var("GCP_PROJECT"))
            .expect("CIKIT_BIGQUERY_PROJECT or GCP_PROJECT must be set");
        let dataset = std::env::var("CIKIT_BIGQUERY_DATASET")
            .expect("CIKIT_BIGQUERY_DATASET must be set");

        let warehouse = BigQueryWarehouse::with_adc(&project_id)
            .await
            .expect("Failed to create BigQuery warehouse");

        let dataset = DatasetIdentifier::new(&project_id, &dataset);
        warehouse.get_dataset(&dataset).await.expect("Dataset lookup failed");
        let tables = warehouse.list_tables(&dataset).await.expect("Listing failed");
        for table in &tables {
            let resource = warehouse.get_table(&table.reference).await.expect("get_table failed");
            println!("  {} ({}, {} columns)", table.reference, table.kind.as_str(), resource.schema.len());
        }
    }

    #[cfg(not(feature = "bigquery"))]
    {
        eprintln!("BigQuery feature not enabled. Rebuild with --features bigquery");
    }
}
