//! Test fixtures for warehouse integration tests
//!
//! Reusable schemas and a seeded mock dataset resembling a small sales mart.

use cikit_cloud::{
    DatasetIdentifier, DatasetResource, MockWarehouse, RoutineArgument, RoutineKind,
    RoutineResource, TableIdentifier, TableResource,
};
use cikit_core::{PartitionConfig, SchemaField};

pub const PROJECT: &str = "acme-analytics";
pub const DATASET: &str = "sales";

pub fn dataset_id() -> DatasetIdentifier {
    DatasetIdentifier::new(PROJECT, DATASET)
}

pub fn object_id(name: &str) -> TableIdentifier {
    dataset_id().object(name)
}

/// Orders table, partitioned by day on `created_at`
pub fn orders_schema() -> Vec<SchemaField> {
    vec![
        SchemaField::new("id", "INT64").with_mode("REQUIRED"),
        SchemaField::new("customer_id", "INT64").with_mode("REQUIRED"),
        SchemaField::new("total_amount", "NUMERIC"),
        SchemaField::new("status", "STRING"),
        SchemaField::new("created_at", "DATETIME").with_mode("REQUIRED"),
    ]
}

/// Customers table with a nested address record
pub fn customers_schema() -> Vec<SchemaField> {
    vec![
        SchemaField::new("id", "INT64").with_mode("REQUIRED"),
        SchemaField::new("email", "STRING"),
        SchemaField::new("address", "RECORD").with_fields(vec![
            SchemaField::new("city", "STRING"),
            SchemaField::new("zip", "STRING"),
        ]),
        SchemaField::new("signed_up", "TIMESTAMP"),
    ]
}

pub fn orders_table() -> TableResource {
    TableResource::table(object_id("orders"))
        .with_schema(orders_schema())
        .with_partition(PartitionConfig::time("DAY", Some("created_at".into())))
        .with_description("One row per order")
        .with_label("domain", "sales")
}

pub fn customers_table() -> TableResource {
    TableResource::table(object_id("customers"))
        .with_schema(customers_schema())
        .with_label("domain", "crm")
}

pub fn daily_revenue_view() -> TableResource {
    TableResource::view(
        object_id("daily_revenue"),
        format!(
            "SELECT DATE(created_at) AS day, SUM(total_amount) AS revenue FROM `{PROJECT}.{DATASET}.orders` GROUP BY 1"
        ),
    )
}

pub fn normalize_email_function() -> RoutineResource {
    RoutineResource {
        reference: object_id("normalize_email"),
        kind: RoutineKind::ScalarFunction,
        language: "SQL".into(),
        body: "LOWER(TRIM(email))".into(),
        arguments: vec![RoutineArgument::new("email", "STRING")],
        return_type: Some("STRING".into()),
        imported_libraries: Vec::new(),
        description: Some("Canonical email".into()),
    }
}

/// Mock warehouse holding the sales dataset with two tables, a view and a function
pub async fn seeded_warehouse() -> MockWarehouse {
    let warehouse = MockWarehouse::new();
    warehouse
        .add_dataset(DatasetResource::new(dataset_id()).with_description("Sales mart"))
        .await;
    warehouse.add_table(orders_table()).await;
    warehouse.add_table(customers_table()).await;
    warehouse.add_table(daily_revenue_view()).await;
    warehouse.add_routine(normalize_email_function()).await;
    warehouse
}
