//! BigQuery REST JSON encoding of warehouse resources
//!
//! `gcp-bigquery-client` models serialize to exactly these shapes, so the
//! adapter converts through `serde_json::Value`. INT64 fields travel as
//! strings in REST and are accepted either way when reading.

use cikit_core::{Compression, DataFormat, PartitionCategory, PartitionConfig, SchemaField};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;

use crate::adapter::{DatasetIdentifier, TableIdentifier, WarehouseError};
use crate::resources::{
    DatasetResource, ExtractRequest, JobResult, LoadRequest, MaterializedViewDefinition,
    QueryRequest, RoutineArgument, RoutineKind, RoutineListItem, RoutineResource, TableKind,
    TableListItem, TableResource,
};

fn int64(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// `key` of `value`, treating JSON null as absent
fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

fn string(value: &Value, key: &str) -> Option<String> {
    field(value, key).and_then(Value::as_str).map(str::to_string)
}

fn required(value: &Value, key: &str, kind: &str) -> Result<String, WarehouseError> {
    string(value, key)
        .ok_or_else(|| WarehouseError::InvalidResponse(format!("{kind} without {key}")))
}

fn labels(value: &Value) -> BTreeMap<String, String> {
    field(value, "labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::String(value.clone()));
    }
}

pub fn dataset_reference(dataset: &DatasetIdentifier) -> Value {
    json!({"projectId": dataset.project_id, "datasetId": dataset.dataset})
}

pub fn table_reference(table: &TableIdentifier) -> Value {
    json!({"projectId": table.project_id, "datasetId": table.dataset, "tableId": table.name})
}

pub fn routine_reference(routine: &TableIdentifier) -> Value {
    json!({"projectId": routine.project_id, "datasetId": routine.dataset, "routineId": routine.name})
}

fn parse_reference(value: Option<&Value>, name_key: &str, kind: &str) -> Result<TableIdentifier, WarehouseError> {
    let reference =
        value.ok_or_else(|| WarehouseError::InvalidResponse(format!("{kind} without reference")))?;
    Ok(TableIdentifier::new(
        required(reference, "projectId", kind)?,
        required(reference, "datasetId", kind)?,
        required(reference, name_key, kind)?,
    ))
}

pub fn dataset_to_rest(dataset: &DatasetResource) -> Value {
    let mut map = Map::new();
    map.insert("datasetReference".into(), dataset_reference(&dataset.reference));
    insert_opt(&mut map, "description", dataset.description.as_ref());
    insert_opt(&mut map, "location", dataset.location.as_ref());
    map.insert("labels".into(), json!(dataset.labels));
    Value::Object(map)
}

pub fn dataset_from_rest(value: &Value) -> Result<DatasetResource, WarehouseError> {
    let reference = field(value, "datasetReference")
        .ok_or_else(|| WarehouseError::InvalidResponse("dataset without reference".into()))?;
    Ok(DatasetResource {
        reference: DatasetIdentifier::new(
            required(reference, "projectId", "dataset")?,
            required(reference, "datasetId", "dataset")?,
        ),
        description: string(value, "description"),
        labels: labels(value),
        location: string(value, "location"),
    })
}

pub fn schema_to_rest(fields: &[SchemaField]) -> Value {
    Value::Array(
        fields
            .iter()
            .map(|field| {
                let mut map = Map::new();
                map.insert("name".into(), json!(field.name));
                map.insert("type".into(), json!(field.field_type));
                map.insert("mode".into(), json!(field.mode));
                insert_opt(&mut map, "description", field.description.as_ref());
                insert_opt(
                    &mut map,
                    "defaultValueExpression",
                    field.default_value_expression.as_ref(),
                );
                if !field.fields.is_empty() {
                    map.insert("fields".into(), schema_to_rest(&field.fields));
                }
                Value::Object(map)
            })
            .collect(),
    )
}

pub fn schema_from_rest(fields: &Value) -> Vec<SchemaField> {
    fields
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .map(|f| {
                    let mode = string(f, "mode").unwrap_or_else(|| "NULLABLE".to_string());
                    SchemaField {
                        name: string(f, "name").unwrap_or_default(),
                        field_type: string(f, "type").unwrap_or_default(),
                        is_nullable: mode.eq_ignore_ascii_case("NULLABLE"),
                        mode,
                        description: string(f, "description"),
                        default_value_expression: string(f, "defaultValueExpression"),
                        fields: field(f, "fields").map(schema_from_rest).unwrap_or_default(),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// REST key and body for a partitioning
pub fn partition_to_rest(partition: &PartitionConfig) -> (&'static str, Value) {
    match partition.partition_category {
        PartitionCategory::Time => {
            let mut map = Map::new();
            let kind = if partition.partition_type.is_empty() {
                "DAY".to_string()
            } else {
                partition.partition_type.clone()
            };
            map.insert("type".into(), json!(kind));
            insert_opt(&mut map, "field", partition.partition_field.as_ref());
            if let Some(expiration) = partition.expiration() {
                map.insert("expirationMs".into(), json!(expiration.to_string()));
            }
            map.insert(
                "requirePartitionFilter".into(),
                json!(partition.partition_require_filter),
            );
            ("timePartitioning", Value::Object(map))
        }
        PartitionCategory::Range => {
            let (start, end, interval) = partition.range_bounds().unwrap_or((0, 0, 1));
            (
                "rangePartitioning",
                json!({
                    "field": partition.partition_field,
                    "range": {
                        "start": start.to_string(),
                        "end": end.to_string(),
                        "interval": interval.to_string(),
                    }
                }),
            )
        }
    }
}

pub fn partition_from_rest(table: &Value) -> Option<PartitionConfig> {
    if let Some(time) = field(table, "timePartitioning") {
        let partition = PartitionConfig::time(
            string(time, "type").unwrap_or_else(|| "DAY".to_string()),
            string(time, "field"),
        )
        .with_expiration_ms(field(time, "expirationMs").and_then(int64).unwrap_or(0))
        .with_require_filter(
            field(time, "requirePartitionFilter")
                .and_then(Value::as_bool)
                .or_else(|| field(table, "requirePartitionFilter").and_then(Value::as_bool))
                .unwrap_or(false),
        );
        return Some(partition);
    }

    let range = field(table, "rangePartitioning")?;
    let bounds = field(range, "range")?;
    Some(PartitionConfig::range(
        string(range, "field").unwrap_or_default(),
        field(bounds, "start").and_then(int64).unwrap_or(0),
        field(bounds, "end").and_then(int64).unwrap_or(0),
        field(bounds, "interval").and_then(int64).unwrap_or(1),
    ))
}

pub fn table_to_rest(table: &TableResource) -> Value {
    let mut map = Map::new();
    map.insert("tableReference".into(), table_reference(&table.reference));
    insert_opt(&mut map, "description", table.description.as_ref());
    map.insert("labels".into(), json!(table.labels));
    if !table.schema.is_empty() {
        map.insert("schema".into(), json!({"fields": schema_to_rest(&table.schema)}));
    }
    if let Some(partition) = &table.partition {
        let (key, value) = partition_to_rest(partition);
        map.insert(key.into(), value);
    }
    if let Some(query) = &table.view_query {
        map.insert("view".into(), json!({"query": query, "useLegacySql": false}));
    }
    if let Some(mview) = &table.materialized_view {
        map.insert(
            "materializedView".into(),
            json!({
                "query": mview.query,
                "enableRefresh": mview.enable_refresh,
                "refreshIntervalMs": mview.refresh_interval_ms.to_string(),
            }),
        );
    }
    if let Some(external) = &table.external_data_configuration {
        map.insert("externalDataConfiguration".into(), external.clone());
    }
    Value::Object(map)
}

pub fn table_from_rest(value: &Value) -> Result<TableResource, WarehouseError> {
    let reference = parse_reference(field(value, "tableReference"), "tableId", "table")?;
    let materialized_view = field(value, "materializedView").map(|m| MaterializedViewDefinition {
        query: string(m, "query").unwrap_or_default(),
        enable_refresh: field(m, "enableRefresh").and_then(Value::as_bool).unwrap_or(true),
        refresh_interval_ms: field(m, "refreshIntervalMs")
            .and_then(int64)
            .unwrap_or(1_800_000),
    });

    Ok(TableResource {
        reference,
        kind: TableKind::from_api(&string(value, "type").unwrap_or_else(|| "TABLE".into())),
        description: string(value, "description"),
        labels: labels(value),
        schema: field(value, "schema")
            .and_then(|s| field(s, "fields"))
            .map(schema_from_rest)
            .unwrap_or_default(),
        partition: partition_from_rest(value),
        view_query: field(value, "view").and_then(|v| string(v, "query")),
        materialized_view,
        external_data_configuration: field(value, "externalDataConfiguration").cloned(),
    })
}

/// Items of one listing page plus the next page token
pub fn table_list_from_rest(value: &Value) -> Result<(Vec<TableListItem>, Option<String>), WarehouseError> {
    let mut items = Vec::new();
    for table in field(value, "tables").and_then(Value::as_array).into_iter().flatten() {
        items.push(TableListItem {
            reference: parse_reference(field(table, "tableReference"), "tableId", "table")?,
            kind: TableKind::from_api(&string(table, "type").unwrap_or_else(|| "TABLE".into())),
            labels: labels(table),
        });
    }
    Ok((items, string(value, "nextPageToken")))
}

/// Spell a REST `StandardSqlDataType` as SQL
pub fn sql_type_from_rest(value: &Value) -> String {
    let kind = string(value, "typeKind").unwrap_or_else(|| "ANY TYPE".to_string());
    match kind.as_str() {
        "ARRAY" => format!(
            "ARRAY<{}>",
            field(value, "arrayElementType")
                .map(sql_type_from_rest)
                .unwrap_or_default()
        ),
        "STRUCT" => {
            let fields: Vec<String> = field(value, "structType")
                .and_then(|s| field(s, "fields"))
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|f| {
                    let name = string(f, "name").unwrap_or_default();
                    let ty = field(f, "type").map(sql_type_from_rest).unwrap_or_default();
                    format!("{name} {ty}")
                })
                .collect();
            format!("STRUCT<{}>", fields.join(", "))
        }
        _ => kind,
    }
}

/// Split on commas that are not nested inside `<...>`
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Encode a SQL type as a REST `StandardSqlDataType`
pub fn sql_type_to_rest(sql_type: &str) -> Value {
    let trimmed = sql_type.trim();
    let upper = trimmed.to_ascii_uppercase();

    if upper.starts_with("ARRAY<") && trimmed.ends_with('>') {
        let inner = &trimmed[6..trimmed.len() - 1];
        return json!({"typeKind": "ARRAY", "arrayElementType": sql_type_to_rest(inner)});
    }

    if upper.starts_with("STRUCT<") && trimmed.ends_with('>') {
        let inner = &trimmed[7..trimmed.len() - 1];
        let fields: Vec<Value> = split_top_level(inner)
            .into_iter()
            .map(|field| match field.split_once(char::is_whitespace) {
                Some((name, ty)) => json!({"name": name, "type": sql_type_to_rest(ty)}),
                None => json!({"type": sql_type_to_rest(field)}),
            })
            .collect();
        return json!({"typeKind": "STRUCT", "structType": {"fields": fields}});
    }

    // Parameterised scalars (NUMERIC(10, 2), STRING(20)) keep only the kind
    let kind = upper.split('(').next().unwrap_or(&upper).trim().to_string();
    json!({"typeKind": kind})
}

pub fn routine_to_rest(routine: &RoutineResource) -> Value {
    let mut map = Map::new();
    map.insert("routineReference".into(), routine_reference(&routine.reference));
    map.insert("routineType".into(), json!(routine.kind.as_str()));
    if !routine.language.is_empty() {
        map.insert("language".into(), json!(routine.language));
    }
    map.insert("definitionBody".into(), json!(routine.body));
    map.insert(
        "arguments".into(),
        Value::Array(
            routine
                .arguments
                .iter()
                .map(|arg| json!({"name": arg.name, "dataType": sql_type_to_rest(&arg.data_type)}))
                .collect(),
        ),
    );
    if let Some(return_type) = &routine.return_type {
        map.insert("returnType".into(), sql_type_to_rest(return_type));
    }
    if !routine.imported_libraries.is_empty() {
        map.insert("importedLibraries".into(), json!(routine.imported_libraries));
    }
    insert_opt(&mut map, "description", routine.description.as_ref());
    Value::Object(map)
}

pub fn routine_from_rest(value: &Value) -> Result<RoutineResource, WarehouseError> {
    let reference = parse_reference(field(value, "routineReference"), "routineId", "routine")?;
    let arguments = field(value, "arguments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|arg| {
            RoutineArgument::new(
                string(arg, "name").unwrap_or_default(),
                field(arg, "dataType").map(sql_type_from_rest).unwrap_or_default(),
            )
        })
        .collect();

    Ok(RoutineResource {
        reference,
        kind: RoutineKind::from_api(&string(value, "routineType").unwrap_or_default()),
        language: string(value, "language").unwrap_or_else(|| "SQL".to_string()),
        body: string(value, "definitionBody").unwrap_or_default(),
        arguments,
        return_type: field(value, "returnType").map(sql_type_from_rest),
        imported_libraries: field(value, "importedLibraries")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        description: string(value, "description"),
    })
}

pub fn routine_list_from_rest(value: &Value) -> Result<(Vec<RoutineListItem>, Option<String>), WarehouseError> {
    let mut items = Vec::new();
    for routine in field(value, "routines").and_then(Value::as_array).into_iter().flatten() {
        items.push(RoutineListItem {
            reference: parse_reference(field(routine, "routineReference"), "routineId", "routine")?,
            kind: RoutineKind::from_api(&string(routine, "routineType").unwrap_or_default()),
        });
    }
    Ok((items, string(value, "nextPageToken")))
}

fn format_name(format: DataFormat) -> &'static str {
    format.as_str()
}

fn compression_name(compression: Compression) -> Option<&'static str> {
    match compression {
        Compression::None => None,
        other => Some(other.as_str()),
    }
}

pub fn extract_job(project_id: &str, job_id: &str, request: &ExtractRequest) -> Value {
    let mut extract = Map::new();
    extract.insert("sourceTable".into(), table_reference(&request.source));
    extract.insert("destinationUris".into(), json!(request.destination_uris));
    extract.insert("destinationFormat".into(), json!(format_name(request.format)));
    if let Some(compression) = compression_name(request.compression) {
        extract.insert("compression".into(), json!(compression));
    }
    if request.format == DataFormat::Csv {
        extract.insert("printHeader".into(), json!(request.print_header));
    }
    if request.format == DataFormat::Avro {
        extract.insert("useAvroLogicalTypes".into(), json!(true));
    }

    json!({
        "jobReference": {"projectId": project_id, "jobId": job_id},
        "configuration": {"extract": Value::Object(extract)},
    })
}

pub fn load_job(project_id: &str, job_id: &str, request: &LoadRequest) -> Value {
    let mut load = Map::new();
    load.insert("sourceUris".into(), json!(request.source_uris));
    load.insert("destinationTable".into(), table_reference(&request.destination));
    load.insert("sourceFormat".into(), json!(format_name(request.format)));
    if !request.schema.is_empty() {
        load.insert("schema".into(), json!({"fields": schema_to_rest(&request.schema)}));
    }
    if let Some(partition) = &request.partition {
        let (key, value) = partition_to_rest(partition);
        load.insert(key.into(), value);
    }
    if let Some(description) = &request.description {
        load.insert(
            "destinationTableProperties".into(),
            json!({"description": description}),
        );
    }
    if request.format == DataFormat::Csv {
        load.insert("skipLeadingRows".into(), json!(request.skip_leading_rows));
    }
    if request.format == DataFormat::Avro {
        load.insert("useAvroLogicalTypes".into(), json!(true));
    }

    json!({
        "jobReference": {"projectId": project_id, "jobId": job_id},
        "configuration": {"load": Value::Object(load)},
    })
}

pub fn query_job(project_id: &str, job_id: &str, request: &QueryRequest) -> Value {
    json!({
        "jobReference": {"projectId": project_id, "jobId": job_id},
        "configuration": {"query": {"query": request.sql, "useLegacySql": false}},
    })
}

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique job id starting with `prefix`
pub fn job_id(prefix: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let n = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{nanos}_{n}")
}

/// `Some` once the job is done, an error if it finished with one
pub fn job_outcome(job: &Value) -> Result<Option<JobResult>, WarehouseError> {
    let job_id = field(job, "jobReference")
        .and_then(|r| string(r, "jobId"))
        .unwrap_or_default();
    let status = field(job, "status");
    let state = status.and_then(|s| string(s, "state")).unwrap_or_default();
    if state != "DONE" {
        return Ok(None);
    }
    if let Some(error) = status.and_then(|s| field(s, "errorResult")) {
        let message = string(error, "message").unwrap_or_else(|| error.to_string());
        let reason = string(error, "reason").unwrap_or_default();
        return Err(match reason.as_str() {
            "notFound" => WarehouseError::NotFound(message),
            "accessDenied" => WarehouseError::PermissionDenied(message),
            "duplicate" => WarehouseError::AlreadyExists(message),
            _ => WarehouseError::JobFailed { job_id, message },
        });
    }
    Ok(Some(JobResult { job_id, state }))
}

/// Job location reported by the service, needed to poll non-US jobs
pub fn job_location(job: &Value) -> Option<String> {
    field(job, "jobReference").and_then(|r| string(r, "location"))
}
