//! Mock warehouse for testing
//!
//! Keeps datasets, tables and routines in memory and records every call, so
//! archive and restore runs can be checked without credentials. It also:
//! - Simulates per-call latency and tracks peak concurrency
//! - Returns injected errors for a target (optionally for one method only)
//! - Interprets the DDL statements the archiver issues (CTAS, materialized
//!   views, functions and procedures)
//! - Remembers exported URIs so loads can only read what was exported
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cikit_cloud::{MockWarehouse, TableIdentifier, TableResource, Warehouse};
//!
//! let warehouse = MockWarehouse::new().with_latency(10);
//! warehouse.add_dataset(DatasetResource::new(DatasetIdentifier::new("p", "d"))).await;
//! warehouse.add_table(TableResource::table(TableIdentifier::new("p", "d", "t"))).await;
//!
//! let table = warehouse.get_table(&TableIdentifier::new("p", "d", "t")).await?;
//! assert_eq!(warehouse.calls("get_table").await, vec!["p.d.t"]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use cikit_core::{SchemaField, DATETIME_TYPE};
use regex::Regex;
use tokio::sync::RwLock;

use crate::adapter::{DatasetIdentifier, TableIdentifier, Warehouse, WarehouseError};
use crate::resources::{
    DatasetResource, ExtractRequest, JobResult, LoadRequest, MaterializedViewDefinition,
    QueryRequest, RoutineArgument, RoutineKind, RoutineListItem, RoutineResource, TableKind,
    TableListItem, TableResource, UpdateField,
};

/// One recorded warehouse call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Trait method name, e.g. `create_table`
    pub method: &'static str,

    /// Fully qualified target (dataset, table or routine; the SQL for queries)
    pub target: String,
}

#[derive(Default)]
struct MockState {
    datasets: BTreeMap<String, DatasetResource>,
    tables: BTreeMap<String, TableResource>,
    routines: BTreeMap<String, RoutineResource>,

    /// Exported URI -> schema of the table at export time
    exports: HashMap<String, Vec<SchemaField>>,

    /// `method:target` or `*:target` -> error to return
    errors: HashMap<String, WarehouseError>,

    operations: Vec<Operation>,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    jobs: AtomicU64,
}

/// In-memory [`Warehouse`]
///
/// Clones share state, so a test can hand one clone to an executor and
/// inspect the other afterwards.
#[derive(Clone)]
pub struct MockWarehouse {
    state: Arc<RwLock<MockState>>,
    counters: Arc<Counters>,
    latency_ms: u64,
    warehouse_name: &'static str,
}

/// Decrements the in-flight counter when a call finishes
struct CallGuard {
    counters: Arc<Counters>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            counters: Arc::new(Counters::default()),
            latency_ms: 0,
            warehouse_name: "Mock",
        }
    }

    /// Delay every call by `latency_ms`
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set a custom warehouse name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.warehouse_name = name;
        self
    }

    pub async fn add_dataset(&self, dataset: DatasetResource) {
        self.state
            .write()
            .await
            .datasets
            .insert(dataset.reference.fqn(), dataset);
    }

    pub async fn add_table(&self, table: TableResource) {
        self.state
            .write()
            .await
            .tables
            .insert(table.reference.fqn(), table);
    }

    pub async fn add_routine(&self, routine: RoutineResource) {
        self.state
            .write()
            .await
            .routines
            .insert(routine.reference.fqn(), routine);
    }

    /// Pretend `uri` holds data exported from a table with `schema`
    pub async fn add_export(&self, uri: impl Into<String>, schema: Vec<SchemaField>) {
        self.state.write().await.exports.insert(uri.into(), schema);
    }

    /// Fail every call on `target` (a dataset or object FQN)
    pub async fn add_error(&self, target: impl AsRef<str>, error: WarehouseError) {
        self.state
            .write()
            .await
            .errors
            .insert(format!("*:{}", target.as_ref()), error);
    }

    /// Fail only `method` calls on `target`
    pub async fn add_error_for(&self, method: &str, target: impl AsRef<str>, error: WarehouseError) {
        self.state
            .write()
            .await
            .errors
            .insert(format!("{method}:{}", target.as_ref()), error);
    }

    pub async fn clear_errors(&self) {
        self.state.write().await.errors.clear();
    }

    pub async fn dataset(&self, dataset: &DatasetIdentifier) -> Option<DatasetResource> {
        self.state.read().await.datasets.get(&dataset.fqn()).cloned()
    }

    pub async fn table(&self, table: &TableIdentifier) -> Option<TableResource> {
        self.state.read().await.tables.get(&table.fqn()).cloned()
    }

    pub async fn routine(&self, routine: &TableIdentifier) -> Option<RoutineResource> {
        self.state.read().await.routines.get(&routine.fqn()).cloned()
    }

    pub async fn has_table(&self, table: &TableIdentifier) -> bool {
        self.state.read().await.tables.contains_key(&table.fqn())
    }

    /// FQNs of every table-like object, sorted
    pub async fn table_names(&self) -> Vec<String> {
        self.state.read().await.tables.keys().cloned().collect()
    }

    pub async fn exported_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.state.read().await.exports.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Every call made so far, in order
    pub async fn operations(&self) -> Vec<Operation> {
        self.state.read().await.operations.clone()
    }

    pub async fn operation_count(&self) -> usize {
        self.state.read().await.operations.len()
    }

    /// Targets of every `method` call, in order
    pub async fn calls(&self, method: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .operations
            .iter()
            .filter(|op| op.method == method)
            .map(|op| op.target.clone())
            .collect()
    }

    pub async fn clear_operations(&self) {
        self.state.write().await.operations.clear();
    }

    /// Highest number of calls that were in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Record the call, fail it if an error was injected, then wait out the latency
    async fn enter(&self, method: &'static str, target: &str) -> Result<CallGuard, WarehouseError> {
        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(in_flight, Ordering::SeqCst);
        let guard = CallGuard {
            counters: Arc::clone(&self.counters),
        };

        {
            let mut state = self.state.write().await;
            state.operations.push(Operation {
                method,
                target: target.to_string(),
            });
            let injected = state
                .errors
                .get(&format!("{method}:{target}"))
                .or_else(|| state.errors.get(&format!("*:{target}")));
            if let Some(error) = injected {
                return Err(error.clone());
            }
        }

        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
        Ok(guard)
    }

    fn next_job_id(&self, prefix: Option<&str>) -> String {
        let n = self.counters.jobs.fetch_add(1, Ordering::SeqCst);
        format!("{}_{n}", prefix.unwrap_or("job"))
    }
}

impl Default for MockWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

fn require_dataset(state: &MockState, dataset: &DatasetIdentifier) -> Result<(), WarehouseError> {
    if state.datasets.contains_key(&dataset.fqn()) {
        Ok(())
    } else {
        Err(WarehouseError::NotFound(format!("Dataset {dataset}")))
    }
}

fn objects_in<'a, V>(map: &'a BTreeMap<String, V>, dataset: &DatasetIdentifier) -> Vec<&'a String> {
    let prefix = format!("{}.", dataset.fqn());
    map.keys().filter(|k| k.starts_with(&prefix)).collect()
}

/// Index of the parenthesis closing the one at `open`
fn closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_arguments(args: &str) -> Vec<RoutineArgument> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut push = |piece: &str| {
        if let Some((name, ty)) = piece.trim().split_once(char::is_whitespace) {
            out.push(RoutineArgument::new(name.trim(), ty.trim()));
        }
    };
    for (i, c) in args.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push(&args[start..]);
    out
}

/// Statements the mock understands
enum Ddl {
    CreateTableAsSelect {
        target: String,
        replace: bool,
        source: String,
        datetime_columns: Vec<String>,
    },
    CreateMaterializedView {
        target: String,
        definition: MaterializedViewDefinition,
    },
    CreateRoutine {
        replace: bool,
        routine: RoutineResource,
    },
    Other,
}

fn parse_ddl(sql: &str) -> Result<Ddl, WarehouseError> {
    let ctas = Regex::new(
        r"(?is)^\s*CREATE\s+(OR\s+REPLACE\s+)?TABLE\s+`([^`]+)`.*?\bAS\s+SELECT\s+(.*?)\s+FROM\s+`([^`]+)`\s*;?\s*$",
    )
    .map_err(|e| WarehouseError::QueryError(e.to_string()))?;
    if let Some(caps) = ctas.captures(sql) {
        let cast = Regex::new(r"(?i)CAST\(\s*`?(\w+)`?\s+AS\s+DATETIME\s*\)")
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?;
        return Ok(Ddl::CreateTableAsSelect {
            target: caps[2].to_string(),
            replace: caps.get(1).is_some(),
            source: caps[4].to_string(),
            datetime_columns: cast.captures_iter(&caps[3]).map(|c| c[1].to_string()).collect(),
        });
    }

    let mview = Regex::new(
        r"(?is)^\s*CREATE\s+MATERIALIZED\s+VIEW\s+`?([^`\s]+)`?\s+OPTIONS\s*\((.*?)\)\s+AS\s+\((.*)\)\s*;?\s*$",
    )
    .map_err(|e| WarehouseError::QueryError(e.to_string()))?;
    if let Some(caps) = mview.captures(sql) {
        let options = &caps[2];
        let refresh = Regex::new(r"(?i)enable_refresh\s*=\s*(true|false)")
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?;
        let interval = Regex::new(r"(?i)refresh_interval_minutes\s*=\s*(\d+)")
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?;
        return Ok(Ddl::CreateMaterializedView {
            target: caps[1].to_string(),
            definition: MaterializedViewDefinition {
                query: caps[3].trim().to_string(),
                enable_refresh: refresh
                    .captures(options)
                    .map(|c| c[1].eq_ignore_ascii_case("true"))
                    .unwrap_or(true),
                refresh_interval_ms: interval
                    .captures(options)
                    .and_then(|c| c[1].parse::<i64>().ok())
                    .map(|minutes| minutes * 60_000)
                    .unwrap_or(1_800_000),
            },
        });
    }

    let routine = Regex::new(
        r"(?is)^\s*CREATE\s+(OR\s+REPLACE\s+)?(FUNCTION|PROCEDURE)\s+`([^`]+)`\s*\(",
    )
    .map_err(|e| WarehouseError::QueryError(e.to_string()))?;
    if let Some(caps) = routine.captures(sql) {
        let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let open = whole.saturating_sub(1);
        let close = closing_paren(sql, open)
            .ok_or_else(|| WarehouseError::QueryError(format!("Unbalanced arguments: {sql}")))?;
        let reference = TableIdentifier::parse(&caps[3])
            .ok_or_else(|| WarehouseError::QueryError(format!("Invalid routine name: {}", &caps[3])))?;
        let arguments = split_arguments(&sql[open + 1..close]);
        let rest = sql[close + 1..].trim();

        let routine = if caps[2].eq_ignore_ascii_case("PROCEDURE") {
            RoutineResource {
                reference,
                kind: RoutineKind::Procedure,
                language: "SQL".into(),
                body: rest.to_string(),
                arguments,
                ..Default::default()
            }
        } else {
            let header = Regex::new(
                r#"(?is)^(?:RETURNS\s+(.+?)\s+)?(?:LANGUAGE\s+(\w+)\s+)?(?:OPTIONS\s*\(.*?\)\s+)?AS\s+(?:r?"""(.*)"""|\((.*)\))\s*;?\s*$"#,
            )
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?;
            let caps = header
                .captures(rest)
                .ok_or_else(|| WarehouseError::QueryError(format!("Syntax error in: {sql}")))?;
            let body = caps.get(3).or_else(|| caps.get(4)).map(|m| m.as_str().trim());
            RoutineResource {
                reference,
                kind: RoutineKind::ScalarFunction,
                language: caps
                    .get(2)
                    .map(|m| match m.as_str().to_ascii_uppercase().as_str() {
                        "JS" => "JAVASCRIPT".to_string(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "SQL".into()),
                body: body.unwrap_or_default().to_string(),
                arguments,
                return_type: caps.get(1).map(|m| m.as_str().trim().to_string()),
                ..Default::default()
            }
        };
        return Ok(Ddl::CreateRoutine {
            replace: caps.get(1).is_some(),
            routine,
        });
    }

    Ok(Ddl::Other)
}

#[async_trait::async_trait]
impl Warehouse for MockWarehouse {
    fn name(&self) -> &'static str {
        self.warehouse_name
    }

    async fn get_dataset(&self, dataset: &DatasetIdentifier) -> Result<DatasetResource, WarehouseError> {
        let _call = self.enter("get_dataset", &dataset.fqn()).await?;
        let state = self.state.read().await;
        state
            .datasets
            .get(&dataset.fqn())
            .cloned()
            .ok_or_else(|| WarehouseError::NotFound(format!("Dataset {dataset}")))
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetResource,
        exists_ok: bool,
    ) -> Result<DatasetResource, WarehouseError> {
        let fqn = dataset.reference.fqn();
        let _call = self.enter("create_dataset", &fqn).await?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.datasets.get(&fqn) {
            return if exists_ok {
                Ok(existing.clone())
            } else {
                Err(WarehouseError::AlreadyExists(format!("Dataset {fqn}")))
            };
        }
        state.datasets.insert(fqn, dataset.clone());
        Ok(dataset.clone())
    }

    async fn update_dataset(
        &self,
        dataset: &DatasetResource,
        fields: &[UpdateField],
    ) -> Result<DatasetResource, WarehouseError> {
        let fqn = dataset.reference.fqn();
        let _call = self.enter("update_dataset", &fqn).await?;
        let mut state = self.state.write().await;
        let existing = state
            .datasets
            .get_mut(&fqn)
            .ok_or_else(|| WarehouseError::NotFound(format!("Dataset {fqn}")))?;
        for field in fields {
            match field {
                UpdateField::Description => existing.description = dataset.description.clone(),
                UpdateField::Labels => existing.labels = dataset.labels.clone(),
                UpdateField::Schema => {}
            }
        }
        Ok(existing.clone())
    }

    async fn delete_dataset(
        &self,
        dataset: &DatasetIdentifier,
        delete_contents: bool,
        not_found_ok: bool,
    ) -> Result<(), WarehouseError> {
        let fqn = dataset.fqn();
        let _call = self.enter("delete_dataset", &fqn).await?;
        let mut state = self.state.write().await;
        if !state.datasets.contains_key(&fqn) {
            return if not_found_ok {
                Ok(())
            } else {
                Err(WarehouseError::NotFound(format!("Dataset {fqn}")))
            };
        }

        let tables: Vec<String> = objects_in(&state.tables, dataset).into_iter().cloned().collect();
        let routines: Vec<String> = objects_in(&state.routines, dataset).into_iter().cloned().collect();
        if !delete_contents && !(tables.is_empty() && routines.is_empty()) {
            return Err(WarehouseError::QueryError(format!("Dataset {fqn} is still in use")));
        }
        for key in tables {
            state.tables.remove(&key);
        }
        for key in routines {
            state.routines.remove(&key);
        }
        state.datasets.remove(&fqn);
        Ok(())
    }

    async fn list_tables(&self, dataset: &DatasetIdentifier) -> Result<Vec<TableListItem>, WarehouseError> {
        let _call = self.enter("list_tables", &dataset.fqn()).await?;
        let state = self.state.read().await;
        require_dataset(&state, dataset)?;
        Ok(objects_in(&state.tables, dataset)
            .into_iter()
            .filter_map(|key| state.tables.get(key))
            .map(|table| TableListItem {
                reference: table.reference.clone(),
                kind: table.kind.clone(),
                labels: table.labels.clone(),
            })
            .collect())
    }

    async fn list_routines(&self, dataset: &DatasetIdentifier) -> Result<Vec<RoutineListItem>, WarehouseError> {
        let _call = self.enter("list_routines", &dataset.fqn()).await?;
        let state = self.state.read().await;
        require_dataset(&state, dataset)?;
        Ok(objects_in(&state.routines, dataset)
            .into_iter()
            .filter_map(|key| state.routines.get(key))
            .map(|routine| RoutineListItem {
                reference: routine.reference.clone(),
                kind: routine.kind.clone(),
            })
            .collect())
    }

    async fn get_table(&self, table: &TableIdentifier) -> Result<TableResource, WarehouseError> {
        let _call = self.enter("get_table", &table.fqn()).await?;
        self.state
            .read()
            .await
            .tables
            .get(&table.fqn())
            .cloned()
            .ok_or_else(|| WarehouseError::NotFound(format!("Table {table}")))
    }

    async fn create_table(&self, table: &TableResource, exists_ok: bool) -> Result<TableResource, WarehouseError> {
        let fqn = table.reference.fqn();
        let _call = self.enter("create_table", &fqn).await?;
        let mut state = self.state.write().await;
        require_dataset(&state, &table.reference.dataset_identifier())?;
        if let Some(existing) = state.tables.get(&fqn) {
            return if exists_ok {
                Ok(existing.clone())
            } else {
                Err(WarehouseError::AlreadyExists(format!("Table {fqn}")))
            };
        }
        state.tables.insert(fqn, table.clone());
        Ok(table.clone())
    }

    async fn update_table(
        &self,
        table: &TableResource,
        fields: &[UpdateField],
    ) -> Result<TableResource, WarehouseError> {
        let fqn = table.reference.fqn();
        let _call = self.enter("update_table", &fqn).await?;
        let mut state = self.state.write().await;
        let existing = state
            .tables
            .get_mut(&fqn)
            .ok_or_else(|| WarehouseError::NotFound(format!("Table {fqn}")))?;
        for field in fields {
            match field {
                UpdateField::Description => existing.description = table.description.clone(),
                UpdateField::Labels => existing.labels = table.labels.clone(),
                UpdateField::Schema => existing.schema = table.schema.clone(),
            }
        }
        Ok(existing.clone())
    }

    async fn delete_table(&self, table: &TableIdentifier, not_found_ok: bool) -> Result<(), WarehouseError> {
        let _call = self.enter("delete_table", &table.fqn()).await?;
        let removed = self.state.write().await.tables.remove(&table.fqn());
        match removed {
            Some(_) => Ok(()),
            None if not_found_ok => Ok(()),
            None => Err(WarehouseError::NotFound(format!("Table {table}"))),
        }
    }

    async fn get_routine(&self, routine: &TableIdentifier) -> Result<RoutineResource, WarehouseError> {
        let _call = self.enter("get_routine", &routine.fqn()).await?;
        self.state
            .read()
            .await
            .routines
            .get(&routine.fqn())
            .cloned()
            .ok_or_else(|| WarehouseError::NotFound(format!("Routine {routine}")))
    }

    async fn create_routine(
        &self,
        routine: &RoutineResource,
        exists_ok: bool,
    ) -> Result<RoutineResource, WarehouseError> {
        let fqn = routine.reference.fqn();
        let _call = self.enter("create_routine", &fqn).await?;
        let mut state = self.state.write().await;
        require_dataset(&state, &routine.reference.dataset_identifier())?;
        if let Some(existing) = state.routines.get(&fqn) {
            return if exists_ok {
                Ok(existing.clone())
            } else {
                Err(WarehouseError::AlreadyExists(format!("Routine {fqn}")))
            };
        }
        state.routines.insert(fqn, routine.clone());
        Ok(routine.clone())
    }

    async fn update_routine(
        &self,
        routine: &RoutineResource,
        fields: &[UpdateField],
    ) -> Result<RoutineResource, WarehouseError> {
        let fqn = routine.reference.fqn();
        let _call = self.enter("update_routine", &fqn).await?;
        let mut state = self.state.write().await;
        let existing = state
            .routines
            .get_mut(&fqn)
            .ok_or_else(|| WarehouseError::NotFound(format!("Routine {fqn}")))?;
        if fields.contains(&UpdateField::Description) {
            existing.description = routine.description.clone();
        }
        Ok(existing.clone())
    }

    async fn delete_routine(&self, routine: &TableIdentifier, not_found_ok: bool) -> Result<(), WarehouseError> {
        let _call = self.enter("delete_routine", &routine.fqn()).await?;
        let removed = self.state.write().await.routines.remove(&routine.fqn());
        match removed {
            Some(_) => Ok(()),
            None if not_found_ok => Ok(()),
            None => Err(WarehouseError::NotFound(format!("Routine {routine}"))),
        }
    }

    async fn extract_table(&self, request: &ExtractRequest) -> Result<JobResult, WarehouseError> {
        let _call = self.enter("extract_table", &request.source.fqn()).await?;
        let mut state = self.state.write().await;
        let table = state
            .tables
            .get(&request.source.fqn())
            .ok_or_else(|| WarehouseError::NotFound(format!("Table {}", request.source)))?;
        if table.kind != TableKind::Table {
            return Err(WarehouseError::QueryError(format!(
                "{} is a {} and cannot be extracted",
                request.source,
                table.kind.as_str()
            )));
        }
        let schema = table.schema.clone();
        for uri in &request.destination_uris {
            state.exports.insert(uri.clone(), schema.clone());
        }
        Ok(JobResult::done(self.next_job_id(Some(request.job_id_prefix.as_str()))))
    }

    async fn load_table_from_uri(&self, request: &LoadRequest) -> Result<JobResult, WarehouseError> {
        let fqn = request.destination.fqn();
        let _call = self.enter("load_table_from_uri", &fqn).await?;
        let mut state = self.state.write().await;
        require_dataset(&state, &request.destination.dataset_identifier())?;

        let mut exported = None;
        for uri in &request.source_uris {
            match state.exports.get(uri) {
                Some(schema) => exported = Some(schema.clone()),
                None => return Err(WarehouseError::NotFound(format!("URI {uri}"))),
            }
        }

        if !state.tables.contains_key(&fqn) {
            let schema = if request.schema.is_empty() {
                exported.unwrap_or_default()
            } else {
                request.schema.clone()
            };
            let table = TableResource {
                reference: request.destination.clone(),
                schema,
                partition: request.partition.clone(),
                description: request.description.clone(),
                ..Default::default()
            };
            state.tables.insert(fqn, table);
        }
        Ok(JobResult::done(self.next_job_id(Some(request.job_id_prefix.as_str()))))
    }

    async fn query(&self, request: &QueryRequest) -> Result<JobResult, WarehouseError> {
        let _call = self.enter("query", &request.sql).await?;
        let job_id = self.next_job_id(request.job_id_prefix.as_deref());

        match parse_ddl(&request.sql)? {
            Ddl::CreateTableAsSelect {
                target,
                replace,
                source,
                datetime_columns,
            } => {
                let reference = TableIdentifier::parse(&target)
                    .ok_or_else(|| WarehouseError::QueryError(format!("Invalid table name: {target}")))?;
                let mut state = self.state.write().await;
                require_dataset(&state, &reference.dataset_identifier())?;
                if state.tables.contains_key(&target) && !replace {
                    return Err(WarehouseError::AlreadyExists(format!("Table {target}")));
                }
                let stage = state
                    .tables
                    .get(&source)
                    .ok_or_else(|| WarehouseError::NotFound(format!("Table {source}")))?;
                let schema: Vec<SchemaField> = stage
                    .schema
                    .iter()
                    .cloned()
                    .map(|mut field| {
                        if datetime_columns.contains(&field.name) {
                            field.field_type = DATETIME_TYPE.to_string();
                        }
                        field
                    })
                    .collect();
                state
                    .tables
                    .insert(target, TableResource::table(reference).with_schema(schema));
            }
            Ddl::CreateMaterializedView { target, definition } => {
                let reference = TableIdentifier::parse(&target)
                    .ok_or_else(|| WarehouseError::QueryError(format!("Invalid view name: {target}")))?;
                let mut state = self.state.write().await;
                require_dataset(&state, &reference.dataset_identifier())?;
                if state.tables.contains_key(&target) {
                    return Err(WarehouseError::AlreadyExists(format!("Table {target}")));
                }
                state.tables.insert(
                    target,
                    TableResource {
                        reference,
                        kind: TableKind::MaterializedView,
                        materialized_view: Some(definition),
                        ..Default::default()
                    },
                );
            }
            Ddl::CreateRoutine { replace, routine } => {
                let fqn = routine.reference.fqn();
                let mut state = self.state.write().await;
                require_dataset(&state, &routine.reference.dataset_identifier())?;
                if state.routines.contains_key(&fqn) && !replace {
                    return Err(WarehouseError::AlreadyExists(format!("Routine {fqn}")));
                }
                state.routines.insert(fqn, routine);
            }
            Ddl::Other => {}
        }

        Ok(JobResult::done(job_id))
    }
}
