//! BigQuery warehouse adapter
//!
//! Talks to the BigQuery REST API through `gcp-bigquery-client`. Resources are
//! converted with [`crate::rest`]; extract, load and query calls are inserted
//! as jobs and polled until they finish. Required IAM permissions:
//! - bigquery.datasets.* and bigquery.tables.* on the source/destination datasets
//! - bigquery.routines.* for functions and procedures
//! - bigquery.jobs.create in the billing project
//!
//! ## Authentication
//!
//! The adapter supports multiple authentication methods:
//! 1. Service account JSON file (explicit path)
//! 2. Service account JSON content (inline)
//! 3. Application Default Credentials (ADC)
//!
//! ## Usage
//!
//! ```rust,ignore
//! // Using ADC
//! let warehouse = BigQueryWarehouse::with_adc("my-project").await?;
//!
//! // Using service account file
//! let warehouse = BigQueryWarehouse::from_service_account_file(
//!     "my-project",
//!     "/path/to/service-account.json"
//! ).await?;
//! ```

use std::time::Duration;

use crate::adapter::{DatasetIdentifier, TableIdentifier, Warehouse, WarehouseError};
use crate::resources::{
    DatasetResource, ExtractRequest, JobResult, LoadRequest, QueryRequest, RoutineListItem,
    RoutineResource, TableListItem, TableResource, UpdateField,
};

#[cfg(feature = "bigquery")]
use crate::rest;
#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    model::{dataset::Dataset, job::Job, routine::Routine, table::Table},
    Client as BigQueryClient,
};
#[cfg(feature = "bigquery")]
use serde_json::Value;

#[cfg(feature = "bigquery")]
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[cfg(not(feature = "bigquery"))]
fn not_compiled() -> WarehouseError {
    WarehouseError::ConfigError(
        "BigQuery support not compiled. Rebuild with: cargo build --features bigquery".to_string(),
    )
}

/// BigQuery warehouse
pub struct BigQueryWarehouse {
    /// Project that runs (and is billed for) jobs
    project_id: String,

    /// How often running jobs are polled
    poll_interval: Duration,

    /// BigQuery client (only available with bigquery feature)
    #[cfg(feature = "bigquery")]
    client: BigQueryClient,
}

impl BigQueryWarehouse {
    /// Connect using Application Default Credentials (ADC)
    ///
    /// ADC automatically detects credentials from:
    /// - GOOGLE_APPLICATION_CREDENTIALS environment variable
    /// - gcloud CLI default credentials
    /// - GCE/GKE metadata service
    #[cfg(feature = "bigquery")]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, WarehouseError> {
        let client = BigQueryClient::from_application_default_credentials()
            .await
            .map_err(|e| WarehouseError::AuthenticationError(format!(
                "Failed to authenticate with ADC: {}. \
                 Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                e
            )))?;

        Ok(Self::from_client(project_id, client))
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, WarehouseError> {
        let _ = project_id;
        Err(not_compiled())
    }

    /// Connect using a service account key file
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, WarehouseError> {
        let key_path_str = key_path.as_ref().to_string_lossy().to_string();

        let client = BigQueryClient::from_service_account_key_file(&key_path_str)
            .await
            .map_err(|e| WarehouseError::AuthenticationError(format!(
                "Failed to read service account key file '{}': {}",
                key_path_str, e
            )))?;

        Ok(Self::from_client(project_id, client))
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        _key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, WarehouseError> {
        let _ = project_id;
        Err(not_compiled())
    }

    /// Connect using service account JSON content
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_json(
        project_id: impl Into<String>,
        key_json: &str,
    ) -> Result<Self, WarehouseError> {
        let sa_key: gcp_bigquery_client::yup_oauth2::ServiceAccountKey =
            serde_json::from_str(key_json).map_err(|e| {
                WarehouseError::ConfigError(format!("Failed to parse service account JSON: {}", e))
            })?;

        let client = BigQueryClient::from_service_account_key(sa_key, false)
            .await
            .map_err(|e| WarehouseError::AuthenticationError(format!(
                "Failed to authenticate with service account: {}",
                e
            )))?;

        Ok(Self::from_client(project_id, client))
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_json(
        project_id: impl Into<String>,
        _key_json: &str,
    ) -> Result<Self, WarehouseError> {
        let _ = project_id;
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    fn from_client(project_id: impl Into<String>, client: BigQueryClient) -> Self {
        Self {
            project_id: project_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            client,
        }
    }

    /// Change how often running jobs are polled
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

#[cfg(feature = "bigquery")]
fn to_model<T: serde::de::DeserializeOwned>(value: Value, kind: &str) -> Result<T, WarehouseError> {
    serde_json::from_value(value)
        .map_err(|e| WarehouseError::InvalidResponse(format!("Cannot encode {kind} request: {e}")))
}

#[cfg(feature = "bigquery")]
fn from_model<T: serde::Serialize>(model: &T, kind: &str) -> Result<Value, WarehouseError> {
    serde_json::to_value(model)
        .map_err(|e| WarehouseError::InvalidResponse(format!("Cannot decode {kind} response: {e}")))
}

#[cfg(feature = "bigquery")]
fn classify(target: String) -> impl FnOnce(gcp_bigquery_client::error::BQError) -> WarehouseError {
    move |e| WarehouseError::from_message(&target, e.to_string())
}

#[cfg(feature = "bigquery")]
impl BigQueryWarehouse {
    /// Insert a job and wait for it to finish
    async fn run_job(&self, body: Value, job_id: &str) -> Result<JobResult, WarehouseError> {
        let job: Job = to_model(body, "job")?;
        let inserted = self
            .client
            .job()
            .insert(&self.project_id, job)
            .await
            .map_err(classify(format!("job {job_id}")))?;
        let mut current = from_model(&inserted, "job")?;
        let location = rest::job_location(&current);
        tracing::debug!(job_id, location = ?location, "Job inserted");

        loop {
            if let Some(result) = rest::job_outcome(&current)? {
                tracing::debug!(job_id, "Job finished");
                return Ok(result);
            }
            tokio::time::sleep(self.poll_interval).await;
            let job = self
                .client
                .job()
                .get_job(&self.project_id, job_id, location.as_deref())
                .await
                .map_err(classify(format!("job {job_id}")))?;
            current = from_model(&job, "job")?;
        }
    }

    /// Patch body holding only the reference and the listed fields
    fn patch_body(full: Value, reference_key: &str, fields: &[UpdateField]) -> Value {
        let mut patch = serde_json::Map::new();
        if let Some(reference) = full.get(reference_key) {
            patch.insert(reference_key.to_string(), reference.clone());
        }
        for field in fields {
            let key = match field {
                UpdateField::Description => "description",
                UpdateField::Labels => "labels",
                UpdateField::Schema => "schema",
            };
            patch.insert(key.to_string(), full.get(key).cloned().unwrap_or(Value::Null));
        }
        Value::Object(patch)
    }
}

#[cfg(feature = "bigquery")]
#[async_trait::async_trait]
impl Warehouse for BigQueryWarehouse {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    async fn get_dataset(&self, dataset: &DatasetIdentifier) -> Result<DatasetResource, WarehouseError> {
        let found = self
            .client
            .dataset()
            .get(&dataset.project_id, &dataset.dataset)
            .await
            .map_err(classify(dataset.fqn()))?;
        rest::dataset_from_rest(&from_model(&found, "dataset")?)
    }

    async fn create_dataset(
        &self,
        dataset: &DatasetResource,
        exists_ok: bool,
    ) -> Result<DatasetResource, WarehouseError> {
        let model: Dataset = to_model(rest::dataset_to_rest(dataset), "dataset")?;
        match self.client.dataset().create(model).await {
            Ok(created) => rest::dataset_from_rest(&from_model(&created, "dataset")?),
            Err(e) => {
                let error = classify(dataset.reference.fqn())(e);
                if exists_ok && error.is_already_exists() {
                    self.get_dataset(&dataset.reference).await
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn update_dataset(
        &self,
        dataset: &DatasetResource,
        fields: &[UpdateField],
    ) -> Result<DatasetResource, WarehouseError> {
        let body = Self::patch_body(rest::dataset_to_rest(dataset), "datasetReference", fields);
        let model: Dataset = to_model(body, "dataset")?;
        let patched = self
            .client
            .dataset()
            .patch(&dataset.reference.project_id, &dataset.reference.dataset, model)
            .await
            .map_err(classify(dataset.reference.fqn()))?;
        rest::dataset_from_rest(&from_model(&patched, "dataset")?)
    }

    async fn delete_dataset(
        &self,
        dataset: &DatasetIdentifier,
        delete_contents: bool,
        not_found_ok: bool,
    ) -> Result<(), WarehouseError> {
        match self
            .client
            .dataset()
            .delete(&dataset.project_id, &dataset.dataset, delete_contents)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match classify(dataset.fqn())(e) {
                error if not_found_ok && error.is_not_found() => Ok(()),
                error => Err(error),
            },
        }
    }

    async fn list_tables(&self, dataset: &DatasetIdentifier) -> Result<Vec<TableListItem>, WarehouseError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut options = gcp_bigquery_client::table::ListOptions::default();
            if let Some(token) = page_token.take() {
                options = options.page_token(token);
            }
            let page = self
                .client
                .table()
                .list(&dataset.project_id, &dataset.dataset, options)
                .await
                .map_err(classify(dataset.fqn()))?;
            let (batch, next) = rest::table_list_from_rest(&from_model(&page, "table list")?)?;
            items.extend(batch);
            match next {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }
    }

    async fn list_routines(&self, dataset: &DatasetIdentifier) -> Result<Vec<RoutineListItem>, WarehouseError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut options = gcp_bigquery_client::routine::ListOptions::default();
            if let Some(token) = page_token.take() {
                options = options.page_token(token);
            }
            let page = self
                .client
                .routine()
                .list(&dataset.project_id, &dataset.dataset, options)
                .await
                .map_err(classify(dataset.fqn()))?;
            let (batch, next) = rest::routine_list_from_rest(&from_model(&page, "routine list")?)?;
            items.extend(batch);
            match next {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }
    }

    async fn get_table(&self, table: &TableIdentifier) -> Result<TableResource, WarehouseError> {
        let found = self
            .client
            .table()
            .get(&table.project_id, &table.dataset, &table.name, None)
            .await
            .map_err(classify(table.fqn()))?;
        rest::table_from_rest(&from_model(&found, "table")?)
    }

    async fn create_table(&self, table: &TableResource, exists_ok: bool) -> Result<TableResource, WarehouseError> {
        let model: Table = to_model(rest::table_to_rest(table), "table")?;
        match self.client.table().create(model).await {
            Ok(created) => rest::table_from_rest(&from_model(&created, "table")?),
            Err(e) => {
                let error = classify(table.reference.fqn())(e);
                if exists_ok && error.is_already_exists() {
                    self.get_table(&table.reference).await
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn update_table(
        &self,
        table: &TableResource,
        fields: &[UpdateField],
    ) -> Result<TableResource, WarehouseError> {
        let body = Self::patch_body(rest::table_to_rest(table), "tableReference", fields);
        let model: Table = to_model(body, "table")?;
        let reference = &table.reference;
        let patched = self
            .client
            .table()
            .patch(&reference.project_id, &reference.dataset, &reference.name, model)
            .await
            .map_err(classify(reference.fqn()))?;
        rest::table_from_rest(&from_model(&patched, "table")?)
    }

    async fn delete_table(&self, table: &TableIdentifier, not_found_ok: bool) -> Result<(), WarehouseError> {
        match self
            .client
            .table()
            .delete(&table.project_id, &table.dataset, &table.name)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match classify(table.fqn())(e) {
                error if not_found_ok && error.is_not_found() => Ok(()),
                error => Err(error),
            },
        }
    }

    async fn get_routine(&self, routine: &TableIdentifier) -> Result<RoutineResource, WarehouseError> {
        let found = self
            .client
            .routine()
            .get(&routine.project_id, &routine.dataset, &routine.name)
            .await
            .map_err(classify(routine.fqn()))?;
        rest::routine_from_rest(&from_model(&found, "routine")?)
    }

    async fn create_routine(
        &self,
        routine: &RoutineResource,
        exists_ok: bool,
    ) -> Result<RoutineResource, WarehouseError> {
        let model: Routine = to_model(rest::routine_to_rest(routine), "routine")?;
        let reference = &routine.reference;
        match self
            .client
            .routine()
            .insert(&reference.project_id, &reference.dataset, model)
            .await
        {
            Ok(created) => rest::routine_from_rest(&from_model(&created, "routine")?),
            Err(e) => {
                let error = classify(reference.fqn())(e);
                if exists_ok && error.is_already_exists() {
                    self.get_routine(reference).await
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn update_routine(
        &self,
        routine: &RoutineResource,
        fields: &[UpdateField],
    ) -> Result<RoutineResource, WarehouseError> {
        // routines.update replaces the whole resource
        let mut current = self.get_routine(&routine.reference).await?;
        if fields.contains(&UpdateField::Description) {
            current.description = routine.description.clone();
        }
        let model: Routine = to_model(rest::routine_to_rest(&current), "routine")?;
        let reference = &routine.reference;
        let updated = self
            .client
            .routine()
            .update(&reference.project_id, &reference.dataset, &reference.name, model)
            .await
            .map_err(classify(reference.fqn()))?;
        rest::routine_from_rest(&from_model(&updated, "routine")?)
    }

    async fn delete_routine(&self, routine: &TableIdentifier, not_found_ok: bool) -> Result<(), WarehouseError> {
        match self
            .client
            .routine()
            .delete(&routine.project_id, &routine.dataset, &routine.name)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match classify(routine.fqn())(e) {
                error if not_found_ok && error.is_not_found() => Ok(()),
                error => Err(error),
            },
        }
    }

    async fn extract_table(&self, request: &ExtractRequest) -> Result<JobResult, WarehouseError> {
        let job_id = rest::job_id(&request.job_id_prefix);
        let body = rest::extract_job(&self.project_id, &job_id, request);
        self.run_job(body, &job_id).await
    }

    async fn load_table_from_uri(&self, request: &LoadRequest) -> Result<JobResult, WarehouseError> {
        let job_id = rest::job_id(&request.job_id_prefix);
        let body = rest::load_job(&self.project_id, &job_id, request);
        self.run_job(body, &job_id).await
    }

    async fn query(&self, request: &QueryRequest) -> Result<JobResult, WarehouseError> {
        let job_id = rest::job_id(request.job_id_prefix.as_deref().unwrap_or("query"));
        let body = rest::query_job(&self.project_id, &job_id, request);
        self.run_job(body, &job_id).await.map_err(|e| match e {
            WarehouseError::JobFailed { message, .. } => WarehouseError::QueryError(message),
            other => other,
        })
    }
}

#[cfg(not(feature = "bigquery"))]
#[async_trait::async_trait]
impl Warehouse for BigQueryWarehouse {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    async fn get_dataset(&self, _dataset: &DatasetIdentifier) -> Result<DatasetResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn create_dataset(&self, _dataset: &DatasetResource, _exists_ok: bool) -> Result<DatasetResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn update_dataset(
        &self,
        _dataset: &DatasetResource,
        _fields: &[UpdateField],
    ) -> Result<DatasetResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn delete_dataset(
        &self,
        _dataset: &DatasetIdentifier,
        _delete_contents: bool,
        _not_found_ok: bool,
    ) -> Result<(), WarehouseError> {
        Err(not_compiled())
    }

    async fn list_tables(&self, _dataset: &DatasetIdentifier) -> Result<Vec<TableListItem>, WarehouseError> {
        Err(not_compiled())
    }

    async fn list_routines(&self, _dataset: &DatasetIdentifier) -> Result<Vec<RoutineListItem>, WarehouseError> {
        Err(not_compiled())
    }

    async fn get_table(&self, _table: &TableIdentifier) -> Result<TableResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn create_table(&self, _table: &TableResource, _exists_ok: bool) -> Result<TableResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn update_table(
        &self,
        _table: &TableResource,
        _fields: &[UpdateField],
    ) -> Result<TableResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn delete_table(&self, _table: &TableIdentifier, _not_found_ok: bool) -> Result<(), WarehouseError> {
        Err(not_compiled())
    }

    async fn get_routine(&self, _routine: &TableIdentifier) -> Result<RoutineResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn create_routine(
        &self,
        _routine: &RoutineResource,
        _exists_ok: bool,
    ) -> Result<RoutineResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn update_routine(
        &self,
        _routine: &RoutineResource,
        _fields: &[UpdateField],
    ) -> Result<RoutineResource, WarehouseError> {
        Err(not_compiled())
    }

    async fn delete_routine(&self, _routine: &TableIdentifier, _not_found_ok: bool) -> Result<(), WarehouseError> {
        Err(not_compiled())
    }

    async fn extract_table(&self, _request: &ExtractRequest) -> Result<JobResult, WarehouseError> {
        Err(not_compiled())
    }

    async fn load_table_from_uri(&self, _request: &LoadRequest) -> Result<JobResult, WarehouseError> {
        Err(not_compiled())
    }

    async fn query(&self, _request: &QueryRequest) -> Result<JobResult, WarehouseError> {
        Err(not_compiled())
    }
}
