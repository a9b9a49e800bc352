//! Warehouse trait and identifiers

use std::fmt;

use crate::resources::{
    DatasetResource, ExtractRequest, JobResult, LoadRequest, QueryRequest, RoutineListItem,
    RoutineResource, TableListItem, TableResource, UpdateField,
};

/// Identifies a dataset in a warehouse
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DatasetIdentifier {
    pub project_id: String,
    pub dataset: String,
}

impl DatasetIdentifier {
    pub fn new(project_id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset: dataset.into(),
        }
    }

    /// `project.dataset`
    pub fn fqn(&self) -> String {
        format!("{}.{}", self.project_id, self.dataset)
    }

    /// Identifier of an object inside this dataset
    pub fn object(&self, name: impl Into<String>) -> TableIdentifier {
        TableIdentifier::new(self.project_id.clone(), self.dataset.clone(), name)
    }
}

impl fmt::Display for DatasetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Identifies a table, view or routine in a warehouse
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TableIdentifier {
    /// Project name
    pub project_id: String,

    /// Dataset name
    pub dataset: String,

    /// Object name
    pub name: String,
}

impl TableIdentifier {
    /// Create a new table identifier
    pub fn new(
        project_id: impl Into<String>,
        dataset: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset: dataset.into(),
            name: name.into(),
        }
    }

    /// Parse `project.dataset.name`
    pub fn parse(fqn: &str) -> Option<Self> {
        let mut parts = fqn.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(d), Some(n)) if !p.is_empty() && !d.is_empty() && !n.is_empty() => {
                Some(Self::new(p, d, n))
            }
            _ => None,
        }
    }

    /// Get fully qualified name
    pub fn fqn(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset, self.name)
    }

    pub fn dataset_identifier(&self) -> DatasetIdentifier {
        DatasetIdentifier::new(self.project_id.clone(), self.dataset.clone())
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Errors returned by warehouse calls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WarehouseError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WarehouseError {
    /// Classify a raw client error message about `target`
    pub fn from_message(target: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("notfound") || lower.contains("404") {
            Self::NotFound(format!("{target}: {message}"))
        } else if lower.contains("access denied")
            || lower.contains("permission")
            || lower.contains("403")
        {
            Self::PermissionDenied(format!("{target}: {message}"))
        } else if lower.contains("already exists") || lower.contains("duplicate") || lower.contains("409") {
            Self::AlreadyExists(format!("{target}: {message}"))
        } else {
            Self::QueryError(format!("{target}: {message}"))
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Calls the archiver makes against a warehouse.
///
/// Job-backed calls (`extract_table`, `load_table_from_uri`, `query`) return
/// once the job has reached a terminal state.
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync {
    /// Get the warehouse name (e.g., "BigQuery")
    fn name(&self) -> &'static str;

    async fn get_dataset(&self, dataset: &DatasetIdentifier) -> Result<DatasetResource, WarehouseError>;

    async fn create_dataset(
        &self,
        dataset: &DatasetResource,
        exists_ok: bool,
    ) -> Result<DatasetResource, WarehouseError>;

    async fn update_dataset(
        &self,
        dataset: &DatasetResource,
        fields: &[UpdateField],
    ) -> Result<DatasetResource, WarehouseError>;

    async fn delete_dataset(
        &self,
        dataset: &DatasetIdentifier,
        delete_contents: bool,
        not_found_ok: bool,
    ) -> Result<(), WarehouseError>;

    /// Tables, views, materialized views and external tables of a dataset
    async fn list_tables(&self, dataset: &DatasetIdentifier) -> Result<Vec<TableListItem>, WarehouseError>;

    async fn list_routines(&self, dataset: &DatasetIdentifier) -> Result<Vec<RoutineListItem>, WarehouseError>;

    async fn get_table(&self, table: &TableIdentifier) -> Result<TableResource, WarehouseError>;

    async fn create_table(&self, table: &TableResource, exists_ok: bool) -> Result<TableResource, WarehouseError>;

    async fn update_table(
        &self,
        table: &TableResource,
        fields: &[UpdateField],
    ) -> Result<TableResource, WarehouseError>;

    async fn delete_table(&self, table: &TableIdentifier, not_found_ok: bool) -> Result<(), WarehouseError>;

    async fn get_routine(&self, routine: &TableIdentifier) -> Result<RoutineResource, WarehouseError>;

    async fn create_routine(
        &self,
        routine: &RoutineResource,
        exists_ok: bool,
    ) -> Result<RoutineResource, WarehouseError>;

    async fn update_routine(
        &self,
        routine: &RoutineResource,
        fields: &[UpdateField],
    ) -> Result<RoutineResource, WarehouseError>;

    async fn delete_routine(&self, routine: &TableIdentifier, not_found_ok: bool) -> Result<(), WarehouseError>;

    /// Export table data to object storage
    async fn extract_table(&self, request: &ExtractRequest) -> Result<JobResult, WarehouseError>;

    /// Import object storage data into a table
    async fn load_table_from_uri(&self, request: &LoadRequest) -> Result<JobResult, WarehouseError>;

    /// Run a statement (DDL or query) to completion
    async fn query(&self, request: &QueryRequest) -> Result<JobResult, WarehouseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_identifier() {
        let table = TableIdentifier::new("my_project", "my_dataset", "my_table");
        assert_eq!(table.fqn(), "my_project.my_dataset.my_table");
        assert_eq!(table.to_string(), "my_project.my_dataset.my_table");
        assert_eq!(table.dataset_identifier().fqn(), "my_project.my_dataset");
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(
            TableIdentifier::parse("p.d.t"),
            Some(TableIdentifier::new("p", "d", "t"))
        );
        assert_eq!(TableIdentifier::parse("d.t"), None);
        assert_eq!(TableIdentifier::parse("p..t"), None);
    }

    #[test]
    fn test_error_classification() {
        assert!(WarehouseError::from_message("p.d.t", "Not found: Table p:d.t").is_not_found());
        assert!(matches!(
            WarehouseError::from_message("p.d.t", "Access Denied: Table p:d.t"),
            WarehouseError::PermissionDenied(_)
        ));
        assert!(WarehouseError::from_message("p.d", "Already Exists: Dataset p:d").is_already_exists());
        assert!(matches!(
            WarehouseError::from_message("p.d.t", "Syntax error at [1:8]"),
            WarehouseError::QueryError(_)
        ));
    }
}
