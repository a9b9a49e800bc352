//! Entity and executor errors

use cikit_cloud::{StorageError, WarehouseError};
use cikit_core::DocumentError;
use cikit_dag::DagError;
use cikit_sql::ParseError;

/// Failure of a single entity operation
///
/// Executors catch these at the task boundary and apply the
/// continue-on-failure policy to them.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot parse SQL of {entity}: {source}")]
    Parse {
        entity: String,
        #[source]
        source: ParseError,
    },

    #[error("{entity} metadata version {found} is not compatible with {supported}")]
    VersionIncompatible {
        entity: String,
        found: String,
        supported: String,
    },

    #[error("External service error: {0}")]
    ExternalService(WarehouseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Serialization(#[from] DocumentError),

    #[error("Invalid metadata for {entity}: {message}")]
    InvalidMetadata { entity: String, message: String },
}

impl From<WarehouseError> for EntityError {
    fn from(error: WarehouseError) -> Self {
        match error {
            WarehouseError::NotFound(message) => Self::NotFound(message),
            WarehouseError::PermissionDenied(message) => Self::PermissionDenied(message),
            other => Self::ExternalService(other),
        }
    }
}

impl EntityError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Storage(StorageError::NotFound(_))
        )
    }

    pub fn invalid_metadata(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

/// Failure of a whole executor run
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Fail-fast stop after an entity failed
    #[error("Execution stopped after {entity} failed: {source}")]
    Stopped {
        entity: String,
        #[source]
        source: EntityError,
    },

    /// Every entity was processed but some failed
    #[error("{} entities failed: {}", .0.len(), .0.join(", "))]
    Failures(Vec<String>),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warehouse_errors_are_classified() {
        let err: EntityError = WarehouseError::NotFound("p.d.t".into()).into();
        assert!(matches!(err, EntityError::NotFound(_)));
        assert!(err.is_not_found());

        let err: EntityError = WarehouseError::PermissionDenied("p.d".into()).into();
        assert!(matches!(err, EntityError::PermissionDenied(_)));

        let err: EntityError = WarehouseError::QueryError("boom".into()).into();
        assert!(matches!(err, EntityError::ExternalService(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn missing_document_counts_as_not_found() {
        let err: EntityError = StorageError::NotFound("gs://b/x.json".into()).into();
        assert!(err.is_not_found());
    }

    #[test]
    fn failures_message_lists_entities() {
        let err = ExecutorError::Failures(vec!["t1".into(), "v1".into()]);
        assert_eq!(err.to_string(), "2 entities failed: t1, v1");
    }
}
