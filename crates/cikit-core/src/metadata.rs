//! Identity and descriptive metadata shared by every warehouse object

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::document::DocumentError;

/// Where an object lives and how it is labelled
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BaseMetadata {
    pub project_id: String,

    pub dataset: String,

    /// Unqualified object name (equals `dataset` for dataset-level metadata)
    pub identity: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl BaseMetadata {
    pub fn new(
        project_id: impl Into<String>,
        dataset: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset: dataset.into(),
            identity: identity.into(),
            ..Default::default()
        }
    }

    /// Metadata for a dataset, whose identity is its own name
    pub fn for_dataset(project_id: impl Into<String>, dataset: impl Into<String>) -> Self {
        let dataset = dataset.into();
        Self::new(project_id, dataset.clone(), dataset)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `project.dataset.identity`
    pub fn fully_qualified_identity(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset, self.identity)
    }

    /// `project.dataset`
    pub fn dataset_reference(&self) -> String {
        format!("{}.{}", self.project_id, self.dataset)
    }

    /// Objects that are fetched or restored need all three coordinates
    pub fn validate(&self) -> Result<(), DocumentError> {
        let missing: Vec<&str> = [
            ("project_id", &self.project_id),
            ("dataset", &self.dataset),
            ("identity", &self.identity),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DocumentError::MissingField(missing.join(", ")))
        }
    }
}
