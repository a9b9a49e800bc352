//! Fields shared by every archived entity

use chrono::{DateTime, Utc};
use cikit_cloud::{DatasetIdentifier, TableIdentifier};
use cikit_core::BaseMetadata;
use serde::{Deserialize, Serialize};

use crate::error::EntityError;

/// Metadata layout version this build reads and writes
pub const SUPPORTED_METADATA_VERSION: &str = "v1";

/// Version of the archiver that wrote a document
pub const ARCHIVER_VERSION: &str = "v1";

/// Label stamped on restored objects
pub const ARCHIVE_TS_LABEL: &str = "archive_ts";

/// Timestamp format used in archive paths, labels and job ids
pub const ARCHIVE_TS_FORMAT: &str = "%Y%m%d%H%M%S";

fn default_version() -> String {
    SUPPORTED_METADATA_VERSION.to_string()
}

fn default_archiver_version() -> String {
    ARCHIVER_VERSION.to_string()
}

/// Identity, provenance and archive bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHeader {
    pub metadata: BaseMetadata,

    #[serde(default = "default_version")]
    pub metadata_version: String,

    #[serde(default = "default_archiver_version")]
    pub archiver_version: String,

    /// Storage prefix the entity's documents live under
    pub gcs_prefix: String,

    pub archived_datetime: DateTime<Utc>,

    #[serde(default)]
    pub is_archived: bool,

    #[serde(default)]
    pub actual_archive_metadata_path: Option<String>,

    #[serde(default)]
    pub actual_archive_data_path: Option<String>,

    #[serde(default)]
    pub destination_project_id: Option<String>,

    #[serde(default)]
    pub destination_dataset: Option<String>,
}

impl EntityHeader {
    pub fn new(
        metadata: BaseMetadata,
        gcs_prefix: impl Into<String>,
        archived_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata,
            metadata_version: default_version(),
            archiver_version: default_archiver_version(),
            gcs_prefix: gcs_prefix.into(),
            archived_datetime,
            is_archived: false,
            actual_archive_metadata_path: None,
            actual_archive_data_path: None,
            destination_project_id: None,
            destination_dataset: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.metadata.identity
    }

    /// Destination coordinates, when both halves are set
    pub fn destination(&self) -> Option<(&str, &str)> {
        match (&self.destination_project_id, &self.destination_dataset) {
            (Some(project), Some(dataset)) => Some((project, dataset)),
            _ => None,
        }
    }

    pub fn set_destination(&mut self, project_id: Option<String>, dataset: Option<String>) {
        self.destination_project_id = project_id;
        self.destination_dataset = dataset;
    }

    /// Project the entity is restored into
    pub fn effective_project(&self) -> &str {
        self.destination()
            .map(|(project, _)| project)
            .unwrap_or(&self.metadata.project_id)
    }

    /// Dataset the entity is restored into
    pub fn effective_dataset(&self) -> &str {
        self.destination()
            .map(|(_, dataset)| dataset)
            .unwrap_or(&self.metadata.dataset)
    }

    /// `project.dataset.identity`, at the destination when one is set
    pub fn fully_qualified_identity(&self) -> String {
        format!(
            "{}.{}.{}",
            self.effective_project(),
            self.effective_dataset(),
            self.metadata.identity
        )
    }

    /// Where the object lives in the source warehouse
    pub fn source(&self) -> TableIdentifier {
        TableIdentifier::new(
            &self.metadata.project_id,
            &self.metadata.dataset,
            &self.metadata.identity,
        )
    }

    /// Where the object is restored to
    pub fn target(&self) -> TableIdentifier {
        TableIdentifier::new(
            self.effective_project(),
            self.effective_dataset(),
            &self.metadata.identity,
        )
    }

    pub fn target_dataset(&self) -> DatasetIdentifier {
        DatasetIdentifier::new(self.effective_project(), self.effective_dataset())
    }

    /// `YYYYmmddHHMMSS` of the archive run
    pub fn archive_ts(&self) -> String {
        self.archived_datetime.format(ARCHIVE_TS_FORMAT).to_string()
    }

    /// Job id prefix such as `archive_{dataset}_{identity}_{ts}`
    pub fn job_id_prefix(&self, action: &str) -> String {
        format!(
            "{action}_{}_{}_{}",
            self.metadata.dataset,
            self.metadata.identity,
            self.archive_ts()
        )
    }

    /// `{gcs_prefix}/{tag}={identity}`
    pub fn object_prefix(&self, tag: &str) -> String {
        format!("{}/{tag}={}", self.gcs_prefix, self.metadata.identity)
    }

    /// `{gcs_prefix}/{tag}={identity}/{tag}.json`
    pub fn document_path(&self, tag: &str) -> String {
        format!("{}/{tag}.json", self.object_prefix(tag))
    }

    /// Labels for a restored object, with the archive timestamp when requested
    pub fn restored_labels(&self, attach_archive_ts: bool) -> std::collections::BTreeMap<String, String> {
        let mut labels = self.metadata.labels.clone();
        if attach_archive_ts {
            labels.insert(ARCHIVE_TS_LABEL.to_string(), self.archive_ts());
        }
        labels
    }

    /// Exact match against [`SUPPORTED_METADATA_VERSION`]
    pub fn check_version(&self) -> Result<(), EntityError> {
        if self.metadata_version == SUPPORTED_METADATA_VERSION {
            Ok(())
        } else {
            Err(EntityError::VersionIncompatible {
                entity: self.metadata.identity.clone(),
                found: self.metadata_version.clone(),
                supported: SUPPORTED_METADATA_VERSION.to_string(),
            })
        }
    }
}
