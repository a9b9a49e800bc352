pub mod archive;
pub mod restore;
pub mod shell;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use cikit_cloud::{BigQueryWarehouse, Warehouse};
use cikit_core::{Compression, DataFormat, TaskFile};

/// Flags for `archive-bigquery`
///
/// With `--task-file`, set flags override every archive task in the file.
/// Without one, the flags describe a single task.
#[derive(Args, Debug, Default)]
pub struct ArchiveArgs {
    /// Project holding the dataset
    #[arg(long)]
    pub project: Option<String>,

    /// Dataset to archive
    #[arg(long)]
    pub dataset: Option<String>,

    /// Storage root, e.g. gs://bucket/archives
    #[arg(long)]
    pub gcs_prefix: Option<String>,

    /// Number of concurrent workers
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Keep going after an object fails and report all failures at the end
    #[arg(long)]
    pub continue_on_failure: bool,

    /// Table data format (avro, parquet, csv)
    #[arg(long)]
    pub format: Option<DataFormat>,

    /// Table data compression (snappy, deflate, gzip, zstd, none)
    #[arg(long)]
    pub compression: Option<Compression>,

    /// Service account key file; Application Default Credentials otherwise
    #[arg(long)]
    pub service_account_key: Option<PathBuf>,
}

/// Flags for `restore-bigquery`
#[derive(Args, Debug, Default)]
pub struct RestoreArgs {
    /// Dataset archive prefix, e.g. gs://bucket/archives/dataset=d/archive_ts=20250101000000
    #[arg(long)]
    pub archive: Option<String>,

    /// Project to restore into (defaults to the archived project)
    #[arg(long)]
    pub destination_project: Option<String>,

    /// Dataset to restore into (defaults to the archived dataset)
    #[arg(long)]
    pub destination_dataset: Option<String>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub continue_on_failure: bool,

    /// Drop existing destination objects before recreating them
    #[arg(long)]
    pub overwrite_existing: bool,

    /// Object identity to leave untouched (repeatable)
    #[arg(long = "skip", value_name = "IDENTITY")]
    pub skip: Vec<String>,

    /// Do not stamp restored objects with an archive_ts label
    #[arg(long)]
    pub no_archive_ts_label: bool,

    /// Extra SQL reference substitution FROM=TO (repeatable)
    #[arg(long = "replace", value_name = "FROM=TO", value_parser = parse_replacement)]
    pub replace: Vec<(String, String)>,

    /// Service account key file; Application Default Credentials otherwise
    #[arg(long)]
    pub service_account_key: Option<PathBuf>,
}

fn parse_replacement(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(format!("expected FROM=TO, got '{value}'")),
    }
}

fn load_task_file(path: &Path) -> Result<TaskFile> {
    let file = TaskFile::from_file(path)
        .with_context(|| format!("Failed to load task file {}", path.display()))?;
    tracing::debug!(path = %path.display(), tasks = file.tasks.len(), "Loaded task file");
    Ok(file)
}

/// Connect to BigQuery as `project_id`
async fn connect(project_id: &str, key: Option<&Path>) -> Result<Arc<dyn Warehouse>> {
    let warehouse = match key {
        Some(path) => BigQueryWarehouse::from_service_account_file(project_id, path).await,
        None => BigQueryWarehouse::with_adc(project_id).await,
    }
    .with_context(|| format!("Failed to connect to BigQuery project {project_id}"))?;
    Ok(Arc::new(warehouse))
}
