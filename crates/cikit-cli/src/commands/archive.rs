use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use cikit_archiver::{ArchiveExecutor, Backends, DatasetEntity, FetchExecutor};
use cikit_cloud::ArchiveStorage;
use cikit_core::{ArchiveConfig, ArchiveTask};
use colored::Colorize;

use super::{connect, load_task_file, ArchiveArgs};

/// Archive command - fetch each dataset and write it to object storage
pub async fn execute(task_file: Option<&Path>, args: &ArchiveArgs) -> Result<()> {
    let tasks = resolve_tasks(task_file, args)?;
    if tasks.is_empty() {
        eprintln!("{}", "No archive tasks to run".yellow());
        return Ok(());
    }

    for task in &tasks {
        run_task(task, args).await?;
    }
    Ok(())
}

fn resolve_tasks(task_file: Option<&Path>, args: &ArchiveArgs) -> Result<Vec<ArchiveTask>> {
    let Some(path) = task_file else {
        return Ok(vec![args.to_task()?]);
    };

    let file = load_task_file(path)?;
    file.archive_tasks()
        .cloned()
        .map(|mut task| -> Result<ArchiveTask> {
            args.apply(&mut task);
            task.validate()?;
            Ok(task)
        })
        .collect()
}

impl ArchiveArgs {
    /// Overlay the flags that were given onto `task`
    fn apply(&self, task: &mut ArchiveTask) {
        if let Some(project) = &self.project {
            task.source_project_id = project.clone();
        }
        if let Some(dataset) = &self.dataset {
            task.source_dataset = dataset.clone();
        }
        if let Some(prefix) = &self.gcs_prefix {
            task.destination_gcs_prefix = prefix.clone();
        }
        if let Some(concurrency) = self.concurrency {
            task.config.concurrency = concurrency;
        }
        if self.continue_on_failure {
            task.config.continue_on_failure = true;
        }
        if let Some(format) = self.format {
            task.config.table_data_archive_format = format;
        }
        if let Some(compression) = self.compression {
            task.config.table_data_archive_compression = compression;
        }
    }

    fn to_task(&self) -> Result<ArchiveTask> {
        let mut task = ArchiveTask {
            name: None,
            source_project_id: self
                .project
                .clone()
                .context("--project is required without a task file")?,
            source_dataset: self
                .dataset
                .clone()
                .context("--dataset is required without a task file")?,
            destination_gcs_prefix: self
                .gcs_prefix
                .clone()
                .context("--gcs-prefix is required without a task file")?,
            config: ArchiveConfig::default(),
        };
        self.apply(&mut task);
        task.validate()?;
        Ok(task)
    }
}

async fn run_task(task: &ArchiveTask, args: &ArchiveArgs) -> Result<()> {
    let fqn = format!("{}.{}", task.source_project_id, task.source_dataset);
    let span = tracing::info_span!(
        "archive",
        task = task.name.as_deref().unwrap_or(&task.source_dataset),
        dataset = %fqn
    );

    let warehouse = connect(&task.source_project_id, args.service_account_key.as_deref()).await?;
    let storage = ArchiveStorage::for_uri(&task.destination_gcs_prefix)
        .with_context(|| format!("Cannot open archive storage {}", task.destination_gcs_prefix))?;

    let dataset = DatasetEntity::new(
        &task.source_project_id,
        &task.source_dataset,
        &task.destination_gcs_prefix,
        Utc::now(),
    );
    let fetched = FetchExecutor::new(Arc::clone(&warehouse), &task.config)
        .with_span(span.clone())
        .execute(dataset)
        .await
        .with_context(|| format!("Failed to fetch {fqn}"))?;

    let archived = ArchiveExecutor::new(Backends::new(warehouse, storage), task.config.clone())
        .with_span(span)
        .execute(fetched)
        .await
        .with_context(|| format!("Failed to archive {fqn}"))?;

    println!(
        "{} {} ({} objects) -> {}",
        "Archived".green().bold(),
        archived.fully_qualified_identity(),
        archived.child_count(),
        archived.archive_prefix()
    );
    Ok(())
}
