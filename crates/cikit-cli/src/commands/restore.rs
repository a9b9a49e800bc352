use std::path::Path;

use anyhow::{Context, Result};
use cikit_archiver::{load_archived_dataset, Backends, RestoreExecutor};
use cikit_cloud::{ArchiveStorage, DatasetIdentifier};
use cikit_core::{RestoreConfig, RestoreTask};
use colored::Colorize;

use super::{connect, load_task_file, RestoreArgs};

/// Restore command - recreate archived datasets in the warehouse
pub async fn execute(task_file: Option<&Path>, args: &RestoreArgs) -> Result<()> {
    let tasks = resolve_tasks(task_file, args)?;
    if tasks.is_empty() {
        eprintln!("{}", "No restore tasks to run".yellow());
        return Ok(());
    }

    for task in &tasks {
        run_task(task, args).await?;
    }
    Ok(())
}

fn resolve_tasks(task_file: Option<&Path>, args: &RestoreArgs) -> Result<Vec<RestoreTask>> {
    let Some(path) = task_file else {
        return Ok(vec![args.to_task()?]);
    };

    let file = load_task_file(path)?;
    Ok(file
        .restore_tasks()
        .cloned()
        .map(|mut task| {
            args.apply(&mut task);
            task
        })
        .collect())
}

impl RestoreArgs {
    fn apply(&self, task: &mut RestoreTask) {
        if let Some(archive) = &self.archive {
            task.source_archive = archive.clone();
        }
        if let Some(project) = &self.destination_project {
            task.destination_project_id = Some(project.clone());
        }
        if let Some(dataset) = &self.destination_dataset {
            task.destination_dataset = Some(dataset.clone());
        }
        if let Some(concurrency) = self.concurrency {
            task.config.concurrency = concurrency;
        }
        if self.continue_on_failure {
            task.config.continue_on_failure = true;
        }
        if self.overwrite_existing {
            task.config.overwrite_existing = true;
        }
        if self.no_archive_ts_label {
            task.config.attach_archive_ts_to_label = false;
        }
        for identity in &self.skip {
            task.config.skip_restore.insert(identity.clone(), true);
        }
        for (from, to) in &self.replace {
            task.config.replacement_mapping.insert(from.clone(), to.clone());
        }
    }

    fn to_task(&self) -> Result<RestoreTask> {
        let mut task = RestoreTask {
            name: None,
            source_archive: self
                .archive
                .clone()
                .context("--archive is required without a task file")?,
            destination_project_id: None,
            destination_dataset: None,
            config: RestoreConfig::default(),
        };
        self.apply(&mut task);
        Ok(task)
    }
}

/// Destination for a restore, filling a missing half from the archived source
fn resolve_destination(task: &RestoreTask, source: &DatasetIdentifier) -> Option<DatasetIdentifier> {
    if task.destination_project_id.is_none() && task.destination_dataset.is_none() {
        return None;
    }
    Some(DatasetIdentifier::new(
        task.destination_project_id
            .clone()
            .unwrap_or_else(|| source.project_id.clone()),
        task.destination_dataset
            .clone()
            .unwrap_or_else(|| source.dataset.clone()),
    ))
}

async fn run_task(task: &RestoreTask, args: &RestoreArgs) -> Result<()> {
    let storage = ArchiveStorage::for_uri(&task.source_archive)
        .with_context(|| format!("Cannot open archive storage {}", task.source_archive))?;
    let mut dataset = load_archived_dataset(&storage, &task.source_archive)
        .await
        .with_context(|| format!("Failed to load archive {}", task.source_archive))?;

    if let Some(destination) = resolve_destination(task, &dataset.source()) {
        dataset = dataset.with_destination(destination.project_id, destination.dataset);
    }
    let target = dataset.target();
    let span = tracing::info_span!(
        "restore",
        task = task.name.as_deref().unwrap_or(&target.dataset),
        dataset = %dataset.fully_qualified_identity()
    );

    let warehouse = connect(&target.project_id, args.service_account_key.as_deref()).await?;
    let restored = RestoreExecutor::new(Backends::new(warehouse, storage), task.config.clone())
        .with_span(span)
        .execute(dataset)
        .await
        .with_context(|| format!("Failed to restore {}", task.source_archive))?;

    println!(
        "{} {} ({} objects) from {}",
        "Restored".green().bold(),
        restored.fully_qualified_identity(),
        restored.child_count(),
        task.source_archive
    );
    Ok(())
}
