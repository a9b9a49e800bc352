//! Restore an archived dataset
//!
//! Independent objects (tables, external tables, functions, procedures) are
//! restored first. Views and materialized views follow, each one submitted
//! only after every view it selects from has been restored.

use std::collections::HashSet;
use std::sync::Arc;

use cikit_cloud::ArchiveStorage;
use cikit_core::RestoreConfig;
use cikit_dag::Dag;
use tracing::Span;

use super::pool::{FailureTracker, TaskLabel, TaskOutcome, TaskPool};
use crate::entity::{ArchiveEntity, Backends, DatasetEntity, RestoreStatus, DATASET_DOCUMENT};
use crate::error::{EntityError, ExecutorError};

const VIEW_DAG_ID: &str = "view_restore_dag";

/// Read `{archive_prefix}/dataset.json`
pub async fn load_archived_dataset(
    storage: &ArchiveStorage,
    archive_prefix: &str,
) -> Result<DatasetEntity, EntityError> {
    let path = format!("{}/{DATASET_DOCUMENT}", archive_prefix.trim_end_matches('/'));
    let bytes = storage.read_bytes(&path).await?;
    DatasetEntity::from_document(&bytes)
}

pub struct RestoreExecutor {
    backends: Backends,
    config: Arc<RestoreConfig>,
    span: Option<Span>,
}

impl RestoreExecutor {
    pub fn new(backends: Backends, config: RestoreConfig) -> Self {
        Self {
            backends,
            config: Arc::new(config),
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub async fn execute(&self, mut dataset: DatasetEntity) -> Result<DatasetEntity, ExecutorError> {
        dataset.populate_sub_restore_info(&self.config.replacement_mapping);
        let span = self.span.clone().unwrap_or_else(|| {
            tracing::info_span!("restore", dataset = %dataset.fully_qualified_identity())
        });
        dataset.header.check_version()?;

        let children = dataset.take_children();
        tracing::info!(
            parent: &span,
            source = %dataset.source(),
            children = children.len(),
            workers = self.config.worker_count(),
            "Restoring dataset"
        );

        let container = ArchiveEntity::from(dataset);
        let label = TaskLabel::for_entity(&container);
        match container
            .restore_self(self.backends.warehouse.as_ref(), &self.config)
            .await
        {
            Ok(status) => log_restored(&span, &label, status),
            Err(source) => {
                return Err(ExecutorError::Stopped {
                    entity: label.key,
                    source,
                })
            }
        }
        let mut dataset = DatasetEntity::try_from(container)?;

        let mut failures = FailureTracker::new(self.config.continue_on_failure);
        let (ordered, independent): (Vec<&ArchiveEntity>, Vec<&ArchiveEntity>) =
            children.iter().partition(|e| e.is_dependency_ordered());

        self.restore_independent(&span, independent, &mut failures).await?;
        self.restore_ordered(&span, ordered, &mut failures).await?;
        failures.finish()?;

        for child in children {
            dataset.add_child(child);
        }
        dataset.sort_children();
        tracing::info!(parent: &span, target = %dataset.fully_qualified_identity(), "Restored dataset");
        Ok(dataset)
    }

    fn spawn_restore(&self, pool: &mut TaskPool<RestoreStatus>, entity: Arc<ArchiveEntity>) {
        let warehouse = Arc::clone(&self.backends.warehouse);
        let config = Arc::clone(&self.config);
        pool.spawn(TaskLabel::for_entity(&entity), async move {
            entity.header().check_version()?;
            entity.restore_self(warehouse.as_ref(), &config).await
        });
    }

    /// Phase 1: no ordering among these
    async fn restore_independent(
        &self,
        span: &Span,
        entities: Vec<&ArchiveEntity>,
        failures: &mut FailureTracker,
    ) -> Result<(), ExecutorError> {
        let mut pool = TaskPool::new(self.config.worker_count(), span.clone());
        for entity in entities {
            self.spawn_restore(&mut pool, Arc::new(entity.clone()));
        }

        while let Some(joined) = pool.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    pool.drain().await;
                    return Err(e);
                }
            };
            match report.outcome {
                TaskOutcome::Completed(status) => log_restored(span, &report.label, status),
                TaskOutcome::Failed(error) => {
                    if let Err(stop) = failures.record(&report.label, error) {
                        pool.drain().await;
                        return Err(stop);
                    }
                }
                TaskOutcome::Cancelled => {}
            }
        }
        Ok(())
    }

    /// Phase 2: views in dependency order
    ///
    /// Views with unparseable SQL stay in the DAG but are never submitted,
    /// so everything downstream of them is reported as blocked.
    async fn restore_ordered(
        &self,
        span: &Span,
        entities: Vec<&ArchiveEntity>,
        failures: &mut FailureTracker,
    ) -> Result<(), ExecutorError> {
        if entities.is_empty() {
            return Ok(());
        }
        let mut unparseable: Vec<(TaskLabel, EntityError)> = Vec::new();
        for entity in &entities {
            if let Err(error) = entity.sql_dependencies() {
                unparseable.push((TaskLabel::for_entity(entity), error));
            }
        }

        let dag = Dag::build(VIEW_DAG_ID, entities.into_iter().cloned(), &HashSet::new())?;
        let mut failed: HashSet<String> = HashSet::new();
        for (label, error) in unparseable {
            log_blocked_downstream(span, &dag, &label.key);
            failed.insert(label.key.clone());
            failures.record(&label, error)?;
        }

        let mut pool = TaskPool::new(self.config.worker_count(), span.clone());
        let mut submitted: HashSet<String> = HashSet::new();
        for node in dag.get_ready_nodes() {
            if !failed.contains(&node.key) && submitted.insert(node.key.clone()) {
                self.spawn_restore(&mut pool, node.entity);
            }
        }

        while let Some(joined) = pool.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    pool.drain().await;
                    return Err(e);
                }
            };
            match report.outcome {
                TaskOutcome::Completed(status) => {
                    log_restored(span, &report.label, status);
                    let ready = match dag.complete_node(&report.label.key) {
                        Ok(ready) => ready,
                        Err(e) => {
                            pool.drain().await;
                            return Err(e.into());
                        }
                    };
                    for node in ready {
                        if submitted.insert(node.key.clone()) {
                            self.spawn_restore(&mut pool, node.entity);
                        }
                    }
                }
                TaskOutcome::Failed(error) => {
                    log_blocked_downstream(span, &dag, &report.label.key);
                    failed.insert(report.label.key.clone());
                    if let Err(stop) = failures.record(&report.label, error) {
                        pool.drain().await;
                        return Err(stop);
                    }
                }
                TaskOutcome::Cancelled => {}
            }
        }

        for key in dag.pending_keys() {
            if !submitted.contains(&key) && !failed.contains(&key) {
                tracing::error!(parent: span, identity = %key, "View blocked by a failed dependency");
                failures.record_blocked(key);
            }
        }
        Ok(())
    }
}

fn log_blocked_downstream(span: &Span, dag: &Dag<ArchiveEntity>, key: &str) {
    let mut blocked = dag.downstream(key);
    if blocked.is_empty() {
        return;
    }
    blocked.sort();
    tracing::warn!(parent: span, identity = %key, blocked = ?blocked, "Dependent views will not be restored");
}

fn log_restored(span: &Span, label: &TaskLabel, status: RestoreStatus) {
    let status = match status {
        RestoreStatus::Restored => "restored",
        RestoreStatus::Skipped => "skipped",
    };
    tracing::info!(
        parent: span,
        entity_type = label.entity_type,
        identity = %label.key,
        status,
        "Entity restore finished"
    );
}
