//! Archive every child of a dataset, then the dataset document

use std::sync::Arc;

use cikit_core::ArchiveConfig;
use tracing::Span;

use super::pool::{FailureTracker, TaskLabel, TaskOutcome, TaskPool};
use crate::entity::{ArchiveEntity, Backends, DatasetEntity};
use crate::error::ExecutorError;

pub struct ArchiveExecutor {
    backends: Backends,
    config: Arc<ArchiveConfig>,
    span: Option<Span>,
}

impl ArchiveExecutor {
    pub fn new(backends: Backends, config: ArchiveConfig) -> Self {
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

    /// Archive the children concurrently, then write the dataset document.
    ///
    /// The dataset document is written only when every child succeeded.
    pub async fn execute(&self, mut dataset: DatasetEntity) -> Result<DatasetEntity, ExecutorError> {
        let span = self.span.clone().unwrap_or_else(|| {
            tracing::info_span!("archive", dataset = %dataset.fully_qualified_identity())
        });
        tracing::info!(
            parent: &span,
            prefix = %dataset.archive_prefix(),
            children = dataset.child_count(),
            workers = self.config.worker_count(),
            "Archiving dataset"
        );

        let mut pool: TaskPool<ArchiveEntity> = TaskPool::new(self.config.worker_count(), span.clone());
        for mut entity in dataset.take_children() {
            let backends = self.backends.clone();
            let config = Arc::clone(&self.config);
            pool.spawn(TaskLabel::for_entity(&entity), async move {
                entity.archive_self(&backends, &config).await?;
                Ok(entity)
            });
        }

        let mut failures = FailureTracker::new(self.config.continue_on_failure);
        while let Some(joined) = pool.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    pool.drain().await;
                    return Err(e);
                }
            };
            match report.outcome {
                TaskOutcome::Completed(entity) => {
                    tracing::info!(
                        parent: &span,
                        entity_type = report.label.entity_type,
                        identity = %report.label.key,
                        status = "archived",
                        "Entity archived"
                    );
                    dataset.add_child(entity);
                }
                TaskOutcome::Failed(error) => {
                    if let Err(stop) = failures.record(&report.label, error) {
                        pool.drain().await;
                        return Err(stop);
                    }
                }
                TaskOutcome::Cancelled => {}
            }
        }
        failures.finish()?;

        dataset.sort_children();
        let mut document = ArchiveEntity::from(dataset);
        document.archive_self(&self.backends, &self.config).await?;
        let dataset = DatasetEntity::try_from(document)?;

        tracing::info!(parent: &span, path = %dataset.document_path(), "Archived dataset");
        Ok(dataset)
    }
}
