//! Enumerate a live dataset into an entity tree

use std::sync::Arc;

use cikit_cloud::Warehouse;
use cikit_core::ArchiveConfig;
use tracing::Span;

use super::pool::{TaskLabel, TaskOutcome, TaskPool};
use crate::entity::{ArchiveEntity, DatasetEntity, ListingItem};
use crate::error::{EntityError, ExecutorError};

/// Reads a dataset and every archivable child from the warehouse
pub struct FetchExecutor {
    warehouse: Arc<dyn Warehouse>,
    workers: usize,
    span: Option<Span>,
}

impl FetchExecutor {
    pub fn new(warehouse: Arc<dyn Warehouse>, config: &ArchiveConfig) -> Self {
        Self {
            warehouse,
            workers: config.worker_count(),
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Populate `dataset` with its description, labels and children.
    ///
    /// Children that disappear between listing and fetch are dropped.
    pub async fn execute(&self, mut dataset: DatasetEntity) -> Result<DatasetEntity, ExecutorError> {
        let span = self.span.clone().unwrap_or_else(|| {
            tracing::info_span!("fetch", dataset = %dataset.fully_qualified_identity())
        });

        let source = dataset.source();
        dataset.fetch(self.warehouse.as_ref()).await?;

        let tables = self
            .warehouse
            .list_tables(&source)
            .await
            .map_err(EntityError::from)?;
        let routines = self
            .warehouse
            .list_routines(&source)
            .await
            .map_err(EntityError::from)?;

        let listing = tables
            .into_iter()
            .map(ListingItem::Table)
            .chain(routines.into_iter().map(ListingItem::Routine));

        let mut pool: TaskPool<ArchiveEntity> = TaskPool::new(self.workers, span.clone());
        for item in listing {
            let Some(mut entity) = dataset.generate_archived_entity_from_listing(&item) else {
                continue;
            };
            let warehouse = Arc::clone(&self.warehouse);
            pool.spawn(TaskLabel::for_entity(&entity), async move {
                entity.fetch_self(warehouse.as_ref()).await?;
                Ok(entity)
            });
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
                TaskOutcome::Completed(entity) => {
                    tracing::debug!(parent: &span, identity = %report.label.key, "Fetched");
                    dataset.add_child(entity);
                }
                TaskOutcome::Failed(error) if error.is_not_found() => {
                    tracing::warn!(
                        parent: &span,
                        entity_type = report.label.entity_type,
                        identity = %report.label.key,
                        "Object vanished after listing"
                    );
                }
                TaskOutcome::Failed(error) => {
                    pool.drain().await;
                    return Err(ExecutorError::Stopped {
                        entity: report.label.key,
                        source: error,
                    });
                }
                TaskOutcome::Cancelled => {}
            }
        }

        dataset.sort_children();
        tracing::info!(parent: &span, children = dataset.child_count(), "Fetched dataset");
        Ok(dataset)
    }
}
