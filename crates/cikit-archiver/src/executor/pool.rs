//! Bounded worker pool for per-entity tasks

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::entity::ArchiveEntity;
use crate::error::{EntityError, ExecutorError};

/// Identifies the entity a task works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLabel {
    /// Destination-aware fully qualified identity
    pub key: String,
    pub entity_type: &'static str,
    pub identity: String,
}

impl TaskLabel {
    pub fn for_entity(entity: &ArchiveEntity) -> Self {
        Self {
            key: entity.fully_qualified_identity(),
            entity_type: entity.entity_type(),
            identity: entity.identity(),
        }
    }
}

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(EntityError),

    /// Never started because the pool was cancelled first
    Cancelled,
}

#[derive(Debug)]
pub struct TaskReport<T> {
    pub label: TaskLabel,
    pub outcome: TaskOutcome<T>,
}

/// Runs at most `workers` tasks at once.
///
/// Tasks are spawned eagerly and wait for a permit inside the runtime.
/// Cancelling the pool stops queued tasks from starting; running tasks
/// finish normally.
pub struct TaskPool<T> {
    tasks: JoinSet<TaskReport<T>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    span: Span,
}

impl<T: Send + 'static> TaskPool<T> {
    pub fn new(workers: usize, span: Span) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            cancel: CancellationToken::new(),
            span,
        }
    }

    pub fn spawn<F>(&mut self, label: TaskLabel, task: F)
    where
        F: Future<Output = Result<T, EntityError>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        let span = tracing::info_span!(
            parent: &self.span,
            "entity",
            entity_type = label.entity_type,
            identity = %label.key,
        );

        self.tasks.spawn(
            async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };

                let outcome = match permit {
                    Some(_permit) if !cancel.is_cancelled() => match task.await {
                        Ok(value) => TaskOutcome::Completed(value),
                        Err(error) => TaskOutcome::Failed(error),
                    },
                    _ => TaskOutcome::Cancelled,
                };
                TaskReport { label, outcome }
            }
            .instrument(span),
        );
    }

    /// Next finished task; a panicked task is an executor error
    pub async fn join_next(&mut self) -> Option<Result<TaskReport<T>, ExecutorError>> {
        self.tasks.join_next().await.map(|joined| {
            joined.map_err(|e| ExecutorError::TaskPanicked(e.to_string()))
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel queued tasks and wait for running ones
    pub async fn drain(&mut self) {
        self.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Task panicked while draining");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Applies `continue_on_failure` to task failures
#[derive(Debug)]
pub(crate) struct FailureTracker {
    continue_on_failure: bool,
    failed: Vec<String>,
}

impl FailureTracker {
    pub(crate) fn new(continue_on_failure: bool) -> Self {
        Self {
            continue_on_failure,
            failed: Vec::new(),
        }
    }

    /// Record a failed entity. Returns the stop error when the run must not continue.
    pub(crate) fn record(&mut self, label: &TaskLabel, error: EntityError) -> Result<(), ExecutorError> {
        tracing::error!(
            entity_type = label.entity_type,
            identity = %label.key,
            error = %error,
            "Entity failed"
        );
        if self.continue_on_failure {
            self.failed.push(label.key.clone());
            Ok(())
        } else {
            Err(ExecutorError::Stopped {
                entity: label.key.clone(),
                source: error,
            })
        }
    }

    /// Record an entity that was never attempted
    pub(crate) fn record_blocked(&mut self, key: impl Into<String>) {
        self.failed.push(key.into());
    }

    pub(crate) fn finish(mut self) -> Result<(), ExecutorError> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            self.failed.sort();
            Err(ExecutorError::Failures(self.failed))
        }
    }
}
