use std::path::Path;

use log::{debug, info, warn};

use super::{SyncAction, SyncError, SyncResult, SyncService};
use crate::model::task::{EntityId, Subtask, Task};
use crate::store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub entity: EntityId,
    pub message: String,
}

/// Counters for one pass over a set of tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// False when ticketing was off or unconfigured and nothing was attempted.
    pub available: bool,
    /// Every entity attempted, whatever its outcome.
    pub processed: usize,
    pub tasks_created: usize,
    pub subtasks_created: usize,
    /// Links recovered through a reference-id search.
    pub tasks_updated: usize,
    pub subtasks_updated: usize,
    /// Linked entities whose ticket is still alive.
    pub skipped: usize,
    pub error_count: usize,
    pub errors: Vec<SyncFailure>,
}

impl SyncSummary {
    pub fn created(&self) -> usize {
        self.tasks_created + self.subtasks_created
    }

    pub fn updated(&self) -> usize {
        self.tasks_updated + self.subtasks_updated
    }

    fn record(&mut self, entity: EntityId, outcome: Result<SyncResult, SyncError>) {
        self.processed += 1;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!("Failed to sync {entity}: {e}");
                self.error_count += 1;
                self.errors.push(SyncFailure {
                    entity,
                    message: e.to_string(),
                });
                return;
            }
        };

        let is_task = matches!(entity, EntityId::Task(_));
        match result.action {
            SyncAction::Created if is_task => self.tasks_created += 1,
            SyncAction::Created => self.subtasks_created += 1,
            SyncAction::Updated if is_task => self.tasks_updated += 1,
            SyncAction::Updated => self.subtasks_updated += 1,
            _ => self.skipped += 1,
        }
    }
}

impl SyncService {
    /// Reconcile the whole tasks file. Only an unreadable file is an error.
    pub async fn sync_all_tasks(
        &self,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncSummary, SyncError> {
        let tree = store::read_tasks(tasks_path)?;
        Ok(self
            .sync_multiple_tasks(tree.tasks, tasks_path, project_root)
            .await)
    }

    /// Reconcile `tasks` and their subtasks strictly in order. A failure is
    /// recorded against its entity and the pass moves on.
    pub async fn sync_multiple_tasks(
        &self,
        mut tasks: Vec<Task>,
        tasks_path: &Path,
        project_root: &Path,
    ) -> SyncSummary {
        if let Err(e) = self.provider(project_root) {
            debug!("Skipping ticket sync: {e}");
            return SyncSummary::default();
        }

        let mut summary = SyncSummary {
            available: true,
            ..SyncSummary::default()
        };

        for task in &mut tasks {
            let outcome = self.reconcile_linked_task(task, tasks_path, project_root).await;
            summary.record(EntityId::Task(task.id), outcome);

            // Subtasks see the parent's link as it stands after its own sync.
            let parent = task.clone();
            for subtask in &mut task.subtasks {
                let outcome = self
                    .reconcile_linked_subtask(subtask, &parent, tasks_path, project_root)
                    .await;
                let id = EntityId::Subtask {
                    parent: parent.id,
                    id: subtask.id,
                };
                summary.record(id, outcome);
            }
        }

        info!(
            "Ticket sync: {} processed, {} created, {} recovered, {} unchanged, {} errors",
            summary.processed,
            summary.created(),
            summary.updated(),
            summary.skipped,
            summary.error_count
        );
        summary
    }

    async fn reconcile_linked_task(
        &self,
        task: &mut Task,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let provider = self.provider(project_root)?;
        let Some(key) = provider.get_ticket_id(&task.metadata) else {
            return self.reconcile_task(task, None, tasks_path, project_root).await;
        };
        if provider.ticket_exists(&key, project_root).await? {
            return Ok(SyncResult::success(key, SyncAction::Unchanged));
        }
        warn!("Ticket {key} for task {} no longer exists, recreating", task.id);
        self.reconcile_task(task, Some(&key), tasks_path, project_root)
            .await
    }

    async fn reconcile_linked_subtask(
        &self,
        subtask: &mut Subtask,
        parent: &Task,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let provider = self.provider(project_root)?;
        let Some(key) = provider.get_ticket_id(&subtask.metadata) else {
            return self
                .reconcile_subtask(subtask, parent, None, tasks_path, project_root)
                .await;
        };
        if provider.ticket_exists(&key, project_root).await? {
            return Ok(SyncResult::success(key, SyncAction::Unchanged));
        }
        warn!(
            "Ticket {key} for subtask {}.{} no longer exists, recreating",
            parent.id, subtask.id
        );
        self.reconcile_subtask(subtask, parent, Some(&key), tasks_path, project_root)
            .await
    }
}
