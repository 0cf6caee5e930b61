use std::path::Path;

use chrono::Utc;
use log::{debug, info, warn};

use super::{settle, soften, SyncAction, SyncError, SyncResult, SyncService};
use crate::model::task::{EntityId, Subtask, Task, TaskStatus, TicketMetadata};
use crate::providers::{TicketData, TicketingProvider};
use crate::refid;
use crate::store::{self, StoreError};

/// Both halves of a subtask → task conversion, reported independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSync {
    /// Cancelling the ticket that belonged to the subtask.
    pub cancelled: SyncResult,
    /// Creating (or recovering) the ticket for the new standalone task.
    pub created: SyncResult,
}

fn require(id: EntityId, title: &str) -> Result<(), SyncError> {
    if title.trim().is_empty() {
        return Err(SyncError::InvalidEntity {
            id: id.to_string(),
            reason: "title is empty".into(),
        });
    }
    Ok(())
}

fn validate_task(task: &Task) -> Result<(), SyncError> {
    if task.id == 0 {
        return Err(SyncError::InvalidEntity {
            id: "0".into(),
            reason: "ids start at 1".into(),
        });
    }
    require(EntityId::Task(task.id), &task.title)
}

impl SyncService {
    /// Make sure a task has a remote ticket, creating one only when neither the
    /// stored link nor a reference-id search finds an existing ticket.
    pub async fn sync_task(
        &self,
        task: &mut Task,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let outcome = self.reconcile_task(task, None, tasks_path, project_root).await;
        settle(EntityId::Task(task.id), outcome)
    }

    /// Same as [`SyncService::sync_task`] for a subtask. The parent must already
    /// be linked before a new subtask ticket can be created.
    pub async fn sync_subtask(
        &self,
        subtask: &mut Subtask,
        parent: &Task,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let outcome = self
            .reconcile_subtask(subtask, parent, None, tasks_path, project_root)
            .await;
        let id = EntityId::Subtask {
            parent: parent.id,
            id: subtask.id,
        };
        settle(id, outcome)
    }

    /// `dead_key` is a link that a liveness check found gone: the stored link is
    /// ignored and the dead key is never accepted back from the search.
    pub(super) async fn reconcile_task(
        &self,
        task: &mut Task,
        dead_key: Option<&str>,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let provider = self.provider(project_root)?;
        validate_task(task)?;
        let id = EntityId::Task(task.id);

        let generated = self.ref_ids.task_ref_id(task.id);
        let Some(ref_id) = ensure_ref_id(id, &mut task.metadata, generated, tasks_path)? else {
            return Err(SyncError::Unavailable);
        };

        if dead_key.is_none() {
            if let Some(key) = provider.get_ticket_id(&task.metadata) {
                debug!("Task {id} already linked to {key}");
                return Ok(SyncResult::success(key, SyncAction::Unchanged));
            }
        }

        if let Some(key) = recover_link(provider, &ref_id, dead_key, project_root).await? {
            persist_link(provider, id, &mut task.metadata, &key, tasks_path)?;
            info!("Recovered {} ticket {key} for task {id} via {ref_id}", provider.name());
            return Ok(SyncResult::success(key, SyncAction::Updated));
        }

        let ticket = TicketData::from_task(task, &ref_id);
        let created = provider.create_story(&ticket, project_root).await?;
        persist_link(provider, id, &mut task.metadata, &created.key, tasks_path)?;
        info!("Created {} ticket {} for task {id}", provider.name(), created.key);
        Ok(SyncResult::success(created.key, SyncAction::Created))
    }

    pub(super) async fn reconcile_subtask(
        &self,
        subtask: &mut Subtask,
        parent: &Task,
        dead_key: Option<&str>,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let provider = self.provider(project_root)?;
        validate_task(parent)?;
        let id = EntityId::Subtask {
            parent: parent.id,
            id: subtask.id,
        };
        require(id, &subtask.title)?;

        let generated = self.ref_ids.subtask_ref_id(parent.id, subtask.id);
        let Some(ref_id) = ensure_ref_id(id, &mut subtask.metadata, generated, tasks_path)? else {
            return Err(SyncError::Unavailable);
        };

        if dead_key.is_none() {
            if let Some(key) = provider.get_ticket_id(&subtask.metadata) {
                debug!("Subtask {id} already linked to {key}");
                return Ok(SyncResult::success(key, SyncAction::Unchanged));
            }
        }

        if let Some(key) = recover_link(provider, &ref_id, dead_key, project_root).await? {
            persist_link(provider, id, &mut subtask.metadata, &key, tasks_path)?;
            info!("Recovered {} ticket {key} for subtask {id} via {ref_id}", provider.name());
            return Ok(SyncResult::success(key, SyncAction::Updated));
        }

        let parent_key = provider
            .get_ticket_id(&parent.metadata)
            .ok_or(SyncError::MissingParentTicket { parent_id: parent.id })?;
        let ticket = TicketData::from_subtask(subtask, parent, &ref_id);
        let created = provider.create_task(&ticket, &parent_key, project_root).await?;
        persist_link(provider, id, &mut subtask.metadata, &created.key, tasks_path)?;
        info!(
            "Created {} ticket {} for subtask {id} under {parent_key}",
            provider.name(),
            created.key
        );
        Ok(SyncResult::success(created.key, SyncAction::Created))
    }

    /// Push a status change to the linked ticket. `id` is `"7"` or `"7.2"`.
    ///
    /// Only the stored link is consulted: an entity without one has nothing to
    /// update and succeeds without touching the provider.
    pub async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let outcome = self.propagate_status(id, status, tasks_path, project_root).await;
        settle(id, outcome)
    }

    async fn propagate_status(
        &self,
        id: &str,
        status: TaskStatus,
        tasks_path: &Path,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let provider = self.provider(project_root)?;
        let entity: EntityId = id.parse().map_err(SyncError::InvalidId)?;
        let tree = store::read_tasks(tasks_path)?;
        let metadata = tree
            .metadata(entity)
            .ok_or(StoreError::EntityNotFound(entity))?;

        let Some(key) = provider.get_ticket_id(metadata) else {
            debug!("Task {entity} has no ticket, no status to propagate");
            return Ok(SyncResult::skipped());
        };

        if !provider.update_ticket_status(&key, status, project_root).await? {
            let target = provider.map_status(status);
            warn!("{} ticket {key} cannot move to '{target}'", provider.name());
            return Ok(SyncResult {
                success: false,
                ticket_key: Some(key),
                error: Some(format!("No transition to '{target}' available")),
                action: SyncAction::Skipped,
            });
        }

        store::update_metadata(tasks_path, entity, |m| {
            m.last_status_update = Some(Utc::now());
        })?;
        info!("Moved {} ticket {key} to '{}'", provider.name(), provider.map_status(status));
        Ok(SyncResult::success(key, SyncAction::StatusUpdated))
    }

    /// Delete a remote ticket. A ticket that is already gone counts as deleted.
    pub async fn delete_ticket(
        &self,
        ticket_key: &str,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let outcome = self.remove_remote(ticket_key, project_root).await;
        settle(format!("ticket {ticket_key}"), outcome)
    }

    async fn remove_remote(&self, ticket_key: &str, project_root: &Path) -> Result<SyncResult, SyncError> {
        let provider = self.provider(project_root)?;
        if !provider.ticket_exists(ticket_key, project_root).await? {
            debug!("{} ticket {ticket_key} already gone", provider.name());
            return Ok(SyncResult::success(ticket_key, SyncAction::Skipped));
        }
        let action = if provider.delete_ticket(ticket_key, project_root).await? {
            info!("Deleted {} ticket {ticket_key}", provider.name());
            SyncAction::Deleted
        } else {
            SyncAction::Skipped
        };
        Ok(SyncResult::success(ticket_key, action))
    }

    /// Remote side of converting `old` (a subtask of `old_parent_id`) into the
    /// standalone `new_task`: cancel the old ticket, then create the new one.
    /// Neither step can stop the other.
    pub async fn sync_subtask_conversion(
        &self,
        old: &Subtask,
        old_parent_id: u32,
        new_task: &mut Task,
        tasks_path: &Path,
        project_root: &Path,
    ) -> ConversionSync {
        let old_id = EntityId::Subtask {
            parent: old_parent_id,
            id: old.id,
        };
        let cancelled = soften(old_id, self.cancel_ticket(&old.metadata, project_root).await);
        let created = soften(
            EntityId::Task(new_task.id),
            self.reconcile_task(new_task, None, tasks_path, project_root).await,
        );
        ConversionSync { cancelled, created }
    }

    async fn cancel_ticket(
        &self,
        metadata: &TicketMetadata,
        project_root: &Path,
    ) -> Result<SyncResult, SyncError> {
        let provider = self.provider(project_root)?;
        let Some(key) = provider.get_ticket_id(metadata) else {
            return Ok(SyncResult::skipped());
        };
        if provider
            .update_ticket_status(&key, TaskStatus::Cancelled, project_root)
            .await?
        {
            Ok(SyncResult::success(key, SyncAction::StatusUpdated))
        } else {
            Ok(SyncResult {
                success: false,
                ticket_key: Some(key),
                error: Some("No transition to cancelled available".into()),
                action: SyncAction::Skipped,
            })
        }
    }
}

/// Existing reference id, or a freshly generated one persisted immediately.
/// `None` means reference ids are disabled.
fn ensure_ref_id(
    id: EntityId,
    metadata: &mut TicketMetadata,
    generated: Option<String>,
    tasks_path: &Path,
) -> Result<Option<String>, SyncError> {
    if let Some(existing) = refid::get_ref_id(metadata) {
        return Ok(Some(existing.to_string()));
    }
    let Some(ref_id) = generated else {
        return Ok(None);
    };
    store::update_metadata(tasks_path, id, |m| refid::store_ref_id(m, &ref_id))?;
    refid::store_ref_id(metadata, &ref_id);
    debug!("Backfilled reference id {ref_id} for {id}");
    Ok(Some(ref_id))
}

async fn recover_link(
    provider: &dyn TicketingProvider,
    ref_id: &str,
    dead_key: Option<&str>,
    project_root: &Path,
) -> Result<Option<String>, SyncError> {
    let found = provider.find_ticket_by_ref_id(ref_id, project_root).await?;
    Ok(found.filter(|key| Some(key.as_str()) != dead_key))
}

/// Write the link to disk first, then mirror it into the caller's copy.
fn persist_link(
    provider: &dyn TicketingProvider,
    id: EntityId,
    metadata: &mut TicketMetadata,
    key: &str,
    tasks_path: &Path,
) -> Result<(), SyncError> {
    store::update_metadata(tasks_path, id, |m| provider.store_ticket_id(m, key)).map_err(|e| {
        warn!("Ticket {key} exists but linking it to {id} failed: {e}");
        e
    })?;
    provider.store_ticket_id(metadata, key);
    Ok(())
}
