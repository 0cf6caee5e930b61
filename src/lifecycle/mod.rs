//! Task mutations with best-effort ticket sync.
//!
//! Every operation here changes and saves the tasks file first. Only then is
//! the ticketing service consulted, and nothing it reports can turn a
//! successful local change into a failure: problems end up as warnings on the
//! returned [`Mutation`].


use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::model::task::{EntityId, Subtask, Task, TaskStatus, TaskTree, TicketMetadata};
use crate::refid::{self, RefIdGenerator};
use crate::store::{self, StoreError};
use crate::sync::{SyncError, SyncResult, SyncService};

/// Fields for a new task or subtask.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub details: String,
    pub test_strategy: Option<String>,
    pub priority: Option<String>,
    pub dependencies: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketingNote {
    pub entity: String,
    pub result: SyncResult,
}

/// Outcome of a local mutation plus whatever the ticketing side reported.
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub value: T,
    pub ticketing: Vec<TicketingNote>,
    pub warnings: Vec<String>,
}

impl<T> Mutation<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            ticketing: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn absorb(&mut self, entity: impl ToString, outcome: Result<SyncResult, SyncError>) {
        let entity = entity.to_string();
        let result = outcome.unwrap_or_else(|e| {
            warn!("Ticket sync for {entity} failed: {e}");
            SyncResult::failure(e)
        });
        if let Some(error) = result.error.as_deref().filter(|_| !result.success) {
            self.warnings.push(format!("Ticketing for {entity}: {error}"));
        }
        self.ticketing.push(TicketingNote { entity, result });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub id: EntityId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[derive(Debug, Clone)]
pub enum SubtaskRemoval {
    Deleted(Subtask),
    Converted(Task),
}

fn load(tasks_path: &Path) -> Result<TaskTree> {
    store::read_tasks(tasks_path).context("Failed to load tasks")
}

/// A missing file is an empty project: the first `add-task` creates it.
fn load_or_new(tasks_path: &Path) -> Result<TaskTree> {
    match store::read_tasks(tasks_path) {
        Err(StoreError::Missing(_)) => Ok(TaskTree::default()),
        other => other.context("Failed to load tasks"),
    }
}

fn save(tasks_path: &Path, tree: &TaskTree) -> Result<()> {
    store::write_tasks(tasks_path, tree).context("Failed to save tasks")
}

fn check_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Task title cannot be empty");
    }
    Ok(())
}

/// Append a task with the next free id and open a ticket for it.
pub async fn add_task(
    sync: &SyncService,
    tasks_path: &Path,
    project_root: &Path,
    new: NewTask,
) -> Result<Mutation<Task>> {
    check_title(&new.title)?;
    let mut tree = load_or_new(tasks_path)?;
    for dep in &new.dependencies {
        if tree.task(*dep).is_none() {
            bail!("Dependency task {dep} does not exist");
        }
    }

    let id = tree.next_id().context("No task ids left")?;
    let mut task = Task {
        id,
        title: new.title,
        description: new.description,
        details: new.details,
        status: TaskStatus::Pending,
        dependencies: new.dependencies,
        priority: new.priority,
        test_strategy: new.test_strategy,
        subtasks: Vec::new(),
        parent_task_id: None,
        metadata: TicketMetadata {
            ref_id: sync.ref_ids().task_ref_id(id),
            ..TicketMetadata::default()
        },
        extra: Default::default(),
    };
    tree.tasks.push(task.clone());
    save(tasks_path, &tree)?;
    info!("Added task {id}: {}", task.title);

    let mut mutation = Mutation::new(task.clone());
    if sync.is_available(project_root) {
        let outcome = sync.sync_task(&mut task, tasks_path, project_root).await;
        mutation.absorb(id, outcome);
        mutation.value = task;
    }
    Ok(mutation)
}

/// Append a subtask to `parent_id` and open a ticket under the parent's ticket.
pub async fn add_subtask(
    sync: &SyncService,
    tasks_path: &Path,
    project_root: &Path,
    parent_id: u32,
    new: NewTask,
) -> Result<Mutation<Subtask>> {
    check_title(&new.title)?;
    let mut tree = load(tasks_path)?;
    let parent = tree
        .task_mut(parent_id)
        .with_context(|| format!("Parent task {parent_id} not found"))?;
    for dep in &new.dependencies {
        if parent.subtask(*dep).is_none() {
            bail!("Dependency subtask {parent_id}.{dep} does not exist");
        }
    }

    let id = parent
        .next_subtask_id()
        .with_context(|| format!("No subtask ids left under task {parent_id}"))?;
    let mut subtask = Subtask {
        id,
        title: new.title,
        description: new.description,
        details: new.details,
        status: TaskStatus::Pending,
        dependencies: new.dependencies,
        test_strategy: new.test_strategy,
        parent_task_id: Some(parent_id),
        metadata: TicketMetadata {
            ref_id: sync.ref_ids().subtask_ref_id(parent_id, id),
            ..TicketMetadata::default()
        },
        extra: Default::default(),
    };
    parent.subtasks.push(subtask.clone());
    let parent = parent.clone();
    save(tasks_path, &tree)?;
    info!("Added subtask {parent_id}.{id}: {}", subtask.title);

    let mut mutation = Mutation::new(subtask.clone());
    if sync.is_available(project_root) {
        let outcome = sync
            .sync_subtask(&mut subtask, &parent, tasks_path, project_root)
            .await;
        mutation.absorb(format!("{parent_id}.{id}"), outcome);
        mutation.value = subtask;
    }
    Ok(mutation)
}

/// Set the status of one or more comma-separated ids (`"3,4.1"`).
///
/// Marking a task done marks all of its subtasks done as well; every changed
/// entity has its ticket moved accordingly.
pub async fn set_task_status(
    sync: &SyncService,
    tasks_path: &Path,
    project_root: &Path,
    ids: &str,
    status: TaskStatus,
) -> Result<Mutation<Vec<StatusChange>>> {
    let targets = ids
        .split(',')
        .map(|raw| raw.parse::<EntityId>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    let mut tree = load(tasks_path)?;
    let mut changes = Vec::new();
    for target in &targets {
        match *target {
            EntityId::Task(task_id) => {
                let task = tree
                    .task_mut(task_id)
                    .with_context(|| format!("Task {task_id} not found"))?;
                changes.push(StatusChange {
                    id: *target,
                    from: task.status,
                    to: status,
                });
                task.status = status;
                if status == TaskStatus::Done {
                    for subtask in task.subtasks.iter_mut().filter(|s| s.status != TaskStatus::Done) {
                        changes.push(StatusChange {
                            id: EntityId::Subtask {
                                parent: task_id,
                                id: subtask.id,
                            },
                            from: subtask.status,
                            to: status,
                        });
                        subtask.status = status;
                    }
                }
            }
            EntityId::Subtask { parent, id } => {
                let subtask = tree
                    .task_mut(parent)
                    .and_then(|t| t.subtask_mut(id))
                    .with_context(|| format!("Subtask {parent}.{id} not found"))?;
                changes.push(StatusChange {
                    id: *target,
                    from: subtask.status,
                    to: status,
                });
                subtask.status = status;
            }
        }
    }
    save(tasks_path, &tree)?;
    for change in &changes {
        info!("Task {} status: {} -> {}", change.id, change.from, change.to);
    }

    let mut mutation = Mutation::new(changes);
    if sync.is_available(project_root) {
        let ids: Vec<EntityId> = mutation.value.iter().map(|c| c.id).collect();
        for id in ids {
            let outcome = sync
                .update_task_status(&id.to_string(), status, tasks_path, project_root)
                .await;
            mutation.absorb(id, outcome);
        }
    }
    Ok(mutation)
}

/// Remove a task, drop it from other tasks' dependencies and delete its tickets.
pub async fn remove_task(
    sync: &SyncService,
    tasks_path: &Path,
    project_root: &Path,
    task_id: u32,
) -> Result<Mutation<Task>> {
    let mut tree = load(tasks_path)?;
    let index = tree
        .tasks
        .iter()
        .position(|t| t.id == task_id)
        .with_context(|| format!("Task {task_id} not found"))?;
    let removed = tree.tasks.remove(index);
    for task in &mut tree.tasks {
        task.dependencies.retain(|dep| *dep != task_id);
    }
    save(tasks_path, &tree)?;
    info!("Removed task {task_id} with {} subtasks", removed.subtasks.len());

    let mut mutation = Mutation::new(removed);
    if sync.is_available(project_root) {
        let mut keys: Vec<(String, String)> = mutation
            .value
            .subtasks
            .iter()
            .filter_map(|s| {
                let key = sync.ticket_key(&s.metadata)?;
                Some((format!("{task_id}.{}", s.id), key))
            })
            .collect();
        if let Some(key) = sync.ticket_key(&mutation.value.metadata) {
            keys.push((task_id.to_string(), key));
        }
        for (entity, key) in keys {
            let outcome = sync.delete_ticket(&key, project_root).await;
            mutation.absorb(entity, outcome);
        }
    }
    Ok(mutation)
}

/// Remove subtask `"<parent>.<id>"`. With `convert` it becomes a standalone
/// task instead: the old ticket is cancelled and a new one is opened.
pub async fn remove_subtask(
    sync: &SyncService,
    tasks_path: &Path,
    project_root: &Path,
    id: &str,
    convert: bool,
) -> Result<Mutation<SubtaskRemoval>> {
    let EntityId::Subtask { parent: parent_id, id: subtask_id } =
        id.parse::<EntityId>().map_err(anyhow::Error::msg)?
    else {
        bail!("Expected a subtask id like 3.1, got '{id}'");
    };

    let mut tree = load(tasks_path)?;
    let parent = tree
        .task_mut(parent_id)
        .with_context(|| format!("Parent task {parent_id} not found"))?;
    let index = parent
        .subtasks
        .iter()
        .position(|s| s.id == subtask_id)
        .with_context(|| format!("Subtask {id} not found"))?;
    let removed = parent.subtasks.remove(index);
    for sibling in &mut parent.subtasks {
        sibling.dependencies.retain(|dep| *dep != subtask_id);
    }
    let parent_priority = parent.priority.clone();

    if !convert {
        save(tasks_path, &tree)?;
        info!("Removed subtask {id}");
        let key = sync.ticket_key(&removed.metadata);
        let mut mutation = Mutation::new(SubtaskRemoval::Deleted(removed));
        if let Some(key) = key.filter(|_| sync.is_available(project_root)) {
            let outcome = sync.delete_ticket(&key, project_root).await;
            mutation.absorb(id, outcome);
        }
        return Ok(mutation);
    }

    let new_id = tree.next_id().context("No task ids left")?;
    let mut task = Task {
        id: new_id,
        title: removed.title.clone(),
        description: removed.description.clone(),
        details: removed.details.clone(),
        status: removed.status,
        dependencies: vec![parent_id],
        priority: parent_priority,
        test_strategy: removed.test_strategy.clone(),
        subtasks: Vec::new(),
        parent_task_id: Some(parent_id),
        metadata: TicketMetadata {
            ref_id: sync.ref_ids().task_ref_id(new_id),
            ..TicketMetadata::default()
        },
        extra: Default::default(),
    };
    tree.tasks.push(task.clone());
    save(tasks_path, &tree)?;
    info!("Converted subtask {id} into task {new_id}");

    let mut mutation = Mutation::new(SubtaskRemoval::Converted(task.clone()));
    if sync.is_available(project_root) {
        let conversion = sync
            .sync_subtask_conversion(&removed, parent_id, &mut task, tasks_path, project_root)
            .await;
        mutation.absorb(id, Ok(conversion.cancelled));
        mutation.absorb(new_id, Ok(conversion.created));
        mutation.value = SubtaskRemoval::Converted(task);
    }
    Ok(mutation)
}

/// Give every task and subtask without a reference id one: the legacy id in
/// its title if there is one, a generated id otherwise. Returns how many were
/// assigned.
pub fn backfill_ref_ids(ref_ids: RefIdGenerator, tasks_path: &Path) -> Result<usize> {
    if !ref_ids.is_enabled() {
        bail!("Ticketing integration is disabled; reference ids are not generated");
    }
    let mut tree = load(tasks_path)?;
    let mut assigned = 0;

    for task in &mut tree.tasks {
        if refid::get_ref_id(&task.metadata).is_none() {
            let ref_id = refid::extract_ref_id(&task.title).or_else(|| ref_ids.task_ref_id(task.id));
            if let Some(ref_id) = ref_id {
                refid::store_ref_id(&mut task.metadata, &ref_id);
                assigned += 1;
            }
        }
        let parent_id = task.id;
        for subtask in &mut task.subtasks {
            if refid::get_ref_id(&subtask.metadata).is_some() {
                continue;
            }
            let ref_id = refid::extract_ref_id(&subtask.title)
                .or_else(|| ref_ids.subtask_ref_id(parent_id, subtask.id));
            if let Some(ref_id) = ref_id {
                refid::store_ref_id(&mut subtask.metadata, &ref_id);
                assigned += 1;
            }
        }
    }

    if assigned > 0 {
        save(tasks_path, &tree)?;
    }
    info!("Assigned {assigned} reference ids");
    Ok(assigned)
}
