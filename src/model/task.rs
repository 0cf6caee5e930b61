use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Review,
    Done,
    Deferred,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Deferred,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Closed statuses end the remote ticket's life (closed/resolved/removed).
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                let valid: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
                format!("Invalid status '{s}'. Expected one of: {}", valid.join(", "))
            })
    }
}

/// Ticketing metadata carried by every task and subtask.
///
/// Known keys are typed; anything else a previous tool version wrote is kept
/// in `extra` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ticket_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_update: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TicketMetadata {
    pub fn is_empty(&self) -> bool {
        self.ref_id.is_none()
            && self.remote_ticket_key.is_none()
            && self.last_status_update.is_none()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Sibling subtask ids within the same parent.
    #[serde(default)]
    pub dependencies: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<u32>,
    #[serde(default, skip_serializing_if = "TicketMetadata::is_empty")]
    pub metadata: TicketMetadata,
    /// Fields other tools keep on a subtask, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Set only on a task that was produced by detaching one of this parent's subtasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<u32>,
    #[serde(default, skip_serializing_if = "TicketMetadata::is_empty")]
    pub metadata: TicketMetadata,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    pub fn subtask(&self, id: u32) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: u32) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    /// `None` once `u32::MAX` is taken.
    pub fn next_subtask_id(&self) -> Option<u32> {
        self.subtasks.iter().map(|s| s.id).max().unwrap_or(0).checked_add(1)
    }
}

/// The whole `tasks.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTree {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskTree {
    /// Highest id plus one. Removing the last task frees its id (and with it
    /// its reference id) for the next task added.
    pub fn next_id(&self) -> Option<u32> {
        self.tasks.iter().map(|t| t.id).max().unwrap_or(0).checked_add(1)
    }

    pub fn task(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u32) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Metadata of the task or subtask named by `id`.
    pub fn metadata_mut(&mut self, id: EntityId) -> Option<&mut TicketMetadata> {
        match id {
            EntityId::Task(task_id) => self.task_mut(task_id).map(|t| &mut t.metadata),
            EntityId::Subtask { parent, id } => self
                .task_mut(parent)
                .and_then(|t| t.subtask_mut(id))
                .map(|s| &mut s.metadata),
        }
    }

    pub fn metadata(&self, id: EntityId) -> Option<&TicketMetadata> {
        match id {
            EntityId::Task(task_id) => self.task(task_id).map(|t| &t.metadata),
            EntityId::Subtask { parent, id } => self
                .task(parent)
                .and_then(|t| t.subtask(id))
                .map(|s| &s.metadata),
        }
    }
}

/// Address of a task (`"7"`) or a subtask (`"7.2"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityId {
    Task(u32),
    Subtask { parent: u32, id: u32 },
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Task(id) => write!(f, "{id}"),
            EntityId::Subtask { parent, id } => write!(f, "{parent}.{id}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Result<u32, String> {
            match part.trim().parse::<u32>() {
                Ok(0) | Err(_) => Err(format!("Invalid task id '{s}'")),
                Ok(n) => Ok(n),
            }
        };
        match s.trim().split_once('.') {
            Some((parent, id)) => Ok(EntityId::Subtask {
                parent: parse(parent)?,
                id: parse(id)?,
            }),
            None => Ok(EntityId::Task(parse(s)?)),
        }
    }
}
