pub mod azdevops;
pub mod github;
pub mod jira;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{TicketingConfig, TicketingSystem};
use crate::model::task::{Subtask, Task, TaskStatus, TicketMetadata};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Command failed: {0}")]
    Command(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidData(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Everything a provider needs to render a ticket for a task or subtask.
#[derive(Debug, Clone)]
pub struct TicketData {
    pub ref_id: String,
    pub title: String,
    pub description: String,
    pub details: String,
    pub test_strategy: Option<String>,
    pub priority: Option<String>,
    pub status: TaskStatus,
    /// Set for subtasks: the parent task's title.
    pub parent_title: Option<String>,
}

impl TicketData {
    pub fn from_task(task: &Task, ref_id: &str) -> Self {
        Self {
            ref_id: ref_id.to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            details: task.details.clone(),
            test_strategy: task.test_strategy.clone(),
            priority: task.priority.clone(),
            status: task.status,
            parent_title: None,
        }
    }

    pub fn from_subtask(subtask: &Subtask, parent: &Task, ref_id: &str) -> Self {
        Self {
            ref_id: ref_id.to_string(),
            title: subtask.title.clone(),
            description: subtask.description.clone(),
            details: subtask.details.clone(),
            test_strategy: subtask.test_strategy.clone(),
            priority: parent.priority.clone(),
            status: subtask.status,
            parent_title: Some(parent.title.clone()),
        }
    }

    /// Markdown sections shared by every provider's ticket body.
    pub fn body_sections(&self) -> Vec<(&'static str, &str)> {
        let mut sections = Vec::new();
        if !self.description.trim().is_empty() {
            sections.push(("Description", self.description.as_str()));
        }
        if !self.details.trim().is_empty() {
            sections.push(("Implementation Details", self.details.as_str()));
        }
        if let Some(strategy) = self.test_strategy.as_deref().filter(|s| !s.trim().is_empty()) {
            sections.push(("Test Strategy", strategy));
        }
        sections
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTicket {
    /// Human-facing key used for every later call (`PROJ-12`, `42`).
    pub key: String,
    /// Provider-internal id or URL.
    pub id: String,
}

/// Label/tag/body marker that carries a reference id on the remote ticket.
pub fn ref_marker(ref_id: &str) -> String {
    format!("ref-{ref_id}")
}

#[async_trait]
pub trait TicketingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Credentials present and syntactically valid. Performs no network calls.
    fn is_configured(&self, project_root: &Path) -> bool;

    /// Create a top-level ticket. Two calls create two tickets.
    async fn create_story(
        &self,
        ticket: &TicketData,
        project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError>;

    /// Create a ticket under `parent_key`, natively nested where the backend allows it.
    async fn create_task(
        &self,
        ticket: &TicketData,
        parent_key: &str,
        project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError>;

    fn get_ticket_id(&self, metadata: &TicketMetadata) -> Option<String> {
        metadata
            .remote_ticket_key
            .clone()
            .filter(|key| !key.trim().is_empty())
    }

    fn store_ticket_id(&self, metadata: &mut TicketMetadata, ticket_key: &str) {
        metadata.remote_ticket_key = Some(ticket_key.to_string());
    }

    /// `Ok(None)` when nothing matches; only transport/auth problems are errors.
    async fn find_ticket_by_ref_id(
        &self,
        ref_id: &str,
        project_root: &Path,
    ) -> Result<Option<String>, ProviderError>;

    /// `Ok(false)` when the ticket was deleted remotely.
    async fn ticket_exists(&self, ticket_key: &str, project_root: &Path) -> Result<bool, ProviderError>;

    /// `Ok(false)` when the backend offers no way to reach the target state.
    async fn update_ticket_status(
        &self,
        ticket_key: &str,
        status: TaskStatus,
        project_root: &Path,
    ) -> Result<bool, ProviderError>;

    async fn delete_ticket(&self, ticket_key: &str, project_root: &Path) -> Result<bool, ProviderError>;

    /// Remote state name for a local status.
    fn map_status(&self, status: TaskStatus) -> &'static str;
}

#[cfg(test)]
pub mod mock;


/// Build the one active provider, or `None` when the integration is off or
/// the selected system has no config section.
pub fn create_provider(config: &TicketingConfig) -> Option<Box<dyn TicketingProvider>> {
    if !config.enabled {
        return None;
    }
    let client = http_client(Duration::from_secs(config.request_timeout_secs));

    match config.system {
        TicketingSystem::Jira => config.jira.as_ref().map(|cfg| {
            Box::new(jira::JiraProvider::new(cfg.clone(), client)) as Box<dyn TicketingProvider>
        }),
        TicketingSystem::GitHub => Some(Box::new(github::GitHubProvider::new(
            config.github.clone().unwrap_or_default(),
        ))),
        TicketingSystem::AzureDevOps => config.azdevops.as_ref().map(|cfg| {
            Box::new(azdevops::AzDevOpsProvider::new(cfg.clone(), client)) as Box<dyn TicketingProvider>
        }),
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a non-2xx response onto the provider error taxonomy.
pub(crate) async fn check_response(
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message: String = body.chars().take(300).collect();
    Err(match status.as_u16() {
        401 | 403 => ProviderError::Auth(message),
        404 => ProviderError::NotFound(message),
        429 => ProviderError::RateLimited(message),
        code => ProviderError::Api {
            status: code,
            message,
        },
    })
}
