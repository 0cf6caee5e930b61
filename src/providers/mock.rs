use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CreatedTicket, ProviderError, TicketData, TicketingProvider};
use crate::model::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateStory(String),
    CreateTask { ref_id: String, parent: String },
    Find(String),
    Exists(String),
    UpdateStatus(String, TaskStatus),
    Delete(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    created: u32,
    found: HashMap<String, String>,
    dead: HashSet<String>,
    fail_create: HashSet<String>,
    fail_status: bool,
    fail_delete: bool,
    no_transition: bool,
    unconfigured: bool,
}

/// A provider that records every call and hands out `PROJ-<n>` keys.
/// Clones share state, so a test can keep one and give the other away.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// `find_ticket_by_ref_id(ref_id)` returns `key`.
    pub fn with_found(self, ref_id: &str, key: &str) -> Self {
        self.with(|s| {
            s.found.insert(ref_id.into(), key.into());
        })
    }

    /// `ticket_exists(key)` returns false.
    pub fn with_dead(self, key: &str) -> Self {
        self.with(|s| {
            s.dead.insert(key.into());
        })
    }

    /// Creating the ticket for `ref_id` fails with a network error.
    pub fn failing_create(self, ref_id: &str) -> Self {
        self.with(|s| {
            s.fail_create.insert(ref_id.into());
        })
    }

    pub fn failing_status(self) -> Self {
        self.with(|s| s.fail_status = true)
    }

    pub fn failing_delete(self) -> Self {
        self.with(|s| s.fail_delete = true)
    }

    pub fn without_transitions(self) -> Self {
        self.with(|s| s.no_transition = true)
    }

    pub fn unconfigured(self) -> Self {
        self.with(|s| s.unconfigured = true)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateStory(_) | Call::CreateTask { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn create(&self, ref_id: &str) -> Result<CreatedTicket, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create.contains(ref_id) {
            return Err(ProviderError::Network(format!("connection reset creating {ref_id}")));
        }
        state.created += 1;
        let key = format!("PROJ-{}", state.created);
        Ok(CreatedTicket {
            id: format!("1000{}", state.created),
            key,
        })
    }
}

#[async_trait]
impl TicketingProvider for MockProvider {
    fn name(&self) -> &str {
        "Mock"
    }

    fn is_configured(&self, _project_root: &Path) -> bool {
        !self.state.lock().unwrap().unconfigured
    }

    async fn create_story(
        &self,
        ticket: &TicketData,
        _project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        self.record(Call::CreateStory(ticket.ref_id.clone()));
        self.create(&ticket.ref_id)
    }

    async fn create_task(
        &self,
        ticket: &TicketData,
        parent_key: &str,
        _project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        self.record(Call::CreateTask {
            ref_id: ticket.ref_id.clone(),
            parent: parent_key.into(),
        });
        self.create(&ticket.ref_id)
    }

    async fn find_ticket_by_ref_id(
        &self,
        ref_id: &str,
        _project_root: &Path,
    ) -> Result<Option<String>, ProviderError> {
        self.record(Call::Find(ref_id.into()));
        Ok(self.state.lock().unwrap().found.get(ref_id).cloned())
    }

    async fn ticket_exists(&self, ticket_key: &str, _project_root: &Path) -> Result<bool, ProviderError> {
        self.record(Call::Exists(ticket_key.into()));
        Ok(!self.state.lock().unwrap().dead.contains(ticket_key))
    }

    async fn update_ticket_status(
        &self,
        ticket_key: &str,
        status: TaskStatus,
        _project_root: &Path,
    ) -> Result<bool, ProviderError> {
        self.record(Call::UpdateStatus(ticket_key.into(), status));
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(ProviderError::Api {
                status: 500,
                message: "transition service unavailable".into(),
            });
        }
        Ok(!state.no_transition)
    }

    async fn delete_ticket(&self, ticket_key: &str, _project_root: &Path) -> Result<bool, ProviderError> {
        self.record(Call::Delete(ticket_key.into()));
        if self.state.lock().unwrap().fail_delete {
            return Err(ProviderError::Auth("token lacks delete permission".into()));
        }
        Ok(true)
    }

    fn map_status(&self, status: TaskStatus) -> &'static str {
        status.as_str()
    }
}
