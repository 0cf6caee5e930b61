//! Ticketing reconciliation between the local task tree and the active provider.
//!
//! [`SyncService`] decides per entity whether a remote ticket has to be created,
//! recovered, updated or deleted, writes the resulting ticket key back into the
//! entity's metadata, and reports the outcome as a [`SyncResult`]. Expected
//! conditions (integration off, no ticket yet, provider failures) never escape
//! as errors; only bad input and an unusable tasks file do.

mod batch;
mod entity;

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::Path;

use log::{debug, info, warn};

pub use batch::{SyncFailure, SyncSummary};
pub use entity::ConversionSync;

use crate::config::TicketingConfig;
use crate::model::task::TicketMetadata;
use crate::providers::{self, ProviderError, TicketingProvider};
use crate::refid::RefIdGenerator;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Ticketing service not available")]
    Unavailable,

    #[error("Parent task has no ticket")]
    MissingParentTicket { parent_id: u32 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid task {id}: {reason}")]
    InvalidEntity { id: String, reason: String },

    #[error("{0}")]
    InvalidId(String),
}

impl SyncError {
    /// Expected, environmental conditions that are reported rather than raised.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            SyncError::Unavailable | SyncError::MissingParentTicket { .. } | SyncError::Provider(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// A new remote ticket was created.
    Created,
    /// A lost link was recovered through the reference id.
    Updated,
    /// The existing link was reused.
    Unchanged,
    StatusUpdated,
    Deleted,
    /// Nothing to do, or nothing could be done.
    Skipped,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Unchanged => "unchanged",
            SyncAction::StatusUpdated => "status-updated",
            SyncAction::Deleted => "deleted",
            SyncAction::Skipped => "skipped",
        }
    }
}

/// Uniform outcome of every sync entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub success: bool,
    pub ticket_key: Option<String>,
    pub error: Option<String>,
    pub action: SyncAction,
}

impl SyncResult {
    pub fn success(ticket_key: impl Into<String>, action: SyncAction) -> Self {
        Self {
            success: true,
            ticket_key: Some(ticket_key.into()),
            error: None,
            action,
        }
    }

    /// Success with no remote involvement.
    pub fn skipped() -> Self {
        Self {
            success: true,
            ticket_key: None,
            error: None,
            action: SyncAction::Skipped,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            ticket_key: None,
            error: Some(error.to_string()),
            action: SyncAction::Skipped,
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.ticket_key, &self.error) {
            (_, Some(error)) => write!(f, "failed: {error}"),
            (Some(key), None) => write!(f, "{} ({key})", self.action.as_str()),
            (None, None) => f.write_str(self.action.as_str()),
        }
    }
}

/// Turn soft errors into a failed [`SyncResult`], logging each at the level
/// its category deserves. Hard errors pass through.
fn settle(
    entity: impl fmt::Display,
    outcome: Result<SyncResult, SyncError>,
) -> Result<SyncResult, SyncError> {
    match outcome {
        Ok(result) => Ok(result),
        Err(e) if e.is_soft() => {
            match &e {
                SyncError::Unavailable => debug!("Skipping ticket sync for {entity}: {e}"),
                SyncError::MissingParentTicket { parent_id } => {
                    info!("Cannot sync {entity}: task {parent_id} has no ticket")
                }
                _ => warn!("Ticket sync for {entity} failed: {e}"),
            }
            Ok(SyncResult::failure(e))
        }
        Err(e) => Err(e),
    }
}

/// Like [`settle`] but never fails: hard errors become failed results too.
fn soften(entity: impl fmt::Display, outcome: Result<SyncResult, SyncError>) -> SyncResult {
    let entity = entity.to_string();
    settle(&entity, outcome).unwrap_or_else(|e| {
        warn!("Ticket sync for {entity} failed: {e}");
        SyncResult::failure(e)
    })
}

/// The one ticketing service of a process. Built once at startup and passed by
/// reference to every task mutation.
pub struct SyncService {
    provider: Option<Box<dyn TicketingProvider>>,
    ref_ids: RefIdGenerator,
}

impl SyncService {
    pub fn new(config: &TicketingConfig) -> Self {
        let provider = providers::create_provider(config);
        if config.enabled && provider.is_none() {
            warn!(
                "Ticketing is enabled for {:?} but its config section is missing",
                config.system
            );
        }
        Self {
            provider,
            ref_ids: RefIdGenerator::new(config.enabled),
        }
    }

    pub fn with_provider(provider: Box<dyn TicketingProvider>) -> Self {
        Self {
            provider: Some(provider),
            ref_ids: RefIdGenerator::new(true),
        }
    }

    pub fn disabled() -> Self {
        Self {
            provider: None,
            ref_ids: RefIdGenerator::new(false),
        }
    }

    pub fn ref_ids(&self) -> RefIdGenerator {
        self.ref_ids
    }

    /// The entity's linked ticket, read through the provider's accessor.
    pub fn ticket_key(&self, metadata: &TicketMetadata) -> Option<String> {
        self.provider.as_deref()?.get_ticket_id(metadata)
    }

    pub fn is_available(&self, project_root: &Path) -> bool {
        self.provider(project_root).is_ok()
    }

    fn provider(&self, project_root: &Path) -> Result<&dyn TicketingProvider, SyncError> {
        match self.provider.as_deref() {
            Some(provider) if provider.is_configured(project_root) => Ok(provider),
            _ => Err(SyncError::Unavailable),
        }
    }
}
