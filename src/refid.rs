//! Reference ids: stable, provider-independent names for tasks (`US001`) and
//! subtasks (`T001-02`), used to find a remote ticket again when the stored
//! ticket key has been lost.

use crate::model::task::TicketMetadata;

/// Generates reference ids. Disabled when the ticketing integration is off,
/// in which case every call yields `None`.
#[derive(Debug, Clone, Copy)]
pub struct RefIdGenerator {
    enabled: bool,
}

impl RefIdGenerator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn task_ref_id(&self, task_id: u32) -> Option<String> {
        self.enabled.then(|| format_task_ref(task_id))
    }

    pub fn subtask_ref_id(&self, parent_id: u32, subtask_id: u32) -> Option<String> {
        self.enabled
            .then(|| format_subtask_ref(parent_id, subtask_id))
    }
}

fn format_task_ref(task_id: u32) -> String {
    format!("US{task_id:03}")
}

fn format_subtask_ref(parent_id: u32, subtask_id: u32) -> String {
    format!("T{parent_id:03}-{subtask_id:02}")
}

pub fn store_ref_id(metadata: &mut TicketMetadata, ref_id: &str) {
    metadata.ref_id = Some(ref_id.to_string());
}

pub fn get_ref_id(metadata: &TicketMetadata) -> Option<&str> {
    metadata.ref_id.as_deref().filter(|r| !r.is_empty())
}

/// Older titles embedded the id as `[US-001]`; subtask ids already contain a hyphen.
pub fn legacy_form(ref_id: &str) -> String {
    match ref_id.strip_prefix("US") {
        Some(digits) if digits.chars().all(|c| c.is_ascii_digit()) => format!("US-{digits}"),
        _ => ref_id.to_string(),
    }
}

/// Recover a reference id embedded in a ticket or task title.
///
/// Recognises a bracketed id anywhere (`[US-001] Login`, `Login [T001-02]`) and
/// a leading `US001:` prefix. The result is always in canonical form.
pub fn extract_ref_id(title: &str) -> Option<String> {
    let mut rest = title;
    while let Some(start) = rest.find('[') {
        let after = &rest[start + 1..];
        let Some(end) = after.find(']') else {
            break;
        };
        if let Some(ref_id) = parse_ref(&after[..end]) {
            return Some(ref_id);
        }
        rest = &after[end + 1..];
    }

    let (prefix, _) = title.trim_start().split_once(':')?;
    parse_ref(prefix)
}

fn parse_ref(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    let digits = |s: &str| -> Option<u32> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    };

    if let Some(rest) = candidate.strip_prefix("US") {
        let id = digits(rest.strip_prefix('-').unwrap_or(rest))?;
        return Some(format_task_ref(id));
    }
    if let Some(rest) = candidate.strip_prefix('T') {
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        let (parent, sub) = rest.split_once('-')?;
        return Some(format_subtask_ref(digits(parent)?, digits(sub)?));
    }
    None
}
