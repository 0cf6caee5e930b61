use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ref_marker, CreatedTicket, ProviderError, TicketData, TicketingProvider};
use crate::config::GitHubConfig;
use crate::model::task::TaskStatus;
use crate::refid::{extract_ref_id, legacy_form};

/// GitHub Issues through the `gh` CLI, run inside the project root so that
/// an unconfigured repo resolves to the checkout's origin.
pub struct GitHubProvider {
    repo: Option<String>,
}

impl GitHubProvider {
    pub fn new(config: GitHubConfig) -> Self {
        Self {
            repo: config.repo.filter(|r| !r.trim().is_empty()),
        }
    }

    fn repo_args(&self) -> Vec<String> {
        match &self.repo {
            Some(repo) => vec!["--repo".to_string(), repo.clone()],
            None => Vec::new(),
        }
    }

    async fn gh(&self, args: Vec<String>, project_root: &Path) -> Result<Vec<u8>, ProviderError> {
        let output = tokio::process::Command::new("gh")
            .args(&args)
            .args(self.repo_args())
            .current_dir(project_root)
            .output()
            .await
            .map_err(|e| ProviderError::Command(format!("Failed to run gh CLI: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&args, stderr.trim()));
        }
        Ok(output.stdout)
    }

    async fn search(&self, query: String, project_root: &Path) -> Result<Vec<GhIssue>, ProviderError> {
        let stdout = self
            .gh(
                vec![
                    "issue".into(),
                    "list".into(),
                    "--state".into(),
                    "all".into(),
                    "--search".into(),
                    query,
                    "--json".into(),
                    "number,title,body".into(),
                    "--limit".into(),
                    "20".into(),
                ],
                project_root,
            )
            .await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| ProviderError::InvalidData(format!("Failed to parse gh output: {e}")))
    }

    async fn create_issue(
        &self,
        ticket: &TicketData,
        parent_key: Option<&str>,
        project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        let stdout = self
            .gh(
                vec![
                    "issue".into(),
                    "create".into(),
                    "--title".into(),
                    ticket.title.clone(),
                    "--body".into(),
                    issue_body(ticket, parent_key),
                ],
                project_root,
            )
            .await?;

        // gh prints the new issue URL, e.g. https://github.com/owner/repo/issues/42
        let url = String::from_utf8_lossy(&stdout).trim().to_string();
        let number = issue_number_from_url(&url)
            .ok_or_else(|| ProviderError::InvalidData(format!("Unexpected gh issue create output: {url}")))?;
        Ok(CreatedTicket { key: number, id: url })
    }
}

#[derive(Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
}

fn body_marker(ref_id: &str) -> String {
    format!("<!-- taskbridge:{} -->", ref_marker(ref_id))
}

fn issue_body(ticket: &TicketData, parent_key: Option<&str>) -> String {
    let mut body = String::new();
    if let Some(parent) = parent_key {
        let title = ticket.parent_title.as_deref().unwrap_or("parent task");
        body.push_str(&format!("Part of #{parent} ({title})\n\n"));
    }
    for (heading, text) in ticket.body_sections() {
        body.push_str(&format!("## {heading}\n\n{}\n\n", text.trim()));
    }
    body.push_str(&format!("Reference: `{}`\n", ticket.ref_id));
    body.push_str(&body_marker(&ticket.ref_id));
    body
}

/// Body marker search first, then the legacy `[US-001]` title.
fn ref_id_queries(ref_id: &str) -> [String; 2] {
    [
        format!("\"{}\" in:body", ref_marker(ref_id)),
        format!("\"{}\" in:title", legacy_form(ref_id)),
    ]
}

/// GitHub search tokenises, so `ref-US001` also hits `ref-US0012`; the full
/// marker has to be in the body.
fn body_match(issues: Vec<GhIssue>, ref_id: &str) -> Option<String> {
    let marker = body_marker(ref_id);
    issues
        .into_iter()
        .find(|issue| issue.body.as_deref().is_some_and(|b| b.contains(&marker)))
        .map(|issue| issue.number.to_string())
}

fn title_match(issues: Vec<GhIssue>, ref_id: &str) -> Option<String> {
    issues
        .into_iter()
        .find(|issue| extract_ref_id(&issue.title).is_some_and(|found| found == ref_id))
        .map(|issue| issue.number.to_string())
}

fn issue_number_from_url(url: &str) -> Option<String> {
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    (!last.is_empty() && last.chars().all(|c| c.is_ascii_digit())).then(|| last.to_string())
}

fn classify_failure(args: &[String], stderr: &str) -> ProviderError {
    let lower = stderr.to_lowercase();
    let command = args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
    if lower.contains("could not resolve to an issue") || lower.contains("not found") {
        ProviderError::NotFound(stderr.to_string())
    } else if lower.contains("gh auth login") || lower.contains("authentication") {
        ProviderError::Auth(stderr.to_string())
    } else if lower.contains("rate limit") {
        ProviderError::RateLimited(stderr.to_string())
    } else {
        ProviderError::Command(format!("gh {command} failed: {stderr}"))
    }
}

#[async_trait]
impl TicketingProvider for GitHubProvider {
    fn name(&self) -> &str {
        "GitHub"
    }

    fn is_configured(&self, project_root: &Path) -> bool {
        match &self.repo {
            Some(repo) => matches!(
                repo.split_once('/'),
                Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
            ),
            None => project_root.join(".git").exists(),
        }
    }

    async fn create_story(
        &self,
        ticket: &TicketData,
        project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        self.create_issue(ticket, None, project_root).await
    }

    /// Issues have no native nesting; the parent is referenced from the body.
    async fn create_task(
        &self,
        ticket: &TicketData,
        parent_key: &str,
        project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        self.create_issue(ticket, Some(parent_key), project_root).await
    }

    async fn find_ticket_by_ref_id(
        &self,
        ref_id: &str,
        project_root: &Path,
    ) -> Result<Option<String>, ProviderError> {
        let [by_body, by_title] = ref_id_queries(ref_id);
        if let Some(number) = body_match(self.search(by_body, project_root).await?, ref_id) {
            return Ok(Some(number));
        }
        Ok(title_match(self.search(by_title, project_root).await?, ref_id))
    }

    async fn ticket_exists(&self, ticket_key: &str, project_root: &Path) -> Result<bool, ProviderError> {
        let args = vec![
            "issue".into(),
            "view".into(),
            ticket_key.to_string(),
            "--json".into(),
            "number".into(),
        ];
        match self.gh(args, project_root).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn update_ticket_status(
        &self,
        ticket_key: &str,
        status: TaskStatus,
        project_root: &Path,
    ) -> Result<bool, ProviderError> {
        let mut args: Vec<String> = match self.map_status(status) {
            "closed" => vec!["issue".into(), "close".into(), ticket_key.to_string()],
            _ => vec!["issue".into(), "reopen".into(), ticket_key.to_string()],
        };
        if status == TaskStatus::Cancelled {
            args.extend(["--reason".to_string(), "not planned".to_string()]);
        }
        self.gh(args, project_root).await?;
        Ok(true)
    }

    async fn delete_ticket(&self, ticket_key: &str, project_root: &Path) -> Result<bool, ProviderError> {
        let args = vec![
            "issue".into(),
            "delete".into(),
            ticket_key.to_string(),
            "--yes".into(),
        ];
        match self.gh(args, project_root).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn map_status(&self, status: TaskStatus) -> &'static str {
        if status.is_closed() {
            "closed"
        } else {
            "open"
        }
    }
}
