use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{check_response, ref_marker, CreatedTicket, ProviderError, TicketData, TicketingProvider};
use crate::config::JiraConfig;
use crate::model::task::TaskStatus;
use crate::refid::{extract_ref_id, legacy_form};
use crate::util::adf;

pub struct JiraProvider {
    config: JiraConfig,
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl JiraProvider {
    pub fn new(config: JiraConfig, client: reqwest::Client) -> Self {
        let creds = format!("{}:{}", config.email, config.api_token);
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        let base_url = if config.domain.contains('.') {
            format!("https://{}", config.domain.trim_end_matches('/'))
        } else {
            format!("https://{}.atlassian.net", config.domain)
        };
        Self {
            config,
            base_url,
            auth_header: format!("Basic {encoded}"),
            client,
        }
    }

    fn issue_fields(&self, ticket: &TicketData, issue_type: &str, parent_key: Option<&str>) -> Value {
        let footer = format!("Reference: {}", ticket.ref_id);
        let mut fields = json!({
            "project": { "key": self.config.project_key },
            "summary": ticket.title,
            "description": adf::document(&ticket.body_sections(), Some(&footer)),
            "issuetype": { "name": issue_type },
            "labels": [ref_marker(&ticket.ref_id)],
        });
        if let Some(parent) = parent_key {
            fields["parent"] = json!({ "key": parent });
        }
        fields
    }

    async fn create_issue(&self, fields: Value) -> Result<CreatedTicket, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/rest/api/3/issue", self.base_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .json(&json!({ "fields": fields }))
            .send()
            .await?;

        let created: CreatedIssue = check_response(resp).await?.json().await?;
        Ok(CreatedTicket {
            key: created.key,
            id: created.id,
        })
    }

    async fn search(&self, jql: &str) -> Result<Vec<JiraIssue>, ProviderError> {
        let url = format!(
            "{}/rest/api/3/search?jql={}&maxResults=20&fields=summary,status",
            self.base_url,
            urlencoding::encode(jql)
        );
        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await?;

        let search: SearchResponse = check_response(resp).await?.json().await?;
        Ok(search.issues)
    }

    async fn current_status(&self, ticket_key: &str) -> Result<Option<String>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/rest/api/3/issue/{ticket_key}?fields=status", self.base_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await?;
        let issue: JiraIssue = check_response(resp).await?.json().await?;
        Ok(issue.fields.status.map(|s| s.name))
    }
}

/// Label query first; tickets from before labels were used carry `[US-001]`
/// in the summary, so the title phrase comes second.
fn ref_id_queries(project_key: &str, ref_id: &str) -> [String; 2] {
    let project = quote(project_key);
    [
        format!(
            "project = {project} AND labels = {} ORDER BY created ASC",
            quote(&ref_marker(ref_id))
        ),
        format!(
            "project = {project} AND summary ~ {} ORDER BY created ASC",
            quote(&quote(&legacy_form(ref_id)))
        ),
    ]
}

/// Text search is fuzzy: keep only a summary whose embedded id is exactly `ref_id`.
fn title_match(issues: Vec<JiraIssue>, ref_id: &str) -> Option<String> {
    issues
        .into_iter()
        .find(|issue| {
            issue
                .fields
                .summary
                .as_deref()
                .and_then(extract_ref_id)
                .is_some_and(|found| found == ref_id)
        })
        .map(|issue| issue.key)
}

#[derive(Deserialize)]
struct CreatedIssue {
    id: String,
    key: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Deserialize)]
struct JiraIssue {
    key: String,
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: Option<String>,
    status: Option<StatusField>,
}

#[derive(Deserialize)]
struct StatusField {
    name: String,
}

#[derive(Deserialize)]
struct TransitionsResponse {
    transitions: Vec<Transition>,
}

#[derive(Deserialize)]
struct Transition {
    id: String,
    name: String,
    to: StatusField,
}

/// JQL string literal.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl TicketingProvider for JiraProvider {
    fn name(&self) -> &str {
        "Jira"
    }

    fn is_configured(&self, _project_root: &Path) -> bool {
        let cfg = &self.config;
        !cfg.domain.trim().is_empty()
            && !cfg.domain.contains(char::is_whitespace)
            && cfg.email.contains('@')
            && !cfg.api_token.trim().is_empty()
            && !cfg.project_key.is_empty()
            && cfg.project_key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    async fn create_story(
        &self,
        ticket: &TicketData,
        _project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        let fields = self.issue_fields(ticket, &self.config.story_issue_type, None);
        self.create_issue(fields).await
    }

    async fn create_task(
        &self,
        ticket: &TicketData,
        parent_key: &str,
        _project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        let fields = self.issue_fields(ticket, &self.config.subtask_issue_type, Some(parent_key));
        self.create_issue(fields).await
    }

    async fn find_ticket_by_ref_id(
        &self,
        ref_id: &str,
        _project_root: &Path,
    ) -> Result<Option<String>, ProviderError> {
        let [by_label, by_title] = ref_id_queries(&self.config.project_key, ref_id);
        if let Some(issue) = self.search(&by_label).await?.into_iter().next() {
            return Ok(Some(issue.key));
        }
        Ok(title_match(self.search(&by_title).await?, ref_id))
    }

    async fn ticket_exists(&self, ticket_key: &str, _project_root: &Path) -> Result<bool, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/rest/api/3/issue/{ticket_key}?fields=summary", self.base_url))
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await?;
        match check_response(resp).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn update_ticket_status(
        &self,
        ticket_key: &str,
        status: TaskStatus,
        _project_root: &Path,
    ) -> Result<bool, ProviderError> {
        let target = self.map_status(status);
        if let Some(current) = self.current_status(ticket_key).await? {
            if current.eq_ignore_ascii_case(target) {
                return Ok(true);
            }
        }

        let url = format!("{}/rest/api/3/issue/{ticket_key}/transitions", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await?;
        let available: TransitionsResponse = check_response(resp).await?.json().await?;

        let Some(transition) = available.transitions.into_iter().find(|t| {
            t.to.name.eq_ignore_ascii_case(target) || t.name.eq_ignore_ascii_case(target)
        }) else {
            debug!("No Jira transition from {ticket_key} to '{target}'");
            return Ok(false);
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .json(&json!({ "transition": { "id": transition.id } }))
            .send()
            .await?;
        check_response(resp).await?;
        Ok(true)
    }

    async fn delete_ticket(&self, ticket_key: &str, _project_root: &Path) -> Result<bool, ProviderError> {
        let resp = self
            .client
            .delete(format!(
                "{}/rest/api/3/issue/{ticket_key}?deleteSubtasks=true",
                self.base_url
            ))
            .header("Authorization", &self.auth_header)
            .send()
            .await?;
        match check_response(resp).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn map_status(&self, status: TaskStatus) -> &'static str {
        match status {
            TaskStatus::Pending => "To Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Review => "In Review",
            TaskStatus::Done => "Done",
            TaskStatus::Deferred => "Backlog",
            TaskStatus::Cancelled => "Cancelled",
        }
    }
}
