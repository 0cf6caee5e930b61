use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{check_response, ref_marker, CreatedTicket, ProviderError, TicketData, TicketingProvider};
use crate::config::AzDevOpsConfig;
use crate::model::task::TaskStatus;
use crate::refid::{extract_ref_id, legacy_form};
use crate::util::html;

const API_VERSION: &str = "api-version=7.1";
const JSON_PATCH: &str = "application/json-patch+json";

pub struct AzDevOpsProvider {
    config: AzDevOpsConfig,
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl AzDevOpsProvider {
    pub fn new(config: AzDevOpsConfig, client: reqwest::Client) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!(":{}", config.personal_access_token));
        Self {
            base_url: format!(
                "https://dev.azure.com/{}/{}/_apis/wit",
                config.organization,
                urlencoding::encode(&config.project)
            ),
            config,
            auth_header: format!("Basic {encoded}"),
            client,
        }
    }

    fn work_item_url(&self, id: &str) -> String {
        format!("{}/workitems/{id}?{API_VERSION}", self.base_url)
    }

    fn create_ops(&self, ticket: &TicketData, parent_key: Option<&str>) -> Vec<Value> {
        let footer = format!("Reference: {}", ticket.ref_id);
        let mut ops = vec![
            json!({ "op": "add", "path": "/fields/System.Title", "value": ticket.title }),
            json!({
                "op": "add",
                "path": "/fields/System.Description",
                "value": html::sections(&ticket.body_sections(), Some(&footer)),
            }),
            json!({ "op": "add", "path": "/fields/System.Tags", "value": ref_marker(&ticket.ref_id) }),
        ];
        if let Some(parent) = parent_key {
            ops.push(json!({
                "op": "add",
                "path": "/relations/-",
                "value": {
                    "rel": "System.LinkTypes.Hierarchy-Reverse",
                    "url": format!(
                        "https://dev.azure.com/{}/_apis/wit/workItems/{parent}",
                        self.config.organization
                    ),
                },
            }));
        }
        ops
    }

    async fn create_work_item(&self, work_item_type: &str, ops: Vec<Value>) -> Result<CreatedTicket, ProviderError> {
        let url = format!(
            "{}/workitems/${}?{API_VERSION}",
            self.base_url,
            urlencoding::encode(work_item_type)
        );
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(Value::Array(ops).to_string())
            .send()
            .await?;
        let item: WorkItem = check_response(resp).await?.json().await?;
        Ok(CreatedTicket {
            key: item.id.to_string(),
            id: item.url,
        })
    }

    async fn query_ids(&self, wiql: String) -> Result<Vec<u64>, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/wiql?{API_VERSION}", self.base_url))
            .header("Authorization", &self.auth_header)
            .json(&json!({ "query": wiql }))
            .send()
            .await?;
        let result: WiqlResult = check_response(resp).await?.json().await?;
        Ok(result.work_items.into_iter().map(|w| w.id).collect())
    }

    async fn titles(&self, ids: &[u64]) -> Result<Vec<WorkItem>, ProviderError> {
        let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
        let resp = self
            .client
            .get(format!(
                "{}/workitems?ids={}&fields=System.Title&{API_VERSION}",
                self.base_url,
                ids.join(",")
            ))
            .header("Authorization", &self.auth_header)
            .send()
            .await?;
        let list: WorkItemList = check_response(resp).await?.json().await?;
        Ok(list.value)
    }
}

#[derive(Deserialize)]
struct WorkItem {
    id: u64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    fields: WorkItemFields,
}

#[derive(Deserialize, Default)]
struct WorkItemFields {
    #[serde(rename = "System.Title")]
    title: Option<String>,
}

#[derive(Deserialize)]
struct WorkItemList {
    value: Vec<WorkItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResult {
    #[serde(default)]
    work_items: Vec<WiqlRef>,
}

#[derive(Deserialize)]
struct WiqlRef {
    id: u64,
}

/// Tag query first, then the legacy `[US-001]` title.
fn ref_id_queries(ref_id: &str) -> [String; 2] {
    [
        format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project \
             AND [System.Tags] CONTAINS {} ORDER BY [System.Id]",
            quote(&ref_marker(ref_id))
        ),
        format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project \
             AND [System.Title] CONTAINS {} ORDER BY [System.Id]",
            quote(&legacy_form(ref_id))
        ),
    ]
}

/// `CONTAINS` is a substring match, so `US-001` also finds `US-0012`.
fn title_match(items: Vec<WorkItem>, ref_id: &str) -> Option<String> {
    items
        .into_iter()
        .find(|item| {
            item.fields
                .title
                .as_deref()
                .and_then(extract_ref_id)
                .is_some_and(|found| found == ref_id)
        })
        .map(|item| item.id.to_string())
}

/// WIQL string literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl TicketingProvider for AzDevOpsProvider {
    fn name(&self) -> &str {
        "Azure DevOps"
    }

    fn is_configured(&self, _project_root: &Path) -> bool {
        let cfg = &self.config;
        !cfg.organization.trim().is_empty()
            && !cfg.organization.contains(['/', ' '])
            && !cfg.project.trim().is_empty()
            && !cfg.personal_access_token.trim().is_empty()
    }

    async fn create_story(
        &self,
        ticket: &TicketData,
        _project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        self.create_work_item("User Story", self.create_ops(ticket, None))
            .await
    }

    async fn create_task(
        &self,
        ticket: &TicketData,
        parent_key: &str,
        _project_root: &Path,
    ) -> Result<CreatedTicket, ProviderError> {
        self.create_work_item("Task", self.create_ops(ticket, Some(parent_key)))
            .await
    }

    async fn find_ticket_by_ref_id(
        &self,
        ref_id: &str,
        _project_root: &Path,
    ) -> Result<Option<String>, ProviderError> {
        let [by_tag, by_title] = ref_id_queries(ref_id);
        if let Some(id) = self.query_ids(by_tag).await?.into_iter().next() {
            return Ok(Some(id.to_string()));
        }

        let ids = self.query_ids(by_title).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        let items = self.titles(&ids[..ids.len().min(50)]).await?;
        Ok(title_match(items, ref_id))
    }

    async fn ticket_exists(&self, ticket_key: &str, _project_root: &Path) -> Result<bool, ProviderError> {
        let resp = self
            .client
            .get(self.work_item_url(ticket_key))
            .header("Authorization", &self.auth_header)
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
        let ops = json!([
            { "op": "add", "path": "/fields/System.State", "value": self.map_status(status) }
        ]);
        let resp = self
            .client
            .patch(self.work_item_url(ticket_key))
            .header("Authorization", &self.auth_header)
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(ops.to_string())
            .send()
            .await?;
        // 400 means the process template has no such state for this work item type.
        match check_response(resp).await {
            Ok(_) => Ok(true),
            Err(ProviderError::Api { status: 400, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_ticket(&self, ticket_key: &str, _project_root: &Path) -> Result<bool, ProviderError> {
        let resp = self
            .client
            .delete(self.work_item_url(ticket_key))
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
            TaskStatus::Pending | TaskStatus::Deferred => "New",
            TaskStatus::InProgress => "Active",
            TaskStatus::Review => "Resolved",
            TaskStatus::Done => "Closed",
            TaskStatus::Cancelled => "Removed",
        }
    }
}
