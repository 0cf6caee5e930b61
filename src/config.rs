use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub ticketing: TicketingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TicketingSystem {
    #[default]
    #[serde(rename = "jira")]
    Jira,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "azdevops")]
    AzureDevOps,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TicketingConfig {
    pub enabled: bool,
    pub system: TicketingSystem,
    pub request_timeout_secs: u64,
    pub jira: Option<JiraConfig>,
    pub github: Option<GitHubConfig>,
    pub azdevops: Option<AzDevOpsConfig>,
}

impl Default for TicketingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            system: TicketingSystem::default(),
            request_timeout_secs: 30,
            jira: None,
            github: None,
            azdevops: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
    pub domain: String,
    pub email: String,
    #[serde(default)]
    pub api_token: String,
    pub project_key: String,
    #[serde(default = "default_story_type")]
    pub story_issue_type: String,
    #[serde(default = "default_subtask_type")]
    pub subtask_issue_type: String,
}

fn default_story_type() -> String {
    "Story".into()
}

fn default_subtask_type() -> String {
    "Subtask".into()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GitHubConfig {
    /// `owner/name`; when absent `gh` resolves the repo from the project root.
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzDevOpsConfig {
    pub organization: String,
    pub project: String,
    #[serde(default)]
    pub personal_access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".taskbridge").join("config.toml")
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taskbridge").join("config.toml"))
}

/// Load the project config, falling back to the user config, then defaults.
pub fn load_config(project_root: &Path) -> Result<AppConfig> {
    let candidates = std::iter::once(project_config_path(project_root)).chain(user_config_path());
    let mut config = match candidates.into_iter().find(|p| p.exists()) {
        Some(path) => load_from_file(&path)?,
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

/// Secrets from the environment win over the file.
fn apply_env_overrides(config: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    if let (Some(jira), Some(token)) = (config.ticketing.jira.as_mut(), var("JIRA_API_TOKEN")) {
        jira.api_token = token;
    }
    if let (Some(az), Some(pat)) = (config.ticketing.azdevops.as_mut(), var("AZURE_DEVOPS_PAT")) {
        az.personal_access_token = pat;
    }
    if let Some(level) = var("TASKBRIDGE_LOG") {
        config.logging.level = level;
    }
}
