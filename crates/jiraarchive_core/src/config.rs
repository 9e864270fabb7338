use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::render::ReferenceTemplate;
use crate::widgets::EntityDecoding;

pub const DEFAULT_USER_AGENT: &str = "jiraarchive/0.1";
pub const DEFAULT_VERSION_MESSAGE: &str = "Automatically archived Jira lists using script";
pub const DEFAULT_SUGGESTIONS: usize = 10;
pub const DEFAULT_MACRO_ID: &str = "5ded959b-ea64-498a-a5e9-01356e2cf51a";
pub const DEFAULT_SERVER_ID: &str = "741b69ce-e911-31ef-a42f-8ada2530ac21";
pub const DEFAULT_SERVER_NAME: &str = "Ascend JIRA";
pub const DEFAULT_COLUMNS: &str =
    "key,summary,type,created,updated,due,assignee,reporter,priority,status,resolution";

pub const CONFIG_DIR: &str = ".jiraarchive";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub confluence: ServiceSection,
    #[serde(default)]
    pub jira: ServiceSection,
    #[serde(default)]
    pub reference: ReferenceSection,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ServiceSection {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReferenceSection {
    pub macro_id: Option<String>,
    pub server_name: Option<String>,
    pub server_id: Option<String>,
    pub columns: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ArchiveSection {
    pub version_message: Option<String>,
    pub suggestions: Option<usize>,
    pub entity_decoding: Option<EntityDecoding>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub rate_limit_read_ms: Option<u64>,
    pub rate_limit_write_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub max_write_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

impl ArchiveConfig {
    /// Resolve the Confluence base URL: env CONFLUENCE_URL > config > None.
    pub fn confluence_url(&self) -> Option<String> {
        env_override("CONFLUENCE_URL").or_else(|| self.confluence.url.clone())
    }

    /// Resolve the Jira base URL: env JIRA_URL > config > None.
    pub fn jira_url(&self) -> Option<String> {
        env_override("JIRA_URL").or_else(|| self.jira.url.clone())
    }

    /// Resolve user agent: env JIRAARCHIVE_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("JIRAARCHIVE_USER_AGENT")
            .or_else(|| self.http.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn version_message(&self) -> &str {
        self.archive
            .version_message
            .as_deref()
            .unwrap_or(DEFAULT_VERSION_MESSAGE)
    }

    pub fn suggestions(&self) -> usize {
        self.archive
            .suggestions
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_SUGGESTIONS)
    }

    pub fn entity_decoding(&self) -> EntityDecoding {
        self.archive.entity_decoding.unwrap_or_default()
    }

    pub fn reference_template(&self) -> ReferenceTemplate {
        let section = &self.reference;
        ReferenceTemplate {
            macro_id: section
                .macro_id
                .clone()
                .unwrap_or_else(|| DEFAULT_MACRO_ID.to_string()),
            server_name: section
                .server_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            server_id: section
                .server_id
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_ID.to_string()),
            columns: section
                .columns
                .clone()
                .unwrap_or_else(|| DEFAULT_COLUMNS.to_string()),
        }
    }
}

/// Load and parse an ArchiveConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ArchiveConfig> {
    if !config_path.exists() {
        return Ok(ArchiveConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ArchiveConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Pick the config file: `--config` flag > env JIRAARCHIVE_CONFIG > `<cwd>/.jiraarchive/config.toml`.
pub fn resolve_config_path(flag: Option<&Path>, cwd: &Path) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        return (absolutize(path, cwd), ValueSource::Flag);
    }
    if let Some(value) = env_override("JIRAARCHIVE_CONFIG") {
        return (absolutize(Path::new(&value), cwd), ValueSource::Env);
    }
    (
        cwd.join(CONFIG_DIR).join(CONFIG_FILENAME),
        ValueSource::Default,
    )
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
