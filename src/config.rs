use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use worksync::model::{Provider, SyncProfile};
use worksync::providers::ado::AdoClient;
use worksync::providers::github::GitHubClient;
use worksync::providers::jira::JiraClient;
use worksync::providers::TrackerClient;
use worksync::reconcile::{Capabilities, ConflictPolicy};

const CONFIG_ENV: &str = "WORKSYNC_CONFIG";
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub ado: Option<AdoConfig>,
    pub jira: Option<JiraConfig>,
    pub github: Option<GitHubConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub profiles: BTreeMap<String, SyncProfile>,
}

#[derive(Debug, Deserialize)]
pub struct AdoConfig {
    pub organization: String,
    pub pat: String,
}

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    pub domain: String,
    pub email: String,
    pub api_token: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct GitHubConfig {
    pub token: Option<String>,
    /// GitHub Enterprise API root.
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub can_update_external_items: bool,
    pub can_update_status: bool,
    pub conflict_policy: ConflictPolicy,
    /// Parallel container loads during preload.
    pub concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            can_update_external_items: false,
            can_update_status: false,
            conflict_policy: ConflictPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl SyncSettings {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_update_external_items: self.can_update_external_items,
            can_update_status: self.can_update_status,
        }
    }
}

impl AppConfig {
    /// The named profile, validated, with its display name defaulted to the key.
    pub fn profile(&self, name: &str) -> Result<SyncProfile> {
        let Some(profile) = self.profiles.get(name) else {
            let known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            if known.is_empty() {
                bail!("Unknown profile '{name}'. No profiles are configured in {}", config_path().display());
            }
            bail!("Unknown profile '{name}'. Configured: {}", known.join(", "));
        };
        let mut profile = profile.clone();
        if profile.display_name.trim().is_empty() {
            profile.display_name = name.to_string();
        }
        profile
            .validate()
            .with_context(|| format!("Profile '{name}' is invalid"))?;
        Ok(profile)
    }

    pub fn github_token(&self) -> Option<String> {
        self.github
            .as_ref()
            .and_then(|g| g.token.clone())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.trim().is_empty()))
    }

    /// Build the client for `provider` from the configured credentials.
    pub fn client(&self, provider: Provider) -> Result<Arc<dyn TrackerClient>> {
        let missing = || {
            format!(
                "No {} credentials configured. Add a [{}] section to {}",
                provider.display_name(),
                provider,
                config_path().display()
            )
        };
        let client: Arc<dyn TrackerClient> = match provider {
            Provider::Ado => {
                let ado = self.ado.as_ref().with_context(missing)?;
                Arc::new(AdoClient::new(&ado.organization, ado.pat.clone())?)
            }
            Provider::Jira => {
                let jira = self.jira.as_ref().with_context(missing)?;
                Arc::new(JiraClient::new(
                    &jira.domain,
                    jira.email.clone(),
                    jira.api_token.clone(),
                )?)
            }
            Provider::GitHub => {
                let token = self.github_token().with_context(missing)?;
                let mut client = GitHubClient::new(token)?;
                if let Some(url) = self.github.as_ref().and_then(|g| g.api_url.as_deref()) {
                    client = client.with_base_url(url);
                }
                Arc::new(client)
            }
        };
        Ok(client)
    }
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    data_dir().join("config.toml")
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".worksync")
}

pub fn cache_dir() -> PathBuf {
    data_dir().join("cache")
}

pub fn records_path() -> PathBuf {
    data_dir().join("records.json")
}

pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents)?;
    Ok(config)
}
