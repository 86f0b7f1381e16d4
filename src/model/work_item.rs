use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::Provider;

/// Provider-independent snapshot of one tracked item. Each fetch produces fresh values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Display id (`42` for ADO, `ENG-7` for Jira, `owner/repo#12` for GitHub).
    pub id: String,
    /// Original ID from the source system, used for API calls (ADO numeric id, Jira key, GitHub issue number)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Area path (ADO), component (Jira) or milestone (GitHub).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_path: Option<String>,
    /// Iteration path (ADO) or sprint (Jira).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// The container the item was fetched from.
    pub container: String,
    pub source: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl WorkItem {
    /// The id to use for write calls against the provider.
    pub fn api_id(&self) -> &str {
        self.source_id.as_deref().unwrap_or(&self.id)
    }
}
