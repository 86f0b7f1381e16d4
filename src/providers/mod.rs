pub mod ado;
pub mod github;
pub mod http;
pub mod jira;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Provider, WorkItem};
use crate::ratelimit::RateLimitStatus;

pub use http::Credentials;

/// Tier 1 metadata for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A sub-grouping inside a container: area path, component or milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroup {
    pub id: String,
    pub name: String,
    /// Full hierarchical path (`Platform\Core\Api`) or the name for flat groupings.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Tier 2 detail for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDependencies {
    pub container_id: String,
    pub sub_groups: Vec<SubGroup>,
    pub teams: Vec<Team>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// Identifies which tracker a client talks to.
pub trait ProviderKind: Send + Sync {
    fn provider(&self) -> Provider;
}

/// Executes dialect queries and normalizes the results.
#[async_trait]
pub trait ItemSource: ProviderKind {
    async fn search(&self, query: &str, container: &str) -> Result<Vec<WorkItem>>;

    /// Current request budget, when the provider can report it.
    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>> {
        Ok(None)
    }
}

/// Provider-side metadata needed to build queries.
#[async_trait]
pub trait MetadataSource: ProviderKind {
    async fn list_containers(&self, max_items: usize) -> Result<Vec<ContainerMetadata>>;

    async fn fetch_sub_groups(&self, container: &str) -> Result<Vec<SubGroup>>;

    async fn fetch_teams(&self, _container: &str) -> Result<Vec<Team>> {
        Ok(Vec::new())
    }
}

/// Outward writes used by reconciliation.
#[async_trait]
pub trait ItemWriter: Send + Sync {
    async fn update_title(&self, api_id: &str, title: &str) -> Result<()>;
    async fn update_description(&self, api_id: &str, description: &str) -> Result<()>;
    async fn update_status(&self, api_id: &str, status: &str) -> Result<()>;
    async fn update_labels(&self, api_id: &str, labels: &[String]) -> Result<()>;
    async fn post_comment(&self, api_id: &str, body: &str) -> Result<()>;
}

/// A provider client implementing every seam.
pub trait TrackerClient: ItemSource + MetadataSource + ItemWriter {}

impl<T: ItemSource + MetadataSource + ItemWriter> TrackerClient for T {}

impl<T: ProviderKind + ?Sized> ProviderKind for Arc<T> {
    fn provider(&self) -> Provider {
        (**self).provider()
    }
}

#[async_trait]
impl<T: ItemSource + ?Sized> ItemSource for Arc<T> {
    async fn search(&self, query: &str, container: &str) -> Result<Vec<WorkItem>> {
        (**self).search(query, container).await
    }

    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>> {
        (**self).rate_limit_status().await
    }
}

#[async_trait]
impl<T: MetadataSource + ?Sized> MetadataSource for Arc<T> {
    async fn list_containers(&self, max_items: usize) -> Result<Vec<ContainerMetadata>> {
        (**self).list_containers(max_items).await
    }

    async fn fetch_sub_groups(&self, container: &str) -> Result<Vec<SubGroup>> {
        (**self).fetch_sub_groups(container).await
    }

    async fn fetch_teams(&self, container: &str) -> Result<Vec<Team>> {
        (**self).fetch_teams(container).await
    }
}

#[async_trait]
impl<T: ItemWriter + ?Sized> ItemWriter for Arc<T> {
    async fn update_title(&self, api_id: &str, title: &str) -> Result<()> {
        (**self).update_title(api_id, title).await
    }

    async fn update_description(&self, api_id: &str, description: &str) -> Result<()> {
        (**self).update_description(api_id, description).await
    }

    async fn update_status(&self, api_id: &str, status: &str) -> Result<()> {
        (**self).update_status(api_id, status).await
    }

    async fn update_labels(&self, api_id: &str, labels: &[String]) -> Result<()> {
        (**self).update_labels(api_id, labels).await
    }

    async fn post_comment(&self, api_id: &str, body: &str) -> Result<()> {
        (**self).post_comment(api_id, body).await
    }
}
