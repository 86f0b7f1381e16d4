use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{self, Credentials};
use super::{ContainerMetadata, ItemSource, ItemWriter, MetadataSource, ProviderKind, SubGroup};
use crate::error::{Result, SyncError};
use crate::model::{Provider, WorkItem};
use crate::query::github::split_sort;
use crate::ratelimit::RateLimitStatus;

const API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
/// The search API never returns more than 1000 results per query.
const SEARCH_CAP: usize = 1_000;

pub struct GitHubClient {
    base_url: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(token: String) -> Result<Self> {
        Ok(Self {
            base_url: API_URL.to_string(),
            credentials: Credentials::Bearer { token },
            client: http::build_client()?,
        })
    }

    /// Point at a GitHub Enterprise API root.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", self.credentials.auth_header())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn patch_issue(&self, api_id: &str, body: Value) -> Result<()> {
        let (repo, number) = parse_api_id(api_id)?;
        let path = format!("/repos/{repo}/issues/{number}");
        http::send(
            self.request(reqwest::Method::PATCH, &path).json(&body),
            &format!("GitHub issue {api_id}"),
        )
        .await?;
        Ok(())
    }
}

/// `owner/repo#12` into `("owner/repo", 12)`.
fn parse_api_id(api_id: &str) -> Result<(&str, u64)> {
    api_id
        .rsplit_once('#')
        .and_then(|(repo, number)| Some((repo, number.parse().ok()?)))
        .filter(|(repo, _)| repo.contains('/'))
        .ok_or_else(|| SyncError::Unsupported(format!("not a GitHub issue reference: {api_id}")))
}

/// `sort:created-desc` into the `sort`/`order` parameters.
fn sort_params(qualifier: &str) -> Option<(&str, &str)> {
    let value = qualifier.strip_prefix("sort:")?;
    match value.rsplit_once('-') {
        Some((field, order @ ("asc" | "desc"))) => Some((field, order)),
        _ => Some((value, "desc")),
    }
}

fn issue_state(status: &str) -> Option<&'static str> {
    match status.trim().to_ascii_lowercase().as_str() {
        "open" | "to do" | "todo" | "in progress" | "reopened" => Some("open"),
        "closed" | "done" | "resolved" => Some("closed"),
        _ => None,
    }
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    items: Vec<GhIssue>,
}

#[derive(Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: Option<String>,
    html_url: Option<String>,
    repository_url: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    milestone: Option<GhMilestone>,
    assignee: Option<GhUser>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    issue_type: Option<GhIssueType>,
    pull_request: Option<Value>,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Deserialize)]
struct GhMilestone {
    number: u64,
    title: String,
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Deserialize)]
struct GhIssueType {
    name: String,
}

#[derive(Deserialize)]
struct GhRepo {
    full_name: String,
    name: String,
    description: Option<String>,
    #[serde(default)]
    archived: bool,
}

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Deserialize)]
struct RateLimitResources {
    core: RateLimitBucket,
}

#[derive(Deserialize)]
struct RateLimitBucket {
    limit: u64,
    remaining: u64,
    reset: i64,
}

fn to_work_item(issue: GhIssue, container: &str) -> WorkItem {
    let repo = issue
        .repository_url
        .as_deref()
        .and_then(|url| url.split("/repos/").nth(1))
        .map(str::to_string)
        .unwrap_or_else(|| container.to_string());
    let id = format!("{repo}#{}", issue.number);

    WorkItem {
        source_id: Some(id.clone()),
        id,
        title: issue.title,
        description: issue.body.filter(|b| !b.trim().is_empty()),
        status: issue.state,
        item_type: issue.issue_type.map(|t| t.name),
        created_at: issue.created_at,
        changed_at: issue.updated_at,
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        area_path: issue.milestone.map(|m| m.title),
        iteration_path: None,
        assignee: issue.assignee.map(|a| a.login),
        container: repo,
        source: Provider::GitHub,
        url: issue.html_url,
    }
}

impl ProviderKind for GitHubClient {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }
}

#[async_trait]
impl ItemSource for GitHubClient {
    async fn search(&self, query: &str, container: &str) -> Result<Vec<WorkItem>> {
        let (q, sort) = split_sort(query);
        let mut params: Vec<(&str, String)> = vec![
            ("q", q.to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("advanced_search", "true".to_string()),
        ];
        if let Some((field, order)) = sort.and_then(sort_params) {
            params.push(("sort", field.to_string()));
            params.push(("order", order.to_string()));
        }

        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let request = self
                .request(reqwest::Method::GET, "/search/issues")
                .query(&params)
                .query(&[("page", page)]);
            let result: SearchPage = http::send_json(request, "GitHub search").await?;

            let fetched = result.items.len();
            items.extend(
                result
                    .items
                    .into_iter()
                    .filter(|issue| issue.pull_request.is_none())
                    .map(|issue| to_work_item(issue, container)),
            );
            tracing::debug!(
                "GitHub search page {}: {} results of {}",
                page,
                fetched,
                result.total_count
            );

            if fetched < PER_PAGE || page * PER_PAGE >= result.total_count.min(SEARCH_CAP) {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>> {
        let response: RateLimitResponse = http::send_json(
            self.request(reqwest::Method::GET, "/rate_limit"),
            "GitHub rate limit",
        )
        .await?;
        let core = response.resources.core;
        let reset_at = Utc
            .timestamp_opt(core.reset, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(Some(RateLimitStatus::new(core.remaining, core.limit, reset_at)))
    }
}

#[async_trait]
impl MetadataSource for GitHubClient {
    async fn list_containers(&self, max_items: usize) -> Result<Vec<ContainerMetadata>> {
        let mut containers = Vec::new();
        let mut page = 1;

        while containers.len() < max_items {
            let request = self
                .request(reqwest::Method::GET, "/user/repos")
                .query(&[("per_page", PER_PAGE), ("page", page)])
                .query(&[("sort", "updated")]);
            let repos: Vec<GhRepo> = http::send_json(request, "GitHub repositories").await?;
            let fetched = repos.len();

            containers.extend(repos.into_iter().map(|r| ContainerMetadata {
                id: r.full_name,
                name: r.name,
                description: r.description.filter(|d| !d.trim().is_empty()),
                state: Some(if r.archived { "archived" } else { "active" }.to_string()),
            }));

            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }

        containers.truncate(max_items);
        Ok(containers)
    }

    /// Milestones are the sub-grouping for repositories.
    async fn fetch_sub_groups(&self, container: &str) -> Result<Vec<SubGroup>> {
        let path = format!("/repos/{container}/milestones");
        let request = self
            .request(reqwest::Method::GET, &path)
            .query(&[("state", "all"), ("per_page", "100")]);
        let milestones: Vec<GhMilestone> =
            http::send_json(request, &format!("GitHub repository {container}")).await?;

        Ok(milestones
            .into_iter()
            .map(|m| SubGroup {
                id: m.number.to_string(),
                path: m.title.clone(),
                name: m.title,
            })
            .collect())
    }
}

#[async_trait]
impl ItemWriter for GitHubClient {
    async fn update_title(&self, api_id: &str, title: &str) -> Result<()> {
        self.patch_issue(api_id, json!({ "title": title })).await
    }

    async fn update_description(&self, api_id: &str, description: &str) -> Result<()> {
        self.patch_issue(api_id, json!({ "body": description })).await
    }

    async fn update_status(&self, api_id: &str, status: &str) -> Result<()> {
        let state = issue_state(status).ok_or_else(|| {
            SyncError::Unsupported(format!("GitHub issues cannot be set to status {status:?}"))
        })?;
        self.patch_issue(api_id, json!({ "state": state })).await
    }

    async fn update_labels(&self, api_id: &str, labels: &[String]) -> Result<()> {
        self.patch_issue(api_id, json!({ "labels": labels })).await
    }

    async fn post_comment(&self, api_id: &str, body: &str) -> Result<()> {
        let (repo, number) = parse_api_id(api_id)?;
        let path = format!("/repos/{repo}/issues/{number}/comments");
        http::send(
            self.request(reqwest::Method::POST, &path)
                .json(&json!({ "body": body })),
            &format!("GitHub issue {api_id}"),
        )
        .await?;
        Ok(())
    }
}
