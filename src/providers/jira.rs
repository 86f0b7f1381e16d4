use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{self, Credentials};
use super::{ContainerMetadata, ItemSource, ItemWriter, MetadataSource, ProviderKind, SubGroup, Team};
use crate::error::{Result, SyncError};
use crate::model::{Provider, WorkItem};
use crate::ratelimit::RateLimitStatus;
use crate::util::adf::{adf_to_text, text_to_adf};

const PAGE_SIZE: usize = 100;
const MAX_ISSUES: usize = 5_000;
const FIELDS: &[&str] = &[
    "summary",
    "description",
    "status",
    "issuetype",
    "labels",
    "components",
    "assignee",
    "project",
    "created",
    "updated",
];

pub struct JiraClient {
    base_url: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl JiraClient {
    pub fn new(domain: &str, email: String, api_token: String) -> Result<Self> {
        Ok(Self {
            base_url: base_url(domain),
            credentials: Credentials::Basic {
                username: email,
                secret: api_token,
            },
            client: http::build_client()?,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", self.credentials.auth_header())
            .header("Accept", "application/json")
    }

    fn request(&self, method: reqwest::Method, path: &str, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", self.credentials.auth_header())
            .header("Accept", "application/json")
            .json(body)
    }

    async fn update_fields(&self, key: &str, fields: Value) -> Result<()> {
        let path = format!("/rest/api/3/issue/{key}");
        http::send(
            self.request(reqwest::Method::PUT, &path, &json!({ "fields": fields })),
            &format!("Jira issue {key}"),
        )
        .await?;
        Ok(())
    }
}

/// Accepts `acme`, `acme.atlassian.net` or a full URL.
fn base_url(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else if domain.contains('.') {
        format!("https://{domain}")
    } else {
        format!("https://{domain}.atlassian.net")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
    next_page_token: Option<String>,
    #[serde(default)]
    is_last: Option<bool>,
}

#[derive(Deserialize)]
struct JiraIssue {
    key: String,
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<Value>,
    status: Option<Named>,
    issuetype: Option<Named>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    components: Vec<Named>,
    assignee: Option<Assignee>,
    project: Option<ProjectRef>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Assignee {
    display_name: Option<String>,
    email_address: Option<String>,
}

#[derive(Deserialize)]
struct ProjectRef {
    key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPage {
    #[serde(default)]
    values: Vec<JiraProject>,
    #[serde(default)]
    is_last: bool,
}

#[derive(Deserialize)]
struct JiraProject {
    key: String,
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct Component {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct BoardPage {
    #[serde(default)]
    values: Vec<Board>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Board {
    id: u64,
    name: String,
    #[serde(rename = "type")]
    board_type: Option<String>,
}

#[derive(Deserialize)]
struct TransitionList {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Deserialize)]
struct Transition {
    id: String,
    name: String,
    to: Option<Named>,
}

fn to_work_item(issue: JiraIssue, base_url: &str, container: &str) -> WorkItem {
    let fields = issue.fields;
    let project = fields
        .project
        .map(|p| p.key)
        .unwrap_or_else(|| container.to_string());

    WorkItem {
        url: Some(format!("{base_url}/browse/{}", issue.key)),
        source_id: Some(issue.key.clone()),
        id: issue.key,
        title: fields.summary.unwrap_or_default(),
        description: fields.description.as_ref().and_then(adf_to_text),
        status: fields.status.map(|s| s.name),
        item_type: fields.issuetype.map(|t| t.name),
        created_at: fields.created.as_deref().and_then(http::parse_timestamp),
        changed_at: fields.updated.as_deref().and_then(http::parse_timestamp),
        labels: fields.labels,
        area_path: fields.components.into_iter().next().map(|c| c.name),
        iteration_path: None,
        assignee: fields
            .assignee
            .and_then(|a| a.email_address.or(a.display_name)),
        container: project,
        source: Provider::Jira,
    }
}

/// The transition whose target status (or own name) matches `status`.
fn pick_transition<'a>(transitions: &'a [Transition], status: &str) -> Option<&'a Transition> {
    transitions
        .iter()
        .find(|t| {
            t.to
                .as_ref()
                .is_some_and(|to| to.name.eq_ignore_ascii_case(status))
        })
        .or_else(|| transitions.iter().find(|t| t.name.eq_ignore_ascii_case(status)))
}

impl ProviderKind for JiraClient {
    fn provider(&self) -> Provider {
        Provider::Jira
    }
}

#[async_trait]
impl ItemSource for JiraClient {
    async fn search(&self, query: &str, container: &str) -> Result<Vec<WorkItem>> {
        let mut items = Vec::new();
        let mut next_page_token: Option<String> = None;

        loop {
            let mut body = json!({
                "jql": query,
                "fields": FIELDS,
                "maxResults": PAGE_SIZE,
            });
            if let Some(token) = &next_page_token {
                body["nextPageToken"] = json!(token);
            }

            let page: SearchResponse = http::send_json(
                self.request(reqwest::Method::POST, "/rest/api/3/search/jql", &body),
                "Jira search",
            )
            .await?;

            let fetched = page.issues.len();
            items.extend(
                page.issues
                    .into_iter()
                    .map(|issue| to_work_item(issue, &self.base_url, container)),
            );
            tracing::debug!("Jira search page: {} issues ({} total)", fetched, items.len());

            next_page_token = page.next_page_token;
            if page.is_last.unwrap_or(false)
                || next_page_token.is_none()
                || fetched == 0
                || items.len() >= MAX_ISSUES
            {
                break;
            }
        }

        items.truncate(MAX_ISSUES);
        Ok(items)
    }

    /// Jira exposes no budget endpoint; the full window is assumed.
    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>> {
        Ok(Some(RateLimitStatus::assumed_full(Provider::Jira, Utc::now())))
    }
}

#[async_trait]
impl MetadataSource for JiraClient {
    async fn list_containers(&self, max_items: usize) -> Result<Vec<ContainerMetadata>> {
        let mut containers = Vec::new();
        let mut start_at = 0;

        while containers.len() < max_items {
            let path = format!(
                "/rest/api/3/project/search?startAt={start_at}&maxResults={}&expand=description",
                PAGE_SIZE.min(max_items - containers.len())
            );
            let page: ProjectPage = http::send_json(self.get(&path), "Jira projects").await?;
            let fetched = page.values.len();
            containers.extend(page.values.into_iter().map(|p| ContainerMetadata {
                id: p.key,
                name: p.name,
                description: p.description.filter(|d| !d.trim().is_empty()),
                state: None,
            }));

            if page.is_last || fetched == 0 {
                break;
            }
            start_at += fetched;
        }

        containers.truncate(max_items);
        Ok(containers)
    }

    async fn fetch_sub_groups(&self, container: &str) -> Result<Vec<SubGroup>> {
        let path = format!("/rest/api/3/project/{}/components", urlencoding::encode(container));
        let components: Vec<Component> =
            http::send_json(self.get(&path), &format!("Jira project {container}")).await?;

        Ok(components
            .into_iter()
            .map(|c| SubGroup {
                id: c.id,
                path: c.name.clone(),
                name: c.name,
            })
            .collect())
    }

    /// Agile boards stand in for teams.
    async fn fetch_teams(&self, container: &str) -> Result<Vec<Team>> {
        let path = format!(
            "/rest/agile/1.0/board?projectKeyOrId={}",
            urlencoding::encode(container)
        );
        let boards: BoardPage =
            http::send_json(self.get(&path), &format!("Jira boards for {container}")).await?;

        Ok(boards
            .values
            .into_iter()
            .map(|b| Team {
                id: b.id.to_string(),
                name: b.name,
                description: b.board_type,
            })
            .collect())
    }
}

#[async_trait]
impl ItemWriter for JiraClient {
    async fn update_title(&self, api_id: &str, title: &str) -> Result<()> {
        self.update_fields(api_id, json!({ "summary": title })).await
    }

    async fn update_description(&self, api_id: &str, description: &str) -> Result<()> {
        self.update_fields(api_id, json!({ "description": text_to_adf(description) }))
            .await
    }

    async fn update_status(&self, api_id: &str, status: &str) -> Result<()> {
        let path = format!("/rest/api/3/issue/{api_id}/transitions");
        let list: TransitionList =
            http::send_json(self.get(&path), &format!("Jira transitions for {api_id}")).await?;

        let transition = pick_transition(&list.transitions, status).ok_or_else(|| {
            SyncError::Unsupported(format!("no transition from {api_id} to status {status:?}"))
        })?;
        tracing::debug!("Transitioning {} via {:?}", api_id, transition.name);

        http::send(
            self.request(
                reqwest::Method::POST,
                &path,
                &json!({ "transition": { "id": transition.id } }),
            ),
            &format!("Jira issue {api_id}"),
        )
        .await?;
        Ok(())
    }

    async fn update_labels(&self, api_id: &str, labels: &[String]) -> Result<()> {
        self.update_fields(api_id, json!({ "labels": labels })).await
    }

    async fn post_comment(&self, api_id: &str, body: &str) -> Result<()> {
        let path = format!("/rest/api/3/issue/{api_id}/comment");
        http::send(
            self.request(reqwest::Method::POST, &path, &json!({ "body": text_to_adf(body) })),
            &format!("Jira issue {api_id}"),
        )
        .await?;
        Ok(())
    }
}
