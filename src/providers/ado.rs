use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::http::{self, Credentials};
use super::{ContainerMetadata, ItemSource, ItemWriter, MetadataSource, ProviderKind, SubGroup, Team};
use crate::error::Result;
use crate::model::{Provider, WorkItem};
use crate::ratelimit::RateLimitStatus;

const API_VERSION: &str = "7.1";
const BATCH_SIZE: usize = 200;
const MAX_ITEMS: usize = 5_000;
const AREA_DEPTH: u32 = 10;
const FIELDS: &[&str] = &[
    "System.Id",
    "System.Title",
    "System.Description",
    "System.State",
    "System.WorkItemType",
    "System.CreatedDate",
    "System.ChangedDate",
    "System.Tags",
    "System.AreaPath",
    "System.IterationPath",
    "System.AssignedTo",
    "System.TeamProject",
];

/// Azure DevOps Services client. Authenticates with a PAT as the basic-auth password.
pub struct AdoClient {
    org_url: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl AdoClient {
    pub fn new(organization: &str, pat: String) -> Result<Self> {
        let organization = organization.trim().trim_end_matches('/');
        let org_url = if organization.starts_with("https://") || organization.starts_with("http://") {
            organization.to_string()
        } else {
            format!("https://dev.azure.com/{organization}")
        };
        Ok(Self {
            org_url,
            credentials: Credentials::Basic {
                username: String::new(),
                secret: pat,
            },
            client: http::build_client()?,
        })
    }

    fn url(&self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{}{path}{sep}api-version={API_VERSION}", self.org_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("Authorization", self.credentials.auth_header())
            .header("Accept", "application/json")
    }

    async fn patch_fields(&self, api_id: &str, ops: Vec<Value>) -> Result<()> {
        let path = format!("/_apis/wit/workitems/{api_id}");
        let body = serde_json::to_vec(&ops)?;
        http::send(
            self.request(reqwest::Method::PATCH, &path)
                .header("Content-Type", "application/json-patch+json")
                .body(body),
            &format!("work item {api_id}"),
        )
        .await?;
        Ok(())
    }

    async fn fetch_batch(&self, ids: &[u64]) -> Result<Vec<AdoWorkItem>> {
        let body = json!({ "ids": ids, "fields": FIELDS });
        let batch: ValueList<AdoWorkItem> = http::send_json(
            self.request(reqwest::Method::POST, "/_apis/wit/workitemsbatch")
                .json(&body),
            "work item batch",
        )
        .await?;
        Ok(batch.value)
    }
}

fn set_field(field: &str, value: impl Into<Value>) -> Value {
    json!({ "op": "add", "path": format!("/fields/{field}"), "value": value.into() })
}

#[derive(Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_items: Vec<WorkItemRef>,
}

#[derive(Deserialize)]
struct WorkItemRef {
    id: u64,
}

#[derive(Deserialize)]
struct AdoWorkItem {
    id: u64,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct AdoProject {
    name: String,
    description: Option<String>,
    state: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassificationNode {
    id: u64,
    name: String,
    #[serde(default)]
    children: Vec<ClassificationNode>,
}

#[derive(Deserialize)]
struct AdoTeam {
    id: String,
    name: String,
    description: Option<String>,
}

/// Walk the area tree depth-first. Paths are `\`-joined names from the root.
fn flatten_areas(node: &ClassificationNode, parent: Option<&str>, out: &mut Vec<SubGroup>) {
    let path = match parent {
        Some(parent) => format!("{parent}\\{}", node.name),
        None => node.name.clone(),
    };
    out.push(SubGroup {
        id: node.id.to_string(),
        name: node.name.clone(),
        path: path.clone(),
    });
    for child in &node.children {
        flatten_areas(child, Some(&path), out);
    }
}

/// Drop markup from HTML rich-text fields.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag.trim_start_matches('/').to_ascii_lowercase();
                if name.starts_with("br") || name.starts_with("div") || name.starts_with("p")
                    || name.starts_with("li")
                {
                    text.push('\n');
                }
            }
            c if in_tag => tag.push(c),
            c => text.push(c),
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn to_work_item(raw: AdoWorkItem, org_url: &str, container: &str) -> WorkItem {
    let fields = &raw.fields;
    let project = text_field(fields, "System.TeamProject").unwrap_or_else(|| container.to_string());
    let id = raw.id.to_string();

    let labels = text_field(fields, "System.Tags")
        .map(|tags| {
            tags.split(';')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let assignee = fields.get("System.AssignedTo").and_then(|v| match v {
        Value::Object(user) => user
            .get("uniqueName")
            .or_else(|| user.get("displayName"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    });

    WorkItem {
        url: Some(format!(
            "{org_url}/{}/_workitems/edit/{id}",
            urlencoding::encode(&project)
        )),
        source_id: Some(id.clone()),
        id,
        title: text_field(fields, "System.Title").unwrap_or_default(),
        description: text_field(fields, "System.Description")
            .map(|d| strip_html(&d))
            .filter(|d| !d.is_empty()),
        status: text_field(fields, "System.State"),
        item_type: text_field(fields, "System.WorkItemType"),
        created_at: text_field(fields, "System.CreatedDate")
            .as_deref()
            .and_then(http::parse_timestamp),
        changed_at: text_field(fields, "System.ChangedDate")
            .as_deref()
            .and_then(http::parse_timestamp),
        labels,
        area_path: text_field(fields, "System.AreaPath"),
        iteration_path: text_field(fields, "System.IterationPath"),
        assignee,
        container: project,
        source: Provider::Ado,
    }
}

impl ProviderKind for AdoClient {
    fn provider(&self) -> Provider {
        Provider::Ado
    }
}

#[async_trait]
impl ItemSource for AdoClient {
    /// Runs WIQL for ids, then hydrates them in batches. An empty container
    /// queries at organization scope.
    async fn search(&self, query: &str, container: &str) -> Result<Vec<WorkItem>> {
        let path = if container.is_empty() {
            format!("/_apis/wit/wiql?$top={MAX_ITEMS}")
        } else {
            format!(
                "/{}/_apis/wit/wiql?$top={MAX_ITEMS}",
                urlencoding::encode(container)
            )
        };
        let result: WiqlResponse = http::send_json(
            self.request(reqwest::Method::POST, &path)
                .json(&json!({ "query": query })),
            "WIQL query",
        )
        .await?;

        let ids: Vec<u64> = result.work_items.iter().map(|w| w.id).collect();
        tracing::debug!("WIQL matched {} work items", ids.len());

        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            let batch = self.fetch_batch(chunk).await?;
            items.extend(
                batch
                    .into_iter()
                    .map(|raw| to_work_item(raw, &self.org_url, container)),
            );
        }
        Ok(items)
    }

    /// Azure DevOps exposes no budget endpoint; the full window is assumed.
    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>> {
        Ok(Some(RateLimitStatus::assumed_full(Provider::Ado, Utc::now())))
    }
}

#[async_trait]
impl MetadataSource for AdoClient {
    async fn list_containers(&self, max_items: usize) -> Result<Vec<ContainerMetadata>> {
        let path = format!("/_apis/projects?$top={max_items}");
        let projects: ValueList<AdoProject> = http::send_json(
            self.request(reqwest::Method::GET, &path),
            "projects",
        )
        .await?;

        Ok(projects
            .value
            .into_iter()
            .take(max_items)
            .map(|p| ContainerMetadata {
                id: p.name.clone(),
                name: p.name,
                description: p.description.filter(|d| !d.trim().is_empty()),
                state: p.state,
            })
            .collect())
    }

    async fn fetch_sub_groups(&self, container: &str) -> Result<Vec<SubGroup>> {
        let path = format!(
            "/{}/_apis/wit/classificationnodes/Areas?$depth={AREA_DEPTH}",
            urlencoding::encode(container)
        );
        let root: ClassificationNode = http::send_json(
            self.request(reqwest::Method::GET, &path),
            &format!("project {container}"),
        )
        .await?;

        let mut areas = Vec::new();
        flatten_areas(&root, None, &mut areas);
        Ok(areas)
    }

    async fn fetch_teams(&self, container: &str) -> Result<Vec<Team>> {
        let path = format!("/_apis/projects/{}/teams", urlencoding::encode(container));
        let teams: ValueList<AdoTeam> = http::send_json(
            self.request(reqwest::Method::GET, &path),
            &format!("teams of {container}"),
        )
        .await?;

        Ok(teams
            .value
            .into_iter()
            .map(|t| Team {
                id: t.id,
                name: t.name,
                description: t.description.filter(|d| !d.trim().is_empty()),
            })
            .collect())
    }
}

#[async_trait]
impl ItemWriter for AdoClient {
    async fn update_title(&self, api_id: &str, title: &str) -> Result<()> {
        self.patch_fields(api_id, vec![set_field("System.Title", title)])
            .await
    }

    async fn update_description(&self, api_id: &str, description: &str) -> Result<()> {
        self.patch_fields(api_id, vec![set_field("System.Description", description)])
            .await
    }

    async fn update_status(&self, api_id: &str, status: &str) -> Result<()> {
        self.patch_fields(api_id, vec![set_field("System.State", status)])
            .await
    }

    async fn update_labels(&self, api_id: &str, labels: &[String]) -> Result<()> {
        self.patch_fields(api_id, vec![set_field("System.Tags", labels.join("; "))])
            .await
    }

    /// Discussion entries are written through the history field.
    async fn post_comment(&self, api_id: &str, body: &str) -> Result<()> {
        let html = body
            .lines()
            .map(|l| l.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;"))
            .collect::<Vec<_>>()
            .join("<br>");
        self.patch_fields(api_id, vec![set_field("System.History", html)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organization_becomes_url() {
        let client = AdoClient::new("contoso", "pat".into()).unwrap();
        assert_eq!(client.org_url, "https://dev.azure.com/contoso");
        assert_eq!(
            client.url("/_apis/projects?$top=5"),
            "https://dev.azure.com/contoso/_apis/projects?$top=5&api-version=7.1"
        );

        let client = AdoClient::new("https://ado.contoso.local/tfs/", "pat".into()).unwrap();
        assert_eq!(client.url("/_apis/projects"), "https://ado.contoso.local/tfs/_apis/projects?api-version=7.1");
    }

    #[test]
    fn area_tree_flattens_with_backslash_paths() {
        let root: ClassificationNode = serde_json::from_value(json!({
            "id": 1,
            "name": "Platform",
            "children": [
                {"id": 2, "name": "Core", "children": [{"id": 4, "name": "Api"}]},
                {"id": 3, "name": "Web"}
            ]
        }))
        .unwrap();

        let mut areas = Vec::new();
        flatten_areas(&root, None, &mut areas);
        let paths: Vec<&str> = areas.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["Platform", "Platform\\Core", "Platform\\Core\\Api", "Platform\\Web"]
        );
        assert_eq!(areas[2].name, "Api");
        assert_eq!(areas[2].id, "4");
    }

    #[test]
    fn work_items_normalize_from_fields() {
        let raw: AdoWorkItem = serde_json::from_value(json!({
            "id": 42,
            "fields": {
                "System.Title": "Login broken",
                "System.Description": "<div>Steps &amp; notes</div><div>second</div>",
                "System.State": "Active",
                "System.WorkItemType": "Bug",
                "System.CreatedDate": "2025-03-01T10:00:00.123Z",
                "System.Tags": "auth; urgent",
                "System.AreaPath": "Platform\\Core",
                "System.AssignedTo": {"displayName": "Sam", "uniqueName": "sam@contoso.com"},
                "System.TeamProject": "Platform"
            }
        }))
        .unwrap();

        let item = to_work_item(raw, "https://dev.azure.com/contoso", "");
        assert_eq!(item.id, "42");
        assert_eq!(item.api_id(), "42");
        assert_eq!(item.description.as_deref(), Some("Steps & notes\nsecond"));
        assert_eq!(item.labels, vec!["auth", "urgent"]);
        assert_eq!(item.assignee.as_deref(), Some("sam@contoso.com"));
        assert_eq!(item.container, "Platform");
        assert!(item.created_at.is_some());
        assert_eq!(
            item.url.as_deref(),
            Some("https://dev.azure.com/contoso/Platform/_workitems/edit/42")
        );
    }

    #[test]
    fn patch_operations_target_fields() {
        assert_eq!(
            set_field("System.Tags", "a; b"),
            json!({"op": "add", "path": "/fields/System.Tags", "value": "a; b"})
        );
    }

    #[test]
    fn html_is_reduced_to_lines() {
        assert_eq!(strip_html("<p>one</p><p>two&nbsp;three</p>"), "one\ntwo three");
        assert_eq!(strip_html("plain"), "plain");
    }

    #[tokio::test]
    async fn budget_reports_the_full_window() {
        let client = AdoClient::new("contoso", "pat".into()).unwrap();
        let status = client.rate_limit_status().await.unwrap().unwrap();
        assert_eq!(status.limit, 200);
        assert_eq!(status.remaining, 200);
        assert_eq!(status.percent_used, 0.0);
        assert!(status.reset_at > Utc::now());
    }
}
