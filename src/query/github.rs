use super::{guard, or_group, unsupported, QueryBuilder};
use crate::model::{FilterSet, Provider, TimeWindow};

const SCOPE: &str = "is:issue";
pub const SORT_QUALIFIER: &str = "sort:created-desc";

/// GitHub issue search syntax (advanced search, with parenthesized groups).
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubSearchBuilder;

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

fn qualifier_group(qualifier: &str, values: &[String]) -> String {
    or_group(
        values
            .iter()
            .map(|v| format!("{qualifier}:{}", quote(v)))
            .collect(),
    )
}

fn issue_state(category: &str) -> Option<&'static str> {
    match category.trim().to_ascii_lowercase().as_str() {
        "open" | "to do" | "todo" | "in progress" => Some("open"),
        "closed" | "done" => Some("closed"),
        _ => None,
    }
}

/// Split off a trailing `sort:` qualifier.
pub fn split_sort(query: &str) -> (&str, Option<&str>) {
    let trimmed = query.trim_end();
    match trimmed.rsplit_once(char::is_whitespace) {
        Some((body, last)) if last.starts_with("sort:") => (body.trim_end(), Some(last)),
        None if trimmed.starts_with("sort:") => ("", Some(trimmed)),
        _ => (trimmed, None),
    }
}

impl QueryBuilder for GitHubSearchBuilder {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn sub_group_label(&self) -> &'static str {
        "milestones"
    }

    fn container_clause(&self, container_id: &str) -> String {
        format!("repo:{container_id}")
    }

    fn sub_group_clause(&self, resolved: &[String]) -> String {
        qualifier_group("milestone", resolved)
    }

    fn filter_clauses(&self, filters: &FilterSet, warnings: &mut Vec<String>) -> Vec<String> {
        let mut clauses = Vec::new();
        if !filters.work_item_types.is_empty() {
            clauses.push(qualifier_group("type", &filters.work_item_types));
        }
        if !filters.status_categories.is_empty() {
            let mut states: Vec<String> = Vec::new();
            for category in &filters.status_categories {
                match issue_state(category) {
                    Some(state) => {
                        let clause = format!("state:{state}");
                        if !states.contains(&clause) {
                            states.push(clause);
                        }
                    }
                    None => warnings.push(format!(
                        "status category {category:?} has no GitHub equivalent and was ignored"
                    )),
                }
            }
            if !states.is_empty() {
                clauses.push(or_group(states));
            }
        }
        if !filters.area_paths.is_empty() {
            warnings.push(unsupported("area paths", Provider::GitHub));
        }
        if !filters.iteration_paths.is_empty() {
            warnings.push(unsupported("iteration paths", Provider::GitHub));
        }
        if !filters.include_labels.is_empty() {
            clauses.push(qualifier_group("label", &filters.include_labels));
        }
        for label in &filters.exclude_labels {
            clauses.push(format!("-label:{}", quote(label)));
        }
        if !filters.assignees.is_empty() {
            clauses.push(or_group(
                filters
                    .assignees
                    .iter()
                    .map(|a| format!("assignee:{a}"))
                    .collect(),
            ));
        }
        if !filters.milestones.is_empty() {
            clauses.push(qualifier_group("milestone", &filters.milestones));
        }
        clauses
    }

    fn and_join(&self, parts: &[String]) -> String {
        parts.join(" ")
    }

    fn finish(&self, condition: &str) -> String {
        if condition.is_empty() {
            format!("{SCOPE} {SORT_QUALIFIER}")
        } else {
            format!("{SCOPE} {condition} {SORT_QUALIFIER}")
        }
    }

    fn apply_time_range(&self, query: &str, window: Option<&TimeWindow>) -> String {
        let Some(window) = window else {
            return query.to_string();
        };
        let range = format!(
            "created:{}..{}",
            window.since.format("%Y-%m-%d"),
            window.until.format("%Y-%m-%d")
        );

        let (body, sort) = split_sort(query);
        let filtered = if body.is_empty() {
            range
        } else {
            format!("{} {range}", guard(body))
        };

        match sort {
            Some(sort) => format!("{filtered} {sort}"),
            None => filtered,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::Container;
    use crate::query::test_support::MapResolver;

    fn window() -> TimeWindow {
        TimeWindow {
            since: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            until: Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn repos_are_ored() {
        let built = GitHubSearchBuilder
            .build(
                &[Container::new("acme/api"), Container::new("acme/web")],
                &MapResolver::default(),
            )
            .await;

        assert_eq!(
            built.query,
            "is:issue (repo:acme/api OR repo:acme/web) sort:created-desc"
        );
    }

    #[tokio::test]
    async fn labels_and_milestones_inside_repo_group() {
        let resolver = MapResolver::with("acme/api", &["Sprint 4"]);
        let container = Container::new("acme/api")
            .with_sub_groups(&["sprint 4"])
            .with_filters(FilterSet {
                include_labels: vec!["bug".into(), "urgent".into()],
                exclude_labels: vec!["wontfix".into()],
                ..Default::default()
            });
        let built = GitHubSearchBuilder.build(&[container], &resolver).await;

        assert_eq!(
            built.query,
            "is:issue (repo:acme/api milestone:\"Sprint 4\" (label:\"bug\" OR label:\"urgent\") \
             -label:\"wontfix\") sort:created-desc"
        );
    }

    #[test]
    fn status_categories_map_to_issue_state() {
        let filters = FilterSet {
            status_categories: vec!["To Do".into(), "open".into(), "Blocked".into()],
            iteration_paths: vec!["S1".into()],
            ..Default::default()
        };
        let mut warnings = Vec::new();
        let clauses = GitHubSearchBuilder.filter_clauses(&filters, &mut warnings);

        assert_eq!(clauses, vec!["state:open".to_string()]);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn time_range_goes_before_sort() {
        let ranged = GitHubSearchBuilder
            .apply_time_range("is:issue repo:acme/api sort:created-desc", Some(&window()));
        assert_eq!(
            ranged,
            "is:issue repo:acme/api created:2025-01-01..2025-01-31 sort:created-desc"
        );

        let ranged = GitHubSearchBuilder.apply_time_range("label:bug OR label:crash", Some(&window()));
        assert_eq!(ranged, "(label:bug OR label:crash) created:2025-01-01..2025-01-31");
    }

    #[test]
    fn split_sort_only_takes_trailing_qualifier() {
        assert_eq!(
            split_sort("is:issue repo:a sort:updated-asc"),
            ("is:issue repo:a", Some("sort:updated-asc"))
        );
        assert_eq!(split_sort("is:issue repo:a"), ("is:issue repo:a", None));
        assert_eq!(split_sort("sort:created-desc"), ("", Some("sort:created-desc")));
    }
}
