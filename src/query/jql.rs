use super::{guard, or_group, split_terminal, unsupported, QueryBuilder};
use crate::model::{FilterSet, Provider, TimeWindow};

const ORDER: &str = "ORDER BY created DESC";
const JQL_DATE: &str = "%Y-%m-%d %H:%M";

/// Jira JQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct JqlBuilder;

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn in_list(field: &str, values: &[String]) -> String {
    let list: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("{field} in ({})", list.join(", "))
}

impl QueryBuilder for JqlBuilder {
    fn provider(&self) -> Provider {
        Provider::Jira
    }

    fn sub_group_label(&self) -> &'static str {
        "components"
    }

    fn container_clause(&self, container_id: &str) -> String {
        format!("project = {}", quote(container_id))
    }

    fn sub_group_clause(&self, resolved: &[String]) -> String {
        in_list("component", resolved)
    }

    fn filter_clauses(&self, filters: &FilterSet, warnings: &mut Vec<String>) -> Vec<String> {
        let mut clauses = Vec::new();
        if !filters.work_item_types.is_empty() {
            clauses.push(in_list("issuetype", &filters.work_item_types));
        }
        if !filters.status_categories.is_empty() {
            clauses.push(in_list("statusCategory", &filters.status_categories));
        }
        if !filters.area_paths.is_empty() {
            warnings.push(unsupported("area paths", Provider::Jira));
        }
        if !filters.iteration_paths.is_empty() {
            clauses.push(in_list("sprint", &filters.iteration_paths));
        }
        if !filters.include_labels.is_empty() {
            clauses.push(or_group(
                filters
                    .include_labels
                    .iter()
                    .map(|l| format!("labels = {}", quote(l)))
                    .collect(),
            ));
        }
        if !filters.exclude_labels.is_empty() {
            // `not in` alone drops issues without any labels.
            clauses.push(format!(
                "(labels is EMPTY OR {})",
                in_list("labels not", &filters.exclude_labels)
            ));
        }
        if !filters.assignees.is_empty() {
            clauses.push(in_list("assignee", &filters.assignees));
        }
        if !filters.milestones.is_empty() {
            clauses.push(in_list("fixVersion", &filters.milestones));
        }
        clauses
    }

    fn finish(&self, condition: &str) -> String {
        if condition.is_empty() {
            ORDER.to_string()
        } else {
            format!("{condition} {ORDER}")
        }
    }

    fn apply_time_range(&self, query: &str, window: Option<&TimeWindow>) -> String {
        let Some(window) = window else {
            return query.to_string();
        };
        let range = format!(
            "created >= \"{}\" AND created <= \"{}\"",
            window.since.format(JQL_DATE),
            window.until.format(JQL_DATE)
        );

        let (body, order) = split_terminal(query, "ORDER BY");
        let filtered = if body.is_empty() {
            range
        } else {
            format!("{} AND {range}", guard(body))
        };

        match order {
            Some(order) => format!("{filtered} {order}"),
            None => filtered,
        }
    }
}
