use super::{guard, keyword_spans, or_group, split_terminal, unsupported, QueryBuilder};
use crate::model::{FilterSet, Provider, TimeWindow};

const SELECT: &str = "SELECT [System.Id], [System.Title], [System.State] FROM WorkItems";
const ORDER: &str = "ORDER BY [System.CreatedDate] DESC";

/// Azure DevOps WIQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct WiqlBuilder;

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn in_list(field: &str, values: &[String]) -> String {
    let list: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("{field} IN ({})", list.join(", "))
}

fn each(field: &str, op: &str, values: &[String]) -> String {
    or_group(
        values
            .iter()
            .map(|v| format!("{field} {op} {}", quote(v)))
            .collect(),
    )
}

impl QueryBuilder for WiqlBuilder {
    fn provider(&self) -> Provider {
        Provider::Ado
    }

    fn sub_group_label(&self) -> &'static str {
        "area paths"
    }

    fn container_clause(&self, container_id: &str) -> String {
        format!("[System.TeamProject] = {}", quote(container_id))
    }

    fn sub_group_clause(&self, resolved: &[String]) -> String {
        each("[System.AreaPath]", "UNDER", resolved)
    }

    fn filter_clauses(&self, filters: &FilterSet, warnings: &mut Vec<String>) -> Vec<String> {
        let mut clauses = Vec::new();
        if !filters.work_item_types.is_empty() {
            clauses.push(in_list("[System.WorkItemType]", &filters.work_item_types));
        }
        if !filters.status_categories.is_empty() {
            clauses.push(in_list("[System.State]", &filters.status_categories));
        }
        if !filters.area_paths.is_empty() {
            clauses.push(each("[System.AreaPath]", "UNDER", &filters.area_paths));
        }
        if !filters.iteration_paths.is_empty() {
            clauses.push(each("[System.IterationPath]", "UNDER", &filters.iteration_paths));
        }
        if !filters.include_labels.is_empty() {
            clauses.push(each("[System.Tags]", "CONTAINS", &filters.include_labels));
        }
        for label in &filters.exclude_labels {
            clauses.push(format!("NOT [System.Tags] CONTAINS {}", quote(label)));
        }
        if !filters.assignees.is_empty() {
            clauses.push(each("[System.AssignedTo]", "=", &filters.assignees));
        }
        if !filters.milestones.is_empty() {
            warnings.push(unsupported("milestones", Provider::Ado));
        }
        clauses
    }

    fn finish(&self, condition: &str) -> String {
        if condition.is_empty() {
            format!("{SELECT} {ORDER}")
        } else {
            format!("{SELECT} WHERE {condition} {ORDER}")
        }
    }

    fn apply_time_range(&self, query: &str, window: Option<&TimeWindow>) -> String {
        let Some(window) = window else {
            return query.to_string();
        };
        // WIQL rejects time components unless timePrecision is requested.
        let range = format!(
            "[System.CreatedDate] >= '{}' AND [System.CreatedDate] <= '{}'",
            window.since.format("%Y-%m-%d"),
            window.until.format("%Y-%m-%d")
        );

        let (body, order) = split_terminal(query, "ORDER BY");
        let filtered = match keyword_spans(body, "WHERE").first() {
            Some(&(start, end)) => {
                let condition = body[end..].trim();
                let head = body[..start].trim_end();
                if condition.is_empty() {
                    format!("{head} WHERE {range}")
                } else {
                    format!("{head} WHERE {} AND {range}", guard(condition))
                }
            }
            None if body.is_empty() => range,
            None => format!("{body} WHERE {range}"),
        };

        match order {
            Some(order) => format!("{filtered} {order}"),
            None => filtered,
        }
    }
}
