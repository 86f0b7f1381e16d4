//! Translation of containers and filter sets into provider query dialects.
//!
//! Containers combine with OR at the top level, the clauses of one container
//! combine with AND, and multi-valued filters become one OR group (or an `IN`
//! list). Sub-groupings are resolved through a [`SubGroupResolver`] before the
//! container clause is finalized; a failed or empty resolution drops the
//! constraint with a warning instead of failing the query.

pub mod github;
pub mod jql;
pub mod wiql;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Container, FilterSet, Provider, TimeWindow};

pub use github::GitHubSearchBuilder;
pub use jql::JqlBuilder;
pub use wiql::WiqlBuilder;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltQuery {
    pub query: String,
    /// Constraints that were dropped while building.
    pub warnings: Vec<String>,
}

/// Resolves sub-grouping names into dialect-native identifiers.
#[async_trait]
pub trait SubGroupResolver: Send + Sync {
    async fn resolve_sub_groups(&self, container: &str, names: &[String]) -> Result<Vec<String>>;
}

#[async_trait]
pub trait QueryBuilder: Send + Sync {
    fn provider(&self) -> Provider;

    /// What sub-groupings are called in this dialect, for warnings.
    fn sub_group_label(&self) -> &'static str;

    fn container_clause(&self, container_id: &str) -> String;

    fn sub_group_clause(&self, resolved: &[String]) -> String;

    /// One clause per non-empty filter; inexpressible filters push a warning.
    fn filter_clauses(&self, filters: &FilterSet, warnings: &mut Vec<String>) -> Vec<String>;

    /// Conjunction of clauses inside one container.
    fn and_join(&self, parts: &[String]) -> String {
        parts.join(" AND ")
    }

    /// Wrap the combined condition into a complete query with ordering.
    fn finish(&self, condition: &str) -> String;

    /// Add a created-date window before the terminal ordering clause, or append it.
    fn apply_time_range(&self, query: &str, window: Option<&TimeWindow>) -> String;

    /// Normalize a user-supplied raw query.
    fn render_custom(&self, raw: &str) -> String {
        raw.trim().to_string()
    }

    async fn build(
        &self,
        containers: &[Container],
        resolver: &dyn SubGroupResolver,
    ) -> BuiltQuery {
        let mut warnings = Vec::new();
        let mut clauses = Vec::with_capacity(containers.len());

        for container in containers {
            let mut parts = vec![self.container_clause(&container.id)];

            if !container.sub_groups.is_empty() {
                match resolver
                    .resolve_sub_groups(&container.id, &container.sub_groups)
                    .await
                {
                    Ok(resolved) if !resolved.is_empty() => {
                        parts.push(self.sub_group_clause(&resolved));
                    }
                    Ok(_) => {
                        let msg = format!(
                            "No matching {} found for {}, syncing the whole container",
                            self.sub_group_label(),
                            container.id
                        );
                        tracing::warn!("{}", msg);
                        warnings.push(msg);
                    }
                    Err(e) => {
                        let msg = format!(
                            "Failed to resolve {} for {}, syncing the whole container: {}",
                            self.sub_group_label(),
                            container.id,
                            e
                        );
                        tracing::warn!("{}", msg);
                        warnings.push(msg);
                    }
                }
            }

            if let Some(filters) = &container.filters {
                let mut filter_warnings = Vec::new();
                parts.extend(self.filter_clauses(filters, &mut filter_warnings));
                warnings.extend(
                    filter_warnings
                        .into_iter()
                        .map(|w| format!("{}: {}", container.id, w)),
                );
            }

            clauses.push(if parts.len() == 1 {
                parts.remove(0)
            } else {
                format!("({})", self.and_join(&parts))
            });
        }

        let condition = match clauses.len() {
            0 => String::new(),
            1 => clauses.remove(0),
            _ => format!("({})", clauses.join(" OR ")),
        };

        BuiltQuery {
            query: self.finish(&condition),
            warnings,
        }
    }
}

pub fn builder_for(provider: Provider) -> Box<dyn QueryBuilder> {
    match provider {
        Provider::Ado => Box::new(WiqlBuilder),
        Provider::Jira => Box::new(JqlBuilder),
        Provider::GitHub => Box::new(GitHubSearchBuilder),
    }
}

/// `(a OR b)` for several values, the bare clause for one.
pub(crate) fn or_group(clauses: Vec<String>) -> String {
    if clauses.len() == 1 {
        clauses.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", clauses.join(" OR "))
    }
}

pub(crate) fn unsupported(filter: &str, provider: Provider) -> String {
    format!("{filter} filter is not supported by {provider} queries and was ignored")
}

/// Split `query` at the last top-level occurrence of the keyword phrase `marker`.
pub(crate) fn split_terminal<'a>(query: &'a str, marker: &str) -> (&'a str, Option<&'a str>) {
    match keyword_spans(query, marker).last() {
        Some(&(start, _)) => (query[..start].trim_end(), Some(query[start..].trim())),
        None => (query.trim_end(), None),
    }
}

/// Whether `condition` has an `OR` outside parentheses, brackets and quotes.
pub(crate) fn has_top_level_or(condition: &str) -> bool {
    !keyword_spans(condition, "OR").is_empty()
}

/// Parenthesize `condition` when another clause will be ANDed onto it.
pub(crate) fn guard(condition: &str) -> String {
    if has_top_level_or(condition) {
        format!("({condition})")
    } else {
        condition.to_string()
    }
}

/// Byte spans of every top-level occurrence of `keyword`.
///
/// The keyword's words match whole words case-insensitively and may be
/// separated by any run of whitespace (`ORDER\n  BY`).
pub(crate) fn keyword_spans(text: &str, keyword: &str) -> Vec<(usize, usize)> {
    let wanted: Vec<&str> = keyword.split_whitespace().collect();
    if wanted.is_empty() {
        return Vec::new();
    }
    let words = words(text);
    let mut spans = Vec::new();

    for i in 0..words.len() {
        let Some(candidate) = words.get(i..i + wanted.len()) else {
            break;
        };
        let matches = candidate
            .iter()
            .zip(&wanted)
            .all(|(&(s, e), w)| text[s..e].eq_ignore_ascii_case(w));
        let separated = candidate
            .windows(2)
            .all(|pair| text[pair[0].1..pair[1].0].chars().all(char::is_whitespace));
        let (start, _) = candidate[0];
        if matches && separated && depth_at(text, start) == 0 {
            spans.push((start, candidate[wanted.len() - 1].1));
        }
    }
    spans
}

/// Spans of maximal runs of word characters.
fn words(text: &str) -> Vec<(usize, usize)> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (start, is_word(c)) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                spans.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Nesting depth at byte `idx`, counting parentheses and WIQL field brackets.
/// Quoted text counts as one level deeper.
fn depth_at(text: &str, idx: usize) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        if i >= idx {
            break;
        }
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') | (None, '[') => depth += 1,
            (None, ')') | (None, ']') => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    if quote.is_some() {
        depth + 1
    } else {
        depth
    }
}
