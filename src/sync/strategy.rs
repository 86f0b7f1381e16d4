use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Container, SyncProfile, SyncStrategy, TimeRangePreset, TimeWindow, WorkItem};
use crate::providers::ItemSource;
use crate::query::{builder_for, BuiltQuery, QueryBuilder, SubGroupResolver};
use crate::retry::{execute_with_retry, RetryPolicy};

/// Items and diagnostics from one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub items: Vec<WorkItem>,
    pub warnings: Vec<String>,
    /// Per-container failures that did not stop the fetch.
    pub errors: Vec<String>,
    /// Every query sent, in order.
    pub queries: Vec<String>,
}

/// Turns a profile into queries and executes them.
pub struct StrategyResolver<'a> {
    source: &'a dyn ItemSource,
    sub_groups: &'a dyn SubGroupResolver,
    retry: RetryPolicy,
}

impl<'a> StrategyResolver<'a> {
    pub fn new(source: &'a dyn ItemSource, sub_groups: &'a dyn SubGroupResolver) -> Self {
        Self {
            source,
            sub_groups,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The declared strategy when valid, otherwise the one inferred from shape.
    pub fn resolve(profile: &SyncProfile) -> Result<SyncStrategy> {
        profile.validate()
    }

    /// The combined query for the whole profile, time range applied.
    pub async fn build_query(
        &self,
        profile: &SyncProfile,
        preset: TimeRangePreset,
        now: DateTime<Utc>,
    ) -> Result<BuiltQuery> {
        let strategy = Self::resolve(profile)?;
        let builder = builder_for(profile.provider);
        let window = TimeWindow::from_preset(preset, now);

        let built = match strategy {
            SyncStrategy::Custom => BuiltQuery {
                query: builder.render_custom(profile.custom_query.as_deref().unwrap_or_default()),
                warnings: Vec::new(),
            },
            SyncStrategy::Simple => {
                let bare: Vec<Container> = profile.containers.iter().map(Container::bare).collect();
                builder.build(&bare, self.sub_groups).await
            }
            SyncStrategy::Filtered => builder.build(&profile.containers, self.sub_groups).await,
        };

        Ok(BuiltQuery {
            query: builder.apply_time_range(&built.query, window.as_ref()),
            warnings: built.warnings,
        })
    }

    /// Run the profile's queries.
    ///
    /// Simple and custom profiles run one query and fail as a whole. Filtered
    /// profiles run one query per container so a failing container is
    /// recorded and skipped.
    pub async fn fetch(
        &self,
        profile: &SyncProfile,
        preset: TimeRangePreset,
        now: DateTime<Utc>,
    ) -> Result<FetchOutcome> {
        let strategy = Self::resolve(profile)?;
        let mut outcome = FetchOutcome::default();

        match strategy {
            SyncStrategy::Simple | SyncStrategy::Custom => {
                let built = self.build_query(profile, preset, now).await?;
                let container = match strategy {
                    SyncStrategy::Simple => profile
                        .containers
                        .first()
                        .map(|c| c.id.as_str())
                        .unwrap_or_default(),
                    _ => "",
                };
                tracing::info!("{} query: {}", strategy, built.query);
                outcome.items = self.search(&built.query, container).await?;
                outcome.warnings = built.warnings;
                outcome.queries.push(built.query);
            }
            SyncStrategy::Filtered => {
                let builder = builder_for(profile.provider);
                let window = TimeWindow::from_preset(preset, now);
                let mut seen = HashSet::new();

                for container in &profile.containers {
                    let query = self
                        .container_query(builder.as_ref(), container, window.as_ref(), &mut outcome)
                        .await;
                    tracing::info!("Query for {}: {}", container.id, query);

                    match self.search(&query, &container.id).await {
                        Ok(items) => {
                            tracing::debug!("{} items from {}", items.len(), container.id);
                            outcome
                                .items
                                .extend(items.into_iter().filter(|i| seen.insert(i.id.clone())));
                        }
                        Err(e) => {
                            tracing::warn!("Fetch failed for {}: {}", container.id, e);
                            outcome.errors.push(format!("{}: {}", container.id, e));
                        }
                    }
                    outcome.queries.push(query);
                }
            }
        }

        Ok(outcome)
    }

    async fn container_query(
        &self,
        builder: &dyn QueryBuilder,
        container: &Container,
        window: Option<&TimeWindow>,
        outcome: &mut FetchOutcome,
    ) -> String {
        let built = builder
            .build(std::slice::from_ref(container), self.sub_groups)
            .await;
        outcome.warnings.extend(built.warnings);
        builder.apply_time_range(&built.query, window)
    }

    async fn search(&self, query: &str, container: &str) -> Result<Vec<WorkItem>> {
        let label = if container.is_empty() { "search" } else { container };
        execute_with_retry(&self.retry, label, || self.source.search(query, container)).await
    }
}
