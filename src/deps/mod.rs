//! Tiered loading of provider metadata through the cache store.
//!
//! Tier 1 is the provider-wide container list, tier 2 the per-container
//! sub-groups and teams, tier 3 a throttled bulk preload of tier 2.

mod preload;

use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::{self, CacheStore};
use crate::error::Result;
use crate::model::Provider;
use crate::providers::{ContainerDependencies, ContainerMetadata, MetadataSource, SubGroup};
use crate::query::SubGroupResolver;

pub use preload::{
    default_delay, CancelFlag, PreloadOptions, PreloadProgress, PreloadSummary, ProgressCallback,
    SaveStateCallback, DEFAULT_PROGRESS_EVERY,
};

/// Cached tier 1 payload, with the cap it was fetched under.
#[derive(Debug, Serialize, Deserialize)]
struct ContainerList {
    max_items: usize,
    containers: Vec<ContainerMetadata>,
}

impl ContainerList {
    /// A list shorter than its cap is complete and serves any request.
    fn covers(&self, max_items: usize) -> bool {
        self.max_items >= max_items || self.containers.len() < self.max_items
    }
}

pub struct DependencyLoader<M, S> {
    source: M,
    cache: S,
    provider: Provider,
}

impl<M: MetadataSource, S: CacheStore> DependencyLoader<M, S> {
    pub fn new(source: M, cache: S) -> Self {
        let provider = source.provider();
        Self {
            source,
            cache,
            provider,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn cache(&self) -> &S {
        &self.cache
    }

    /// Tier 1: every container visible to the credentials, in one call.
    ///
    /// A cached list fetched with a smaller cap is refetched when it may have
    /// been cut short.
    pub async fn load_metadata(&self, max_items: usize) -> Result<Vec<ContainerMetadata>> {
        let key = cache::metadata_key(self.provider);
        let list: ContainerList = self
            .read_through_if(
                &key,
                |cached: &ContainerList| cached.covers(max_items),
                || async {
                    let containers = self.source.list_containers(max_items).await?;
                    Ok(ContainerList {
                        max_items,
                        containers,
                    })
                },
            )
            .await?;
        let mut containers = list.containers;
        containers.truncate(max_items);
        Ok(containers)
    }

    /// Tier 2: sub-groups and teams of one container, fetched concurrently.
    pub async fn load_container_dependencies(
        &self,
        container_id: &str,
    ) -> Result<ContainerDependencies> {
        let key = cache::dependencies_key(self.provider, container_id);
        self.read_through(&key, || async {
            let (sub_groups, teams) = tokio::try_join!(
                self.source.fetch_sub_groups(container_id),
                self.source.fetch_teams(container_id)
            )?;
            tracing::debug!(
                "Loaded {} sub-groups and {} teams for {}",
                sub_groups.len(),
                teams.len(),
                container_id
            );
            Ok(ContainerDependencies {
                container_id: container_id.to_string(),
                sub_groups,
                teams,
                last_updated: Utc::now(),
            })
        })
        .await
    }

    /// Tier 2 for several independent containers. Results come back in completion order.
    pub async fn load_many(
        &self,
        ids: &[String],
        concurrency: usize,
    ) -> Vec<(String, Result<ContainerDependencies>)> {
        stream::iter(ids)
            .map(|id| async move { (id.clone(), self.load_container_dependencies(id).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Cache hit returns without fetching. On fetch failure a not-found
    /// drops the entry, and a rate limit falls back to a stale entry.
    async fn read_through<T, F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.read_through_if(key, |_: &T| true, fetch).await
    }

    /// `read_through`, treating a fresh entry that fails `accept` as a miss.
    async fn read_through_if<T, A, F, Fut>(&self, key: &str, accept: A, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        A: FnOnce(&T) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match cache::get_typed::<T>(&self.cache, key) {
            Ok(Some(value)) if accept(&value) => return Ok(value),
            Ok(Some(_)) => tracing::debug!("Cached {} does not cover the request, refetching", key),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable cache entry {}: {}", key, e),
        }

        match fetch().await {
            Ok(value) => {
                if let Err(e) = cache::set_typed(&self.cache, key, &value) {
                    tracing::warn!("Failed to cache {}: {}", key, e);
                }
                Ok(value)
            }
            Err(e) if e.is_not_found() => {
                tracing::info!("{} no longer exists, invalidating cache", key);
                if let Err(del) = self.cache.delete(key) {
                    tracing::warn!("Failed to invalidate {}: {}", key, del);
                }
                Err(e)
            }
            Err(e) if e.is_rate_limited() => match cache::get_stale_typed::<T>(&self.cache, key) {
                Ok(Some(stale)) => {
                    tracing::warn!("Rate limited, serving stale cache for {}", key);
                    Ok(stale)
                }
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

/// Match requested names against sub-groups by name or full path.
///
/// Returns paths for Azure DevOps (area paths are queried with `UNDER`) and
/// names everywhere else.
pub fn match_sub_groups(provider: Provider, groups: &[SubGroup], names: &[String]) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    for name in names {
        let wanted = name.trim();
        let found = groups
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(wanted) || g.path.eq_ignore_ascii_case(wanted));
        match found {
            Some(group) => {
                let native = match provider {
                    Provider::Ado => group.path.clone(),
                    Provider::Jira | Provider::GitHub => group.name.clone(),
                };
                if !resolved.contains(&native) {
                    resolved.push(native);
                }
            }
            None => tracing::debug!("No sub-group named {:?}", wanted),
        }
    }
    resolved
}

#[async_trait]
impl<M: MetadataSource, S: CacheStore> SubGroupResolver for DependencyLoader<M, S> {
    async fn resolve_sub_groups(&self, container: &str, names: &[String]) -> Result<Vec<String>> {
        let deps = self.load_container_dependencies(container).await?;
        Ok(match_sub_groups(self.provider, &deps.sub_groups, names))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::cache::{CacheEntry, MemoryCacheStore};
    use crate::error::SyncError;
    use crate::providers::tests::{Failure, MockTracker};

    type Loader = DependencyLoader<Arc<MockTracker>, Arc<MemoryCacheStore>>;

    fn loader(tracker: MockTracker) -> (Loader, Arc<MockTracker>, Arc<MemoryCacheStore>) {
        let tracker = Arc::new(tracker);
        let store = Arc::new(MemoryCacheStore::new());
        (
            DependencyLoader::new(Arc::clone(&tracker), Arc::clone(&store)),
            tracker,
            store,
        )
    }

    fn deps(container: &str, groups: &[&str]) -> ContainerDependencies {
        ContainerDependencies {
            container_id: container.to_string(),
            sub_groups: groups
                .iter()
                .map(|g| SubGroup {
                    id: g.to_string(),
                    name: g.to_string(),
                    path: g.to_string(),
                })
                .collect(),
            teams: vec![],
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cache_hit_makes_no_calls() {
        let (loader, tracker, store) = loader(MockTracker::new(Provider::Jira));
        cache::set_typed(store.as_ref(), "jira-ENG-deps", &deps("ENG", &["Backend"])).unwrap();

        let loaded = loader.load_container_dependencies("ENG").await.unwrap();
        assert_eq!(loaded.sub_groups[0].name, "Backend");
        assert!(tracker.calls().is_empty());
    }

    #[tokio::test]
    async fn miss_fetches_both_halves_and_stores() {
        let (loader, tracker, store) = loader(
            MockTracker::new(Provider::Ado)
                .with_sub_groups("Platform", &[("Core", "Platform\\Core")])
                .with_team("Platform", "Core Team"),
        );

        let loaded = loader.load_container_dependencies("Platform").await.unwrap();
        assert_eq!(loaded.sub_groups.len(), 1);
        assert_eq!(loaded.teams[0].name, "Core Team");
        assert_eq!(tracker.count("sub_groups:Platform"), 1);
        assert_eq!(tracker.count("teams:Platform"), 1);
        assert!(store.contains("ado-Platform-deps"));

        loader.load_container_dependencies("Platform").await.unwrap();
        assert_eq!(tracker.calls().len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_serves_stale_entry() {
        let (loader, tracker, store) = loader(MockTracker::new(Provider::Jira));
        let old = serde_json::to_value(deps("ENG", &["Legacy"])).unwrap();
        store.insert_entry(
            "jira-ENG-deps",
            CacheEntry::new(old, Utc::now() - Duration::hours(30)),
        );
        tracker.fail("sub_groups:ENG", Failure::RateLimited);

        let loaded = loader.load_container_dependencies("ENG").await.unwrap();
        assert_eq!(loaded.sub_groups[0].name, "Legacy");
        assert!(store.contains("jira-ENG-deps"));
    }

    #[tokio::test]
    async fn rate_limit_without_stale_entry_propagates() {
        let (loader, tracker, _) = loader(MockTracker::new(Provider::Jira));
        tracker.fail("teams:ENG", Failure::RateLimited);

        let err = loader.load_container_dependencies("ENG").await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn not_found_invalidates_entry() {
        let (loader, tracker, store) = loader(MockTracker::new(Provider::GitHub));
        let old = serde_json::to_value(deps("acme/gone", &[])).unwrap();
        store.insert_entry(
            "github-acme_gone-deps",
            CacheEntry::new(old, Utc::now() - Duration::hours(25)),
        );
        tracker.fail("sub_groups:acme/gone", Failure::NotFound);

        let err = loader.load_container_dependencies("acme/gone").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(!store.contains("github-acme_gone-deps"));
    }

    #[tokio::test]
    async fn other_errors_keep_entry_and_propagate() {
        let (loader, tracker, store) = loader(MockTracker::new(Provider::Jira));
        let old = serde_json::to_value(deps("ENG", &[])).unwrap();
        store.insert_entry(
            "jira-ENG-deps",
            CacheEntry::new(old, Utc::now() - Duration::hours(25)),
        );
        tracker.fail("sub_groups:ENG", Failure::Server);

        assert!(loader.load_container_dependencies("ENG").await.is_err());
        assert!(store.contains("jira-ENG-deps"));
    }

    #[tokio::test]
    async fn metadata_is_cached_under_provider_key() {
        let (loader, tracker, store) = loader(
            MockTracker::new(Provider::Ado)
                .with_container("Alpha")
                .with_container("Beta")
                .with_container("Gamma"),
        );

        let first = loader.load_metadata(10).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(store.contains("ado-projects"));

        let capped = loader.load_metadata(2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(tracker.count("list_containers"), 1);
    }

    #[tokio::test]
    async fn larger_metadata_request_refetches_a_capped_list() {
        let (loader, tracker, _) = loader(
            MockTracker::new(Provider::Ado)
                .with_container("Alpha")
                .with_container("Beta")
                .with_container("Gamma"),
        );

        assert_eq!(loader.load_metadata(2).await.unwrap().len(), 2);
        assert_eq!(loader.load_metadata(10).await.unwrap().len(), 3);
        assert_eq!(tracker.count("list_containers"), 2);

        assert_eq!(loader.load_metadata(5).await.unwrap().len(), 3);
        assert_eq!(tracker.count("list_containers"), 2);
    }

    fn stale_projects(names: &[&str]) -> CacheEntry {
        let list = ContainerList {
            max_items: 100,
            containers: names
                .iter()
                .map(|n| ContainerMetadata {
                    id: n.to_string(),
                    name: n.to_string(),
                    description: None,
                    state: None,
                })
                .collect(),
        };
        CacheEntry::new(
            serde_json::to_value(list).unwrap(),
            Utc::now() - Duration::hours(30),
        )
    }

    #[tokio::test]
    async fn rate_limited_metadata_serves_stale_list() {
        let (loader, tracker, store) = loader(MockTracker::new(Provider::Ado).with_container("New"));
        store.insert_entry("ado-projects", stale_projects(&["Alpha", "Beta"]));
        tracker.fail("list_containers", Failure::RateLimited);

        let containers = loader.load_metadata(100).await.unwrap();
        let ids: Vec<&str> = containers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["Alpha", "Beta"]);
        assert_eq!(tracker.count("list_containers"), 1);
        assert!(store.contains("ado-projects"));
    }

    #[tokio::test]
    async fn not_found_metadata_drops_the_cached_list() {
        let (loader, tracker, store) = loader(MockTracker::new(Provider::Ado));
        store.insert_entry("ado-projects", stale_projects(&["Alpha"]));
        tracker.fail("list_containers", Failure::NotFound);

        let err = loader.load_metadata(100).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.contains("ado-projects"));
    }

    #[tokio::test]
    async fn load_many_reports_per_container() {
        let (loader, tracker, _) = loader(
            MockTracker::new(Provider::Jira)
                .with_sub_groups("ENG", &[("Backend", "Backend")])
                .with_sub_groups("OPS", &[("Infra", "Infra")]),
        );
        tracker.fail("sub_groups:BAD", Failure::Server);

        let ids: Vec<String> = ["ENG", "OPS", "BAD"].iter().map(|s| s.to_string()).collect();
        let mut results = loader.load_many(&ids, 2).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].0, "ENG");
        assert!(results[1].1.is_ok());
        assert!(results[2].1.is_ok());
    }

    #[tokio::test]
    async fn resolver_matches_names_and_paths() {
        let (loader, _, _) = loader(MockTracker::new(Provider::Ado).with_sub_groups(
            "Platform",
            &[("Core", "Platform\\Core"), ("Web", "Platform\\Web")],
        ));

        let names = vec!["core".to_string(), "Platform\\Web".to_string(), "Mobile".to_string()];
        let resolved = loader.resolve_sub_groups("Platform", &names).await.unwrap();
        assert_eq!(resolved, vec!["Platform\\Core", "Platform\\Web"]);
    }

    #[test]
    fn flat_providers_resolve_to_names() {
        let groups = vec![SubGroup {
            id: "10".into(),
            name: "Backend".into(),
            path: "Backend".into(),
        }];
        let names = vec!["backend".to_string(), "BACKEND".to_string()];
        assert_eq!(match_sub_groups(Provider::Jira, &groups, &names), vec!["Backend"]);
    }
}
