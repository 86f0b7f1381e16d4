use std::sync::Arc;

use chrono::{Duration, Utc};

use super::*;
use crate::cache::MemoryCacheStore;
use crate::deps::DependencyLoader;
use crate::model::{
    Container, Provider, RateLimitConfig, SyncProfile, SyncStrategy, TimeRangePreset, WorkItem,
};
use crate::providers::tests::{work_item, Failure, MockTracker};
use crate::query::test_support::MapResolver;
use crate::ratelimit::{Impact, RateLimitStatus};
use crate::reconcile::{MemoryRecordStore, RecordStore};

fn repo_items() -> Vec<WorkItem> {
    (1..=3)
        .map(|n| {
            work_item(
                Provider::GitHub,
                "acme/api",
                &format!("acme/api#{n}"),
                &format!("Issue {n}"),
            )
        })
        .collect()
}

fn repo_profile() -> SyncProfile {
    let mut profile = SyncProfile::new(Provider::GitHub, "API repo");
    profile.strategy = Some(SyncStrategy::Filtered);
    profile.containers = vec![Container::new("acme/api")];
    profile
}

#[tokio::test]
async fn first_run_imports_then_second_run_is_unchanged() {
    let tracker = Arc::new(MockTracker::new(Provider::GitHub).with_items("acme/api", repo_items()));
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);
    let options = SyncOptions::default();

    let first = engine
        .run(&repo_profile(), TimeRangePreset::OneMonth, &options)
        .await
        .unwrap();
    assert_eq!(first.estimate.api_calls, 300);
    assert_eq!(first.estimate.impact, Impact::Medium);
    assert!(first.validation.safe);
    assert_eq!(first.items.len(), 3);
    assert_eq!(first.result.created, 3);
    assert_eq!(records.all().unwrap().len(), 3);

    let second = engine
        .run(&repo_profile(), TimeRangePreset::OneMonth, &options)
        .await
        .unwrap();
    assert_eq!(second.result.created, 0);
    assert_eq!(second.result.updated, 0);
    assert_eq!(second.result.unchanged, 3);
    assert!(second.result.errors.is_empty());
    assert_eq!(tracker.count("update_"), 0);
}

#[tokio::test]
async fn external_edit_is_pulled_on_the_next_run() {
    let tracker = Arc::new(MockTracker::new(Provider::GitHub).with_items("acme/api", repo_items()));
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);
    let options = SyncOptions::default();
    engine
        .run(&repo_profile(), TimeRangePreset::OneWeek, &options)
        .await
        .unwrap();

    let mut items = repo_items();
    items[1].title = "Renamed upstream".into();
    tracker.set_items("acme/api", items);

    let report = engine
        .run(&repo_profile(), TimeRangePreset::OneWeek, &options)
        .await
        .unwrap();
    assert_eq!(report.result.updated, 1);
    assert_eq!(report.result.unchanged, 2);

    let record = records.get("github:acme/api#2").unwrap().unwrap();
    assert_eq!(record.fields.title, "Renamed upstream");
}

#[tokio::test]
async fn dry_run_leaves_the_store_untouched() {
    let tracker = Arc::new(MockTracker::new(Provider::GitHub).with_items("acme/api", repo_items()));
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };

    let report = engine
        .run(&repo_profile(), TimeRangePreset::OneWeek, &options)
        .await
        .unwrap();
    assert_eq!(report.result.created, 3);
    assert!(records.all().unwrap().is_empty());
}

#[tokio::test]
async fn critical_impact_blocks_before_any_query() {
    let tracker = Arc::new(MockTracker::new(Provider::Jira).with_items(
        "ENG",
        vec![work_item(Provider::Jira, "ENG", "ENG-1", "One")],
    ));
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);
    let mut profile = SyncProfile::new(Provider::Jira, "Engineering");
    profile.containers = vec![Container::new("ENG")];

    let report = engine
        .run(&profile, TimeRangePreset::OneYear, &SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(report.estimate.api_calls, 3_600);
    assert_eq!(report.estimate.impact, Impact::Critical);
    assert!(!report.validation.safe);
    assert_eq!(report.result.errors, report.validation.blockers);
    assert!(report.queries.is_empty());
    assert_eq!(tracker.count("search:"), 0);
}

#[tokio::test]
async fn insufficient_budget_blocks() {
    let status = RateLimitStatus::new(100, 5_000, Utc::now() + Duration::minutes(30));
    let tracker = Arc::new(
        MockTracker::new(Provider::GitHub)
            .with_items("acme/api", repo_items())
            .with_budget(status),
    );
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);

    let report = engine
        .run(&repo_profile(), TimeRangePreset::OneMonth, &SyncOptions::default())
        .await
        .unwrap();

    assert!(!report.validation.safe);
    assert!(report.validation.blockers[0].starts_with("Not enough rate limit remaining"));
    assert_eq!(tracker.count("rate_limit_status"), 1);
    assert_eq!(tracker.count("search:"), 0);
}

#[tokio::test]
async fn profile_item_ceiling_blocks() {
    let tracker = Arc::new(MockTracker::new(Provider::GitHub).with_items("acme/api", repo_items()));
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);
    let mut profile = repo_profile();
    profile.rate_limits = Some(RateLimitConfig {
        max_items_per_sync: 100,
        warn_threshold: 50,
    });

    let report = engine
        .run(&profile, TimeRangePreset::OneMonth, &SyncOptions::default())
        .await
        .unwrap();
    assert!(!report.validation.safe);
    assert_eq!(tracker.count("search:"), 0);
}

#[tokio::test]
async fn preset_above_profile_maximum_is_rejected() {
    let tracker = Arc::new(MockTracker::new(Provider::GitHub));
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);
    let mut profile = repo_profile();
    profile.time_range.max = TimeRangePreset::ThreeMonths;

    let err = engine
        .run(&profile, TimeRangePreset::SixMonths, &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exceeds the profile maximum"));
    assert!(tracker.calls().is_empty());
}

#[tokio::test]
async fn container_failures_are_reported_with_the_result() {
    let tracker = Arc::new(MockTracker::new(Provider::GitHub).with_items("acme/api", repo_items()));
    tracker.fail("search:acme/gone", Failure::NotFound);
    let resolver = MapResolver::default();
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &resolver, &records);
    let mut profile = repo_profile();
    profile.containers.push(Container::new("acme/gone"));

    let report = engine
        .run(&profile, TimeRangePreset::OneWeek, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.result.created, 3);
    assert_eq!(report.result.errors.len(), 1);
    assert!(report.result.errors[0].starts_with("acme/gone:"));
}

#[tokio::test]
async fn sub_groups_resolve_through_the_dependency_loader() {
    let tracker = Arc::new(
        MockTracker::new(Provider::GitHub)
            .with_sub_groups("acme/api", &[("v1.0", "v1.0"), ("v2.0", "v2.0")])
            .with_items("acme/api", repo_items()),
    );
    let loader = DependencyLoader::new(Arc::clone(&tracker), MemoryCacheStore::new());
    let records = MemoryRecordStore::new();
    let engine = SyncEngine::new(Arc::clone(&tracker), &loader, &records);
    let mut profile = repo_profile();
    profile.containers = vec![Container::new("acme/api").with_sub_groups(&["V1.0", "v9"])];

    let report = engine
        .run(&profile, TimeRangePreset::OneWeek, &SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.queries.len(), 1);
    assert!(report.queries[0].contains("milestone:\"v1.0\""));
    assert!(!report.queries[0].contains("v9"));
    assert_eq!(tracker.count("sub_groups:acme/api"), 1);
}
