use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ado,
    Jira,
    #[serde(rename = "github")]
    GitHub,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Ado, Provider::Jira, Provider::GitHub];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ado => "ado",
            Provider::Jira => "jira",
            Provider::GitHub => "github",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Ado => "Azure DevOps",
            Provider::Jira => "Jira",
            Provider::GitHub => "GitHub",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ado" | "azure-devops" => Ok(Provider::Ado),
            "jira" => Ok(Provider::Jira),
            "github" => Ok(Provider::GitHub),
            other => Err(SyncError::invalid_profile(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// One container, no filtering.
    Simple,
    /// Several containers with sub-groupings and filters.
    Filtered,
    /// A raw query in the provider's dialect.
    Custom,
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStrategy::Simple => "simple",
            SyncStrategy::Filtered => "filtered",
            SyncStrategy::Custom => "custom",
        })
    }
}

/// Time range presets, ordered by duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeRangePreset {
    #[serde(rename = "1W")]
    OneWeek,
    #[serde(rename = "2W")]
    TwoWeeks,
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[serde(rename = "1Y")]
    OneYear,
    #[serde(rename = "ALL")]
    All,
}

impl TimeRangePreset {
    pub const ALL: [TimeRangePreset; 7] = [
        TimeRangePreset::OneWeek,
        TimeRangePreset::TwoWeeks,
        TimeRangePreset::OneMonth,
        TimeRangePreset::ThreeMonths,
        TimeRangePreset::SixMonths,
        TimeRangePreset::OneYear,
        TimeRangePreset::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRangePreset::OneWeek => "1W",
            TimeRangePreset::TwoWeeks => "2W",
            TimeRangePreset::OneMonth => "1M",
            TimeRangePreset::ThreeMonths => "3M",
            TimeRangePreset::SixMonths => "6M",
            TimeRangePreset::OneYear => "1Y",
            TimeRangePreset::All => "ALL",
        }
    }
}

impl fmt::Display for TimeRangePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRangePreset {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        TimeRangePreset::ALL
            .into_iter()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| {
                SyncError::invalid_profile(format!(
                    "unknown time range '{s}' (expected 1W, 2W, 1M, 3M, 6M, 1Y or ALL)"
                ))
            })
    }
}

/// A concrete `[since, until]` window. `ALL` has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    pub fn from_preset(preset: TimeRangePreset, now: DateTime<Utc>) -> Option<Self> {
        let since = match preset {
            TimeRangePreset::OneWeek => now - chrono::Duration::days(7),
            TimeRangePreset::TwoWeeks => now - chrono::Duration::days(14),
            TimeRangePreset::OneMonth => now.checked_sub_months(Months::new(1))?,
            TimeRangePreset::ThreeMonths => now.checked_sub_months(Months::new(3))?,
            TimeRangePreset::SixMonths => now.checked_sub_months(Months::new(6))?,
            TimeRangePreset::OneYear => now.checked_sub_months(Months::new(12))?,
            TimeRangePreset::All => return None,
        };
        Some(Self { since, until: now })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangeConfig {
    #[serde(default = "default_preset")]
    pub default: TimeRangePreset,
    #[serde(default = "max_preset")]
    pub max: TimeRangePreset,
}

fn default_preset() -> TimeRangePreset {
    TimeRangePreset::OneMonth
}

fn max_preset() -> TimeRangePreset {
    TimeRangePreset::All
}

impl Default for TimeRangeConfig {
    fn default() -> Self {
        Self {
            default: default_preset(),
            max: max_preset(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Hard ceiling on estimated items per run.
    pub max_items_per_sync: u64,
    /// Estimated item count above which a warning is raised.
    pub warn_threshold: u64,
}

/// Optional per-container constraints. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    pub work_item_types: Vec<String>,
    pub status_categories: Vec<String>,
    pub area_paths: Vec<String>,
    pub iteration_paths: Vec<String>,
    pub include_labels: Vec<String>,
    pub exclude_labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestones: Vec<String>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.work_item_types.is_empty()
            && self.status_categories.is_empty()
            && self.area_paths.is_empty()
            && self.iteration_paths.is_empty()
            && self.include_labels.is_empty()
            && self.exclude_labels.is_empty()
            && self.assignees.is_empty()
            && self.milestones.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Project name (ADO), project key (Jira) or `owner/repo` (GitHub).
    pub id: String,
    /// Area paths, components or milestones, resolved through the dependency loader.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSet>,
}

impl Container {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sub_groups: Vec::new(),
            filters: None,
        }
    }

    pub fn with_sub_groups(mut self, sub_groups: &[&str]) -> Self {
        self.sub_groups = sub_groups.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = Some(filters);
        self
    }

    fn is_bare(&self) -> bool {
        self.sub_groups.is_empty() && self.filters.as_ref().map_or(true, FilterSet::is_empty)
    }

    /// The container stripped of sub-groups and filters.
    pub fn bare(&self) -> Self {
        Self::new(self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProfile {
    pub provider: Provider,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SyncStrategy>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_query: Option<String>,
    #[serde(default)]
    pub time_range: TimeRangeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<RateLimitConfig>,
}

impl SyncProfile {
    pub fn new(provider: Provider, display_name: impl Into<String>) -> Self {
        Self {
            provider,
            display_name: display_name.into(),
            description: None,
            strategy: None,
            containers: Vec::new(),
            custom_query: None,
            time_range: TimeRangeConfig::default(),
            rate_limits: None,
        }
    }

    /// The declared strategy, or the one implied by the profile's shape.
    pub fn effective_strategy(&self) -> SyncStrategy {
        if let Some(strategy) = self.strategy {
            return strategy;
        }
        if self.custom_query.is_some() {
            SyncStrategy::Custom
        } else if self.containers.len() > 1 || self.containers.iter().any(|c| !c.is_bare()) {
            SyncStrategy::Filtered
        } else {
            SyncStrategy::Simple
        }
    }

    pub fn validate(&self) -> Result<SyncStrategy> {
        let strategy = self.effective_strategy();
        let has_query = self
            .custom_query
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty());

        match strategy {
            SyncStrategy::Custom => {
                if !has_query {
                    return Err(SyncError::invalid_profile(
                        "custom strategy requires a custom query",
                    ));
                }
                if !self.containers.is_empty() {
                    return Err(SyncError::invalid_profile(
                        "custom strategy cannot be combined with containers",
                    ));
                }
            }
            SyncStrategy::Filtered | SyncStrategy::Simple => {
                if self.custom_query.is_some() {
                    return Err(SyncError::invalid_profile(format!(
                        "{strategy} strategy cannot be combined with a custom query"
                    )));
                }
                if self.containers.is_empty() {
                    return Err(SyncError::invalid_profile(format!(
                        "{strategy} strategy requires at least one container"
                    )));
                }
                if strategy == SyncStrategy::Simple && self.containers.len() > 1 {
                    return Err(SyncError::invalid_profile(
                        "simple strategy takes exactly one container",
                    ));
                }
            }
        }

        let mut seen = HashSet::new();
        for container in &self.containers {
            if container.id.trim().is_empty() {
                return Err(SyncError::invalid_profile("container id cannot be empty"));
            }
            if !seen.insert(container.id.as_str()) {
                return Err(SyncError::invalid_profile(format!(
                    "container '{}' is listed twice",
                    container.id
                )));
            }
        }

        if self.time_range.default > self.time_range.max {
            return Err(SyncError::invalid_profile(format!(
                "default time range {} exceeds maximum {}",
                self.time_range.default, self.time_range.max
            )));
        }

        Ok(strategy)
    }
}
