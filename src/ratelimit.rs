//! Pre-flight rate-limit protection: cost estimation, impact classification,
//! run validation and backoff delays.
//!
//! Request budgets differ by orders of magnitude between providers, so every
//! provider carries its own threshold table.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Provider, RateLimitConfig, TimeRangePreset};

/// Base delay for the first retry.
pub const BASE_BACKOFF_MS: u64 = 1_000;

/// Default ceiling for `RateLimiter::backoff`.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5 * 60 * 1_000;

/// API calls per fetched item (pagination and detail batches).
pub const API_CALLS_PER_ITEM: f64 = 1.5;

/// Throughput used to estimate run duration.
pub const ITEMS_PER_MINUTE: u64 = 100;

/// Runs estimated to take longer than this raise a warning.
const LONG_RUN_MINUTES: u64 = 10;

/// Budget usage above which a warning is raised before starting.
const HIGH_USAGE_PERCENT: f64 = 80.0;

/// Remaining budget after the run below this share of the limit raises a warning.
const LOW_REMAINING_PERCENT: u64 = 5;

/// Request budget and impact thresholds (in API calls) for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub limit: u64,
    pub window: &'static str,
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl ProviderLimits {
    pub const fn for_provider(provider: Provider) -> Self {
        match provider {
            // 5000 requests/hour
            Provider::GitHub => Self {
                limit: 5_000,
                window: "1h",
                low: 250,
                medium: 1_000,
                high: 2_500,
            },
            // ~100 requests/minute
            Provider::Jira => Self {
                limit: 100,
                window: "1m",
                low: 25,
                medium: 50,
                high: 75,
            },
            // 200 requests per 5 minute window
            Provider::Ado => Self {
                limit: 200,
                window: "5m",
                low: 50,
                medium: 100,
                high: 150,
            },
        }
    }
}

/// Baseline item count for a preset.
pub fn items_for_preset(preset: TimeRangePreset) -> u64 {
    match preset {
        TimeRangePreset::OneWeek => 50,
        TimeRangePreset::TwoWeeks => 100,
        TimeRangePreset::OneMonth => 200,
        TimeRangePreset::ThreeMonths => 600,
        TimeRangePreset::SixMonths => 1_200,
        TimeRangePreset::OneYear => 2_400,
        TimeRangePreset::All => 5_000,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Impact::Low => "low",
            Impact::Medium => "medium",
            Impact::High => "high",
            Impact::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub items: u64,
    pub api_calls: u64,
    pub duration_minutes: u64,
    pub impact: Impact,
}

/// Current remaining request budget as reported (or assumed) for a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
    pub percent_used: f64,
}

impl RateLimitStatus {
    pub fn new(remaining: u64, limit: u64, reset_at: DateTime<Utc>) -> Self {
        let percent_used = if limit == 0 {
            100.0
        } else {
            limit.saturating_sub(remaining) as f64 / limit as f64 * 100.0
        };
        Self {
            remaining,
            limit,
            reset_at,
            percent_used,
        }
    }

    /// Providers without a rate-limit endpoint: assume the full budget.
    pub fn assumed_full(provider: Provider, now: DateTime<Utc>) -> Self {
        let limits = ProviderLimits::for_provider(provider);
        let window = match provider {
            Provider::Jira => chrono::Duration::minutes(1),
            Provider::Ado => chrono::Duration::minutes(5),
            Provider::GitHub => chrono::Duration::hours(1),
        };
        Self::new(limits.limit, limits.limit, now + window)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub safe: bool,
    pub warnings: Vec<String>,
    pub blockers: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    provider: Provider,
    limits: ProviderLimits,
}

impl RateLimiter {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            limits: ProviderLimits::for_provider(provider),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn limits(&self) -> ProviderLimits {
        self.limits
    }

    /// Estimate the cost of syncing `preset`, scaled by `scaling_factor`.
    pub fn estimate(&self, preset: TimeRangePreset, scaling_factor: f64) -> Estimate {
        let factor = if scaling_factor.is_finite() && scaling_factor > 0.0 {
            scaling_factor
        } else {
            1.0
        };
        let items = (items_for_preset(preset) as f64 * factor).ceil() as u64;
        let api_calls = (items as f64 * API_CALLS_PER_ITEM).ceil() as u64;
        let duration_minutes = items.div_ceil(ITEMS_PER_MINUTE);

        Estimate {
            items,
            api_calls,
            duration_minutes,
            impact: self.impact(api_calls),
        }
    }

    pub fn impact(&self, api_calls: u64) -> Impact {
        if api_calls < self.limits.low {
            Impact::Low
        } else if api_calls < self.limits.medium {
            Impact::Medium
        } else if api_calls < self.limits.high {
            Impact::High
        } else {
            Impact::Critical
        }
    }

    /// Decide whether a run is safe. Blockers make it unsafe; warnings do not.
    pub fn validate(&self, estimate: &Estimate, status: Option<&RateLimitStatus>) -> Validation {
        let mut warnings = Vec::new();
        let mut blockers = Vec::new();

        match estimate.impact {
            Impact::High => warnings.push(format!(
                "High rate limit impact: {} API calls (~{}% of the {} budget)",
                estimate.api_calls,
                self.impact_percentage(estimate.api_calls),
                self.provider
            )),
            Impact::Critical => blockers.push(format!(
                "Critical rate limit impact: {} API calls exceeds the safe threshold for {}",
                estimate.api_calls, self.provider
            )),
            Impact::Low | Impact::Medium => {}
        }

        if estimate.duration_minutes > LONG_RUN_MINUTES {
            warnings.push(format!(
                "Long sync duration: ~{} minutes",
                estimate.duration_minutes
            ));
        }

        if let Some(status) = status {
            if status.percent_used > HIGH_USAGE_PERCENT {
                warnings.push(format!(
                    "Rate limit already {:.0}% used, resets at {}",
                    status.percent_used,
                    status.reset_at.to_rfc3339()
                ));
            }

            match status.remaining.checked_sub(estimate.api_calls) {
                None => blockers.push(format!(
                    "Not enough rate limit remaining: need {} calls, {} remaining (resets at {})",
                    estimate.api_calls,
                    status.remaining,
                    status.reset_at.to_rfc3339()
                )),
                Some(after) if after * 100 < status.limit * LOW_REMAINING_PERCENT => {
                    warnings.push(format!(
                        "Only {after} requests would remain after the sync"
                    ))
                }
                Some(_) => {}
            }
        }

        Validation {
            safe: blockers.is_empty(),
            warnings,
            blockers,
        }
    }

    /// Apply a profile's item ceilings to a validation.
    pub fn apply_profile_limits(
        &self,
        estimate: &Estimate,
        config: &RateLimitConfig,
        validation: &mut Validation,
    ) {
        if estimate.items > config.max_items_per_sync {
            validation.blockers.push(format!(
                "Estimated {} items exceeds the profile maximum of {}",
                estimate.items, config.max_items_per_sync
            ));
        } else if estimate.items > config.warn_threshold {
            validation.warnings.push(format!(
                "Estimated {} items exceeds the profile warning threshold of {}",
                estimate.items, config.warn_threshold
            ));
        }
        validation.safe = validation.blockers.is_empty();
    }

    /// Exponential backoff: `1s * 2^attempt`, capped at `max_backoff_ms`.
    pub fn backoff(attempt: u32, max_backoff_ms: Option<u64>) -> u64 {
        let cap = max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS);
        2u64.saturating_pow(attempt)
            .saturating_mul(BASE_BACKOFF_MS)
            .min(cap)
    }

    pub fn backoff_duration(attempt: u32, max_backoff_ms: Option<u64>) -> Duration {
        Duration::from_millis(Self::backoff(attempt, max_backoff_ms))
    }

    fn impact_percentage(&self, api_calls: u64) -> u64 {
        (api_calls as f64 / self.limits.limit as f64 * 100.0).round() as u64
    }

    pub fn format_estimate(estimate: &Estimate) -> String {
        format!(
            "{} items | {} API calls | ~{} min | impact: {}",
            estimate.items,
            estimate.api_calls,
            estimate.duration_minutes,
            estimate.impact.to_string().to_uppercase()
        )
    }

    pub fn format_status(status: &RateLimitStatus, now: DateTime<Utc>) -> String {
        let minutes = (status.reset_at - now).num_minutes().max(0);
        format!(
            "{}/{} ({:.0}% available) | resets in {} min",
            status.remaining,
            status.limit,
            100.0 - status.percent_used,
            minutes
        )
    }
}
