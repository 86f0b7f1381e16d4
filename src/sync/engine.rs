use std::sync::Arc;

use chrono::Utc;

use super::strategy::StrategyResolver;
use crate::error::{Result, SyncError};
use crate::model::{SyncProfile, SyncResult, TimeRangePreset, WorkItem};
use crate::providers::{ItemSource, ItemWriter};
use crate::query::SubGroupResolver;
use crate::ratelimit::{Estimate, RateLimiter, Validation};
use crate::reconcile::{Capabilities, ConflictPolicy, ReconciliationEngine, RecordStore};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Multiplier on the preset's item estimate.
    pub scaling_factor: f64,
    pub dry_run: bool,
    pub capabilities: Capabilities,
    pub policy: ConflictPolicy,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            scaling_factor: 1.0,
            dry_run: false,
            capabilities: Capabilities::default(),
            policy: ConflictPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub items: Vec<WorkItem>,
    pub result: SyncResult,
    pub estimate: Estimate,
    pub validation: Validation,
    pub queries: Vec<String>,
}

/// One profile run: check the budget, fetch, reconcile.
pub struct SyncEngine<'a, C: ?Sized> {
    client: Arc<C>,
    sub_groups: &'a dyn SubGroupResolver,
    records: &'a dyn RecordStore,
}

impl<'a, C> SyncEngine<'a, C>
where
    C: ItemSource + ItemWriter + ?Sized,
{
    pub fn new(
        client: Arc<C>,
        sub_groups: &'a dyn SubGroupResolver,
        records: &'a dyn RecordStore,
    ) -> Self {
        Self {
            client,
            sub_groups,
            records,
        }
    }

    /// Estimate the run and check it against the provider's current budget.
    pub async fn assess(
        &self,
        profile: &SyncProfile,
        preset: TimeRangePreset,
        scaling_factor: f64,
    ) -> (Estimate, Validation) {
        let limiter = RateLimiter::new(profile.provider);
        let estimate = limiter.estimate(preset, scaling_factor);

        let status = match self.client.rate_limit_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Could not read {} rate limit: {}", profile.provider, e);
                None
            }
        };
        if let Some(status) = &status {
            tracing::debug!("{}", RateLimiter::format_status(status, Utc::now()));
        }

        let mut validation = limiter.validate(&estimate, status.as_ref());
        if let Some(limits) = &profile.rate_limits {
            limiter.apply_profile_limits(&estimate, limits, &mut validation);
        }
        (estimate, validation)
    }

    pub async fn run(
        &self,
        profile: &SyncProfile,
        preset: TimeRangePreset,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        let strategy = StrategyResolver::resolve(profile)?;
        if preset > profile.time_range.max {
            return Err(SyncError::invalid_profile(format!(
                "time range {} exceeds the profile maximum {}",
                preset, profile.time_range.max
            )));
        }
        tracing::info!(
            "Syncing {} ({} strategy, {})",
            profile.display_name,
            strategy,
            preset
        );

        let (estimate, validation) = self.assess(profile, preset, options.scaling_factor).await;
        tracing::info!("{}", RateLimiter::format_estimate(&estimate));
        for warning in &validation.warnings {
            tracing::warn!("{}", warning);
        }
        if !validation.safe {
            for blocker in &validation.blockers {
                tracing::error!("{}", blocker);
            }
            return Ok(SyncReport {
                items: Vec::new(),
                result: SyncResult::blocked(validation.blockers.clone(), validation.warnings.clone()),
                estimate,
                validation,
                queries: Vec::new(),
            });
        }

        let resolver =
            StrategyResolver::new(&self.client, self.sub_groups).with_retry(options.retry);
        let fetched = resolver.fetch(profile, preset, Utc::now()).await?;
        tracing::info!("Fetched {} items", fetched.items.len());

        let reconciler = ReconciliationEngine::new(Arc::clone(&self.client), options.capabilities)
            .with_policy(options.policy)
            .with_dry_run(options.dry_run);
        let mut result = reconciler.reconcile(&fetched.items, self.records).await;

        let mut errors = fetched.errors;
        errors.append(&mut result.errors);
        result.errors = errors;
        let mut warnings = validation.warnings.clone();
        warnings.extend(fetched.warnings);
        warnings.append(&mut result.warnings);
        result.warnings = warnings;

        tracing::info!("{}: {}", profile.display_name, result.summary());
        Ok(SyncReport {
            items: fetched.items,
            result,
            estimate,
            validation,
            queries: fetched.queries,
        })
    }
}
