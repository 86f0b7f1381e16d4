use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::DependencyLoader;
use crate::cache::CacheStore;
use crate::error::{Result, SyncError};
use crate::model::Provider;
use crate::providers::MetadataSource;

pub const DEFAULT_PROGRESS_EVERY: usize = 5;

/// Pause between containers during a bulk preload.
pub fn default_delay(provider: Provider) -> Duration {
    match provider {
        Provider::Ado => Duration::from_millis(300),
        Provider::Jira => Duration::from_millis(200),
        Provider::GitHub => Duration::from_millis(100),
    }
}

/// Cooperative cancellation shared between a signal handler and a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadProgress {
    pub completed: usize,
    pub total: usize,
    pub container: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    pub total: usize,
    pub completed: usize,
    pub loaded: usize,
    /// `"{container}: {error}"` for each container that failed.
    pub failed: Vec<String>,
    pub cancelled: bool,
}

pub type ProgressCallback = Box<dyn Fn(&PreloadProgress) + Send + Sync>;
pub type SaveStateCallback = Box<dyn Fn(&PreloadSummary) + Send + Sync>;

pub struct PreloadOptions {
    pub delay: Duration,
    pub progress_every: usize,
    pub cancel: CancelFlag,
    on_progress: Option<ProgressCallback>,
    on_save_state: Option<SaveStateCallback>,
}

impl PreloadOptions {
    pub fn for_provider(provider: Provider) -> Self {
        Self {
            delay: default_delay(provider),
            progress_every: DEFAULT_PROGRESS_EVERY,
            cancel: CancelFlag::new(),
            on_progress: None,
            on_save_state: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(&PreloadProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Called with the partial summary when the preload is cancelled.
    pub fn on_save_state(
        mut self,
        callback: impl Fn(&PreloadSummary) + Send + Sync + 'static,
    ) -> Self {
        self.on_save_state = Some(Box::new(callback));
        self
    }
}

impl<M: MetadataSource, S: CacheStore> DependencyLoader<M, S> {
    /// Tier 3: warm the dependency cache for every container, one at a time.
    ///
    /// Failures are counted and logged. Cancellation is checked before each
    /// container; the partial summary goes to `on_save_state` and the call
    /// returns [`SyncError::Cancelled`].
    pub async fn preload_all(
        &self,
        ids: &[String],
        options: &PreloadOptions,
    ) -> Result<PreloadSummary> {
        let mut summary = PreloadSummary {
            total: ids.len(),
            ..Default::default()
        };
        let every = options.progress_every.max(1);
        tracing::info!("Preloading dependencies for {} containers", ids.len());

        for (i, id) in ids.iter().enumerate() {
            if options.cancel.is_cancelled() {
                summary.cancelled = true;
                tracing::warn!(
                    "Preload cancelled after {}/{} containers",
                    summary.completed,
                    summary.total
                );
                if let Some(save) = &options.on_save_state {
                    save(&summary);
                }
                return Err(SyncError::Cancelled {
                    completed: summary.completed,
                    total: summary.total,
                });
            }

            match self.load_container_dependencies(id).await {
                Ok(_) => summary.loaded += 1,
                Err(e) => {
                    tracing::warn!("Failed to preload {}: {}", id, e);
                    summary.failed.push(format!("{id}: {e}"));
                }
            }
            summary.completed += 1;

            if summary.completed % every == 0 || summary.completed == summary.total {
                tracing::info!("Preload progress: {}/{}", summary.completed, summary.total);
                if let Some(progress) = &options.on_progress {
                    progress(&PreloadProgress {
                        completed: summary.completed,
                        total: summary.total,
                        container: id.clone(),
                    });
                }
            }

            if i + 1 < ids.len() && !options.delay.is_zero() {
                tokio::time::sleep(options.delay).await;
            }
        }

        tracing::info!(
            "Preload finished: {} loaded, {} failed",
            summary.loaded,
            summary.failed.len()
        );
        Ok(summary)
    }
}
