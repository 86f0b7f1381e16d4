use std::time::Duration;

use thiserror::Error;

/// Errors raised by the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The container, project or item no longer exists on the provider side.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// The provider rejected the request because the request budget is spent.
    #[error("Rate limit exceeded{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success response from the provider.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid sync profile: {0}")]
    InvalidProfile(String),

    /// Pre-flight validation refused the run.
    #[error("Sync blocked: {}", .blockers.join("; "))]
    Blocked { blockers: Vec<String> },

    #[error("Cancelled after {completed}/{total} items")]
    Cancelled { completed: usize, total: usize },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl SyncError {
    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid_profile(message: impl Into<String>) -> Self {
        Self::InvalidProfile(message.into())
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::api(status.as_u16(), e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_message_includes_retry_hint() {
        let err = SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 30s");

        let err = SyncError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "Rate limit exceeded");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn blocked_joins_blockers() {
        let err = SyncError::Blocked {
            blockers: vec!["one".into(), "two".into()],
        };
        assert_eq!(err.to_string(), "Sync blocked: one; two");
    }

    #[test]
    fn not_found_helper() {
        let err = SyncError::not_found("project Platform");
        assert!(err.is_not_found());
        assert!(!err.is_rate_limited());
        assert_eq!(err.to_string(), "Not found: project Platform");
    }
}
