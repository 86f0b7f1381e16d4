use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// The external value was kept and copied into the local record.
    External,
    /// The local value was pushed to the external system.
    Local,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resolution::External => "external",
            Resolution::Local => "local",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub item_id: String,
    pub field: String,
    pub external_value: String,
    pub local_value: String,
    pub resolution: Resolution,
}

/// Accumulated outcome of one sync run. Errors are collected, not thrown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SyncResult {
    pub fn blocked(blockers: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            errors: blockers,
            warnings,
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} created, {} updated, {} unchanged, {} skipped",
            self.created, self.updated, self.unchanged, self.skipped
        );
        if !self.conflicts.is_empty() {
            summary.push_str(&format!(", {} conflicts", self.conflicts.len()));
        }
        if !self.errors.is_empty() {
            summary.push_str(&format!(", {} errors", self.errors.len()));
        }
        summary
    }
}
