use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::Provider;
use super::work_item::WorkItem;

/// Where a tracked item was authored; decides the sync direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Authored locally, mirrored outward.
    Internal,
    /// Authored in the external system, mirrored inward.
    External,
}

/// The fields that take part in reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFields {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl From<&WorkItem> for ItemFields {
    fn from(item: &WorkItem) -> Self {
        let mut labels = item.labels.clone();
        labels.sort();
        Self {
            title: item.title.clone(),
            description: item.description.clone(),
            status: item.status.clone(),
            labels,
        }
    }
}

/// Local task progress waiting to be reported on the external item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub completed_tasks: u32,
    pub total_tasks: u32,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ProgressUpdate {
    pub fn percentage(&self) -> u32 {
        if self.total_tasks == 0 {
            return 0;
        }
        self.completed_tasks.min(self.total_tasks) * 100 / self.total_tasks
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Local identifier (user story or task id).
    pub id: String,
    pub provider: Provider,
    /// `WorkItem::id` of the mirrored external item.
    pub external_id: String,
    /// Id used for write calls (see `WorkItem::api_id`).
    pub api_id: String,
    pub origin: Origin,
    pub fields: ItemFields,
    /// External field values as recorded at the previous sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced: Option<ItemFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_progress: Option<ProgressUpdate>,
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    /// A record imported from the external system on first sight.
    pub fn imported(item: &WorkItem, now: DateTime<Utc>) -> Self {
        let fields = ItemFields::from(item);
        Self {
            id: format!("{}:{}", item.source, item.id),
            provider: item.source,
            external_id: item.id.clone(),
            api_id: item.api_id().to_string(),
            origin: Origin::External,
            synced: Some(fields.clone()),
            fields,
            pending_progress: None,
            container: item.container.clone(),
            last_synced_at: Some(now),
        }
    }

    /// Store key shared by every record store implementation.
    pub fn key(&self) -> String {
        record_key(self.provider, &self.external_id)
    }
}

pub fn record_key(provider: Provider, external_id: &str) -> String {
    format!("{provider}:{external_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_clamped_and_safe_for_zero() {
        let mut progress = ProgressUpdate {
            completed_tasks: 3,
            total_tasks: 4,
            completed: vec![],
            note: None,
        };
        assert_eq!(progress.percentage(), 75);
        progress.completed_tasks = 9;
        assert_eq!(progress.percentage(), 100);
        progress.total_tasks = 0;
        assert_eq!(progress.percentage(), 0);
    }

    #[test]
    fn fields_sort_labels() {
        let item = WorkItem {
            id: "1".into(),
            source_id: None,
            title: "T".into(),
            description: None,
            status: None,
            item_type: None,
            created_at: None,
            changed_at: None,
            labels: vec!["b".into(), "a".into()],
            area_path: None,
            iteration_path: None,
            assignee: None,
            container: "c".into(),
            source: Provider::GitHub,
            url: None,
        };
        assert_eq!(ItemFields::from(&item).labels, vec!["a", "b"]);
        assert_eq!(LocalRecord::imported(&item, Utc::now()).key(), "github:1");
    }
}
