//! Field-level reconciliation between local records and fetched snapshots.
//!
//! Each record keeps the external values seen at the previous sync
//! (`synced`). A field differing from that snapshot on the local side was
//! edited locally, on the external side it was edited externally. Edits on
//! both sides are conflicts, settled by [`ConflictPolicy`]. Outward writes
//! are gated by [`Capabilities`] and the record's [`Origin`].

pub mod comment;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::record::record_key;
use crate::model::{Conflict, ItemFields, LocalRecord, Origin, Resolution, SyncResult, WorkItem};
use crate::providers::ItemWriter;

pub use store::{JsonRecordStore, MemoryRecordStore, RecordStore};

/// Permission gates for outward writes. Both default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub can_update_external_items: bool,
    #[serde(default)]
    pub can_update_status: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    #[default]
    ExternalWins,
    LocalWins,
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "external-wins" | "external" => Ok(ConflictPolicy::ExternalWins),
            "local-wins" | "local" => Ok(ConflictPolicy::LocalWins),
            other => Err(SyncError::invalid_profile(format!(
                "unknown conflict policy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Description,
    Status,
    Labels,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Title, Field::Description, Field::Status, Field::Labels];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Status => "status",
            Field::Labels => "labels",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    Text(Option<String>),
    List(Vec<String>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => write!(f, "{}", text.as_deref().unwrap_or("")),
            FieldValue::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

fn read(fields: &ItemFields, field: Field) -> FieldValue {
    match field {
        Field::Title => FieldValue::Text(Some(fields.title.clone())),
        Field::Description => FieldValue::Text(fields.description.clone()),
        Field::Status => FieldValue::Text(fields.status.clone()),
        Field::Labels => {
            let mut labels = fields.labels.clone();
            labels.sort();
            labels.dedup();
            FieldValue::List(labels)
        }
    }
}

fn write(fields: &mut ItemFields, field: Field, value: FieldValue) {
    match (field, value) {
        (Field::Title, FieldValue::Text(v)) => fields.title = v.unwrap_or_default(),
        (Field::Description, FieldValue::Text(v)) => fields.description = v,
        (Field::Status, FieldValue::Text(v)) => fields.status = v,
        (Field::Labels, FieldValue::List(v)) => fields.labels = v,
        _ => {}
    }
}

/// One outward write, performed or (in a dry run) intended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAction {
    Title(String),
    Description(String),
    Status(String),
    Labels(Vec<String>),
    Comment(String),
}

impl WriteAction {
    fn for_field(field: Field, value: &FieldValue) -> Option<Self> {
        match (field, value) {
            (Field::Title, FieldValue::Text(Some(v))) if !v.is_empty() => {
                Some(WriteAction::Title(v.clone()))
            }
            (Field::Description, FieldValue::Text(v)) => {
                Some(WriteAction::Description(v.clone().unwrap_or_default()))
            }
            (Field::Status, FieldValue::Text(Some(v))) => Some(WriteAction::Status(v.clone())),
            (Field::Labels, FieldValue::List(v)) => Some(WriteAction::Labels(v.clone())),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            WriteAction::Title(v) => format!("set title to {v:?}"),
            WriteAction::Description(_) => "update description".to_string(),
            WriteAction::Status(v) => format!("set status to {v:?}"),
            WriteAction::Labels(v) => format!("set labels to [{}]", v.join(", ")),
            WriteAction::Comment(_) => "post progress comment".to_string(),
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemSync {
    pub pulled: Vec<Field>,
    pub writes: Vec<WriteAction>,
    pub conflicts: Vec<Conflict>,
}

impl ItemSync {
    pub fn changed(&self) -> bool {
        !self.pulled.is_empty() || !self.writes.is_empty()
    }
}

pub struct ReconciliationEngine<W> {
    writer: W,
    capabilities: Capabilities,
    policy: ConflictPolicy,
    dry_run: bool,
}

impl<W: ItemWriter> ReconciliationEngine<W> {
    pub fn new(writer: W, capabilities: Capabilities) -> Self {
        Self {
            writer,
            capabilities,
            policy: ConflictPolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Externally-authored items only ever receive status changes (and
    /// comments); locally-authored ones may receive everything.
    fn may_push(&self, origin: Origin, field: Field) -> bool {
        match (origin, field) {
            (_, Field::Status) => self.capabilities.can_update_status,
            (Origin::External, _) => false,
            (Origin::Internal, _) => self.capabilities.can_update_external_items,
        }
    }

    fn may_comment(&self, origin: Origin) -> bool {
        match origin {
            Origin::External => true,
            Origin::Internal => self.capabilities.can_update_external_items,
        }
    }

    /// Reconcile one record against a fresh snapshot of its external item.
    ///
    /// On error the record may be partially updated; callers that need
    /// atomicity pass a copy.
    pub async fn sync_item(&self, record: &mut LocalRecord, item: &WorkItem) -> Result<ItemSync> {
        let external = ItemFields::from(item);
        let base = record.synced.clone();
        let mut outcome = ItemSync::default();
        // External state after our writes land.
        let mut snapshot = external.clone();

        for field in Field::ALL {
            let local = read(&record.fields, field);
            let remote = read(&external, field);
            if local == remote {
                continue;
            }

            // Without a snapshot the record's origin is the source of truth.
            let (local_edited, remote_edited) = match &base {
                Some(base) => {
                    let before = read(base, field);
                    (before != local, before != remote)
                }
                None => (record.origin == Origin::Internal, record.origin == Origin::External),
            };

            let push = WriteAction::for_field(field, &local)
                .filter(|_| self.may_push(record.origin, field));

            let (action, resolution) = match (local_edited, remote_edited, push) {
                (true, true, Some(action)) if self.policy == ConflictPolicy::LocalWins => {
                    (Some(action), Some(Resolution::Local))
                }
                (true, true, _) => (None, Some(Resolution::External)),
                (true, false, Some(action)) => (Some(action), None),
                (true, false, None) => (None, Some(Resolution::External)),
                (false, _, _) => (None, None),
            };

            if let Some(resolution) = resolution {
                tracing::debug!(
                    "Conflict on {} {}: resolved to {}",
                    record.external_id,
                    field.as_str(),
                    resolution
                );
                outcome.conflicts.push(Conflict {
                    item_id: record.external_id.clone(),
                    field: field.as_str().to_string(),
                    external_value: remote.to_string(),
                    local_value: local.to_string(),
                    resolution,
                });
            }

            match action {
                Some(action) => {
                    self.apply(&record.api_id, &action).await?;
                    outcome.writes.push(action);
                    write(&mut snapshot, field, local);
                }
                None => {
                    write(&mut record.fields, field, remote);
                    outcome.pulled.push(field);
                }
            }
        }

        if let Some(progress) = record.pending_progress.clone() {
            if self.may_comment(record.origin) {
                let body = comment::progress_comment(&record.id, &progress, Utc::now());
                let action = WriteAction::Comment(body);
                self.apply(&record.api_id, &action).await?;
                outcome.writes.push(action);
                record.pending_progress = None;
            }
        }

        record.synced = Some(snapshot);
        record.last_synced_at = Some(Utc::now());
        Ok(outcome)
    }

    async fn apply(&self, api_id: &str, action: &WriteAction) -> Result<()> {
        if self.dry_run {
            tracing::info!("[dry run] {}: {}", api_id, action.describe());
            return Ok(());
        }
        tracing::info!("{}: {}", api_id, action.describe());
        match action {
            WriteAction::Title(v) => self.writer.update_title(api_id, v).await,
            WriteAction::Description(v) => self.writer.update_description(api_id, v).await,
            WriteAction::Status(v) => self.writer.update_status(api_id, v).await,
            WriteAction::Labels(v) => self.writer.update_labels(api_id, v).await,
            WriteAction::Comment(v) => self.writer.post_comment(api_id, v).await,
        }
    }

    /// Reconcile a batch of fetched items against the record store.
    ///
    /// Unknown items are imported as externally-authored records. Failures
    /// for one item are collected and the item counts as skipped. A dry run
    /// leaves the store untouched.
    pub async fn reconcile(&self, items: &[WorkItem], store: &dyn RecordStore) -> SyncResult {
        let mut result = SyncResult::default();
        let now = Utc::now();

        for item in items {
            let key = record_key(item.source, &item.id);
            let existing = match store.get(&key) {
                Ok(existing) => existing,
                Err(e) => {
                    result.errors.push(format!("{}: {}", item.id, e));
                    result.skipped += 1;
                    continue;
                }
            };

            let Some(record) = existing else {
                let record = LocalRecord::imported(item, now);
                match self.persist(store, record) {
                    Ok(()) => result.created += 1,
                    Err(e) => {
                        result.errors.push(format!("{}: {}", item.id, e));
                        result.skipped += 1;
                    }
                }
                continue;
            };

            let mut working = record.clone();
            match self.sync_item(&mut working, item).await {
                Ok(outcome) => {
                    result.conflicts.extend(outcome.conflicts.iter().cloned());
                    if let Err(e) = self.persist(store, working) {
                        result.errors.push(format!("{}: {}", item.id, e));
                        result.skipped += 1;
                    } else if outcome.changed() {
                        result.updated += 1;
                    } else {
                        result.unchanged += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to sync {}: {}", item.id, e);
                    result.errors.push(format!("{}: {}", item.id, e));
                    result.skipped += 1;
                }
            }
        }

        if !self.dry_run {
            if let Err(e) = store.flush() {
                tracing::warn!("Failed to save records: {}", e);
                result.errors.push(format!("record store: {e}"));
            }
        }

        tracing::info!("Reconciliation: {}", result.summary());
        result
    }

    fn persist(&self, store: &dyn RecordStore, record: LocalRecord) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        store.upsert(record)
    }
}
