use crate::core::{Record, Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Change notification exactly as the feed delivers it.
///
/// INSERT carries `new` only, DELETE carries `old` only, UPDATE carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<JsonValue>,
    #[serde(default)]
    pub old: Option<JsonValue>,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl RawChangeEvent {
    pub fn insert(collection: impl Into<String>, new: JsonValue) -> Self {
        Self::build(ChangeKind::Insert, collection, Some(new), None)
    }

    pub fn update(collection: impl Into<String>, old: Option<JsonValue>, new: JsonValue) -> Self {
        Self::build(ChangeKind::Update, collection, Some(new), old)
    }

    pub fn delete(collection: impl Into<String>, old: JsonValue) -> Self {
        Self::build(ChangeKind::Delete, collection, None, Some(old))
    }

    fn build(
        kind: ChangeKind,
        collection: impl Into<String>,
        new: Option<JsonValue>,
        old: Option<JsonValue>,
    ) -> Self {
        Self {
            kind,
            new,
            old,
            collection: collection.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A change event decoded into a collection's record type.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    /// Deletes only need the identifier; the old snapshot is often partial.
    Delete { id: String },
}

impl<T: Record> ChangeEvent<T> {
    pub fn decode(raw: &RawChangeEvent) -> Result<Self> {
        match raw.kind {
            ChangeKind::Insert => Ok(ChangeEvent::Insert(decode_snapshot(raw.new.as_ref(), "new")?)),
            ChangeKind::Update => Ok(ChangeEvent::Update(decode_snapshot(raw.new.as_ref(), "new")?)),
            ChangeKind::Delete => {
                let id = raw
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| {
                        SyncError::Malformed("DELETE event without old.id".to_string())
                    })?;
                Ok(ChangeEvent::Delete { id: id.to_string() })
            }
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            ChangeEvent::Insert(record) | ChangeEvent::Update(record) => record.id(),
            ChangeEvent::Delete { id } => id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }
}

fn decode_snapshot<T: Record>(snapshot: Option<&JsonValue>, side: &str) -> Result<T> {
    let value = snapshot
        .filter(|v| !v.is_null())
        .ok_or_else(|| SyncError::Malformed(format!("change event without `{}` record", side)))?;
    Ok(T::deserialize(value)?)
}
