//! Bead record data model.
//!
//! A bead is one unit of schedulable work, stored as one JSON file per record.
//! Deserialization is deliberately forgiving: records written by older tools
//! or by hand may omit fields or carry odd value types, and every such gap is
//! filled with its documented default so downstream code always sees a fully
//! populated record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Priority assigned when a record carries no usable priority value.
/// Lower values dispatch first, so this sorts last.
pub const LOWEST_PRIORITY: i64 = i64::MAX;

/// Lifecycle state of a bead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Retry,
    Blocked,
}

impl BeadStatus {
    /// Parse a status string, falling back to `Pending` for anything unknown.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in_progress" => BeadStatus::InProgress,
            "completed" => BeadStatus::Completed,
            "failed" => BeadStatus::Failed,
            "retry" => BeadStatus::Retry,
            "blocked" => BeadStatus::Blocked,
            _ => BeadStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BeadStatus::Pending => "pending",
            BeadStatus::InProgress => "in_progress",
            BeadStatus::Completed => "completed",
            BeadStatus::Failed => "failed",
            BeadStatus::Retry => "retry",
            BeadStatus::Blocked => "blocked",
        }
    }

    /// Beads in these states are picked up by the scheduler.
    pub fn is_eligible(self) -> bool {
        matches!(self, BeadStatus::Pending | BeadStatus::Retry)
    }
}

/// Execution bookkeeping carried on every bead.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeadMeta {
    /// Incremented exactly once at the start of each dispatch.
    #[serde(deserialize_with = "de_count")]
    pub attempt_count: u32,
    /// Incremented only when a worker hits the wall-clock timeout.
    #[serde(deserialize_with = "de_count")]
    pub timeout_count: u32,
    /// Incremented only by the stale-record reconciler.
    #[serde(deserialize_with = "de_count")]
    pub stuck_count: u32,
    #[serde(deserialize_with = "de_timestamp")]
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(deserialize_with = "de_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// One unit of schedulable work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    /// Informational tag (serialized as `type`).
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "de_status")]
    pub status: BeadStatus,
    /// Lower dispatches first. Missing or unusable values sort last.
    #[serde(default = "lowest_priority", deserialize_with = "de_priority")]
    pub priority: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub meta: BeadMeta,
    /// Set on first save, immutable afterwards.
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// Refreshed on every save, non-decreasing.
    #[serde(default, deserialize_with = "de_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Bead {
    /// Create a pending bead with default fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: String::new(),
            status: BeadStatus::Pending,
            priority: LOWEST_PRIORITY,
            title: String::new(),
            intent: String::new(),
            description: String::new(),
            meta: BeadMeta::default(),
            created_at: None,
            updated_at: None,
        }
    }
}

fn lowest_priority() -> i64 {
    LOWEST_PRIORITY
}

fn de_status<'de, D: Deserializer<'de>>(de: D) -> Result<BeadStatus, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(value
        .as_str()
        .map(BeadStatus::parse_lenient)
        .unwrap_or_default())
}

fn de_priority<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().unwrap_or(LOWEST_PRIORITY),
        Value::String(s) => s.trim().parse().unwrap_or(LOWEST_PRIORITY),
        _ => LOWEST_PRIORITY,
    })
}

fn de_count<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(0))
}

fn de_timestamp<'de, D: Deserializer<'de>>(de: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}
