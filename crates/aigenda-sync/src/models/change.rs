//! Change entry model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved prefix marking client-generated ids, so the server can tell
/// synthetic ids from real ones.
const LOCAL_ID_PREFIX: &str = "local_";

/// Generate a client-local unique id using UUID v7 (time-sortable).
#[must_use]
pub fn local_change_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7())
}

/// Check whether an id was generated locally and never confirmed by the
/// server.
#[must_use]
pub fn is_local_change_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// The kind of mutation a change entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal per-entry rejection reported by the server
/// (e.g. `INVALID_DATA`, `PERMISSION_DENIED`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    pub code: String,
    pub message: String,
}

/// One pending local mutation.
///
/// Within one entity type, entries are ordered by `timestamp`. At most one
/// outcome is attached per entry: either `synced` is set or `error` is set,
/// never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Entity id (client-generated `local_` id for unconfirmed creates)
    pub id: String,
    /// Mutation kind
    pub action: ChangeAction,
    /// Entity payload
    pub data: Value,
    /// Creation time (Unix ms), the logical ordering key within a type
    pub timestamp: i64,
    /// False until the server acknowledges this entry
    pub synced: bool,
    /// Terminal rejection, set when the server rejects the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,
}

impl ChangeEntry {
    /// Create an unsynced entry with the given id and payload.
    #[must_use]
    pub fn new(id: impl Into<String>, action: ChangeAction, data: Value, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            action,
            data,
            timestamp,
            synced: false,
            error: None,
        }
    }

    /// Whether this entry still needs to be pushed.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        !self.synced
    }
}
