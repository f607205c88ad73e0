//! Wire types for the sync endpoint.
//!
//! The endpoint contract is transport-agnostic: `pull` returns remote
//! entities per type since a checkpoint, `push` submits the unsynced map
//! and echoes accepted ids, conflicts, and per-entry rejections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ChangeEntry;

/// Remote entities per entity type, as returned by a pull.
/// Quiescent types are omitted by the server.
pub type PullResponse = BTreeMap<String, Vec<Value>>;

/// The unsynced map submitted by a push, keyed by entity type.
pub type PushBatch = BTreeMap<String, Vec<ChangeEntry>>;

/// A pushed change the server rejected in favor of its own authoritative
/// version of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    #[serde(rename = "serverVersion")]
    pub server_version: Value,
}

/// A per-entry terminal rejection echoed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRejection {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Server response to a push.
///
/// An id should appear in at most one of the three maps; when the server is
/// inconsistent, conflict/error resolution wins over a synced marking
/// because resolution runs first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushReceipt {
    #[serde(default, rename = "syncedIds")]
    pub synced_ids: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub conflicts: BTreeMap<String, Vec<ConflictRecord>>,
    #[serde(default)]
    pub errors: BTreeMap<String, Vec<PushRejection>>,
}

impl PushReceipt {
    /// True when the server reported nothing to process.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.synced_ids.is_empty() && self.conflicts.is_empty() && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn receipt_parses_camel_case_and_defaults() {
        let receipt: PushReceipt = serde_json::from_value(json!({
            "syncedIds": {"tasks": ["a"]},
            "conflicts": {"tasks": [{"id": "b", "serverVersion": {"title": "Server"}}]}
        }))
        .unwrap();

        assert_eq!(receipt.synced_ids["tasks"], vec!["a".to_string()]);
        assert_eq!(receipt.conflicts["tasks"][0].id, "b");
        assert!(receipt.errors.is_empty());
        assert!(!receipt.is_empty());
    }

    #[test]
    fn empty_receipt_is_empty() {
        let receipt: PushReceipt = serde_json::from_value(json!({})).unwrap();
        assert!(receipt.is_empty());
    }
}
