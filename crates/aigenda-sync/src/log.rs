//! Local mutation log: the append-only queue of pending changes.
//!
//! The log owns the Pending Changes Store exclusively and persists it
//! wholesale on every mutation. A persistence failure is logged and
//! reported, never fatal; the next mutating call rewrites the full blob
//! and so doubles as the retry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{
    local_change_id, ChangeAction, ChangeEntry, ConflictRecord, EntryError, PushBatch,
    PushRejection,
};
use crate::storage::StateStore;
use crate::util::unix_timestamp_millis;

/// Synced entries older than this are swept on the next mutating call.
/// Unsynced or errored entries are retained until resolved or discarded.
const RETENTION_WINDOW_MS: i64 = 60 * 60 * 1000;

/// The local mutation log, grouped by entity type and ordered by
/// timestamp within each type.
pub struct MutationLog {
    entries: PushBatch,
    store: Arc<dyn StateStore>,
    persist_failed: bool,
}

impl MutationLog {
    /// Load the log from the store's pending blob.
    ///
    /// A corrupt or unreadable blob starts the log empty instead of
    /// refusing to start; the blob is rewritten on the next mutation.
    pub fn load(store: Arc<dyn StateStore>) -> Self {
        let entries = store.load_pending().unwrap_or_else(|error| {
            tracing::warn!("failed to load pending changes, starting empty: {error}");
            PushBatch::default()
        });
        Self {
            entries,
            store,
            persist_failed: false,
        }
    }

    /// Append a change entry and return its id.
    ///
    /// For `create` without a supplied `id` field, a client-local id with
    /// the reserved `local_` prefix is generated and injected into the
    /// payload so callers can reference the not-yet-confirmed entity
    /// immediately.
    pub fn enqueue(
        &mut self,
        entity_type: &str,
        action: ChangeAction,
        mut data: Value,
    ) -> Result<String> {
        if entity_type.trim().is_empty() {
            return Err(Error::InvalidInput("entity type must not be empty".into()));
        }
        let Some(object) = data.as_object_mut() else {
            return Err(Error::InvalidInput(
                "change payload must be a JSON object".into(),
            ));
        };

        let id = match object.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ if action == ChangeAction::Create => {
                let id = local_change_id();
                object.insert("id".to_string(), Value::String(id.clone()));
                id
            }
            _ => {
                return Err(Error::InvalidInput(format!(
                    "{action} payload must carry an id"
                )))
            }
        };

        let entry = ChangeEntry::new(id.clone(), action, data, unix_timestamp_millis());
        self.entries
            .entry(entity_type.to_string())
            .or_default()
            .push(entry);

        self.sweep_expired();
        self.persist();
        Ok(id)
    }

    /// Unsynced entries grouped by type; types with none are omitted.
    /// An empty map is the no-op signal for push.
    #[must_use]
    pub fn unsynced(&self) -> PushBatch {
        self.entries
            .iter()
            .filter_map(|(entity_type, entries)| {
                let pending: Vec<ChangeEntry> = entries
                    .iter()
                    .filter(|entry| entry.is_pending())
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    None
                } else {
                    Some((entity_type.clone(), pending))
                }
            })
            .collect()
    }

    /// Mark server-accepted entries synced. Idempotent: ids already
    /// synced, unknown, or carrying a terminal error are skipped.
    pub fn mark_synced(&mut self, accepted: &BTreeMap<String, Vec<String>>) {
        for (entity_type, ids) in accepted {
            let Some(entries) = self.entries.get_mut(entity_type) else {
                continue;
            };
            for id in ids {
                if let Some(entry) = entries
                    .iter_mut()
                    .find(|entry| entry.id == *id && entry.is_pending() && entry.error.is_none())
                {
                    entry.synced = true;
                }
            }
        }
        self.sweep_expired();
        self.persist();
    }

    /// Attach terminal per-entry rejections. The entry stays unsynced
    /// until explicitly discarded.
    pub fn attach_errors(&mut self, rejections: &BTreeMap<String, Vec<PushRejection>>) {
        for (entity_type, rejected) in rejections {
            let Some(entries) = self.entries.get_mut(entity_type) else {
                continue;
            };
            for rejection in rejected {
                if let Some(entry) = entries
                    .iter_mut()
                    .find(|entry| entry.id == rejection.id && entry.is_pending())
                {
                    tracing::warn!(
                        entity_type,
                        id = rejection.id,
                        code = rejection.code,
                        "server rejected change entry"
                    );
                    entry.error = Some(EntryError {
                        code: rejection.code.clone(),
                        message: rejection.message.clone(),
                    });
                }
            }
        }
        self.sweep_expired();
        self.persist();
    }

    /// Resolve server-reported conflicts with the server-authoritative
    /// policy: overwrite the local payload with the server version and
    /// mark the entry synced.
    ///
    /// Returns the resolved payloads per entity type so the caller can
    /// broadcast them for UI refresh.
    pub fn resolve_conflicts(
        &mut self,
        conflicts: &BTreeMap<String, Vec<ConflictRecord>>,
    ) -> Vec<(String, Value)> {
        let mut resolved = Vec::new();
        for (entity_type, records) in conflicts {
            let Some(entries) = self.entries.get_mut(entity_type) else {
                continue;
            };
            for record in records {
                if let Some(entry) = entries
                    .iter_mut()
                    .find(|entry| entry.id == record.id && entry.is_pending())
                {
                    entry.data = record.server_version.clone();
                    entry.synced = true;
                    entry.error = None;
                    resolved.push((entity_type.clone(), record.server_version.clone()));
                }
            }
        }
        self.sweep_expired();
        self.persist();
        resolved
    }

    /// Drop an errored entry the UI has chosen to abandon.
    /// Returns false when no matching errored entry exists.
    pub fn discard_errored(&mut self, entity_type: &str, id: &str) -> bool {
        let Some(entries) = self.entries.get_mut(entity_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| !(entry.id == id && entry.error.is_some()));
        let removed = entries.len() < before;
        if entries.is_empty() {
            self.entries.remove(entity_type);
        }
        if removed {
            self.sweep_expired();
            self.persist();
        }
        removed
    }

    /// All entries, for status/listing surfaces.
    #[must_use]
    pub const fn entries(&self) -> &PushBatch {
        &self.entries
    }

    /// Number of entries still awaiting a server acknowledgement.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .filter(|entry| entry.is_pending() && entry.error.is_none())
            .count()
    }

    /// Number of entries carrying a terminal server rejection.
    #[must_use]
    pub fn errored_count(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .filter(|entry| entry.error.is_some())
            .count()
    }

    /// Whether the last persist attempt failed and the blob on disk is
    /// stale. Cleared by the next successful mutating call.
    #[must_use]
    pub const fn has_unpersisted_changes(&self) -> bool {
        self.persist_failed
    }

    fn sweep_expired(&mut self) {
        let cutoff = unix_timestamp_millis() - RETENTION_WINDOW_MS;
        for entries in self.entries.values_mut() {
            entries.retain(|entry| !(entry.synced && entry.timestamp < cutoff));
        }
        self.entries.retain(|_, entries| !entries.is_empty());
    }

    fn persist(&mut self) {
        match self.store.save_pending(&self.entries) {
            Ok(()) => self.persist_failed = false,
            Err(error) => {
                tracing::warn!("failed to persist pending changes: {error}");
                self.persist_failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::is_local_change_id;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Store whose saves can be toggled to fail, for persistence-failure
    /// behavior.
    struct FlakyStore {
        inner: MemoryStore,
        fail_saves: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_saves: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn set_fail(&self, fail: bool) {
            self.fail_saves
                .store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl StateStore for FlakyStore {
        fn load_pending(&self) -> Result<PushBatch> {
            self.inner.load_pending()
        }

        fn save_pending(&self, pending: &PushBatch) -> Result<()> {
            if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Storage("disk full".into()));
            }
            self.inner.save_pending(pending)
        }

        fn load_checkpoint(&self) -> Result<i64> {
            self.inner.load_checkpoint()
        }

        fn save_checkpoint(&self, timestamp: i64) -> Result<()> {
            self.inner.save_checkpoint(timestamp)
        }
    }

    fn fresh_log() -> MutationLog {
        MutationLog::load(Arc::new(MemoryStore::new()))
    }

    fn ids_by_type(entity_type: &str, ids: &[&str]) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        map.insert(
            entity_type.to_string(),
            ids.iter().map(ToString::to_string).collect(),
        );
        map
    }

    #[test]
    fn enqueue_create_generates_local_id_and_injects_it() {
        let mut log = fresh_log();
        let id = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Call Acme"}))
            .unwrap();

        assert!(is_local_change_id(&id));
        let unsynced = log.unsynced();
        assert_eq!(unsynced["tasks"].len(), 1);
        assert_eq!(unsynced["tasks"][0].data["id"], json!(id));
        assert!(!unsynced["tasks"][0].synced);
    }

    #[test]
    fn enqueue_keeps_supplied_id() {
        let mut log = fresh_log();
        let id = log
            .enqueue(
                "tasks",
                ChangeAction::Update,
                json!({"id": "42", "title": "Renamed"}),
            )
            .unwrap();
        assert_eq!(id, "42");
    }

    #[test]
    fn enqueue_rejects_update_without_id() {
        let mut log = fresh_log();
        let error = log
            .enqueue("tasks", ChangeAction::Update, json!({"title": "No id"}))
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn enqueue_rejects_non_object_payload() {
        let mut log = fresh_log();
        assert!(log
            .enqueue("tasks", ChangeAction::Create, json!("just a string"))
            .is_err());
    }

    #[test]
    fn unsynced_omits_fully_synced_types() {
        let mut log = fresh_log();
        let id = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "One"}))
            .unwrap();
        log.enqueue("activities", ChangeAction::Create, json!({"name": "Run"}))
            .unwrap();

        log.mark_synced(&ids_by_type("tasks", &[&id]));

        let unsynced = log.unsynced();
        assert!(!unsynced.contains_key("tasks"));
        assert_eq!(unsynced["activities"].len(), 1);
    }

    #[test]
    fn mark_synced_is_idempotent() {
        let mut log = fresh_log();
        let id = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "One"}))
            .unwrap();

        log.mark_synced(&ids_by_type("tasks", &[&id]));
        let after_first = log.entries().clone();

        log.mark_synced(&ids_by_type("tasks", &[&id]));
        assert_eq!(log.entries(), &after_first);
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn mark_synced_skips_errored_entries() {
        let mut log = fresh_log();
        let id = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Bad"}))
            .unwrap();

        let mut rejections = BTreeMap::new();
        rejections.insert(
            "tasks".to_string(),
            vec![PushRejection {
                id: id.clone(),
                code: "INVALID_DATA".to_string(),
                message: "title too long".to_string(),
            }],
        );
        log.attach_errors(&rejections);
        log.mark_synced(&ids_by_type("tasks", &[&id]));

        let entry = &log.entries()["tasks"][0];
        assert!(!entry.synced);
        assert_eq!(entry.error.as_ref().unwrap().code, "INVALID_DATA");
        assert_eq!(log.errored_count(), 1);
    }

    #[test]
    fn retention_sweeps_old_synced_entries_only() {
        let mut log = fresh_log();
        let old_synced = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Old"}))
            .unwrap();
        let old_pending = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Stuck"}))
            .unwrap();
        log.mark_synced(&ids_by_type("tasks", &[&old_synced]));

        // Age both entries past the retention window.
        let cutoff = unix_timestamp_millis() - RETENTION_WINDOW_MS - 1;
        for entry in log.entries.get_mut("tasks").unwrap() {
            entry.timestamp = cutoff;
        }

        // Any mutating call triggers the sweep.
        log.mark_synced(&BTreeMap::new());

        let remaining: Vec<&str> = log.entries()["tasks"]
            .iter()
            .map(|entry| entry.id.as_str())
            .collect();
        assert_eq!(remaining, vec![old_pending.as_str()]);
    }

    #[test]
    fn resolve_conflicts_overwrites_data_and_wins_over_synced_marking() {
        let mut log = fresh_log();
        let id = log
            .enqueue("tasks", ChangeAction::Update, json!({"id": "7", "title": "Mine"}))
            .unwrap();

        let server_version = json!({"id": "7", "title": "Server"});
        let mut conflicts = BTreeMap::new();
        conflicts.insert(
            "tasks".to_string(),
            vec![ConflictRecord {
                id: id.clone(),
                server_version: server_version.clone(),
            }],
        );

        // Conflicts are processed before syncedIds; the stale synced
        // marking for the same id must not overwrite the resolution.
        let resolved = log.resolve_conflicts(&conflicts);
        log.mark_synced(&ids_by_type("tasks", &[&id]));

        assert_eq!(resolved, vec![("tasks".to_string(), server_version.clone())]);
        let entry = &log.entries()["tasks"][0];
        assert!(entry.synced);
        assert_eq!(entry.data, server_version);
    }

    #[test]
    fn discard_errored_removes_only_errored_entries() {
        let mut log = fresh_log();
        let good = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Fine"}))
            .unwrap();
        let bad = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Bad"}))
            .unwrap();

        let mut rejections = BTreeMap::new();
        rejections.insert(
            "tasks".to_string(),
            vec![PushRejection {
                id: bad.clone(),
                code: "PERMISSION_DENIED".to_string(),
                message: "not yours".to_string(),
            }],
        );
        log.attach_errors(&rejections);

        assert!(!log.discard_errored("tasks", &good));
        assert!(log.discard_errored("tasks", &bad));
        assert!(!log.discard_errored("tasks", &bad));
        assert_eq!(log.entries()["tasks"].len(), 1);
    }

    #[test]
    fn discard_sweeps_expired_synced_entries() {
        let mut log = fresh_log();
        let old_synced = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Old"}))
            .unwrap();
        let bad = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Bad"}))
            .unwrap();
        log.mark_synced(&ids_by_type("tasks", &[&old_synced]));

        let mut rejections = BTreeMap::new();
        rejections.insert(
            "tasks".to_string(),
            vec![PushRejection {
                id: bad.clone(),
                code: "INVALID_DATA".to_string(),
                message: "bad".to_string(),
            }],
        );
        log.attach_errors(&rejections);

        // Age the synced entry past the retention window.
        let cutoff = unix_timestamp_millis() - RETENTION_WINDOW_MS - 1;
        for entry in log.entries.get_mut("tasks").unwrap() {
            if entry.id == old_synced {
                entry.timestamp = cutoff;
            }
        }

        // Discard is a mutating call, so it sweeps like every other one.
        assert!(log.discard_errored("tasks", &bad));
        assert!(!log.entries().contains_key("tasks"));
    }

    #[test]
    fn persist_failure_is_tolerated_and_retried_on_next_mutation() {
        let store = Arc::new(FlakyStore::new());
        let mut log = MutationLog::load(Arc::clone(&store) as Arc<dyn StateStore>);

        store.set_fail(true);
        let id = log
            .enqueue("tasks", ChangeAction::Create, json!({"title": "Kept"}))
            .unwrap();
        assert!(log.has_unpersisted_changes());
        // The in-memory operation still happened.
        assert_eq!(log.unsynced()["tasks"][0].id, id);
        // Nothing made it to the store.
        assert!(store.load_pending().unwrap().is_empty());

        store.set_fail(false);
        log.enqueue("tasks", ChangeAction::Create, json!({"title": "Second"}))
            .unwrap();
        assert!(!log.has_unpersisted_changes());
        assert_eq!(store.load_pending().unwrap()["tasks"].len(), 2);
    }

    #[test]
    fn log_reloads_from_store_blob() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut log = MutationLog::load(Arc::clone(&store) as Arc<dyn StateStore>);
            log.enqueue("tasks", ChangeAction::Create, json!({"title": "Persisted"}))
                .unwrap();
        }

        let reloaded = MutationLog::load(store);
        assert_eq!(reloaded.pending_count(), 1);
        assert_eq!(
            reloaded.entries()["tasks"][0].data["title"],
            json!("Persisted")
        );
    }
}
