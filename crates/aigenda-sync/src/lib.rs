//! aigenda-sync - Offline-first sync engine for AIGENDA
//!
//! Queues local mutations, reconciles them against a remote server of
//! record, and resolves conflicts under unreliable connectivity. UI
//! layers enqueue changes and subscribe to applied remote updates; the
//! engine owns the pending changes store, the checkpoint cursor, and the
//! pull/push cycle.

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod log;
pub mod models;
pub mod notify;
pub mod state;
pub mod storage;
pub mod transport;
pub mod util;

pub use config::SyncSettings;
pub use connectivity::{connectivity_channel, Connectivity, ConnectivityHandle};
pub use engine::{CycleOutcome, SyncEngine};
pub use error::{Error, Result};
pub use log::MutationLog;
pub use models::{ChangeAction, ChangeEntry, EntryError, PushBatch, PushReceipt};
pub use notify::{ChangeEvent, ChangeNotifier};
pub use state::SyncState;
pub use storage::{JsonFileStore, MemoryStore, StateStore};
pub use transport::{HttpTransport, SyncTransport};
