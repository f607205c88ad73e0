//! Data model shared by the mutation log, transport, and engine

mod change;
mod wire;

pub use change::{local_change_id, is_local_change_id, ChangeAction, ChangeEntry, EntryError};
pub use wire::{ConflictRecord, PullResponse, PushBatch, PushReceipt, PushRejection};
