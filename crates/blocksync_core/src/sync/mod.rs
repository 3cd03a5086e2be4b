//! Replication plumbing around the document store.
//!
//! # Responsibility
//! - `local`: durable update log replay and capture.
//! - `remote` / `reconciler`: per-identity remote sessions.
//! - `identity`: partition keys and the persisted replica id.

pub mod identity;
pub mod local;
pub mod reconciler;
pub mod remote;

pub use identity::{load_or_create_client_id, Identity, ANONYMOUS_PARTITION};
pub use local::{LoadReport, LocalPersistence, PersistStats};
pub use reconciler::{RemoteReconciler, SyncActivity, SyncStatus};
pub use remote::{
    InMemoryRemoteStore, LocalDirRemoteStore, RemoteError, RemoteRecord, RemoteResult, RemoteStore,
};
