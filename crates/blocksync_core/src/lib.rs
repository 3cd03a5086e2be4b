//! Core domain logic for blocksync.
//! Local-first time blocks and tasks, replicated through a CRDT document,
//! plus a file exchange with an external task tracker.

pub mod backoff;
pub mod config;
pub mod context;
pub mod db;
pub mod document;
pub mod exchange;
pub mod logging;
pub mod model;
pub mod repo;
pub mod sync;

pub use config::Config;
pub use context::{AppContext, ContextError, Seams};
pub use document::{Collection, DocResult, DocumentDelta, DocumentError, DocumentStore, Origin};
pub use exchange::importer::{ExternalTaskImporter, ImportStatus};
pub use exchange::relay::{CompletionRelay, RunOutcome};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::block::{Block, BlockDraft, BlockMeta};
pub use model::breaks::Break;
pub use model::external_task::ExternalTask;
pub use model::right_now::{RightNowItem, RightNowList};
pub use model::task::{Subtask, Task};
pub use sync::{Identity, SyncStatus};
