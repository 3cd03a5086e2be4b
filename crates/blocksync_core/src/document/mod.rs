//! Replicated document: the canonical in-memory copy of all planner data.
//!
//! # Responsibility
//! - Name the document collections and how each one is shaped.
//! - Define the narrow engine seam (`transact`, `apply_delta`, `snapshot`,
//!   collection reads) so the CRDT can be swapped without touching sync code.
//! - Tag every change notification with the origin that produced it.
//!
//! # Invariants
//! - Sequence collections are only mutated by remove/insert at an index.
//! - Applying the same delta twice leaves the state unchanged.
//! - Replicas that applied the same set of deltas expose identical state,
//!   whatever the arrival order.

mod loro_engine;
mod store;

pub use loro_engine::LoroEngine;
pub use store::{DocumentStore, Listener, ListenerId};

use crate::model::ValidationError;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type DocResult<T> = Result<T, DocumentError>;

/// Top-level collections of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Blocks,
    Breaks,
    Tasks,
    RightNowLists,
    TaskNotes,
}

/// Storage shape of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Ordered list of JSON-encoded entities.
    Sequence,
    /// Key to value map; values are JSON-encoded entities or raw text.
    Mapping,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Blocks,
        Collection::Breaks,
        Collection::Tasks,
        Collection::RightNowLists,
        Collection::TaskNotes,
    ];

    /// Container name inside the document.
    pub fn name(self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Breaks => "breaks",
            Self::Tasks => "tasks",
            Self::RightNowLists => "rightNowLists",
            Self::TaskNotes => "taskNotes",
        }
    }

    pub fn kind(self) -> CollectionKind {
        match self {
            Self::Blocks | Self::Breaks => CollectionKind::Sequence,
            Self::Tasks | Self::RightNowLists | Self::TaskNotes => CollectionKind::Mapping,
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Who produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Mutation made through the store API in this process.
    Local,
    /// Delta or snapshot received from the remote record.
    Remote,
    /// Entry replayed from the local durable log during load.
    Replay,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Replay => "replay",
        }
    }
}

/// One change notification; emitted once per logical operation.
#[derive(Debug, Clone)]
pub struct DocumentDelta {
    pub origin: Origin,
    /// Collections whose observable value changed. May be empty for a
    /// remote delta that only advanced history.
    pub collections: Vec<Collection>,
    /// Serialized update sufficient to bring another replica up to date.
    pub update: Arc<[u8]>,
}

impl DocumentDelta {
    pub fn touches(&self, collection: Collection) -> bool {
        self.collections.contains(&collection)
    }
}

/// Primitive mutation handed to the engine inside one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    Insert {
        collection: Collection,
        index: usize,
        value: String,
    },
    Remove {
        collection: Collection,
        index: usize,
    },
    Put {
        collection: Collection,
        key: String,
        value: String,
    },
    Delete {
        collection: Collection,
        key: String,
    },
}

/// Result of merging a foreign delta or snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub changed: Vec<Collection>,
    /// The replica history grew (the delta was not already known).
    pub advanced: bool,
    /// Part of the delta waits for missing causal dependencies.
    pub pending: bool,
}

/// CRDT engine seam used by [`DocumentStore`].
pub trait ReplicaEngine: Send + Sync {
    /// Raw entries of a sequence collection, in order.
    fn sequence(&self, collection: Collection) -> Vec<String>;
    /// Raw entries of a mapping collection.
    fn mapping(&self, collection: Collection) -> BTreeMap<String, String>;
    /// Applies `ops` as one transaction and returns the produced delta.
    fn transact(&self, ops: &[MutationOp]) -> DocResult<Vec<u8>>;
    /// Merges a delta or snapshot produced by any replica.
    fn apply_delta(&self, delta: &[u8]) -> DocResult<ApplyOutcome>;
    /// Full state sufficient to initialize another replica.
    fn snapshot(&self) -> DocResult<Vec<u8>>;
}

#[derive(Debug)]
pub enum DocumentError {
    NotFound {
        collection: Collection,
        id: String,
    },
    InvalidTransition(&'static str),
    Validation(ValidationError),
    Encode(serde_json::Error),
    Engine(String),
}

impl Display for DocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { collection, id } => write!(f, "{collection} entry not found: {id}"),
            Self::InvalidTransition(details) => write!(f, "invalid transition: {details}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode entity: {err}"),
            Self::Engine(message) => write!(f, "replica engine error: {message}"),
        }
    }
}

impl Error for DocumentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for DocumentError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}
