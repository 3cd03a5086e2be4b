//! Typed collection operations over a replica engine.
//!
//! # Responsibility
//! - Expose create/update/delete per collection.
//! - Emit one origin-tagged [`DocumentDelta`] per logical operation.
//!
//! # Invariants
//! - Writers are serialized; notifications are emitted in commit order.
//! - A sequence update is one transaction (remove + insert at the same index).
//! - Listeners run synchronously and must only enqueue work; a listener that
//!   writes back into the store deadlocks.

use super::{
    Collection, DocResult, DocumentDelta, DocumentError, LoroEngine, MutationOp, Origin,
    ReplicaEngine,
};
use crate::model::block::{Block, BlockDraft};
use crate::model::breaks::Break;
use crate::model::right_now::{RightNowItem, RightNowList};
use crate::model::task::{Subtask, Task};
use crate::model::{now_epoch_ms, EntityId, ValidationError};
use chrono::NaiveDate;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Observer callback.
pub type Listener = Arc<dyn Fn(&DocumentDelta) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    filter: Option<Collection>,
    listener: Listener,
}

struct StoreInner {
    engine: Box<dyn ReplicaEngine>,
    write_lock: Mutex<()>,
    listeners: Mutex<Vec<Registration>>,
    next_listener_id: AtomicU64,
    loaded: AtomicBool,
}

/// Entities kept in a document collection.
trait Entity: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
    /// Folds a later duplicate copy of the same entity into `self`.
    fn absorb_duplicate(&mut self, _other: &Self) {}
}

impl Entity for Block {
    fn id(&self) -> &str {
        &self.id
    }
    fn validate(&self) -> Result<(), ValidationError> {
        Block::validate(self)
    }
    fn absorb_duplicate(&mut self, other: &Self) {
        self.is_valid &= other.is_valid;
        if self.completed_at.is_none() {
            self.completed_at = other.completed_at;
        }
    }
}

impl Entity for Break {
    fn id(&self) -> &str {
        &self.id
    }
    fn validate(&self) -> Result<(), ValidationError> {
        Break::validate(self)
    }
}

impl Entity for Task {
    fn id(&self) -> &str {
        &self.id
    }
    fn validate(&self) -> Result<(), ValidationError> {
        Task::validate(self)
    }
}

impl Entity for RightNowList {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Shared handle to the replicated document. Cloning is cheap.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    /// Store backed by a fresh Loro replica.
    pub fn new() -> Self {
        Self::with_engine(Box::new(LoroEngine::new()))
    }

    pub fn with_engine(engine: Box<dyn ReplicaEngine>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                engine,
                write_lock: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                loaded: AtomicBool::new(false),
            }),
        }
    }

    /// Whether durable-log replay finished.
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::Acquire)
    }

    pub(crate) fn mark_loaded(&self) {
        self.inner.loaded.store(true, Ordering::Release);
    }

    // ----- observation -----

    /// Registers a listener for every change.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        self.register(None, listener)
    }

    /// Registers a listener for changes touching `collection` only.
    pub fn observe_collection(&self, collection: Collection, listener: Listener) -> ListenerId {
        self.register(Some(collection), listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        lock(&self.inner.listeners).retain(|registration| registration.id != id);
    }

    fn register(&self, filter: Option<Collection>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push(Registration {
            id,
            filter,
            listener,
        });
        id
    }

    fn emit(&self, delta: &DocumentDelta) {
        let targets: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .filter(|registration| match registration.filter {
                Some(collection) => delta.touches(collection),
                None => true,
            })
            .map(|registration| Arc::clone(&registration.listener))
            .collect();
        for listener in targets {
            listener(delta);
        }
    }

    // ----- replication -----

    /// Full encoded state.
    pub fn snapshot(&self) -> DocResult<Vec<u8>> {
        self.inner.engine.snapshot()
    }

    /// Merges a foreign delta or snapshot and notifies when history grew.
    pub fn apply_delta(&self, delta: &[u8], origin: Origin) -> DocResult<super::ApplyOutcome> {
        let _guard = lock(&self.inner.write_lock);
        let outcome = self.inner.engine.apply_delta(delta)?;
        if outcome.advanced {
            self.emit(&DocumentDelta {
                origin,
                collections: outcome.changed.clone(),
                update: Arc::from(delta),
            });
        }
        Ok(outcome)
    }

    /// Merges a full encoded state from another replica.
    pub fn apply_snapshot(&self, snapshot: &[u8], origin: Origin) -> DocResult<super::ApplyOutcome> {
        self.apply_delta(snapshot, origin)
    }

    fn commit(
        &self,
        _guard: &MutexGuard<'_, ()>,
        collection: Collection,
        ops: &[MutationOp],
    ) -> DocResult<()> {
        let update = self.inner.engine.transact(ops)?;
        self.emit(&DocumentDelta {
            origin: Origin::Local,
            collections: vec![collection],
            update: Arc::from(update),
        });
        Ok(())
    }

    // ----- generic collection plumbing -----

    /// Entities in document order, duplicate copies folded into the first.
    fn read_sequence<T: Entity>(&self, collection: Collection) -> Vec<T> {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut entities: Vec<T> = Vec::new();
        for entity in self
            .inner
            .engine
            .sequence(collection)
            .iter()
            .filter_map(|raw| decode_entry::<T>(collection, raw))
        {
            match slots.get(entity.id()) {
                Some(&slot) => entities[slot].absorb_duplicate(&entity),
                None => {
                    slots.insert(entity.id().to_string(), entities.len());
                    entities.push(entity);
                }
            }
        }
        entities
    }

    fn read_mapping<T: Entity>(&self, collection: Collection) -> BTreeMap<String, T> {
        self.inner
            .engine
            .mapping(collection)
            .iter()
            .filter_map(|(key, raw)| decode_entry::<T>(collection, raw).map(|entity| (key.clone(), entity)))
            .collect()
    }

    fn append_to_sequence<T: Entity>(&self, collection: Collection, entity: &T) -> DocResult<()> {
        entity.validate()?;
        let value = serde_json::to_string(entity)?;
        let guard = lock(&self.inner.write_lock);
        let index = self.inner.engine.sequence(collection).len();
        self.commit(
            &guard,
            collection,
            &[MutationOp::Insert {
                collection,
                index,
                value,
            }],
        )
    }

    fn update_in_sequence<T, F>(&self, collection: Collection, id: &str, edit: F) -> DocResult<T>
    where
        T: Entity + Clone,
        F: FnOnce(&T, &mut T) -> DocResult<()>,
    {
        let guard = lock(&self.inner.write_lock);
        let raw = self.inner.engine.sequence(collection);
        let positions = positions_of::<T>(collection, &raw, id);
        let Some((index, first)) = positions.first() else {
            return Err(DocumentError::NotFound {
                collection,
                id: id.to_string(),
            });
        };
        let index = *index;
        let mut current = first.clone();
        for (_, duplicate) in &positions[1..] {
            current.absorb_duplicate(duplicate);
        }

        let mut updated = current.clone();
        edit(&current, &mut updated)?;
        if updated.id() != id {
            return Err(DocumentError::InvalidTransition("entity id is immutable"));
        }
        updated.validate()?;

        // Concurrent updates on two replicas can leave duplicate copies;
        // collapse them into the first position.
        let mut ops: Vec<MutationOp> = positions
            .iter()
            .rev()
            .map(|(position, _)| MutationOp::Remove {
                collection,
                index: *position,
            })
            .collect();
        ops.push(MutationOp::Insert {
            collection,
            index,
            value: serde_json::to_string(&updated)?,
        });
        self.commit(&guard, collection, &ops)?;
        Ok(updated)
    }

    fn delete_from_sequence<T: Entity>(&self, collection: Collection, id: &str) -> DocResult<()> {
        let guard = lock(&self.inner.write_lock);
        let raw = self.inner.engine.sequence(collection);
        let positions = positions_of::<T>(collection, &raw, id);
        if positions.is_empty() {
            return Err(DocumentError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        let ops: Vec<MutationOp> = positions
            .iter()
            .rev()
            .map(|(position, _)| MutationOp::Remove {
                collection,
                index: *position,
            })
            .collect();
        self.commit(&guard, collection, &ops)
    }

    fn put_in_mapping<T: Entity>(&self, collection: Collection, entity: &T) -> DocResult<()> {
        entity.validate()?;
        let value = serde_json::to_string(entity)?;
        let guard = lock(&self.inner.write_lock);
        self.commit(
            &guard,
            collection,
            &[MutationOp::Put {
                collection,
                key: entity.id().to_string(),
                value,
            }],
        )
    }

    fn update_in_mapping<T, F>(&self, collection: Collection, id: &str, edit: F) -> DocResult<T>
    where
        T: Entity,
        F: FnOnce(&mut T) -> DocResult<()>,
    {
        let guard = lock(&self.inner.write_lock);
        let mut entity = self
            .inner
            .engine
            .mapping(collection)
            .get(id)
            .and_then(|raw| decode_entry::<T>(collection, raw))
            .ok_or_else(|| DocumentError::NotFound {
                collection,
                id: id.to_string(),
            })?;
        edit(&mut entity)?;
        if entity.id() != id {
            return Err(DocumentError::InvalidTransition("entity id is immutable"));
        }
        entity.validate()?;
        let value = serde_json::to_string(&entity)?;
        self.commit(
            &guard,
            collection,
            &[MutationOp::Put {
                collection,
                key: id.to_string(),
                value,
            }],
        )?;
        Ok(entity)
    }

    fn delete_from_mapping(&self, collection: Collection, key: &str) -> DocResult<()> {
        let guard = lock(&self.inner.write_lock);
        if !self.inner.engine.mapping(collection).contains_key(key) {
            return Err(DocumentError::NotFound {
                collection,
                id: key.to_string(),
            });
        }
        self.commit(
            &guard,
            collection,
            &[MutationOp::Delete {
                collection,
                key: key.to_string(),
            }],
        )
    }

    // ----- tasks -----

    pub fn create_task(&self, title: impl Into<String>) -> DocResult<Task> {
        let task = Task::new(title, now_epoch_ms());
        self.put_in_mapping(Collection::Tasks, &task)?;
        Ok(task)
    }

    /// Applies `edit` and bumps `modified_at`.
    pub fn update_task(&self, id: &str, edit: impl FnOnce(&mut Task)) -> DocResult<Task> {
        self.update_in_mapping(Collection::Tasks, id, |task: &mut Task| {
            edit(task);
            task.modified_at = now_epoch_ms().max(task.modified_at);
            Ok(())
        })
    }

    pub fn delete_task(&self, id: &str) -> DocResult<()> {
        self.delete_from_mapping(Collection::Tasks, id)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.inner
            .engine
            .mapping(Collection::Tasks)
            .get(id)
            .and_then(|raw| decode_entry(Collection::Tasks, raw))
    }

    /// All tasks, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.read_mapping(Collection::Tasks).into_values().collect();
        tasks.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        tasks
    }

    pub fn add_subtask(&self, task_id: &str, title: impl Into<String>) -> DocResult<Subtask> {
        let subtask = Subtask::new(title);
        let added = subtask.clone();
        self.update_task(task_id, move |task| task.subtasks.push(subtask))?;
        Ok(added)
    }

    pub fn toggle_subtask(&self, task_id: &str, subtask_id: &str) -> DocResult<Task> {
        self.update_in_mapping(Collection::Tasks, task_id, |task: &mut Task| {
            let subtask = task
                .subtask_mut(subtask_id)
                .ok_or_else(|| DocumentError::NotFound {
                    collection: Collection::Tasks,
                    id: subtask_id.to_string(),
                })?;
            subtask.completed = !subtask.completed;
            task.modified_at = now_epoch_ms().max(task.modified_at);
            Ok(())
        })
    }

    pub fn set_task_completed(&self, id: &str, completed: bool) -> DocResult<Task> {
        self.update_task(id, |task| task.completed = completed)
    }

    /// Counts one more focus block against the task.
    pub fn increment_blocks_spent(&self, id: &str) -> DocResult<Task> {
        self.update_task(id, |task| task.blocks_spent = task.blocks_spent.saturating_add(1))
    }

    // ----- blocks -----

    pub fn create_block(&self, draft: BlockDraft) -> DocResult<Block> {
        let block = Block::from_draft(draft);
        self.append_to_sequence(Collection::Blocks, &block)?;
        Ok(block)
    }

    /// Replaces the block in place. An invalidated block stays invalid.
    pub fn update_block(&self, id: &str, edit: impl FnOnce(&mut Block)) -> DocResult<Block> {
        self.update_in_sequence(Collection::Blocks, id, |current: &Block, block| {
            edit(block);
            if !current.is_valid && block.is_valid {
                return Err(DocumentError::InvalidTransition(
                    "an invalidated block cannot become valid again",
                ));
            }
            Ok(())
        })
    }

    /// Sets `completed_at`; validity and the task's `blocks_spent` are untouched.
    pub fn complete_block(&self, id: &str, completed_at: i64) -> DocResult<Block> {
        self.update_block(id, |block| block.completed_at = Some(completed_at))
    }

    pub fn invalidate_block(&self, id: &str) -> DocResult<Block> {
        self.update_block(id, |block| block.is_valid = false)
    }

    pub fn delete_block(&self, id: &str) -> DocResult<()> {
        self.delete_from_sequence::<Block>(Collection::Blocks, id)
    }

    pub fn get_block(&self, id: &str) -> Option<Block> {
        self.blocks().into_iter().find(|block| block.id == id)
    }

    /// Blocks in document order.
    pub fn blocks(&self) -> Vec<Block> {
        self.read_sequence(Collection::Blocks)
    }

    pub fn blocks_on(&self, date: NaiveDate) -> Vec<Block> {
        self.blocks()
            .into_iter()
            .filter(|block| block.date == date)
            .collect()
    }

    // ----- breaks -----

    pub fn start_break(&self, started_at: i64) -> DocResult<Break> {
        let entry = Break::start(started_at);
        self.append_to_sequence(Collection::Breaks, &entry)?;
        Ok(entry)
    }

    pub fn end_break(&self, id: &str, ended_at: i64) -> DocResult<Break> {
        self.update_break(id, |entry| entry.end(ended_at))
    }

    pub fn update_break(&self, id: &str, edit: impl FnOnce(&mut Break)) -> DocResult<Break> {
        self.update_in_sequence(Collection::Breaks, id, |_current: &Break, entry| {
            edit(entry);
            Ok(())
        })
    }

    pub fn delete_break(&self, id: &str) -> DocResult<()> {
        self.delete_from_sequence::<Break>(Collection::Breaks, id)
    }

    pub fn breaks(&self) -> Vec<Break> {
        self.read_sequence(Collection::Breaks)
    }

    // ----- right-now lists -----

    pub fn create_right_now_list(&self, block_id: Option<EntityId>) -> DocResult<RightNowList> {
        let list = RightNowList::new(block_id, now_epoch_ms());
        self.put_in_mapping(Collection::RightNowLists, &list)?;
        Ok(list)
    }

    pub fn add_right_now_item(
        &self,
        list_id: &str,
        text: impl Into<String>,
    ) -> DocResult<RightNowItem> {
        let item = RightNowItem::new(text);
        let added = item.clone();
        self.update_in_mapping(Collection::RightNowLists, list_id, move |list: &mut RightNowList| {
            list.items.push(item);
            Ok(())
        })?;
        Ok(added)
    }

    pub fn toggle_right_now_item(&self, list_id: &str, item_id: &str) -> DocResult<RightNowList> {
        self.update_in_mapping(Collection::RightNowLists, list_id, |list: &mut RightNowList| {
            let item = list.item_mut(item_id).ok_or_else(|| DocumentError::NotFound {
                collection: Collection::RightNowLists,
                id: item_id.to_string(),
            })?;
            item.completed = !item.completed;
            Ok(())
        })
    }

    pub fn delete_right_now_list(&self, id: &str) -> DocResult<()> {
        self.delete_from_mapping(Collection::RightNowLists, id)
    }

    pub fn right_now_lists(&self) -> Vec<RightNowList> {
        let mut lists: Vec<RightNowList> = self
            .read_mapping(Collection::RightNowLists)
            .into_values()
            .collect();
        lists.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        lists
    }

    // ----- task notes (keyed by raw task text) -----

    pub fn set_task_note(&self, task_text: &str, note: impl Into<String>) -> DocResult<()> {
        if task_text.is_empty() {
            return Err(ValidationError::EmptyField("task_text").into());
        }
        let guard = lock(&self.inner.write_lock);
        self.commit(
            &guard,
            Collection::TaskNotes,
            &[MutationOp::Put {
                collection: Collection::TaskNotes,
                key: task_text.to_string(),
                value: note.into(),
            }],
        )
    }

    pub fn task_note(&self, task_text: &str) -> Option<String> {
        self.inner
            .engine
            .mapping(Collection::TaskNotes)
            .remove(task_text)
    }

    pub fn delete_task_note(&self, task_text: &str) -> DocResult<()> {
        self.delete_from_mapping(Collection::TaskNotes, task_text)
    }

    pub fn task_notes(&self) -> BTreeMap<String, String> {
        self.inner.engine.mapping(Collection::TaskNotes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode_entry<T: DeserializeOwned>(collection: Collection, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(entity) => Some(entity),
        Err(err) => {
            warn!(
                "event=document_decode module=document status=skipped collection={} error={}",
                collection, err
            );
            None
        }
    }
}

fn positions_of<T: Entity>(collection: Collection, raw: &[String], id: &str) -> Vec<(usize, T)> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, entry)| decode_entry::<T>(collection, entry).map(|entity| (index, entity)))
        .filter(|(_, entity)| entity.id() == id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::block::BlockMeta;
    use std::sync::Mutex as StdMutex;

    fn draft() -> BlockDraft {
        BlockDraft {
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            started_at: 1_000,
            task_id: None,
            meta: BlockMeta::default(),
            notes: None,
        }
    }

    fn record_origins(store: &DocumentStore) -> Arc<StdMutex<Vec<(Origin, Vec<Collection>)>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(Arc::new(move |delta: &DocumentDelta| {
            sink.lock()
                .unwrap()
                .push((delta.origin, delta.collections.clone()));
        }));
        seen
    }

    #[test]
    fn update_keeps_block_position() {
        let store = DocumentStore::new();
        let first = store.create_block(draft()).unwrap();
        let second = store.create_block(draft()).unwrap();
        let third = store.create_block(draft()).unwrap();

        store
            .update_block(&second.id, |block| block.notes = Some("deep work".to_string()))
            .unwrap();

        let ids: Vec<_> = store.blocks().into_iter().map(|block| block.id).collect();
        assert_eq!(ids, [first.id, second.id.clone(), third.id]);
        assert_eq!(
            store.get_block(&second.id).unwrap().notes.as_deref(),
            Some("deep work")
        );
    }

    #[test]
    fn invalidated_block_cannot_be_revalidated() {
        let store = DocumentStore::new();
        let block = store.create_block(draft()).unwrap();
        store.invalidate_block(&block.id).unwrap();

        let err = store
            .update_block(&block.id, |block| block.is_valid = true)
            .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidTransition(_)));
        assert!(!store.get_block(&block.id).unwrap().is_valid);
    }

    #[test]
    fn changing_an_id_is_rejected() {
        let store = DocumentStore::new();
        let task = store.create_task("Write report").unwrap();
        let err = store
            .update_task(&task.id, |task| task.id = "other".to_string())
            .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidTransition(_)));
    }

    #[test]
    fn missing_entries_report_not_found() {
        let store = DocumentStore::new();
        assert!(matches!(
            store.complete_block("nope", 5).unwrap_err(),
            DocumentError::NotFound {
                collection: Collection::Blocks,
                ..
            }
        ));
        assert!(matches!(
            store.delete_task("nope").unwrap_err(),
            DocumentError::NotFound {
                collection: Collection::Tasks,
                ..
            }
        ));
    }

    #[test]
    fn local_ops_notify_once_with_collection() {
        let store = DocumentStore::new();
        let seen = record_origins(&store);

        let task = store.create_task("Write report").unwrap();
        store.add_subtask(&task.id, "outline").unwrap();
        store.start_break(0).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (Origin::Local, vec![Collection::Tasks]),
                (Origin::Local, vec![Collection::Tasks]),
                (Origin::Local, vec![Collection::Breaks]),
            ]
        );
    }

    #[test]
    fn collection_observer_only_sees_its_collection() {
        let store = DocumentStore::new();
        let hits = Arc::new(StdMutex::new(0usize));
        let counter = Arc::clone(&hits);
        let id = store.observe_collection(
            Collection::Breaks,
            Arc::new(move |_delta: &DocumentDelta| *counter.lock().unwrap() += 1),
        );

        store.create_task("ignored").unwrap();
        let entry = store.start_break(0).unwrap();
        store.unsubscribe(id);
        store.end_break(&entry.id, 60_000).unwrap();

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn remote_apply_is_tagged_and_idempotent() {
        let source = DocumentStore::new();
        source.create_task("Write report").unwrap();
        let snapshot = source.snapshot().unwrap();

        let target = DocumentStore::new();
        let seen = record_origins(&target);
        target.apply_delta(&snapshot, Origin::Remote).unwrap();
        target.apply_delta(&snapshot, Origin::Remote).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(Origin::Remote, vec![Collection::Tasks])]);
        assert_eq!(target.tasks(), source.tasks());
    }

    #[test]
    fn right_now_items_toggle() {
        let store = DocumentStore::new();
        let list = store.create_right_now_list(None).unwrap();
        let item = store.add_right_now_item(&list.id, "close tabs").unwrap();

        let list = store.toggle_right_now_item(&list.id, &item.id).unwrap();
        assert!(list.items[0].completed);
        assert_eq!(store.right_now_lists().len(), 1);
    }

    #[test]
    fn break_end_sets_duration() {
        let store = DocumentStore::new();
        let entry = store.start_break(0).unwrap();
        let ended = store.end_break(&entry.id, 10 * 60_000).unwrap();
        assert_eq!(ended.duration, 10);
        assert_eq!(store.breaks()[0].duration, 10);
    }
}
