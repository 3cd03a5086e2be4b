//! Loro-backed replica engine.
//!
//! Sequences are `LoroList`s of JSON strings, mappings are `LoroMap`s of
//! strings. Entities are replaced whole, so field-level merge is last
//! writer wins per entity while collection membership merges per CRDT.

use super::{ApplyOutcome, Collection, CollectionKind, DocResult, DocumentError, MutationOp, ReplicaEngine};
use loro::{ExportMode, LoroDoc, LoroValue};
use std::collections::BTreeMap;
use std::fmt::Display;

pub struct LoroEngine {
    doc: LoroDoc,
}

impl LoroEngine {
    pub fn new() -> Self {
        Self {
            doc: LoroDoc::new(),
        }
    }

    fn collection_value(&self, collection: Collection) -> LoroValue {
        match collection.kind() {
            CollectionKind::Sequence => self.doc.get_list(collection.name()).get_value(),
            CollectionKind::Mapping => self.doc.get_map(collection.name()).get_value(),
        }
    }
}

impl Default for LoroEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaEngine for LoroEngine {
    fn sequence(&self, collection: Collection) -> Vec<String> {
        match self.doc.get_list(collection.name()).get_value() {
            LoroValue::List(items) => items
                .iter()
                .filter_map(|item| item.as_string().map(|text| text.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn mapping(&self, collection: Collection) -> BTreeMap<String, String> {
        match self.doc.get_map(collection.name()).get_value() {
            LoroValue::Map(entries) => entries
                .iter()
                .filter_map(|(key, value)| {
                    value
                        .as_string()
                        .map(|text| (key.to_string(), text.to_string()))
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    fn transact(&self, ops: &[MutationOp]) -> DocResult<Vec<u8>> {
        let before = self.doc.oplog_vv();
        for op in ops {
            match op {
                MutationOp::Insert {
                    collection,
                    index,
                    value,
                } => self
                    .doc
                    .get_list(collection.name())
                    .insert(*index, value.as_str())
                    .map_err(engine_error)?,
                MutationOp::Remove { collection, index } => self
                    .doc
                    .get_list(collection.name())
                    .delete(*index, 1)
                    .map_err(engine_error)?,
                MutationOp::Put {
                    collection,
                    key,
                    value,
                } => self
                    .doc
                    .get_map(collection.name())
                    .insert(key, value.as_str())
                    .map_err(engine_error)?,
                MutationOp::Delete { collection, key } => self
                    .doc
                    .get_map(collection.name())
                    .delete(key)
                    .map_err(engine_error)?,
            }
        }
        self.doc.commit();
        self.doc
            .export(ExportMode::updates(&before))
            .map_err(engine_error)
    }

    fn apply_delta(&self, delta: &[u8]) -> DocResult<ApplyOutcome> {
        let before_vv = self.doc.oplog_vv();
        let before: Vec<(Collection, LoroValue)> = Collection::ALL
            .iter()
            .map(|collection| (*collection, self.collection_value(*collection)))
            .collect();

        let status = self.doc.import(delta).map_err(engine_error)?;

        let changed = before
            .into_iter()
            .filter(|(collection, value)| self.collection_value(*collection) != *value)
            .map(|(collection, _)| collection)
            .collect();
        Ok(ApplyOutcome {
            changed,
            advanced: self.doc.oplog_vv() != before_vv,
            pending: status.pending.is_some(),
        })
    }

    fn snapshot(&self) -> DocResult<Vec<u8>> {
        self.doc.export(ExportMode::Snapshot).map_err(engine_error)
    }
}

fn engine_error(err: impl Display) -> DocumentError {
    DocumentError::Engine(err.to_string())
}
