//! In-memory translation-unit index.
//!
//! Maps trimmed source text to the units sharing it, in insertion order.
//! Keys from different documents coexist under one entry on purpose: search
//! spans all loaded documents. Two invariants hold after every mutation:
//! a key exists iff its unit list is non-empty, and every indexed unit
//! belongs to a document present in the loaded-document table.

use std::collections::HashMap;

use crate::tm::{TranslationDocument, TranslationUnit};

/// Source text -> units, plus the documents the units came from.
///
/// `key_order` mirrors the map's keys in first-insertion order so a snapshot
/// of keys is deterministic; the search pipeline relies on that to break
/// equal-score ties by index-insertion order.
#[derive(Debug, Default)]
pub struct TranslationIndex {
    entries: HashMap<String, Vec<TranslationUnit>>,
    key_order: Vec<String>,
    documents: HashMap<u64, TranslationDocument>,
}

impl TranslationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct source-text keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of indexed units across all keys.
    pub fn unit_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Snapshot of the keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.key_order.clone()
    }

    pub fn units_for(&self, key: &str) -> Option<&[TranslationUnit]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn is_loaded(&self, doc_id: u64) -> bool {
        self.documents.contains_key(&doc_id)
    }

    /// Ids of the loaded documents, ascending.
    pub fn loaded_doc_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.documents.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn document(&self, doc_id: u64) -> Option<&TranslationDocument> {
        self.documents.get(&doc_id)
    }

    /// Insert one unit under its (trimmed) source text, appending to any
    /// units already sharing the key. The owning document must already be in
    /// the loaded table.
    pub fn insert(&mut self, unit: TranslationUnit) {
        debug_assert!(self.documents.contains_key(&unit.doc_id));
        let key = unit.source_text.trim().to_string();
        match self.entries.get_mut(&key) {
            Some(units) => units.push(unit),
            None => {
                self.key_order.push(key.clone());
                self.entries.insert(key, vec![unit]);
            }
        }
    }

    /// Bulk-merge a document's units, marking the document loaded. Existing
    /// entries from other keys and documents are untouched; units landing on
    /// an existing key append to it.
    ///
    /// Idempotent per unit id: a unit already indexed under its key is
    /// skipped, so the additive sync can re-merge a document without
    /// duplicating what it loaded before.
    pub fn merge(&mut self, document: TranslationDocument, units: Vec<TranslationUnit>) {
        self.documents.insert(document.id, document);
        for unit in units {
            let key = unit.source_text.trim();
            let already = self
                .entries
                .get(key)
                .is_some_and(|us| us.iter().any(|u| u.id == unit.id));
            if !already {
                self.insert(unit);
            }
        }
    }

    /// Drop a document from the loaded table without touching its units.
    /// Only valid once the units are gone; used by document deletion.
    pub fn unload_document(&mut self, doc_id: u64) -> Option<TranslationDocument> {
        self.documents.remove(&doc_id)
    }

    /// Remove every unit matching (doc_id, source, target). Returns how many
    /// units were removed. Prunes the key when its list empties.
    pub fn remove_matching(&mut self, doc_id: u64, source: &str, target: &str) -> usize {
        let key = source.trim();
        let Some(units) = self.entries.get_mut(key) else {
            return 0;
        };
        let before = units.len();
        units.retain(|u| !(u.doc_id == doc_id && u.target_text == target));
        let removed = before - units.len();
        if units.is_empty() {
            self.entries.remove(key);
            self.key_order.retain(|k| k != key);
        }
        removed
    }

    /// Remove every unit belonging to `doc_id` and drop the document from
    /// the loaded table. Keys shared with other documents survive with their
    /// remaining units; emptied keys are pruned.
    pub fn remove_document(&mut self, doc_id: u64) -> usize {
        let mut removed = 0;
        let mut emptied: Vec<String> = vec![];
        for (key, units) in self.entries.iter_mut() {
            let before = units.len();
            units.retain(|u| u.doc_id != doc_id);
            removed += before - units.len();
            if units.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in &emptied {
            self.entries.remove(key);
        }
        if !emptied.is_empty() {
            self.key_order.retain(|k| !emptied.contains(k));
        }
        self.documents.remove(&doc_id);
        removed
    }

    /// Tear down the whole index, including the loaded-document table.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.key_order.clear();
        self.documents.clear();
    }

    /// Forget the indexed units but keep the loaded-document table. The
    /// subtractive sync uses this to know which documents to reload.
    pub fn clear_units(&mut self) {
        self.entries.clear();
        self.key_order.clear();
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        assert_eq!(self.entries.len(), self.key_order.len());
        for key in &self.key_order {
            let units = self.entries.get(key).expect("key_order entry missing from map");
            assert!(!units.is_empty(), "key {key:?} maps to an empty collection");
            for unit in units {
                assert!(
                    self.documents.contains_key(&unit.doc_id),
                    "unit {} belongs to unloaded document {}",
                    unit.id,
                    unit.doc_id
                );
            }
        }
    }
}
