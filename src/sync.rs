//! Reconciliation between the in-memory index and the persistence gateway.
//!
//! Two modes, both run by the provider under its write lock so a concurrent
//! search observes either the pre-sync or the post-sync state:
//!
//! - additive: re-merge every loaded document's units from storage. A
//!   document the gateway no longer knows is reported missing but its
//!   already-loaded units stay in memory.
//! - additive + subtractive: forget all indexed units, then reload each
//!   previously-loaded document. Units deleted upstream disappear, and
//!   missing documents drop out of the loaded table.

use serde::{Deserialize, Serialize};

use crate::index::TranslationIndex;
use crate::tm::TmStore;

/// What a sync pass did, per document id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: Vec<u64>,
    pub missing: Vec<u64>,
}

/// Add-only sync: never removes anything from the index.
pub fn sync_additive(index: &mut TranslationIndex, store: &dyn TmStore) -> anyhow::Result<SyncReport> {
    let documents = store.get_documents()?;
    let mut report = SyncReport::default();

    for doc_id in index.loaded_doc_ids() {
        match documents.get(&doc_id) {
            Some(doc) => {
                let units = store.get_units(doc_id)?;
                index.merge(doc.clone(), units);
                report.synced.push(doc_id);
            }
            None => {
                log::info!("document {doc_id} no longer exists in storage; keeping in-memory units");
                report.missing.push(doc_id);
            }
        }
    }

    Ok(report)
}

/// Full reload: clears indexed units first, so upstream deletions take
/// effect. Documents deleted upstream leave the loaded table entirely.
///
/// A gateway failure mid-reload propagates; the index then holds exactly the
/// documents already re-merged.
pub fn sync_additive_subtractive(
    index: &mut TranslationIndex,
    store: &dyn TmStore,
) -> anyhow::Result<SyncReport> {
    let documents = store.get_documents()?;
    let previously_loaded = index.loaded_doc_ids();

    index.clear_units();
    let mut report = SyncReport::default();

    for doc_id in previously_loaded {
        match documents.get(&doc_id) {
            Some(doc) => {
                let units = store.get_units(doc_id)?;
                index.merge(doc.clone(), units);
                report.synced.push(doc_id);
            }
            None => {
                index.unload_document(doc_id);
                log::info!("document {doc_id} deleted upstream; removed from memory");
                report.missing.push(doc_id);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tm::{BackendMemory, NewUnit};

    fn load(index: &mut TranslationIndex, store: &BackendMemory, doc_id: u64) {
        let doc = store.get_documents().unwrap().remove(&doc_id).unwrap();
        let units = store.get_units(doc_id).unwrap();
        index.merge(doc, units);
    }

    fn seed(store: &BackendMemory, name: &str, pairs: &[(&str, &str)]) -> u64 {
        let doc_id = store
            .add_document(name, "test", "en", "es", "alice")
            .unwrap();
        for (source, target) in pairs {
            store
                .add_unit(NewUnit::authored_now(doc_id, source, target, "alice"))
                .unwrap();
        }
        doc_id
    }

    #[test]
    fn test_additive_picks_up_new_units() {
        let store = BackendMemory::new();
        let doc_id = seed(&store, "a", &[("cat", "gato")]);

        let mut index = TranslationIndex::new();
        load(&mut index, &store, doc_id);

        store
            .add_unit(NewUnit::authored_now(doc_id, "dog", "perro", "alice"))
            .unwrap();

        let report = sync_additive(&mut index, &store).unwrap();
        assert_eq!(report.synced, vec![doc_id]);
        assert!(report.missing.is_empty());
        assert!(index.units_for("dog").is_some());
        // The already-loaded unit must not be indexed a second time.
        assert_eq!(index.unit_count(), 2);
    }

    #[test]
    fn test_additive_is_idempotent() {
        let store = BackendMemory::new();
        let doc_id = seed(&store, "a", &[("cat", "gato"), ("dog", "perro")]);

        let mut index = TranslationIndex::new();
        load(&mut index, &store, doc_id);

        sync_additive(&mut index, &store).unwrap();
        sync_additive(&mut index, &store).unwrap();
        assert_eq!(index.unit_count(), 2);
    }

    #[test]
    fn test_additive_keeps_units_of_missing_document() {
        let store = BackendMemory::new();
        let doc_id = seed(&store, "a", &[("cat", "gato")]);

        let mut index = TranslationIndex::new();
        load(&mut index, &store, doc_id);

        store.delete_units_of_document(doc_id).unwrap();
        store.delete_document(doc_id).unwrap();

        let report = sync_additive(&mut index, &store).unwrap();
        assert_eq!(report.missing, vec![doc_id]);
        // Additive-only contract: nothing removed.
        assert!(index.units_for("cat").is_some());
        assert!(index.is_loaded(doc_id));
    }

    #[test]
    fn test_subtractive_removes_upstream_deletions() {
        let store = BackendMemory::new();
        let doc_id = seed(&store, "a", &[("cat", "gato"), ("dog", "perro")]);

        let mut index = TranslationIndex::new();
        load(&mut index, &store, doc_id);

        // Delete "dog" upstream only.
        let dogs = store.get_units_by_source(doc_id, "dog").unwrap();
        store.delete_unit(dogs[0].id).unwrap();

        let report = sync_additive_subtractive(&mut index, &store).unwrap();
        assert_eq!(report.synced, vec![doc_id]);
        assert!(index.units_for("cat").is_some());
        assert!(index.units_for("dog").is_none());
    }

    #[test]
    fn test_subtractive_drops_missing_documents() {
        let store = BackendMemory::new();
        let keep = seed(&store, "keep", &[("cat", "gato")]);
        let gone = seed(&store, "gone", &[("dog", "perro")]);

        let mut index = TranslationIndex::new();
        load(&mut index, &store, keep);
        load(&mut index, &store, gone);

        store.delete_units_of_document(gone).unwrap();
        store.delete_document(gone).unwrap();

        let report = sync_additive_subtractive(&mut index, &store).unwrap();
        assert_eq!(report.synced, vec![keep]);
        assert_eq!(report.missing, vec![gone]);
        assert!(index.units_for("dog").is_none());
        assert!(!index.is_loaded(gone));
        assert!(index.is_loaded(keep));
    }

    #[test]
    fn test_sync_on_empty_index_is_noop() {
        let store = BackendMemory::new();
        let mut index = TranslationIndex::new();

        let report = sync_additive(&mut index, &store).unwrap();
        assert!(report.synced.is_empty() && report.missing.is_empty());

        let report = sync_additive_subtractive(&mut index, &store).unwrap();
        assert!(report.synced.is_empty() && report.missing.is_empty());
        assert!(index.is_empty());
    }
}
