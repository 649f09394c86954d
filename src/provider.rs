//! Per-session translation-memory provider.
//!
//! One `TmProvider` per caller session: it owns the session's index behind a
//! single-writer/multiple-reader lock, the persistence gateway handle, and a
//! rayon pool built once and reused across searches. Every operation takes
//! the index lock exactly once and never nests another lock inside it.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::TmError;
use crate::index::TranslationIndex;
use crate::search::{self, Match, SearchParams};
use crate::sync::{self, SyncReport};
use crate::tm::{NewUnit, TmStore};

/// Outcome of loading a document into memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded { units: usize },
    /// Already in memory; callers wanting fresh data should sync instead.
    AlreadyLoaded,
    NotFound,
}

/// Outcome of `add_or_update_tu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    Updated,
    /// An identical (document, source, target) unit already exists, or
    /// overwriting was declined.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub loaded_tm_ids: Vec<u64>,
    pub key_count: usize,
    pub unit_count: usize,
}

pub struct TmProvider {
    index: RwLock<TranslationIndex>,
    store: Arc<dyn TmStore>,
    pool: rayon::ThreadPool,
}

impl TmProvider {
    /// `num_cores` bounds the search worker pool; 0 means all available
    /// execution units. The pool is built here and reused for every search.
    pub fn new(store: Arc<dyn TmStore>, num_cores: usize) -> Result<Self, TmError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cores)
            .build()
            .map_err(|e| TmError::Internal(format!("failed to build worker pool: {e}")))?;

        Ok(Self {
            index: RwLock::new(TranslationIndex::new()),
            store,
            pool,
        })
    }

    fn read_index(&self) -> Result<std::sync::RwLockReadGuard<'_, TranslationIndex>, TmError> {
        self.index
            .read()
            .map_err(|e| TmError::Internal(format!("index lock poisoned: {e}")))
    }

    fn write_index(&self) -> Result<std::sync::RwLockWriteGuard<'_, TranslationIndex>, TmError> {
        self.index
            .write()
            .map_err(|e| TmError::Internal(format!("index lock poisoned: {e}")))
    }

    /// Load a document's units from storage into the index.
    ///
    /// The fetch happens before the write lock is taken, and the merge is
    /// all-or-nothing: a miss leaves prior index contents untouched.
    pub fn load_tm(&self, doc_id: u64) -> Result<LoadOutcome, TmError> {
        if self.read_index()?.is_loaded(doc_id) {
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let Some(document) = self.store.get_documents()?.remove(&doc_id) else {
            return Ok(LoadOutcome::NotFound);
        };
        let units = self.store.get_units(doc_id)?;
        let count = units.len();

        let start = Instant::now();
        let mut index = self.write_index()?;
        if index.is_loaded(doc_id) {
            // Another caller got there between our check and the lock.
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        index.merge(document, units);
        drop(index);

        log::info!(
            "loaded tm {doc_id} ({count} TUs) to memory in {:.1}ms",
            start.elapsed().as_micros() as f64 / 1000.0
        );
        Ok(LoadOutcome::Loaded { units: count })
    }

    /// Add a unit, or update/skip per the duplicate policy:
    ///
    /// 1. an identical (doc, source, target) already existing → `Skipped`;
    /// 2. `allow_multiple` false and the source exists in this document:
    ///    `overwrite_existing` deletes all of them and inserts the new unit
    ///    (`Updated`), otherwise `Skipped`;
    /// 3. `allow_multiple` true → insert unconditionally (`Added`).
    ///
    /// Duplicate checks are scoped to `doc_id`; the same pair may exist in
    /// another document. The index is only touched when the document is
    /// loaded in this session; storage is always updated.
    pub fn add_or_update_tu(
        &self,
        doc_id: u64,
        source: &str,
        target: &str,
        user: &str,
        allow_multiple: bool,
        overwrite_existing: bool,
    ) -> Result<AddOutcome, TmError> {
        // Policy evaluation and mutation form one critical section: checking
        // for existing units outside the lock would let two identical adds
        // race past the duplicate check and both insert.
        let mut index = self.write_index()?;

        if self.store.get_documents()?.get(&doc_id).is_none() {
            return Err(TmError::NotFound(format!("document {doc_id}")));
        }

        let existing = self.store.get_units_by_source(doc_id, source)?;
        if existing.iter().any(|u| u.target_text == target) {
            return Ok(AddOutcome::Skipped);
        }

        let mut outcome = AddOutcome::Added;

        if !allow_multiple && !existing.is_empty() {
            if !overwrite_existing {
                return Ok(AddOutcome::Skipped);
            }
            for old in &existing {
                self.store.delete_unit(old.id)?;
                if index.is_loaded(doc_id) {
                    index.remove_matching(doc_id, &old.source_text, &old.target_text);
                }
            }
            outcome = AddOutcome::Updated;
        }

        let new_unit = NewUnit::authored_now(doc_id, source, target, user);
        let unit_id = self.store.add_unit(new_unit.clone())?;
        if index.is_loaded(doc_id) {
            index.insert(crate::tm::TranslationUnit {
                id: unit_id,
                doc_id,
                source_text: new_unit.source_text,
                target_text: new_unit.target_text,
                created_by: new_unit.created_by,
                created_at: new_unit.created_at,
                changed_by: new_unit.changed_by,
                changed_at: new_unit.changed_at,
                last_used_at: new_unit.last_used_at,
            });
        }

        Ok(outcome)
    }

    /// Permanently delete every unit matching (doc, source, target) from
    /// both the index and storage.
    pub fn delete_tu(&self, doc_id: u64, source: &str, target: &str) -> Result<usize, TmError> {
        let mut index = self.write_index()?;
        let existing = self.store.get_units_by_source(doc_id, source)?;
        let doomed: Vec<u64> = existing
            .iter()
            .filter(|u| u.target_text == target)
            .map(|u| u.id)
            .collect();

        for unit_id in &doomed {
            self.store.delete_unit(*unit_id)?;
        }
        if index.is_loaded(doc_id) {
            index.remove_matching(doc_id, source, target);
        }

        Ok(doomed.len())
    }

    /// Permanently delete a document and all its units. No going back;
    /// confirmation prompts belong to the caller.
    pub fn delete_tm(&self, doc_id: u64) -> Result<(), TmError> {
        if self.store.get_documents()?.get(&doc_id).is_none() {
            return Err(TmError::NotFound(format!("document {doc_id}")));
        }

        let mut index = self.write_index()?;
        self.store.delete_units_of_document(doc_id)?;
        self.store.delete_document(doc_id)?;
        index.remove_document(doc_id);

        log::info!("deleted tm {doc_id} from storage and memory");
        Ok(())
    }

    /// Ranked fuzzy search over everything loaded.
    ///
    /// Fails fast with `EmptyIndex` when nothing is loaded; a blank query is
    /// an empty result, not an error. Runs under the read lock, so
    /// concurrent searches proceed in parallel while mutations wait.
    pub fn search(&self, params: &SearchParams) -> Result<Vec<Match>, TmError> {
        params.validate()?;

        let index = self.read_index()?;
        if index.is_empty() {
            return Err(TmError::EmptyIndex);
        }

        // A panicking worker must fail the whole call rather than silently
        // dropping part of the result set.
        let start = Instant::now();
        let rows = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            search::run(&index, &self.pool, params)
        }))
        .map_err(|_| TmError::Internal("search worker panicked".to_string()))?;
        log::debug!(
            "search over {} keys took {:.1}ms, {} rows",
            index.len(),
            start.elapsed().as_micros() as f64 / 1000.0,
            rows.len()
        );
        Ok(rows)
    }

    /// Add-only reconciliation with storage (see [`sync`]).
    pub fn sync_add_only(&self) -> Result<SyncReport, TmError> {
        let mut index = self.write_index()?;
        Ok(sync::sync_additive(&mut index, self.store.as_ref())?)
    }

    /// Full reload reconciliation: also removes units deleted upstream.
    pub fn sync_add_delete(&self) -> Result<SyncReport, TmError> {
        let mut index = self.write_index()?;
        Ok(sync::sync_additive_subtractive(&mut index, self.store.as_ref())?)
    }

    pub fn status(&self) -> Result<ProviderStatus, TmError> {
        let index = self.read_index()?;
        Ok(ProviderStatus {
            loaded_tm_ids: index.loaded_doc_ids(),
            key_count: index.len(),
            unit_count: index.unit_count(),
        })
    }

    /// Merge units the ingest worker has already persisted, marking the
    /// document loaded. Called by the background importer only.
    pub(crate) fn adopt_imported(
        &self,
        document: crate::tm::TranslationDocument,
        units: Vec<crate::tm::TranslationUnit>,
    ) -> Result<(), TmError> {
        let mut index = self.write_index()?;
        index.merge(document, units);
        Ok(())
    }
}
