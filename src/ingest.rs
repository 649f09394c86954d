//! Background import queue.
//!
//! Long imports (a parsed TMX delivered as a record sequence) run on a
//! dedicated worker thread behind a bounded queue instead of blocking the
//! caller. The worker persists the document, then each unit in order; only
//! the prefix that committed to storage is merged into the in-memory index,
//! so the index never claims a unit storage doesn't hold. Callers poll a
//! coarse idle/running status.
//!
//! Shutdown has two modes: drain the queue first, or stop at the next unit
//! boundary via a cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TmError;
use crate::provider::TmProvider;
use crate::tm::{NewUnit, TmStore, TranslationUnit};

/// One unit as delivered by the ingestion collaborator (e.g. a TMX parser).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub source_text: String,
    pub target_text: String,
    pub created_by: String,
    pub created_date: DateTime<Utc>,
    pub changed_by: String,
    pub changed_date: DateTime<Utc>,
    pub last_used_date: DateTime<Utc>,
}

impl UnitRecord {
    /// A record with every authorship field defaulted to `owner` and now.
    pub fn bare(source: &str, target: &str, owner: &str) -> Self {
        let now = Utc::now();
        Self {
            source_text: source.to_string(),
            target_text: target.to_string(),
            created_by: owner.to_string(),
            created_date: now,
            changed_by: owner.to_string(),
            changed_date: now,
            last_used_date: now,
        }
    }
}

/// A whole document to import: metadata plus its record stream.
#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub name: String,
    pub origin: String,
    pub src_lang: String,
    pub tgt_lang: String,
    pub owner: String,
    pub records: Vec<UnitRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownMode {
    /// Finish everything already queued, then stop.
    Drain,
    /// Stop at the next unit/job boundary, leaving queued jobs unrun.
    Immediate,
}

/// Result of one finished job, kept for callers to inspect after polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub name: String,
    pub doc_id: Option<u64>,
    pub units_committed: usize,
    pub error: Option<String>,
}

enum Job {
    Import(ImportSpec),
    Shutdown,
}

/// Handle to the import worker. Dropping it without `shutdown` detaches the
/// worker; `shutdown` joins it.
pub struct Importer {
    tx: SyncSender<Job>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    outcomes: Arc<Mutex<Vec<ImportOutcome>>>,
    handle: Option<JoinHandle<()>>,
}

impl Importer {
    /// Spawn the worker thread over a queue of at most `queue_size` pending
    /// jobs.
    pub fn start(store: Arc<dyn TmStore>, provider: Arc<TmProvider>, queue_size: usize) -> Self {
        let (tx, rx) = sync_channel::<Job>(queue_size.max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let handle = std::thread::spawn({
            let cancel = cancel.clone();
            let running = running.clone();
            let outcomes = outcomes.clone();
            move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Shutdown => return,
                        Job::Import(_) if cancel.load(Ordering::Relaxed) => continue,
                        Job::Import(spec) => {
                            running.store(true, Ordering::Relaxed);
                            let outcome =
                                run_import(store.as_ref(), &provider, &cancel, spec);
                            running.store(false, Ordering::Relaxed);
                            if let Ok(mut done) = outcomes.lock() {
                                done.push(outcome);
                            }
                        }
                    }
                }
            }
        });

        Self {
            tx,
            cancel,
            running,
            outcomes,
            handle: Some(handle),
        }
    }

    /// Queue an import. Fails with `InvalidInput` when the queue is full or
    /// the worker is gone — the caller decides whether to retry.
    pub fn submit(&self, spec: ImportSpec) -> Result<(), TmError> {
        self.tx.try_send(Job::Import(spec)).map_err(|e| match e {
            TrySendError::Full(_) => {
                TmError::InvalidInput("import queue is full, try again later".to_string())
            }
            TrySendError::Disconnected(_) => {
                TmError::Internal("import worker is not running".to_string())
            }
        })
    }

    /// Coarse status: `Running` while a job is being processed.
    pub fn status(&self) -> ImportStatus {
        if self.running.load(Ordering::Relaxed) {
            ImportStatus::Running
        } else {
            ImportStatus::Idle
        }
    }

    /// Drain the outcomes recorded since the last call.
    pub fn take_outcomes(&self) -> Vec<ImportOutcome> {
        self.outcomes
            .lock()
            .map(|mut done| std::mem::take(&mut *done))
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Stop the worker and join it.
    pub fn shutdown(mut self, mode: ShutdownMode) {
        if let ShutdownMode::Immediate = mode {
            self.cancel.store(true, Ordering::Relaxed);
        }
        // The sentinel lands behind queued jobs; with the cancel flag set
        // the worker skips those, otherwise it drains them first.
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("import worker panicked during shutdown");
            }
        }
    }
}

/// Persist one import job and merge the committed prefix into the index.
fn run_import(
    store: &dyn TmStore,
    provider: &TmProvider,
    cancel: &AtomicBool,
    spec: ImportSpec,
) -> ImportOutcome {
    let start = Instant::now();
    log::info!("started import of '{}' ({} TUs)", spec.name, spec.records.len());

    let doc_id = match store.add_document(
        &spec.name,
        &spec.origin,
        &spec.src_lang,
        &spec.tgt_lang,
        &spec.owner,
    ) {
        Ok(id) => id,
        Err(err) => {
            log::error!("import of '{}' failed to create document: {err:?}", spec.name);
            return ImportOutcome {
                name: spec.name,
                doc_id: None,
                units_committed: 0,
                error: Some(err.to_string()),
            };
        }
    };

    let mut committed: Vec<TranslationUnit> = Vec::with_capacity(spec.records.len());
    let mut error = None;

    for record in spec.records {
        if cancel.load(Ordering::Relaxed) {
            log::info!("import of '{}' cancelled after {} TUs", spec.name, committed.len());
            error = Some("cancelled".to_string());
            break;
        }

        let new_unit = NewUnit {
            doc_id,
            source_text: record.source_text,
            target_text: record.target_text,
            created_by: record.created_by,
            created_at: record.created_date,
            changed_by: record.changed_by,
            changed_at: record.changed_date,
            last_used_at: record.last_used_date,
        };
        match store.add_unit(new_unit.clone()) {
            Ok(unit_id) => committed.push(TranslationUnit {
                id: unit_id,
                doc_id,
                source_text: new_unit.source_text,
                target_text: new_unit.target_text,
                created_by: new_unit.created_by,
                created_at: new_unit.created_at,
                changed_by: new_unit.changed_by,
                changed_at: new_unit.changed_at,
                last_used_at: new_unit.last_used_at,
            }),
            Err(err) => {
                // Keep the committed prefix; report the rest as failed.
                log::error!(
                    "import of '{}' failed after {} TUs: {err:?}",
                    spec.name,
                    committed.len()
                );
                error = Some(err.to_string());
                break;
            }
        }
    }

    let units_committed = committed.len();

    // The index only ever learns about units storage already holds.
    let document = store
        .get_documents()
        .ok()
        .and_then(|mut docs| docs.remove(&doc_id));
    match document {
        Some(document) => {
            if let Err(err) = provider.adopt_imported(document, committed) {
                log::error!("import of '{}' could not update index: {err}", spec.name);
            }
        }
        None => log::error!("import of '{}' lost its document record", spec.name),
    }

    log::info!(
        "processed {units_committed} TUs for '{}' in {:.1}ms",
        spec.name,
        start.elapsed().as_micros() as f64 / 1000.0
    );

    ImportOutcome {
        name: spec.name,
        doc_id: Some(doc_id),
        units_committed,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchParams;
    use crate::tm::BackendMemory;
    use std::time::Duration;

    fn records(pairs: &[(&str, &str)]) -> Vec<UnitRecord> {
        pairs
            .iter()
            .map(|(s, t)| UnitRecord::bare(s, t, "alice"))
            .collect()
    }

    fn spec(name: &str, pairs: &[(&str, &str)]) -> ImportSpec {
        ImportSpec {
            name: name.to_string(),
            origin: format!("{name}.tmx"),
            src_lang: "en".to_string(),
            tgt_lang: "es".to_string(),
            owner: "alice".to_string(),
            records: records(pairs),
        }
    }

    fn wait_outcomes(importer: &Importer, n: usize) -> Vec<ImportOutcome> {
        let mut collected = vec![];
        for _ in 0..500 {
            collected.extend(importer.take_outcomes());
            if collected.len() >= n {
                return collected;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("import worker never finished {n} job(s)");
    }

    #[test]
    fn test_import_persists_and_indexes() {
        let store = Arc::new(BackendMemory::new());
        let provider = Arc::new(TmProvider::new(store.clone(), 1).unwrap());
        let importer = Importer::start(store.clone(), provider.clone(), 4);

        importer
            .submit(spec("memories", &[("cat", "gato"), ("dog", "perro")]))
            .unwrap();
        importer.shutdown(ShutdownMode::Drain);

        // Persisted.
        let docs = store.get_documents().unwrap();
        assert_eq!(docs.len(), 1);
        let doc_id = *docs.keys().next().unwrap();
        assert_eq!(store.get_units(doc_id).unwrap().len(), 2);

        // Searchable without an explicit load.
        let mut params = SearchParams::new("cat");
        params.threshold = 0.5;
        let rows = provider.search(&params).unwrap();
        assert_eq!(rows[0].target_text, "gato");
    }

    #[test]
    fn test_drain_finishes_queued_jobs() {
        let store = Arc::new(BackendMemory::new());
        let provider = Arc::new(TmProvider::new(store.clone(), 1).unwrap());
        let importer = Importer::start(store.clone(), provider.clone(), 8);

        importer.submit(spec("first", &[("a", "1")])).unwrap();
        importer.submit(spec("second", &[("b", "2")])).unwrap();
        importer.shutdown(ShutdownMode::Drain);

        assert_eq!(store.get_documents().unwrap().len(), 2);
    }

    /// Store whose `add_unit` signals entry, then stalls until the flag in
    /// `release` flips. Lets a test freeze the worker mid-job.
    struct GatedStore {
        inner: BackendMemory,
        entered: SyncSender<()>,
        release: std::sync::OnceLock<Arc<AtomicBool>>,
    }

    impl GatedStore {
        fn released(&self) -> bool {
            self.release
                .get()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
        }
    }

    impl TmStore for GatedStore {
        fn get_documents(
            &self,
        ) -> anyhow::Result<std::collections::HashMap<u64, crate::tm::TranslationDocument>>
        {
            self.inner.get_documents()
        }

        fn get_units(&self, doc_id: u64) -> anyhow::Result<Vec<TranslationUnit>> {
            self.inner.get_units(doc_id)
        }

        fn get_units_by_source(
            &self,
            doc_id: u64,
            source_text: &str,
        ) -> anyhow::Result<Vec<TranslationUnit>> {
            self.inner.get_units_by_source(doc_id, source_text)
        }

        fn add_document(
            &self,
            name: &str,
            origin: &str,
            src_lang: &str,
            tgt_lang: &str,
            owner: &str,
        ) -> anyhow::Result<u64> {
            self.inner.add_document(name, origin, src_lang, tgt_lang, owner)
        }

        fn add_unit(&self, unit: NewUnit) -> anyhow::Result<u64> {
            let _ = self.entered.try_send(());
            while !self.released() {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.inner.add_unit(unit)
        }

        fn delete_unit(&self, unit_id: u64) -> anyhow::Result<()> {
            self.inner.delete_unit(unit_id)
        }

        fn delete_document(&self, doc_id: u64) -> anyhow::Result<()> {
            self.inner.delete_document(doc_id)
        }

        fn delete_units_of_document(&self, doc_id: u64) -> anyhow::Result<()> {
            self.inner.delete_units_of_document(doc_id)
        }
    }

    #[test]
    fn test_immediate_shutdown_skips_queued_jobs() {
        let (entered_tx, entered_rx) = sync_channel(1);
        let store = Arc::new(GatedStore {
            inner: BackendMemory::new(),
            entered: entered_tx,
            release: std::sync::OnceLock::new(),
        });
        let provider = Arc::new(TmProvider::new(store.clone(), 1).unwrap());
        let importer = Importer::start(store.clone(), provider.clone(), 8);
        // The gate opens exactly when the cancel flag is raised, so the
        // worker is guaranteed to be frozen mid-job until shutdown begins.
        store.release.set(importer.cancel_handle()).unwrap();

        importer.submit(spec("first", &[("a", "1")])).unwrap();
        importer.submit(spec("second", &[("b", "2")])).unwrap();

        // Worker is now inside the first job's add_unit; "second" is queued.
        entered_rx.recv().unwrap();
        importer.shutdown(ShutdownMode::Immediate);

        // The in-flight unit committed, the queued job never started.
        let docs = store.get_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs.values().all(|d| d.name == "first"));
        let status = provider.status().unwrap();
        assert_eq!(status.unit_count, 1);
    }

    #[test]
    fn test_status_polling() {
        let store = Arc::new(BackendMemory::new());
        let provider = Arc::new(TmProvider::new(store.clone(), 1).unwrap());
        let importer = Importer::start(store, provider, 4);

        assert_eq!(importer.status(), ImportStatus::Idle);
        importer.submit(spec("memories", &[("cat", "gato")])).unwrap();
        wait_outcomes(&importer, 1);
        assert_eq!(importer.status(), ImportStatus::Idle);
        importer.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn test_outcome_reports_committed_count() {
        let store = Arc::new(BackendMemory::new());
        let provider = Arc::new(TmProvider::new(store.clone(), 1).unwrap());
        let importer = Importer::start(store, provider, 4);

        importer
            .submit(spec("memories", &[("cat", "gato"), ("dog", "perro")]))
            .unwrap();
        let outcomes = wait_outcomes(&importer, 1);
        assert_eq!(outcomes[0].name, "memories");
        assert_eq!(outcomes[0].units_committed, 2);
        assert!(outcomes[0].error.is_none());
        assert!(outcomes[0].doc_id.is_some());

        importer.shutdown(ShutdownMode::Drain);
    }
}
