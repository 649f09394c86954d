//! Translation-memory records and the persistence gateway.
//!
//! `TranslationDocument` (a TM) and `TranslationUnit` (a TU) are the
//! canonical record types; their serde derives are the wire form. `TmStore`
//! is the gateway every provider operation persists through. Two backends:
//! `BackendMemory` for tests and embedding, `BackendCsv` for on-disk data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A translation memory document: a named collection of translation units
/// sharing a source/target language pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationDocument {
    pub id: u64,
    pub name: String,
    /// Where the document came from (original filename, "from_memory", ...).
    pub origin: String,
    pub src_lang: String,
    pub tgt_lang: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One source-text/target-text pair with authorship metadata, belonging to
/// exactly one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub id: u64,
    pub doc_id: u64,
    pub source_text: String,
    pub target_text: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Fields for a unit about to be inserted; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUnit {
    pub doc_id: u64,
    pub source_text: String,
    pub target_text: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl NewUnit {
    /// A unit authored right now by `user`, with all three timestamps set to
    /// the current time.
    pub fn authored_now(doc_id: u64, source: &str, target: &str, user: &str) -> Self {
        let now = Utc::now();
        Self {
            doc_id,
            source_text: source.to_string(),
            target_text: target.to_string(),
            created_by: user.to_string(),
            created_at: now,
            changed_by: user.to_string(),
            changed_at: now,
            last_used_at: now,
        }
    }
}

/// Persistence gateway for documents and units.
///
/// Storage errors propagate as-is; a `Result::Ok` means the mutation was
/// durably applied. Document and unit identifiers are monotonic and never
/// reused, even after deletion.
pub trait TmStore: Send + Sync {
    fn get_documents(&self) -> anyhow::Result<HashMap<u64, TranslationDocument>>;
    fn get_units(&self, doc_id: u64) -> anyhow::Result<Vec<TranslationUnit>>;
    fn get_units_by_source(
        &self,
        doc_id: u64,
        source_text: &str,
    ) -> anyhow::Result<Vec<TranslationUnit>>;
    fn add_document(
        &self,
        name: &str,
        origin: &str,
        src_lang: &str,
        tgt_lang: &str,
        owner: &str,
    ) -> anyhow::Result<u64>;
    fn add_unit(&self, unit: NewUnit) -> anyhow::Result<u64>;
    fn delete_unit(&self, unit_id: u64) -> anyhow::Result<()>;
    fn delete_document(&self, doc_id: u64) -> anyhow::Result<()>;
    fn delete_units_of_document(&self, doc_id: u64) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    documents: Vec<TranslationDocument>,
    units: Vec<TranslationUnit>,
}

/// In-process store. Ids come from atomic counters that only ever grow, so
/// deleting a document can never free its id for reuse.
#[derive(Debug, Default)]
pub struct BackendMemory {
    state: RwLock<StoreState>,
    next_doc_id: AtomicU64,
    next_unit_id: AtomicU64,
}

impl BackendMemory {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            next_doc_id: AtomicU64::new(1),
            next_unit_id: AtomicU64::new(1),
        }
    }
}

impl TmStore for BackendMemory {
    fn get_documents(&self) -> anyhow::Result<HashMap<u64, TranslationDocument>> {
        let state = self.state.read().unwrap();
        Ok(state.documents.iter().map(|d| (d.id, d.clone())).collect())
    }

    fn get_units(&self, doc_id: u64) -> anyhow::Result<Vec<TranslationUnit>> {
        let state = self.state.read().unwrap();
        Ok(state
            .units
            .iter()
            .filter(|u| u.doc_id == doc_id)
            .cloned()
            .collect())
    }

    fn get_units_by_source(
        &self,
        doc_id: u64,
        source_text: &str,
    ) -> anyhow::Result<Vec<TranslationUnit>> {
        let state = self.state.read().unwrap();
        Ok(state
            .units
            .iter()
            .filter(|u| u.doc_id == doc_id && u.source_text == source_text)
            .cloned()
            .collect())
    }

    fn add_document(
        &self,
        name: &str,
        origin: &str,
        src_lang: &str,
        tgt_lang: &str,
        _owner: &str,
    ) -> anyhow::Result<u64> {
        let id = self.next_doc_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let doc = TranslationDocument {
            id,
            name: name.to_string(),
            origin: origin.to_string(),
            src_lang: src_lang.to_string(),
            tgt_lang: tgt_lang.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.state.write().unwrap().documents.push(doc);
        Ok(id)
    }

    fn add_unit(&self, unit: NewUnit) -> anyhow::Result<u64> {
        let mut state = self.state.write().unwrap();
        if !state.documents.iter().any(|d| d.id == unit.doc_id) {
            return Err(anyhow!("no document with id {}", unit.doc_id));
        }
        let id = self.next_unit_id.fetch_add(1, Ordering::SeqCst);
        state.units.push(TranslationUnit {
            id,
            doc_id: unit.doc_id,
            source_text: unit.source_text,
            target_text: unit.target_text,
            created_by: unit.created_by,
            created_at: unit.created_at,
            changed_by: unit.changed_by,
            changed_at: unit.changed_at,
            last_used_at: unit.last_used_at,
        });
        if let Some(doc) = state.documents.iter_mut().find(|d| d.id == unit.doc_id) {
            doc.updated_at = Utc::now();
        }
        Ok(id)
    }

    fn delete_unit(&self, unit_id: u64) -> anyhow::Result<()> {
        self.state.write().unwrap().units.retain(|u| u.id != unit_id);
        Ok(())
    }

    fn delete_document(&self, doc_id: u64) -> anyhow::Result<()> {
        self.state
            .write()
            .unwrap()
            .documents
            .retain(|d| d.id != doc_id);
        Ok(())
    }

    fn delete_units_of_document(&self, doc_id: u64) -> anyhow::Result<()> {
        self.state
            .write()
            .unwrap()
            .units
            .retain(|u| u.doc_id != doc_id);
        Ok(())
    }
}

const DOC_HEADERS: [&str; 7] = [
    "id",
    "name",
    "origin",
    "src_lang",
    "tgt_lang",
    "created_at",
    "updated_at",
];

const UNIT_HEADERS: [&str; 9] = [
    "id",
    "doc_id",
    "source_text",
    "target_text",
    "created_by",
    "created_at",
    "changed_by",
    "changed_at",
    "last_used_at",
];

const SEQ_HEADERS: [&str; 2] = ["next_doc_id", "next_unit_id"];

/// CSV-file store: `documents.csv`, `units.csv` and `seq.csv` under one data
/// directory. Loaded eagerly, rewritten on every mutation with a
/// write-temp-then-rename so a crash never leaves a half-written file.
///
/// `seq.csv` persists the id counters across deletions; the next id is never
/// derived from the surviving rows.
#[derive(Debug)]
pub struct BackendCsv {
    state: RwLock<StoreState>,
    next_doc_id: AtomicU64,
    next_unit_id: AtomicU64,
    docs_path: PathBuf,
    units_path: PathBuf,
    seq_path: PathBuf,
}

impl BackendCsv {
    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let docs_path = data_dir.join("documents.csv");
        let units_path = data_dir.join("units.csv");
        let seq_path = data_dir.join("seq.csv");

        if std::fs::metadata(&docs_path).is_err() {
            log::info!("creating new translation memory database at {data_dir:?}");
            write_csv(&docs_path, &DOC_HEADERS, std::iter::empty())?;
            write_csv(&units_path, &UNIT_HEADERS, std::iter::empty())?;
            write_csv(
                &seq_path,
                &SEQ_HEADERS,
                std::iter::once(vec!["1".to_string(), "1".to_string()]),
            )?;
        }

        let documents = read_documents(&docs_path)?;
        let units = read_units(&units_path)?;
        let (next_doc_id, next_unit_id) = read_seq(&seq_path)?;

        Ok(Self {
            state: RwLock::new(StoreState { documents, units }),
            next_doc_id: AtomicU64::new(next_doc_id),
            next_unit_id: AtomicU64::new(next_unit_id),
            docs_path,
            units_path,
            seq_path,
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        let state = self.state.read().unwrap();

        write_csv(
            &self.docs_path,
            &DOC_HEADERS,
            state.documents.iter().map(|d| {
                vec![
                    d.id.to_string(),
                    d.name.clone(),
                    d.origin.clone(),
                    d.src_lang.clone(),
                    d.tgt_lang.clone(),
                    d.created_at.to_rfc3339(),
                    d.updated_at.to_rfc3339(),
                ]
            }),
        )?;
        write_csv(
            &self.units_path,
            &UNIT_HEADERS,
            state.units.iter().map(|u| {
                vec![
                    u.id.to_string(),
                    u.doc_id.to_string(),
                    u.source_text.clone(),
                    u.target_text.clone(),
                    u.created_by.clone(),
                    u.created_at.to_rfc3339(),
                    u.changed_by.clone(),
                    u.changed_at.to_rfc3339(),
                    u.last_used_at.to_rfc3339(),
                ]
            }),
        )?;
        write_csv(
            &self.seq_path,
            &SEQ_HEADERS,
            std::iter::once(vec![
                self.next_doc_id.load(Ordering::SeqCst).to_string(),
                self.next_unit_id.load(Ordering::SeqCst).to_string(),
            ]),
        )?;

        Ok(())
    }
}

impl TmStore for BackendCsv {
    fn get_documents(&self) -> anyhow::Result<HashMap<u64, TranslationDocument>> {
        let state = self.state.read().unwrap();
        Ok(state.documents.iter().map(|d| (d.id, d.clone())).collect())
    }

    fn get_units(&self, doc_id: u64) -> anyhow::Result<Vec<TranslationUnit>> {
        let state = self.state.read().unwrap();
        Ok(state
            .units
            .iter()
            .filter(|u| u.doc_id == doc_id)
            .cloned()
            .collect())
    }

    fn get_units_by_source(
        &self,
        doc_id: u64,
        source_text: &str,
    ) -> anyhow::Result<Vec<TranslationUnit>> {
        let state = self.state.read().unwrap();
        Ok(state
            .units
            .iter()
            .filter(|u| u.doc_id == doc_id && u.source_text == source_text)
            .cloned()
            .collect())
    }

    fn add_document(
        &self,
        name: &str,
        origin: &str,
        src_lang: &str,
        tgt_lang: &str,
        _owner: &str,
    ) -> anyhow::Result<u64> {
        let id = self.next_doc_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.state
            .write()
            .unwrap()
            .documents
            .push(TranslationDocument {
                id,
                name: name.to_string(),
                origin: origin.to_string(),
                src_lang: src_lang.to_string(),
                tgt_lang: tgt_lang.to_string(),
                created_at: now,
                updated_at: now,
            });
        self.save()?;
        Ok(id)
    }

    fn add_unit(&self, unit: NewUnit) -> anyhow::Result<u64> {
        let id = {
            let mut state = self.state.write().unwrap();
            if !state.documents.iter().any(|d| d.id == unit.doc_id) {
                return Err(anyhow!("no document with id {}", unit.doc_id));
            }
            let id = self.next_unit_id.fetch_add(1, Ordering::SeqCst);
            state.units.push(TranslationUnit {
                id,
                doc_id: unit.doc_id,
                source_text: unit.source_text,
                target_text: unit.target_text,
                created_by: unit.created_by,
                created_at: unit.created_at,
                changed_by: unit.changed_by,
                changed_at: unit.changed_at,
                last_used_at: unit.last_used_at,
            });
            if let Some(doc) = state.documents.iter_mut().find(|d| d.id == unit.doc_id) {
                doc.updated_at = Utc::now();
            }
            id
        };
        self.save()?;
        Ok(id)
    }

    fn delete_unit(&self, unit_id: u64) -> anyhow::Result<()> {
        self.state.write().unwrap().units.retain(|u| u.id != unit_id);
        self.save()
    }

    fn delete_document(&self, doc_id: u64) -> anyhow::Result<()> {
        self.state
            .write()
            .unwrap()
            .documents
            .retain(|d| d.id != doc_id);
        self.save()
    }

    fn delete_units_of_document(&self, doc_id: u64) -> anyhow::Result<()> {
        self.state
            .write()
            .unwrap()
            .units
            .retain(|u| u.doc_id != doc_id);
        self.save()
    }
}

fn write_csv(
    path: &Path,
    headers: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> anyhow::Result<()> {
    let temp_path = path.with_extension("csv-tmp");
    let mut wrt = csv::Writer::from_path(&temp_path)?;
    wrt.write_record(headers)?;
    for row in rows {
        wrt.write_record(&row)?;
    }
    wrt.flush()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn field(record: &csv::StringRecord, idx: usize, name: &str) -> anyhow::Result<String> {
    Ok(record
        .get(idx)
        .ok_or(anyhow!("couldnt get record {name}"))?
        .to_string())
}

fn timestamp(record: &csv::StringRecord, idx: usize, name: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = field(record, idx, name)?;
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

fn read_documents(path: &Path) -> anyhow::Result<Vec<TranslationDocument>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut documents = vec![];
    for record in reader.records() {
        let record = record?;
        documents.push(TranslationDocument {
            id: field(&record, 0, "id")?.parse()?,
            name: field(&record, 1, "name")?,
            origin: field(&record, 2, "origin")?,
            src_lang: field(&record, 3, "src_lang")?,
            tgt_lang: field(&record, 4, "tgt_lang")?,
            created_at: timestamp(&record, 5, "created_at")?,
            updated_at: timestamp(&record, 6, "updated_at")?,
        });
    }
    Ok(documents)
}

fn read_units(path: &Path) -> anyhow::Result<Vec<TranslationUnit>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut units = vec![];
    for record in reader.records() {
        let record = record?;
        units.push(TranslationUnit {
            id: field(&record, 0, "id")?.parse()?,
            doc_id: field(&record, 1, "doc_id")?.parse()?,
            source_text: field(&record, 2, "source_text")?,
            target_text: field(&record, 3, "target_text")?,
            created_by: field(&record, 4, "created_by")?,
            created_at: timestamp(&record, 5, "created_at")?,
            changed_by: field(&record, 6, "changed_by")?,
            changed_at: timestamp(&record, 7, "changed_at")?,
            last_used_at: timestamp(&record, 8, "last_used_at")?,
        });
    }
    Ok(units)
}

fn read_seq(path: &Path) -> anyhow::Result<(u64, u64)> {
    let mut reader = csv::Reader::from_path(path)?;
    let record = reader
        .records()
        .next()
        .ok_or(anyhow!("seq.csv has no counter row"))??;
    Ok((
        field(&record, 0, "next_doc_id")?.parse()?,
        field(&record, 1, "next_unit_id")?.parse()?,
    ))
}
