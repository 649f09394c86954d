use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};

mod config;
mod errors;
mod index;
mod ingest;
mod provider;
mod score;
mod search;
mod sync;
mod tm;

use config::Config;
use ingest::{ImportSpec, Importer, ShutdownMode, UnitRecord};
use provider::TmProvider;
use search::SearchParams;
use tm::{BackendCsv, TmStore};

#[derive(Parser)]
#[command(name = "vstm", about = "Translation-memory fuzzy search")]
struct Args {
    /// Directory holding the TM database and config.yaml
    #[arg(long, global = true, default_value = "./vstm-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the translation memories in storage
    List,

    /// Load TMs and report what the session holds in memory
    Status {
        /// TM ids to load; loads all when omitted.
        #[arg(long = "tm")]
        tm_ids: Vec<u64>,
    },

    /// Fuzzy-search the loaded translation memories
    Search {
        query: String,

        /// TM ids to load before searching; repeatable. Loads all when omitted.
        #[arg(long = "tm")]
        tm_ids: Vec<u64>,

        /// Minimum match score [0, 1]
        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum rows to return; 0 means unbounded
        #[arg(long)]
        max_results: Option<usize>,

        /// Cost of case-only replacements in the distance calculation
        #[arg(long)]
        case_cost: Option<f64>,
    },

    /// Add or update a translation unit
    Add {
        #[arg(long = "tm")]
        tm_id: u64,
        source: String,
        target: String,

        #[arg(long, default_value = "local")]
        user: String,

        /// Allow several units with the same source text (distinct targets)
        #[arg(long)]
        allow_multiple: bool,

        /// Replace existing units sharing the source text
        #[arg(long)]
        overwrite: bool,
    },

    /// Permanently delete the units matching a source/target pair
    DeleteTu {
        #[arg(long = "tm")]
        tm_id: u64,
        source: String,
        target: String,

        #[arg(long)]
        yes: bool,
    },

    /// Permanently delete a whole translation memory
    DeleteTm {
        tm_id: u64,

        #[arg(long)]
        yes: bool,
    },

    /// Reconcile in-memory data with storage for the given TMs
    Sync {
        /// TM ids to load before syncing; loads all when omitted.
        #[arg(long = "tm")]
        tm_ids: Vec<u64>,

        /// Also remove units deleted upstream (full reload)
        #[arg(long)]
        subtractive: bool,
    },

    /// Import a two-column (source,target) CSV as a new TM
    Import {
        file: PathBuf,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "en")]
        src_lang: String,

        #[arg(long, default_value = "en")]
        tgt_lang: String,

        #[arg(long, default_value = "local")]
        owner: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load_with(&args.data_dir)?;
    let store: Arc<dyn TmStore> = Arc::new(BackendCsv::load(&args.data_dir)?);
    let provider = Arc::new(TmProvider::new(store.clone(), config.num_cores)?);

    match args.command {
        Command::List => {
            let mut docs: Vec<_> = store.get_documents()?.into_values().collect();
            docs.sort_by_key(|d| d.id);
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }

        Command::Status { tm_ids } => {
            load_tms(&provider, &store, &tm_ids)?;
            println!("{}", serde_json::to_string_pretty(&provider.status()?)?);
        }

        Command::Search {
            query,
            tm_ids,
            threshold,
            max_results,
            case_cost,
        } => {
            load_tms(&provider, &store, &tm_ids)?;

            let params = SearchParams {
                query,
                threshold: threshold.unwrap_or(config.search.threshold),
                max_results: max_results.unwrap_or(config.search.max_results),
                case_cost: case_cost.unwrap_or(config.search.case_cost),
            };
            let rows = provider.search(&params)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Command::Add {
            tm_id,
            source,
            target,
            user,
            allow_multiple,
            overwrite,
        } => {
            let outcome =
                provider.add_or_update_tu(tm_id, &source, &target, &user, allow_multiple, overwrite)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Command::DeleteTu {
            tm_id,
            source,
            target,
            yes,
        } => {
            if !yes && !confirm(&format!("delete all units '{source}' -> '{target}' in TM {tm_id}?"))? {
                return Ok(());
            }
            provider.load_tm(tm_id)?;
            let removed = provider.delete_tu(tm_id, &source, &target)?;
            println!("{{\"deleted\": {removed}}}");
        }

        Command::DeleteTm { tm_id, yes } => {
            if !yes && !confirm(&format!("permanently delete TM {tm_id} and all its units?"))? {
                return Ok(());
            }
            provider.delete_tm(tm_id)?;
            println!("{{\"deleted_tm\": {tm_id}}}");
        }

        Command::Sync {
            tm_ids,
            subtractive,
        } => {
            load_tms(&provider, &store, &tm_ids)?;
            let report = if subtractive {
                provider.sync_add_delete()?
            } else {
                provider.sync_add_only()?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Import {
            file,
            name,
            src_lang,
            tgt_lang,
            owner,
        } => {
            let records = read_import_csv(&file, &owner)?;
            if records.is_empty() {
                bail!("{file:?} contains no source,target rows");
            }

            let importer = Importer::start(store.clone(), provider.clone(), config.ingest_queue_size);
            importer.submit(ImportSpec {
                name,
                origin: file.display().to_string(),
                src_lang,
                tgt_lang,
                owner,
                records,
            })?;
            importer.shutdown(ShutdownMode::Drain);

            let status = provider.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Load the requested TMs into the session, or every TM when none given.
fn load_tms(provider: &TmProvider, store: &Arc<dyn TmStore>, tm_ids: &[u64]) -> anyhow::Result<()> {
    let ids: Vec<u64> = if tm_ids.is_empty() {
        let mut all: Vec<u64> = store.get_documents()?.into_keys().collect();
        all.sort_unstable();
        all
    } else {
        tm_ids.to_vec()
    };

    for id in ids {
        if let provider::LoadOutcome::NotFound = provider.load_tm(id)? {
            bail!("no TM with id {id} exists");
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Parse a headerless `source,target` CSV into import records.
fn read_import_csv(path: &PathBuf, owner: &str) -> anyhow::Result<Vec<UnitRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
    let mut records = vec![];
    for record in reader.records() {
        let record = record?;
        let source = record
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("row missing source text"))?;
        let target = record
            .get(1)
            .ok_or_else(|| anyhow::anyhow!("row missing target text"))?;
        if source.trim().is_empty() {
            continue;
        }
        records.push(UnitRecord::bare(source, target, owner));
    }
    Ok(records)
}
