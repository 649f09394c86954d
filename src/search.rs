//! Parallel fuzzy search over the translation index.
//!
//! A query fans out across the index's key snapshot on a shared rayon pool,
//! each worker scoring one key against the prepared query. Keys at or above
//! the threshold expand to one result row per unit stored under them, so a
//! single key can yield several rows (possibly from different documents) at
//! the same score. Rows sort by score descending with a stable sort: equal
//! scores keep index-insertion order. No early termination — scores are not
//! monotonically discoverable, so the full snapshot is always scanned before
//! ranking.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::TmError;
use crate::index::TranslationIndex;
use crate::score::{self, PreparedQuery};

pub const DEFAULT_THRESHOLD: f64 = 0.75;
pub const DEFAULT_CASE_COST: f64 = 0.2;

/// Search request. `max_results` of 0 means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,

    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub max_results: usize,

    #[serde(default = "default_case_cost")]
    pub case_cost: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_case_cost() -> f64 {
    DEFAULT_CASE_COST
}

impl SearchParams {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            threshold: DEFAULT_THRESHOLD,
            max_results: 0,
            case_cost: DEFAULT_CASE_COST,
        }
    }

    /// Reject malformed parameters before any index access. A threshold
    /// above 1.0 is allowed (it just matches nothing); negative or NaN
    /// values are not.
    pub fn validate(&self) -> Result<(), TmError> {
        if self.threshold.is_nan() || self.threshold < 0.0 {
            return Err(TmError::InvalidInput(format!(
                "threshold must be a number in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.case_cost.is_nan() {
            return Err(TmError::InvalidInput("case_cost must be a number".to_string()));
        }
        Ok(())
    }
}

/// One ranked match row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub source_text: String,
    pub target_text: String,
    pub match_score: f64,
    pub doc_id: u64,
    pub created_by: String,
    pub created_date: DateTime<Utc>,
    pub changed_by: String,
    pub changed_date: DateTime<Utc>,
    pub last_used_date: DateTime<Utc>,
}

/// Score every index key against the query on `pool`, expand survivors to
/// per-unit rows, rank and truncate.
///
/// The caller holds the index read lock for the duration, so the snapshot is
/// consistent and no mutation can interleave. Blank queries return an empty
/// list without scoring anything.
pub fn run(
    index: &TranslationIndex,
    pool: &rayon::ThreadPool,
    params: &SearchParams,
) -> Vec<Match> {
    let prepared = PreparedQuery::new(&params.query);
    if prepared.is_blank() {
        return vec![];
    }

    let keys = index.keys();
    let threshold = params.threshold;
    let case_cost = params.case_cost;

    // Workers share nothing mutable; aggregation happens after all of them
    // finish. par_iter preserves key order in the collected output, which
    // the stable tie ordering below depends on.
    let scored: Vec<(String, f64)> = pool.install(|| {
        keys.into_par_iter()
            .filter_map(|key| {
                score::score(&prepared, &key, threshold, case_cost).map(|ratio| (key, ratio))
            })
            .collect()
    });

    let mut rows: Vec<Match> = Vec::with_capacity(scored.len());
    for (key, ratio) in scored {
        let Some(units) = index.units_for(&key) else {
            continue;
        };
        for unit in units {
            rows.push(Match {
                source_text: key.clone(),
                target_text: unit.target_text.clone(),
                match_score: ratio,
                doc_id: unit.doc_id,
                created_by: unit.created_by.clone(),
                created_date: unit.created_at,
                changed_by: unit.changed_by.clone(),
                changed_date: unit.changed_at,
                last_used_date: unit.last_used_at,
            });
        }
    }

    // Stable: equal scores keep snapshot/expansion order.
    rows.sort_by(|a, b| {
        b.match_score
            .partial_cmp(&a.match_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if params.max_results > 0 {
        rows.truncate(params.max_results);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tm::{TranslationDocument, TranslationUnit};

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn doc(id: u64) -> TranslationDocument {
        let now = Utc::now();
        TranslationDocument {
            id,
            name: format!("doc-{id}"),
            origin: "test".to_string(),
            src_lang: "en".to_string(),
            tgt_lang: "es".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn unit(id: u64, doc_id: u64, source: &str, target: &str) -> TranslationUnit {
        let now = Utc::now();
        TranslationUnit {
            id,
            doc_id,
            source_text: source.to_string(),
            target_text: target.to_string(),
            created_by: "alice".to_string(),
            created_at: now,
            changed_by: "alice".to_string(),
            changed_at: now,
            last_used_at: now,
        }
    }

    fn cat_index() -> TranslationIndex {
        let mut index = TranslationIndex::new();
        index.merge(doc(1), vec![unit(1, 1, "cat", "gato")]);
        index
    }

    #[test]
    fn test_cat_bat_scenario() {
        // distance(cat, bat) = 1, lengths sum 6 -> ratio 5/6.
        let index = cat_index();
        let mut params = SearchParams::new("bat");
        params.threshold = 0.5;

        let rows = run(&index, &pool(), &params);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_text, "cat");
        assert_eq!(rows[0].target_text, "gato");
        assert!((rows[0].match_score - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_case_only_difference_passes_high_threshold() {
        let index = cat_index();
        let mut params = SearchParams::new("CAT");
        params.threshold = 0.9;

        let rows = run(&index, &pool(), &params);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].match_score >= 0.9);
    }

    #[test]
    fn test_blank_query_returns_empty() {
        let index = cat_index();
        for query in ["", "   ", "\t\n"] {
            let mut params = SearchParams::new(query);
            params.threshold = 0.0;
            assert!(run(&index, &pool(), &params).is_empty());
        }
    }

    #[test]
    fn test_no_row_below_threshold() {
        let mut index = TranslationIndex::new();
        index.merge(
            doc(1),
            vec![
                unit(1, 1, "the cat sat", "el gato se sentó"),
                unit(2, 1, "cat", "gato"),
                unit(3, 1, "unrelated sentence entirely", "x"),
            ],
        );
        let mut params = SearchParams::new("cat");
        params.threshold = 0.6;

        let rows = run(&index, &pool(), &params);
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.match_score >= 0.6));
    }

    #[test]
    fn test_sorted_descending_and_truncated() {
        let mut index = TranslationIndex::new();
        index.merge(
            doc(1),
            vec![
                unit(1, 1, "cats", "gatos"),
                unit(2, 1, "cat", "gato"),
                unit(3, 1, "cart", "carro"),
                unit(4, 1, "scatter", "dispersar"),
            ],
        );
        let mut params = SearchParams::new("cat");
        params.threshold = 0.0;

        let all = run(&index, &pool(), &params);
        assert!(all.windows(2).all(|w| w[0].match_score >= w[1].match_score));
        assert_eq!(all[0].source_text, "cat");

        params.max_results = 2;
        let top = run(&index, &pool(), &params);
        assert_eq!(top.len(), 2);
        // Top-k of the full ordering.
        assert_eq!(top[0].source_text, all[0].source_text);
        assert_eq!(top[1].source_text, all[1].source_text);
    }

    #[test]
    fn test_zero_max_results_is_unbounded() {
        let mut index = TranslationIndex::new();
        let units = (0..20)
            .map(|i| unit(i, 1, &format!("cat {i}"), "gato"))
            .collect();
        index.merge(doc(1), units);

        let mut params = SearchParams::new("cat 1");
        params.threshold = 0.0;
        params.max_results = 0;
        assert_eq!(run(&index, &pool(), &params).len(), 20);
    }

    #[test]
    fn test_equal_scores_keep_insertion_order() {
        let mut index = TranslationIndex::new();
        // Same source text twice (allow-multiple) plus a second document
        // sharing the key: all three rows score identically.
        index.merge(
            doc(1),
            vec![unit(1, 1, "hello", "hola"), unit(2, 1, "hello", "buenas")],
        );
        index.merge(doc(2), vec![unit(3, 2, "hello", "salut")]);

        let mut params = SearchParams::new("hello");
        params.threshold = 0.5;
        let rows = run(&index, &pool(), &params);
        assert_eq!(rows.len(), 3);
        let targets: Vec<&str> = rows.iter().map(|r| r.target_text.as_str()).collect();
        assert_eq!(targets, vec!["hola", "buenas", "salut"]);
    }

    #[test]
    fn test_threshold_above_one_matches_nothing() {
        let index = cat_index();
        let mut params = SearchParams::new("cat");
        params.threshold = 1.5;
        assert!(run(&index, &pool(), &params).is_empty());
    }

    #[test]
    fn test_all_filtered_out_is_empty_not_error() {
        let index = cat_index();
        let mut params = SearchParams::new("zzzzzzzzzz");
        params.threshold = 0.9;
        assert!(run(&index, &pool(), &params).is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let mut params = SearchParams::new("cat");
        params.threshold = -0.1;
        assert!(matches!(params.validate(), Err(TmError::InvalidInput(_))));

        let mut params = SearchParams::new("cat");
        params.threshold = f64::NAN;
        assert!(params.validate().is_err());

        let mut params = SearchParams::new("cat");
        params.case_cost = f64::NAN;
        assert!(params.validate().is_err());

        assert!(SearchParams::new("cat").validate().is_ok());
    }
}
