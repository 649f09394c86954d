//! Case-aware Levenshtein similarity scoring.
//!
//! The ratio is computed from two distance passes: one over the strings as
//! given and one over their lowercase-folded forms. The difference between
//! the two passes is the number of case-only edits, which is re-weighted by
//! `case_cost` before the ratio is derived. A `case_cost` below 1.0 warps
//! results in favor of candidates differing only by letter case.
//!
//! All distances and lengths are measured in Unicode scalar values (`char`).
//! Folding uses full Unicode lowercasing (`str::to_lowercase`).

/// A search query preprocessed for repeated comparisons.
///
/// Trimming and case folding the query happens once here instead of once per
/// index key inside the scoring fan-out.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    exact: Vec<char>,
    folded: Vec<char>,
}

impl PreparedQuery {
    pub fn new(query: &str) -> Self {
        let trimmed = query.trim();
        Self {
            exact: trimmed.chars().collect(),
            folded: trimmed.to_lowercase().chars().collect(),
        }
    }

    /// True when the query trims down to nothing.
    pub fn is_blank(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Score `candidate` against a prepared query.
///
/// Returns `Some(ratio)` in `[min_score, 1.0]`, or `None` when the candidate
/// falls below `min_score`. An absent match is a normal filtered-out result,
/// not an error.
///
/// Two empty strings score 1.0; exactly one empty string scores 0.0.
/// Negative `case_cost` is clamped to 0.0.
pub fn score(query: &PreparedQuery, candidate: &str, min_score: f64, case_cost: f64) -> Option<f64> {
    let ratio = lev_ratio(query, candidate, case_cost);
    if ratio >= min_score {
        Some(ratio)
    } else {
        None
    }
}

/// Compute the case-aware similarity ratio without the threshold cut-off.
pub fn lev_ratio(query: &PreparedQuery, candidate: &str, case_cost: f64) -> f64 {
    let case_cost = case_cost.max(0.0);

    let trimmed = candidate.trim();
    let cand_exact: Vec<char> = trimmed.chars().collect();

    let total_len = (query.exact.len() + cand_exact.len()) as f64;
    if total_len == 0.0 {
        // Both strings empty: identical.
        return 1.0;
    }
    if query.exact.is_empty() || cand_exact.is_empty() {
        return 0.0;
    }

    let cand_folded: Vec<char> = trimmed.to_lowercase().chars().collect();

    let d_exact = distance(&query.exact, &cand_exact) as f64;
    let d_fold = distance(&query.folded, &cand_folded) as f64;

    let effective = d_fold + (d_exact - d_fold) * case_cost;
    (total_len - effective) / total_len
}

/// Levenshtein distance (unit-cost insert/delete/substitute) over chars.
///
/// Two-row DP; O(len(a) * len(b)) time, O(len(b)) space.
fn distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
