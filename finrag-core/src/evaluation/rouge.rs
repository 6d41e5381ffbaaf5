//! ROUGE-1/2/L F-measures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ScoringError;

/// F-measures of one candidate/reference comparison, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RougeScores {
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
}

/// Text-overlap scorer. Implementations may fail; callers degrade to zeros.
pub trait RougeScorer: Send + Sync {
    fn score(&self, candidate: &str, reference: &str) -> Result<RougeScores, ScoringError>;
}

/// Word n-gram ROUGE-1/2 and LCS-based ROUGE-L over lowercase alphanumeric
/// tokens.
#[derive(Debug, Clone, Default)]
pub struct NgramRougeScorer;

impl RougeScorer for NgramRougeScorer {
    fn score(&self, candidate: &str, reference: &str) -> Result<RougeScores, ScoringError> {
        let cand = tokenize(candidate);
        let refr = tokenize(reference);
        Ok(RougeScores {
            rouge1: ngram_fmeasure(&cand, &refr, 1),
            rouge2: ngram_fmeasure(&cand, &refr, 2),
            rouge_l: lcs_fmeasure(&cand, &refr),
        })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn ngrams(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

fn fmeasure(overlap: usize, candidate_total: usize, reference_total: usize) -> f64 {
    if candidate_total == 0 || reference_total == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / candidate_total as f64;
    let recall = overlap as f64 / reference_total as f64;
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn ngram_fmeasure(candidate: &[String], reference: &[String], n: usize) -> f64 {
    let cand = ngrams(candidate, n);
    let refr = ngrams(reference, n);
    let overlap: usize = cand
        .iter()
        .map(|(gram, count)| (*count).min(refr.get(gram).copied().unwrap_or(0)))
        .sum();
    fmeasure(
        overlap,
        cand.values().sum(),
        refr.values().sum(),
    )
}

fn lcs_fmeasure(candidate: &[String], reference: &[String]) -> f64 {
    fmeasure(lcs_len(candidate, reference), candidate.len(), reference.len())
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
