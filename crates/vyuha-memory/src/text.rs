// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared text primitives: tokenization, hashing, set similarity, and a
//! small BM25 index used by the lexical ranker.

use std::collections::{HashMap, HashSet};

/// Lowercased alphanumeric tokens; everything else is a separator.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            for c in ch.to_lowercase() {
                current.push(c);
            }
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// 64-bit FNV-1a over a byte string.  Stable across platforms and runs —
/// used as the persisted procedure-index key.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Jaccard overlap of two token sets.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// In-memory BM25 index with the standard Okapi parameters.
pub struct Bm25Index {
    k1: f64,
    b: f64,
    docs: Vec<(String, Vec<String>)>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    pub fn new(docs: Vec<(String, String)>) -> Self {
        let docs: Vec<(String, Vec<String>)> = docs
            .into_iter()
            .map(|(id, text)| (id, tokenize(&text)))
            .collect();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for (_, tokens) in &docs {
            let unique: HashSet<&String> = tokens.iter().collect();
            for t in unique {
                *doc_freq.entry(t.clone()).or_default() += 1;
            }
        }
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            docs.iter().map(|(_, t)| t.len()).sum::<usize>() as f64 / docs.len() as f64
        };
        Self {
            k1: 1.2,
            b: 0.75,
            docs,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Documents with a positive score for `query`, best first.  Ties are
    /// broken by document id so ranking is fully deterministic.
    pub fn rank(&self, query: &str) -> Vec<(String, f64)> {
        let terms = tokenize(query);
        let n = self.docs.len() as f64;
        let mut scored: Vec<(String, f64)> = Vec::new();

        for (id, tokens) in &self.docs {
            let len = tokens.len() as f64;
            let mut score = 0.0;
            for term in &terms {
                let df = match self.doc_freq.get(term) {
                    Some(&df) => df as f64,
                    None => continue,
                };
                let tf = tokens.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let denom = tf + self.k1 * (1.0 - self.b + self.b * len / self.avg_len.max(1.0));
                score += idf * tf * (self.k1 + 1.0) / denom;
            }
            if score > 0.0 {
                scored.push((id.clone(), score));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── tokenize ──────────────────────────────────────────────────────────────

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(
            tokenize("Fix the Bug, then re-run tests!"),
            vec!["fix", "the", "bug", "then", "re", "run", "tests"]
        );
    }

    #[test]
    fn tokenize_keeps_underscores() {
        assert_eq!(tokenize("read_file(a)"), vec!["read_file", "a"]);
    }

    #[test]
    fn tokenize_empty_input_is_empty() {
        assert!(tokenize("  ...  ").is_empty());
    }

    // ── fnv1a64 ───────────────────────────────────────────────────────────────

    #[test]
    fn fnv1a_matches_reference_vector() {
        // Known FNV-1a 64 test vector.
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn fnv1a_is_stable_for_step_sequences() {
        let h1 = fnv1a64("read\u{1f}edit".as_bytes());
        let h2 = fnv1a64("read\u{1f}edit".as_bytes());
        assert_eq!(h1, h2);
        assert_ne!(h1, fnv1a64("edit\u{1f}read".as_bytes()));
    }

    // ── jaccard ───────────────────────────────────────────────────────────────

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["a", "b"])), 1.0);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        assert_eq!(jaccard(&set(&["a"]), &set(&["b"])), 0.0);
    }

    #[test]
    fn jaccard_partial_overlap() {
        let j = jaccard(&set(&["a", "b", "c"]), &set(&["b", "c", "d"]));
        assert!((j - 0.5).abs() < 1e-9);
    }

    #[test]
    fn jaccard_empty_sets_is_zero() {
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
    }

    // ── BM25 ──────────────────────────────────────────────────────────────────

    fn index() -> Bm25Index {
        Bm25Index::new(vec![
            ("d1".into(), "the quick brown fox".into()),
            ("d2".into(), "the lazy dog sleeps".into()),
            ("d3".into(), "quick quick quick fox".into()),
        ])
    }

    #[test]
    fn rank_finds_matching_documents() {
        let hits = index().rank("quick fox");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "d3", "higher term frequency ranks first");
    }

    #[test]
    fn rank_omits_non_matching_documents() {
        let hits = index().rank("dog");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "d2");
    }

    #[test]
    fn rank_unknown_terms_yield_empty() {
        assert!(index().rank("zebra").is_empty());
    }

    #[test]
    fn rank_is_deterministic() {
        let a = index().rank("quick fox");
        let b = index().rank("quick fox");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_index_ranks_nothing() {
        let idx = Bm25Index::new(vec![]);
        assert!(idx.rank("anything").is_empty());
    }
}
