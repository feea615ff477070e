//! Per-query BM25 lexical index.
//!
//! The index is built over a closed set of `(id, content)` pairs — the
//! chunks already shortlisted for a query — and discarded afterwards.
//! Nothing is persisted; this trades index-maintenance complexity for a
//! rebuild cost proportional to the candidate set, which stays small.

use std::collections::HashMap;

use crate::config::Bm25Params;

/// Tokenize into lowercase Unicode letter/number runs, dropping tokens
/// of two characters or fewer.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

struct IndexedDoc {
    id: String,
    term_freq: HashMap<String, usize>,
    len: usize,
}

/// BM25 scorer over a fixed document (chunk) set.
pub struct Bm25Index {
    docs: Vec<IndexedDoc>,
    /// Per-term document frequency across the indexed set.
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f64,
    params: Bm25Params,
}

impl Bm25Index {
    /// Build an index over `(id, content)` pairs.
    pub fn new(entries: &[(String, String)], params: Bm25Params) -> Self {
        let mut docs = Vec::with_capacity(entries.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for (id, content) in entries {
            let tokens = tokenize(content);
            let len = tokens.len();
            total_len += len;

            let mut term_freq: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *term_freq.entry(token).or_insert(0) += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }

            docs.push(IndexedDoc {
                id: id.clone(),
                term_freq,
                len,
            });
        }

        let avg_doc_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };

        Self {
            docs,
            doc_freq,
            avg_doc_len,
            params,
        }
    }

    /// Score the query against every indexed document.
    ///
    /// Returns `(id, score)` pairs sorted descending, zero-score
    /// documents excluded. An empty query yields an empty result.
    pub fn score(&self, query: &str) -> Vec<(String, f64)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let n = self.docs.len() as f64;
        let Bm25Params { k1, b } = self.params;

        let mut results: Vec<(String, f64)> = Vec::new();
        for doc in &self.docs {
            let mut score = 0.0;
            for token in &query_tokens {
                let tf = *doc.term_freq.get(token).unwrap_or(&0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let df = *self.doc_freq.get(token).unwrap_or(&0) as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let len_norm = 1.0 - b + b * doc.len as f64 / self.avg_doc_len.max(1e-9);
                score += idf * (tf * (k1 + 1.0)) / (tf + k1 * len_norm);
            }
            if score > 0.0 {
                results.push((doc.id.clone(), score));
            }
        }

        // Stable sort keeps indexed order for equal scores.
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}
