//! Multi-signal candidate reranker.
//!
//! Rescales hybrid scores with multiplicative signals: document
//! diversity, in-document position, upload recency, query-term overlap,
//! phrase proximity, and context availability. A pure, deterministic
//! function of its inputs; the pre-rerank score is preserved on each
//! candidate as `original_score` for diagnostics.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::bm25::tokenize;
use crate::config::RerankConfig;
use crate::models::RetrievedChunk;

/// Rerank candidates in place and re-sort them descending by the
/// adjusted score.
///
/// `candidates` must arrive sorted descending by their current score
/// (the diversity penalty counts prior same-document occurrences in
/// that order). `doc_chunk_counts` maps document id to its total chunk
/// count for the position signal; `now` anchors the recency signal so
/// callers control the clock.
pub fn rerank(
    candidates: &mut Vec<RetrievedChunk>,
    query: &str,
    cfg: &RerankConfig,
    doc_chunk_counts: &HashMap<String, usize>,
    now: DateTime<Utc>,
) {
    let query_lower = query.trim().to_lowercase();
    let query_tokens: Vec<String> = {
        let mut seen = HashSet::new();
        tokenize(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect()
    };
    let bigrams: Vec<String> = query_tokens
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect();

    let mut seen_docs: HashMap<String, u32> = HashMap::new();

    for candidate in candidates.iter_mut() {
        if candidate.original_score.is_none() {
            candidate.original_score = Some(candidate.score);
        }
        let mut score = candidate.score;

        // Diversity: the n-th chunk from an already-seen document is
        // scaled by base^n, so one document cannot fill every slot.
        let occurrence = seen_docs
            .entry(candidate.chunk.document_id.clone())
            .or_insert(0);
        if *occurrence > 0 {
            score *= cfg.diversity_base.powi(*occurrence as i32);
        }
        *occurrence += 1;

        // Position: leading content (definitions, abstracts) is
        // disproportionately salient.
        let total = doc_chunk_counts
            .get(&candidate.chunk.document_id)
            .copied()
            .unwrap_or(0)
            .max(1);
        let position_factor = 1.0 - candidate.chunk.chunk_index as f64 / total as f64;
        score *= 1.0 + cfg.position_bonus * position_factor;

        // Recency: flat bonus inside the freshness window.
        if now - candidate.document_uploaded_at <= Duration::days(cfg.recency_days) {
            score *= 1.0 + cfg.recency_bonus;
        }

        let content_lower = candidate.chunk.content.to_lowercase();
        let haystack = candidate
            .chunk
            .metadata
            .expanded_context
            .as_ref()
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| content_lower.clone());

        // Term overlap: fraction of significant query tokens present.
        if !query_tokens.is_empty() {
            let hits = query_tokens
                .iter()
                .filter(|t| content_lower.contains(t.as_str()))
                .count();
            let fraction = hits as f64 / query_tokens.len() as f64;
            score *= 1.0 + cfg.term_overlap_bonus * fraction;
        }

        // Phrase proximity: verbatim query beats any single bigram.
        if !query_lower.is_empty() && haystack.contains(&query_lower) {
            score *= 1.0 + cfg.exact_phrase_bonus;
        } else if bigrams.iter().any(|b| haystack.contains(b.as_str())) {
            score *= 1.0 + cfg.bigram_bonus;
        }

        // Context quality: adjacency or expanded context available.
        let meta = &candidate.chunk.metadata;
        if meta.expanded_context.is_some()
            || meta.prev_context.is_some()
            || meta.next_context.is_some()
        {
            score *= 1.0 + cfg.context_bonus;
        }

        candidate.score = score;
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}
