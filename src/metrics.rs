//! Retrieval quality metrics and answer faithfulness.

use serde::Serialize;
use std::collections::HashSet;

use crate::bm25::tokenize;
use crate::chunker::split_sentences;
use crate::models::RetrievedChunk;

/// Aggregate quality signals for one retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct RagMetrics {
    pub avg_relevance: f64,
    pub min_relevance: f64,
    pub max_relevance: f64,
    /// Fraction of significant query terms covered by the context.
    pub term_coverage: f64,
    /// Fraction of distinct source documents among retrieved chunks.
    pub source_diversity: f64,
    pub context_length: usize,
    pub chunk_count: usize,
    pub document_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    pub level: QualityLevel,
    pub score: f64,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

pub fn calculate_rag_metrics(
    query: &str,
    chunks: &[RetrievedChunk],
    context: &str,
) -> RagMetrics {
    if chunks.is_empty() {
        return RagMetrics {
            avg_relevance: 0.0,
            min_relevance: 0.0,
            max_relevance: 0.0,
            term_coverage: 0.0,
            source_diversity: 0.0,
            context_length: context.chars().count(),
            chunk_count: 0,
            document_count: 0,
        };
    }

    let scores: Vec<f64> = chunks.iter().map(|c| c.score).collect();
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    let context_lower = context.to_lowercase();
    let term_coverage = if query_terms.is_empty() {
        1.0
    } else {
        let covered = query_terms
            .iter()
            .filter(|t| context_lower.contains(t.as_str()))
            .count();
        covered as f64 / query_terms.len() as f64
    };

    let documents: HashSet<&str> = chunks
        .iter()
        .map(|c| c.chunk.document_id.as_str())
        .collect();

    RagMetrics {
        avg_relevance: avg,
        min_relevance: min,
        max_relevance: max,
        term_coverage,
        source_diversity: documents.len() as f64 / chunks.len() as f64,
        context_length: context.chars().count(),
        chunk_count: chunks.len(),
        document_count: documents.len(),
    }
}

/// Weighted roll-up of the individual metrics into a coarse verdict,
/// with human-readable warnings for the weak spots.
pub fn assess_rag_quality(metrics: &RagMetrics) -> QualityAssessment {
    let length_score = match metrics.context_length {
        0 => 0.0,
        1..=499 => 0.5,
        500..=8000 => 1.0,
        _ => 0.7,
    };
    let score = 0.4 * metrics.avg_relevance
        + 0.3 * metrics.term_coverage
        + 0.2 * metrics.source_diversity
        + 0.1 * length_score;

    let level = if score >= 0.75 {
        QualityLevel::Excellent
    } else if score >= 0.55 {
        QualityLevel::Good
    } else if score >= 0.35 {
        QualityLevel::Fair
    } else {
        QualityLevel::Poor
    };

    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();
    if metrics.chunk_count == 0 {
        warnings.push("no chunks retrieved".to_string());
        suggestions.push("ingest documents before querying".to_string());
    }
    if metrics.avg_relevance < 0.3 && metrics.chunk_count > 0 {
        warnings.push("low average relevance".to_string());
        suggestions.push("rephrase the query or enable query expansion".to_string());
    }
    if metrics.term_coverage < 0.5 && metrics.chunk_count > 0 {
        warnings.push("context covers under half of the query terms".to_string());
    }
    if metrics.document_count == 1 && metrics.chunk_count > 2 {
        suggestions.push("all chunks come from one document".to_string());
    }

    QualityAssessment {
        level,
        score,
        warnings,
        suggestions,
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "this", "that", "with", "from", "they", "will",
    "would", "there", "their", "what", "about", "which", "when", "were", "been", "also",
    "into", "than", "then", "its", "such", "may", "these", "those", "some", "more",
];

/// Estimate how grounded an answer is in the provided context.
///
/// Each answer sentence is checked for lexical overlap: a sentence is
/// grounded when at least `threshold` of its significant words appear
/// in the context. The score is the grounded fraction of sentences.
///
/// This is a lexical proxy, not an entailment check; paraphrased but
/// faithful answers score lower than verbatim ones. An empty answer
/// makes no claims and scores 1.0.
pub fn calculate_faithfulness(answer: &str, context: &str, threshold: f64) -> f64 {
    let sentences: Vec<&str> = split_sentences(answer)
        .into_iter()
        .filter(|s| s.trim().chars().count() > 15)
        .collect();
    if sentences.is_empty() {
        return 1.0;
    }

    let context_lower = context.to_lowercase();
    let grounded = sentences
        .iter()
        .filter(|sentence| {
            let significant: Vec<String> = tokenize(sentence)
                .into_iter()
                .filter(|w| !STOP_WORDS.contains(&w.as_str()))
                .collect();
            if significant.is_empty() {
                return true;
            }
            let present = significant
                .iter()
                .filter(|w| context_lower.contains(w.as_str()))
                .count();
            present as f64 / significant.len() as f64 >= threshold
        })
        .count();

    grounded as f64 / sentences.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, StructuralType};
    use chrono::Utc;

    fn candidate(doc_id: &str, content: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: doc_id.to_string(),
                chunk_index: 0,
                content: content.to_string(),
                token_count: content.len() / 4,
                hash: String::new(),
                metadata: ChunkMetadata {
                    start_offset: 0,
                    end_offset: content.len(),
                    structural_type: StructuralType::Paragraph,
                    prev_context: None,
                    next_context: None,
                    expanded_context: None,
                },
            },
            document_name: format!("{}.md", doc_id),
            document_uploaded_at: Utc::now(),
            score,
            original_score: None,
        }
    }

    #[test]
    fn test_metrics_aggregate_scores() {
        let chunks = vec![
            candidate("d1", "retrieval pipelines fuse scores", 0.9),
            candidate("d2", "chunking splits documents", 0.5),
        ];
        let context = "retrieval pipelines fuse scores\n\nchunking splits documents";
        let metrics = calculate_rag_metrics("retrieval pipelines", &chunks, context);
        assert!((metrics.avg_relevance - 0.7).abs() < 1e-9);
        assert_eq!(metrics.min_relevance, 0.5);
        assert_eq!(metrics.max_relevance, 0.9);
        assert_eq!(metrics.term_coverage, 1.0);
        assert_eq!(metrics.source_diversity, 1.0);
        assert_eq!(metrics.document_count, 2);
    }

    #[test]
    fn test_metrics_empty_retrieval() {
        let metrics = calculate_rag_metrics("anything", &[], "");
        assert_eq!(metrics.chunk_count, 0);
        assert_eq!(metrics.avg_relevance, 0.0);
        let assessment = assess_rag_quality(&metrics);
        assert_eq!(assessment.level, QualityLevel::Poor);
        assert!(!assessment.warnings.is_empty());
    }

    #[test]
    fn test_quality_excellent_for_strong_retrieval() {
        let metrics = RagMetrics {
            avg_relevance: 0.9,
            min_relevance: 0.8,
            max_relevance: 1.0,
            term_coverage: 1.0,
            source_diversity: 0.8,
            context_length: 2000,
            chunk_count: 5,
            document_count: 4,
        };
        assert_eq!(assess_rag_quality(&metrics).level, QualityLevel::Excellent);
    }

    #[test]
    fn test_faithfulness_verbatim_answer() {
        let context = "The error budget policy freezes deploys when the budget is exhausted. \
             Teams resume releases after a postmortem.";
        let answer = "The error budget policy freezes deploys when the budget is exhausted.";
        assert_eq!(calculate_faithfulness(answer, context, 0.45), 1.0);
    }

    #[test]
    fn test_faithfulness_unrelated_answer() {
        let context = "The error budget policy freezes deploys when exhausted.";
        let answer = "Giraffes migrate across the savanna seeking acacia foliage every winter.";
        assert_eq!(calculate_faithfulness(answer, context, 0.45), 0.0);
    }

    #[test]
    fn test_faithfulness_empty_answer() {
        assert_eq!(calculate_faithfulness("", "some context", 0.45), 1.0);
        assert_eq!(calculate_faithfulness("Ok.", "some context", 0.45), 1.0);
    }

    #[test]
    fn test_faithfulness_mixed_answer() {
        let context = "Chunk boundaries follow paragraph breaks and sentence boundaries.";
        let answer = "Chunk boundaries follow paragraph breaks in every document. \
             Meanwhile giraffes migrate across the frozen savanna tonight.";
        let score = calculate_faithfulness(answer, context, 0.45);
        assert!(score > 0.0 && score < 1.0);
    }
}
