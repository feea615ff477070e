//! Reciprocal rank fusion across query-variant result lists.

use std::collections::HashMap;

use crate::models::RetrievedChunk;

/// Fuse several ranked candidate lists into one by reciprocal rank.
///
/// Each appearance of a chunk contributes `1 / (k + rank + 1)` with
/// ranks zero-based, so agreement across variants compounds while a
/// single list's absolute scores never dominate. The first-seen
/// instance of each chunk is kept (its metadata and original score
/// intact) and its score replaced by the fused sum.
pub fn reciprocal_rank_fusion(lists: Vec<Vec<RetrievedChunk>>, k: f64) -> Vec<RetrievedChunk> {
    let mut fused_scores: HashMap<String, f64> = HashMap::new();
    let mut first_seen: HashMap<String, RetrievedChunk> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for list in lists {
        for (rank, candidate) in list.into_iter().enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            let id = candidate.chunk.id.clone();
            *fused_scores.entry(id.clone()).or_insert(0.0) += contribution;
            if !first_seen.contains_key(&id) {
                order.push(id.clone());
                first_seen.insert(id, candidate);
            }
        }
    }

    let mut fused: Vec<RetrievedChunk> = order
        .into_iter()
        .filter_map(|id| {
            let mut candidate = first_seen.remove(&id)?;
            candidate.score = fused_scores.get(&id).copied().unwrap_or(0.0);
            Some(candidate)
        })
        .collect();

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, StructuralType};
    use chrono::Utc;

    fn candidate(id: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: id.to_string(),
                document_id: "d1".to_string(),
                chunk_index: 0,
                content: format!("content {}", id),
                token_count: 3,
                hash: String::new(),
                metadata: ChunkMetadata {
                    start_offset: 0,
                    end_offset: 0,
                    structural_type: StructuralType::Paragraph,
                    prev_context: None,
                    next_context: None,
                    expanded_context: None,
                },
            },
            document_name: "d1.md".to_string(),
            document_uploaded_at: Utc::now(),
            score,
            original_score: None,
        }
    }

    #[test]
    fn test_single_list_preserves_order() {
        let list = vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.1)];
        let fused = reciprocal_rank_fusion(vec![list], 60.0);
        let ids: Vec<&str> = fused.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fusing_identical_lists_is_rank_stable() {
        let make = || vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.1)];
        let fused = reciprocal_rank_fusion(vec![make(), make(), make()], 60.0);
        let ids: Vec<&str> = fused.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        // Three identical appearances triple the single-list score.
        assert!((fused[0].score - 3.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_agreement_across_variants_wins() {
        // "b" is second in both lists; "a" and "c" each top one list.
        let list1 = vec![candidate("a", 0.9), candidate("b", 0.8)];
        let list2 = vec![candidate("c", 0.9), candidate("b", 0.8)];
        let fused = reciprocal_rank_fusion(vec![list1, list2], 1.0);
        assert_eq!(fused[0].chunk.id, "b");
    }

    #[test]
    fn test_absolute_scores_do_not_leak() {
        let list1 = vec![candidate("a", 1000.0)];
        let list2 = vec![candidate("b", 0.001)];
        let fused = reciprocal_rank_fusion(vec![list1, list2], 60.0);
        assert!((fused[0].score - fused[1].score).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(reciprocal_rank_fusion(Vec::new(), 60.0).is_empty());
    }
}
