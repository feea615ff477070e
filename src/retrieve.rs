//! Hybrid lexical + semantic retrieval.
//!
//! Two layers: `hybrid_candidates` produces an oversampled, boosted,
//! context-expanded candidate pool; `search` reranks that pool and
//! applies the relevance floor and final truncation. The pipeline
//! orchestrator calls the candidate layer directly when fusing results
//! across query variants.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use crate::bm25::Bm25Index;
use crate::config::RagConfig;
use crate::embedding::{cosine_similarity, normalize_max};
use crate::models::RetrievedChunk;
use crate::rerank::rerank;
use crate::store::Store;

/// Per-query knobs layered over the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: usize,
    /// Restrict retrieval to these document ids.
    pub document_filter: Option<Vec<String>>,
    pub min_relevance: Option<f64>,
    pub semantic_weight: Option<f64>,
    /// Neighbor radius for small-to-big expansion.
    pub context_window: Option<usize>,
}

pub struct HybridRetriever {
    store: Arc<dyn Store>,
    config: RagConfig,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn Store>, config: RagConfig) -> Self {
        Self { store, config }
    }

    /// Score every embedded chunk and return an oversampled candidate
    /// pool, sorted descending, plus the total candidate count before
    /// truncation.
    ///
    /// Without a query vector retrieval degrades to lexical-only
    /// scoring over the same candidate set.
    pub async fn hybrid_candidates(
        &self,
        query_text: &str,
        query_vec: Option<&[f32]>,
        opts: &RetrieveOptions,
    ) -> Result<(Vec<RetrievedChunk>, usize)> {
        let filter = opts.document_filter.as_deref();
        let embeddings = self.store.get_all_embeddings(filter).await?;
        if embeddings.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let total = embeddings.len();

        let chunk_ids: Vec<String> = embeddings.iter().map(|e| e.chunk_id.clone()).collect();
        let chunks = self.store.get_chunks(&chunk_ids).await?;
        let chunks_by_id: HashMap<&str, &crate::models::Chunk> =
            chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        // Semantic channel, normalized against the best observed score.
        let semantic: HashMap<&str, f64> = match query_vec {
            Some(vec) => {
                let raw: Vec<f64> = embeddings
                    .iter()
                    .map(|e| cosine_similarity(vec, &e.vector).max(0.0) as f64)
                    .collect();
                let normalized = normalize_max(&raw);
                embeddings
                    .iter()
                    .zip(normalized)
                    .map(|(e, s)| (e.chunk_id.as_str(), s))
                    .collect()
            }
            None => HashMap::new(),
        };

        // Lexical channel over the same closed candidate set.
        let corpus: Vec<(String, String)> = embeddings
            .iter()
            .filter_map(|e| {
                chunks_by_id
                    .get(e.chunk_id.as_str())
                    .map(|c| (c.id.clone(), c.content.clone()))
            })
            .collect();
        let index = Bm25Index::new(&corpus, self.config.bm25.clone());
        let lexical_raw = index.score(query_text);
        let lexical_scores: Vec<f64> =
            normalize_max(&lexical_raw.iter().map(|(_, s)| *s).collect::<Vec<f64>>());
        let lexical: HashMap<&str, f64> = lexical_raw
            .iter()
            .map(|(id, _)| id.as_str())
            .zip(lexical_scores)
            .collect();

        let weight = if query_vec.is_some() {
            opts.semantic_weight
                .unwrap_or(self.config.retrieval.semantic_weight)
        } else {
            0.0
        };

        let mut documents: HashMap<String, (String, chrono::DateTime<Utc>)> = HashMap::new();
        let mut candidates: Vec<RetrievedChunk> = Vec::new();
        for embedding in &embeddings {
            let Some(chunk) = chunks_by_id.get(embedding.chunk_id.as_str()) else {
                continue;
            };
            if !documents.contains_key(&chunk.document_id) {
                match self.store.get_document(&chunk.document_id).await? {
                    Some(doc) => {
                        documents.insert(chunk.document_id.clone(), (doc.name, doc.uploaded_at));
                    }
                    None => continue,
                }
            }
            let Some((name, uploaded_at)) = documents.get(&chunk.document_id) else {
                continue;
            };

            let sem = semantic.get(chunk.id.as_str()).copied().unwrap_or(0.0);
            let lex = lexical.get(chunk.id.as_str()).copied().unwrap_or(0.0);
            let score = weight * sem + (1.0 - weight) * lex;
            candidates.push(RetrievedChunk {
                chunk: (*chunk).clone(),
                document_name: name.clone(),
                document_uploaded_at: *uploaded_at,
                score,
                original_score: None,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let oversample = (opts.top_k * 3).max(15);
        candidates.truncate(oversample);

        self.expand_context(&mut candidates, opts).await?;
        self.apply_boosts(&mut candidates).await?;

        debug!(
            query = query_text,
            total,
            kept = candidates.len(),
            semantic = query_vec.is_some(),
            "hybrid candidate pool built"
        );
        Ok((candidates, total))
    }

    /// Small-to-big expansion: stitch each candidate's neighbors into
    /// `expanded_context` so generation sees more than the matched
    /// span.
    async fn expand_context(
        &self,
        candidates: &mut [RetrievedChunk],
        opts: &RetrieveOptions,
    ) -> Result<()> {
        let window = opts
            .context_window
            .unwrap_or(self.config.retrieval.context_window);
        if window == 0 {
            return Ok(());
        }
        for candidate in candidates.iter_mut() {
            let neighbors = self
                .store
                .get_surrounding_chunks(
                    &candidate.chunk.document_id,
                    candidate.chunk.chunk_index,
                    window,
                )
                .await?;
            if neighbors.len() > 1 {
                let expanded = neighbors
                    .iter()
                    .map(|c| c.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                candidate.chunk.metadata.expanded_context = Some(expanded);
            }
        }
        Ok(())
    }

    /// Apply learned per-chunk boosts; re-sort only if any factor is
    /// not 1.0.
    async fn apply_boosts(&self, candidates: &mut Vec<RetrievedChunk>) -> Result<()> {
        let ids: Vec<String> = candidates.iter().map(|c| c.chunk.id.clone()).collect();
        let boosts = self.store.get_chunk_boosts(&ids).await?;
        let mut changed = false;
        for candidate in candidates.iter_mut() {
            if let Some(factor) = boosts.get(&candidate.chunk.id) {
                if (*factor - 1.0).abs() > f64::EPSILON {
                    candidate.score *= factor;
                    changed = true;
                }
            }
        }
        if changed {
            candidates.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        Ok(())
    }

    /// Full single-query search: candidates, rerank, relevance floor,
    /// final truncation.
    pub async fn search(
        &self,
        query_text: &str,
        query_vec: Option<&[f32]>,
        opts: &RetrieveOptions,
    ) -> Result<(Vec<RetrievedChunk>, usize)> {
        let (mut candidates, total) = self.hybrid_candidates(query_text, query_vec, opts).await?;
        self.finalize(&mut candidates, query_text, opts).await?;
        Ok((candidates, total))
    }

    /// Rerank an already-built candidate pool and cut it down to the
    /// requested size. Used by `search` and by variant fusion.
    pub async fn finalize(
        &self,
        candidates: &mut Vec<RetrievedChunk>,
        query_text: &str,
        opts: &RetrieveOptions,
    ) -> Result<()> {
        let mut doc_chunk_counts: HashMap<String, usize> = HashMap::new();
        for candidate in candidates.iter() {
            if !doc_chunk_counts.contains_key(&candidate.chunk.document_id) {
                let count = self.store.chunk_count(&candidate.chunk.document_id).await?;
                doc_chunk_counts.insert(candidate.chunk.document_id.clone(), count);
            }
        }

        rerank(
            candidates,
            query_text,
            &self.config.rerank,
            &doc_chunk_counts,
            Utc::now(),
        );

        let floor = opts
            .min_relevance
            .unwrap_or(self.config.retrieval.min_relevance);
        if floor > 0.0 {
            candidates.retain(|c| c.score >= floor);
        }
        candidates.truncate(opts.top_k);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::engine::test_support::MockEngine;
    use crate::models::{Chunk, ChunkMetadata, Document, Embedding, StructuralType};
    use crate::store::memory::InMemoryStore;

    fn chunk(id: &str, doc_id: &str, index: usize, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            chunk_index: index,
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
        }
    }

    async fn seed(store: &InMemoryStore, engine: &MockEngine, doc_id: &str, contents: &[&str]) {
        let doc = Document::new(doc_id, format!("{}.md", doc_id), contents.concat());
        store.put_document(&doc).await.unwrap();
        let chunks: Vec<Chunk> = contents
            .iter()
            .enumerate()
            .map(|(i, c)| chunk(&format!("{}-c{}", doc_id, i), doc_id, i, c))
            .collect();
        store.replace_chunks(doc_id, &chunks).await.unwrap();
        for c in &chunks {
            store
                .put_embedding(&Embedding {
                    chunk_id: c.id.clone(),
                    document_id: doc_id.to_string(),
                    vector: engine.embed_sync(&c.content),
                    model: "mock-bag-of-words".to_string(),
                })
                .await
                .unwrap();
        }
    }

    fn retriever(store: Arc<InMemoryStore>) -> HybridRetriever {
        HybridRetriever::new(store, RagConfig::default())
    }

    #[tokio::test]
    async fn test_lexical_only_without_query_vector() {
        let store = Arc::new(InMemoryStore::new());
        let engine = MockEngine::new();
        seed(
            &store,
            &engine,
            "d1",
            &[
                "kubernetes schedules pods onto nodes",
                "postgres stores relational tables",
            ],
        )
        .await;
        let retriever = retriever(store);
        let opts = RetrieveOptions {
            top_k: 2,
            ..Default::default()
        };
        let (results, total) = retriever
            .search("postgres relational", None, &opts)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(results[0].chunk.content.contains("postgres"));
    }

    #[tokio::test]
    async fn test_hybrid_prefers_matching_chunk() {
        let store = Arc::new(InMemoryStore::new());
        let engine = MockEngine::new();
        seed(
            &store,
            &engine,
            "d1",
            &[
                "the cache eviction policy favors recently used entries",
                "unrelated musings about garden soil and compost",
            ],
        )
        .await;
        let retriever = retriever(store);
        let opts = RetrieveOptions {
            top_k: 1,
            ..Default::default()
        };
        let query = "cache eviction policy";
        let vec = engine.embed_sync(query);
        let (results, _) = retriever.search(query, Some(&vec), &opts).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk.content.contains("cache eviction"));
        assert!(results[0].original_score.is_some());
    }

    #[tokio::test]
    async fn test_document_filter_restricts_pool() {
        let store = Arc::new(InMemoryStore::new());
        let engine = MockEngine::new();
        seed(&store, &engine, "d1", &["shared topic text alpha"]).await;
        seed(&store, &engine, "d2", &["shared topic text beta"]).await;
        let retriever = retriever(store);
        let opts = RetrieveOptions {
            top_k: 5,
            document_filter: Some(vec!["d2".to_string()]),
            ..Default::default()
        };
        let (results, total) = retriever
            .search("shared topic", None, &opts)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert!(results.iter().all(|r| r.chunk.document_id == "d2"));
    }

    #[tokio::test]
    async fn test_context_expansion_stitches_neighbors() {
        let store = Arc::new(InMemoryStore::new());
        let engine = MockEngine::new();
        seed(
            &store,
            &engine,
            "d1",
            &["intro paragraph", "target passage here", "closing paragraph"],
        )
        .await;
        let retriever = retriever(store);
        let opts = RetrieveOptions {
            top_k: 1,
            context_window: Some(1),
            ..Default::default()
        };
        let (results, _) = retriever
            .search("target passage", None, &opts)
            .await
            .unwrap();
        let expanded = results[0]
            .chunk
            .metadata
            .expanded_context
            .as_ref()
            .unwrap();
        assert!(expanded.contains("intro paragraph"));
        assert!(expanded.contains("closing paragraph"));
    }

    #[tokio::test]
    async fn test_boost_reorders_candidates() {
        let store = Arc::new(InMemoryStore::new());
        let engine = MockEngine::new();
        seed(
            &store,
            &engine,
            "d1",
            &["topic words appear here twice topic", "topic words appear here once"],
        )
        .await;
        store.set_chunk_boost("d1-c1", 50.0);
        let retriever = retriever(store);
        let opts = RetrieveOptions {
            top_k: 2,
            ..Default::default()
        };
        let (results, _) = retriever.search("topic words", None, &opts).await.unwrap();
        assert_eq!(results[0].chunk.id, "d1-c1");
    }

    #[tokio::test]
    async fn test_min_relevance_floor() {
        let store = Arc::new(InMemoryStore::new());
        let engine = MockEngine::new();
        seed(&store, &engine, "d1", &["completely unrelated words"]).await;
        let retriever = retriever(store);
        let opts = RetrieveOptions {
            top_k: 5,
            min_relevance: Some(0.5),
            ..Default::default()
        };
        let (results, _) = retriever
            .search("quantum chromodynamics", None, &opts)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = Arc::new(InMemoryStore::new());
        let retriever = retriever(store);
        let opts = RetrieveOptions {
            top_k: 5,
            ..Default::default()
        };
        let (results, total) = retriever.search("anything", None, &opts).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(total, 0);
    }
}
