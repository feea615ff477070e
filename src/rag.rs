//! End-to-end retrieval-augmented generation pipeline.
//!
//! Orchestrates the stages the rest of the crate provides:
//!
//! | stage | module |
//! |-------|--------|
//! | query rewrite / expansion | `expand` |
//! | per-variant hybrid retrieval | `retrieve` |
//! | cross-variant fusion | `fusion` |
//! | rerank, floor, truncate | `rerank` via `retrieve` |
//! | context assembly | `assemble` |
//! | answer generation | `engine` |
//! | quality metrics | `metrics` |
//!
//! Retrieval never fails the whole query because one enrichment stage
//! failed: a broken rewrite keeps the original query, a failed
//! expansion falls back to synonyms, and a failed embedding degrades
//! that variant to lexical-only retrieval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};

use crate::assemble::{assemble_context, compute_context_budget, AssembledContext};
use crate::config::RagConfig;
use crate::engine::{ChatMessage, GenerateOptions, InferenceEngine, TokenCallback};
use crate::expand::{expand_query, rewrite_query};
use crate::fusion::reciprocal_rank_fusion;
use crate::metrics::{
    assess_rag_quality, calculate_faithfulness, calculate_rag_metrics, QualityAssessment,
    RagMetrics,
};
use crate::models::{RagResult, RetrievedChunk};
use crate::retrieve::{HybridRetriever, RetrieveOptions};
use crate::store::Store;

/// Per-query pipeline options.
#[derive(Clone)]
pub struct RagOptions {
    /// Number of chunks to return. Defaults to 5; zero means no results.
    pub top_k: usize,
    pub document_filter: Option<Vec<String>>,
    pub min_relevance: Option<f64>,
    /// Generate query variants and fuse their result lists.
    pub expand_queries: bool,
    /// Rewrite terse queries before retrieval.
    pub rewrite_query: bool,
    /// Cooperative cancellation flag, checked between stages.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            document_filter: None,
            min_relevance: None,
            expand_queries: false,
            rewrite_query: false,
            cancel: None,
        }
    }
}

impl RagOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Everything the full flow produces for one query.
pub struct RagFlowOutcome {
    pub answer: String,
    pub result: RagResult,
    pub metrics: RagMetrics,
    pub quality: QualityAssessment,
    pub faithfulness: f64,
}

pub struct RagPipeline {
    engine: Arc<dyn InferenceEngine>,
    retriever: HybridRetriever,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(store: Arc<dyn Store>, engine: Arc<dyn InferenceEngine>, config: RagConfig) -> Self {
        Self {
            engine,
            retriever: HybridRetriever::new(store, config.clone()),
            config,
        }
    }

    /// Retrieve the chunks most relevant to `query`.
    ///
    /// A blank query or a cancellation between stages yields an empty
    /// result, not an error.
    pub async fn query_with_rag(&self, query: &str, opts: &RagOptions) -> Result<RagResult> {
        let started = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Ok(RagResult::empty(query));
        }

        let effective = if opts.rewrite_query {
            rewrite_query(&self.engine, query, &self.config.expansion).await
        } else {
            query.to_string()
        };
        if opts.cancelled() {
            return Ok(RagResult::empty(query));
        }

        let mut variants = vec![effective.clone()];
        if opts.expand_queries {
            let expansion = expand_query(&self.engine, &effective, &self.config.expansion).await;
            variants.extend(expansion.variants().iter().cloned());
        }
        if opts.cancelled() {
            return Ok(RagResult::empty(query));
        }

        let retrieve_opts = RetrieveOptions {
            top_k: opts.top_k,
            document_filter: opts.document_filter.clone(),
            min_relevance: opts.min_relevance,
            semantic_weight: None,
            context_window: None,
        };

        let (chunks, total) = if variants.len() == 1 {
            let vec = self.embed_variant(&effective).await;
            self.retriever
                .search(&effective, vec.as_deref(), &retrieve_opts)
                .await?
        } else {
            let mut lists: Vec<Vec<RetrievedChunk>> = Vec::with_capacity(variants.len());
            let mut total = 0usize;
            for variant in &variants {
                if opts.cancelled() {
                    return Ok(RagResult::empty(query));
                }
                let vec = self.embed_variant(variant).await;
                let (candidates, variant_total) = self
                    .retriever
                    .hybrid_candidates(variant, vec.as_deref(), &retrieve_opts)
                    .await?;
                total = total.max(variant_total);
                lists.push(candidates);
            }
            let mut fused = reciprocal_rank_fusion(lists, self.config.fusion.rrf_k);
            self.retriever
                .finalize(&mut fused, &effective, &retrieve_opts)
                .await?;
            (fused, total)
        };

        debug!(
            query,
            variants = variants.len(),
            retrieved = chunks.len(),
            total,
            "rag retrieval complete"
        );
        Ok(RagResult {
            query: query.to_string(),
            chunks,
            total_candidates: total,
            search_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Embed one query variant, degrading that variant to lexical-only
    /// retrieval when the engine fails.
    async fn embed_variant(&self, variant: &str) -> Option<Vec<f32>> {
        match self.engine.embed(variant).await {
            Ok(vec) => Some(vec),
            Err(err) => {
                warn!(variant, error = %err, "query embedding failed, lexical-only retrieval");
                None
            }
        }
    }

    fn assemble(&self, result: &RagResult) -> AssembledContext {
        let budget = compute_context_budget(self.engine.context_window(), &self.config.assembly);
        assemble_context(&result.chunks, budget)
    }

    /// Generate an answer grounded in a retrieval result.
    ///
    /// `additional_context` is caller-supplied text (session notes,
    /// selected snippets) appended after the retrieved context.
    pub async fn generate_rag_answer(
        &self,
        query: &str,
        result: &RagResult,
        history: &[ChatMessage],
        on_token: Option<TokenCallback>,
        additional_context: Option<&str>,
    ) -> Result<String> {
        let assembled = self.assemble(result);
        let mut system = if assembled.text.is_empty() {
            "You are a helpful assistant. No relevant documents were found; \
             say so if the question needs them."
                .to_string()
        } else {
            format!(
                "You are a helpful assistant. Answer using only the context below. \
                 If the context does not contain the answer, say so.\n\n\
                 Context:\n{}",
                assembled.text
            )
        };
        if let Some(extra) = additional_context {
            if !extra.trim().is_empty() {
                system.push_str("\n\nAdditional context:\n");
                system.push_str(extra);
            }
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(query));

        let options = GenerateOptions {
            max_tokens: Some(self.config.assembly.max_output_tokens),
            on_token,
            ..Default::default()
        };
        self.engine.generate(&messages, &options).await
    }

    /// Retrieval, generation, and quality assessment in one call.
    /// Metrics and faithfulness are computed over the same assembled
    /// context the answer saw.
    pub async fn complete_rag_flow(
        &self,
        query: &str,
        opts: &RagOptions,
        history: &[ChatMessage],
        on_token: Option<TokenCallback>,
        additional_context: Option<&str>,
    ) -> Result<RagFlowOutcome> {
        let result = self.query_with_rag(query, opts).await?;
        let answer = self
            .generate_rag_answer(query, &result, history, on_token, additional_context)
            .await?;

        let assembled = self.assemble(&result);
        let metrics = calculate_rag_metrics(query, &assembled.chunks, &assembled.text);
        let quality = assess_rag_quality(&metrics);
        let faithfulness = calculate_faithfulness(
            &answer,
            &assembled.text,
            self.config.metrics.faithfulness_threshold,
        );

        Ok(RagFlowOutcome {
            answer,
            result,
            metrics,
            quality,
            faithfulness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::MockEngine;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_blank_query_yields_empty_result() {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        let pipeline = RagPipeline::new(store, engine, RagConfig::default());
        let result = pipeline
            .query_with_rag("   ", &RagOptions::default())
            .await
            .unwrap();
        assert!(result.chunks.is_empty());
        assert_eq!(result.total_candidates, 0);
    }

    #[tokio::test]
    async fn test_default_options_return_results() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let engine: Arc<dyn InferenceEngine> = Arc::new(MockEngine::new());
        let body = "The nightly backup job copies the ledger snapshot to cold storage.";
        let doc = crate::models::Document::new("d1", "ops.md", body);
        store.put_document(&doc).await.unwrap();
        crate::ingest::process_document(
            &store,
            &engine,
            "d1",
            body,
            &RagConfig::default(),
            Arc::new(crate::embedding::NoProgress),
        )
        .await
        .unwrap();

        let pipeline = RagPipeline::new(store, engine, RagConfig::default());
        let result = pipeline
            .query_with_rag("ledger snapshot backup", &RagOptions::default())
            .await
            .unwrap();
        assert!(!result.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_returns_empty() {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        let pipeline = RagPipeline::new(store, engine, RagConfig::default());
        let cancel = Arc::new(AtomicBool::new(true));
        let opts = RagOptions {
            top_k: 5,
            cancel: Some(cancel),
            ..Default::default()
        };
        let result = pipeline.query_with_rag("some query", &opts).await.unwrap();
        assert!(result.chunks.is_empty());
    }
}
