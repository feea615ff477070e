use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level tuning configuration for the retrieval engine.
///
/// Every empirically chosen constant in the pipeline (score weights,
/// rerank bonus magnitudes, the faithfulness threshold) lives here with
/// a serde default, so deployments can tune them without code changes.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RagConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub bm25: Bm25Params,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    /// Chunks smaller than this are merged into their predecessor.
    #[serde(default = "default_min_size")]
    pub min_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            min_size: default_min_size(),
        }
    }
}

fn default_target_size() -> usize {
    800
}
fn default_min_size() -> usize {
    80
}

/// BM25 tuning constants.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Bm25Params {
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
        }
    }
}

fn default_k1() -> f64 {
    1.5
}
fn default_b() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight for semantic vs lexical: `hybrid = w*semantic + (1-w)*lexical`.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Candidates below this final score are dropped.
    #[serde(default)]
    pub min_relevance: f64,
    /// Chunks fetched on each side during small-to-big expansion.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            min_relevance: 0.0,
            context_window: default_context_window(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_context_window() -> usize {
    1
}

/// Multiplicative bonus/penalty magnitudes for the reranker.
///
/// These values are heuristics with no stated derivation; treat them as
/// tunable, not as fixed truths.
#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// The n-th chunk from an already-seen document is scaled by `base^n`.
    #[serde(default = "default_diversity_base")]
    pub diversity_base: f64,
    /// Maximum boost for chunks early in their document.
    #[serde(default = "default_position_bonus")]
    pub position_bonus: f64,
    /// Boost for documents uploaded within `recency_days`.
    #[serde(default = "default_recency_bonus")]
    pub recency_bonus: f64,
    #[serde(default = "default_recency_days")]
    pub recency_days: i64,
    /// Maximum boost for query-token overlap with the chunk.
    #[serde(default = "default_term_overlap_bonus")]
    pub term_overlap_bonus: f64,
    /// Boost when the literal query appears verbatim in the chunk.
    #[serde(default = "default_exact_phrase_bonus")]
    pub exact_phrase_bonus: f64,
    /// Boost when any query-token bigram appears in the chunk.
    #[serde(default = "default_bigram_bonus")]
    pub bigram_bonus: f64,
    /// Boost for chunks carrying adjacency or expanded context.
    #[serde(default = "default_context_bonus")]
    pub context_bonus: f64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            diversity_base: default_diversity_base(),
            position_bonus: default_position_bonus(),
            recency_bonus: default_recency_bonus(),
            recency_days: default_recency_days(),
            term_overlap_bonus: default_term_overlap_bonus(),
            exact_phrase_bonus: default_exact_phrase_bonus(),
            bigram_bonus: default_bigram_bonus(),
            context_bonus: default_context_bonus(),
        }
    }
}

fn default_diversity_base() -> f64 {
    0.95
}
fn default_position_bonus() -> f64 {
    0.20
}
fn default_recency_bonus() -> f64 {
    0.10
}
fn default_recency_days() -> i64 {
    7
}
fn default_term_overlap_bonus() -> f64 {
    0.15
}
fn default_exact_phrase_bonus() -> f64 {
    0.20
}
fn default_bigram_bonus() -> f64 {
    0.10
}
fn default_context_bonus() -> f64 {
    0.05
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpansionConfig {
    /// Queries with at least this many words are never rewritten/expanded.
    #[serde(default = "default_trigger_max_words")]
    pub trigger_max_words: usize,
    /// Maximum number of expanded variants to request.
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
    /// Word cap for a rewritten query.
    #[serde(default = "default_rewrite_max_words")]
    pub rewrite_max_words: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            trigger_max_words: default_trigger_max_words(),
            max_variants: default_max_variants(),
            rewrite_max_words: default_rewrite_max_words(),
        }
    }
}

fn default_trigger_max_words() -> usize {
    8
}
fn default_max_variants() -> usize {
    3
}
fn default_rewrite_max_words() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct FusionConfig {
    /// The `k` constant in the RRF formula `1/(k + rank + 1)`.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssemblyConfig {
    /// Safety margin is `min(margin_cap_tokens, margin_ratio * window)`.
    #[serde(default = "default_margin_cap_tokens")]
    pub margin_cap_tokens: usize,
    #[serde(default = "default_margin_ratio")]
    pub margin_ratio: f64,
    /// Output tokens reserved for the generation step.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            margin_cap_tokens: default_margin_cap_tokens(),
            margin_ratio: default_margin_ratio(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_margin_cap_tokens() -> usize {
    600
}
fn default_margin_ratio() -> f64 {
    0.2
}
fn default_max_output_tokens() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// Fraction of a sentence's significant words that must appear in
    /// the context for the sentence to count as grounded.
    #[serde(default = "default_faithfulness_threshold")]
    pub faithfulness_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            faithfulness_threshold: default_faithfulness_threshold(),
        }
    }
}

fn default_faithfulness_threshold() -> f64 {
    0.45
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Concurrency cap for embedding calls during ingestion.
    #[serde(default = "default_max_concurrent_embeddings")]
    pub max_concurrent_embeddings: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embeddings: default_max_concurrent_embeddings(),
        }
    }
}

fn default_max_concurrent_embeddings() -> usize {
    4
}

/// Load and validate a [`RagConfig`] from a TOML file.
pub fn load_config(path: &Path) -> Result<RagConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: RagConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Validate a config, whether loaded from a file or built in code.
pub fn validate(config: &RagConfig) -> Result<()> {
    if config.chunking.target_size == 0 {
        anyhow::bail!("chunking.target_size must be > 0");
    }
    if config.chunking.min_size > config.chunking.target_size {
        anyhow::bail!("chunking.min_size must be <= chunking.target_size");
    }
    if !(0.0..=1.0).contains(&config.retrieval.semantic_weight) {
        anyhow::bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
    }
    if config.bm25.k1 <= 0.0 {
        anyhow::bail!("bm25.k1 must be > 0");
    }
    if !(0.0..=1.0).contains(&config.bm25.b) {
        anyhow::bail!("bm25.b must be in [0.0, 1.0]");
    }
    if !(0.0..1.0).contains(&config.rerank.diversity_base) {
        anyhow::bail!("rerank.diversity_base must be in [0.0, 1.0)");
    }
    if !(0.0..=1.0).contains(&config.metrics.faithfulness_threshold) {
        anyhow::bail!("metrics.faithfulness_threshold must be in [0.0, 1.0]");
    }
    if config.fusion.rrf_k <= 0.0 {
        anyhow::bail!("fusion.rrf_k must be > 0");
    }
    if config.ingest.max_concurrent_embeddings == 0 {
        anyhow::bail!("ingest.max_concurrent_embeddings must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert!((config.retrieval.semantic_weight - 0.7).abs() < 1e-9);
        assert!((config.bm25.k1 - 1.5).abs() < 1e-9);
        assert!((config.bm25.b - 0.75).abs() < 1e-9);
        assert!((config.fusion.rrf_k - 60.0).abs() < 1e-9);
        assert!((config.metrics.faithfulness_threshold - 0.45).abs() < 1e-9);
        assert_eq!(config.ingest.max_concurrent_embeddings, 4);
        assert_eq!(config.retrieval.context_window, 1);
        validate(&config).unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[retrieval]
semantic_weight = 0.85

[rerank]
recency_days = 14
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert!((config.retrieval.semantic_weight - 0.85).abs() < 1e-9);
        assert_eq!(config.rerank.recency_days, 14);
        // Unspecified sections keep their defaults
        assert_eq!(config.chunking.target_size, 800);
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retrieval]\nsemantic_weight = 1.5").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_invalid_diversity_base_rejected() {
        let mut config = RagConfig::default();
        config.rerank.diversity_base = 1.0;
        assert!(validate(&config).is_err());
    }
}
