//! Embedding vector utilities and batched embedding.
//!
//! Provides [`cosine_similarity`] for the semantic channel, score
//! normalization shared with the lexical channel, and [`embed_batch`]
//! which drives an [`InferenceEngine`](crate::engine::InferenceEngine)
//! with a configurable concurrency cap and progress reporting.
//!
//! Normalization divides by the maximum observed score in the batch so
//! both channels land in `[0, 1]` and a zero raw score stays zero,
//! keeping lexical and semantic scales comparable before fusion.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::engine::InferenceEngine;

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors,
/// mismatched lengths, or a zero-magnitude input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Normalize scores to `[0, 1]` against the maximum observed score.
///
/// All-zero (or negative-max) batches normalize to all zeros.
pub fn normalize_max(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() || max <= 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| (s / max).clamp(0.0, 1.0)).collect()
}

/// Receives embedding progress as `(percent, status message)`.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

/// No-op reporter when progress is not wanted.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _percent: u8, _message: &str) {}
}

/// Embed a batch of texts with at most `max_concurrent` in-flight calls.
///
/// Results are returned in input order. The cap protects the inference
/// engine from saturation during bulk ingestion; any single failure
/// aborts the batch.
pub async fn embed_batch(
    engine: Arc<dyn InferenceEngine>,
    texts: Vec<String>,
    max_concurrent: usize,
    progress: Arc<dyn ProgressReporter>,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let total = texts.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut join_set = JoinSet::new();

    for (index, text) in texts.into_iter().enumerate() {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            let vector = engine.embed(&text).await?;
            anyhow::Ok((index, vector))
        });
    }

    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; total];
    let mut done = 0usize;

    while let Some(joined) = join_set.join_next().await {
        let (index, vector) = joined??;
        vectors[index] = Some(vector);
        done += 1;
        let percent = (done * 100 / total) as u8;
        progress.report(percent, &format!("embedding {}/{}", done, total));
    }

    debug!(total, "embedding batch complete");

    vectors
        .into_iter()
        .map(|v| v.ok_or_else(|| anyhow::anyhow!("missing embedding in batch")))
        .collect()
}
