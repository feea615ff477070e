//! Document ingestion: chunk, embed, persist.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::chunker::{chunk_document, DocumentType};
use crate::config::RagConfig;
use crate::embedding::{embed_batch, ProgressReporter};
use crate::engine::InferenceEngine;
use crate::models::{Chunk, DocumentStatus, Embedding};
use crate::store::Store;

/// Chunk a document body and atomically replace its stored chunks.
pub async fn chunk_and_store(
    store: &Arc<dyn Store>,
    document_id: &str,
    text: &str,
    config: &RagConfig,
) -> Result<Vec<Chunk>> {
    let chunks = chunk_document(document_id, text, &config.chunking, DocumentType::Auto);
    store
        .replace_chunks(document_id, &chunks)
        .await
        .context("replacing document chunks")?;
    Ok(chunks)
}

/// Run the full ingestion pipeline for one document.
///
/// Status moves Pending -> Processing -> Ready; any failure lands the
/// document in Error with a message, and no partially-embedded state
/// is reported as Ready.
pub async fn process_document(
    store: &Arc<dyn Store>,
    engine: &Arc<dyn InferenceEngine>,
    document_id: &str,
    text: &str,
    config: &RagConfig,
    progress: Arc<dyn ProgressReporter>,
) -> Result<()> {
    store
        .set_document_status(document_id, DocumentStatus::Processing, None)
        .await?;

    match ingest_inner(store, engine, document_id, text, config, progress).await {
        Ok(chunk_count) => {
            store
                .set_document_status(document_id, DocumentStatus::Ready, None)
                .await?;
            info!(document_id, chunk_count, "document ingested");
            Ok(())
        }
        Err(err) => {
            warn!(document_id, error = %err, "ingestion failed");
            store
                .set_document_status(document_id, DocumentStatus::Error, Some(&err.to_string()))
                .await?;
            Err(err)
        }
    }
}

async fn ingest_inner(
    store: &Arc<dyn Store>,
    engine: &Arc<dyn InferenceEngine>,
    document_id: &str,
    text: &str,
    config: &RagConfig,
    progress: Arc<dyn ProgressReporter>,
) -> Result<usize> {
    let chunks = chunk_document(document_id, text, &config.chunking, DocumentType::Auto);
    if chunks.is_empty() {
        anyhow::bail!("document produced no chunks");
    }

    // Content hashes unchanged and fully embedded means re-ingestion
    // is a no-op.
    if is_fresh(store, document_id, &chunks).await? {
        debug!(document_id, "document unchanged, skipping re-embedding");
        return Ok(chunks.len());
    }

    store
        .replace_chunks(document_id, &chunks)
        .await
        .context("replacing document chunks")?;

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embed_batch(
        engine.clone(),
        texts,
        config.ingest.max_concurrent_embeddings,
        progress,
    )
    .await
    .context("embedding document chunks")?;

    let model = engine.model_name().to_string();
    for (chunk, vector) in chunks.iter().zip(vectors) {
        store
            .put_embedding(&Embedding {
                chunk_id: chunk.id.clone(),
                document_id: document_id.to_string(),
                vector,
                model: model.clone(),
            })
            .await?;
    }
    Ok(chunks.len())
}

/// True when the stored chunk hashes match the new chunking exactly
/// and every chunk already has an embedding.
async fn is_fresh(store: &Arc<dyn Store>, document_id: &str, chunks: &[Chunk]) -> Result<bool> {
    let existing = store.get_document_chunks(document_id).await?;
    if existing.len() != chunks.len() {
        return Ok(false);
    }
    let same_hashes = existing
        .iter()
        .zip(chunks)
        .all(|(old, new)| old.hash == new.hash);
    if !same_hashes {
        return Ok(false);
    }
    let filter = [document_id.to_string()];
    let embeddings = store.get_all_embeddings(Some(&filter)).await?;
    Ok(embeddings.len() == chunks.len())
}
