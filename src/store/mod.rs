//! Storage abstraction for the retrieval engine.
//!
//! The [`Store`] trait defines every storage operation the ingestion and
//! retrieval pipelines need, enabling pluggable backends. The persistence
//! schema is the backend's concern; this crate ships an [`memory::InMemoryStore`]
//! used by tests and embedders without a database.
//!
//! Retrieval only reads; writes happen during ingestion. The relevance
//! boost table is written by an external feedback collaborator and is
//! read-only to this crate.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{Chunk, Document, DocumentStatus, Embedding};

/// Abstract storage backend.
///
/// All operations are async (via `async-trait`); in-memory
/// implementations return immediately-ready futures. Implementations
/// must be `Send + Sync`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a document.
    async fn put_document(&self, doc: &Document) -> Result<()>;

    /// Retrieve a document by id.
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Update a document's ingestion status and error message.
    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Delete a document, cascading to its chunks and embeddings.
    async fn delete_document(&self, id: &str) -> Result<()>;

    /// Atomically replace all chunks for a document.
    ///
    /// Drops any embeddings belonging to the replaced chunks so a
    /// partially re-ingested document can never serve stale vectors.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Retrieve a chunk by id.
    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Retrieve several chunks by id, skipping unknown ids.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// All chunks for a document, ordered by `chunk_index`.
    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Retrieve the chunks within `window` positions of `chunk_index`
    /// in document order, including the anchor chunk itself.
    async fn get_surrounding_chunks(
        &self,
        document_id: &str,
        chunk_index: usize,
        window: usize,
    ) -> Result<Vec<Chunk>>;

    /// Number of chunks stored for one document.
    async fn chunk_count(&self, document_id: &str) -> Result<usize>;

    /// Store an embedding vector for a chunk.
    async fn put_embedding(&self, embedding: &Embedding) -> Result<()>;

    /// Retrieve all embeddings, optionally restricted to a document
    /// id allow-list.
    async fn get_all_embeddings(&self, document_filter: Option<&[String]>)
        -> Result<Vec<Embedding>>;

    /// Learned multiplicative relevance boosts for the given chunk ids.
    /// Missing ids mean "no boost" (factor 1.0).
    async fn get_chunk_boosts(&self, chunk_ids: &[String]) -> Result<HashMap<String, f64>>;
}
