//! In-memory [`Store`] implementation.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread
//! safety. Chunks are kept per document in index order, so neighbor
//! lookups for small-to-big expansion are slice operations.
//!
//! The first stored embedding fixes the model id and dimensionality for
//! the store generation; later vectors that disagree are rejected.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentStatus, Embedding};

use super::Store;

/// In-memory store for tests and embedders without a database.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    /// Chunks per document, sorted by `chunk_index`.
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    embeddings: RwLock<Vec<Embedding>>,
    /// `(model, dims)` of the current embedding generation.
    generation: RwLock<Option<(String, usize)>>,
    boosts: RwLock<HashMap<String, f64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(Vec::new()),
            generation: RwLock::new(None),
            boosts: RwLock::new(HashMap::new()),
        }
    }

    /// Record a learned relevance boost for a chunk. This is the write
    /// path of the external feedback collaborator; the retrieval core
    /// only reads boosts.
    pub fn set_chunk_boost(&self, chunk_id: impl Into<String>, factor: f64) {
        self.boosts.write().unwrap().insert(chunk_id.into(), factor);
    }

    pub fn document_count(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    pub fn total_chunk_count(&self) -> usize {
        self.chunks.read().unwrap().values().map(|v| v.len()).sum()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_document(&self, doc: &Document) -> Result<()> {
        self.docs.write().unwrap().insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().unwrap().get(id).cloned())
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        match docs.get_mut(id) {
            Some(doc) => {
                doc.status = status;
                doc.error = error.map(|e| e.to_string());
                Ok(())
            }
            None => bail!("unknown document: {}", id),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.docs.write().unwrap().remove(id);
        self.chunks.write().unwrap().remove(id);
        self.embeddings
            .write()
            .unwrap()
            .retain(|e| e.document_id != id);
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut sorted: Vec<Chunk> = chunks.to_vec();
        sorted.sort_by_key(|c| c.chunk_index);
        for (i, c) in sorted.iter().enumerate() {
            if c.chunk_index != i {
                bail!(
                    "chunk indices for document {} must be contiguous from 0",
                    document_id
                );
            }
        }

        let mut chunk_map = self.chunks.write().unwrap();
        let mut embeddings = self.embeddings.write().unwrap();
        embeddings.retain(|e| e.document_id != document_id);
        chunk_map.insert(document_id.to_string(), sorted);
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let chunks = self.chunks.read().unwrap();
        Ok(chunks
            .values()
            .flat_map(|v| v.iter())
            .find(|c| c.id == id)
            .cloned())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().unwrap();
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = chunks.values().flat_map(|v| v.iter()).find(|c| &c.id == id) {
                found.push(chunk.clone());
            }
        }
        Ok(found)
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .chunks
            .read()
            .unwrap()
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_surrounding_chunks(
        &self,
        document_id: &str,
        chunk_index: usize,
        window: usize,
    ) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().unwrap();
        let doc_chunks = match chunks.get(document_id) {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let start = chunk_index.saturating_sub(window);
        let end = (chunk_index + window + 1).min(doc_chunks.len());
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(doc_chunks[start..end].to_vec())
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize> {
        Ok(self
            .chunks
            .read()
            .unwrap()
            .get(document_id)
            .map(|v| v.len())
            .unwrap_or(0))
    }

    async fn put_embedding(&self, embedding: &Embedding) -> Result<()> {
        let mut generation = self.generation.write().unwrap();
        match generation.as_ref() {
            Some((model, dims)) => {
                if model != &embedding.model {
                    bail!(
                        "embedding model mismatch: store generation is '{}', got '{}'",
                        model,
                        embedding.model
                    );
                }
                if *dims != embedding.vector.len() {
                    bail!(
                        "embedding dimensionality mismatch: expected {}, got {}",
                        dims,
                        embedding.vector.len()
                    );
                }
            }
            None => {
                *generation = Some((embedding.model.clone(), embedding.vector.len()));
            }
        }

        let mut embeddings = self.embeddings.write().unwrap();
        embeddings.retain(|e| e.chunk_id != embedding.chunk_id);
        embeddings.push(embedding.clone());
        Ok(())
    }

    async fn get_all_embeddings(
        &self,
        document_filter: Option<&[String]>,
    ) -> Result<Vec<Embedding>> {
        let embeddings = self.embeddings.read().unwrap();
        Ok(match document_filter {
            Some(ids) => embeddings
                .iter()
                .filter(|e| ids.iter().any(|id| id == &e.document_id))
                .cloned()
                .collect(),
            None => embeddings.clone(),
        })
    }

    async fn get_chunk_boosts(&self, chunk_ids: &[String]) -> Result<HashMap<String, f64>> {
        let boosts = self.boosts.read().unwrap();
        Ok(chunk_ids
            .iter()
            .filter_map(|id| boosts.get(id).map(|f| (id.clone(), *f)))
            .collect())
    }
}
