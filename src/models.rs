//! Core data models used throughout the retrieval engine.
//!
//! These types represent the documents, chunks, and embeddings that flow
//! through the ingestion pipeline, plus the ephemeral query-scoped results
//! produced by retrieval. Documents, chunks, and embeddings persist until
//! deletion; [`RetrievedChunk`] and [`RagResult`] live for one query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded but not yet processed.
    Pending,
    /// Chunking/embedding in progress.
    Processing,
    /// Fully chunked and embedded; queryable.
    Ready,
    /// Ingestion failed; see [`Document::error`].
    Error,
}

/// An uploaded document owned by the ingestion flow.
///
/// Deleting a document cascades to its chunks and embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub body: String,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub status: DocumentStatus,
    /// Captured ingestion error message when `status == Error`.
    pub error: Option<String>,
}

impl Document {
    /// Create a pending document from raw text.
    pub fn new(id: impl Into<String>, name: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            id: id.into(),
            name: name.into(),
            size_bytes: body.len(),
            body,
            uploaded_at: Utc::now(),
            status: DocumentStatus::Pending,
            error: None,
        }
    }
}

/// Dominant structure of a chunk's content, assigned by the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuralType {
    Paragraph,
    List,
    Heading,
    Mixed,
    Code,
}

/// Positional and adjacency metadata attached to each chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Character offset of the chunk's start in the source text.
    pub start_offset: usize,
    /// Character offset one past the chunk's end.
    pub end_offset: usize,
    pub structural_type: StructuralType,
    /// Last sentence of the previous chunk (absent on the first chunk).
    pub prev_context: Option<String>,
    /// First sentence of the next chunk (absent on the last chunk).
    pub next_context: Option<String>,
    /// Neighboring-chunk content attached during small-to-big expansion.
    /// Populated only for shortlisted retrieval candidates.
    pub expanded_context: Option<String>,
}

/// A contiguous span of a document's text: the atomic retrieval unit.
///
/// Chunk indices are contiguous `0..N-1` per document; content is
/// immutable once created. Re-chunking replaces all chunks atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    /// Rough token estimate (chars / 4).
    pub token_count: usize,
    /// SHA-256 of the content, for embedding staleness detection.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A fixed-dimension embedding vector for one chunk.
///
/// The document id is denormalized for filtering. Vector dimensionality
/// is constant within one embedding-model generation; the store rejects
/// mixed dimensions by construction.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub chunk_id: String,
    pub document_id: String,
    pub vector: Vec<f32>,
    /// Identifier of the model that produced the vector.
    pub model: String,
}

/// A query-scoped retrieval candidate. Never persisted.
///
/// The `score` is recomputed at each pipeline stage (hybrid, boosted,
/// reranked, fused); `original_score` preserves the pre-rerank value
/// for diagnostics.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub document_name: String,
    pub document_uploaded_at: DateTime<Utc>,
    pub score: f64,
    pub original_score: Option<f64>,
}

/// The final outcome of one retrieval query.
#[derive(Debug, Clone)]
pub struct RagResult {
    pub query: String,
    /// Final ordered chunks, length `<= top_k`, descending by score.
    pub chunks: Vec<RetrievedChunk>,
    /// Number of candidates considered before truncation.
    pub total_candidates: usize,
    /// Wall-clock search time in milliseconds.
    pub search_time_ms: u64,
}

impl RagResult {
    /// An empty result for a query that matched nothing (not an error).
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            chunks: Vec::new(),
            total_candidates: 0,
            search_time_ms: 0,
        }
    }
}
