//! Local-first retrieval-augmented generation engine.
//!
//! Documents are chunked along structural boundaries, embedded, and
//! indexed for hybrid retrieval that fuses BM25 lexical scoring with
//! cosine similarity over embeddings. Retrieved candidates pass
//! through multi-signal reranking, optional multi-variant fusion, and
//! lost-in-the-middle context assembly before generation.
//!
//! | module | responsibility |
//! |--------|----------------|
//! | [`models`] | core data types |
//! | [`config`] | TOML-backed tunables with validation |
//! | [`chunker`] | structure-aware document splitting |
//! | [`bm25`] | lexical scoring |
//! | [`embedding`] | vector math and concurrent batch embedding |
//! | [`engine`] | inference engine abstraction |
//! | [`store`] | document / chunk / embedding persistence |
//! | [`retrieve`] | hybrid candidate retrieval |
//! | [`rerank`] | multi-signal rescoring |
//! | [`expand`] | query rewriting and expansion |
//! | [`fusion`] | reciprocal rank fusion across variants |
//! | [`assemble`] | context ordering and budgeting |
//! | [`metrics`] | retrieval quality and faithfulness |
//! | [`ingest`] | document ingestion pipeline |
//! | [`rag`] | end-to-end orchestration |

pub mod assemble;
pub mod bm25;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod expand;
pub mod fusion;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod rag;
pub mod rerank;
pub mod retrieve;
pub mod store;

pub use config::{load_config, RagConfig};
pub use models::{Chunk, Document, DocumentStatus, Embedding, RagResult, RetrievedChunk};
pub use rag::{RagFlowOutcome, RagOptions, RagPipeline};
