//! Context assembly for generation.
//!
//! Orders retrieved chunks to fight the lost-in-the-middle effect
//! (strongest evidence at the edges of the prompt) and trims whole
//! chunks from the middle until the rendered context fits the budget
//! derived from the engine's context window.

use crate::chunker::CHARS_PER_TOKEN;
use crate::config::AssemblyConfig;
use crate::models::RetrievedChunk;

/// Rendered context plus the chunks that survived the budget, in
/// prompt order.
#[derive(Debug)]
pub struct AssembledContext {
    pub text: String,
    pub chunks: Vec<RetrievedChunk>,
}

/// Character budget for retrieved context given the engine's context
/// window. Reserves room for the model's answer plus a safety margin
/// for the prompt scaffolding and conversation history.
pub fn compute_context_budget(context_window: usize, cfg: &AssemblyConfig) -> usize {
    let margin = cfg
        .margin_cap_tokens
        .min((cfg.margin_ratio * context_window as f64) as usize);
    context_window
        .saturating_sub(cfg.max_output_tokens)
        .saturating_sub(margin)
        * CHARS_PER_TOKEN
}

/// Interleave ranked chunks so the best land at the start and end of
/// the prompt: even ranks in order from the front, odd ranks reversed
/// at the back.
fn lost_in_the_middle_order(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut front = Vec::with_capacity(chunks.len());
    let mut back = Vec::new();
    for (rank, chunk) in chunks.into_iter().enumerate() {
        if rank % 2 == 0 {
            front.push(chunk);
        } else {
            back.push(chunk);
        }
    }
    back.reverse();
    front.extend(back);
    front
}

fn render_chunk(position: usize, chunk: &RetrievedChunk) -> String {
    let body = chunk
        .chunk
        .metadata
        .expanded_context
        .as_deref()
        .unwrap_or(&chunk.chunk.content);
    format!(
        "[Document {}: {} ({:.0}%)]\n{}",
        position,
        chunk.document_name,
        chunk.score.clamp(0.0, 1.0) * 100.0,
        body
    )
}

fn render(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| render_chunk(i + 1, c))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Assemble ranked chunks into a single context string within
/// `budget_chars`. Chunks are reordered edge-first, then whole chunks
/// are dropped from the middle of the prompt until the rendering fits.
/// At least one chunk is always kept.
pub fn assemble_context(chunks: &[RetrievedChunk], budget_chars: usize) -> AssembledContext {
    if chunks.is_empty() {
        return AssembledContext {
            text: String::new(),
            chunks: Vec::new(),
        };
    }

    let mut ordered = lost_in_the_middle_order(chunks.to_vec());
    let mut text = render(&ordered);
    while text.chars().count() > budget_chars && ordered.len() > 1 {
        ordered.remove(ordered.len() / 2);
        text = render(&ordered);
    }

    AssembledContext {
        text,
        chunks: ordered,
    }
}
