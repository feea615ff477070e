//! Overlap-aware paragraph chunker with document-type profiles.
//!
//! Splits document text on blank-line paragraph boundaries, accumulating
//! paragraphs into chunks up to a target size and carrying the last
//! paragraph forward as overlap. Paragraphs longer than 1.5x the target
//! are split at sentence boundaries with the same one-sentence carry.
//! After chunking, every chunk (except the first/last) is annotated with
//! the last/first sentence of its neighbors for adjacency context.
//!
//! Each chunk receives a v4 UUID and a SHA-256 hash of its content for
//! embedding staleness detection.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, StructuralType};

/// Approximate chars-per-token ratio for token-count estimates.
pub(crate) const CHARS_PER_TOKEN: usize = 4;

/// Document-type hint guiding chunk-size selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Code,
    Technical,
    Article,
    Web,
    General,
    /// Classify by content heuristics.
    Auto,
}

/// Per-type chunking profile, scaled from the configured sizes.
///
/// Code gets the largest target to avoid splitting functions; web pages
/// get the smallest, reflecting dense content. `General` uses the
/// configured sizes unchanged. With the default 800-char target this
/// yields 1200/1000/900/600.
fn profile_for(doc_type: DocumentType, cfg: &ChunkingConfig) -> (usize, usize) {
    let scale = |num: usize, den: usize| {
        (
            (cfg.target_size * num / den).max(1),
            (cfg.min_size * num / den).max(1),
        )
    };
    match doc_type {
        DocumentType::Code => scale(3, 2),
        DocumentType::Technical => scale(5, 4),
        DocumentType::Article => scale(9, 8),
        DocumentType::Web => scale(3, 4),
        DocumentType::General | DocumentType::Auto => (cfg.target_size, cfg.min_size),
    }
}

fn code_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*(fn |pub fn |def |class |import |from .+ import|#include|function |const |let |var |impl |struct |enum )|[{};]\s*$",
        )
        .unwrap()
    })
}

fn heading_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s+\S").unwrap())
}

const TECHNICAL_TERMS: &[&str] = &[
    "api",
    "algorithm",
    "config",
    "configuration",
    "database",
    "endpoint",
    "latency",
    "parameter",
    "protocol",
    "schema",
    "server",
    "throughput",
];

/// Classify a document by regex/keyword heuristics.
pub fn classify_document(text: &str) -> DocumentType {
    if code_pattern().find_iter(text).count() >= 3 {
        return DocumentType::Code;
    }

    let lower = text.to_lowercase();
    let technical_hits = TECHNICAL_TERMS
        .iter()
        .filter(|term| lower.contains(*term))
        .count();
    if technical_hits >= 3 {
        return DocumentType::Technical;
    }

    let paragraph_count = text.split("\n\n").filter(|p| !p.trim().is_empty()).count();
    if heading_pattern().is_match(text) || paragraph_count >= 3 {
        return DocumentType::Article;
    }

    DocumentType::General
}

/// A paragraph with its byte offsets in the source text.
#[derive(Debug, Clone)]
struct Paragraph {
    text: String,
    start: usize,
    end: usize,
}

fn split_paragraphs(text: &str) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut pos = 0usize;
    for part in text.split("\n\n") {
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            let leading = part.len() - part.trim_start().len();
            let start = pos + leading;
            paragraphs.push(Paragraph {
                text: trimmed.to_string(),
                start,
                end: start + trimmed.len(),
            });
        }
        pos += part.len() + 2;
    }
    paragraphs
}

/// Split text into sentences on `.`/`!`/`?` followed by whitespace.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if matches!(c, '.' | '!' | '?') {
            let next = bytes.get(i + 1).map(|b| *b as char);
            if next.is_none() || next.map(|n| n.is_whitespace()).unwrap_or(false) {
                let sentence = text[start..=i].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = i + 1;
            }
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Dominant structure of one chunk's content.
fn classify_structure(content: &str) -> StructuralType {
    if code_pattern().find_iter(content).count() >= 2 {
        return StructuralType::Code;
    }

    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() == 1 && heading_pattern().is_match(content) {
        return StructuralType::Heading;
    }

    let list_lines = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("- ")
                || t.starts_with("* ")
                || t.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
                    && t.contains(". ")
        })
        .count();
    if !lines.is_empty() && list_lines * 2 > lines.len() {
        return StructuralType::List;
    }

    if content.contains("\n\n") {
        StructuralType::Mixed
    } else {
        StructuralType::Paragraph
    }
}

struct PendingChunk {
    content: String,
    start: usize,
    end: usize,
    /// Text of the last paragraph, for carry-forward overlap.
    last_paragraph: Paragraph,
}

/// Split a document's text into ordered, overlap-aware chunks.
///
/// Indices are contiguous `0..N-1`. Concatenating chunk contents minus
/// the carried overlap paragraphs/sentences reproduces the original
/// paragraph sequence. Never fails for non-empty input: when no
/// paragraph boundaries exist the chunker degrades to fixed-size
/// character splitting.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    cfg: &ChunkingConfig,
    hint: DocumentType,
) -> Vec<Chunk> {
    let doc_type = if hint == DocumentType::Auto {
        classify_document(text)
    } else {
        hint
    };
    let (target, min_size) = profile_for(doc_type, cfg);

    // Whitespace-only input yields no chunks; any other input reaches
    // either the paragraph loop or the fixed-size split below.
    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut pending: Vec<PendingChunk> = Vec::new();
    let mut current: Vec<Paragraph> = Vec::new();
    let mut current_len = 0usize;

    let flush = |current: &mut Vec<Paragraph>, pending: &mut Vec<PendingChunk>| {
        if current.is_empty() {
            return;
        }
        let content = current
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        pending.push(PendingChunk {
            start: current[0].start,
            end: current[current.len() - 1].end,
            last_paragraph: current[current.len() - 1].clone(),
            content,
        });
        current.clear();
    };

    for para in paragraphs {
        // Oversized paragraphs are split at sentence boundaries.
        if para.text.len() > target + target / 2 {
            flush(&mut current, &mut pending);
            current_len = 0;
            split_oversized_paragraph(&para, target, &mut pending);
            continue;
        }

        let would_be = if current.is_empty() {
            para.text.len()
        } else {
            current_len + 2 + para.text.len()
        };

        if would_be > target && !current.is_empty() {
            flush(&mut current, &mut pending);
            // Carry the last paragraph forward as one-paragraph overlap,
            // unless it would immediately overflow the new chunk.
            let carry = pending[pending.len() - 1].last_paragraph.clone();
            if carry.text.len() + 2 + para.text.len() <= target {
                current_len = carry.text.len() + 2 + para.text.len();
                current.push(carry);
            } else {
                current_len = para.text.len();
            }
            current.push(para);
        } else {
            current_len = would_be;
            current.push(para);
        }
    }
    flush(&mut current, &mut pending);

    // Merge an undersized tail into its predecessor.
    if pending.len() >= 2 && pending[pending.len() - 1].content.len() < min_size {
        let tail = pending.pop().unwrap();
        let prev = pending.last_mut().unwrap();
        prev.content.push_str("\n\n");
        prev.content.push_str(&tail.content);
        prev.end = tail.end;
        prev.last_paragraph = tail.last_paragraph;
    }

    finalize(document_id, pending)
}

/// Sentence-split a paragraph longer than 1.5x the target, carrying the
/// last sentence of each piece forward as overlap.
fn split_oversized_paragraph(para: &Paragraph, target: usize, pending: &mut Vec<PendingChunk>) {
    let sentences = split_sentences(&para.text);
    if sentences.is_empty() {
        return;
    }

    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    let flush = |current: &mut Vec<&str>, pending: &mut Vec<PendingChunk>| {
        if current.is_empty() {
            return;
        }
        let content = current.join(" ");
        pending.push(PendingChunk {
            start: para.start,
            end: para.end,
            last_paragraph: Paragraph {
                text: content.clone(),
                start: para.start,
                end: para.end,
            },
            content,
        });
        current.clear();
    };

    for sentence in sentences {
        // A single sentence beyond the target gets a hard character
        // split at space boundaries.
        if sentence.len() > target {
            flush(&mut current, pending);
            current_len = 0;
            for piece in hard_split(sentence, target) {
                pending.push(PendingChunk {
                    start: para.start,
                    end: para.end,
                    last_paragraph: Paragraph {
                        text: piece.clone(),
                        start: para.start,
                        end: para.end,
                    },
                    content: piece,
                });
            }
            continue;
        }

        let would_be = if current.is_empty() {
            sentence.len()
        } else {
            current_len + 1 + sentence.len()
        };

        if would_be > target && !current.is_empty() {
            let carry = *current.last().unwrap();
            flush(&mut current, pending);
            if carry.len() + 1 + sentence.len() <= target {
                current_len = carry.len() + 1 + sentence.len();
                current.push(carry);
            } else {
                current_len = sentence.len();
            }
            current.push(sentence);
        } else {
            current_len = would_be;
            current.push(sentence);
        }
    }
    flush(&mut current, pending);
}

/// Split text into pieces of at most `target` bytes, preferring space
/// boundaries.
fn hard_split(text: &str, target: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= target {
            pieces.push(remaining.trim().to_string());
            break;
        }
        let mut split_at = target;
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let actual = remaining[..split_at]
            .rfind(' ')
            .map(|pos| pos + 1)
            .unwrap_or(split_at);
        let piece = remaining[..actual].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[actual..];
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Assign ids, indices, hashes, and adjacency context.
fn finalize(document_id: &str, pending: Vec<PendingChunk>) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = pending
        .into_iter()
        .enumerate()
        .map(|(index, p)| {
            let mut hasher = Sha256::new();
            hasher.update(p.content.as_bytes());
            let hash = format!("{:x}", hasher.finalize());

            Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_index: index,
                token_count: p.content.len() / CHARS_PER_TOKEN,
                hash,
                metadata: ChunkMetadata {
                    start_offset: p.start,
                    end_offset: p.end,
                    structural_type: classify_structure(&p.content),
                    prev_context: None,
                    next_context: None,
                    expanded_context: None,
                },
                content: p.content,
            }
        })
        .collect();

    // Adjacency context: last/first sentence of the neighboring chunk.
    for i in 0..chunks.len() {
        if i > 0 {
            let prev = split_sentences(&chunks[i - 1].content)
                .last()
                .map(|s| s.to_string());
            chunks[i].metadata.prev_context = prev;
        }
        if i + 1 < chunks.len() {
            let next = split_sentences(&chunks[i + 1].content)
                .first()
                .map(|s| s.to_string());
            chunks[i].metadata.next_context = next;
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(target: usize, min: usize) -> ChunkingConfig {
        ChunkingConfig {
            target_size: target,
            min_size: min,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("d1", "Hello, world!", &cfg(800, 10), DocumentType::General);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert!(chunks[0].metadata.prev_context.is_none());
        assert!(chunks[0].metadata.next_context.is_none());
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_document("d1", "", &cfg(800, 10), DocumentType::General).is_empty());
        assert!(chunk_document("d1", "   \n\n  ", &cfg(800, 10), DocumentType::General).is_empty());
    }

    #[test]
    fn test_indices_contiguous() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {} with some words in it.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document("d1", &text, &cfg(120, 10), DocumentType::General);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "index mismatch at {}", i);
        }
    }

    #[test]
    fn test_paragraph_coverage_with_overlap() {
        // Stripping the carried overlap paragraph from each chunk after
        // the first reproduces the original paragraph sequence.
        let paragraphs: Vec<String> = (0..12)
            .map(|i| format!("Unique paragraph {} talks about topic {}.", i, i))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_document("d1", &text, &cfg(120, 10), DocumentType::General);
        assert!(chunks.len() > 1);

        let mut rebuilt: Vec<String> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            for para in chunk.content.split("\n\n") {
                let is_overlap = i > 0 && rebuilt.last().map(|p| p == para).unwrap_or(false);
                if !is_overlap {
                    rebuilt.push(para.to_string());
                }
            }
        }
        assert_eq!(rebuilt, paragraphs);
    }

    #[test]
    fn test_carry_forward_overlap_present() {
        let text = "First paragraph with enough words to fill space here.\n\n\
                    Second paragraph also has plenty of words inside it.\n\n\
                    Third paragraph closes out the document nicely now.";
        let chunks = chunk_document("d1", text, &cfg(110, 10), DocumentType::General);
        assert!(chunks.len() >= 2);
        // Each non-first chunk starts with the previous chunk's last paragraph.
        for pair in chunks.windows(2) {
            let prev_last = pair[0].content.split("\n\n").last().unwrap();
            assert!(
                pair[1].content.starts_with(prev_last),
                "chunk should begin with the carried paragraph"
            );
        }
    }

    #[test]
    fn test_oversized_paragraph_sentence_split() {
        let sentences: Vec<String> = (0..20)
            .map(|i| format!("Sentence number {} has a fixed amount of words.", i))
            .collect();
        let text = sentences.join(" ");
        let chunks = chunk_document("d1", &text, &cfg(150, 10), DocumentType::General);
        assert!(chunks.len() > 1);
        for c in &chunks {
            // No chunk may wildly exceed the target.
            assert!(c.content.len() <= 150 + 60, "chunk too large: {}", c.content.len());
        }
    }

    #[test]
    fn test_no_blank_lines_degrades_to_fixed_split() {
        let text = "word ".repeat(500);
        let chunks = chunk_document("d1", &text, &cfg(200, 10), DocumentType::General);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn test_adjacency_context() {
        let text = "Alpha sentence one. Alpha sentence two.\n\n\
                    Beta sentence one. Beta sentence two.\n\n\
                    Gamma sentence one. Gamma sentence two.";
        let chunks = chunk_document("d1", text, &cfg(45, 5), DocumentType::General);
        assert!(chunks.len() >= 3);
        assert!(chunks[0].metadata.prev_context.is_none());
        assert!(chunks[0].metadata.next_context.is_some());
        let mid = &chunks[1];
        assert!(mid.metadata.prev_context.is_some());
        assert!(mid.metadata.next_context.is_some());
        assert!(chunks.last().unwrap().metadata.next_context.is_none());
    }

    #[test]
    fn test_classify_code() {
        let text = "fn main() {\n    let x = 1;\n    println!(\"{}\", x);\n}\n\
                    fn other() {\n    let y = 2;\n}";
        assert_eq!(classify_document(text), DocumentType::Code);
    }

    #[test]
    fn test_classify_technical() {
        let text = "The API exposes a configuration endpoint. The server \
                    validates each parameter against the schema.";
        assert_eq!(classify_document(text), DocumentType::Technical);
    }

    #[test]
    fn test_classify_article() {
        let text = "# A Title\n\nFirst paragraph of prose.\n\nSecond paragraph of prose.";
        assert_eq!(classify_document(text), DocumentType::Article);
    }

    #[test]
    fn test_classify_general() {
        assert_eq!(
            classify_document("just a short plain note"),
            DocumentType::General
        );
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("One here. Two there! Three maybe? Four");
        assert_eq!(s, vec!["One here.", "Two there!", "Three maybe?", "Four"]);
    }

    #[test]
    fn test_deterministic_content() {
        let text = "Alpha paragraph content.\n\nBeta paragraph content.\n\nGamma text.";
        let a = chunk_document("d1", text, &cfg(50, 5), DocumentType::General);
        let b = chunk_document("d1", text, &cfg(50, 5), DocumentType::General);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.chunk_index, y.chunk_index);
        }
    }
}
