//! Query rewriting and multi-variant expansion.
//!
//! Both operations treat the inference engine as unreliable: a failed
//! or malformed generation degrades to the original query (rewrite) or
//! to a static synonym table (expansion). They never propagate errors
//! to the caller.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::config::ExpansionConfig;
use crate::engine::{ChatMessage, GenerateOptions, InferenceEngine};

/// Query variants plus the provenance of how they were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpansion {
    /// Variants parsed from the engine's JSON output.
    Parsed(Vec<String>),
    /// Variants from the static synonym table after a parse or
    /// generation failure.
    Fallback(Vec<String>),
}

impl QueryExpansion {
    pub fn variants(&self) -> &[String] {
        match self {
            QueryExpansion::Parsed(v) | QueryExpansion::Fallback(v) => v,
        }
    }
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[\s\S]*?\}").unwrap())
}

#[derive(Deserialize)]
struct VariationsPayload {
    variations: Vec<String>,
}

/// Rewrite a terse query into a fuller retrieval query.
///
/// Only fires for queries shorter than the configured trigger length.
/// Any engine error, empty output, or over-long rewrite leaves the
/// original query untouched.
pub async fn rewrite_query(
    engine: &Arc<dyn InferenceEngine>,
    query: &str,
    cfg: &ExpansionConfig,
) -> String {
    let word_count = query.split_whitespace().count();
    if word_count == 0 || word_count >= cfg.trigger_max_words {
        return query.to_string();
    }

    let messages = vec![
        ChatMessage::system(
            "You rewrite terse search queries into complete, specific questions. \
             Reply with the rewritten query only, no quotes or explanation.",
        ),
        ChatMessage::user(query),
    ];
    let options = GenerateOptions {
        temperature: Some(0.3),
        max_tokens: Some(64),
        ..Default::default()
    };

    match engine.generate(&messages, &options).await {
        Ok(output) => {
            let rewritten = output.trim().trim_matches(|c| c == '"' || c == '\'').trim();
            let len = rewritten.split_whitespace().count();
            if rewritten.is_empty() || len > cfg.rewrite_max_words {
                warn!(query, "query rewrite discarded, keeping original");
                query.to_string()
            } else {
                rewritten.to_string()
            }
        }
        Err(err) => {
            warn!(query, error = %err, "query rewrite failed, keeping original");
            query.to_string()
        }
    }
}

/// Generate alternative phrasings of a query for multi-variant
/// retrieval. The original query is not included in the output.
///
/// Like [`rewrite_query`], only fires for queries shorter than the
/// configured trigger length; long queries already carry enough terms
/// and get no variants.
pub async fn expand_query(
    engine: &Arc<dyn InferenceEngine>,
    query: &str,
    cfg: &ExpansionConfig,
) -> QueryExpansion {
    let word_count = query.split_whitespace().count();
    if word_count == 0 || word_count >= cfg.trigger_max_words || cfg.max_variants == 0 {
        return QueryExpansion::Parsed(Vec::new());
    }

    let messages = vec![
        ChatMessage::system(format!(
            "Generate up to {} alternative phrasings of the user's search query. \
             Respond with JSON only: {{\"variations\": [\"...\"]}}",
            cfg.max_variants
        )),
        ChatMessage::user(query),
    ];
    let options = GenerateOptions {
        temperature: Some(0.7),
        max_tokens: Some(256),
        ..Default::default()
    };

    match engine.generate(&messages, &options).await {
        Ok(output) => match parse_variations(&output, query, cfg.max_variants) {
            Some(variants) => QueryExpansion::Parsed(variants),
            None => {
                warn!(query, "expansion output unparseable, using synonym fallback");
                QueryExpansion::Fallback(synonym_variants(query, cfg.max_variants))
            }
        },
        Err(err) => {
            warn!(query, error = %err, "expansion failed, using synonym fallback");
            QueryExpansion::Fallback(synonym_variants(query, cfg.max_variants))
        }
    }
}

fn parse_variations(output: &str, query: &str, max_variants: usize) -> Option<Vec<String>> {
    let object = json_object_pattern().find(output)?.as_str();
    let payload: VariationsPayload = serde_json::from_str(object).ok()?;
    let variants: Vec<String> = payload
        .variations
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(query))
        .take(max_variants)
        .collect();
    if variants.is_empty() {
        None
    } else {
        Some(variants)
    }
}

const SYNONYMS: &[(&str, &str)] = &[
    ("db", "database"),
    ("k8s", "kubernetes"),
    ("ml", "machine learning"),
    ("ai", "artificial intelligence"),
    ("config", "configuration"),
    ("auth", "authentication"),
    ("repo", "repository"),
    ("docs", "documentation"),
    ("env", "environment"),
    ("perf", "performance"),
];

/// Substitute known abbreviations one at a time, producing a variant
/// per substitution that actually changed the query.
fn synonym_variants(query: &str, max_variants: usize) -> Vec<String> {
    let mut variants = Vec::new();
    for (short, long) in SYNONYMS {
        let replaced: Vec<String> = query
            .split_whitespace()
            .map(|w| {
                if w.eq_ignore_ascii_case(short) {
                    long.to_string()
                } else {
                    w.to_string()
                }
            })
            .collect();
        let variant = replaced.join(" ");
        if variant != query && !variants.contains(&variant) {
            variants.push(variant);
            if variants.len() >= max_variants {
                break;
            }
        }
    }
    variants
}
