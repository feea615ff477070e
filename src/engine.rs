//! Inference engine capability trait.
//!
//! The retrieval core never loads models itself. It consumes two
//! capabilities — `embed` and `generate` — behind a single
//! [`InferenceEngine`] trait that distinct runtime adapters implement.
//! This replaces any duck-typed union of engine shapes with one seam.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// One message in a generation conversation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Callback invoked with each streamed token.
pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for a generation call.
#[derive(Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop_sequences: Vec<String>,
    /// When set, the engine streams tokens through this callback in
    /// addition to returning the full text.
    pub on_token: Option<TokenCallback>,
}

impl std::fmt::Debug for GenerateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateOptions")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("stop_sequences", &self.stop_sequences)
            .field("on_token", &self.on_token.is_some())
            .finish()
    }
}

/// The two capabilities the retrieval core consumes from a model
/// runtime. Implemented by external adapters; the crate ships only a
/// deterministic [`test_support::MockEngine`].
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Identifier of the embedding model (one per store generation).
    fn model_name(&self) -> &str;

    /// Context window size in tokens, used for context budgeting.
    fn context_window(&self) -> usize;

    /// Embed a single text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate a completion for the conversation.
    async fn generate(&self, messages: &[ChatMessage], options: &GenerateOptions)
        -> Result<String>;
}

/// Deterministic engine for tests and examples.
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DIMS: usize = 64;

    /// A bag-of-words embedder plus scriptable generator.
    ///
    /// Embeddings hash each token into a fixed-dimension histogram and
    /// L2-normalize it, so texts sharing vocabulary score higher cosine
    /// similarity — enough signal for end-to-end retrieval tests.
    /// `generate` pops scripted responses, falling back to echoing the
    /// last user message.
    pub struct MockEngine {
        responses: Mutex<VecDeque<String>>,
        embed_calls: AtomicUsize,
        generate_calls: AtomicUsize,
        fail_generate: Mutex<bool>,
    }

    impl MockEngine {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                embed_calls: AtomicUsize::new(0),
                generate_calls: AtomicUsize::new(0),
                fail_generate: Mutex::new(false),
            }
        }

        /// Queue a scripted generation response.
        pub fn push_response(&self, response: impl Into<String>) {
            self.responses.lock().unwrap().push_back(response.into());
        }

        /// Make subsequent `generate` calls fail.
        pub fn fail_generation(&self) {
            *self.fail_generate.lock().unwrap() = true;
        }

        pub fn embed_calls(&self) -> usize {
            self.embed_calls.load(Ordering::SeqCst)
        }

        pub fn generate_calls(&self) -> usize {
            self.generate_calls.load(Ordering::SeqCst)
        }

        /// The embedding computation, exposed for order assertions.
        pub fn embed_sync(&self, text: &str) -> Vec<f32> {
            let mut histogram = vec![0.0f32; DIMS];
            for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
                if token.is_empty() {
                    continue;
                }
                histogram[fnv1a(token) as usize % DIMS] += 1.0;
            }
            let norm: f32 = histogram.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut histogram {
                    *x /= norm;
                }
            }
            histogram
        }
    }

    impl Default for MockEngine {
        fn default() -> Self {
            Self::new()
        }
    }

    fn fnv1a(s: &str) -> u64 {
        let mut hash = 0xcbf29ce484222325u64;
        for byte in s.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }

    #[async_trait]
    impl InferenceEngine for MockEngine {
        fn model_name(&self) -> &str {
            "mock-bag-of-words"
        }

        fn context_window(&self) -> usize {
            4096
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.embed_sync(text))
        }

        async fn generate(
            &self,
            messages: &[ChatMessage],
            options: &GenerateOptions,
        ) -> Result<String> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_generate.lock().unwrap() {
                anyhow::bail!("mock generation failure");
            }

            let response = self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                messages
                    .iter()
                    .rev()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.clone())
                    .unwrap_or_default()
            });

            if let Some(on_token) = &options.on_token {
                for token in response.split_inclusive(' ') {
                    on_token(token);
                }
            }

            Ok(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockEngine;
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_mock_embed_deterministic() {
        let engine = MockEngine::new();
        let a = engine.embed("kubernetes cluster deployment").await.unwrap();
        let b = engine.embed("kubernetes cluster deployment").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.embed_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_generate_scripted_then_echo() {
        let engine = MockEngine::new();
        engine.push_response("scripted");
        let messages = [ChatMessage::user("hello there")];
        let first = engine
            .generate(&messages, &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(first, "scripted");
        let second = engine
            .generate(&messages, &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(second, "hello there");
    }

    #[tokio::test]
    async fn test_mock_streams_tokens() {
        let engine = MockEngine::new();
        engine.push_response("a b c");
        let collected = Arc::new(Mutex::new(String::new()));
        let sink = collected.clone();
        let options = GenerateOptions {
            on_token: Some(Arc::new(move |t: &str| {
                sink.lock().unwrap().push_str(t);
            })),
            ..Default::default()
        };
        let out = engine
            .generate(&[ChatMessage::user("x")], &options)
            .await
            .unwrap();
        assert_eq!(out, "a b c");
        assert_eq!(*collected.lock().unwrap(), "a b c");
    }
}
