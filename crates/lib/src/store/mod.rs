//! Context store client: similarity search over the persisted embedding index.
//!
//! The index itself is built offline; this module only queries it. [`ChromaStore`]
//! talks to a Chroma server and embeds queries through [`EmbeddingClient`].

mod chroma;
mod embed;

use async_trait::async_trait;
use std::collections::BTreeMap;

pub use chroma::ChromaStore;
pub use embed::EmbeddingClient;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("context store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("context store error: {0}")]
    Store(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// One retrieved passage. Metadata values are flattened to strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPassage {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub score: f32,
}

impl ContextPassage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
            score: 0.0,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

/// Similarity search over stored passages.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Top `k` passages for `query`, ordered by descending score.
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ContextPassage>, RetrievalError>;
}

/// Sort by descending score and keep at most `k`.
pub(crate) fn rank(mut passages: Vec<ContextPassage>, k: usize) -> Vec<ContextPassage> {
    passages.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    passages.truncate(k);
    passages
}
