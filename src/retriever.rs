//! Knowledge retriever
//!
//! Embeds the query and asks the persisted index for the nearest passages.

mod index;

pub use index::{IndexError, VectorIndex};

use crate::llm::Embedder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// One knowledge-base passage scored against a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub source_id: String,
    /// Cosine similarity in [-1, 1]
    pub relevance_score: f32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("Knowledge index unavailable: {0}")]
    Unavailable(String),
    #[error("k must be at least 1")]
    InvalidK,
}

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// At most `k` passages, ordered by non-increasing relevance
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}

#[async_trait]
impl<T: KnowledgeRetriever + ?Sized> KnowledgeRetriever for Arc<T> {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        (**self).search(query, k).await
    }
}

pub struct VectorRetriever<E> {
    embedder: E,
    index: VectorIndex,
}

impl<E: Embedder> VectorRetriever<E> {
    pub fn new(embedder: E, index: VectorIndex) -> Self {
        Self { embedder, index }
    }
}

#[async_trait]
impl<E: Embedder> KnowledgeRetriever for VectorRetriever<E> {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        if k == 0 {
            return Err(RetrievalError::InvalidK);
        }

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("embedding failed: {}", e.message)))?;

        let index = self.index.clone();
        let passages = tokio::task::spawn_blocking(move || index.nearest(&embedding, k))
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("search task failed: {e}")))?
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        tracing::debug!(k, hits = passages.len(), "Knowledge search complete");
        Ok(passages)
    }
}
