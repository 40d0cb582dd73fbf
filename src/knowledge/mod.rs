//! Retrieval of knowledge-base excerpts for model prompts.
//!
//! [`KnowledgeBase`] is the seam: [`pinecone::PineconeKnowledgeBase`] queries
//! a hosted vector index with integrated embedding, [`NullKnowledgeBase`]
//! stands in when no index is configured.

use async_trait::async_trait;
use serde::Serialize;

pub mod pinecone;

/// One retrieved excerpt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeSnippet {
    /// Record id in the index.
    pub id: String,
    /// Excerpt text.
    pub text: String,
    /// Document the excerpt came from, if recorded.
    pub source: Option<String>,
    /// Relevance score reported by the index.
    pub score: f32,
}

/// Errors from knowledge retrieval.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// HTTP transport failure.
    #[error("knowledge request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The index answered with an error status.
    #[error("knowledge index returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitised response body.
        body: String,
    },
    /// The response did not match the expected shape.
    #[error("knowledge response parse error: {0}")]
    Parse(String),
}

/// Source of excerpts relevant to a question.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// The `top_k` most relevant excerpts for `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`KnowledgeError`] if the index cannot be queried.
    async fn search(&self, query: &str, top_k: u32) -> Result<Vec<KnowledgeSnippet>, KnowledgeError>;
}

/// Knowledge base that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullKnowledgeBase;

#[async_trait]
impl KnowledgeBase for NullKnowledgeBase {
    async fn search(
        &self,
        _query: &str,
        _top_k: u32,
    ) -> Result<Vec<KnowledgeSnippet>, KnowledgeError> {
        Ok(Vec::new())
    }
}
