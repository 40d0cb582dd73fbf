//! Vector index search over HTTP using the index's integrated embedding
//! (`POST {host}/records/namespaces/{namespace}/search`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{KnowledgeBase, KnowledgeError, KnowledgeSnippet};
use crate::providers::sanitize_http_error_body;

const API_VERSION: &str = "2025-01";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Record fields requested from the index.
const FIELDS: [&str; 2] = ["text", "source"];

/// Search request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    /// Query section.
    pub query: SearchQuery<'a>,
    /// Record fields to return.
    pub fields: [&'a str; 2],
}

/// Query section of a search request.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct SearchQuery<'a> {
    /// Text to embed.
    pub inputs: SearchInputs<'a>,
    /// Number of hits.
    pub top_k: u32,
}

/// Embedding inputs.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct SearchInputs<'a> {
    /// Query text.
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: f32,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Build the JSON body for a search.
#[doc(hidden)]
pub fn build_request(query: &str, top_k: u32) -> SearchRequest<'_> {
    SearchRequest {
        query: SearchQuery {
            inputs: SearchInputs { text: query },
            top_k,
        },
        fields: FIELDS,
    }
}

/// Parse a search response, keeping hits scoring at least `min_score` that
/// carry text.
///
/// # Errors
///
/// Returns [`KnowledgeError::Parse`] if the body is not a search response.
#[doc(hidden)]
pub fn parse_response(body: &str, min_score: f32) -> Result<Vec<KnowledgeSnippet>, KnowledgeError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| KnowledgeError::Parse(e.to_string()))?;
    Ok(response
        .result
        .hits
        .into_iter()
        .filter(|hit| hit.score >= min_score)
        .filter_map(|hit| {
            let text = hit.fields.get("text")?.as_str()?.trim().to_owned();
            if text.is_empty() {
                return None;
            }
            let source = hit
                .fields
                .get("source")
                .and_then(Value::as_str)
                .map(str::to_owned);
            Some(KnowledgeSnippet {
                id: hit.id,
                text,
                source,
                score: hit.score,
            })
        })
        .collect())
}

/// Hosted vector index client.
#[derive(Clone)]
pub struct PineconeKnowledgeBase {
    host: String,
    namespace: String,
    api_key: String,
    min_score: f32,
    client: reqwest::Client,
}

impl std::fmt::Debug for PineconeKnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeKnowledgeBase")
            .field("host", &self.host)
            .field("namespace", &self.namespace)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl PineconeKnowledgeBase {
    /// Create a client for the index at `host`.
    pub fn new(
        host: impl Into<String>,
        namespace: impl Into<String>,
        api_key: impl Into<String>,
        min_score: f32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to build HTTP client with timeout, using default");
                reqwest::Client::default()
            });
        Self {
            host: host.into().trim_end_matches('/').to_owned(),
            namespace: namespace.into(),
            api_key: api_key.into(),
            min_score,
            client,
        }
    }
}

#[async_trait]
impl KnowledgeBase for PineconeKnowledgeBase {
    async fn search(&self, query: &str, top_k: u32) -> Result<Vec<KnowledgeSnippet>, KnowledgeError> {
        let url = format!(
            "{}/records/namespaces/{}/search",
            self.host, self.namespace
        );
        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&build_request(query, top_k))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(KnowledgeError::HttpStatus {
                status: status.as_u16(),
                body: sanitize_http_error_body(&body),
            });
        }
        let snippets = parse_response(&body, self.min_score)?;
        debug!(hits = snippets.len(), "knowledge search complete");
        Ok(snippets)
    }
}
