//! HTTP Vector Index
//!
//! `VectorIndex` over a similarity service that embeds server-side.
//!
//! `POST {endpoint}/search` with `{"text", "limit", "model"}`, answered by
//! `{"hits": [{"property_id", "score"}]}`. Every transport or protocol
//! failure maps to `CollaboratorUnavailable`, which the agent's call policy
//! may retry.

use async_trait::async_trait;
use reqwest::Client;
use sdk::collaborators::{SimilarityHit, SimilarityRequest, VectorIndex};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const NAME: &str = "vector_index";

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    text: &'a str,
    limit: usize,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SimilarityHit>,
}

#[derive(Debug, Clone)]
pub struct HttpVectorIndex {
    /// Base URL, without trailing slash
    endpoint: String,
    client: Client,
}

impl HttpVectorIndex {
    /// Build a client for `endpoint`
    ///
    /// `timeout` bounds a single HTTP exchange; the agent's collaborator
    /// timeout still applies on top.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    fn name(&self) -> &str {
        NAME
    }

    async fn search(&self, request: &SimilarityRequest) -> Result<Vec<SimilarityHit>, EngineError> {
        let url = format!("{}/search", self.endpoint);
        let body = SearchBody {
            text: &request.text,
            limit: request.limit,
            model: &request.embedding_model,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::unavailable(NAME, "request timed out")
                } else if e.is_connect() {
                    EngineError::unavailable(
                        NAME,
                        format!("cannot connect to {}", self.endpoint),
                    )
                } else {
                    EngineError::unavailable(NAME, e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::unavailable(
                NAME,
                format!("similarity service error ({}): {}", status, error_text),
            ));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| EngineError::unavailable(NAME, format!("malformed response: {}", e)))?;

        debug!("Similarity service returned {} hits", parsed.hits.len());
        Ok(parsed.hits)
    }
}
