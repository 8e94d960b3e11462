//! Collaborator contracts
//!
//! The orchestration core never executes relational queries, computes
//! embeddings or renders documents itself. It reaches those capabilities
//! through the traits below, which adapters in the engine (or a host
//! application) implement.

use crate::errors::EngineError;
use crate::types::{FilterDescriptor, PropertyRecord, ReportDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Relational property store
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Name used in logs and `CollaboratorUnavailable` errors
    fn name(&self) -> &str {
        "relational_store"
    }

    /// Run a structured filter and return matching records
    async fn query(&self, filter: &FilterDescriptor) -> Result<Vec<PropertyRecord>, EngineError>;

    /// Fetch full records by id, in the order given. Unknown ids are omitted.
    async fn fetch(&self, property_ids: &[String]) -> Result<Vec<PropertyRecord>, EngineError>;
}

/// Similarity request sent to the vector index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityRequest {
    pub text: String,
    pub limit: usize,
    /// Embedding function the index should apply to `text`
    pub embedding_model: String,
}

/// One similarity hit, score in whatever scale the index uses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityHit {
    pub property_id: String,
    pub score: f64,
}

/// Vector index with server-side embedding
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str {
        "vector_index"
    }

    async fn search(&self, request: &SimilarityRequest) -> Result<Vec<SimilarityHit>, EngineError>;
}

/// Reference to a rendered artifact. The core never reads its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub media_type: String,
    pub location: String,
}

/// Document renderer for report descriptors
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    fn name(&self) -> &str {
        "report_renderer"
    }

    async fn render(&self, report: &ReportDescriptor) -> Result<Artifact, EngineError>;
}
