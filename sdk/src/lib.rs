//! Estate SDK
//!
//! Shared contract crate for the Estate engine: the data model passed
//! between agents, the collaborator traits and the error model.

/// Collaborator traits
pub mod collaborators;

/// Error types and handling
pub mod errors;

/// Data model
pub mod types;

// Re-export commonly used types
pub use collaborators::{
    Artifact, RelationalStore, ReportRenderer, SimilarityHit, SimilarityRequest, VectorIndex,
};
pub use errors::{EngineError, ErrorKind, EstateErrorExt, TaskError};
pub use types::{
    rank_order, AgentInput, AgentOutput, Bound, CostCategory, FilterDescriptor, NumericRange,
    PriceBucket, PropertyRecord, PropertyRef, PropertyStatistics, RenovationEstimate,
    RenovationTier, ReportDescriptor, ReportSection, ReportType, ResultSource, SearchResult,
    SectionKind,
};
