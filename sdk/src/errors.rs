//! Error types and handling
//!
//! This module provides the error types used throughout the Estate engine.
//! All errors implement the `EstateErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Agent-level failures are never surfaced to callers as raw errors. The
//! orchestrator converts them into a serialisable [`TaskError`] and attaches
//! it to the Task outcome, so a compound query can still return the parts
//! that succeeded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trait for Estate error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait EstateErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors produce a degraded-but-returned response. Non-recoverable
    /// errors indicate a defect and halt the turn.
    fn is_recoverable(&self) -> bool;

    /// Serialisable classification of the error
    fn kind(&self) -> ErrorKind;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Classification**: the router could not match any intent (non-fatal)
/// - **Planning**: the intent table produced an invalid dependency graph (fatal)
/// - **Agent input**: an agent is missing a required field (recoverable)
/// - **Collaborator**: the relational store or vector index failed (recoverable)
/// - **Timeout**: the plan deadline expired (partial results returned)
/// - **Memory**: the session log rejected an append
/// - **Configuration / Database / IO**: ambient failures at the edges
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EstateErrorExt, ErrorKind};
///
/// let error = EngineError::AgentInputInsufficient {
///     field: "square_feet".to_string(),
/// };
/// assert!(error.is_recoverable());
/// assert_eq!(error.kind(), ErrorKind::InsufficientInput);
///
/// let fatal = EngineError::PlanConstruction("t2 depends on t3".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Routing errors
    #[error("Classification ambiguous: {0}")]
    ClassificationAmbiguous(String),

    // Planning errors
    #[error("Plan construction error: {0}")]
    PlanConstruction(String),

    // Agent errors
    #[error("Insufficient input: missing {field}")]
    AgentInputInsufficient { field: String },

    #[error("Collaborator unavailable ({collaborator}): {reason}")]
    CollaboratorUnavailable {
        collaborator: String,
        reason: String,
    },

    // Orchestration errors
    #[error("Plan timed out after {elapsed_ms}ms")]
    PlanTimeout { elapsed_ms: u64 },

    // Memory errors
    #[error("Memory conflict in session {session_id}: {reason}")]
    MemoryConflict { session_id: String, reason: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for a missing-field agent error
    pub fn missing(field: impl Into<String>) -> Self {
        Self::AgentInputInsufficient {
            field: field.into(),
        }
    }

    /// Shorthand for a collaborator failure
    pub fn unavailable(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl EstateErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Session storage failed. Try again shortly",
            Self::Serialization(_) => "A result could not be encoded",
            Self::ClassificationAmbiguous(_) => {
                "The request was unclear. Try naming a location, budget or size"
            }
            Self::PlanConstruction(_) => "Internal planning error. Please report this query",
            Self::AgentInputInsufficient { .. } => "Some details are missing from the request",
            Self::CollaboratorUnavailable { .. } => {
                "A data source is unavailable. Partial results were returned"
            }
            Self::PlanTimeout { .. } => "The request took too long. Partial results were returned",
            Self::MemoryConflict { .. } => "The conversation changed concurrently. Please retry",
            Self::SessionNotFound(_) => "Unknown session",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::PlanConstruction(_) | Self::Config(_))
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::ClassificationAmbiguous(_) => ErrorKind::Ambiguous,
            Self::PlanConstruction(_) => ErrorKind::Internal,
            Self::AgentInputInsufficient { .. } => ErrorKind::InsufficientInput,
            Self::CollaboratorUnavailable { .. } => ErrorKind::CollaboratorUnavailable,
            Self::PlanTimeout { .. } => ErrorKind::Timeout,
            Self::MemoryConflict { .. } | Self::SessionNotFound(_) => ErrorKind::Memory,
            Self::Config(_) | Self::Database(_) | Self::Serialization(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Serialisable error classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Ambiguous,
    InsufficientInput,
    CollaboratorUnavailable,
    Timeout,
    Memory,
    Internal,
}

/// Error recorded on a Task outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,

    /// Missing field name for `insufficient_input` failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl TaskError {
    /// Task was still pending or running when the plan deadline expired
    pub fn timeout() -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: "timeout".to_string(),
            field: None,
        }
    }

    /// Task panicked or was aborted outside the deadline path
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            field: None,
        }
    }
}

impl From<&EngineError> for TaskError {
    fn from(e: &EngineError) -> Self {
        let field = match e {
            EngineError::AgentInputInsufficient { field } => Some(field.clone()),
            _ => None,
        };
        Self {
            kind: e.kind(),
            message: e.to_string(),
            field,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
