//! Estate Engine Library
//!
//! Orchestration core of the Estate property-search assistant. It is used by
//! both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// Message bus for orchestration events
pub mod message_bus;

/// Specialized agents and their registry
pub mod agents;

/// Conductor orchestration module
pub mod conductor;

/// JSON-file property catalog
pub mod catalog;

/// Collaborator adapters (vector index, report renderer)
pub mod collaborators;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
