//! Orchestration core
//!
//! Query → [`QueryRouter`] (intents) → [`TaskPlanner`] (plan) →
//! [`Orchestrator`] (agents, aggregation) → memory append. The [`Assistant`]
//! facade runs that pipeline for one session turn.

pub mod aggregate;
pub mod context;
pub mod extract;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod router;
pub mod session;
pub mod types;

pub use aggregate::{AggregatedResponse, ResponseStatus, SectionStatus};
pub use context::ConversationState;
pub use memory::{AppendOutcome, InMemoryStore, MemoryEntry, MemoryLimits, MemoryStore, Role};
pub use orchestrator::{Orchestrator, Query, SessionContext};
pub use planner::TaskPlanner;
pub use router::{Classification, QueryRouter};
pub use session::Assistant;
pub use types::{AgentTarget, Intent, Plan, PlanStatus, Task, TaskStatus};
