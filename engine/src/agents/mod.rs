//! Specialized agents
//!
//! Each `AgentTarget` variant has exactly one handler. The registry selects it
//! with a fixed `match`; there is no lookup by name.
//!
//! Agents reach collaborators only through [`call_collaborator`], which
//! bounds every call with a timeout and retries `CollaboratorUnavailable`
//! a configured number of times. The orchestrator itself never retries.

pub mod renovation;
pub mod report;
pub mod retrieval;
pub mod statistics;
pub mod structured;

pub use renovation::RenovationEstimatorAgent;
pub use report::ReportAgent;
pub use retrieval::RetrievalAgent;
pub use statistics::StatisticsAgent;
pub use structured::StructuredQueryAgent;

use crate::conductor::types::AgentTarget;
use crate::config::{Config, OrchestratorConfig};
use async_trait::async_trait;
use sdk::collaborators::{RelationalStore, VectorIndex};
use sdk::errors::EngineError;
use sdk::types::{AgentInput, AgentOutput};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A specialized handler with a narrow input/output contract
#[async_trait]
pub trait Agent: Send + Sync {
    /// Variant this handler serves
    fn target(&self) -> AgentTarget;

    /// Run once with fully resolved parameters
    async fn run(&self, input: AgentInput) -> Result<AgentOutput, EngineError>;
}

/// Timeout and retry budget for one collaborator call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for CallPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            timeout: config.collaborator_timeout(),
            retries: config.collaborator_retries,
        }
    }
}

/// Call a collaborator under `policy`
///
/// Timeouts surface as `CollaboratorUnavailable`. Only that kind is retried;
/// any other error returns immediately.
pub async fn call_collaborator<T, F, Fut>(
    name: &str,
    policy: CallPolicy,
    mut call: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let attempts = policy.retries.saturating_add(1);
    let mut last_error = EngineError::unavailable(name, "not attempted");

    for attempt in 1..=attempts {
        let error = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", name, attempt);
                }
                return Ok(value);
            }
            Ok(Err(e @ EngineError::CollaboratorUnavailable { .. })) => e,
            Ok(Err(e)) => return Err(e),
            Err(_) => EngineError::unavailable(
                name,
                format!("timed out after {}ms", policy.timeout.as_millis()),
            ),
        };

        if attempt < attempts {
            warn!(
                "{} call failed (attempt {}/{}): {}. Retrying",
                name, attempt, attempts, error
            );
        }
        last_error = error;
    }

    Err(last_error)
}

/// One handler per agent target
pub struct AgentRegistry {
    structured: Arc<dyn Agent>,
    retrieval: Arc<dyn Agent>,
    statistics: Arc<dyn Agent>,
    renovation: Arc<dyn Agent>,
    report: Arc<dyn Agent>,
}

impl AgentRegistry {
    /// Build the standard agents over the given collaborators
    ///
    /// Without a vector index the retrieval agent reports its collaborator
    /// as unavailable.
    pub fn new(
        config: &Config,
        relational: Arc<dyn RelationalStore>,
        vector: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        let policy = CallPolicy::from(&config.orchestrator);

        Self {
            structured: Arc::new(StructuredQueryAgent::new(
                Arc::clone(&relational),
                config.search.structured_limit,
                policy,
            )),
            retrieval: Arc::new(RetrievalAgent::new(
                vector,
                Arc::clone(&relational),
                config.search.semantic_limit,
                config.search.embedding_model.clone(),
                policy,
            )),
            statistics: Arc::new(StatisticsAgent::new(Arc::clone(&relational), policy)),
            renovation: Arc::new(RenovationEstimatorAgent::new(
                Arc::clone(&relational),
                config.renovation.rates.clone(),
                config.renovation.default_tier(),
                policy,
            )),
            report: Arc::new(ReportAgent::new(relational, policy)),
        }
    }

    /// Build from explicit handlers
    ///
    /// # Errors
    ///
    /// `EngineError::Config` when a handler is registered under the wrong
    /// target.
    pub fn with_handlers(
        structured: Arc<dyn Agent>,
        retrieval: Arc<dyn Agent>,
        statistics: Arc<dyn Agent>,
        renovation: Arc<dyn Agent>,
        report: Arc<dyn Agent>,
    ) -> Result<Self, EngineError> {
        let registry = Self {
            structured,
            retrieval,
            statistics,
            renovation,
            report,
        };

        for target in [
            AgentTarget::StructuredQuery,
            AgentTarget::Retrieval,
            AgentTarget::Statistics,
            AgentTarget::RenovationEstimator,
            AgentTarget::Report,
        ] {
            let actual = registry.handler(target).target();
            if actual != target {
                return Err(EngineError::Config(format!(
                    "handler for {} reports target {}",
                    target, actual
                )));
            }
        }

        Ok(registry)
    }

    pub fn handler(&self, target: AgentTarget) -> &Arc<dyn Agent> {
        match target {
            AgentTarget::StructuredQuery => &self.structured,
            AgentTarget::Retrieval => &self.retrieval,
            AgentTarget::Statistics => &self.statistics,
            AgentTarget::RenovationEstimator => &self.renovation,
            AgentTarget::Report => &self.report,
        }
    }

    pub async fn dispatch(
        &self,
        target: AgentTarget,
        input: AgentInput,
    ) -> Result<AgentOutput, EngineError> {
        debug!("Dispatching {} with {} params", target, input.params.len());
        self.handler(target).run(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(50),
            retries,
        }
    }

    #[tokio::test]
    async fn test_retries_unavailable_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = call_collaborator("store", policy(2), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(EngineError::unavailable("store", "connection reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call_collaborator("store", policy(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::unavailable("store", "down")) }
        })
        .await;

        assert!(matches!(
            result,
            Err(EngineError::CollaboratorUnavailable { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call_collaborator("store", policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::missing("square_feet")) }
        })
        .await;

        assert!(matches!(
            result,
            Err(EngineError::AgentInputInsufficient { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_unavailable() {
        let result: Result<(), _> = call_collaborator("vector_index", policy(0), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(EngineError::CollaboratorUnavailable {
                collaborator,
                reason,
            }) => {
                assert_eq!(collaborator, "vector_index");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
