//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use estate_engine::agents::{
    Agent, AgentRegistry, CallPolicy, RenovationEstimatorAgent, ReportAgent, RetrievalAgent,
    StatisticsAgent, StructuredQueryAgent,
};
use estate_engine::catalog::JsonCatalog;
use estate_engine::conductor::memory::{InMemoryStore, MemoryLimits, MemoryStore};
use estate_engine::conductor::{AgentTarget, Assistant};
use estate_engine::config::Config;
use sdk::collaborators::{RelationalStore, SimilarityHit, SimilarityRequest, VectorIndex};
use sdk::errors::EngineError;
use sdk::types::{AgentInput, AgentOutput, PropertyRecord};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn record(
    id: &str,
    location: &str,
    price: f64,
    bedrooms: u32,
    square_feet: f64,
    kind: &str,
) -> PropertyRecord {
    PropertyRecord {
        property_id: id.to_string(),
        location: location.to_string(),
        price,
        bedrooms: Some(bedrooms),
        bathrooms: Some(bedrooms.saturating_sub(1).max(1)),
        square_feet: Some(square_feet),
        property_type: Some(kind.to_string()),
        status: Some("Active".to_string()),
        listing_date: Some("2024-03-01".to_string()),
        description: None,
    }
}

/// Six listings across Hyderabad, Pune and Mumbai
pub fn sample_records() -> Vec<PropertyRecord> {
    vec![
        record("h1", "Hyderabad", 20_000_000.0, 2, 1200.0, "Apartment"),
        record("h2", "Hyderabad", 25_000_000.0, 3, 1500.0, "Villa"),
        record("h3", "Hyderabad", 45_000_000.0, 4, 2400.0, "Villa"),
        record("p1", "Pune", 8_000_000.0, 2, 900.0, "Apartment"),
        record("p2", "Pune", 15_000_000.0, 3, 1300.0, "Apartment"),
        record("m1", "Mumbai", 60_000_000.0, 2, 1100.0, "Apartment"),
    ]
}

pub fn catalog() -> Arc<dyn RelationalStore> {
    Arc::new(JsonCatalog::from_records(sample_records()))
}

/// Default config with short collaborator timeouts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.orchestrator.plan_timeout_ms = 5_000;
    config.orchestrator.collaborator_timeout_ms = 1_000;
    config.orchestrator.collaborator_retries = 0;
    config
}

pub fn memory() -> Arc<dyn MemoryStore> {
    Arc::new(InMemoryStore::new(MemoryLimits::default()))
}

pub fn registry(config: &Config) -> Arc<AgentRegistry> {
    Arc::new(AgentRegistry::new(config, catalog(), None))
}

pub fn assistant() -> Assistant {
    let config = test_config();
    Assistant::new(&config, registry(&config), memory()).unwrap()
}

/// Standard agents with one target swapped for `replacement`
pub fn registry_with(
    config: &Config,
    replacement: Arc<dyn Agent>,
) -> Arc<AgentRegistry> {
    let store = catalog();
    let policy = CallPolicy::from(&config.orchestrator);

    let mut structured: Arc<dyn Agent> = Arc::new(StructuredQueryAgent::new(
        Arc::clone(&store),
        config.search.structured_limit,
        policy,
    ));
    let mut retrieval: Arc<dyn Agent> = Arc::new(RetrievalAgent::new(
        None,
        Arc::clone(&store),
        config.search.semantic_limit,
        config.search.embedding_model.clone(),
        policy,
    ));
    let mut statistics: Arc<dyn Agent> =
        Arc::new(StatisticsAgent::new(Arc::clone(&store), policy));
    let mut renovation: Arc<dyn Agent> = Arc::new(RenovationEstimatorAgent::new(
        Arc::clone(&store),
        config.renovation.rates.clone(),
        config.renovation.default_tier(),
        policy,
    ));
    let mut report: Arc<dyn Agent> = Arc::new(ReportAgent::new(store, policy));

    let slot = match replacement.target() {
        AgentTarget::StructuredQuery => &mut structured,
        AgentTarget::Retrieval => &mut retrieval,
        AgentTarget::Statistics => &mut statistics,
        AgentTarget::RenovationEstimator => &mut renovation,
        AgentTarget::Report => &mut report,
    };
    *slot = replacement;

    Arc::new(
        AgentRegistry::with_handlers(structured, retrieval, statistics, renovation, report)
            .unwrap(),
    )
}

/// Vector index answering every request with the same hits
pub struct FixedIndex {
    pub hits: Vec<SimilarityHit>,
    pub seen: Mutex<Vec<SimilarityRequest>>,
}

impl FixedIndex {
    pub fn new(hits: &[(&str, f64)]) -> Self {
        Self {
            hits: hits
                .iter()
                .map(|(id, score)| SimilarityHit {
                    property_id: id.to_string(),
                    score: *score,
                })
                .collect(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SimilarityRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for FixedIndex {
    async fn search(&self, request: &SimilarityRequest) -> Result<Vec<SimilarityHit>, EngineError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self.hits.clone())
    }
}

/// Assistant backed by the sample catalog and `index`
pub fn assistant_with_index(index: Arc<FixedIndex>) -> Assistant {
    let config = test_config();
    let registry = Arc::new(AgentRegistry::new(
        &config,
        catalog(),
        Some(index as Arc<dyn VectorIndex>),
    ));
    Assistant::new(&config, registry, memory()).unwrap()
}

/// Assistant whose memory keeps only `window` turns in a snapshot
pub fn assistant_with_window(window: usize) -> Assistant {
    let config = test_config();
    let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new(MemoryLimits {
        history_window: window,
        ..MemoryLimits::default()
    }));
    Assistant::new(&config, registry(&config), memory).unwrap()
}

/// Delays another agent
pub struct SlowAgent {
    pub inner: Arc<dyn Agent>,
    pub delay: Duration,
}

#[async_trait]
impl Agent for SlowAgent {
    fn target(&self) -> AgentTarget {
        self.inner.target()
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, EngineError> {
        tokio::time::sleep(self.delay).await;
        self.inner.run(input).await
    }
}

/// Always fails with a collaborator error
pub struct BrokenAgent {
    pub target: AgentTarget,
}

#[async_trait]
impl Agent for BrokenAgent {
    fn target(&self) -> AgentTarget {
        self.target
    }

    async fn run(&self, _input: AgentInput) -> Result<AgentOutput, EngineError> {
        Err(EngineError::unavailable("relational_store", "connection refused"))
    }
}

pub fn structured_agent(config: &Config) -> Arc<dyn Agent> {
    Arc::new(StructuredQueryAgent::new(
        catalog(),
        config.search.structured_limit,
        CallPolicy::from(&config.orchestrator),
    ))
}
